//! Market object tables: limit orders, call (debt) positions and
//! collateral bids.
//!
//! Ordering helpers return snapshots sorted with a total `(metric, id)`
//! tie-break; maintenance never iterates these tables in raw key order.

use std::cmp::Ordering;

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::Error,
    types::{
        AssetId, BidId, CallOrder, CallOrderId, CollateralBid, LimitOrder,
        OrderId,
    },
};

#[derive(Clone)]
pub struct Dbs {
    limit_orders:
        DatabaseUnique<SerdeBincode<OrderId>, SerdeBincode<LimitOrder>>,
    call_orders:
        DatabaseUnique<SerdeBincode<CallOrderId>, SerdeBincode<CallOrder>>,
    collateral_bids:
        DatabaseUnique<SerdeBincode<BidId>, SerdeBincode<CollateralBid>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 3;

    pub fn new(env: &Env, rwtxn: &mut RwTxn<'_>) -> Result<Self, Error> {
        Ok(Self {
            limit_orders: DatabaseUnique::create(env, rwtxn, "limit_orders")?,
            call_orders: DatabaseUnique::create(env, rwtxn, "call_orders")?,
            collateral_bids: DatabaseUnique::create(
                env,
                rwtxn,
                "collateral_bids",
            )?,
        })
    }

    pub fn try_get_limit_order(
        &self,
        rotxn: &RoTxn,
        id: OrderId,
    ) -> Result<Option<LimitOrder>, Error> {
        Ok(self.limit_orders.try_get(rotxn, &id)?)
    }

    pub fn get_limit_order(
        &self,
        rotxn: &RoTxn,
        id: OrderId,
    ) -> Result<LimitOrder, Error> {
        self.try_get_limit_order(rotxn, id)?
            .ok_or(Error::MissingOrder(id))
    }

    pub fn put_limit_order(
        &self,
        rwtxn: &mut RwTxn,
        id: OrderId,
        order: &LimitOrder,
    ) -> Result<(), Error> {
        self.limit_orders.put(rwtxn, &id, order)?;
        Ok(())
    }

    pub fn remove_limit_order(
        &self,
        rwtxn: &mut RwTxn,
        id: OrderId,
    ) -> Result<bool, Error> {
        Ok(self.limit_orders.delete(rwtxn, &id)?)
    }

    /// The book opposite a taker selling `sell_asset` for
    /// `receive_asset`: makers selling `receive_asset` for `sell_asset`,
    /// best offer first, ties by id.
    ///
    /// A maker's offer is better when it gives more of its base asset
    /// per unit of quote, so makers sort by `base/quote` descending.
    pub fn opposite_book(
        &self,
        rotxn: &RoTxn,
        sell_asset: AssetId,
        receive_asset: AssetId,
    ) -> Result<Vec<(OrderId, LimitOrder)>, Error> {
        let mut makers: Vec<(OrderId, LimitOrder)> = self
            .limit_orders
            .iter(rotxn)?
            .filter_map(|(id, order)| {
                Ok((order.for_sale.asset == receive_asset
                    && order.receive_asset() == sell_asset)
                    .then_some((id, order)))
            })
            .collect()?;
        makers.sort_unstable_by(|(id_a, a), (id_b, b)| {
            b.sell_price
                .amounts_cmp(&a.sell_price)
                .then(id_a.cmp(id_b))
        });
        Ok(makers)
    }

    pub fn get_call_order(
        &self,
        rotxn: &RoTxn,
        id: CallOrderId,
    ) -> Result<CallOrder, Error> {
        self.call_orders
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingCallOrder(id))
    }

    pub fn put_call_order(
        &self,
        rwtxn: &mut RwTxn,
        id: CallOrderId,
        order: &CallOrder,
    ) -> Result<(), Error> {
        self.call_orders.put(rwtxn, &id, order)?;
        Ok(())
    }

    pub fn remove_call_order(
        &self,
        rwtxn: &mut RwTxn,
        id: CallOrderId,
    ) -> Result<bool, Error> {
        Ok(self.call_orders.delete(rwtxn, &id)?)
    }

    pub fn all_call_orders(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(CallOrderId, CallOrder)>, Error> {
        let mut orders: Vec<(CallOrderId, CallOrder)> =
            self.call_orders.iter(rotxn)?.collect()?;
        orders.sort_unstable_by_key(|(id, _)| *id);
        Ok(orders)
    }

    /// Debt positions of one asset, least collateralized first (ties by
    /// id). `a` is less collateralized than `b` when
    /// `a.collateral * b.debt < b.collateral * a.debt`.
    pub fn call_orders_by_collateralization(
        &self,
        rotxn: &RoTxn,
        debt_asset: AssetId,
    ) -> Result<Vec<(CallOrderId, CallOrder)>, Error> {
        let mut orders: Vec<(CallOrderId, CallOrder)> = self
            .call_orders
            .iter(rotxn)?
            .filter_map(|(id, order)| {
                Ok((order.debt.asset == debt_asset).then_some((id, order)))
            })
            .collect()?;
        orders.sort_unstable_by(|(id_a, a), (id_b, b)| {
            collateralization_cmp(a, b).then(id_a.cmp(id_b))
        });
        Ok(orders)
    }

    pub fn try_get_bid(
        &self,
        rotxn: &RoTxn,
        id: BidId,
    ) -> Result<Option<CollateralBid>, Error> {
        Ok(self.collateral_bids.try_get(rotxn, &id)?)
    }

    pub fn get_bid(
        &self,
        rotxn: &RoTxn,
        id: BidId,
    ) -> Result<CollateralBid, Error> {
        self.try_get_bid(rotxn, id)?.ok_or(Error::MissingBid(id))
    }

    pub fn put_bid(
        &self,
        rwtxn: &mut RwTxn,
        id: BidId,
        bid: &CollateralBid,
    ) -> Result<(), Error> {
        self.collateral_bids.put(rwtxn, &id, bid)?;
        Ok(())
    }

    pub fn remove_bid(
        &self,
        rwtxn: &mut RwTxn,
        id: BidId,
    ) -> Result<bool, Error> {
        Ok(self.collateral_bids.delete(rwtxn, &id)?)
    }

    pub fn all_bids(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(BidId, CollateralBid)>, Error> {
        let mut bids: Vec<(BidId, CollateralBid)> =
            self.collateral_bids.iter(rotxn)?.collect()?;
        bids.sort_unstable_by_key(|(id, _)| *id);
        Ok(bids)
    }

    /// Bids on one settled asset in execution order: most collateral
    /// offered per unit of debt first, ties by id.
    pub fn bids_by_price(
        &self,
        rotxn: &RoTxn,
        debt_asset: AssetId,
    ) -> Result<Vec<(BidId, CollateralBid)>, Error> {
        let mut bids: Vec<(BidId, CollateralBid)> = self
            .collateral_bids
            .iter(rotxn)?
            .filter_map(|(id, bid)| {
                Ok((bid.debt_asset() == debt_asset).then_some((id, bid)))
            })
            .collect()?;
        bids.sort_unstable_by(|(id_a, a), (id_b, b)| {
            b.inv_swan_price
                .amounts_cmp(&a.inv_swan_price)
                .then(id_a.cmp(id_b))
        });
        Ok(bids)
    }
}

fn collateralization_cmp(a: &CallOrder, b: &CallOrder) -> Ordering {
    let lhs = u128::from(a.collateral.amount) * u128::from(b.debt.amount);
    let rhs = u128::from(b.collateral.amount) * u128::from(a.debt.amount);
    lhs.cmp(&rhs)
}
