//! Restricted operation evaluator.
//!
//! Maintenance applies a handful of operations outside any signed
//! transaction: buyback order cycles and forced membership upgrades. The
//! context carries the `skip_fee_schedule_check` flag those internal
//! invocations set; everything else behaves exactly as the regular
//! evaluator would.

use sneed::RwTxn;

use crate::{
    math::fixed::{mul_div, Rounding},
    state::{Error, State},
    types::{
        AccountId, AssetAmount, LimitOrder, OrderId, Price,
        CORE_ASSET, LIFETIME_MEMBER_EXPIRATION,
    },
};

#[derive(Clone, Copy, Debug, Default)]
pub struct EvalContext {
    pub skip_fee_schedule_check: bool,
}

#[derive(Clone, Debug)]
pub enum Operation {
    LimitOrderCreate {
        fee: u64,
        seller: AccountId,
        amount_to_sell: AssetAmount,
        min_to_receive: AssetAmount,
        expiration: u64,
    },
    LimitOrderCancel {
        fee: u64,
        order: OrderId,
        fee_paying_account: AccountId,
    },
    AccountUpgrade {
        fee: u64,
        account_to_upgrade: AccountId,
        upgrade_to_lifetime_member: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    None,
    OrderId(OrderId),
}

pub fn apply(
    state: &State,
    rwtxn: &mut RwTxn,
    ctx: &EvalContext,
    operation: Operation,
) -> Result<OperationResult, Error> {
    match operation {
        Operation::LimitOrderCreate {
            fee,
            seller,
            amount_to_sell,
            min_to_receive,
            expiration,
        } => {
            let params = state.get_global_properties(rwtxn)?.parameters;
            charge_fee(
                state,
                rwtxn,
                ctx,
                seller,
                fee,
                params.fee_schedule.limit_order_create_fee,
            )?;
            let id = create_limit_order(
                state,
                rwtxn,
                seller,
                amount_to_sell,
                min_to_receive,
                expiration,
            )?;
            Ok(OperationResult::OrderId(id))
        }
        Operation::LimitOrderCancel {
            fee,
            order,
            fee_paying_account,
        } => {
            let params = state.get_global_properties(rwtxn)?.parameters;
            charge_fee(
                state,
                rwtxn,
                ctx,
                fee_paying_account,
                fee,
                // cancellation is charged as an order operation as well
                params.fee_schedule.limit_order_create_fee,
            )?;
            cancel_limit_order(state, rwtxn, order)?;
            Ok(OperationResult::None)
        }
        Operation::AccountUpgrade {
            fee,
            account_to_upgrade,
            upgrade_to_lifetime_member,
        } => {
            let params = state.get_global_properties(rwtxn)?.parameters;
            charge_fee(
                state,
                rwtxn,
                ctx,
                account_to_upgrade,
                fee,
                params.fee_schedule.account_upgrade_fee,
            )?;
            if upgrade_to_lifetime_member {
                state.accounts().modify_account(
                    rwtxn,
                    account_to_upgrade,
                    |account| {
                        account.membership_expiration =
                            LIFETIME_MEMBER_EXPIRATION;
                    },
                )?;
            }
            Ok(OperationResult::None)
        }
    }
}

/// Validate the declared fee against the schedule (unless suppressed),
/// debit it, and accrue it to the core asset's fee pool.
fn charge_fee(
    state: &State,
    rwtxn: &mut RwTxn,
    ctx: &EvalContext,
    payer: AccountId,
    fee: u64,
    required: u64,
) -> Result<(), Error> {
    if !ctx.skip_fee_schedule_check && fee < required {
        return Err(Error::FeeBelowRequired {
            required,
            paid: fee,
        });
    }
    if fee == 0 {
        return Ok(());
    }
    state.accounts().debit(rwtxn, payer, CORE_ASSET, fee)?;
    state
        .assets()
        .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
            data.accumulated_fees += fee;
        })?;
    Ok(())
}

/// Debit the seller, cross the order against the opposite book, and park
/// any unfilled remainder as an open order. The id is allocated up front;
/// a fully filled order leaves no object behind.
fn create_limit_order(
    state: &State,
    rwtxn: &mut RwTxn,
    seller: AccountId,
    amount_to_sell: AssetAmount,
    min_to_receive: AssetAmount,
    expiration: u64,
) -> Result<OrderId, Error> {
    if amount_to_sell.amount == 0 {
        return Err(Error::ZeroAmountOrder);
    }
    let sell_asset = state.assets().get_asset(rwtxn, amount_to_sell.asset)?;
    if !sell_asset.allows(seller) {
        return Err(Error::NotWhitelisted {
            account: seller,
            asset: amount_to_sell.asset,
        });
    }
    let receive_asset =
        state.assets().get_asset(rwtxn, min_to_receive.asset)?;
    if !receive_asset.allows(seller) {
        return Err(Error::NotWhitelisted {
            account: seller,
            asset: min_to_receive.asset,
        });
    }

    state.accounts().debit(
        rwtxn,
        seller,
        amount_to_sell.asset,
        amount_to_sell.amount,
    )?;
    if amount_to_sell.asset == CORE_ASSET {
        state.accounts().modify_stats(rwtxn, seller, |stats| {
            stats.core_in_orders += amount_to_sell.amount;
        })?;
    }

    let id = OrderId(state.next_id(rwtxn, |c| &mut c.orders)?);
    let taker_price = Price::new(amount_to_sell, min_to_receive);
    let mut remaining = amount_to_sell.amount;

    let book = state.orders().opposite_book(
        rwtxn,
        amount_to_sell.asset,
        min_to_receive.asset,
    )?;
    for (maker_id, mut maker) in book {
        if remaining == 0 {
            break;
        }
        if !crosses(&taker_price, &maker.sell_price) {
            break;
        }
        // Fill at the maker's price.
        let receivable = mul_div(
            remaining,
            maker.sell_price.base.amount,
            maker.sell_price.quote.amount,
            Rounding::Down,
        )?;
        if receivable == 0 {
            break;
        }
        let (fill, paid) = if receivable < maker.for_sale.amount {
            (receivable, remaining)
        } else {
            let paid = mul_div(
                maker.for_sale.amount,
                maker.sell_price.quote.amount,
                maker.sell_price.base.amount,
                Rounding::Up,
            )?
            .min(remaining);
            (maker.for_sale.amount, paid)
        };
        settle_fill(state, rwtxn, seller, &maker, fill, paid)?;
        remaining -= paid;
        maker.for_sale.amount -= fill;
        if maker.for_sale.amount == 0 {
            state.orders().remove_limit_order(rwtxn, maker_id)?;
        } else {
            state.orders().put_limit_order(rwtxn, maker_id, &maker)?;
        }
    }

    if remaining > 0 {
        state.orders().put_limit_order(
            rwtxn,
            id,
            &LimitOrder {
                seller,
                for_sale: AssetAmount::new(amount_to_sell.asset, remaining),
                sell_price: taker_price,
                expiration,
            },
        )?;
    }
    Ok(id)
}

/// Two orders cross when the maker gives at least as much of its base
/// per unit of quote as the taker demands of its quote per base.
fn crosses(taker: &Price, maker: &Price) -> bool {
    let lhs =
        u128::from(maker.base.amount) * u128::from(taker.base.amount);
    let rhs =
        u128::from(maker.quote.amount) * u128::from(taker.quote.amount);
    lhs >= rhs
}

fn settle_fill(
    state: &State,
    rwtxn: &mut RwTxn,
    taker: AccountId,
    maker: &LimitOrder,
    fill: u64,
    paid: u64,
) -> Result<(), Error> {
    // Maker receives what the taker paid; taker receives the fill.
    state
        .accounts()
        .credit(rwtxn, maker.seller, maker.receive_asset(), paid)?;
    state
        .accounts()
        .credit(rwtxn, taker, maker.for_sale.asset, fill)?;
    if maker.for_sale.asset == CORE_ASSET {
        state.accounts().modify_stats(rwtxn, maker.seller, |stats| {
            stats.core_in_orders -= fill;
        })?;
    }
    if maker.receive_asset() == CORE_ASSET {
        state.accounts().modify_stats(rwtxn, taker, |stats| {
            stats.core_in_orders -= paid;
        })?;
    }
    Ok(())
}

fn cancel_limit_order(
    state: &State,
    rwtxn: &mut RwTxn,
    id: OrderId,
) -> Result<(), Error> {
    let order = state.orders().get_limit_order(rwtxn, id)?;
    state.accounts().credit(
        rwtxn,
        order.seller,
        order.for_sale.asset,
        order.for_sale.amount,
    )?;
    if order.for_sale.asset == CORE_ASSET {
        state.accounts().modify_stats(rwtxn, order.seller, |stats| {
            stats.core_in_orders -= order.for_sale.amount;
        })?;
    }
    state.orders().remove_limit_order(rwtxn, id)?;
    Ok(())
}
