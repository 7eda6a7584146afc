//! Bitasset housekeeping and collateralized-asset revival.
//!
//! Every maintenance resets the per-period force-settlement volume,
//! expires stale oracle feeds, and, for globally-settled assets, checks
//! whether the standing collateral bids cover the outstanding debt well
//! enough to bring the asset back to life.

use sneed::RwTxn;

use crate::{
    state::{Error, State},
    types::{
        AssetAmount, AssetId, BidId, BitassetData, CollateralBid, Price,
        UpgradeSchedule,
    },
};

pub(super) fn process_bitassets(
    state: &State,
    rwtxn: &mut RwTxn,
    upgrades: &UpgradeSchedule,
    now: u64,
) -> Result<(), Error> {
    let feed_cleanup_active = now >= upgrades.feed_expiry_cleanup;
    for (asset_id, _) in state.assets().all_bitassets(rwtxn)? {
        let asset = state.assets().get_asset(rwtxn, asset_id)?;
        let expire_feeds = feed_cleanup_active
            && asset.is_oracle_fed()
            && now > state
                .assets()
                .get_bitasset(rwtxn, asset_id)?
                .options
                .feed_lifetime_secs;
        let bitasset =
            state.assets().modify_bitasset(rwtxn, asset_id, |bitasset| {
                bitasset.force_settled_volume = 0;
                if expire_feeds {
                    let cutoff =
                        now - bitasset.options.feed_lifetime_secs;
                    bitasset.feeds.retain(|_, feed| feed.time >= cutoff);
                    // The median refresh is deferred to the next step
                    // that derives it, so current_feed may briefly lag
                    // the active feed set.
                }
            })?;
        if bitasset.is_globally_settled() {
            process_bids(state, rwtxn, upgrades, now, asset_id, &bitasset)?;
        }
    }
    Ok(())
}

/// Revive a globally-settled asset if the standing bids can absorb its
/// entire debt at the revival collateral ratio.
fn process_bids(
    state: &State,
    rwtxn: &mut RwTxn,
    upgrades: &UpgradeSchedule,
    now: u64,
    asset_id: AssetId,
    bitasset: &BitassetData,
) -> Result<(), Error> {
    if bitasset.is_prediction_market {
        return Ok(());
    }
    let Some(feed_price) = bitasset.current_feed.settlement_price else {
        return Ok(());
    };
    let Some(settlement_price) = bitasset.settlement_price else {
        return Ok(());
    };

    let asset_data = state.assets().get_dynamic_data(rwtxn, asset_id)?;
    if asset_data.current_supply == 0 {
        // Nothing left to cover; bids are moot.
        return cancel_remaining_bids_and_revive(state, rwtxn, asset_id);
    }

    let dgpo = state.get_dynamic(rwtxn)?;
    let use_initial_ratio =
        dgpo.next_maintenance_time >= upgrades.revival_uses_initial_ratio;
    let revive_ratio = bitasset.revival_ratio(use_initial_ratio);
    let cap_bid_debt = now >= upgrades.bid_debt_cap;
    let backing_asset = bitasset.options.short_backing_asset;

    let bids = state.orders().bids_by_price(rwtxn, asset_id)?;

    // First walk: find the executable prefix. A bid stops the walk when
    // its position, at the revival ratio, would already be below the
    // current feed.
    let mut covered: u64 = 0;
    let mut executable = 0usize;
    for (_, bid) in &bids {
        if covered >= asset_data.current_supply {
            break;
        }
        let mut debt = bid.debt_covered();
        if cap_bid_debt && debt > asset_data.current_supply {
            debt = asset_data.current_supply;
        }
        let collateral_from_fund = settlement_price
            .convert(AssetAmount::new(asset_id, debt))?
            .amount;
        let total_collateral =
            collateral_from_fund + bid.extra_collateral();
        let call_price = Price::call_price(
            AssetAmount::new(asset_id, debt),
            AssetAmount::new(backing_asset, total_collateral),
            revive_ratio,
        )?;
        if call_price.inverse().amounts_cmp(&feed_price)
            != std::cmp::Ordering::Less
        {
            break;
        }
        covered += debt;
        executable += 1;
    }
    if covered < asset_data.current_supply {
        // Not enough demand to revive.
        return Ok(());
    }

    // Second walk: execute the prefix. The final bid absorbs whatever
    // residual debt and fund collateral remain so both land exactly on
    // zero.
    let frozen_call_prices =
        dgpo.next_maintenance_time >= upgrades.call_price_freeze;
    let mut to_cover = asset_data.current_supply;
    let mut remaining_fund = bitasset.settlement_fund;
    for (bid_id, bid) in bids.into_iter().take(executable) {
        let mut debt =
            bid.debt_covered().min(asset_data.current_supply);
        let mut collateral = settlement_price
            .convert(AssetAmount::new(asset_id, debt))?
            .amount;
        if debt >= to_cover {
            debt = to_cover;
            collateral = remaining_fund;
        }
        to_cover -= debt;
        remaining_fund =
            remaining_fund.checked_sub(collateral).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "revival of asset {asset_id} overdraws its \
                     settlement fund"
                ))
            })?;
        let call_price = if frozen_call_prices {
            Price::new(
                AssetAmount::new(asset_id, 1),
                AssetAmount::new(backing_asset, 1),
            )
        } else {
            Price::call_price(
                AssetAmount::new(asset_id, debt),
                AssetAmount::new(
                    backing_asset,
                    bid.extra_collateral() + collateral,
                ),
                bitasset.current_feed.maintenance_collateral_ratio,
            )?
        };
        state.execute_bid(rwtxn, bid_id, debt, collateral, call_price)?;
    }
    if remaining_fund != 0 {
        return Err(Error::InvariantViolation(format!(
            "revival of asset {asset_id} left {remaining_fund} in the \
             settlement fund"
        )));
    }
    if to_cover != 0 {
        return Err(Error::InvariantViolation(format!(
            "revival of asset {asset_id} left {to_cover} debt uncovered"
        )));
    }

    cancel_remaining_bids_and_revive(state, rwtxn, asset_id)
}

/// Refund all bids still standing on the asset and clear the global
/// settlement state.
fn cancel_remaining_bids_and_revive(
    state: &State,
    rwtxn: &mut RwTxn,
    asset_id: AssetId,
) -> Result<(), Error> {
    let leftover_bids: Vec<(BidId, CollateralBid)> =
        state.orders().bids_by_price(rwtxn, asset_id)?;
    for (bid_id, _) in leftover_bids {
        state.cancel_bid(rwtxn, bid_id)?;
    }
    state.assets().modify_bitasset(rwtxn, asset_id, |bitasset| {
        bitasset.settlement_price = None;
        bitasset.settlement_fund = 0;
    })?;
    tracing::debug!("asset {asset_id} revived from global settlement");
    Ok(())
}
