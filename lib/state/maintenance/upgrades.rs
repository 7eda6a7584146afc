//! One-time upgrade transforms and the custom-authority expiry sweep.
//!
//! A transform fires exactly once: on the maintenance run whose
//! next-maintenance advance crosses the transform's activation
//! timestamp. They run in declared order, after the timestamp has been
//! advanced, so each sees the post-advance schedule.

use sneed::RwTxn;

use crate::{
    state::{EvalContext, Error, Operation, State},
    types::{AssetAmount, Price, UpgradeSchedule},
};

/// Whether an activation timestamp lies in the window this run crossed.
fn crossed(
    activation: u64,
    prev_maintenance_time: u64,
    next_maintenance_time: u64,
) -> bool {
    prev_maintenance_time <= activation && activation < next_maintenance_time
}

pub(super) fn run_upgrades(
    state: &State,
    rwtxn: &mut RwTxn,
    upgrades: &UpgradeSchedule,
    prev_maintenance_time: u64,
    next_maintenance_time: u64,
    now: u64,
) -> Result<(), Error> {
    let crossed =
        |t: u64| crossed(t, prev_maintenance_time, next_maintenance_time);

    if crossed(upgrades.annual_member_retirement) {
        deprecate_annual_members(state, rwtxn, now)?;
    }
    if crossed(upgrades.call_price_reprice) {
        reprice_call_orders(state, rwtxn)?;
        match_call_orders(state, rwtxn)?;
    }
    if crossed(upgrades.feed_backing_cleanup) {
        clean_mismatched_feeds(state, rwtxn, now)?;
    }
    if crossed(upgrades.call_price_freeze) {
        freeze_call_prices(state, rwtxn)?;
        refresh_all_current_feeds(state, rwtxn, now)?;
        match_call_orders(state, rwtxn)?;
    }
    if crossed(upgrades.max_supply_clamp) {
        clamp_max_supplies(state, rwtxn)?;
    }
    if crossed(upgrades.supply_repair) {
        repair_recorded_supply(state, rwtxn, upgrades)?;
    }
    if crossed(upgrades.ticket_value_reset) {
        zero_liquid_ticket_values(state, rwtxn)?;
    }
    if crossed(upgrades.disabled_bid_sweep) {
        cancel_bids_on_disabled_assets(state, rwtxn)?;
    }
    if crossed(upgrades.call_order_rematch) {
        match_call_orders(state, rwtxn)?;
    }
    Ok(())
}

/// Remove every custom authority whose validity window has closed.
pub(super) fn delete_expired_custom_authorities(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
) -> Result<(), Error> {
    for id in state.governance().expired_custom_authorities(rwtxn, now)? {
        state.governance().remove_custom_authority(rwtxn, id)?;
    }
    Ok(())
}

/// Convert every remaining annual member to a lifetime member, free of
/// charge. A failure on one account is logged and skipped.
fn deprecate_annual_members(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
) -> Result<(), Error> {
    let ctx = EvalContext {
        skip_fee_schedule_check: true,
    };
    for (account_id, account) in state.accounts().all_accounts(rwtxn)? {
        if !account.is_annual_member(now) {
            continue;
        }
        let result = state.apply_operation(
            rwtxn,
            &ctx,
            Operation::AccountUpgrade {
                fee: 0,
                account_to_upgrade: account_id,
                upgrade_to_lifetime_member: true,
            },
        );
        if let Err(err) = result {
            tracing::warn!(
                "skipping annual member conversion for account \
                 {account_id} ({}): {err}",
                account.name
            );
            continue;
        }
    }
    Ok(())
}

/// Reset the call price of every debt position from its remaining
/// collateral and debt at the maintenance collateral ratio. Prediction
/// markets stay untouched; their positions are always exactly
/// collateralized.
fn reprice_call_orders(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    tracing::info!("repricing all call orders");
    for (call_id, mut call) in state.orders().all_call_orders(rwtxn)? {
        let Some(bitasset) =
            state.assets().try_get_bitasset(rwtxn, call.debt.asset)?
        else {
            continue;
        };
        if bitasset.is_prediction_market {
            continue;
        }
        call.call_price = Price::call_price(
            call.debt,
            call.collateral,
            bitasset.current_feed.maintenance_collateral_ratio,
        )?;
        state.orders().put_call_order(rwtxn, call_id, &call)?;
    }
    Ok(())
}

/// Freeze every call price at 1/1; the field is unused from here on.
/// Prediction markets included.
fn freeze_call_prices(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    for (call_id, mut call) in state.orders().all_call_orders(rwtxn)? {
        call.call_price = Price::new(
            AssetAmount::new(call.debt.asset, 1),
            AssetAmount::new(call.collateral.asset, 1),
        );
        state.orders().put_call_order(rwtxn, call_id, &call)?;
    }
    Ok(())
}

/// Erase feeds whose settlement price is not quoted in the asset's
/// backing asset. Feeds on oracle-fed assets are removed outright;
/// publisher-fed feeds are nullified in place, then the median is
/// re-derived.
fn clean_mismatched_feeds(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
) -> Result<(), Error> {
    for asset_id in state.assets().market_issued_assets(rwtxn)? {
        let asset = state.assets().get_asset(rwtxn, asset_id)?;
        let oracle_fed = asset.is_oracle_fed();
        state.assets().modify_bitasset(rwtxn, asset_id, |bitasset| {
            let backing = bitasset.options.short_backing_asset;
            if oracle_fed {
                bitasset.feeds.retain(|_, feed| {
                    feed.feed
                        .settlement_price
                        .map_or(true, |price| price.quote.asset == backing)
                });
            } else {
                for feed in bitasset.feeds.values_mut() {
                    if feed
                        .feed
                        .settlement_price
                        .is_some_and(|price| price.quote.asset != backing)
                    {
                        feed.feed.settlement_price = None;
                    }
                }
            }
            bitasset.update_current_feed(now);
        })?;
    }
    Ok(())
}

fn refresh_all_current_feeds(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
) -> Result<(), Error> {
    for (asset_id, _) in state.assets().all_bitassets(rwtxn)? {
        state.assets().modify_bitasset(rwtxn, asset_id, |bitasset| {
            bitasset.update_current_feed(now);
        })?;
    }
    Ok(())
}

/// Raise the stored max supply of any market-issued asset whose
/// circulating supply exceeds it.
fn clamp_max_supplies(state: &State, rwtxn: &mut RwTxn) -> Result<(), Error> {
    for asset_id in state.assets().market_issued_assets(rwtxn)? {
        let data = state.assets().get_dynamic_data(rwtxn, asset_id)?;
        let asset = state.assets().get_asset(rwtxn, asset_id)?;
        if data.current_supply > asset.max_supply {
            tracing::warn!(
                "raising max_supply of {} from {} to its current supply \
                 {}",
                asset.symbol,
                asset.max_supply,
                data.current_supply
            );
            state.assets().modify_asset(rwtxn, asset_id, |asset| {
                asset.max_supply = data.current_supply;
            })?;
        }
    }
    Ok(())
}

/// Remove the single balance row known to double-count supply and
/// adjust the recorded supply by its amount.
fn repair_recorded_supply(
    state: &State,
    rwtxn: &mut RwTxn,
    upgrades: &UpgradeSchedule,
) -> Result<(), Error> {
    let Some((owner, asset)) = upgrades.supply_repair_balance else {
        return Ok(());
    };
    let Some(amount) =
        state.accounts().remove_balance_row(rwtxn, owner, asset)?
    else {
        return Ok(());
    };
    state.assets().modify_dynamic_data(rwtxn, asset, |data| {
        data.current_supply = data.current_supply.saturating_sub(amount);
    })?;
    Ok(())
}

/// Zero the declared value of every liquid ticket, removing it from the
/// owner's declared proof-of-lock total.
fn zero_liquid_ticket_values(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    use crate::types::TicketKind;
    for (ticket_id, mut ticket) in state.assets().all_tickets(rwtxn)? {
        if ticket.kind != TicketKind::Liquid || ticket.value == 0 {
            continue;
        }
        let value = ticket.value;
        state.accounts().modify_stats(rwtxn, ticket.account, |stats| {
            stats.pol_value = stats.pol_value.saturating_sub(value);
        })?;
        ticket.value = 0;
        state.assets().put_ticket(rwtxn, ticket_id, &ticket)?;
    }
    Ok(())
}

/// Cancel every collateral bid on assets that have since disabled
/// collateral bidding. Per-bid failures are logged and skipped.
fn cancel_bids_on_disabled_assets(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    for (bid_id, bid) in state.orders().all_bids(rwtxn)? {
        let asset = state.assets().get_asset(rwtxn, bid.debt_asset())?;
        if asset.flags.can_bid_collateral {
            continue;
        }
        if let Err(err) = state.cancel_bid(rwtxn, bid_id) {
            tracing::warn!(
                "skipping cancellation of bid {bid_id} on asset {}: {err}",
                bid.debt_asset()
            );
            continue;
        }
    }
    Ok(())
}

/// Re-examine the debt positions of every market-issued asset against
/// the current feed. When the least collateralized position cannot
/// cover its debt even by liquidating all of its collateral, the asset
/// applies its black-swan response; for the default response that means
/// global settlement at the position's implied price.
fn match_call_orders(state: &State, rwtxn: &mut RwTxn) -> Result<(), Error> {
    use crate::types::BlackSwanResponse;
    tracing::info!("matching call orders");
    for asset_id in state.assets().market_issued_assets(rwtxn)? {
        let bitasset = state.assets().get_bitasset(rwtxn, asset_id)?;
        if bitasset.is_prediction_market || bitasset.is_globally_settled() {
            continue;
        }
        let Some(feed_price) = bitasset.current_feed.settlement_price
        else {
            continue;
        };
        let calls = state
            .orders()
            .call_orders_by_collateralization(rwtxn, asset_id)?;
        let Some((_, worst)) = calls.first() else {
            continue;
        };
        // Debt the worst position's collateral is worth at the feed.
        let collateral_value =
            feed_price.convert(worst.collateral)?.amount;
        if collateral_value >= worst.debt.amount {
            continue;
        }
        if bitasset.black_swan_response != BlackSwanResponse::GlobalSettlement
        {
            continue;
        }
        tracing::warn!(
            "asset {asset_id} entered global settlement while matching \
             call orders"
        );
        state.globally_settle(
            rwtxn,
            asset_id,
            Price::new(worst.debt, worst.collateral),
        )?;
    }
    Ok(())
}
