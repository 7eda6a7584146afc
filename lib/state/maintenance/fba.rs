//! Fee-backed-asset distribution and the buyback order cycle.

use sneed::RwTxn;

use crate::{
    math::fixed::{mul_div, Rounding},
    state::{
        maintenance::MaintenanceSession, EvalContext, Error, Operation,
        OperationResult, State,
    },
    types::{
        AccountId, AssetAmount, AssetId, FbaId, VirtualOperation,
        CORE_ASSET, FULL_PERCENT, ONE_PERCENT,
    },
};

/// Split every non-empty FBA pool between the network, the designated
/// asset's buyback account and its issuer. Fixed percentages, identical
/// for every accumulator kind.
pub(super) fn distribute_fba_balances(
    state: &State,
    rwtxn: &mut RwTxn,
    session: &mut MaintenanceSession,
) -> Result<(), Error> {
    let network_pct = 20 * ONE_PERCENT;
    let buyback_pct = 60 * ONE_PERCENT;
    let issuer_pct = 20 * ONE_PERCENT;
    for (fba_id, _) in state.assets().all_fbas(rwtxn)? {
        split_fba_balance(
            state,
            rwtxn,
            session,
            fba_id,
            network_pct,
            buyback_pct,
            issuer_pct,
        )?;
    }
    Ok(())
}

fn split_fba_balance(
    state: &State,
    rwtxn: &mut RwTxn,
    session: &mut MaintenanceSession,
    fba_id: FbaId,
    network_pct: u16,
    buyback_pct: u16,
    issuer_pct: u16,
) -> Result<(), Error> {
    if u32::from(network_pct) + u32::from(buyback_pct) + u32::from(issuer_pct)
        != u32::from(FULL_PERCENT)
    {
        return Err(Error::InvariantViolation(format!(
            "FBA split percentages for accumulator {fba_id} don't sum to \
             100%"
        )));
    }
    let fba = state.assets().get_fba(rwtxn, fba_id)?;
    if fba.accumulated_fees == 0 {
        return Ok(());
    }

    // Configured means a designated asset that exists and carries a
    // buyback account; anything less burns the pool to the network.
    let configured = match fba.designated_asset {
        Some(asset_id) => state
            .assets()
            .try_get_asset(rwtxn, asset_id)?
            .and_then(|asset| {
                asset.buyback_account.map(|buyback| (asset, buyback))
            }),
        None => None,
    };
    let Some((designated_asset, buyback_account)) = configured else {
        tracing::info!(
            "{} core given to network due to non-configured FBA {fba_id}",
            fba.accumulated_fees
        );
        state
            .assets()
            .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
                data.current_supply = data
                    .current_supply
                    .saturating_sub(fba.accumulated_fees);
            })?;
        let mut fba = fba;
        fba.accumulated_fees = 0;
        return state.assets().put_fba(rwtxn, fba_id, &fba);
    };

    let buyback_amount = mul_div(
        fba.accumulated_fees,
        u64::from(buyback_pct),
        u64::from(FULL_PERCENT),
        Rounding::Down,
    )?;
    let issuer_amount = mul_div(
        fba.accumulated_fees,
        u64::from(issuer_pct),
        u64::from(FULL_PERCENT),
        Rounding::Down,
    )?;
    if buyback_amount + issuer_amount > fba.accumulated_fees {
        return Err(Error::InvariantViolation(format!(
            "FBA {fba_id} split exceeds its pool"
        )));
    }
    // The network share absorbs the rounding residue, so the three
    // shares always reconstruct the pool exactly.
    let network_amount =
        fba.accumulated_fees - (buyback_amount + issuer_amount);

    if network_amount != 0 {
        state
            .assets()
            .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
                data.current_supply =
                    data.current_supply.saturating_sub(network_amount);
            })?;
    }
    if buyback_amount != 0 {
        state.accounts().credit(
            rwtxn,
            buyback_account,
            CORE_ASSET,
            buyback_amount,
        )?;
        session.virtual_ops.push(VirtualOperation::FbaDistribution {
            account: buyback_account,
            fba: fba_id,
            amount: buyback_amount,
        });
    }
    if issuer_amount != 0 {
        state.accounts().credit(
            rwtxn,
            designated_asset.issuer,
            CORE_ASSET,
            issuer_amount,
        )?;
        session.virtual_ops.push(VirtualOperation::FbaDistribution {
            account: designated_asset.issuer,
            fba: fba_id,
            amount: issuer_amount,
        });
    }

    let mut fba = fba;
    fba.accumulated_fees = 0;
    state.assets().put_fba(rwtxn, fba_id, &fba)
}

/// For every buyback-configured asset, sell each allowed holding of the
/// buyback account into the market by posting a zero-fee order and
/// immediately cancelling it: the matching engine fills what it can and
/// the remainder stays liquid. Per-balance failures are logged and
/// skipped.
pub(super) fn create_buyback_orders(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    for asset_to_buy in state.assets().buyback_assets(rwtxn)? {
        let asset = state.assets().get_asset(rwtxn, asset_to_buy)?;
        let Some(buyback_account_id) = asset.buyback_account else {
            tracing::warn!(
                "buyback-configured asset {asset_to_buy} has no buyback \
                 account"
            );
            continue;
        };
        let buyback_account =
            state.accounts().get_account(rwtxn, buyback_account_id)?;
        let Some(allowed_assets) = buyback_account.allowed_assets.clone()
        else {
            tracing::warn!(
                "skipping buyback account {buyback_account_id} because \
                 allowed_assets does not exist"
            );
            continue;
        };

        for (asset_to_sell, amount_to_sell) in
            state.accounts().balances_of(rwtxn, buyback_account_id)?
        {
            if asset_to_sell == asset_to_buy || amount_to_sell == 0 {
                continue;
            }
            if !allowed_assets.contains(&asset_to_sell) {
                tracing::warn!(
                    "buyback account {buyback_account_id} not selling \
                     disallowed holdings of asset {asset_to_sell}"
                );
                continue;
            }
            if let Err(err) = buyback_cycle(
                state,
                rwtxn,
                buyback_account_id,
                AssetAmount::new(asset_to_sell, amount_to_sell),
                asset_to_buy,
            ) {
                // Reachable, e.g. when an asset issuer whitelists the
                // buyback account out of the market.
                tracing::warn!(
                    "skipping buyback selling {asset_to_sell} for \
                     {asset_to_buy} for account {buyback_account_id}: {err}"
                );
                continue;
            }
        }
    }
    Ok(())
}

fn buyback_cycle(
    state: &State,
    rwtxn: &mut RwTxn,
    seller: AccountId,
    amount_to_sell: AssetAmount,
    asset_to_buy: AssetId,
) -> Result<(), Error> {
    let ctx = EvalContext {
        skip_fee_schedule_check: true,
    };
    let created = state.apply_operation(
        rwtxn,
        &ctx,
        Operation::LimitOrderCreate {
            fee: 0,
            seller,
            amount_to_sell,
            min_to_receive: AssetAmount::new(asset_to_buy, 1),
            expiration: u64::MAX,
        },
    )?;
    let OperationResult::OrderId(order_id) = created else {
        return Ok(());
    };
    if state.orders().try_get_limit_order(rwtxn, order_id)?.is_some() {
        state.apply_operation(
            rwtxn,
            &ctx,
            Operation::LimitOrderCancel {
                fee: 0,
                order: order_id,
                fee_paying_account: seller,
            },
        )?;
    }
    Ok(())
}
