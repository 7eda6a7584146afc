//! The periodic budget and worker payroll.
//!
//! Runs last in the maintenance sequence: it needs the already-advanced
//! next-maintenance time and consumes the fees accumulated by every
//! prior step.

use sneed::RwTxn;

use crate::{
    math::fixed::{mul_div, Rounding},
    state::{Error, State},
    types::{
        BudgetRecord, WorkerPay, CORE_ASSET, CORE_ASSET_CYCLE_RATE,
        CORE_ASSET_CYCLE_RATE_BITS,
    },
};

const SECONDS_PER_DAY: u64 = 86_400;

pub(super) fn process_budget(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
) -> Result<(), Error> {
    let gpo = state.get_global_properties(rwtxn)?;
    let dgpo = state.get_dynamic(rwtxn)?;
    let core = state.assets().get_asset(rwtxn, CORE_ASSET)?;
    let core_data = state.assets().get_dynamic_data(rwtxn, CORE_ASSET)?;

    // The maintenance-time advance only ever produces future times.
    let time_to_maintenance = dgpo
        .next_maintenance_time
        .checked_sub(now)
        .filter(|dt| *dt > 0)
        .ok_or_else(|| {
            Error::InvariantViolation(
                "next maintenance time is not in the future".to_owned(),
            )
        })?;
    let block_interval = u64::from(gpo.parameters.block_interval);
    if block_interval == 0 {
        return Err(Error::InvariantViolation(
            "block interval is zero".to_owned(),
        ));
    }
    let blocks_to_maintenance =
        (time_to_maintenance + block_interval - 1) / block_interval;

    let mut record = BudgetRecord {
        time: now,
        from_initial_reserve: core
            .max_supply
            .saturating_sub(core_data.current_supply),
        from_accumulated_fees: core_data.accumulated_fees,
        from_unused_producer_budget: dgpo.unused_producer_budget,
        max_supply: core.max_supply,
        ..BudgetRecord::default()
    };

    if now > dgpo.last_budget_time {
        let dt = now - dgpo.last_budget_time;
        record.time_since_last_budget = dt;

        // Accumulated fees and the unused producer budget count as
        // reserved at the beginning of the interval; the dynamic data is
        // only rewritten once at the end.
        let reserve = record.from_initial_reserve
            + record.from_accumulated_fees
            + record.from_unused_producer_budget;

        // Round up so no dust is forever stranded in the reserve.
        let mut budget_u128 = u128::from(reserve)
            * u128::from(dt)
            * u128::from(CORE_ASSET_CYCLE_RATE);
        budget_u128 += (1u128 << CORE_ASSET_CYCLE_RATE_BITS) - 1;
        budget_u128 >>= CORE_ASSET_CYCLE_RATE_BITS;
        record.total_budget = if budget_u128 < u128::from(reserve) {
            budget_u128 as u64
        } else {
            reserve
        };
    }

    let mut available_funds = record.total_budget;

    let requested_producer_budget = gpo
        .parameters
        .producer_pay_per_block
        .checked_mul(blocks_to_maintenance)
        .ok_or(Error::InvariantViolation(
            "producer budget overflow".to_owned(),
        ))?;
    record.requested_producer_budget = requested_producer_budget;
    let producer_budget = requested_producer_budget.min(available_funds);
    record.producer_budget = producer_budget;
    available_funds -= producer_budget;

    let requested_worker_budget = mul_div(
        gpo.parameters.worker_budget_per_day,
        time_to_maintenance,
        SECONDS_PER_DAY,
        Rounding::Down,
    )?;
    let worker_budget = requested_worker_budget.min(available_funds);
    record.worker_budget = worker_budget;
    available_funds -= worker_budget;

    let leftover =
        pay_workers(state, rwtxn, now, dgpo.last_budget_time, worker_budget)?;
    record.leftover_worker_funds = leftover;

    let supply_delta = i128::from(producer_budget)
        + i128::from(worker_budget)
        - i128::from(leftover)
        - i128::from(record.from_accumulated_fees)
        - i128::from(record.from_unused_producer_budget);
    record.supply_delta = supply_delta as i64;

    // Payroll may itself have burned supply; read back before applying.
    let core_data = state.assets().get_dynamic_data(rwtxn, CORE_ASSET)?;
    let decomposition = i128::from(producer_budget)
        + i128::from(worker_budget)
        - i128::from(leftover)
        - i128::from(record.from_accumulated_fees)
        - i128::from(dgpo.unused_producer_budget);
    if supply_delta != decomposition {
        return Err(Error::InvariantViolation(format!(
            "budget supply delta {supply_delta} does not match its \
             decomposition {decomposition}"
        )));
    }
    let new_supply = i128::from(core_data.current_supply) + supply_delta;
    let new_supply = u64::try_from(new_supply).map_err(|_| {
        Error::InvariantViolation(format!(
            "budget supply delta {supply_delta} leaves the core supply \
             out of range"
        ))
    })?;
    state
        .assets()
        .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
            data.current_supply = new_supply;
            data.accumulated_fees = 0;
        })?;

    let mut dgpo = state.get_dynamic(rwtxn)?;
    // The prior unused budget was rolled into available funds above, so
    // this replaces rather than adds.
    dgpo.unused_producer_budget = producer_budget;
    dgpo.last_budget_time = now;
    state.put_dynamic(rwtxn, &dgpo)?;

    record.current_supply = new_supply;
    state.create_budget_record(rwtxn, &record)?;

    // Whatever is left of available_funds evaporates back into the
    // reserve by simply not being issued.
    Ok(())
}

/// Pay ranked active workers from `budget`, prorated for the elapsed
/// fraction of a day, and return the unspent remainder.
fn pay_workers(
    state: &State,
    rwtxn: &mut RwTxn,
    now: u64,
    last_budget_time: u64,
    mut budget: u64,
) -> Result<u64, Error> {
    let mut active_workers: Vec<_> = state
        .governance()
        .all_workers(rwtxn)?
        .into_iter()
        .filter(|(_, worker)| {
            worker.is_active(now) && worker.approving_stake() > 0
        })
        .collect();
    // More approval is preferred; an exact tie prefers the older worker.
    active_workers.sort_by(|(id_a, a), (id_b, b)| {
        b.approving_stake()
            .cmp(&a.approving_stake())
            .then(id_a.cmp(id_b))
    });

    let elapsed = now.saturating_sub(last_budget_time);
    for (id, mut worker) in active_workers {
        if budget == 0 {
            break;
        }
        let prorated_pay = mul_div(
            worker.daily_pay,
            elapsed,
            SECONDS_PER_DAY,
            Rounding::Down,
        )?;
        let pay = prorated_pay.min(budget);
        apply_worker_pay(state, rwtxn, &mut worker, pay)?;
        state.governance().put_worker(rwtxn, id, &worker)?;
        budget -= pay;
    }
    Ok(budget)
}

/// Dispatch a payment through the worker's payout strategy.
fn apply_worker_pay(
    state: &State,
    rwtxn: &mut RwTxn,
    worker: &mut crate::types::Worker,
    pay: u64,
) -> Result<(), Error> {
    match &mut worker.pay {
        WorkerPay::RefundToReserve { total_burned }
        | WorkerPay::BurnIntoFund { total_burned } => {
            *total_burned += pay;
            state
                .assets()
                .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
                    data.current_supply =
                        data.current_supply.saturating_sub(pay);
                })?;
        }
        WorkerPay::VestingUnlock { balance } => {
            *balance += pay;
        }
    }
    Ok(())
}
