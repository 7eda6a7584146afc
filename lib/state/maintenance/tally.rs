//! Account maintenance: the balance-flag sweep, pending-fee settlement
//! and the vote tally itself.
//!
//! The tally derives each account's per-category voting power, spreads
//! it across the opinions of the account it delegates to, and fills the
//! session's tally vector, count histograms and category totals.

use sneed::RwTxn;

use crate::{
    math::{
        decay::{
            DecayWindow, COMMITTEE_DECAY, DELEGATOR_DECAY, PRODUCER_DECAY,
            WORKER_DECAY,
        },
        fixed::{mul_div, FixedPointError, Rounding},
    },
    state::{
        maintenance::{MaintenanceSession, COMMITTEE_IDX, PRODUCER_IDX},
        Error, State,
    },
    types::{
        Account, AccountId, AccountStatistics, ChainProperties,
        VoteKind, CORE_ASSET, FULL_PERCENT, MEMBER_NETWORK_FEE_PERCENT,
        PROXY_TO_SELF,
    },
};

struct TallyContext {
    now: u64,
    count_non_member_votes: bool,
    pob_activated: bool,
    ticket_voting_active: bool,
    max_producer_count: u16,
    max_committee_count: u16,
    /// Decay windows per category, present once voting-power decay has
    /// activated.
    windows: Option<DecayWindows>,
}

struct DecayWindows {
    producer: DecayWindow,
    committee: DecayWindow,
    worker: DecayWindow,
    delegator: DecayWindow,
}

/// Both sub-passes of the account sweep. Each flagged row is visited
/// exactly once; the flag sets are snapshotted up front so the mutations
/// below cannot disturb the iteration.
pub(super) fn perform_account_maintenance(
    state: &State,
    rwtxn: &mut RwTxn,
    chain_props: &ChainProperties,
    session: &mut MaintenanceSession,
) -> Result<(), Error> {
    for (owner, asset) in state.accounts().flagged_balances(rwtxn)? {
        if asset == CORE_ASSET {
            let amount = state.accounts().balance(rwtxn, owner, asset)?;
            state.accounts().modify_stats(rwtxn, owner, |stats| {
                stats.core_in_balance = amount;
            })?;
        }
        state.accounts().clear_balance_flag(rwtxn, owner, asset)?;
    }

    let gpo = state.get_global_properties(rwtxn)?;
    let dgpo = state.get_dynamic(rwtxn)?;
    let now = session.now;
    let decay_active = now >= chain_props.upgrades.voting_power_decay;
    let ctx = TallyContext {
        now,
        count_non_member_votes: gpo.parameters.count_non_member_votes,
        pob_activated: dgpo.total_pob > 0 || dgpo.total_inactive > 0,
        ticket_voting_active: now >= chain_props.upgrades.ticket_voting,
        max_producer_count: gpo.parameters.maximum_producer_count,
        max_committee_count: gpo.parameters.maximum_committee_count,
        windows: decay_active.then(|| DecayWindows {
            producer: PRODUCER_DECAY.window(now),
            committee: COMMITTEE_DECAY.window(now),
            worker: WORKER_DECAY.window(now),
            delegator: DELEGATOR_DECAY.window(now),
        }),
    };

    for account_id in state.accounts().flagged_stats(rwtxn)? {
        let stats = state.accounts().get_stats(rwtxn, account_id)?;
        let account = state.accounts().get_account(rwtxn, account_id)?;
        if stats.has_some_core_voting() {
            tally_account(
                state, rwtxn, &ctx, session, account_id, &account, &stats,
            )?;
        }
        if stats.has_pending_fees() {
            process_fees(state, rwtxn, account_id, &account, now)?;
        }
    }
    Ok(())
}

/// Settle an account's pending fees: members keep a cashback share, the
/// network share accrues to the core asset's fee pool.
fn process_fees(
    state: &State,
    rwtxn: &mut RwTxn,
    account_id: AccountId,
    account: &Account,
    now: u64,
) -> Result<(), Error> {
    let stats = state.accounts().get_stats(rwtxn, account_id)?;
    let cashback = if account.is_member(now) {
        mul_div(
            stats.pending_fees,
            u64::from(FULL_PERCENT - MEMBER_NETWORK_FEE_PERCENT),
            u64::from(FULL_PERCENT),
            Rounding::Down,
        )?
    } else {
        0
    };
    let network = stats.pending_fees - cashback;
    if network != 0 {
        state
            .assets()
            .modify_dynamic_data(rwtxn, CORE_ASSET, |data| {
                data.accumulated_fees += network;
            })?;
    }
    state.accounts().modify_stats(rwtxn, account_id, |stats| {
        stats.cashback_balance += cashback + stats.pending_vested_fees;
        stats.pending_fees = 0;
        stats.pending_vested_fees = 0;
    })?;
    Ok(())
}

fn tally_account(
    state: &State,
    rwtxn: &mut RwTxn,
    ctx: &TallyContext,
    session: &mut MaintenanceSession,
    stake_account_id: AccountId,
    stake_account: &Account,
    stats: &AccountStatistics,
) -> Result<(), Error> {
    // Accounts without burned or inactive stake do not vote at all once
    // proof-of-burn voting is live.
    if ctx.pob_activated
        && stats.pob_amount == 0
        && stats.inactive_amount == 0
    {
        return Ok(());
    }
    if !ctx.count_non_member_votes && !stake_account.is_member(ctx.now) {
        return Ok(());
    }

    // The stake account and the account specifying the opinions may
    // differ when a voting delegate is set.
    let directly_voting =
        stake_account.options.voting_account == PROXY_TO_SELF;
    let opinion_id = if directly_voting {
        stake_account_id
    } else {
        stake_account.options.voting_account
    };
    let opinion_account = if directly_voting {
        stake_account.clone()
    } else {
        match state.accounts().try_get_account(rwtxn, opinion_id)? {
            Some(account) => account,
            // Delegation to a non-existent account silently abstains.
            None => return Ok(()),
        }
    };

    let mut worker_stake: u64 =
        if ctx.pob_activated { 0 } else { stats.core_in_orders };
    if !ctx.ticket_voting_active {
        worker_stake = add(worker_stake, stats.cashback_balance)?;
        worker_stake = add(worker_stake, stats.core_in_balance)?;
    }
    worker_stake = blend_ticket_value(worker_stake, stats)?;
    if worker_stake == 0 {
        return Ok(());
    }

    let opinion_stats = if directly_voting {
        stats.clone()
    } else {
        state.accounts().get_stats(rwtxn, opinion_id)?
    };

    let vp_all = worker_stake;
    let vp_active;
    let producer_stake;
    let committee_stake_pre_division;
    let committee_stake;
    let worker_stake_final;
    match &ctx.windows {
        None => {
            vp_active = worker_stake;
            producer_stake = worker_stake;
            committee_stake_pre_division = worker_stake;
            committee_stake = worker_stake;
            worker_stake_final = worker_stake;
        }
        Some(windows) => {
            let active = if directly_voting {
                worker_stake
            } else {
                DELEGATOR_DECAY.decayed_stake(
                    worker_stake,
                    stats.last_vote_time,
                    &windows.delegator,
                )
            };
            vp_active = active;
            producer_stake = PRODUCER_DECAY.decayed_stake(
                active,
                opinion_stats.last_vote_time,
                &windows.producer,
            );
            committee_stake_pre_division = COMMITTEE_DECAY.decayed_stake(
                active,
                opinion_stats.last_vote_time,
                &windows.committee,
            );
            // Splitting committee stake across voted seats happens after
            // the histogram sees the undivided amount.
            committee_stake = if opinion_account.num_committee_voted > 1 {
                committee_stake_pre_division
                    / u64::from(opinion_account.num_committee_voted)
            } else {
                committee_stake_pre_division
            };
            worker_stake_final = WORKER_DECAY.decayed_stake(
                active,
                opinion_stats.last_vote_time,
                &windows.worker,
            );
        }
    }

    // Publish the period's voting-power snapshot. The first contribution
    // in a tally tick assigns; later ones (other delegators of the same
    // opinion account) accumulate.
    let now = ctx.now;
    let vp_producer = producer_stake;
    let vp_committee = committee_stake_pre_division;
    let vp_worker = worker_stake_final;
    state.accounts().modify_stats(rwtxn, opinion_id, |stats| {
        if stats.vote_tally_time != now {
            stats.vp_all = vp_all;
            stats.vp_active = vp_active;
            stats.vp_committee = vp_committee;
            stats.vp_producer = vp_producer;
            stats.vp_worker = vp_worker;
            stats.vote_tally_time = now;
        } else {
            stats.vp_all += vp_all;
            stats.vp_active += vp_active;
            stats.vp_committee += vp_committee;
            stats.vp_producer += vp_producer;
            stats.vp_worker += vp_worker;
        }
    })?;

    for choice in &opinion_account.options.votes {
        let stake = match choice.kind {
            VoteKind::Committee => committee_stake,
            VoteKind::Producer => producer_stake,
            VoteKind::Worker => worker_stake_final,
        };
        // An illegal offset is ignored rather than faulted.
        if let Some(slot) = session.tally.get_mut(choice.offset as usize) {
            *slot += stake;
        }
    }

    // Opinions on the sizes of the governance sets. Requests above the
    // allowed maximum abstain.
    if producer_stake > 0
        && opinion_account.options.num_producer <= ctx.max_producer_count
    {
        let bucket = usize::from(opinion_account.options.num_producer / 2);
        session.producer_histogram[bucket] += producer_stake;
    }
    if committee_stake_pre_division > 0
        && opinion_account.options.num_committee <= ctx.max_committee_count
    {
        let bucket = usize::from(opinion_account.options.num_committee / 2);
        session.committee_histogram[bucket] += committee_stake_pre_division;
    }

    session.total_voting_stake[COMMITTEE_IDX] +=
        committee_stake_pre_division;
    session.total_voting_stake[PRODUCER_IDX] += producer_stake;
    Ok(())
}

/// Fold the proof-of-lock and proof-of-burn declared values into the raw
/// worker stake. Each branch widens to 128 bits before dividing.
fn blend_ticket_value(
    worker_stake: u64,
    stats: &AccountStatistics,
) -> Result<u64, Error> {
    let pol_amount = stats.pol_amount;
    let pol_value = stats.pol_value;
    let pob_amount = stats.pob_amount;
    let pob_value = stats.pob_value;

    let stake = if pob_amount == 0 {
        add(worker_stake, pol_value)?
    } else if pol_amount == 0 {
        if pob_amount <= worker_stake {
            add(worker_stake, pob_value.saturating_sub(pob_amount))?
        } else {
            mul_div(worker_stake, pob_value, pob_amount, Rounding::Down)?
        }
    } else if pob_amount <= pol_amount {
        let base =
            mul_div(pob_value, pol_value, pol_amount, Rounding::Down)?;
        let diff =
            mul_div(pob_amount, pol_value, pol_amount, Rounding::Down)?;
        add(worker_stake, add(base, pol_value - diff)?)?
    } else {
        // pob_amount > pol_amount > 0
        let base =
            mul_div(pol_value, pob_value, pob_amount, Rounding::Down)?;
        let diff_amount = pob_amount - pol_amount;
        if diff_amount <= worker_stake {
            let diff_value =
                mul_div(pol_amount, pob_value, pob_amount, Rounding::Down)?;
            let gain = add(base, pob_value.saturating_sub(diff_value))?;
            add(worker_stake - diff_amount, gain)?
        } else {
            let scaled = mul_div(
                worker_stake,
                pob_value,
                pob_amount,
                Rounding::Down,
            )?;
            add(base, scaled)?
        }
    };
    Ok(stake)
}

fn add(a: u64, b: u64) -> Result<u64, Error> {
    a.checked_add(b)
        .ok_or(Error::FixedPoint(FixedPointError::Overflow))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(
        pol_amount: u64,
        pol_value: u64,
        pob_amount: u64,
        pob_value: u64,
    ) -> AccountStatistics {
        AccountStatistics {
            pol_amount,
            pol_value,
            pob_amount,
            pob_value,
            ..AccountStatistics::default()
        }
    }

    #[test]
    fn test_blend_no_tickets() {
        assert_eq!(
            blend_ticket_value(1000, &stats(0, 0, 0, 0)).unwrap(),
            1000
        );
    }

    #[test]
    fn test_blend_lock_only_adds_declared_value() {
        assert_eq!(
            blend_ticket_value(1000, &stats(500, 2000, 0, 0)).unwrap(),
            3000
        );
    }

    #[test]
    fn test_blend_burn_within_stake() {
        // Burned 100 declared at 400: net gain is 300 on top of stake.
        assert_eq!(
            blend_ticket_value(1000, &stats(0, 0, 100, 400)).unwrap(),
            1300
        );
    }

    #[test]
    fn test_blend_burn_exceeding_stake_scales() {
        // Burned more than the liquid stake: stake is scaled by the
        // burn multiplier instead.
        assert_eq!(
            blend_ticket_value(100, &stats(0, 0, 400, 1600)).unwrap(),
            400
        );
    }

    #[test]
    fn test_blend_burn_within_lock() {
        // pob = 100 <= pol = 400, pol_value = 800, pob_value = 400:
        // base = 400*800/400 = 800, diff = 100*800/400 = 200,
        // result = 1000 + 800 + (800 - 200) = 2400.
        assert_eq!(
            blend_ticket_value(1000, &stats(400, 800, 100, 400)).unwrap(),
            2400
        );
    }

    #[test]
    fn test_blend_burn_past_lock_small_difference() {
        // pob = 400 > pol = 100, difference 300 <= stake:
        // base = 200*1600/400 = 800, diff_value = 100*1600/400 = 400,
        // result = 1000 + 800 + (1600 - 400) - 300 = 2700.
        assert_eq!(
            blend_ticket_value(1000, &stats(100, 200, 400, 1600)).unwrap(),
            2700
        );
    }

    #[test]
    fn test_blend_burn_past_lock_large_difference() {
        // difference 300 > stake 200:
        // base = 200*1600/400 = 800, scaled = 200*1600/400 = 800.
        assert_eq!(
            blend_ticket_value(200, &stats(100, 200, 400, 1600)).unwrap(),
            1600
        );
    }
}
