//! Governance-set selectors: turn the tally and histograms into the new
//! producer set, committee set and worker rankings, and refresh derived
//! authorities.

use sneed::RwTxn;

use crate::{
    state::{
        maintenance::{MaintenanceSession, COMMITTEE_IDX, PRODUCER_IDX},
        Error, State,
    },
    types::{
        Account, ChainProperties, SpecialAuthority, UpgradeSchedule,
        VoteCounter, COMMITTEE_ACCOUNT, PRODUCER_ACCOUNT,
        RELAXED_COMMITTEE_ACCOUNT,
    },
};

/// Stake-weighted median of the "how many seats should exist" opinions.
///
/// Accounts voting for zero or one seat (bucket 0) abstain from sizing
/// the set. Walking the histogram from bucket 1, the stopping bucket `k`
/// where the running stake first strictly exceeds half the remainder
/// yields `2k + 1` seats, floored at the immutable minimum.
fn median_seat_count(
    histogram: &[u64],
    total_stake: u64,
    min_count: u16,
) -> usize {
    let stake_target = total_stake.saturating_sub(histogram[0]) / 2;
    let mut stake_tally: u64 = 0;
    let mut bucket = 0;
    if stake_target > 0 {
        while bucket < histogram.len() - 1 && stake_tally <= stake_target {
            bucket += 1;
            stake_tally += histogram[bucket];
        }
    }
    (bucket * 2 + 1).max(usize::from(min_count))
}

pub(super) fn update_active_producers(
    state: &State,
    rwtxn: &mut RwTxn,
    chain_props: &ChainProperties,
    session: &MaintenanceSession,
) -> Result<(), Error> {
    let count = median_seat_count(
        &session.producer_histogram,
        session.total_voting_stake[PRODUCER_IDX],
        chain_props.immutable.min_producer_count,
    );

    let mut candidates = state.governance().all_producers(rwtxn)?;
    candidates.sort_by(|(id_a, a), (id_b, b)| {
        session
            .tally_for(b.vote_choice)
            .cmp(&session.tally_for(a.vote_choice))
            .then(id_a.cmp(id_b))
    });
    let count = count.min(candidates.len());
    let selected = &candidates[..count];

    if chain_props.track_standby_votes {
        for (id, producer) in &candidates {
            let mut producer = producer.clone();
            producer.total_votes = session.tally_for(producer.vote_choice);
            state.governance().put_producer(rwtxn, *id, &producer)?;
        }
    } else {
        for (id, producer) in selected {
            let mut producer = producer.clone();
            producer.total_votes = session.tally_for(producer.vote_choice);
            state.governance().put_producer(rwtxn, *id, &producer)?;
        }
    }

    if !selected.is_empty() {
        let mut vote_counter = VoteCounter::new();
        for (_, producer) in selected {
            vote_counter.add(
                producer.account,
                session.tally_for(producer.vote_choice),
            );
        }
        state
            .accounts()
            .modify_account(rwtxn, PRODUCER_ACCOUNT, |account| {
                vote_counter.finish(&mut account.active);
            })?;
    }

    let mut gpo = state.get_global_properties(rwtxn)?;
    gpo.active_producers = selected.iter().map(|(id, _)| *id).collect();
    state.put_global_properties(rwtxn, &gpo)
}

pub(super) fn update_active_committee(
    state: &State,
    rwtxn: &mut RwTxn,
    chain_props: &ChainProperties,
    session: &MaintenanceSession,
) -> Result<(), Error> {
    let count = median_seat_count(
        &session.committee_histogram,
        session.total_voting_stake[COMMITTEE_IDX],
        chain_props.immutable.min_committee_member_count,
    );

    let mut candidates = state.governance().all_committee_members(rwtxn)?;
    candidates.sort_by(|(id_a, a), (id_b, b)| {
        session
            .tally_for(b.vote_choice)
            .cmp(&session.tally_for(a.vote_choice))
            .then(id_a.cmp(id_b))
    });
    let count = count.min(candidates.len());
    let selected = &candidates[..count];

    if chain_props.track_standby_votes {
        for (id, member) in &candidates {
            let mut member = member.clone();
            member.total_votes = session.tally_for(member.vote_choice);
            state.governance().put_committee_member(rwtxn, *id, &member)?;
        }
    } else {
        for (id, member) in selected {
            let mut member = member.clone();
            member.total_votes = session.tally_for(member.vote_choice);
            state.governance().put_committee_member(rwtxn, *id, &member)?;
        }
    }

    if !selected.is_empty() {
        let mut vote_counter = VoteCounter::new();
        for (_, member) in selected {
            vote_counter
                .add(member.account, session.tally_for(member.vote_choice));
        }
        let committee_account = state.accounts().modify_account(
            rwtxn,
            COMMITTEE_ACCOUNT,
            |account| {
                vote_counter.finish(&mut account.active);
            },
        )?;
        state.accounts().modify_account(
            rwtxn,
            RELAXED_COMMITTEE_ACCOUNT,
            |account| {
                account.active = committee_account.active.clone();
            },
        )?;
    }

    let mut gpo = state.get_global_properties(rwtxn)?;
    gpo.active_committee = selected.iter().map(|(id, _)| *id).collect();
    gpo.active_committee.sort_unstable();
    state.put_global_properties(rwtxn, &gpo)
}

/// Refresh every worker's cached approval tallies from the fresh vote
/// buffers.
pub(super) fn update_worker_votes(
    state: &State,
    rwtxn: &mut RwTxn,
    upgrades: &UpgradeSchedule,
    now: u64,
    session: &MaintenanceSession,
) -> Result<(), Error> {
    let allow_negative_votes =
        now < upgrades.negative_worker_votes_retirement;
    for (id, mut worker) in state.governance().all_workers(rwtxn)? {
        worker.total_votes_for = session.tally_for(worker.vote_for);
        worker.total_votes_against = if allow_negative_votes {
            session.tally_for(worker.vote_against)
        } else {
            0
        };
        state.governance().put_worker(rwtxn, id, &worker)?;
    }
    Ok(())
}

/// Rebuild the authorities of every account whose owner or active slot
/// is controlled by the top holders of an asset. A failure on one
/// account is logged and skipped; it must not wedge the chain.
pub(super) fn update_top_n_authorities(
    state: &State,
    rwtxn: &mut RwTxn,
) -> Result<(), Error> {
    for account_id in state.governance().special_authority_accounts(rwtxn)? {
        let account = state.accounts().get_account(rwtxn, account_id)?;
        for is_owner in [true, false] {
            let directive = if is_owner {
                &account.owner_special_authority
            } else {
                &account.active_special_authority
            };
            let SpecialAuthority::TopHolders {
                asset,
                num_top_holders,
            } = *directive
            else {
                continue;
            };
            if let Err(err) = refresh_top_n(
                state,
                rwtxn,
                account_id,
                is_owner,
                asset,
                num_top_holders,
            ) {
                tracing::warn!(
                    "skipping top-{num_top_holders} authority refresh of \
                     account {account_id} on asset {asset}: {err}"
                );
            }
        }
    }
    Ok(())
}

fn refresh_top_n(
    state: &State,
    rwtxn: &mut RwTxn,
    account_id: crate::types::AccountId,
    is_owner: bool,
    asset: crate::types::AssetId,
    num_top_holders: u8,
) -> Result<(), Error> {
    if num_top_holders == 0 {
        return Ok(());
    }
    let holders = state.accounts().top_holders(
        rwtxn,
        asset,
        account_id,
        usize::from(num_top_holders),
    )?;
    let mut vote_counter = VoteCounter::new();
    for (holder, balance) in holders {
        vote_counter.add(holder, balance);
    }
    let is_empty = vote_counter.is_empty();
    state.accounts().modify_account(rwtxn, account_id, |account| {
        let slot = if is_owner {
            &mut account.owner
        } else {
            &mut account.active
        };
        vote_counter.finish(slot);
        if !is_empty {
            account.top_n_control_flags |= if is_owner {
                Account::TOP_N_CONTROL_OWNER
            } else {
                Account::TOP_N_CONTROL_ACTIVE
            };
        }
    })?;
    Ok(())
}
