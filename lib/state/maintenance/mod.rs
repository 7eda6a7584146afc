//! The periodic chain-maintenance driver.
//!
//! Runs inside the block applier's write transaction when a block
//! crosses the scheduled maintenance time. Sequencing rules that the
//! steps below rely on:
//!
//! - FBA distribution precedes the buyback cycle, which consumes the
//!   funds it deposits.
//! - The tally pass precedes every governance-set selector and the
//!   worker vote refresh.
//! - Pending parameters are swapped in before the one-time transforms,
//!   some of which read the new parameters.
//! - The next-maintenance timestamp advances before the one-time
//!   transforms, which test the boundary crossing with both values.
//! - Budget and payroll run last: they need the advanced
//!   next-maintenance time and consume the fees of all prior steps.

use sneed::RwTxn;

use crate::{
    state::{Error, State},
    types::{BlockHeader, GlobalProperties, VirtualOperation},
};

mod budget;
mod fba;
mod revival;
mod selectors;
mod tally;
mod upgrades;

/// Scratch buffers and outputs of one maintenance run. Dropped before
/// the driver returns; dropping zero-sizes the buffers on every exit
/// path, including error propagation.
pub(crate) struct MaintenanceSession {
    pub now: u64,
    /// One accumulator per allocated vote choice offset.
    pub tally: Vec<u64>,
    /// Stake by half of the requested producer count.
    pub producer_histogram: Vec<u64>,
    /// Stake by half of the requested committee count.
    pub committee_histogram: Vec<u64>,
    /// Indexed by [`COMMITTEE_IDX`] and [`PRODUCER_IDX`].
    pub total_voting_stake: [u64; 2],
    pub virtual_ops: Vec<VirtualOperation>,
}

pub(crate) const COMMITTEE_IDX: usize = 0;
pub(crate) const PRODUCER_IDX: usize = 1;

impl MaintenanceSession {
    fn new(now: u64, gpo: &GlobalProperties) -> Self {
        let producer_buckets =
            usize::from(gpo.parameters.maximum_producer_count) / 2 + 1;
        let committee_buckets =
            usize::from(gpo.parameters.maximum_committee_count) / 2 + 1;
        Self {
            now,
            tally: vec![0; gpo.next_vote_offset as usize],
            producer_histogram: vec![0; producer_buckets],
            committee_histogram: vec![0; committee_buckets],
            total_voting_stake: [0; 2],
            virtual_ops: Vec::new(),
        }
    }

    pub fn tally_for(&self, offset: u32) -> u64 {
        self.tally.get(offset as usize).copied().unwrap_or(0)
    }
}

impl Drop for MaintenanceSession {
    fn drop(&mut self) {
        self.tally = Vec::new();
        self.producer_histogram = Vec::new();
        self.committee_histogram = Vec::new();
    }
}

pub fn run(
    state: &State,
    rwtxn: &mut RwTxn,
    header: &BlockHeader,
) -> Result<Vec<VirtualOperation>, Error> {
    let now = header.timestamp;
    let chain_props = state.get_chain_properties(rwtxn)?;
    let gpo_at_start = state.get_global_properties(rwtxn)?;
    let dgpo_at_start = state.get_dynamic(rwtxn)?;

    let mut session = MaintenanceSession::new(now, &gpo_at_start);

    fba::distribute_fba_balances(state, rwtxn, &mut session)?;
    fba::create_buyback_orders(state, rwtxn)?;

    tally::perform_account_maintenance(
        state,
        rwtxn,
        &chain_props,
        &mut session,
    )?;

    selectors::update_top_n_authorities(state, rwtxn)?;
    selectors::update_active_producers(
        state,
        rwtxn,
        &chain_props,
        &session,
    )?;
    selectors::update_active_committee(
        state,
        rwtxn,
        &chain_props,
        &session,
    )?;
    selectors::update_worker_votes(
        state,
        rwtxn,
        &chain_props.upgrades,
        now,
        &session,
    )?;

    // Rescale the account registration fee, then swap in any pending
    // parameters. The shift grows with the interval's registrations, so
    // heavy registration lowers the next interval's fee.
    let mut gpo = state.get_global_properties(rwtxn)?;
    let scale_steps = dgpo_at_start.accounts_registered_this_interval
        / gpo.parameters.accounts_per_fee_scale.max(1);
    let shift =
        u32::from(gpo.parameters.account_fee_scale_bitshifts) * scale_steps;
    gpo.parameters.fee_schedule.account_create_basic_fee = gpo
        .parameters
        .fee_schedule
        .account_create_basic_fee
        .checked_shr(shift)
        .unwrap_or(0);
    if let Some(pending) = gpo.pending_parameters.take() {
        gpo.parameters = pending;
    }
    state.put_global_properties(rwtxn, &gpo)?;

    let prev_maintenance_time = dgpo_at_start.next_maintenance_time;
    let next_maintenance_time = advance_maintenance_time(
        prev_maintenance_time,
        u64::from(gpo.parameters.maintenance_interval),
        header,
    );

    let mut dgpo = state.get_dynamic(rwtxn)?;
    dgpo.head_block_num = header.height;
    dgpo.head_block_time = now;
    dgpo.next_maintenance_time = next_maintenance_time;
    dgpo.last_vote_tally_time = now;
    dgpo.accounts_registered_this_interval = 0;
    state.put_dynamic(rwtxn, &dgpo)?;

    upgrades::run_upgrades(
        state,
        rwtxn,
        &chain_props.upgrades,
        prev_maintenance_time,
        next_maintenance_time,
        now,
    )?;

    revival::process_bitassets(state, rwtxn, &chain_props.upgrades, now)?;
    upgrades::delete_expired_custom_authorities(state, rwtxn, now)?;
    budget::process_budget(state, rwtxn, now)?;

    Ok(std::mem::take(&mut session.virtual_ops))
}

/// Find the smallest multiple of the maintenance interval past the head
/// time. The first block aligns the schedule to the interval grid.
fn advance_maintenance_time(
    next_maintenance_time: u64,
    maintenance_interval: u64,
    header: &BlockHeader,
) -> u64 {
    if next_maintenance_time > header.timestamp {
        return next_maintenance_time;
    }
    if header.height == 1 {
        ((header.timestamp / maintenance_interval) + 1) * maintenance_interval
    } else {
        let intervals_behind =
            (header.timestamp - next_maintenance_time) / maintenance_interval;
        next_maintenance_time + (intervals_behind + 1) * maintenance_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_maintenance_time_single_interval() {
        let header = BlockHeader {
            height: 100,
            timestamp: 10_000,
        };
        // Exactly due: advances one interval past the due time.
        assert_eq!(advance_maintenance_time(10_000, 3600, &header), 13_600);
        // Not yet due: unchanged.
        assert_eq!(advance_maintenance_time(10_001, 3600, &header), 10_001);
    }

    #[test]
    fn test_advance_maintenance_time_skips_missed_intervals() {
        let header = BlockHeader {
            height: 100,
            timestamp: 20_000,
        };
        let advanced = advance_maintenance_time(10_000, 3600, &header);
        assert!(advanced > 20_000);
        assert_eq!((advanced - 10_000) % 3600, 0);
        assert!(advanced - 20_000 <= 3600);
    }

    #[test]
    fn test_advance_maintenance_time_first_block_aligns_to_grid() {
        let header = BlockHeader {
            height: 1,
            timestamp: 10_000,
        };
        assert_eq!(advance_maintenance_time(9_000, 3600, &header), 10_800);
    }
}
