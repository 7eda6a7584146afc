//! End-to-end maintenance scenarios against a throwaway store.

use meridian_chain::{
    state::{EvalContext, Operation, State},
    types::{
        Account, AssetAmount, AssetFlags, AssetId, Authority,
        BitassetOptions, BlockHeader, BudgetRecordId, ChainParameters,
        CustomAuthority, CustomAuthorityId, FbaAccumulator, FbaId, Price,
        PriceFeed, SpecialAuthority, Ticket, TicketId, TicketKind,
        UpgradeSchedule, VirtualOperation, VoteChoice, VoteKind, WorkerPay,
        CORE_ASSET, PRODUCER_ACCOUNT,
    },
    GenesisConfig,
};
use sneed::Env;
use tempfile::TempDir;

/// Genesis timestamp for every scenario; far enough from zero that the
/// decay windows never clamp.
const T0: u64 = 1_000_000_000;

struct TestChain {
    _temp_dir: TempDir,
    env: Env,
    state: State,
}

impl TestChain {
    fn new(config: GenesisConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let env = {
            let mut env_open_opts = heed::EnvOpenOptions::new();
            env_open_opts
                .map_size(128 * 1024 * 1024)
                .max_dbs(State::NUM_DBS);
            unsafe { Env::open(&env_open_opts, temp_dir.path()) }.unwrap()
        };
        let state = State::new(&env).unwrap();
        let mut rwtxn = env.write_txn().unwrap();
        state.init_genesis(&mut rwtxn, &config).unwrap();
        rwtxn.commit().unwrap();
        Self {
            _temp_dir: temp_dir,
            env,
            state,
        }
    }

    /// Run maintenance for a block at `timestamp` and commit.
    fn maintain(&self, timestamp: u64) -> Vec<VirtualOperation> {
        let mut rwtxn = self.env.write_txn().unwrap();
        let virtual_ops = self
            .state
            .perform_maintenance(
                &mut rwtxn,
                &BlockHeader {
                    height: 100,
                    timestamp,
                },
            )
            .unwrap();
        rwtxn.commit().unwrap();
        virtual_ops
    }

    fn with_write<T>(&self, f: impl FnOnce(&mut sneed::RwTxn) -> T) -> T {
        let mut rwtxn = self.env.write_txn().unwrap();
        let out = f(&mut rwtxn);
        rwtxn.commit().unwrap();
        out
    }
}

/// The literal seed-scenario genesis: reserve 10^11, 5 second blocks,
/// hourly maintenance, no upgrades active yet.
fn scenario_config() -> GenesisConfig {
    GenesisConfig {
        timestamp: T0,
        parameters: ChainParameters {
            block_interval: 5,
            maintenance_interval: 3600,
            ..ChainParameters::default()
        },
        upgrades: UpgradeSchedule::never(),
        core_max_supply: 100_000_000_000,
        ..GenesisConfig::default()
    }
}

fn min_counts_of_one(mut config: GenesisConfig) -> GenesisConfig {
    config.immutable.min_producer_count = 1;
    config.immutable.min_committee_member_count = 1;
    config
}

#[test]
fn single_voter_elects_single_producer() {
    // S1: one voter with 1000 core votes for one producer candidate.
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let (voter, producer_id, supply_before) = chain.with_write(|rwtxn| {
        let voter = state.create_account(rwtxn, "alice").unwrap();
        state
            .issue_asset(rwtxn, voter, AssetAmount::new(CORE_ASSET, 1000))
            .unwrap();
        let candidate = state.create_account(rwtxn, "prod").unwrap();
        let producer_id = state.create_producer(rwtxn, candidate).unwrap();
        let producer =
            state.governance().get_producer(rwtxn, producer_id).unwrap();
        state
            .set_account_votes(
                rwtxn,
                voter,
                vec![VoteChoice {
                    kind: VoteKind::Producer,
                    offset: producer.vote_choice,
                }],
                1,
                0,
                T0,
            )
            .unwrap();
        let supply = state
            .assets()
            .get_dynamic_data(rwtxn, CORE_ASSET)
            .unwrap()
            .current_supply;
        (voter, producer_id, supply)
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let producer = state.governance().get_producer(&rotxn, producer_id).unwrap();
    assert_eq!(producer.total_votes, 1000);

    let gpo = state.get_global_properties(&rotxn).unwrap();
    // Bucket 0 held all sizing stake, so the set floors at the immutable
    // minimum.
    assert_eq!(gpo.active_producers, vec![producer_id]);
    assert_eq!(gpo.active_producers.len() % 2, 1);

    // The budget had nothing to pay, so reserves are untouched.
    let supply_after = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    assert_eq!(supply_before, supply_after);

    // The voter's stake snapshot was published.
    let stats = state.accounts().get_stats(&rotxn, voter).unwrap();
    assert_eq!(stats.vp_producer, 1000);

    // The producer account's authority now answers to the elected set.
    let producer_account = state
        .accounts()
        .get_account(&rotxn, PRODUCER_ACCOUNT)
        .unwrap();
    assert!(producer_account
        .active
        .account_auths
        .contains_key(&producer.account));
}

#[test]
fn worker_payroll_ranks_and_prorates() {
    // S2: equal-stake workers tie-break by id; the younger worker takes
    // the budget remainder.
    let mut config = min_counts_of_one(scenario_config());
    config.parameters.maintenance_interval = 86_400;
    config.parameters.worker_budget_per_day = 150;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let (worker_a, worker_b) = chain.with_write(|rwtxn| {
        let patron = state.create_account(rwtxn, "patron").unwrap();
        state
            .issue_asset(rwtxn, patron, AssetAmount::new(CORE_ASSET, 500))
            .unwrap();
        let dev = state.create_account(rwtxn, "dev").unwrap();
        let worker_a = state
            .create_worker(
                rwtxn,
                dev,
                "worker-a",
                T0,
                T0 + 1_000_000,
                100,
                WorkerPay::VestingUnlock { balance: 0 },
            )
            .unwrap();
        let worker_b = state
            .create_worker(
                rwtxn,
                dev,
                "worker-b",
                T0,
                T0 + 1_000_000,
                100,
                WorkerPay::VestingUnlock { balance: 0 },
            )
            .unwrap();
        let a = state.governance().get_worker(rwtxn, worker_a).unwrap();
        let b = state.governance().get_worker(rwtxn, worker_b).unwrap();
        state
            .set_account_votes(
                rwtxn,
                patron,
                vec![
                    VoteChoice {
                        kind: VoteKind::Worker,
                        offset: a.vote_for,
                    },
                    VoteChoice {
                        kind: VoteKind::Worker,
                        offset: b.vote_for,
                    },
                ],
                0,
                0,
                T0,
            )
            .unwrap();
        (worker_a, worker_b)
    });

    let rotxn = chain.env.read_txn().unwrap();
    let supply_before = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    drop(rotxn);

    chain.maintain(T0 + 86_400);

    let rotxn = chain.env.read_txn().unwrap();
    let a = state.governance().get_worker(&rotxn, worker_a).unwrap();
    let b = state.governance().get_worker(&rotxn, worker_b).unwrap();
    assert_eq!(a.approving_stake(), 500);
    assert_eq!(b.approving_stake(), 500);
    assert_eq!(a.pay, WorkerPay::VestingUnlock { balance: 100 });
    assert_eq!(b.pay, WorkerPay::VestingUnlock { balance: 50 });

    let record = state
        .try_get_budget_record(&rotxn, BudgetRecordId(0))
        .unwrap()
        .unwrap();
    assert_eq!(record.worker_budget, 150);
    assert_eq!(record.leftover_worker_funds, 0);

    // P3: supply identity for the run.
    let supply_after = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    assert_eq!(
        i128::from(supply_after) - i128::from(supply_before),
        i128::from(record.supply_delta)
    );
    assert_eq!(record.supply_delta, 150);
}

fn feed(settlement_price: Price, initial_collateral_ratio: u16) -> PriceFeed {
    PriceFeed {
        settlement_price: Some(settlement_price),
        initial_collateral_ratio,
        ..PriceFeed::default()
    }
}

#[test]
fn sufficient_collateral_bids_revive_settled_asset() {
    // S3: two bids jointly covering the full 1000 debt revive the asset
    // and drain the settlement fund exactly.
    let mut config = min_counts_of_one(scenario_config());
    config.upgrades.revival_uses_initial_ratio = 0;
    config.upgrades.call_price_freeze = 0;
    config.upgrades.bid_debt_cap = 0;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let settlement_price = Price::new(
        AssetAmount::new(AssetId(1), 5),
        AssetAmount::new(CORE_ASSET, 1),
    );
    let asset_x = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let asset_x = state
            .create_bitasset(
                rwtxn,
                "SETTLED",
                issuer,
                1_000_000,
                AssetFlags {
                    producer_fed: true,
                    ..AssetFlags::default()
                },
                BitassetOptions::default(),
            )
            .unwrap();
        state
            .publish_feed(
                rwtxn,
                asset_x,
                issuer,
                feed(settlement_price, 2000),
                T0,
            )
            .unwrap();
        state
            .assets()
            .modify_dynamic_data(rwtxn, asset_x, |data| {
                data.current_supply = 1000;
            })
            .unwrap();
        state
            .assets()
            .modify_bitasset(rwtxn, asset_x, |bitasset| {
                bitasset.settlement_price = Some(settlement_price);
                bitasset.settlement_fund = 200;
            })
            .unwrap();

        for (name, debt, extra) in
            [("bidder1", 600, 40), ("bidder2", 400, 40)]
        {
            let bidder = state.create_account(rwtxn, name).unwrap();
            state
                .issue_asset(
                    rwtxn,
                    bidder,
                    AssetAmount::new(CORE_ASSET, extra),
                )
                .unwrap();
            state
                .create_collateral_bid(
                    rwtxn,
                    bidder,
                    AssetAmount::new(CORE_ASSET, extra),
                    AssetAmount::new(asset_x, debt),
                )
                .unwrap();
        }
        asset_x
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let bitasset = state.assets().get_bitasset(&rotxn, asset_x).unwrap();
    assert!(!bitasset.is_globally_settled());
    assert_eq!(bitasset.settlement_fund, 0);
    assert!(state.orders().bids_by_price(&rotxn, asset_x).unwrap().is_empty());

    // P5: executed debt reconstructs the supply, executed collateral
    // consumes the fund.
    let calls = state
        .orders()
        .call_orders_by_collateralization(&rotxn, asset_x)
        .unwrap();
    let total_debt: u64 =
        calls.iter().map(|(_, call)| call.debt.amount).sum();
    let total_collateral: u64 = calls
        .iter()
        .map(|(_, call)| call.collateral.amount)
        .sum();
    assert_eq!(total_debt, 1000);
    // Fund 200 plus the two 40-core extras.
    assert_eq!(total_collateral, 200 + 40 + 40);
}

#[test]
fn insufficient_bids_leave_asset_settled() {
    let mut config = min_counts_of_one(scenario_config());
    config.upgrades.revival_uses_initial_ratio = 0;
    config.upgrades.call_price_freeze = 0;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let settlement_price = Price::new(
        AssetAmount::new(AssetId(1), 5),
        AssetAmount::new(CORE_ASSET, 1),
    );
    let asset_x = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let asset_x = state
            .create_bitasset(
                rwtxn,
                "STUCK",
                issuer,
                1_000_000,
                AssetFlags {
                    producer_fed: true,
                    ..AssetFlags::default()
                },
                BitassetOptions::default(),
            )
            .unwrap();
        state
            .publish_feed(
                rwtxn,
                asset_x,
                issuer,
                feed(settlement_price, 2000),
                T0,
            )
            .unwrap();
        state
            .assets()
            .modify_dynamic_data(rwtxn, asset_x, |data| {
                data.current_supply = 1000;
            })
            .unwrap();
        state
            .assets()
            .modify_bitasset(rwtxn, asset_x, |bitasset| {
                bitasset.settlement_price = Some(settlement_price);
                bitasset.settlement_fund = 200;
            })
            .unwrap();
        let bidder = state.create_account(rwtxn, "bidder1").unwrap();
        state
            .issue_asset(rwtxn, bidder, AssetAmount::new(CORE_ASSET, 40))
            .unwrap();
        state
            .create_collateral_bid(
                rwtxn,
                bidder,
                AssetAmount::new(CORE_ASSET, 40),
                AssetAmount::new(asset_x, 600),
            )
            .unwrap();
        asset_x
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let bitasset = state.assets().get_bitasset(&rotxn, asset_x).unwrap();
    assert!(bitasset.is_globally_settled());
    assert_eq!(bitasset.settlement_fund, 200);
    assert_eq!(
        state.orders().bids_by_price(&rotxn, asset_x).unwrap().len(),
        1
    );
}

#[test]
fn fba_split_closes_exactly() {
    // S4: 1001 fees at 20/60/20; the network share soaks up the
    // rounding residue.
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let (issuer, buyback_account) = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let buyback_account = state.create_account(rwtxn, "buyback").unwrap();
        let designated = state
            .create_asset(rwtxn, "FBATOKEN", issuer, 1_000_000, AssetFlags::default())
            .unwrap();
        state
            .assets()
            .modify_asset(rwtxn, designated, |asset| {
                asset.buyback_account = Some(buyback_account);
            })
            .unwrap();
        // The pool is circulating supply held in limbo.
        state
            .issue_asset(
                rwtxn,
                PRODUCER_ACCOUNT,
                AssetAmount::new(CORE_ASSET, 1001),
            )
            .unwrap();
        state
            .assets()
            .put_fba(
                rwtxn,
                FbaId(0),
                &FbaAccumulator {
                    accumulated_fees: 1001,
                    designated_asset: Some(designated),
                },
            )
            .unwrap();
        (issuer, buyback_account)
    });

    let rotxn = chain.env.read_txn().unwrap();
    let supply_before = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    drop(rotxn);

    let virtual_ops = chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let buyback_credit = state
        .accounts()
        .balance(&rotxn, buyback_account, CORE_ASSET)
        .unwrap();
    let issuer_credit =
        state.accounts().balance(&rotxn, issuer, CORE_ASSET).unwrap();
    assert_eq!(buyback_credit, 600);
    assert_eq!(issuer_credit, 200);

    // Network share burned: 1001 - 600 - 200 = 201.
    let supply_after = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    assert_eq!(supply_before - supply_after, 201);

    let fba = state.assets().get_fba(&rotxn, FbaId(0)).unwrap();
    assert_eq!(fba.accumulated_fees, 0);

    assert_eq!(
        virtual_ops,
        vec![
            VirtualOperation::FbaDistribution {
                account: buyback_account,
                fba: FbaId(0),
                amount: 600,
            },
            VirtualOperation::FbaDistribution {
                account: issuer,
                fba: FbaId(0),
                amount: 200,
            },
        ]
    );
}

#[test]
fn unconfigured_fba_pools_burn_to_network() {
    // A missing designated asset and a designated asset without a
    // buyback account are both "not configured": the whole pool burns.
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        // Backed by supply so the burns have something to consume.
        state
            .issue_asset(
                rwtxn,
                PRODUCER_ACCOUNT,
                AssetAmount::new(CORE_ASSET, 1000),
            )
            .unwrap();
        state
            .assets()
            .put_fba(
                rwtxn,
                FbaId(0),
                &FbaAccumulator {
                    accumulated_fees: 300,
                    designated_asset: None,
                },
            )
            .unwrap();
        // Designated asset exists but never nominated a buyback account.
        let orphan = state
            .create_asset(
                rwtxn,
                "ORPHAN",
                issuer,
                1_000_000,
                AssetFlags::default(),
            )
            .unwrap();
        state
            .assets()
            .put_fba(
                rwtxn,
                FbaId(1),
                &FbaAccumulator {
                    accumulated_fees: 500,
                    designated_asset: Some(orphan),
                },
            )
            .unwrap();
    });

    let rotxn = chain.env.read_txn().unwrap();
    let supply_before = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    drop(rotxn);

    let virtual_ops = chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let supply_after = state
        .assets()
        .get_dynamic_data(&rotxn, CORE_ASSET)
        .unwrap()
        .current_supply;
    assert_eq!(supply_before - supply_after, 300 + 500);
    for id in [FbaId(0), FbaId(1)] {
        let fba = state.assets().get_fba(&rotxn, id).unwrap();
        assert_eq!(fba.accumulated_fees, 0);
    }
    // Burns credit nobody, so no distribution is observable.
    assert!(virtual_ops.is_empty());
}

#[test]
fn pending_parameters_apply_before_budget() {
    // S5: the budget computed in the same run already uses the new
    // block interval.
    let mut config = min_counts_of_one(scenario_config());
    config.parameters.producer_pay_per_block = 1;
    let chain = TestChain::new(config);
    let state = &chain.state;

    chain.with_write(|rwtxn| {
        let mut pending = state
            .get_global_properties(rwtxn)
            .unwrap()
            .parameters
            .clone();
        pending.block_interval = 3;
        state.set_pending_parameters(rwtxn, pending).unwrap();
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let gpo = state.get_global_properties(&rotxn).unwrap();
    assert_eq!(gpo.parameters.block_interval, 3);
    assert!(gpo.pending_parameters.is_none());

    let record = state
        .try_get_budget_record(&rotxn, BudgetRecordId(0))
        .unwrap()
        .unwrap();
    // blocks_to_maint = ceil(3600 / 3) with the *new* interval.
    assert_eq!(record.requested_producer_budget, 1200);
    assert_eq!(record.producer_budget, 1200);
    let dgpo = state.get_dynamic(&rotxn).unwrap();
    assert_eq!(dgpo.unused_producer_budget, 1200);
}

#[test]
fn top_n_holders_control_special_authority() {
    // S6: top-2 holders of asset Y take over acc0's active authority.
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let (acc0, acc1, acc2) = chain.with_write(|rwtxn| {
        let acc0 = state.create_account(rwtxn, "controlled").unwrap();
        let acc1 = state.create_account(rwtxn, "whale").unwrap();
        let acc2 = state.create_account(rwtxn, "dolphin").unwrap();
        let acc3 = state.create_account(rwtxn, "minnow").unwrap();
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let asset_y = state
            .create_asset(rwtxn, "YTOKEN", issuer, 1_000_000, AssetFlags::default())
            .unwrap();
        for (account, amount) in [(acc1, 1000), (acc2, 500), (acc3, 250)] {
            state
                .issue_asset(rwtxn, account, AssetAmount::new(asset_y, amount))
                .unwrap();
        }
        state
            .set_special_authority(
                rwtxn,
                acc0,
                false,
                SpecialAuthority::TopHolders {
                    asset: asset_y,
                    num_top_holders: 2,
                },
            )
            .unwrap();
        (acc0, acc1, acc2)
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let controlled = state.accounts().get_account(&rotxn, acc0).unwrap();
    let auths = &controlled.active.account_auths;
    assert_eq!(auths.len(), 2);
    let weight_1 = u64::from(auths[&acc1]);
    let weight_2 = u64::from(auths[&acc2]);
    assert!(weight_1 > 0 && weight_2 > 0);
    assert_eq!(weight_1, weight_2 * 2);
    // P2: strict majority, and more than the junior holder alone.
    let threshold = u64::from(controlled.active.weight_threshold);
    assert!(threshold > weight_2);
    assert!(threshold > (weight_1 + weight_2) / 2);
    assert!(threshold <= weight_1 + weight_2);
    assert_ne!(
        controlled.top_n_control_flags & Account::TOP_N_CONTROL_ACTIVE,
        0
    );
}

#[test]
fn buyback_account_sells_holdings_at_market() {
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let (buyback_account, asset_b, maker) = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let buyback_account = state.create_account(rwtxn, "buyback").unwrap();
        let maker = state.create_account(rwtxn, "maker").unwrap();
        let asset_b = state
            .create_asset(rwtxn, "BUYME", issuer, 1_000_000, AssetFlags::default())
            .unwrap();
        state
            .assets()
            .modify_asset(rwtxn, asset_b, |asset| {
                asset.buyback_account = Some(buyback_account);
            })
            .unwrap();
        state.assets().insert_buyback(rwtxn, asset_b).unwrap();
        state
            .accounts()
            .modify_account(rwtxn, buyback_account, |account| {
                account.allowed_assets =
                    Some([CORE_ASSET].into_iter().collect());
            })
            .unwrap();
        // Buyback war chest: 800 core.
        state
            .issue_asset(
                rwtxn,
                buyback_account,
                AssetAmount::new(CORE_ASSET, 800),
            )
            .unwrap();
        // A maker offers 600 BUYME, asking 300 core.
        state
            .issue_asset(rwtxn, maker, AssetAmount::new(asset_b, 600))
            .unwrap();
        state
            .apply_operation(
                rwtxn,
                &EvalContext {
                    skip_fee_schedule_check: true,
                },
                Operation::LimitOrderCreate {
                    fee: 0,
                    seller: maker,
                    amount_to_sell: AssetAmount::new(asset_b, 600),
                    min_to_receive: AssetAmount::new(CORE_ASSET, 300),
                    expiration: u64::MAX,
                },
            )
            .unwrap();
        (buyback_account, asset_b, maker)
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    // The whole maker offer filled at the maker's price (2 BUYME per
    // core); the unmatched 500 core went straight back to the account
    // via the immediate cancel.
    assert_eq!(
        state
            .accounts()
            .balance(&rotxn, buyback_account, asset_b)
            .unwrap(),
        600
    );
    assert_eq!(
        state
            .accounts()
            .balance(&rotxn, buyback_account, CORE_ASSET)
            .unwrap(),
        500
    );
    assert_eq!(
        state.accounts().balance(&rotxn, maker, CORE_ASSET).unwrap(),
        300
    );
    // Neither the buyback order nor the filled maker order remain.
    assert!(state
        .orders()
        .opposite_book(&rotxn, asset_b, CORE_ASSET)
        .unwrap()
        .is_empty());
    assert!(state
        .orders()
        .opposite_book(&rotxn, CORE_ASSET, asset_b)
        .unwrap()
        .is_empty());
    // In-orders snapshots returned to zero on both sides.
    let stats = state
        .accounts()
        .get_stats(&rotxn, buyback_account)
        .unwrap();
    assert_eq!(stats.core_in_orders, 0);
}

#[test]
fn expired_custom_authorities_are_swept() {
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    chain.with_write(|rwtxn| {
        let grantor = state.create_account(rwtxn, "grantor").unwrap();
        let grantee = state.create_account(rwtxn, "grantee").unwrap();
        for (id, valid_to) in [(0, T0 + 100), (1, T0 + 999_999)] {
            state
                .governance()
                .put_custom_authority(
                    rwtxn,
                    CustomAuthorityId(id),
                    &CustomAuthority {
                        account: grantor,
                        operation_kind: 7,
                        valid_from: T0,
                        valid_to,
                        auth: Authority::single(grantee),
                    },
                )
                .unwrap();
        }
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let remaining =
        state.governance().all_custom_authorities(&rotxn).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, CustomAuthorityId(1));
}

#[test]
fn stale_oracle_feeds_expire() {
    let mut config = min_counts_of_one(scenario_config());
    config.upgrades.feed_expiry_cleanup = 0;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let asset_x = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let fresh_publisher = state.create_account(rwtxn, "oracle2").unwrap();
        let asset_x = state
            .create_bitasset(
                rwtxn,
                "FED",
                issuer,
                1_000_000,
                AssetFlags {
                    producer_fed: true,
                    ..AssetFlags::default()
                },
                BitassetOptions {
                    feed_lifetime_secs: 1000,
                    ..BitassetOptions::default()
                },
            )
            .unwrap();
        let price = Price::new(
            AssetAmount::new(asset_x, 1),
            AssetAmount::new(CORE_ASSET, 1),
        );
        state
            .publish_feed(rwtxn, asset_x, issuer, feed(price, 1850), T0 + 100)
            .unwrap();
        state
            .publish_feed(
                rwtxn,
                asset_x,
                fresh_publisher,
                feed(price, 1850),
                T0 + 3500,
            )
            .unwrap();
        asset_x
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let bitasset = state.assets().get_bitasset(&rotxn, asset_x).unwrap();
    // Cutoff is 3600 - 1000 past genesis: only the fresh feed survives.
    assert_eq!(bitasset.feeds.len(), 1);
    assert_eq!(bitasset.force_settled_volume, 0);
}

#[test]
fn one_time_transforms_fire_on_crossing_only() {
    // P8: a transform fires iff the run's advance crosses its
    // activation, exactly once.
    let mut config = min_counts_of_one(scenario_config());
    // Inside the second maintenance window [T0+7200, T0+10800).
    config.upgrades.annual_member_retirement = T0 + 9000;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let member = chain.with_write(|rwtxn| {
        let member = state.create_account(rwtxn, "annual").unwrap();
        state
            .accounts()
            .modify_account(rwtxn, member, |account| {
                // Annual membership valid far beyond the test horizon.
                account.membership_expiration = T0 + 100_000_000;
            })
            .unwrap();
        member
    });

    chain.maintain(T0 + 3600);
    let rotxn = chain.env.read_txn().unwrap();
    let account = state.accounts().get_account(&rotxn, member).unwrap();
    assert!(account.is_annual_member(T0 + 3600));
    drop(rotxn);

    chain.maintain(T0 + 7200);
    let rotxn = chain.env.read_txn().unwrap();
    let account = state.accounts().get_account(&rotxn, member).unwrap();
    assert!(account.is_lifetime_member());
}

#[test]
fn upgrade_transforms_repair_assets_tickets_and_bids() {
    let mut config = min_counts_of_one(scenario_config());
    // All three fire on the first crossing window [T0+3600, T0+7200).
    config.upgrades.max_supply_clamp = T0 + 3600;
    config.upgrades.ticket_value_reset = T0 + 3600;
    config.upgrades.disabled_bid_sweep = T0 + 3600;
    let chain = TestChain::new(config);
    let state = &chain.state;

    let (asset_z, holder, bidder) = chain.with_write(|rwtxn| {
        let issuer = state.create_account(rwtxn, "issuer").unwrap();
        let holder = state.create_account(rwtxn, "holder").unwrap();
        let bidder = state.create_account(rwtxn, "bidder").unwrap();

        // A market-issued asset whose recorded supply exceeds its max.
        let asset_z = state
            .create_bitasset(
                rwtxn,
                "OVERFLOWN",
                issuer,
                100,
                AssetFlags::default(),
                BitassetOptions::default(),
            )
            .unwrap();
        state
            .assets()
            .modify_dynamic_data(rwtxn, asset_z, |data| {
                data.current_supply = 150;
            })
            .unwrap();

        // A liquid ticket still carrying declared value.
        state
            .assets()
            .put_ticket(
                rwtxn,
                TicketId(0),
                &Ticket {
                    account: holder,
                    kind: TicketKind::Liquid,
                    amount: 300,
                    value: 500,
                },
            )
            .unwrap();
        state
            .accounts()
            .modify_stats(rwtxn, holder, |stats| {
                stats.pol_value = 700;
            })
            .unwrap();

        // A bid on an asset that has disabled collateral bidding;
        // can_bid_collateral defaults to false here.
        state
            .issue_asset(rwtxn, bidder, AssetAmount::new(CORE_ASSET, 40))
            .unwrap();
        state
            .create_collateral_bid(
                rwtxn,
                bidder,
                AssetAmount::new(CORE_ASSET, 40),
                AssetAmount::new(asset_z, 100),
            )
            .unwrap();
        (asset_z, holder, bidder)
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let asset = state.assets().get_asset(&rotxn, asset_z).unwrap();
    assert_eq!(asset.max_supply, 150);

    let ticket = state
        .assets()
        .all_tickets(&rotxn)
        .unwrap()
        .remove(0)
        .1;
    assert_eq!(ticket.value, 0);
    let stats = state.accounts().get_stats(&rotxn, holder).unwrap();
    assert_eq!(stats.pol_value, 200);

    assert!(state.orders().all_bids(&rotxn).unwrap().is_empty());
    // The bid's collateral came back.
    assert_eq!(
        state.accounts().balance(&rotxn, bidder, CORE_ASSET).unwrap(),
        40
    );
}

#[test]
fn decayed_stake_drives_producer_votes() {
    let mut config = min_counts_of_one(scenario_config());
    config.upgrades.voting_power_decay = 0;
    let chain = TestChain::new(config);
    let state = &chain.state;

    const DAYS: u64 = 86_400;
    let now = T0 + 3600;
    let producer_id = chain.with_write(|rwtxn| {
        let voter = state.create_account(rwtxn, "sleepy").unwrap();
        state
            .issue_asset(rwtxn, voter, AssetAmount::new(CORE_ASSET, 1000))
            .unwrap();
        let candidate = state.create_account(rwtxn, "prod").unwrap();
        let producer_id = state.create_producer(rwtxn, candidate).unwrap();
        let producer =
            state.governance().get_producer(rwtxn, producer_id).unwrap();
        state
            .set_account_votes(
                rwtxn,
                voter,
                vec![VoteChoice {
                    kind: VoteKind::Producer,
                    offset: producer.vote_choice,
                }],
                1,
                0,
                T0,
            )
            .unwrap();
        // Last vote 410 days before the tally: 50 days past full power,
        // one step beyond the first, so 25% decays away.
        state
            .accounts()
            .modify_stats(rwtxn, voter, |stats| {
                stats.last_vote_time = now - 360 * DAYS - 50 * DAYS;
            })
            .unwrap();
        producer_id
    });

    chain.maintain(now);

    let rotxn = chain.env.read_txn().unwrap();
    let producer = state.governance().get_producer(&rotxn, producer_id).unwrap();
    assert_eq!(producer.total_votes, 750);
}

#[test]
fn vote_power_snapshot_is_stable_across_runs() {
    // P7: re-tallying at a later tick re-assigns instead of
    // accumulating.
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let voter = chain.with_write(|rwtxn| {
        let voter = state.create_account(rwtxn, "steady").unwrap();
        state
            .issue_asset(rwtxn, voter, AssetAmount::new(CORE_ASSET, 1000))
            .unwrap();
        let candidate = state.create_account(rwtxn, "prod").unwrap();
        let producer_id = state.create_producer(rwtxn, candidate).unwrap();
        let producer =
            state.governance().get_producer(rwtxn, producer_id).unwrap();
        state
            .set_account_votes(
                rwtxn,
                voter,
                vec![VoteChoice {
                    kind: VoteKind::Producer,
                    offset: producer.vote_choice,
                }],
                1,
                0,
                T0,
            )
            .unwrap();
        voter
    });

    chain.maintain(T0 + 3600);
    let rotxn = chain.env.read_txn().unwrap();
    let first = state.accounts().get_stats(&rotxn, voter).unwrap();
    drop(rotxn);

    chain.maintain(T0 + 7200);
    let rotxn = chain.env.read_txn().unwrap();
    let second = state.accounts().get_stats(&rotxn, voter).unwrap();

    assert_eq!(first.vp_producer, 1000);
    assert_eq!(second.vp_producer, 1000);
    assert_eq!(second.vp_all, first.vp_all);
}

#[test]
fn delegated_stake_follows_the_proxy_opinions() {
    let chain = TestChain::new(min_counts_of_one(scenario_config()));
    let state = &chain.state;

    let (producer_id, proxy) = chain.with_write(|rwtxn| {
        let delegator = state.create_account(rwtxn, "delegator").unwrap();
        let proxy = state.create_account(rwtxn, "proxy").unwrap();
        state
            .issue_asset(
                rwtxn,
                delegator,
                AssetAmount::new(CORE_ASSET, 4000),
            )
            .unwrap();
        let candidate = state.create_account(rwtxn, "prod").unwrap();
        let producer_id = state.create_producer(rwtxn, candidate).unwrap();
        let producer =
            state.governance().get_producer(rwtxn, producer_id).unwrap();
        // The proxy holds the opinions; the delegator holds the stake.
        state
            .set_account_votes(
                rwtxn,
                proxy,
                vec![VoteChoice {
                    kind: VoteKind::Producer,
                    offset: producer.vote_choice,
                }],
                1,
                0,
                T0,
            )
            .unwrap();
        state.set_voting_proxy(rwtxn, delegator, proxy, T0).unwrap();
        (producer_id, proxy)
    });

    chain.maintain(T0 + 3600);

    let rotxn = chain.env.read_txn().unwrap();
    let producer = state.governance().get_producer(&rotxn, producer_id).unwrap();
    assert_eq!(producer.total_votes, 4000);
    // The snapshot lands on the opinion account.
    let proxy_stats = state.accounts().get_stats(&rotxn, proxy).unwrap();
    assert_eq!(proxy_stats.vp_producer, 4000);
}

#[test]
fn identical_chains_produce_identical_maintenance() {
    // P9: same prior state and header yield byte-identical governance
    // outputs and virtual-op streams.
    fn build_and_run() -> (
        Vec<VirtualOperation>,
        Vec<meridian_chain::types::ProducerId>,
        meridian_chain::types::BudgetRecord,
    ) {
        let mut config = min_counts_of_one(scenario_config());
        config.parameters.producer_pay_per_block = 1;
        let chain = TestChain::new(config);
        let state = &chain.state;
        chain.with_write(|rwtxn| {
            let issuer = state.create_account(rwtxn, "issuer").unwrap();
            let buyback_account =
                state.create_account(rwtxn, "buyback").unwrap();
            let designated = state
                .create_asset(
                    rwtxn,
                    "FBATOKEN",
                    issuer,
                    1_000_000,
                    AssetFlags::default(),
                )
                .unwrap();
            state
                .assets()
                .modify_asset(rwtxn, designated, |asset| {
                    asset.buyback_account = Some(buyback_account);
                })
                .unwrap();
            state
                .issue_asset(
                    rwtxn,
                    PRODUCER_ACCOUNT,
                    AssetAmount::new(CORE_ASSET, 5000),
                )
                .unwrap();
            state
                .assets()
                .put_fba(
                    rwtxn,
                    FbaId(0),
                    &FbaAccumulator {
                        accumulated_fees: 777,
                        designated_asset: Some(designated),
                    },
                )
                .unwrap();
            for (name, stake) in [("a", 100), ("b", 2000), ("c", 350)] {
                let voter = state.create_account(rwtxn, name).unwrap();
                state
                    .issue_asset(
                        rwtxn,
                        voter,
                        AssetAmount::new(CORE_ASSET, stake),
                    )
                    .unwrap();
                let candidate = state
                    .create_account(rwtxn, &format!("prod-{name}"))
                    .unwrap();
                let producer_id =
                    state.create_producer(rwtxn, candidate).unwrap();
                let producer = state
                    .governance()
                    .get_producer(rwtxn, producer_id)
                    .unwrap();
                state
                    .set_account_votes(
                        rwtxn,
                        voter,
                        vec![VoteChoice {
                            kind: VoteKind::Producer,
                            offset: producer.vote_choice,
                        }],
                        1,
                        0,
                        T0,
                    )
                    .unwrap();
            }
        });
        let virtual_ops = chain.maintain(T0 + 3600);
        let rotxn = chain.env.read_txn().unwrap();
        let gpo = state.get_global_properties(&rotxn).unwrap();
        let record = state
            .try_get_budget_record(&rotxn, BudgetRecordId(0))
            .unwrap()
            .unwrap();
        (virtual_ops, gpo.active_producers, record)
    }

    let (ops_a, producers_a, record_a) = build_and_run();
    let (ops_b, producers_b, record_b) = build_and_run();
    assert_eq!(ops_a, ops_b);
    assert_eq!(producers_a, producers_b);
    assert_eq!(
        format!("{record_a:?}"),
        format!("{record_b:?}")
    );
}
