//! Chain state: typed object tables plus the maintenance engine that
//! periodically rebuilds governance from them.
//!
//! [`State`] owns every table. All reads go through a [`RoTxn`], all
//! writes through a [`RwTxn`] owned by the block applier, so a failed
//! maintenance aborts atomically when the caller drops the transaction.

use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn, UnitKey};

use crate::types::{
    Account, AccountId, AccountOptions, Asset, AssetAmount, AssetDynamicData,
    AssetFlags, AssetId, Authority, BidId, BitassetData, BitassetOptions,
    BlockHeader, BudgetRecord, BudgetRecordId, CallOrder, CallOrderId,
    ChainParameters, ChainProperties, CollateralBid, CommitteeMember,
    CommitteeMemberId, DynamicGlobalProperties, GlobalProperties, IdCounters,
    ImmutableChainParameters, Price, PriceFeed, Producer, ProducerId,
    SpecialAuthority, TimestampedFeed, UpgradeSchedule, VirtualOperation,
    VoteChoice, VoteKind, Worker, WorkerId, WorkerPay, CORE_ASSET,
    COMMITTEE_ACCOUNT, LIFETIME_MEMBER_EXPIRATION, PRODUCER_ACCOUNT,
    RELAXED_COMMITTEE_ACCOUNT,
};

pub mod accounts;
pub mod assets;
pub mod error;
pub mod evaluator;
pub mod governance;
pub mod maintenance;
pub mod orders;

pub use error::Error;
pub use evaluator::{EvalContext, Operation, OperationResult};

/// Everything needed to seed a fresh chain.
#[derive(Clone, Debug)]
pub struct GenesisConfig {
    pub timestamp: u64,
    pub parameters: ChainParameters,
    pub immutable: ImmutableChainParameters,
    pub upgrades: UpgradeSchedule,
    pub track_standby_votes: bool,
    pub core_symbol: String,
    pub core_max_supply: u64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            timestamp: 0,
            parameters: ChainParameters::default(),
            immutable: ImmutableChainParameters::default(),
            upgrades: UpgradeSchedule::all_active(),
            track_standby_votes: false,
            core_symbol: "MRDN".to_owned(),
            core_max_supply: 100_000_000_000,
        }
    }
}

#[derive(Clone)]
pub struct State {
    chain_properties:
        DatabaseUnique<UnitKey, SerdeBincode<ChainProperties>>,
    global_properties:
        DatabaseUnique<UnitKey, SerdeBincode<GlobalProperties>>,
    dynamic:
        DatabaseUnique<UnitKey, SerdeBincode<DynamicGlobalProperties>>,
    budget_records: DatabaseUnique<
        SerdeBincode<BudgetRecordId>,
        SerdeBincode<BudgetRecord>,
    >,
    counters: DatabaseUnique<UnitKey, SerdeBincode<IdCounters>>,
    accounts: accounts::Dbs,
    assets: assets::Dbs,
    governance: governance::Dbs,
    orders: orders::Dbs,
}

impl State {
    pub const NUM_DBS: u32 = accounts::Dbs::NUM_DBS
        + assets::Dbs::NUM_DBS
        + governance::Dbs::NUM_DBS
        + orders::Dbs::NUM_DBS
        + 5;

    pub fn new(env: &Env) -> Result<Self, Error> {
        let mut rwtxn = env.write_txn()?;
        let chain_properties =
            DatabaseUnique::create(env, &mut rwtxn, "chain_properties")?;
        let global_properties =
            DatabaseUnique::create(env, &mut rwtxn, "global_properties")?;
        let dynamic = DatabaseUnique::create(
            env,
            &mut rwtxn,
            "dynamic_global_properties",
        )?;
        let budget_records =
            DatabaseUnique::create(env, &mut rwtxn, "budget_records")?;
        let counters = DatabaseUnique::create(env, &mut rwtxn, "counters")?;
        let accounts = accounts::Dbs::new(env, &mut rwtxn)?;
        let assets = assets::Dbs::new(env, &mut rwtxn)?;
        let governance = governance::Dbs::new(env, &mut rwtxn)?;
        let orders = orders::Dbs::new(env, &mut rwtxn)?;
        rwtxn.commit()?;
        Ok(Self {
            chain_properties,
            global_properties,
            dynamic,
            budget_records,
            counters,
            accounts,
            assets,
            governance,
            orders,
        })
    }

    pub fn accounts(&self) -> &accounts::Dbs {
        &self.accounts
    }

    pub fn assets(&self) -> &assets::Dbs {
        &self.assets
    }

    pub fn governance(&self) -> &governance::Dbs {
        &self.governance
    }

    pub fn orders(&self) -> &orders::Dbs {
        &self.orders
    }

    /// Seed genesis state: the core asset, the reserved governance
    /// accounts, and the property singletons.
    pub fn init_genesis(
        &self,
        rwtxn: &mut RwTxn,
        config: &GenesisConfig,
    ) -> Result<(), Error> {
        self.counters.put(rwtxn, &(), &IdCounters::default())?;
        self.chain_properties.put(
            rwtxn,
            &(),
            &ChainProperties {
                immutable: config.immutable.clone(),
                upgrades: config.upgrades.clone(),
                track_standby_votes: config.track_standby_votes,
            },
        )?;
        self.global_properties.put(
            rwtxn,
            &(),
            &GlobalProperties {
                parameters: config.parameters.clone(),
                pending_parameters: None,
                active_producers: Vec::new(),
                active_committee: Vec::new(),
                next_vote_offset: 0,
            },
        )?;
        let maintenance_interval =
            u64::from(config.parameters.maintenance_interval);
        self.dynamic.put(
            rwtxn,
            &(),
            &DynamicGlobalProperties {
                head_block_num: 0,
                head_block_time: config.timestamp,
                next_maintenance_time: config.timestamp
                    + maintenance_interval,
                last_budget_time: config.timestamp,
                last_vote_tally_time: config.timestamp,
                ..DynamicGlobalProperties::default()
            },
        )?;

        let core = self.next_id(rwtxn, |c| &mut c.assets)?;
        debug_assert_eq!(AssetId(core), CORE_ASSET);
        self.assets.put_asset(
            rwtxn,
            CORE_ASSET,
            &Asset {
                symbol: config.core_symbol.clone(),
                issuer: COMMITTEE_ACCOUNT,
                max_supply: config.core_max_supply,
                market_issued: false,
                flags: AssetFlags::default(),
                buyback_account: None,
                whitelist_accounts: Default::default(),
            },
        )?;
        self.assets.put_dynamic_data(
            rwtxn,
            CORE_ASSET,
            &AssetDynamicData::default(),
        )?;

        for (reserved, name) in [
            (COMMITTEE_ACCOUNT, "committee-account"),
            (RELAXED_COMMITTEE_ACCOUNT, "relaxed-committee-account"),
            (PRODUCER_ACCOUNT, "producer-account"),
        ] {
            let id = self.create_account(rwtxn, name)?;
            debug_assert_eq!(id, reserved);
            self.accounts.modify_account(rwtxn, id, |account| {
                account.membership_expiration = LIFETIME_MEMBER_EXPIRATION;
            })?;
        }
        Ok(())
    }

    pub fn get_chain_properties(
        &self,
        rotxn: &RoTxn,
    ) -> Result<ChainProperties, Error> {
        self.chain_properties
            .try_get(rotxn, &())?
            .ok_or(Error::MissingGlobals)
    }

    pub fn get_global_properties(
        &self,
        rotxn: &RoTxn,
    ) -> Result<GlobalProperties, Error> {
        self.global_properties
            .try_get(rotxn, &())?
            .ok_or(Error::MissingGlobals)
    }

    pub fn put_global_properties(
        &self,
        rwtxn: &mut RwTxn,
        gpo: &GlobalProperties,
    ) -> Result<(), Error> {
        self.global_properties.put(rwtxn, &(), gpo)?;
        Ok(())
    }

    pub fn get_dynamic(
        &self,
        rotxn: &RoTxn,
    ) -> Result<DynamicGlobalProperties, Error> {
        self.dynamic.try_get(rotxn, &())?.ok_or(Error::MissingGlobals)
    }

    pub fn put_dynamic(
        &self,
        rwtxn: &mut RwTxn,
        dgpo: &DynamicGlobalProperties,
    ) -> Result<(), Error> {
        self.dynamic.put(rwtxn, &(), dgpo)?;
        Ok(())
    }

    /// Pending governance-parameter change, applied at the next
    /// maintenance.
    pub fn set_pending_parameters(
        &self,
        rwtxn: &mut RwTxn,
        parameters: ChainParameters,
    ) -> Result<(), Error> {
        let mut gpo = self.get_global_properties(rwtxn)?;
        gpo.pending_parameters = Some(parameters);
        self.put_global_properties(rwtxn, &gpo)
    }

    /// Core still held in reserve: max supply minus circulating supply.
    pub fn core_reserve(&self, rotxn: &RoTxn) -> Result<u64, Error> {
        let core = self.assets.get_asset(rotxn, CORE_ASSET)?;
        let dynamic_data = self.assets.get_dynamic_data(rotxn, CORE_ASSET)?;
        Ok(core.max_supply.saturating_sub(dynamic_data.current_supply))
    }

    fn next_id(
        &self,
        rwtxn: &mut RwTxn,
        field: impl FnOnce(&mut IdCounters) -> &mut u64,
    ) -> Result<u64, Error> {
        let mut counters =
            self.counters.try_get(rwtxn, &())?.unwrap_or_default();
        let slot = field(&mut counters);
        let id = *slot;
        *slot += 1;
        self.counters.put(rwtxn, &(), &counters)?;
        Ok(id)
    }

    pub fn create_account(
        &self,
        rwtxn: &mut RwTxn,
        name: &str,
    ) -> Result<AccountId, Error> {
        let id = AccountId(self.next_id(rwtxn, |c| &mut c.accounts)?);
        let account = Account {
            name: name.to_owned(),
            owner: Authority::single(id),
            active: Authority::single(id),
            options: AccountOptions::default(),
            owner_special_authority: SpecialAuthority::None,
            active_special_authority: SpecialAuthority::None,
            membership_expiration: 0,
            num_committee_voted: 0,
            allowed_assets: None,
            top_n_control_flags: 0,
        };
        self.accounts.insert_account(rwtxn, id, &account)?;
        let mut dgpo = self.get_dynamic(rwtxn)?;
        dgpo.accounts_registered_this_interval += 1;
        self.put_dynamic(rwtxn, &dgpo)?;
        Ok(id)
    }

    pub fn create_asset(
        &self,
        rwtxn: &mut RwTxn,
        symbol: &str,
        issuer: AccountId,
        max_supply: u64,
        flags: AssetFlags,
    ) -> Result<AssetId, Error> {
        let id = AssetId(self.next_id(rwtxn, |c| &mut c.assets)?);
        self.assets.put_asset(
            rwtxn,
            id,
            &Asset {
                symbol: symbol.to_owned(),
                issuer,
                max_supply,
                market_issued: false,
                flags,
                buyback_account: None,
                whitelist_accounts: Default::default(),
            },
        )?;
        self.assets
            .put_dynamic_data(rwtxn, id, &AssetDynamicData::default())?;
        Ok(id)
    }

    pub fn create_bitasset(
        &self,
        rwtxn: &mut RwTxn,
        symbol: &str,
        issuer: AccountId,
        max_supply: u64,
        flags: AssetFlags,
        options: BitassetOptions,
    ) -> Result<AssetId, Error> {
        let id = self.create_asset(rwtxn, symbol, issuer, max_supply, flags)?;
        self.assets.modify_asset(rwtxn, id, |asset| {
            asset.market_issued = true;
        })?;
        self.assets
            .put_bitasset(rwtxn, id, &BitassetData::new(id, options))?;
        Ok(id)
    }

    /// Issue new supply of an asset into an account's balance.
    pub fn issue_asset(
        &self,
        rwtxn: &mut RwTxn,
        to: AccountId,
        amount: AssetAmount,
    ) -> Result<(), Error> {
        let asset = self.assets.get_asset(rwtxn, amount.asset)?;
        let dynamic_data =
            self.assets.get_dynamic_data(rwtxn, amount.asset)?;
        let new_supply = dynamic_data
            .current_supply
            .checked_add(amount.amount)
            .filter(|supply| *supply <= asset.max_supply)
            .ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "issuing {} of asset {} would exceed max supply",
                    amount.amount, amount.asset
                ))
            })?;
        self.assets.modify_dynamic_data(rwtxn, amount.asset, |data| {
            data.current_supply = new_supply;
        })?;
        self.accounts.credit(rwtxn, to, amount.asset, amount.amount)
    }

    pub fn allocate_vote_offset(
        &self,
        rwtxn: &mut RwTxn,
    ) -> Result<u32, Error> {
        let mut gpo = self.get_global_properties(rwtxn)?;
        let offset = gpo.next_vote_offset;
        gpo.next_vote_offset += 1;
        self.put_global_properties(rwtxn, &gpo)?;
        Ok(offset)
    }

    pub fn create_producer(
        &self,
        rwtxn: &mut RwTxn,
        account: AccountId,
    ) -> Result<ProducerId, Error> {
        let vote_choice = self.allocate_vote_offset(rwtxn)?;
        let id = ProducerId(self.next_id(rwtxn, |c| &mut c.producers)?);
        self.governance.insert_producer(
            rwtxn,
            id,
            &Producer {
                account,
                vote_choice,
                total_votes: 0,
            },
        )?;
        Ok(id)
    }

    pub fn create_committee_member(
        &self,
        rwtxn: &mut RwTxn,
        account: AccountId,
    ) -> Result<CommitteeMemberId, Error> {
        let vote_choice = self.allocate_vote_offset(rwtxn)?;
        let id =
            CommitteeMemberId(self.next_id(rwtxn, |c| &mut c.committee_members)?);
        self.governance.put_committee_member(
            rwtxn,
            id,
            &CommitteeMember {
                account,
                vote_choice,
                total_votes: 0,
            },
        )?;
        Ok(id)
    }

    pub fn create_worker(
        &self,
        rwtxn: &mut RwTxn,
        account: AccountId,
        name: &str,
        work_begin_date: u64,
        work_end_date: u64,
        daily_pay: u64,
        pay: WorkerPay,
    ) -> Result<WorkerId, Error> {
        let vote_for = self.allocate_vote_offset(rwtxn)?;
        let vote_against = self.allocate_vote_offset(rwtxn)?;
        let id = WorkerId(self.next_id(rwtxn, |c| &mut c.workers)?);
        self.governance.put_worker(
            rwtxn,
            id,
            &Worker {
                account,
                name: name.to_owned(),
                work_begin_date,
                work_end_date,
                daily_pay,
                pay,
                vote_for,
                vote_against,
                total_votes_for: 0,
                total_votes_against: 0,
            },
        )?;
        Ok(id)
    }

    /// Update an account's vote set and counts, stamping the vote time.
    pub fn set_account_votes(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        votes: Vec<VoteChoice>,
        num_producer: u16,
        num_committee: u16,
        now: u64,
    ) -> Result<(), Error> {
        let num_committee_voted = votes
            .iter()
            .filter(|choice| choice.kind == VoteKind::Committee)
            .count() as u16;
        self.accounts.modify_account(rwtxn, id, |account| {
            account.options.votes = votes;
            account.options.num_producer = num_producer;
            account.options.num_committee = num_committee;
            account.num_committee_voted = num_committee_voted;
        })?;
        self.accounts.modify_stats(rwtxn, id, |stats| {
            stats.last_vote_time = now;
        })?;
        Ok(())
    }

    pub fn set_voting_proxy(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        proxy: AccountId,
        now: u64,
    ) -> Result<(), Error> {
        self.accounts.modify_account(rwtxn, id, |account| {
            account.options.voting_account = proxy;
        })?;
        self.accounts.modify_stats(rwtxn, id, |stats| {
            stats.last_vote_time = now;
        })?;
        Ok(())
    }

    /// Attach a special authority directive to an account slot.
    pub fn set_special_authority(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        is_owner: bool,
        authority: SpecialAuthority,
    ) -> Result<(), Error> {
        let account = self.accounts.modify_account(rwtxn, id, |account| {
            if is_owner {
                account.owner_special_authority = authority;
            } else {
                account.active_special_authority = authority;
            }
        })?;
        if account.owner_special_authority.is_none()
            && account.active_special_authority.is_none()
        {
            self.governance
                .remove_special_authority_account(rwtxn, id)?;
        } else {
            self.governance
                .insert_special_authority_account(rwtxn, id)?;
        }
        Ok(())
    }

    /// Publish (or refresh) a price feed and re-derive the median.
    pub fn publish_feed(
        &self,
        rwtxn: &mut RwTxn,
        asset: AssetId,
        publisher: AccountId,
        feed: PriceFeed,
        now: u64,
    ) -> Result<(), Error> {
        self.assets.modify_bitasset(rwtxn, asset, |bitasset| {
            bitasset
                .feeds
                .insert(publisher, TimestampedFeed { time: now, feed });
            bitasset.update_current_feed(now);
        })?;
        Ok(())
    }

    /// Place a collateral bid on a globally-settled asset, locking the
    /// extra collateral.
    pub fn create_collateral_bid(
        &self,
        rwtxn: &mut RwTxn,
        bidder: AccountId,
        extra_collateral: AssetAmount,
        debt_covered: AssetAmount,
    ) -> Result<BidId, Error> {
        self.accounts.debit(
            rwtxn,
            bidder,
            extra_collateral.asset,
            extra_collateral.amount,
        )?;
        let id = BidId(self.next_id(rwtxn, |c| &mut c.bids)?);
        self.orders.put_bid(
            rwtxn,
            id,
            &CollateralBid {
                bidder,
                inv_swan_price: Price::new(extra_collateral, debt_covered),
            },
        )?;
        Ok(id)
    }

    /// Cancel a collateral bid, refunding the locked collateral.
    pub fn cancel_bid(
        &self,
        rwtxn: &mut RwTxn,
        id: BidId,
    ) -> Result<(), Error> {
        let bid = self.orders.get_bid(rwtxn, id)?;
        self.accounts.credit(
            rwtxn,
            bid.bidder,
            bid.inv_swan_price.base.asset,
            bid.extra_collateral(),
        )?;
        self.orders.remove_bid(rwtxn, id)?;
        Ok(())
    }

    /// Convert an executable bid into a live debt position, consuming
    /// `collateral_from_fund` of the settlement fund.
    pub fn execute_bid(
        &self,
        rwtxn: &mut RwTxn,
        id: BidId,
        debt: u64,
        collateral_from_fund: u64,
        call_price: Price,
    ) -> Result<CallOrderId, Error> {
        let bid = self.orders.get_bid(rwtxn, id)?;
        let call_id =
            CallOrderId(self.next_id(rwtxn, |c| &mut c.call_orders)?);
        self.orders.put_call_order(
            rwtxn,
            call_id,
            &CallOrder {
                borrower: bid.bidder,
                collateral: AssetAmount::new(
                    bid.inv_swan_price.base.asset,
                    bid.extra_collateral() + collateral_from_fund,
                ),
                debt: AssetAmount::new(bid.debt_asset(), debt),
                call_price,
            },
        )?;
        self.orders.remove_bid(rwtxn, id)?;
        Ok(call_id)
    }

    /// Freeze a bitasset: collect collateral from every debt position at
    /// `settle_price` into the settlement fund and mark the asset
    /// globally settled.
    pub fn globally_settle(
        &self,
        rwtxn: &mut RwTxn,
        asset: AssetId,
        settle_price: Price,
    ) -> Result<(), Error> {
        use crate::math::fixed::{mul_div, Rounding};
        let mut fund: u64 = 0;
        for (call_id, call) in
            self.orders.call_orders_by_collateralization(rwtxn, asset)?
        {
            let owed = mul_div(
                call.debt.amount,
                settle_price.quote.amount,
                settle_price.base.amount,
                Rounding::Up,
            )?
            .min(call.collateral.amount);
            fund += owed;
            let refund = call.collateral.amount - owed;
            self.accounts.credit(
                rwtxn,
                call.borrower,
                call.collateral.asset,
                refund,
            )?;
            self.orders.remove_call_order(rwtxn, call_id)?;
        }
        self.assets.modify_bitasset(rwtxn, asset, |bitasset| {
            bitasset.settlement_price = Some(settle_price);
            bitasset.settlement_fund += fund;
        })?;
        Ok(())
    }

    pub fn create_budget_record(
        &self,
        rwtxn: &mut RwTxn,
        record: &BudgetRecord,
    ) -> Result<BudgetRecordId, Error> {
        let id =
            BudgetRecordId(self.next_id(rwtxn, |c| &mut c.budget_records)?);
        self.budget_records.put(rwtxn, &id, record)?;
        Ok(id)
    }

    pub fn try_get_budget_record(
        &self,
        rotxn: &RoTxn,
        id: BudgetRecordId,
    ) -> Result<Option<BudgetRecord>, Error> {
        Ok(self.budget_records.try_get(rotxn, &id)?)
    }

    /// Apply an operation in a restricted evaluator context.
    pub fn apply_operation(
        &self,
        rwtxn: &mut RwTxn,
        ctx: &EvalContext,
        operation: Operation,
    ) -> Result<OperationResult, Error> {
        evaluator::apply(self, rwtxn, ctx, operation)
    }

    /// Run periodic chain maintenance for the block described by
    /// `header`, returning the virtual operations it produced.
    pub fn perform_maintenance(
        &self,
        rwtxn: &mut RwTxn,
        header: &BlockHeader,
    ) -> Result<Vec<VirtualOperation>, Error> {
        maintenance::run(self, rwtxn, header)
    }
}
