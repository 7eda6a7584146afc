//! Core chain types: identifiers, governance objects, assets, prices,
//! chain parameters.
//!
//! Everything here is stored in the state database via serde, and owns no
//! behavior beyond what a single record can answer about itself. All
//! cross-record logic lives in [`crate::state`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::fixed::{mul_div, FixedPointError, Rounding};

pub mod authority;

pub use authority::{Authority, VoteCounter};

/// 100% expressed in hundredths of a percent.
pub const FULL_PERCENT: u16 = 10_000;
/// 1% expressed in hundredths of a percent.
pub const ONE_PERCENT: u16 = 100;
/// Denominator for collateral ratios (a ratio of 1750 means 175%).
pub const COLLATERAL_RATIO_DENOM: u16 = 1000;
/// Numerator of the per-second reserve decay rate; the denominator is
/// `1 << CORE_ASSET_CYCLE_RATE_BITS`.
pub const CORE_ASSET_CYCLE_RATE: u64 = 17;
pub const CORE_ASSET_CYCLE_RATE_BITS: u32 = 32;
/// Membership expiration sentinel for lifetime members.
pub const LIFETIME_MEMBER_EXPIRATION: u64 = u64::MAX;
/// Network share of fees cashed back to members, in hundredths of a
/// percent of the fee: members keep the rest as vesting cashback.
pub const MEMBER_NETWORK_FEE_PERCENT: u16 = 20 * ONE_PERCENT;

macro_rules! object_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord,
            PartialEq, PartialOrd, Serialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(
                &self,
                f: &mut std::fmt::Formatter<'_>,
            ) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(AccountId);
object_id!(AssetId);
object_id!(ProducerId);
object_id!(CommitteeMemberId);
object_id!(WorkerId);
object_id!(TicketId);
object_id!(BidId);
object_id!(OrderId);
object_id!(CallOrderId);
object_id!(CustomAuthorityId);
object_id!(FbaId);
object_id!(BudgetRecordId);

/// The core asset is always object 0 of its kind.
pub const CORE_ASSET: AssetId = AssetId(0);
/// Reserved account controlled by the active committee members.
pub const COMMITTEE_ACCOUNT: AccountId = AccountId(0);
/// Reserved account mirroring the committee authority with relaxed
/// review requirements.
pub const RELAXED_COMMITTEE_ACCOUNT: AccountId = AccountId(1);
/// Reserved account controlled by the active block producers.
pub const PRODUCER_ACCOUNT: AccountId = AccountId(2);
/// Sentinel voting target meaning "this account votes with its own
/// stake".
pub const PROXY_TO_SELF: AccountId = AccountId(u64::MAX);

/// Category of a vote choice.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum VoteKind {
    Committee = 0,
    Producer = 1,
    Worker = 2,
}

impl VoteKind {
    pub fn as_index(self) -> usize {
        self as usize
    }
}

/// A single opinion held by an account: a category plus the globally
/// allocated tally offset of the candidate (or of the worker's
/// for/against counter).
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct VoteChoice {
    pub kind: VoteKind,
    pub offset: u32,
}

/// Directive replacing an account's owner or active authority with a
/// derived one during maintenance.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum SpecialAuthority {
    None,
    /// Authority is rebuilt every maintenance from the top `num_top_holders`
    /// balances of `asset`, weighted by balance.
    TopHolders {
        asset: AssetId,
        num_top_holders: u8,
    },
}

impl SpecialAuthority {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccountOptions {
    /// Account whose opinions this account's stake follows. The sentinel
    /// [`PROXY_TO_SELF`] means the account votes directly.
    pub voting_account: AccountId,
    /// How many block producers this account wishes to exist.
    pub num_producer: u16,
    /// How many committee members this account wishes to exist.
    pub num_committee: u16,
    pub votes: Vec<VoteChoice>,
}

impl Default for AccountOptions {
    fn default() -> Self {
        Self {
            voting_account: PROXY_TO_SELF,
            num_producer: 0,
            num_committee: 0,
            votes: Vec::new(),
        }
    }
}

/// Permanent chain actor.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Account {
    pub name: String,
    pub owner: Authority,
    pub active: Authority,
    pub options: AccountOptions,
    pub owner_special_authority: SpecialAuthority,
    pub active_special_authority: SpecialAuthority,
    /// Seconds-since-epoch until which the account is a paying member.
    /// `0` for basic accounts, [`LIFETIME_MEMBER_EXPIRATION`] for
    /// lifetime members.
    pub membership_expiration: u64,
    /// Number of committee candidates the account currently votes for,
    /// maintained when its vote set changes.
    pub num_committee_voted: u16,
    /// Assets a buyback account is allowed to sell. `None` means the
    /// account is not configured for buyback at all.
    pub allowed_assets: Option<BTreeSet<AssetId>>,
    /// Which authority slots are currently overwritten by top-N control.
    pub top_n_control_flags: u8,
}

impl Account {
    pub const TOP_N_CONTROL_OWNER: u8 = 0x1;
    pub const TOP_N_CONTROL_ACTIVE: u8 = 0x2;

    pub fn is_lifetime_member(&self) -> bool {
        self.membership_expiration == LIFETIME_MEMBER_EXPIRATION
    }

    pub fn is_annual_member(&self, now: u64) -> bool {
        !self.is_lifetime_member() && self.membership_expiration > now
    }

    pub fn is_member(&self, now: u64) -> bool {
        self.is_lifetime_member() || self.is_annual_member(now)
    }
}

/// Mutable per-account counters.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountStatistics {
    pub owner: AccountId,
    /// Snapshot of the account's liquid core balance, refreshed by the
    /// balance sweep at the start of every maintenance.
    pub core_in_balance: u64,
    pub core_in_orders: u64,
    /// Vesting cashback from settled fees.
    pub cashback_balance: u64,
    /// Core locked in proof-of-lock tickets, and its declared value.
    pub pol_amount: u64,
    pub pol_value: u64,
    /// Core burned in proof-of-burn tickets, and its declared value.
    pub pob_amount: u64,
    pub pob_value: u64,
    pub inactive_amount: u64,
    pub last_vote_time: u64,
    /// Tally tick at which the voting-power snapshot below was last
    /// started; contributions within the same tick accumulate.
    pub vote_tally_time: u64,
    pub vp_all: u64,
    pub vp_active: u64,
    pub vp_committee: u64,
    pub vp_producer: u64,
    pub vp_worker: u64,
    pub pending_fees: u64,
    pub pending_vested_fees: u64,
}

impl AccountStatistics {
    /// Whether the account owns any stake that could tally to a non-zero
    /// vote.
    pub fn has_some_core_voting(&self) -> bool {
        self.core_in_balance != 0
            || self.core_in_orders != 0
            || self.cashback_balance != 0
            || self.pol_value != 0
            || self.pob_value != 0
            || self.inactive_amount != 0
    }

    pub fn has_pending_fees(&self) -> bool {
        self.pending_fees != 0 || self.pending_vested_fees != 0
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct AssetFlags {
    /// Price feeds are published by the active block producers.
    pub producer_fed: bool,
    /// Price feeds are published by the active committee members.
    pub committee_fed: bool,
    /// Whether collateral bids may be placed while globally settled.
    pub can_bid_collateral: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Asset {
    pub symbol: String,
    pub issuer: AccountId,
    pub max_supply: u64,
    /// Market-issued assets are collateralized and carry bitasset data.
    pub market_issued: bool,
    pub flags: AssetFlags,
    /// Account receiving buyback credits for this asset, when configured.
    pub buyback_account: Option<AccountId>,
    /// When non-empty, only these accounts may hold or trade the asset.
    pub whitelist_accounts: BTreeSet<AccountId>,
}

impl Asset {
    /// Whether feeds come from a chain oracle (producers or committee)
    /// rather than from the issuer's nominated publishers.
    pub fn is_oracle_fed(&self) -> bool {
        self.flags.producer_fed || self.flags.committee_fed
    }

    pub fn allows(&self, account: AccountId) -> bool {
        self.whitelist_accounts.is_empty()
            || self.whitelist_accounts.contains(&account)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AssetDynamicData {
    pub current_supply: u64,
    /// Fees accrued since the last budget step; consumed exactly once per
    /// maintenance by the budget.
    pub accumulated_fees: u64,
}

/// An amount of a specific asset.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct AssetAmount {
    pub asset: AssetId,
    pub amount: u64,
}

impl AssetAmount {
    pub fn new(asset: AssetId, amount: u64) -> Self {
        Self { asset, amount }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("amount asset does not appear in price")]
    AssetMismatch,
    #[error(transparent)]
    Math(#[from] FixedPointError),
}

/// An exchange rate between two assets, `base` per `quote`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Self {
        Self { base, quote }
    }

    pub fn inverse(self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }

    /// The margin-call trigger price of a debt position: `debt * ratio /
    /// (collateral * COLLATERAL_RATIO_DENOM)`, expressed with the debt
    /// asset as base.
    pub fn call_price(
        debt: AssetAmount,
        collateral: AssetAmount,
        collateral_ratio: u16,
    ) -> Result<Self, PriceError> {
        let base_amount = debt
            .amount
            .checked_mul(u64::from(collateral_ratio))
            .ok_or(FixedPointError::Overflow)?;
        let quote_amount = collateral
            .amount
            .checked_mul(u64::from(COLLATERAL_RATIO_DENOM))
            .ok_or(FixedPointError::Overflow)?;
        Ok(Self {
            base: AssetAmount::new(debt.asset, base_amount),
            quote: AssetAmount::new(collateral.asset, quote_amount),
        })
    }

    /// Convert `amount` of one side of this price into the other side,
    /// rounding down.
    pub fn convert(
        &self,
        amount: AssetAmount,
    ) -> Result<AssetAmount, PriceError> {
        if amount.asset == self.base.asset {
            let out = mul_div(
                amount.amount,
                self.quote.amount,
                self.base.amount,
                Rounding::Down,
            )?;
            Ok(AssetAmount::new(self.quote.asset, out))
        } else if amount.asset == self.quote.asset {
            let out = mul_div(
                amount.amount,
                self.base.amount,
                self.quote.amount,
                Rounding::Down,
            )?;
            Ok(AssetAmount::new(self.base.asset, out))
        } else {
            Err(PriceError::AssetMismatch)
        }
    }

    /// Rational comparison of the `base/quote` magnitudes, ignoring which
    /// assets the operands are denominated in. The revival walk compares
    /// an inverted call price against a settlement feed this way, so the
    /// numeric behavior is pinned here.
    pub fn amounts_cmp(&self, other: &Self) -> std::cmp::Ordering {
        let lhs = u128::from(self.base.amount) * u128::from(other.quote.amount);
        let rhs =
            u128::from(other.base.amount) * u128::from(self.quote.amount);
        lhs.cmp(&rhs)
    }
}

/// A published price feed for one bitasset.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PriceFeed {
    /// Price of the bitasset in its backing asset; `None` while no valid
    /// median exists.
    pub settlement_price: Option<Price>,
    pub maintenance_collateral_ratio: u16,
    pub maximum_short_squeeze_ratio: u16,
    pub initial_collateral_ratio: u16,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self {
            settlement_price: None,
            maintenance_collateral_ratio: 1750,
            maximum_short_squeeze_ratio: 1100,
            initial_collateral_ratio: 1850,
        }
    }
}

/// How an undercollateralized bitasset responds when margin can no longer
/// be maintained.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum BlackSwanResponse {
    GlobalSettlement,
    NoSettlement,
    IndividualToFund,
    IndividualToOrder,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BitassetOptions {
    pub short_backing_asset: AssetId,
    pub feed_lifetime_secs: u64,
    pub minimum_feeds: u8,
    pub force_settlement_delay_secs: u64,
    pub force_settlement_offset_percent: u16,
    pub maximum_force_settlement_volume: u16,
    pub maintenance_collateral_ratio_override: Option<u16>,
    pub initial_collateral_ratio_override: Option<u16>,
    pub maximum_short_squeeze_ratio_override: Option<u16>,
}

impl Default for BitassetOptions {
    fn default() -> Self {
        Self {
            short_backing_asset: CORE_ASSET,
            feed_lifetime_secs: 86_400,
            minimum_feeds: 1,
            force_settlement_delay_secs: 86_400,
            force_settlement_offset_percent: 0,
            maximum_force_settlement_volume: 20 * ONE_PERCENT,
            maintenance_collateral_ratio_override: None,
            initial_collateral_ratio_override: None,
            maximum_short_squeeze_ratio_override: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TimestampedFeed {
    pub time: u64,
    pub feed: PriceFeed,
}

/// Per-asset data of a market-issued (collateralized) asset.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BitassetData {
    pub asset: AssetId,
    pub options: BitassetOptions,
    /// Active feeds by publisher.
    pub feeds: BTreeMap<AccountId, TimestampedFeed>,
    /// Component-wise median of the active feeds, with option overrides
    /// applied.
    pub current_feed: PriceFeed,
    /// Price at which the asset was globally settled; `None` while not
    /// settled.
    pub settlement_price: Option<Price>,
    /// Backing-asset collateral claimable by holders while settled.
    pub settlement_fund: u64,
    /// Amount force-settled in the current maintenance interval.
    pub force_settled_volume: u64,
    pub is_prediction_market: bool,
    pub black_swan_response: BlackSwanResponse,
}

impl BitassetData {
    pub fn new(asset: AssetId, options: BitassetOptions) -> Self {
        Self {
            asset,
            options,
            feeds: BTreeMap::new(),
            current_feed: PriceFeed::default(),
            settlement_price: None,
            settlement_fund: 0,
            force_settled_volume: 0,
            is_prediction_market: false,
            black_swan_response: BlackSwanResponse::GlobalSettlement,
        }
    }

    pub fn is_globally_settled(&self) -> bool {
        self.settlement_price.is_some()
    }

    /// The collateral ratio used when judging whether accumulated bids
    /// suffice to revive the asset.
    pub fn revival_ratio(&self, use_initial_ratio: bool) -> u16 {
        if use_initial_ratio {
            self.current_feed.initial_collateral_ratio
        } else {
            self.current_feed.maintenance_collateral_ratio
        }
    }

    /// Recompute `current_feed` as the component-wise median of feeds no
    /// older than the feed lifetime, then apply the option overrides.
    /// Clears the feed when fewer than `minimum_feeds` remain.
    pub fn update_current_feed(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.options.feed_lifetime_secs);
        let live: Vec<&PriceFeed> = self
            .feeds
            .values()
            .filter(|tf| tf.time >= cutoff)
            .map(|tf| &tf.feed)
            .collect();
        let mut feed = if live.is_empty()
            || live.len() < usize::from(self.options.minimum_feeds)
        {
            PriceFeed::default()
        } else {
            PriceFeed {
                settlement_price: median_price(
                    live.iter().filter_map(|f| f.settlement_price),
                ),
                maintenance_collateral_ratio: median_u16(
                    live.iter().map(|f| f.maintenance_collateral_ratio),
                ),
                maximum_short_squeeze_ratio: median_u16(
                    live.iter().map(|f| f.maximum_short_squeeze_ratio),
                ),
                initial_collateral_ratio: median_u16(
                    live.iter().map(|f| f.initial_collateral_ratio),
                ),
            }
        };
        if let Some(mcr) = self.options.maintenance_collateral_ratio_override {
            feed.maintenance_collateral_ratio = mcr;
        }
        if let Some(icr) = self.options.initial_collateral_ratio_override {
            feed.initial_collateral_ratio = icr;
        }
        if let Some(mssr) = self.options.maximum_short_squeeze_ratio_override
        {
            feed.maximum_short_squeeze_ratio = mssr;
        }
        self.current_feed = feed;
    }
}

fn median_u16(values: impl Iterator<Item = u16>) -> u16 {
    let mut values: Vec<u16> = values.collect();
    values.sort_unstable();
    values[values.len() / 2]
}

fn median_price(prices: impl Iterator<Item = Price>) -> Option<Price> {
    let mut prices: Vec<Price> = prices.collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.amounts_cmp(b));
    Some(prices[prices.len() / 2])
}

/// Lock state of a staking ticket.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum TicketKind {
    /// Unlocked; counts toward proof-of-lock declared value only until
    /// the liquid-ticket reset retires that behavior.
    Liquid,
    LockedDays(u32),
    LockForever,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ticket {
    pub account: AccountId,
    pub kind: TicketKind,
    pub amount: u64,
    /// Declared voting value of the locked amount.
    pub value: u64,
}

/// A block-producer candidate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Producer {
    pub account: AccountId,
    /// Tally offset allocated to this candidate.
    pub vote_choice: u32,
    pub total_votes: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommitteeMember {
    pub account: AccountId,
    pub vote_choice: u32,
    pub total_votes: u64,
}

/// How a worker's pay is applied when payroll disburses it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum WorkerPay {
    /// Pay is immediately returned to the reserve; used by placeholder
    /// workers that exist to soak up budget.
    RefundToReserve { total_burned: u64 },
    /// Pay accumulates in a vesting balance owned by the worker.
    VestingUnlock { balance: u64 },
    /// Pay is destroyed outright.
    BurnIntoFund { total_burned: u64 },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Worker {
    pub account: AccountId,
    pub name: String,
    pub work_begin_date: u64,
    pub work_end_date: u64,
    pub daily_pay: u64,
    pub pay: WorkerPay,
    /// Tally offsets of the approval and disapproval counters.
    pub vote_for: u32,
    pub vote_against: u32,
    pub total_votes_for: u64,
    pub total_votes_against: u64,
}

impl Worker {
    pub fn is_active(&self, now: u64) -> bool {
        self.work_begin_date <= now && now < self.work_end_date
    }

    pub fn approving_stake(&self) -> u64 {
        self.total_votes_for.saturating_sub(self.total_votes_against)
    }
}

/// An open order selling `for_sale` at `sell_price` or better.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LimitOrder {
    pub seller: AccountId,
    pub for_sale: AssetAmount,
    /// Minimum acceptable rate: base is the sold asset, quote the
    /// received asset.
    pub sell_price: Price,
    pub expiration: u64,
}

impl LimitOrder {
    pub fn receive_asset(&self) -> AssetId {
        self.sell_price.quote.asset
    }
}

/// A collateralized debt position.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallOrder {
    pub borrower: AccountId,
    pub collateral: AssetAmount,
    pub debt: AssetAmount,
    /// Legacy margin-call trigger price; frozen at 1/1 once the
    /// call-price freeze upgrade activates.
    pub call_price: Price,
}

/// An offer of collateral to revive a globally-settled asset.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CollateralBid {
    pub bidder: AccountId,
    /// Additional collateral offered (base, in the backing asset) against
    /// the debt taken over (quote, in the settled asset). Named for the
    /// inverse of the swan price it implies.
    pub inv_swan_price: Price,
}

impl CollateralBid {
    pub fn debt_asset(&self) -> AssetId {
        self.inv_swan_price.quote.asset
    }

    pub fn debt_covered(&self) -> u64 {
        self.inv_swan_price.quote.amount
    }

    pub fn extra_collateral(&self) -> u64 {
        self.inv_swan_price.base.amount
    }
}

/// A grant of restricted signing power, swept when expired.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CustomAuthority {
    pub account: AccountId,
    /// Operation tag this authority is restricted to.
    pub operation_kind: u16,
    pub valid_from: u64,
    pub valid_to: u64,
    pub auth: Authority,
}

/// Accumulator of fees earmarked for a fee-backed asset.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FbaAccumulator {
    pub accumulated_fees: u64,
    pub designated_asset: Option<AssetId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct FeeSchedule {
    pub account_create_basic_fee: u64,
    pub limit_order_create_fee: u64,
    pub account_upgrade_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            account_create_basic_fee: 5_000,
            limit_order_create_fee: 100,
            account_upgrade_fee: 1_000_000,
        }
    }
}

/// Governance-mutable chain parameters.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ChainParameters {
    pub block_interval: u8,
    pub maintenance_interval: u32,
    pub maximum_producer_count: u16,
    pub maximum_committee_count: u16,
    pub producer_pay_per_block: u64,
    pub worker_budget_per_day: u64,
    pub count_non_member_votes: bool,
    pub account_fee_scale_bitshifts: u8,
    pub accounts_per_fee_scale: u32,
    pub fee_schedule: FeeSchedule,
}

impl Default for ChainParameters {
    fn default() -> Self {
        Self {
            block_interval: 5,
            maintenance_interval: 86_400,
            maximum_producer_count: 1001,
            maximum_committee_count: 1001,
            producer_pay_per_block: 0,
            worker_budget_per_day: 0,
            count_non_member_votes: true,
            account_fee_scale_bitshifts: 4,
            accounts_per_fee_scale: 1000,
            fee_schedule: FeeSchedule::default(),
        }
    }
}

/// Parameters fixed at genesis.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImmutableChainParameters {
    pub min_producer_count: u16,
    pub min_committee_member_count: u16,
}

impl Default for ImmutableChainParameters {
    fn default() -> Self {
        Self {
            min_producer_count: 11,
            min_committee_member_count: 11,
        }
    }
}

/// Activation timestamps of the one-time upgrade transforms and behavior
/// switches. A transform fires on the maintenance run whose
/// next-maintenance advance crosses its timestamp; a switch is active
/// once the relevant clock passes it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpgradeSchedule {
    pub annual_member_retirement: u64,
    pub call_price_reprice: u64,
    pub feed_backing_cleanup: u64,
    pub call_price_freeze: u64,
    pub max_supply_clamp: u64,
    pub supply_repair: u64,
    /// Balance row removed by the supply-repair transform.
    pub supply_repair_balance: Option<(AccountId, AssetId)>,
    pub ticket_value_reset: u64,
    pub disabled_bid_sweep: u64,
    pub call_order_rematch: u64,
    pub voting_power_decay: u64,
    pub ticket_voting: u64,
    pub feed_expiry_cleanup: u64,
    pub bid_debt_cap: u64,
    pub revival_uses_initial_ratio: u64,
    pub negative_worker_votes_retirement: u64,
}

impl UpgradeSchedule {
    /// Every upgrade already active at time zero.
    pub fn all_active() -> Self {
        Self {
            annual_member_retirement: 0,
            call_price_reprice: 0,
            feed_backing_cleanup: 0,
            call_price_freeze: 0,
            max_supply_clamp: 0,
            supply_repair: 0,
            supply_repair_balance: None,
            ticket_value_reset: 0,
            disabled_bid_sweep: 0,
            call_order_rematch: 0,
            voting_power_decay: 0,
            ticket_voting: 0,
            feed_expiry_cleanup: 0,
            bid_debt_cap: 0,
            revival_uses_initial_ratio: 0,
            negative_worker_votes_retirement: 0,
        }
    }

    /// No upgrade ever activates; the chain runs under the launch-day
    /// rules. Useful as a test baseline.
    pub fn never() -> Self {
        Self {
            annual_member_retirement: u64::MAX,
            call_price_reprice: u64::MAX,
            feed_backing_cleanup: u64::MAX,
            call_price_freeze: u64::MAX,
            max_supply_clamp: u64::MAX,
            supply_repair: u64::MAX,
            supply_repair_balance: None,
            ticket_value_reset: u64::MAX,
            disabled_bid_sweep: u64::MAX,
            call_order_rematch: u64::MAX,
            voting_power_decay: u64::MAX,
            ticket_voting: u64::MAX,
            feed_expiry_cleanup: u64::MAX,
            bid_debt_cap: u64::MAX,
            revival_uses_initial_ratio: u64::MAX,
            negative_worker_votes_retirement: u64::MAX,
        }
    }
}

/// Process-wide immutable properties, written once at genesis.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChainProperties {
    pub immutable: ImmutableChainParameters,
    pub upgrades: UpgradeSchedule,
    /// When set, maintenance refreshes cached vote totals on standby
    /// candidates too, not only on the selected sets.
    pub track_standby_votes: bool,
}

/// Process-wide governance state, mutated only by the maintenance driver.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GlobalProperties {
    pub parameters: ChainParameters,
    pub pending_parameters: Option<ChainParameters>,
    /// Selection order is preserved: the producer schedule relies on it.
    pub active_producers: Vec<ProducerId>,
    /// Kept sorted by id.
    pub active_committee: Vec<CommitteeMemberId>,
    /// Next tally offset to allocate to a vote choice.
    pub next_vote_offset: u32,
}

/// Fast-changing process-wide state.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DynamicGlobalProperties {
    pub head_block_num: u64,
    pub head_block_time: u64,
    pub next_maintenance_time: u64,
    pub last_budget_time: u64,
    pub last_vote_tally_time: u64,
    /// Producer subsidy allocated last budget but not yet paid out per
    /// block; burned back into the next budget's reserve.
    pub unused_producer_budget: u64,
    pub accounts_registered_this_interval: u32,
    /// Chain-wide proof-of-burn and inactive-ticket aggregates; a
    /// non-zero value activates the proof-of-burn voting rules.
    pub total_pob: u64,
    pub total_inactive: u64,
}

/// Header fields of the block that triggered maintenance.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp: u64,
}

/// Ledger of one budget step, persisted per maintenance run.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BudgetRecord {
    pub time: u64,
    pub time_since_last_budget: u64,
    pub from_initial_reserve: u64,
    pub from_accumulated_fees: u64,
    pub from_unused_producer_budget: u64,
    pub requested_producer_budget: u64,
    pub total_budget: u64,
    pub producer_budget: u64,
    pub worker_budget: u64,
    pub leftover_worker_funds: u64,
    pub supply_delta: i64,
    pub max_supply: u64,
    pub current_supply: u64,
}

/// Synthetic operation appended to the block's applied-operations stream
/// so off-transaction state changes replay deterministically.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum VirtualOperation {
    FbaDistribution {
        account: AccountId,
        fba: FbaId,
        amount: u64,
    },
}

/// Monotonic id counters, one per object kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IdCounters {
    pub accounts: u64,
    pub assets: u64,
    pub producers: u64,
    pub committee_members: u64,
    pub workers: u64,
    pub tickets: u64,
    pub bids: u64,
    pub orders: u64,
    pub call_orders: u64,
    pub custom_authorities: u64,
    pub budget_records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_convert_round_trip_floor() {
        // 5 debt per 1 collateral
        let p = Price::new(
            AssetAmount::new(AssetId(1), 5),
            AssetAmount::new(AssetId(0), 1),
        );
        let collateral =
            p.convert(AssetAmount::new(AssetId(1), 600)).unwrap();
        assert_eq!(collateral, AssetAmount::new(AssetId(0), 120));
        let debt = p.convert(AssetAmount::new(AssetId(0), 120)).unwrap();
        assert_eq!(debt, AssetAmount::new(AssetId(1), 600));
        // Rounds down.
        let part = p.convert(AssetAmount::new(AssetId(1), 4)).unwrap();
        assert_eq!(part.amount, 0);
    }

    #[test]
    fn test_price_convert_asset_mismatch() {
        let p = Price::new(
            AssetAmount::new(AssetId(1), 5),
            AssetAmount::new(AssetId(0), 1),
        );
        assert!(matches!(
            p.convert(AssetAmount::new(AssetId(7), 1)),
            Err(PriceError::AssetMismatch)
        ));
    }

    #[test]
    fn test_call_price_ordering() {
        // 600 debt against 160 collateral at 200% is a worse (higher)
        // debt-per-collateral trigger than 400 debt against 120.
        let tight = Price::call_price(
            AssetAmount::new(AssetId(1), 600),
            AssetAmount::new(AssetId(0), 160),
            2000,
        )
        .unwrap();
        let loose = Price::call_price(
            AssetAmount::new(AssetId(1), 400),
            AssetAmount::new(AssetId(0), 120),
            2000,
        )
        .unwrap();
        assert_eq!(tight.amounts_cmp(&loose), std::cmp::Ordering::Greater);
    }

    #[test]
    fn test_median_feed_components() {
        let mk = |mcr, price_base| PriceFeed {
            settlement_price: Some(Price::new(
                AssetAmount::new(AssetId(1), price_base),
                AssetAmount::new(AssetId(0), 1),
            )),
            maintenance_collateral_ratio: mcr,
            ..PriceFeed::default()
        };
        let mut bitasset =
            BitassetData::new(AssetId(1), BitassetOptions::default());
        for (publisher, feed) in
            [(10, mk(1500, 7)), (11, mk(1800, 3)), (12, mk(1600, 5))]
        {
            bitasset.feeds.insert(
                AccountId(publisher),
                TimestampedFeed { time: 1000, feed },
            );
        }
        bitasset.update_current_feed(1000);
        let current = bitasset.current_feed;
        assert_eq!(current.maintenance_collateral_ratio, 1600);
        assert_eq!(current.settlement_price.unwrap().base.amount, 5);
    }

    #[test]
    fn test_feed_cleared_below_minimum() {
        let mut bitasset = BitassetData::new(
            AssetId(1),
            BitassetOptions {
                minimum_feeds: 2,
                ..BitassetOptions::default()
            },
        );
        bitasset.feeds.insert(
            AccountId(10),
            TimestampedFeed {
                time: 1000,
                feed: PriceFeed {
                    settlement_price: Some(Price::new(
                        AssetAmount::new(AssetId(1), 1),
                        AssetAmount::new(AssetId(0), 1),
                    )),
                    ..PriceFeed::default()
                },
            },
        );
        bitasset.update_current_feed(1000);
        assert!(bitasset.current_feed.settlement_price.is_none());
    }

    #[test]
    fn test_membership_predicates() {
        let mut account = Account {
            name: "alice".into(),
            owner: Authority::default(),
            active: Authority::default(),
            options: AccountOptions::default(),
            owner_special_authority: SpecialAuthority::None,
            active_special_authority: SpecialAuthority::None,
            membership_expiration: 0,
            num_committee_voted: 0,
            allowed_assets: None,
            top_n_control_flags: 0,
        };
        assert!(!account.is_member(100));
        account.membership_expiration = 200;
        assert!(account.is_annual_member(100));
        assert!(!account.is_annual_member(200));
        account.membership_expiration = LIFETIME_MEMBER_EXPIRATION;
        assert!(account.is_lifetime_member());
        assert!(account.is_member(u64::MAX - 1));
    }
}
