//! State errors

use sneed::{db::error as db, env::error as env, rwtxn::error as rwtxn};
use thiserror::Error;
use transitive::Transitive;

use crate::{
    math::fixed::FixedPointError,
    types::{
        AccountId, AssetId, BidId, CallOrderId, CommitteeMemberId, FbaId,
        OrderId, PriceError, ProducerId, WorkerId,
    },
};

#[derive(Debug, Error, Transitive)]
#[transitive(from(db::Clear, db::Error))]
#[transitive(from(db::Delete, db::Error))]
#[transitive(from(db::Error, sneed::Error))]
#[transitive(from(db::IterInit, db::Error))]
#[transitive(from(db::IterItem, db::Error))]
#[transitive(from(db::Last, db::Error))]
#[transitive(from(db::Put, db::Error))]
#[transitive(from(db::TryGet, db::Error))]
#[transitive(from(env::CreateDb, env::Error))]
#[transitive(from(env::Error, sneed::Error))]
#[transitive(from(env::WriteTxn, env::Error))]
#[transitive(from(rwtxn::Commit, rwtxn::Error))]
#[transitive(from(rwtxn::Error, sneed::Error))]
pub enum Error {
    #[error(transparent)]
    Db(#[from] sneed::Error),
    #[error("fee {paid} below the required fee {required}")]
    FeeBelowRequired { required: u64, paid: u64 },
    #[error(transparent)]
    FixedPoint(#[from] FixedPointError),
    #[error(
        "insufficient balance of asset {asset} for account {account}: \
         {available} available, {required} required"
    )]
    InsufficientBalance {
        account: AccountId,
        asset: AssetId,
        required: u64,
        available: u64,
    },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("account {0} doesn't exist")]
    MissingAccount(AccountId),
    #[error("statistics for account {0} don't exist")]
    MissingAccountStats(AccountId),
    #[error("asset {0} doesn't exist")]
    MissingAsset(AssetId),
    #[error("collateral bid {0} doesn't exist")]
    MissingBid(BidId),
    #[error("bitasset data for asset {0} doesn't exist")]
    MissingBitasset(AssetId),
    #[error("call order {0} doesn't exist")]
    MissingCallOrder(CallOrderId),
    #[error("committee member {0} doesn't exist")]
    MissingCommitteeMember(CommitteeMemberId),
    #[error("dynamic data for asset {0} doesn't exist")]
    MissingDynamicData(AssetId),
    #[error("FBA accumulator {0} doesn't exist")]
    MissingFba(FbaId),
    #[error("global properties not initialized; genesis was never applied")]
    MissingGlobals,
    #[error("limit order {0} doesn't exist")]
    MissingOrder(OrderId),
    #[error("producer {0} doesn't exist")]
    MissingProducer(ProducerId),
    #[error("worker {0} doesn't exist")]
    MissingWorker(WorkerId),
    #[error("account {account} is not whitelisted for asset {asset}")]
    NotWhitelisted {
        account: AccountId,
        asset: AssetId,
    },
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error("cannot sell a zero amount")]
    ZeroAmountOrder,
}
