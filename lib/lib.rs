//! Meridian chain core: the typed state store and periodic
//! chain-maintenance engine of a delegated-proof-of-stake chain with
//! market-issued collateralized assets.
//!
//! The entry point is [`state::State::perform_maintenance`], invoked by
//! the block applier inside its write transaction whenever a block
//! crosses the scheduled maintenance time.

pub mod math;
pub mod state;
pub mod types;

pub use state::{Error, GenesisConfig, State};
