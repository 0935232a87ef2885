//! Reward accounting for a validator smoothing pool.
//!
//! The crate holds no I/O of its own: chain access goes through
//! [`provider::ChainDataProvider`] and root publication through
//! [`provider::ContractSubmitter`], so every instance fed the same chain data
//! ends up with the same ledger and the same merkle root.

pub mod checkpoint;
pub mod claims;
pub mod classifier;
pub mod config;
pub mod error;
pub mod merkle;
pub mod orchestrator;
pub mod provider;
pub mod state;
pub mod state_machine;
pub mod types;

pub use checkpoint::{OnchainState, RawLeaf, TreeOutcome, generate_tree_from_state};
pub use claims::{ClaimInfo, query_claim};
pub use config::OracleConfig;
pub use error::{OracleError, OracleResult};
pub use orchestrator::{Orchestrator, ProposalOutcome, SlotReport};
pub use provider::{ChainDataProvider, ClaimedBalanceReader, ContractSubmitter};
pub use state::OracleState;
pub use types::{EligibilityPolicy, ValidatorStatus};
