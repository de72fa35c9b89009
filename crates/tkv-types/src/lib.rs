//! Shared ids, cancellation context, and configuration types used across
//! the storage/concurrency core crates.

pub mod config;
pub mod cx;
pub mod ids;

pub use config::{DatabaseConfig, DurabilityMode, LockUpgradeRule, TerminatorPolicy};
pub use cx::{CancelCause, Cx};
pub use ids::{CommitSeq, IndexId, PageId, TxnId};
