//! Database configuration (§6 configuration option table).

use std::path::PathBuf;
use std::time::Duration;

/// Redo durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// `fsync` every commit.
    #[default]
    Sync,
    /// Write every commit but do not force a sync.
    NoSync,
    /// Buffer writes; flush only on checkpoint.
    NoFlush,
    /// Skip the redo log entirely (caller accepts data loss on crash).
    NoRedo,
}

/// Lock upgrade rule governing whether a shared holder may attempt to
/// upgrade in place (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockUpgradeRule {
    /// A shared holder may never upgrade in place.
    #[default]
    Strict,
    /// A shared holder may upgrade iff it is the lock's only shared owner.
    Lenient,
    /// A shared holder may always attempt upgrade (may abort on conflict).
    Unchecked,
}

/// Redo terminator policy, fixed at stream-open time (§4.4, §9 open
/// questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminatorPolicy {
    /// A random per-stream token (log-file mode).
    #[default]
    RandomToken,
    /// The low 32 bits of a mix of the current `txnId` (replication mode).
    TxnIdHash,
}

/// Configuration accepted by `Database::open` (§6).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Durable-mode file location. `None` means a purely in-memory/test
    /// database.
    pub base_file_path: Option<PathBuf>,
    pub page_size: u32,
    pub min_cache_size: usize,
    pub max_cache_size: usize,
    pub durability_mode: DurabilityMode,
    pub lock_upgrade_rule: LockUpgradeRule,
    pub lock_timeout: Option<Duration>,
    pub checkpoint_rate: Duration,
    pub checkpoint_size_threshold: u64,
    pub checkpoint_delay_threshold: Duration,
    pub max_checkpoint_threads: usize,
    pub max_replica_threads: usize,
    pub encrypt_key: Option<[u8; 16]>,
    pub terminator_policy: TerminatorPolicy,
    pub cache_priming: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            base_file_path: None,
            page_size: 4096,
            min_cache_size: 1000,
            max_cache_size: 10_000,
            durability_mode: DurabilityMode::default(),
            lock_upgrade_rule: LockUpgradeRule::default(),
            lock_timeout: Some(Duration::from_secs(1)),
            checkpoint_rate: Duration::from_secs(1),
            checkpoint_size_threshold: 1024 * 1024,
            checkpoint_delay_threshold: Duration::from_secs(30),
            max_checkpoint_threads: parallelism,
            max_replica_threads: parallelism,
            encrypt_key: None,
            terminator_policy: TerminatorPolicy::default(),
            cache_priming: false,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_file_path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_lock_upgrade_rule(mut self, rule: LockUpgradeRule) -> Self {
        self.lock_upgrade_rule = rule;
        self
    }

    #[must_use]
    pub const fn with_durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_encrypt_key(mut self, key: [u8; 16]) -> Self {
        self.encrypt_key = Some(key);
        self
    }
}
