//! Durable storage for rule definitions and execution logs
//!
//! The engine only ever loads rules and appends logs; rule definitions are
//! created and edited by the surrounding console through the same trait.

pub mod sqlite_store;

pub use sqlite_store::SqliteRuleRepository;

use thiserror::Error;

use crate::models::{ActionSpec, ConditionNode, Rule, RuleExecutionLog};

/// Errors that can occur during repository operations
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("No rule with id {0}")]
    NotFound(i64),
}

/// Storage backend for rules and execution logs
///
/// Implementations must be safe for concurrent access; log appends are
/// transactional on the backend's side, and cool-down lookups are
/// best-effort with respect to logs written in the same cycle.
pub trait RuleRepository: Send + Sync {
    // =====================
    // Rule definitions
    // =====================

    /// All rules, active and inactive, in stored order
    fn list_rules(&self) -> Result<Vec<Rule>, RepositoryError>;

    /// Rules eligible for evaluation, in stored order
    fn load_active_rules(&self) -> Result<Vec<Rule>, RepositoryError>;

    /// One rule by id
    fn get_rule(&self, id: i64) -> Result<Rule, RepositoryError>;

    /// Persist a new rule and return it with its assigned id
    fn save_rule(
        &self,
        name: &str,
        condition: &ConditionNode,
        action: &ActionSpec,
        is_active: bool,
    ) -> Result<Rule, RepositoryError>;

    /// Enable or disable a rule
    fn set_rule_active(&self, id: i64, is_active: bool) -> Result<(), RepositoryError>;

    /// Remove a rule definition (its logs are kept)
    fn delete_rule(&self, id: i64) -> Result<(), RepositoryError>;

    // =====================
    // Execution logs
    // =====================

    /// Append one execution log entry
    fn append_log(&self, entry: &RuleExecutionLog) -> Result<(), RepositoryError>;

    /// Most recent successful execution of `rule_id` against `peer_address`
    /// at or after `since`, if any; drives the cool-down check
    fn find_recent_success(
        &self,
        rule_id: i64,
        peer_address: &str,
        since: i64,
    ) -> Result<Option<RuleExecutionLog>, RepositoryError>;

    /// Most recent log entries, newest first
    fn recent_logs(&self, limit: usize) -> Result<Vec<RuleExecutionLog>, RepositoryError>;

    /// Remove log entries older than the given timestamp, bounding growth
    fn prune_logs(&self, before: i64) -> Result<usize, RepositoryError>;
}
