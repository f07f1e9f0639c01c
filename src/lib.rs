pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod gateway;
pub mod geolocation;
pub mod models;
pub mod nodeinfo;
pub mod output;
pub mod repository;
pub mod scheduler;
pub mod snapshot;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStore};
pub use dispatcher::ActionDispatcher;
pub use evaluator::Evaluator;
pub use gateway::{HttpRpcGateway, RpcGateway};
pub use geolocation::GeoLookupService;
pub use models::{PeerRecord, PeerSnapshot, Rule, RuleExecutionLog};
pub use repository::{RuleRepository, SqliteRuleRepository};
pub use scheduler::{CycleSummary, EvalTarget, Scheduler};
pub use snapshot::PeerSnapshotProvider;
