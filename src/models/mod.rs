pub mod peer;
pub mod rule;

pub use peer::{Direction, GeolocationRecord, PeerRecord, PeerSnapshot};
pub use rule::{
    ActionKind, ActionSpec, ConditionNode, ExecutionResult, Field, Operator, Predicate, Rule,
    RuleExecutionLog,
};
