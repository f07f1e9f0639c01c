use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Peer attribute a leaf predicate can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    PingMillis,
    ProtocolVersion,
    Direction,
    Services,
    BytesSent,
    BytesReceived,
    /// Derived: now − connected_since, in seconds
    ConnectionDuration,
    Country,
    CountryCode,
}

impl Field {
    /// Whether the field resolves to a numeric value
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::PingMillis
                | Field::Services
                | Field::BytesSent
                | Field::BytesReceived
                | Field::ConnectionDuration
        )
    }
}

/// Comparison operator of a leaf predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    MatchesPrefix,
    MatchesRegex,
}

impl Operator {
    /// Whether the operator requires numeric operands
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte
        )
    }

    /// Whether the operator requires string operands
    pub fn is_string(&self) -> bool {
        matches!(self, Operator::MatchesPrefix | Operator::MatchesRegex)
    }
}

/// Leaf predicate: one `field <op> value` comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Field,
    pub op: Operator,
    pub value: Value,
}

/// Structured boolean condition over peer attributes
///
/// Loaded from serialized text in the repository and validated before use;
/// evaluation is total and must never panic even on a malformed tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionNode {
    And { children: Vec<ConditionNode> },
    Or { children: Vec<ConditionNode> },
    Not { child: Box<ConditionNode> },
    Predicate(Predicate),
}

/// What a rule does to a matched peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Ban,
    Disconnect,
    /// Record the match without touching the node
    Log,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Ban => write!(f, "ban"),
            ActionKind::Disconnect => write!(f, "disconnect"),
            ActionKind::Log => write!(f, "log"),
        }
    }
}

/// Action taken when a rule's condition matches a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    /// Ban duration in seconds; the configured default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_duration_seconds: Option<i64>,
}

/// One peer-management rule
///
/// Definitions are mutated only through the repository; within an
/// evaluation cycle the engine treats loaded rules as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub condition: ConditionNode,
    pub action: ActionSpec,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of dispatching a rule against one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionResult {
    Success,
    Failure,
    SkippedCooldown,
    InvalidRule,
}

impl ExecutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionResult::Success => "success",
            ExecutionResult::Failure => "failure",
            ExecutionResult::SkippedCooldown => "skipped-cooldown",
            ExecutionResult::InvalidRule => "invalid-rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionResult::Success),
            "failure" => Some(ExecutionResult::Failure),
            "skipped-cooldown" => Some(ExecutionResult::SkippedCooldown),
            "invalid-rule" => Some(ExecutionResult::InvalidRule),
            _ => None,
        }
    }
}

/// Append-only record of one rule execution against one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecutionLog {
    pub rule_id: i64,
    pub triggered_at: i64,
    pub peer_address: String,
    pub peer_summary: String,
    pub action_taken: ActionKind,
    pub result: ExecutionResult,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_tree_round_trips_through_json() {
        let text = r#"{
            "type": "and",
            "children": [
                { "type": "predicate", "field": "ping_millis", "op": "gt", "value": 100 },
                { "type": "predicate", "field": "country_code", "op": "eq", "value": "DE" }
            ]
        }"#;
        let node: ConditionNode = serde_json::from_str(text).unwrap();
        match &node {
            ConditionNode::And { children } => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
        let back = serde_json::to_string(&node).unwrap();
        let reparsed: ConditionNode = serde_json::from_str(&back).unwrap();
        assert!(matches!(reparsed, ConditionNode::And { .. }));
    }

    #[test]
    fn test_malformed_condition_text_is_an_error() {
        let result: Result<ConditionNode, _> =
            serde_json::from_value(json!({ "type": "xor", "children": [] }));
        assert!(result.is_err());
    }

    #[test]
    fn test_execution_result_string_round_trip() {
        for r in [
            ExecutionResult::Success,
            ExecutionResult::Failure,
            ExecutionResult::SkippedCooldown,
            ExecutionResult::InvalidRule,
        ] {
            assert_eq!(ExecutionResult::parse(r.as_str()), Some(r));
        }
        assert_eq!(ExecutionResult::parse("bogus"), None);
    }

    #[test]
    fn test_action_spec_ban_duration_optional() {
        let spec: ActionSpec = serde_json::from_value(json!({ "kind": "disconnect" })).unwrap();
        assert_eq!(spec.kind, ActionKind::Disconnect);
        assert!(spec.ban_duration_seconds.is_none());
    }
}
