//! Condition evaluation for peer-management rules
//!
//! A rule's condition is a small fixed-depth tree of AND/OR/NOT combinators
//! over leaf predicates on peer attributes. Trees are validated structurally
//! before use; evaluation itself is total and side-effect-free: an absent
//! field or a type mismatch makes the predicate false, never an error, so a
//! malformed peer can never take down a cycle.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::models::{ConditionNode, Field, Operator, PeerRecord, Predicate};

/// Maximum nesting depth of a condition tree
pub const MAX_DEPTH: usize = 8;

/// Structural problems in a condition tree
#[derive(Error, Debug)]
pub enum InvalidRuleError {
    #[error("condition tree deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("combinator with no children")]
    EmptyCombinator,

    #[error("operator {op:?} is not applicable to field {field:?}")]
    OperatorMismatch { field: Field, op: Operator },

    #[error("comparison value {value} has the wrong type for field {field:?}")]
    ValueTypeMismatch { field: Field, value: Value },

    #[error("invalid regex '{pattern}': {message}")]
    BadRegex { pattern: String, message: String },
}

/// A peer attribute resolved for comparison
///
/// Integer counters keep their full width: a 64-bit services mask must not
/// round through f64 on its way to an equality check.
enum FieldValue {
    Int(u64),
    Num(f64),
    Str(String),
}

/// Validates and evaluates rule conditions
///
/// Holds a cache of compiled regexes so a pattern is compiled once per
/// process, not once per (rule, peer) pairing.
pub struct Evaluator {
    regex_cache: Mutex<HashMap<String, Regex>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Check a condition tree structurally
    ///
    /// The same check runs before a rule is persisted and again before each
    /// cycle uses it, so a malformed tree that slipped into storage is
    /// reported as invalid instead of evaluated.
    pub fn validate(&self, node: &ConditionNode) -> Result<(), InvalidRuleError> {
        self.validate_at(node, 0)
    }

    fn validate_at(&self, node: &ConditionNode, depth: usize) -> Result<(), InvalidRuleError> {
        if depth >= MAX_DEPTH {
            return Err(InvalidRuleError::TooDeep);
        }
        match node {
            ConditionNode::And { children } | ConditionNode::Or { children } => {
                if children.is_empty() {
                    return Err(InvalidRuleError::EmptyCombinator);
                }
                for child in children {
                    self.validate_at(child, depth + 1)?;
                }
                Ok(())
            }
            ConditionNode::Not { child } => self.validate_at(child, depth + 1),
            ConditionNode::Predicate(p) => self.validate_predicate(p),
        }
    }

    fn validate_predicate(&self, p: &Predicate) -> Result<(), InvalidRuleError> {
        if p.op.is_numeric() && !p.field.is_numeric() {
            return Err(InvalidRuleError::OperatorMismatch {
                field: p.field,
                op: p.op,
            });
        }
        if p.op.is_string() && p.field.is_numeric() {
            return Err(InvalidRuleError::OperatorMismatch {
                field: p.field,
                op: p.op,
            });
        }

        let value_matches = if p.op.is_string() {
            p.value.is_string()
        } else if p.op.is_numeric() {
            p.value.is_number()
        } else {
            // eq/neq: the value kind must match the field kind
            if p.field.is_numeric() {
                p.value.is_number()
            } else {
                p.value.is_string()
            }
        };
        if !value_matches {
            return Err(InvalidRuleError::ValueTypeMismatch {
                field: p.field,
                value: p.value.clone(),
            });
        }

        if p.op == Operator::MatchesRegex {
            if let Some(pattern) = p.value.as_str() {
                self.compiled(pattern)
                    .map_err(|message| InvalidRuleError::BadRegex {
                        pattern: pattern.to_string(),
                        message,
                    })?;
            }
        }
        Ok(())
    }

    /// Evaluate a condition tree against one peer
    ///
    /// Total: always yields a boolean. Combinators short-circuit, but since
    /// predicates have no side effects that is purely an optimization.
    pub fn evaluate(&self, node: &ConditionNode, peer: &PeerRecord, now: i64) -> bool {
        match node {
            ConditionNode::And { children } => {
                children.iter().all(|c| self.evaluate(c, peer, now))
            }
            ConditionNode::Or { children } => {
                children.iter().any(|c| self.evaluate(c, peer, now))
            }
            ConditionNode::Not { child } => !self.evaluate(child, peer, now),
            ConditionNode::Predicate(p) => self.evaluate_predicate(p, peer, now),
        }
    }

    fn evaluate_predicate(&self, p: &Predicate, peer: &PeerRecord, now: i64) -> bool {
        let field_value = match resolve(p.field, peer, now) {
            Some(v) => v,
            // Absent attribute (e.g. geolocation unresolved): never a match
            None => return false,
        };

        match field_value {
            // Integer against integer compares in integer space; only a
            // fractional comparison value drops to f64
            FieldValue::Int(actual) => {
                if let Some(expected) = p.value.as_u64() {
                    numeric_predicate(p, actual, expected)
                } else if let Some(expected) = p.value.as_f64() {
                    numeric_predicate(p, actual as f64, expected)
                } else {
                    log::warn!(
                        "Type mismatch: field {:?} is numeric but value is {}",
                        p.field,
                        p.value
                    );
                    false
                }
            }
            FieldValue::Num(actual) => match p.value.as_f64() {
                Some(expected) => numeric_predicate(p, actual, expected),
                None => {
                    log::warn!(
                        "Type mismatch: field {:?} is numeric but value is {}",
                        p.field,
                        p.value
                    );
                    false
                }
            },
            FieldValue::Str(actual) => {
                let expected = match p.value.as_str() {
                    Some(s) => s,
                    None => {
                        log::warn!(
                            "Type mismatch: field {:?} is a string but value is {}",
                            p.field,
                            p.value
                        );
                        return false;
                    }
                };
                match p.op {
                    Operator::Eq => actual == expected,
                    Operator::Neq => actual != expected,
                    Operator::MatchesPrefix => actual.starts_with(expected),
                    Operator::MatchesRegex => match self.compiled(expected) {
                        Ok(re) => re.is_match(&actual),
                        Err(message) => {
                            log::warn!("Skipping unusable regex '{}': {}", expected, message);
                            false
                        }
                    },
                    other => {
                        log::warn!(
                            "Operator {:?} is not applicable to string field {:?}",
                            other,
                            p.field
                        );
                        false
                    }
                }
            }
        }
    }

    /// Compile a regex through the cache
    fn compiled(&self, pattern: &str) -> Result<Regex, String> {
        let mut cache = self.regex_cache.lock().unwrap();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| e.to_string())?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply an ordering operator; non-numeric operators never match
fn numeric_predicate<T: PartialOrd>(p: &Predicate, actual: T, expected: T) -> bool {
    match p.op {
        Operator::Eq => actual == expected,
        Operator::Neq => actual != expected,
        Operator::Lt => actual < expected,
        Operator::Lte => actual <= expected,
        Operator::Gt => actual > expected,
        Operator::Gte => actual >= expected,
        other => {
            log::warn!(
                "Operator {:?} is not applicable to numeric field {:?}",
                other,
                p.field
            );
            false
        }
    }
}

/// Resolve a predicate field on a peer; None means the attribute is absent
fn resolve(field: Field, peer: &PeerRecord, now: i64) -> Option<FieldValue> {
    match field {
        Field::PingMillis => peer.ping_millis.map(FieldValue::Num),
        Field::ProtocolVersion => Some(FieldValue::Str(peer.protocol_version.clone())),
        Field::Direction => Some(FieldValue::Str(peer.direction.to_string())),
        Field::Services => Some(FieldValue::Int(peer.services)),
        Field::BytesSent => Some(FieldValue::Int(peer.bytes_sent)),
        Field::BytesReceived => Some(FieldValue::Int(peer.bytes_received)),
        Field::ConnectionDuration => Some(FieldValue::Int(peer.connection_duration(now) as u64)),
        Field::Country => peer
            .geo
            .as_ref()
            .map(|g| FieldValue::Str(g.country.clone())),
        Field::CountryCode => peer
            .geo
            .as_ref()
            .map(|g| FieldValue::Str(g.country_code.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, GeolocationRecord};
    use serde_json::json;

    const NOW: i64 = 1_700_100_000;

    fn peer() -> PeerRecord {
        PeerRecord {
            addr: "203.0.113.5:8333".to_string(),
            direction: Direction::Inbound,
            protocol_version: "/Satoshi:25.0.0/".to_string(),
            services: 1033,
            ping_millis: Some(150.0),
            bytes_sent: 10_000,
            bytes_received: 20_000,
            connected_since: NOW - 600,
            geo: None,
        }
    }

    fn peer_with_geo(country: &str, code: &str) -> PeerRecord {
        let mut p = peer();
        p.geo = Some(GeolocationRecord {
            ip: "203.0.113.5".to_string(),
            country: country.to_string(),
            country_code: code.to_string(),
            region: String::new(),
            city: String::new(),
            lat: 0.0,
            lon: 0.0,
            isp: String::new(),
            as_org: String::new(),
            fetched_at: NOW,
        });
        p
    }

    fn pred(field: Field, op: Operator, value: Value) -> ConditionNode {
        ConditionNode::Predicate(Predicate { field, op, value })
    }

    #[test]
    fn test_numeric_comparisons() {
        let e = Evaluator::new();
        let p = peer();
        assert!(e.evaluate(&pred(Field::PingMillis, Operator::Gt, json!(100)), &p, NOW));
        assert!(!e.evaluate(&pred(Field::PingMillis, Operator::Gt, json!(200)), &p, NOW));
        assert!(e.evaluate(&pred(Field::PingMillis, Operator::Lte, json!(150)), &p, NOW));
        assert!(e.evaluate(&pred(Field::BytesSent, Operator::Eq, json!(10_000)), &p, NOW));
        assert!(e.evaluate(&pred(Field::Services, Operator::Neq, json!(0)), &p, NOW));
    }

    #[test]
    fn test_full_width_services_mask_compares_exactly() {
        let e = Evaluator::new();
        let mut p = peer();
        // Adjacent values above 2^53 collapse to the same f64
        p.services = (1u64 << 62) | 1;
        assert!(e.evaluate(
            &pred(Field::Services, Operator::Eq, json!((1u64 << 62) | 1)),
            &p,
            NOW
        ));
        assert!(!e.evaluate(
            &pred(Field::Services, Operator::Eq, json!(1u64 << 62)),
            &p,
            NOW
        ));
        assert!(e.evaluate(
            &pred(Field::Services, Operator::Neq, json!(1u64 << 62)),
            &p,
            NOW
        ));
    }

    #[test]
    fn test_fractional_comparison_value_still_works_on_counters() {
        let e = Evaluator::new();
        let p = peer(); // bytes_sent = 10_000
        assert!(e.evaluate(&pred(Field::BytesSent, Operator::Gt, json!(9999.5)), &p, NOW));
        assert!(!e.evaluate(&pred(Field::BytesSent, Operator::Gt, json!(10000.5)), &p, NOW));
    }

    #[test]
    fn test_connection_duration_is_derived() {
        let e = Evaluator::new();
        let p = peer();
        assert!(e.evaluate(
            &pred(Field::ConnectionDuration, Operator::Gte, json!(600)),
            &p,
            NOW
        ));
        assert!(!e.evaluate(
            &pred(Field::ConnectionDuration, Operator::Gt, json!(600)),
            &p,
            NOW
        ));
    }

    #[test]
    fn test_string_operators() {
        let e = Evaluator::new();
        let p = peer();
        assert!(e.evaluate(
            &pred(Field::ProtocolVersion, Operator::MatchesPrefix, json!("/Satoshi:")),
            &p,
            NOW
        ));
        assert!(e.evaluate(
            &pred(Field::ProtocolVersion, Operator::MatchesRegex, json!(r"Satoshi:2[45]\.")),
            &p,
            NOW
        ));
        assert!(e.evaluate(&pred(Field::Direction, Operator::Eq, json!("inbound")), &p, NOW));
        assert!(!e.evaluate(&pred(Field::Direction, Operator::Eq, json!("outbound")), &p, NOW));
    }

    #[test]
    fn test_absent_field_is_false_never_an_error() {
        let e = Evaluator::new();
        let mut p = peer();
        p.ping_millis = None;
        assert!(!e.evaluate(&pred(Field::PingMillis, Operator::Gt, json!(0)), &p, NOW));
        // No geolocation resolved: country predicates are false
        assert!(!e.evaluate(&pred(Field::Country, Operator::Eq, json!("Germany")), &p, NOW));
        assert!(!e.evaluate(&pred(Field::CountryCode, Operator::Neq, json!("DE")), &p, NOW));
    }

    #[test]
    fn test_type_mismatch_is_false_not_fatal() {
        let e = Evaluator::new();
        let p = peer();
        assert!(!e.evaluate(&pred(Field::PingMillis, Operator::Gt, json!("fast")), &p, NOW));
        assert!(!e.evaluate(&pred(Field::Direction, Operator::Eq, json!(1)), &p, NOW));
    }

    #[test]
    fn test_combinators_and_not() {
        let e = Evaluator::new();
        let p = peer_with_geo("Germany", "DE");

        let both = ConditionNode::And {
            children: vec![
                pred(Field::PingMillis, Operator::Gt, json!(100)),
                pred(Field::CountryCode, Operator::Eq, json!("DE")),
            ],
        };
        assert!(e.evaluate(&both, &p, NOW));

        let either = ConditionNode::Or {
            children: vec![
                pred(Field::PingMillis, Operator::Gt, json!(1_000_000)),
                pred(Field::CountryCode, Operator::Eq, json!("DE")),
            ],
        };
        assert!(e.evaluate(&either, &p, NOW));

        let negated = ConditionNode::Not {
            child: Box::new(pred(Field::CountryCode, Operator::Eq, json!("DE"))),
        };
        assert!(!e.evaluate(&negated, &p, NOW));
    }

    #[test]
    fn test_and_with_unresolved_geo_is_false_regardless_of_ping() {
        let e = Evaluator::new();
        let p = peer(); // ping 150, no geolocation
        let tree = ConditionNode::And {
            children: vec![
                pred(Field::PingMillis, Operator::Gt, json!(100)),
                pred(Field::Country, Operator::Eq, json!("DE")),
            ],
        };
        assert!(!e.evaluate(&tree, &p, NOW));
    }

    #[test]
    fn test_validate_accepts_well_formed_tree() {
        let e = Evaluator::new();
        let tree = ConditionNode::And {
            children: vec![
                pred(Field::PingMillis, Operator::Gt, json!(100)),
                ConditionNode::Not {
                    child: Box::new(pred(Field::Direction, Operator::Eq, json!("outbound"))),
                },
            ],
        };
        assert!(e.validate(&tree).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_combinator() {
        let e = Evaluator::new();
        assert!(matches!(
            e.validate(&ConditionNode::Or { children: vec![] }),
            Err(InvalidRuleError::EmptyCombinator)
        ));
    }

    #[test]
    fn test_validate_rejects_numeric_op_on_string_field() {
        let e = Evaluator::new();
        assert!(matches!(
            e.validate(&pred(Field::ProtocolVersion, Operator::Gt, json!("x"))),
            Err(InvalidRuleError::OperatorMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_string_op_on_numeric_field() {
        let e = Evaluator::new();
        assert!(matches!(
            e.validate(&pred(Field::BytesSent, Operator::MatchesPrefix, json!("1"))),
            Err(InvalidRuleError::OperatorMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_value_type() {
        let e = Evaluator::new();
        assert!(matches!(
            e.validate(&pred(Field::PingMillis, Operator::Gt, json!("slow"))),
            Err(InvalidRuleError::ValueTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let e = Evaluator::new();
        assert!(matches!(
            e.validate(&pred(Field::ProtocolVersion, Operator::MatchesRegex, json!("("))),
            Err(InvalidRuleError::BadRegex { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_excessive_depth() {
        let e = Evaluator::new();
        let mut tree = pred(Field::PingMillis, Operator::Gt, json!(1));
        for _ in 0..MAX_DEPTH {
            tree = ConditionNode::Not { child: Box::new(tree) };
        }
        assert!(matches!(e.validate(&tree), Err(InvalidRuleError::TooDeep)));
    }

    #[test]
    fn test_runtime_evaluation_of_invalid_tree_does_not_panic() {
        let e = Evaluator::new();
        let p = peer();
        // Bad regex reached at runtime: predicate is false, nothing panics
        let tree = pred(Field::ProtocolVersion, Operator::MatchesRegex, json!("("));
        assert!(!e.evaluate(&tree, &p, NOW));
    }
}
