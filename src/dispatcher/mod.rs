//! Action dispatch for matched rules
//!
//! Given a (rule, peer) pair whose condition matched, the dispatcher checks
//! the execution history for a recent success within the cool-down window,
//! and only then performs the rule's action against the node. Every
//! dispatch, including skips and failures, leaves an append-only log entry;
//! a gateway failure here never aborts the rest of the cycle.

use serde_json::json;
use std::sync::Arc;

use crate::gateway::{methods, RpcGateway};
use crate::models::{ActionKind, ExecutionResult, PeerRecord, Rule, RuleExecutionLog};
use crate::output::AuditQueue;
use crate::repository::RuleRepository;

/// Executes rule actions against the node and records their outcomes
pub struct ActionDispatcher {
    gateway: Arc<dyn RpcGateway>,
    repository: Arc<dyn RuleRepository>,
    audit: Option<AuditQueue>,
    /// Minimum seconds between repeated actions of one rule on one peer
    cooldown_seconds: i64,
    /// Ban duration applied when the rule does not specify one
    default_ban_seconds: i64,
}

impl ActionDispatcher {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        repository: Arc<dyn RuleRepository>,
        cooldown_seconds: i64,
        default_ban_seconds: i64,
    ) -> Self {
        ActionDispatcher {
            gateway,
            repository,
            audit: None,
            cooldown_seconds,
            default_ban_seconds,
        }
    }

    /// Also stream every log entry to the audit writer
    pub fn with_audit(mut self, audit: AuditQueue) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Dispatch a matched rule against one peer
    ///
    /// Returns the log entry describing what happened. The entry is also
    /// appended to the repository; an append failure is logged and does not
    /// change the returned outcome.
    pub async fn dispatch(&self, rule: &Rule, peer: &PeerRecord, now: i64) -> RuleExecutionLog {
        let mut entry = RuleExecutionLog {
            rule_id: rule.id,
            triggered_at: now,
            peer_address: peer.addr.clone(),
            peer_summary: peer.summary(),
            action_taken: rule.action.kind,
            result: ExecutionResult::Success,
            message: String::new(),
        };

        if self.in_cooldown(rule, peer, now) {
            entry.result = ExecutionResult::SkippedCooldown;
            entry.message = format!(
                "already acted on within the last {}s",
                self.cooldown_seconds
            );
            log::debug!(
                "Rule '{}' vs {}: skipped (cool-down)",
                rule.name,
                peer.addr
            );
            self.append(&entry);
            return entry;
        }

        match self.execute(rule, peer).await {
            Ok(message) => {
                entry.message = message;
                log::info!(
                    "Rule '{}' matched {}: {} succeeded",
                    rule.name,
                    peer.addr,
                    rule.action.kind
                );
            }
            Err(message) => {
                entry.result = ExecutionResult::Failure;
                entry.message = message;
                log::error!(
                    "Rule '{}' matched {}: {} failed: {}",
                    rule.name,
                    peer.addr,
                    rule.action.kind,
                    entry.message
                );
            }
        }

        self.append(&entry);
        entry
    }

    /// Best-effort cool-down check; a repository error counts as no history
    fn in_cooldown(&self, rule: &Rule, peer: &PeerRecord, now: i64) -> bool {
        let since = now - self.cooldown_seconds;
        match self
            .repository
            .find_recent_success(rule.id, &peer.addr, since)
        {
            Ok(hit) => hit.is_some(),
            Err(e) => {
                log::warn!("Cool-down lookup failed, proceeding anyway: {}", e);
                false
            }
        }
    }

    /// Perform the rule's action through the gateway
    async fn execute(&self, rule: &Rule, peer: &PeerRecord) -> Result<String, String> {
        match rule.action.kind {
            ActionKind::Ban => {
                let duration = rule
                    .action
                    .ban_duration_seconds
                    .unwrap_or(self.default_ban_seconds);
                // The node bans by network address, without the port
                let params = json!([peer.ip(), "add", duration]);
                self.gateway
                    .call(methods::BAN_ADDRESS, params)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("banned {} for {}s", peer.ip(), duration))
            }
            ActionKind::Disconnect => {
                self.gateway
                    .call(methods::DISCONNECT_PEER, json!([peer.addr]))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!("disconnected {}", peer.addr))
            }
            ActionKind::Log => Ok("matched (log only)".to_string()),
        }
    }

    fn append(&self, entry: &RuleExecutionLog) {
        if let Err(e) = self.repository.append_log(entry) {
            log::error!(
                "Failed to append execution log for rule {}: {}",
                entry.rule_id,
                e
            );
        }
        if let Some(ref audit) = self.audit {
            audit.push(entry.clone());
        }
    }
}
