//! Evaluation cycle orchestration
//!
//! A cycle takes one peer snapshot and one load of the active rules, then
//! runs every rule against every peer in stored rule order. Cycles are
//! driven by a periodic tick or triggered on demand; a tick that arrives
//! while a full cycle is still running is skipped (never queued), while an
//! on-demand run of a single rule may proceed concurrently since it works
//! on its own snapshot and only its own rule's logs.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::dispatcher::ActionDispatcher;
use crate::evaluator::Evaluator;
use crate::models::{ActionKind, ExecutionResult, PeerSnapshot, Rule, RuleExecutionLog};
use crate::repository::{RepositoryError, RuleRepository};
use crate::snapshot::{PeerSnapshotProvider, SnapshotError};

/// What an evaluation run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalTarget {
    /// Every active rule
    All,
    /// One rule by id, active or not
    Rule(i64),
}

/// Outcome of one evaluation cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub rules_evaluated: usize,
    pub peers_scanned: usize,
    pub actions_taken: usize,
    pub duration_ms: u64,
}

/// Errors that abort a cycle (never the scheduler itself)
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("a full evaluation cycle is already running")]
    Overlap,

    #[error("snapshot unavailable: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("rule load failed: {0}")]
    Rules(#[from] RepositoryError),
}

/// Releases the overlap guard when a full cycle ends, even on early return
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives evaluation cycles over the snapshot provider, evaluator and
/// dispatcher
pub struct Scheduler {
    provider: PeerSnapshotProvider,
    repository: Arc<dyn RuleRepository>,
    evaluator: Evaluator,
    dispatcher: ActionDispatcher,
    tick_interval: Duration,
    /// True while a full (all-rules) cycle is in flight
    full_cycle_running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        provider: PeerSnapshotProvider,
        repository: Arc<dyn RuleRepository>,
        dispatcher: ActionDispatcher,
        tick_interval_seconds: u64,
    ) -> Self {
        Scheduler {
            provider,
            repository,
            evaluator: Evaluator::new(),
            dispatcher,
            tick_interval: Duration::from_secs(tick_interval_seconds),
            full_cycle_running: AtomicBool::new(false),
        }
    }

    /// The current peer snapshot, for callers outside the engine
    pub async fn snapshot(&self, use_cache: bool) -> Result<PeerSnapshot, SnapshotError> {
        self.provider.current(use_cache).await
    }

    /// Run one evaluation cycle now
    ///
    /// An all-rules run takes the overlap guard and fails with
    /// [`CycleError::Overlap`] if another all-rules run is in flight. A
    /// single-rule run never takes the guard.
    pub async fn trigger(&self, target: EvalTarget) -> Result<CycleSummary, CycleError> {
        match target {
            EvalTarget::All => {
                if self
                    .full_cycle_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Err(CycleError::Overlap);
                }
                let _guard = RunningGuard(&self.full_cycle_running);
                self.run_cycle(target).await
            }
            EvalTarget::Rule(_) => self.run_cycle(target).await,
        }
    }

    /// One full pass: snapshot once, load rules once, evaluate every pair
    async fn run_cycle(&self, target: EvalTarget) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        let now = chrono::Utc::now().timestamp();

        let snapshot = self.provider.current(true).await?;
        let rules = self.load_rules(target)?;

        let mut actions_taken = 0usize;
        for rule in &rules {
            if let Err(e) = self.evaluator.validate(&rule.condition) {
                log::warn!("Rule '{}' is invalid this cycle: {}", rule.name, e);
                self.record_invalid(rule, now, &e.to_string());
                continue;
            }

            for peer in &snapshot.peers {
                if !self.evaluator.evaluate(&rule.condition, peer, now) {
                    continue;
                }
                let entry = self.dispatcher.dispatch(rule, peer, now).await;
                if entry.result == ExecutionResult::Success {
                    actions_taken += 1;
                }
            }
        }

        let summary = CycleSummary {
            rules_evaluated: rules.len(),
            peers_scanned: snapshot.len(),
            actions_taken,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "Cycle done: {} rule(s) x {} peer(s), {} action(s), {}ms{}",
            summary.rules_evaluated,
            summary.peers_scanned,
            summary.actions_taken,
            summary.duration_ms,
            if snapshot.is_fallback {
                " [fallback data]"
            } else {
                ""
            }
        );
        Ok(summary)
    }

    fn load_rules(&self, target: EvalTarget) -> Result<Vec<Rule>, RepositoryError> {
        match target {
            EvalTarget::All => self.repository.load_active_rules(),
            EvalTarget::Rule(id) => Ok(vec![self.repository.get_rule(id)?]),
        }
    }

    /// One invalid-rule entry per rule per cycle, not one per peer
    fn record_invalid(&self, rule: &Rule, now: i64, message: &str) {
        let entry = RuleExecutionLog {
            rule_id: rule.id,
            triggered_at: now,
            peer_address: "-".to_string(),
            peer_summary: String::new(),
            action_taken: ActionKind::Log,
            result: ExecutionResult::InvalidRule,
            message: message.to_string(),
        };
        if let Err(e) = self.repository.append_log(&entry) {
            log::error!("Failed to record invalid rule {}: {}", rule.id, e);
        }
    }

    /// Periodic control loop; runs until the shutdown flag is set
    ///
    /// Polls the flag between short sleeps so shutdown stays responsive
    /// even with a long tick interval. Cycle errors are logged and the
    /// loop keeps going; a failed cycle never takes down the daemon.
    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>) {
        log::info!(
            "Scheduler started (tick every {}s)",
            self.tick_interval.as_secs()
        );
        let mut next_cycle = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            if Instant::now() >= next_cycle {
                next_cycle = Instant::now() + self.tick_interval;
                match self.trigger(EvalTarget::All).await {
                    Ok(_) => {}
                    Err(CycleError::Overlap) => {
                        log::debug!("Tick skipped, previous cycle still running")
                    }
                    Err(e) => log::error!("Cycle failed: {}", e),
                }
                // Keys for departed peers and old blocks go with the tick
                self.provider.prune_cache(chrono::Utc::now().timestamp());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        log::info!("Scheduler stopped");
    }
}
