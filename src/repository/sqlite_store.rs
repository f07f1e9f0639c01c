//! SQLite implementation of the RuleRepository trait

use super::{RepositoryError, RuleRepository};
use crate::models::{
    ActionKind, ActionSpec, ConditionNode, ExecutionResult, Rule, RuleExecutionLog,
};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed rule and log storage
///
/// Rules and their execution history survive daemon restarts, which the
/// cool-down check depends on.
pub struct SqliteRuleRepository {
    conn: Mutex<Connection>,
}

impl SqliteRuleRepository {
    /// Open (or create) the database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, RepositoryError> {
        let conn = Connection::open(db_path)?;
        let store = SqliteRuleRepository {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteRuleRepository {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Map one rules row, parsing the stored condition text
    fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, Option<i64>, bool, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get::<_, i64>(5)? != 0,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn assemble_rule(
        (id, name, condition_json, action_kind, ban_duration, is_active, created_at, updated_at): (
            i64,
            String,
            String,
            String,
            Option<i64>,
            bool,
            i64,
            i64,
        ),
    ) -> Result<Rule, RepositoryError> {
        let condition: ConditionNode = serde_json::from_str(&condition_json).map_err(|e| {
            RepositoryError::InvalidData(format!("rule {} condition unparseable: {}", id, e))
        })?;
        let kind = parse_action_kind(&action_kind)
            .ok_or_else(|| RepositoryError::InvalidData(format!("unknown action '{}'", action_kind)))?;
        Ok(Rule {
            id,
            name,
            condition,
            action: ActionSpec {
                kind,
                ban_duration_seconds: ban_duration,
            },
            is_active,
            created_at,
            updated_at,
        })
    }

    fn query_rules(&self, sql: &str) -> Result<Vec<Rule>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], Self::rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut rules = Vec::with_capacity(rows.len());
        for raw in rows {
            match Self::assemble_rule(raw) {
                Ok(rule) => rules.push(rule),
                // A row the console managed to corrupt must not take down
                // the whole load; skip it and keep the rest evaluable.
                Err(e) => log::warn!("Skipping unloadable rule row: {}", e),
            }
        }
        Ok(rules)
    }

    fn log_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, String, String, String, String, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn assemble_log(
        (rule_id, triggered_at, peer_address, peer_summary, action, result, message): (
            i64,
            i64,
            String,
            String,
            String,
            String,
            String,
        ),
    ) -> Result<RuleExecutionLog, RepositoryError> {
        Ok(RuleExecutionLog {
            rule_id,
            triggered_at,
            peer_address,
            peer_summary,
            action_taken: parse_action_kind(&action)
                .ok_or_else(|| RepositoryError::InvalidData(format!("unknown action '{}'", action)))?,
            result: ExecutionResult::parse(&result)
                .ok_or_else(|| RepositoryError::InvalidData(format!("unknown result '{}'", result)))?,
            message,
        })
    }
}

fn action_kind_str(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Ban => "ban",
        ActionKind::Disconnect => "disconnect",
        ActionKind::Log => "log",
    }
}

fn parse_action_kind(s: &str) -> Option<ActionKind> {
    match s {
        "ban" => Some(ActionKind::Ban),
        "disconnect" => Some(ActionKind::Disconnect),
        "log" => Some(ActionKind::Log),
        _ => None,
    }
}

const RULE_COLUMNS: &str =
    "id, name, condition_json, action_kind, ban_duration_seconds, is_active, created_at, updated_at";

impl RuleRepository for SqliteRuleRepository {
    fn list_rules(&self) -> Result<Vec<Rule>, RepositoryError> {
        self.query_rules(&format!("SELECT {} FROM rules ORDER BY id", RULE_COLUMNS))
    }

    fn load_active_rules(&self) -> Result<Vec<Rule>, RepositoryError> {
        self.query_rules(&format!(
            "SELECT {} FROM rules WHERE is_active = 1 ORDER BY id",
            RULE_COLUMNS
        ))
    }

    fn get_rule(&self, id: i64) -> Result<Rule, RepositoryError> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM rules WHERE id = ?",
                RULE_COLUMNS
            ))?;
            match stmt.query_row(params![id], Self::rule_from_row) {
                Ok(raw) => raw,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(RepositoryError::NotFound(id))
                }
                Err(e) => return Err(e.into()),
            }
        };
        Self::assemble_rule(raw)
    }

    fn save_rule(
        &self,
        name: &str,
        condition: &ConditionNode,
        action: &ActionSpec,
        is_active: bool,
    ) -> Result<Rule, RepositoryError> {
        let condition_json = serde_json::to_string(condition)
            .map_err(|e| RepositoryError::InvalidData(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rules
             (name, condition_json, action_kind, ban_duration_seconds, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                name,
                condition_json,
                action_kind_str(action.kind),
                action.ban_duration_seconds,
                is_active as i64,
                now,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Rule {
            id,
            name: name.to_string(),
            condition: condition.clone(),
            action: action.clone(),
            is_active,
            created_at: now,
            updated_at: now,
        })
    }

    fn set_rule_active(&self, id: i64, is_active: bool) -> Result<(), RepositoryError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE rules SET is_active = ?, updated_at = ? WHERE id = ?",
            params![is_active as i64, now, id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    fn delete_rule(&self, id: i64) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM rules WHERE id = ?", params![id])?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    fn append_log(&self, entry: &RuleExecutionLog) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_logs
             (rule_id, triggered_at, peer_address, peer_summary, action_taken, result, message)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.rule_id,
                entry.triggered_at,
                entry.peer_address,
                entry.peer_summary,
                action_kind_str(entry.action_taken),
                entry.result.as_str(),
                entry.message
            ],
        )?;
        Ok(())
    }

    fn find_recent_success(
        &self,
        rule_id: i64,
        peer_address: &str,
        since: i64,
    ) -> Result<Option<RuleExecutionLog>, RepositoryError> {
        let raw = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT rule_id, triggered_at, peer_address, peer_summary, action_taken, result, message
                 FROM execution_logs
                 WHERE rule_id = ? AND peer_address = ? AND result = 'success' AND triggered_at >= ?
                 ORDER BY triggered_at DESC LIMIT 1",
            )?;
            match stmt.query_row(params![rule_id, peer_address, since], Self::log_from_row) {
                Ok(raw) => raw,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };
        Self::assemble_log(raw).map(Some)
    }

    fn recent_logs(&self, limit: usize) -> Result<Vec<RuleExecutionLog>, RepositoryError> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT rule_id, triggered_at, peer_address, peer_summary, action_taken, result, message
                 FROM execution_logs ORDER BY triggered_at DESC, id DESC LIMIT ?",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], Self::log_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            rows
        };
        rows.into_iter().map(Self::assemble_log).collect()
    }

    fn prune_logs(&self, before: i64) -> Result<usize, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM execution_logs WHERE triggered_at < ?",
            params![before],
        )?;
        Ok(removed)
    }
}
