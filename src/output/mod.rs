use crate::models::RuleExecutionLog;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Audit writer for rule execution log entries
///
/// The repository is the durable record; this stream is the operator-facing
/// trail (tailed file or console).
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "console" => OutputFormat::Console,
            _ => OutputFormat::Jsonl, // Default
        }
    }
}

impl OutputHandler {
    /// Create a new output handler
    pub fn new(
        format: OutputFormat,
        file_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let writer: Option<Box<dyn Write + Send>> = match (&format, file_path) {
            (OutputFormat::Console, _) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            (_, None) => None,
        };

        Ok(OutputHandler { format, writer })
    }

    /// Write one execution log entry
    pub fn write_entry(&mut self, entry: &RuleExecutionLog) -> Result<(), Box<dyn std::error::Error>> {
        match &self.format {
            OutputFormat::Jsonl => {
                let json = serde_json::to_string(entry)?;
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Console => {
                let output = format!(
                    "[rule {}] {} -> {} ({}) {}\n",
                    entry.rule_id,
                    entry.peer_address,
                    entry.action_taken,
                    entry.result.as_str(),
                    entry.message,
                );
                self.write_output(&output)?;
            }
        }
        Ok(())
    }

    fn write_output(&mut self, data: &str) -> Result<(), Box<dyn std::error::Error>> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", data);
                use std::io::{self, Write};
                io::stdout().flush()?;
            }
        }
        Ok(())
    }

    /// Flush any buffered output
    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Handle for queueing audit entries from anywhere in the engine
///
/// Non-blocking on purpose: a full or closed queue drops the entry with a
/// warning rather than stalling dispatch. The repository remains the
/// durable record either way.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<RuleExecutionLog>,
}

impl AuditQueue {
    /// Create a queue and its receiving end for [`run_audit_writer`]
    pub fn channel() -> (AuditQueue, mpsc::Receiver<RuleExecutionLog>) {
        let (tx, rx) = mpsc::channel(100);
        (AuditQueue { tx }, rx)
    }

    /// Queue an entry for the audit writer (non-blocking)
    pub fn push(&self, entry: RuleExecutionLog) {
        if let Err(e) = self.tx.try_send(entry) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    log::warn!("Audit queue full, dropping entry");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Audit queue closed");
                }
            }
        }
    }
}

/// Drain the audit queue into the output handler until it closes
///
/// Spawned as a tokio task by the daemon.
pub async fn run_audit_writer(
    mut handler: OutputHandler,
    mut rx: mpsc::Receiver<RuleExecutionLog>,
) {
    log::info!("Audit writer started");
    while let Some(entry) = rx.recv().await {
        if let Err(e) = handler.write_entry(&entry) {
            log::error!("Failed to write audit entry: {}", e);
        }
    }
    if let Err(e) = handler.flush() {
        log::error!("Failed to flush audit output: {}", e);
    }
    log::info!("Audit writer stopped");
}
