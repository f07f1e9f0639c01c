use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;

use peerwarden::cache::CacheStore;
use peerwarden::config::Config;
use peerwarden::dispatcher::ActionDispatcher;
use peerwarden::evaluator::Evaluator;
use peerwarden::gateway::{HttpRpcGateway, RpcGateway};
use peerwarden::geolocation::GeoLookupService;
use peerwarden::models::{ActionKind, ActionSpec, ConditionNode};
use peerwarden::repository::{RuleRepository, SqliteRuleRepository};
use peerwarden::scheduler::{EvalTarget, Scheduler};
use peerwarden::snapshot::PeerSnapshotProvider;

/// Peer management console for a running node
#[derive(StructOpt, Debug)]
#[structopt(name = "warden", about = "Peer rule engine CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show the node's current peer set
    Peers {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Bypass the cache and ask the node directly
        #[structopt(long)]
        refresh: bool,
    },
    /// List the configured rules
    Rules {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Add a rule
    Add {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Rule name
        #[structopt(short, long)]
        name: String,
        /// Condition tree as JSON
        #[structopt(long)]
        condition: String,
        /// Action to take: ban, disconnect or log
        #[structopt(short, long, default_value = "log")]
        action: String,
        /// Ban duration in seconds (ban action only)
        #[structopt(long)]
        ban_seconds: Option<i64>,
        /// Create the rule disabled
        #[structopt(long)]
        disabled: bool,
    },
    /// Enable or disable a rule
    Toggle {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Rule id
        id: i64,
        /// Disable instead of enable
        #[structopt(long)]
        off: bool,
    },
    /// Delete a rule
    Delete {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Rule id
        id: i64,
    },
    /// Run one evaluation cycle now
    Run {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Evaluate only this rule
        #[structopt(short, long)]
        rule: Option<i64>,
    },
    /// Show recent rule execution logs
    Logs {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Number of entries to show
        #[structopt(short, long, default_value = "20")]
        limit: usize,
    },
}

fn load_config(path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    if !path.exists() {
        eprintln!("Configuration file not found: {:?}", path);
        eprintln!("Run 'warden config' to generate a default configuration");
        std::process::exit(1);
    }
    Config::from_file(path)
}

fn open_repository(config: &Config) -> Result<Arc<dyn RuleRepository>, Box<dyn std::error::Error>> {
    let repo = SqliteRuleRepository::new(&config.storage.database_path)?;
    Ok(Arc::new(repo))
}

fn parse_action(
    action: &str,
    ban_seconds: Option<i64>,
) -> Result<ActionSpec, Box<dyn std::error::Error>> {
    let kind = match action {
        "ban" => ActionKind::Ban,
        "disconnect" => ActionKind::Disconnect,
        "log" => ActionKind::Log,
        other => return Err(format!("unknown action '{}'", other).into()),
    };
    Ok(ActionSpec {
        kind,
        ban_duration_seconds: ban_seconds,
    })
}

fn build_scheduler(config: &Config) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let gateway: Arc<dyn RpcGateway> = Arc::new(HttpRpcGateway::new(&config.rpc));
    let cache = Arc::new(CacheStore::new());
    let geo = if config.geolocation.enabled {
        Some(GeoLookupService::new(&config.geolocation))
    } else {
        None
    };
    let provider = PeerSnapshotProvider::new(
        Arc::clone(&gateway),
        Arc::clone(&cache),
        geo,
        config.cache.clone(),
    );
    let repository = open_repository(config)?;
    let dispatcher = ActionDispatcher::new(
        Arc::clone(&gateway),
        Arc::clone(&repository),
        config.engine.cooldown_seconds,
        config.engine.default_ban_seconds,
    );
    Ok(Scheduler::new(
        provider,
        repository,
        dispatcher,
        config.engine.tick_interval_seconds,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Peers { config, refresh } => {
            let config = load_config(&config)?;
            let scheduler = build_scheduler(&config)?;
            let snapshot = scheduler.snapshot(!refresh).await?;

            let source = if snapshot.is_fallback { "fallback" } else { "live" };
            println!(
                "{} peer(s) at {} ({}):\n",
                snapshot.peers.len(),
                snapshot.taken_at,
                source
            );
            for peer in &snapshot.peers {
                let ping = peer
                    .ping_millis
                    .map(|p| format!("{:.0}ms", p))
                    .unwrap_or_else(|| "-".to_string());
                let country = peer
                    .geo
                    .as_ref()
                    .map(|g| g.country.as_str())
                    .unwrap_or("-");
                println!(
                    "  {} {} ping={} sent={} recv={} country={}",
                    peer.addr, peer.direction, ping, peer.bytes_sent, peer.bytes_received, country
                );
            }
        }
        Cli::Rules { config } => {
            let config = load_config(&config)?;
            let repository = open_repository(&config)?;
            let rules = repository.list_rules()?;

            println!("{} rule(s):\n", rules.len());
            for rule in &rules {
                let state = if rule.is_active { "active" } else { "disabled" };
                let condition = serde_json::to_string(&rule.condition)?;
                println!(
                    "  [{}] {} ({}) action={} condition={}",
                    rule.id, rule.name, state, rule.action.kind, condition
                );
            }
        }
        Cli::Add {
            config,
            name,
            condition,
            action,
            ban_seconds,
            disabled,
        } => {
            let config = load_config(&config)?;
            let repository = open_repository(&config)?;

            let condition: ConditionNode = serde_json::from_str(&condition)?;
            Evaluator::new().validate(&condition)?;
            let action = parse_action(&action, ban_seconds)?;

            let rule = repository.save_rule(&name, &condition, &action, !disabled)?;
            println!("Rule [{}] '{}' saved", rule.id, rule.name);
        }
        Cli::Toggle { config, id, off } => {
            let config = load_config(&config)?;
            let repository = open_repository(&config)?;
            repository.set_rule_active(id, !off)?;
            let state = if off { "disabled" } else { "enabled" };
            println!("Rule [{}] {}", id, state);
        }
        Cli::Delete { config, id } => {
            let config = load_config(&config)?;
            let repository = open_repository(&config)?;
            repository.delete_rule(id)?;
            println!("Rule [{}] deleted", id);
        }
        Cli::Run { config, rule } => {
            let config = load_config(&config)?;
            let scheduler = build_scheduler(&config)?;

            let target = match rule {
                Some(id) => EvalTarget::Rule(id),
                None => EvalTarget::All,
            };
            let summary = scheduler.trigger(target).await?;
            println!(
                "Cycle complete: {} rule(s) over {} peer(s), {} action(s) taken in {}ms",
                summary.rules_evaluated,
                summary.peers_scanned,
                summary.actions_taken,
                summary.duration_ms
            );
        }
        Cli::Logs { config, limit } => {
            let config = load_config(&config)?;
            let repository = open_repository(&config)?;
            let logs = repository.recent_logs(limit)?;

            println!("{} log entry(ies):\n", logs.len());
            for entry in &logs {
                println!(
                    "  {} rule={} peer={} action={} result={} {}",
                    entry.triggered_at,
                    entry.rule_id,
                    entry.peer_address,
                    entry.action_taken,
                    entry.result.as_str(),
                    entry.message
                );
            }
        }
    }

    Ok(())
}
