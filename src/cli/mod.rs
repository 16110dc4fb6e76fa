//! Command-line interface for clinflow.
//!
//! Provides commands for processing requests (one-shot or interactively),
//! listing the operation catalogue, inspecting the audit log and showing
//! the resolved configuration.

use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::adapters::{CompletionBackend, HuggingFaceBackend, SandboxApi};
use crate::config::{load_config, ResolvedConfig};
use crate::core::{
    replay_file, AuditTrail, Dispatcher, IntentResolver, JsonlAuditSink, Orchestrator,
    SafetyClassifier,
};
use crate::domain::{AuditKind, Operation, Response};

/// clinflow - Safety-gated clinical administration workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "clinflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a single request
    Run {
        /// Request text (reads from stdin if not provided)
        request: Option<String>,

        /// Validate bookings without making them
        #[arg(long)]
        dry_run: bool,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process requests line by line ("audit" for a summary, "quit" to leave)
    Interactive {
        /// Validate bookings without making them
        #[arg(long)]
        dry_run: bool,
    },

    /// List the available operations
    Functions {
        /// Print the catalogue as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent audit log entries
    Audit {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                request,
                dry_run,
                json,
            } => run_request(request, dry_run, json).await,
            Commands::Interactive { dry_run } => interactive(dry_run).await,
            Commands::Functions { json } => list_functions(json),
            Commands::Audit { limit } => show_audit(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire up an orchestrator from configuration
pub async fn build_orchestrator(cfg: &ResolvedConfig, dry_run: bool) -> Result<Orchestrator> {
    let sink = JsonlAuditSink::open(&cfg.audit_log).await?;

    let backend: Option<Arc<dyn CompletionBackend>> = match &cfg.backend.token {
        Some(token) => Some(Arc::new(HuggingFaceBackend::new(
            &cfg.backend.endpoint,
            &cfg.backend.model,
            token,
            cfg.backend.timeout(),
        )?)),
        None => None,
    };

    let resolver = IntentResolver::new(backend).with_params(cfg.backend.params());
    let dispatcher = Dispatcher::new(Arc::new(SandboxApi::new()));

    Ok(Orchestrator::new(
        SafetyClassifier::new(),
        resolver,
        dispatcher,
        AuditTrail::new(Arc::new(sink)),
    )
    .with_dry_run(cfg.dry_run || dry_run)
    .with_max_request_chars(cfg.max_request_chars))
}

/// Process one request and print the response
async fn run_request(request: Option<String>, dry_run: bool, json: bool) -> Result<()> {
    let request = match request {
        Some(text) => text,
        None if !io::stdin().is_terminal() => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
        None => anyhow::bail!("No request provided. Pass it as an argument or pipe to stdin"),
    };

    if request.trim().is_empty() {
        anyhow::bail!("Request is empty");
    }

    let cfg = load_config()?;
    let orchestrator = build_orchestrator(&cfg, dry_run).await?;
    let response = orchestrator.process(&request, None).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Read requests until quit/exit or end of input. One audit session throughout.
async fn interactive(dry_run: bool) -> Result<()> {
    let cfg = load_config()?;
    let orchestrator = build_orchestrator(&cfg, dry_run).await?;

    println!("clinflow interactive session {}", orchestrator.session_id());
    if orchestrator.dry_run() {
        println!("[DRY RUN mode - no bookings will be made]");
    }
    println!("Type a request, 'audit' for a session summary, or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nclinflow> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "audit" => {
                print_counts(&orchestrator.summary().counts_by_kind);
                continue;
            }
            _ => {}
        }

        let response = orchestrator.process(line, None).await?;
        print_response(&response);
    }

    let summary = orchestrator.summary();
    println!(
        "\nSession {} recorded {} audit events",
        summary.session_id, summary.total_entries
    );
    Ok(())
}

/// List the operation catalogue
fn list_functions(json: bool) -> Result<()> {
    if json {
        let schemas: Vec<Value> = Operation::ALL.iter().map(|op| op.schema()).collect();
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }

    for op in Operation::ALL {
        println!("{}", op);
        println!("  {}", op.description());
        let params = op.parameters();
        let required: Vec<&str> = params["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(props) = params["properties"].as_object() {
            for (name, prop) in props {
                let marker = if required.contains(&name.as_str()) {
                    "required"
                } else {
                    "optional"
                };
                println!(
                    "    {:<14} {:<8} {:<9} {}",
                    name,
                    prop["type"].as_str().unwrap_or("any"),
                    marker,
                    prop["description"].as_str().unwrap_or("")
                );
            }
        }
        println!();
    }
    Ok(())
}

/// Show the tail of the audit log and per-kind counts
async fn show_audit(limit: usize) -> Result<()> {
    let cfg = load_config()?;
    let events = replay_file(&cfg.audit_log).await?;

    if events.is_empty() {
        println!("No audit events in {}", cfg.audit_log.display());
        return Ok(());
    }

    println!(
        "{:<26} {:<10} {:>5}  {:<18} {}",
        "TIMESTAMP", "SESSION", "SEQ", "KIND", "DETAIL"
    );
    println!("{}", "-".repeat(90));

    let skip = events.len().saturating_sub(limit);
    for event in &events[skip..] {
        println!(
            "{:<26} {:<10} {:>5}  {:<18} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            event.session_id,
            event.sequence_id,
            event.kind,
            event_detail(event.kind, &event.payload)
        );
    }

    let mut counts = BTreeMap::new();
    for event in &events {
        *counts.entry(event.kind).or_insert(0usize) += 1;
    }
    println!();
    println!("{} events in {}", events.len(), cfg.audit_log.display());
    print_counts(&counts);

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = load_config()?;

    println!("clinflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Audit log: {}", cfg.audit_log.display());
    println!();
    println!("Completion backend:");
    match cfg.redacted_token() {
        Some(token) => println!("  Token:     {}", token),
        None => println!("  Token:     (not set - rule-based resolution only)"),
    }
    println!("  Model:     {}", cfg.backend.model);
    println!("  Endpoint:  {}", cfg.backend.endpoint);
    println!("  Timeout:   {}s", cfg.backend.timeout_seconds);
    println!(
        "  Sampling:  max_new_tokens={} temperature={}",
        cfg.backend.max_new_tokens, cfg.backend.temperature
    );
    println!();
    println!("Agent:");
    println!("  Dry run by default: {}", cfg.dry_run);
    println!("  Max request chars:  {}", cfg.max_request_chars);

    Ok(())
}

fn print_counts(counts: &BTreeMap<AuditKind, usize>) {
    println!("Events by kind:");
    for (kind, count) in counts {
        println!("  {:<18} {}", kind, count);
    }
}

fn event_detail(kind: AuditKind, payload: &Value) -> String {
    let text = |key: &str| payload[key].as_str().unwrap_or("").to_string();
    match kind {
        AuditKind::UserRequest | AuditKind::SafetyCheck => text("user_input"),
        AuditKind::SafetyViolation => payload["violation_category"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        AuditKind::FunctionCall | AuditKind::DryRun | AuditKind::FunctionResult => {
            text("function_name")
        }
        AuditKind::Error => text("error_message"),
        AuditKind::AgentResponse => payload.to_string(),
    }
}

/// One-line summary of a step outcome
fn summarize_outcome(outcome: &Value) -> String {
    if outcome["success"].as_bool() == Some(true) {
        let appointment = &outcome["appointment"];
        return format!(
            "{} ({} {} at {})",
            outcome["message"].as_str().unwrap_or("Booked"),
            appointment["id"].as_str().unwrap_or("?"),
            appointment["status"].as_str().unwrap_or("?"),
            appointment["start"].as_str().unwrap_or("?"),
        );
    }

    match outcome["resourceType"].as_str() {
        Some("Bundle") => {
            let total = outcome["total"].as_u64().unwrap_or(0);
            let first = outcome["entry"][0]["resource"]["id"].as_str();
            match (outcome["message"].as_str(), first) {
                (Some(message), _) => message.to_string(),
                (None, Some(id)) => format!("{} found, first {}", total, id),
                (None, None) => format!("{} found", total),
            }
        }
        Some("Coverage") => format!(
            "eligible={} ({})",
            outcome["isEligible"].as_bool().unwrap_or(false),
            outcome["eligibilityReason"].as_str().unwrap_or("")
        ),
        Some("OperationOutcome") => format!(
            "error [{}]: {}",
            outcome["issue"][0]["code"].as_str().unwrap_or("unknown"),
            outcome["issue"][0]["diagnostics"].as_str().unwrap_or("")
        ),
        _ => outcome.to_string(),
    }
}

fn print_response(response: &Response) {
    if response.safety_refused {
        println!("REFUSED: {}", response.message);
        if let Some(category) = response.violation_category() {
            println!("  Category:  {}", category);
        }
        if let Some(action) = response.suggested_action() {
            println!("  Suggested: {}", action);
        }
        return;
    }

    println!("{}", response.message);
    for (i, step) in response.results().iter().enumerate() {
        println!(
            "  [{}] {} -> {}",
            i + 1,
            step.operation_name,
            summarize_outcome(&step.outcome)
        );
    }
    println!("  (session {})", response.session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["clinflow", "run", "find patient Ravi", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Run {
                request, dry_run, ..
            } => {
                assert_eq!(request.as_deref(), Some("find patient Ravi"));
                assert!(dry_run);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_summarize_outcomes() {
        assert_eq!(
            summarize_outcome(&json!({
                "resourceType": "OperationOutcome",
                "issue": [{"severity": "error", "code": "invalid", "diagnostics": "bad"}]
            })),
            "error [invalid]: bad"
        );
        assert_eq!(
            summarize_outcome(&json!({
                "resourceType": "Bundle", "total": 1,
                "entry": [{"resource": {"id": "P001"}}]
            })),
            "1 found, first P001"
        );
    }
}
