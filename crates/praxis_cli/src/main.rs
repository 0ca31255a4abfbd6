mod builtin_tools;

use anyhow::Context;
use clap::{Parser, Subcommand};
use praxis_core::permissions::AutoApprove;
use praxis_core::plan::parse_plan;
use praxis_core::{ConfirmationHandler, LivePermissions, PraxisConfig, ToolSource, ValidationIssue};
use praxis_mcp::McpCatalog;
use praxis_reasoning::providers::build_client;
use praxis_reasoning::{
    CompletionParams, PlanRunReport, PlanRunner, PlanValidator, SelfHealingExecutor, StepStatus,
    ToolRegistry,
};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "praxis.toml", env = "PRAXIS_CONFIG", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a plan file, correct it if needed, and execute it
    Run {
        /// JSON plan: an array of steps or {"steps": [...]}
        plan: PathBuf,

        /// Approve every tool that requires confirmation
        #[arg(long)]
        yes: bool,

        /// Stop after validation and print the corrected plan
        #[arg(long)]
        validate_only: bool,
    },
    /// List the tools available under the current permissions
    Tools,
}

/// Asks on the terminal before a tool that requires confirmation runs.
struct StdinConfirmation;

#[async_trait::async_trait]
impl ConfirmationHandler for StdinConfirmation {
    async fn confirm(&self, tool: &str, args: &Value) -> bool {
        let question = format!("Run tool '{tool}' with {args}? [y/N] ");
        tokio::task::spawn_blocking(move || {
            print!("{question}");
            let _ = io::stdout().flush();
            let mut answer = String::new();
            if io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = PraxisConfig::load_or_default(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
    let permissions = Arc::new(LivePermissions::from_config(&config.permissions));

    let confirmation: Arc<dyn ConfirmationHandler> = match &cli.command {
        Command::Run { yes: true, .. } => Arc::new(AutoApprove),
        _ => Arc::new(StdinConfirmation),
    };
    let mut registry = ToolRegistry::new(permissions)
        .with_confirmation(confirmation)
        .with_meta_tools(config.validation.meta_tools.clone());
    for tool in builtin_tools::builtin_tools(&config.workspace.root) {
        registry.register(tool);
    }

    let catalog = Arc::new(McpCatalog::new(config.mcp_servers.clone()));
    if !config.mcp_servers.is_empty() {
        let connected = catalog.connect_all().await;
        tracing::info!("{} MCP server(s) connected", connected);
    }
    registry.add_remote_source(catalog.clone());
    let registry = Arc::new(registry);

    let code = match cli.command {
        Command::Tools => {
            print_tools(&registry);
            ExitCode::SUCCESS
        }
        Command::Run {
            plan,
            validate_only,
            ..
        } => run_plan(&config, registry, &plan, validate_only).await?,
    };

    catalog.disconnect_all().await;
    Ok(code)
}

async fn run_plan(
    config: &PraxisConfig,
    registry: Arc<ToolRegistry>,
    plan_path: &Path,
    validate_only: bool,
) -> anyhow::Result<ExitCode> {
    let text = tokio::fs::read_to_string(plan_path)
        .await
        .with_context(|| format!("Failed to read plan file: {}", plan_path.display()))?;
    let steps = parse_plan(&text)
        .with_context(|| format!("Failed to parse plan file: {}", plan_path.display()))?;
    tracing::info!("Loaded plan with {} step(s)", steps.len());

    let llm = build_client(&config.llm)?;
    let params = CompletionParams::from(&config.llm);
    let validator = Arc::new(PlanValidator::new(
        registry.clone(),
        llm.clone(),
        params,
        config.validation.clone(),
    ));
    let executor = SelfHealingExecutor::new(
        registry,
        validator.clone(),
        llm,
        params,
        config.recovery.clone(),
    );
    let runner = PlanRunner::new(validator, executor);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling plan run");
            on_interrupt.cancel();
        }
    });

    if validate_only {
        let report = match runner.validate(steps, &cancel).await {
            Ok(r) => r,
            Err(e) => {
                println!("Validation aborted: {e}");
                return Ok(ExitCode::FAILURE);
            }
        };
        print_issues("Issues found", &report.issues);
        print_issues("Issues remaining", &report.remaining);
        println!(
            "{} issue(s) fixed, {} correction(s) applied\n",
            report.issues_fixed, report.corrections_applied
        );
        println!("{}", serde_json::to_string_pretty(&report.steps)?);
        return Ok(if report.remaining.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let report = runner.run(steps, &cancel).await;
    print_report(&report);
    Ok(if report.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_tools(registry: &ToolRegistry) {
    let tools = registry.list_available();
    println!("{} tool(s) available:\n", tools.len());
    for tool in tools {
        let source = match &tool.source {
            ToolSource::BuiltIn => "built-in".to_string(),
            ToolSource::RemoteServer { server_id } => format!("mcp:{server_id}"),
        };
        println!("  {:<24} [{}] {}", tool.name, source, tool.description);
    }
}

fn print_issues(title: &str, issues: &[ValidationIssue]) {
    if issues.is_empty() {
        return;
    }
    println!("{title}:");
    for issue in issues {
        println!("  - {} ({}): {}", issue.step_id, issue.tool_name, issue.issue);
        if !issue.suggestion.is_empty() {
            println!("      {}", issue.suggestion);
        }
    }
    println!();
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "ok",
        StepStatus::Failed => "FAILED",
        StepStatus::Skipped => "skipped",
        StepStatus::Cancelled => "cancelled",
    }
}

fn print_report(report: &PlanRunReport) {
    print_issues("Validation issues", &report.issues);
    if report.corrections_applied > 0 {
        println!(
            "Auto-corrected {} issue(s) with {} correction(s)\n",
            report.issues_fixed, report.corrections_applied
        );
    }

    for outcome in &report.steps {
        println!(
            "[{}] {} → {} ({} attempt(s))",
            status_label(outcome.status),
            outcome.step_id,
            outcome.final_step.tool,
            outcome.attempts
        );
        if let Some(result) = &outcome.result {
            let text = match result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let preview: String = text.chars().take(200).collect();
            println!("      {preview}");
        }
        if let Some(err) = &outcome.last_error {
            println!("      error: {err}");
        }
    }

    println!(
        "\n{} completed, {} failed, {} skipped, {} cancelled",
        report.count(StepStatus::Completed),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Cancelled)
    );
}
