mod cli;

use anyhow::{Result, bail, ensure};
use chrono::{Duration, Utc};
use clap::Parser;

use cli::{Cli, Command};
use stageline::config::TenantConfig;
use stageline::engine::{ItemStatus, ProgressionEngine, SubmitOutcome};
use stageline::ui::{self, ItemProgress};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => TenantConfig::load_from(path)?,
        None => TenantConfig::load()?,
    };

    match cli.command {
        Command::Check => run_check(config),
        Command::Demo => run_demo(config, true),
        Command::Timeline => run_demo(config, false),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_check(config: TenantConfig) -> Result<()> {
    let tenant = config.tenant_id.clone();
    let problems = config.check_report()?;
    if problems.is_empty() {
        println!("✓ configuration for tenant {tenant} is valid");
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("✗ {problem}");
        }
        bail!("{} ambiguous rule pair(s) found", problems.len());
    }
}

/// Walks one item through the configured pipeline, answering each stage's
/// questions with the scripted demo responses, then reconstructs the
/// timeline from the audit trail.
fn run_demo(config: TenantConfig, show_audit: bool) -> Result<()> {
    let (catalog, registry, rules) = config.build()?;
    let engine = ProgressionEngine::new(catalog, registry, rules);

    let start_date = (Utc::now() - Duration::days(14)).date_naive();
    let item = engine.create_item("Reroof 12 Harbor Lane", start_date)?;
    let progress = ItemProgress::start(&item.title);

    let script = [
        ("referral-source", "Website"),
        ("qualified", "Yes"),
        ("access-clear", "Yes"),
        ("work-complete", "Yes"),
    ];
    let mut script = script.iter();

    while let Some(question) = engine.next_question(&item.id)? {
        let Some((id, value)) = script.next() else {
            break;
        };
        ensure!(
            *id == question.id,
            "demo script out of sync: expected {id}, pipeline asked {}",
            question.id
        );
        progress.answered(&question.text, value);
        match engine.submit_response(&item.id, &question.id, value, "demo")? {
            SubmitOutcome::Applied { to_stage } => {
                progress.transition(&question.stage_id, &to_stage);
            }
            SubmitOutcome::PendingManual { to_stage } => {
                progress.pending(&to_stage);
                engine.confirm_manual_transition(&item.id, "demo-supervisor")?;
                progress.transition(&question.stage_id, &to_stage);
            }
            SubmitOutcome::AwaitingResolution => {}
        }
    }

    let today = Utc::now().date_naive();
    engine.sync_lifecycle(&item.id, ItemStatus::Completed, Some(today))?;
    progress.finish("pipeline complete");

    if show_audit {
        ui::print_audit(&engine.audit_history(&item.id));
    }
    ui::print_timeline(&engine.timeline_segments(&item.id)?, engine.catalog());
    println!();
    println!(
        "progress: {:.0}%",
        engine.progress_percentage(&item.id)?
    );
    Ok(())
}
