use crate::output::{print_json, print_table, timestamp};
use anyhow::Context;
use clap::Subcommand;
use stagehand_core::gate::can_enter_stage;
use stagehand_core::stage::{load_stage_snapshot, mark_stage_with_options};
use stagehand_core::types::{StageName, StageStatus};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum StageSubcommand {
    /// Show every stage and its latest outcome
    Show,

    /// Record a stage outcome (pending, passed or failed)
    Mark {
        /// Stage name (e.g. discovery, technical_backlog)
        stage: String,
        /// New status: pending, passed or failed
        status: String,
        /// Free-text detail shown alongside the status
        #[arg(long, default_value = "")]
        detail: String,
    },

    /// Check whether a stage may start; exits non-zero when blocked
    Check {
        /// Stage name
        stage: String,
    },

    /// Show the first stage that has not passed yet
    Next,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: StageSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StageSubcommand::Show => show(root, json),
        StageSubcommand::Mark {
            stage,
            status,
            detail,
        } => mark(root, &stage, &status, &detail, json),
        StageSubcommand::Check { stage } => check(root, &stage, json),
        StageSubcommand::Next => next(root, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let snapshot = load_stage_snapshot(root).context("failed to load stage snapshot")?;
    let records = snapshot.records();

    if json {
        return print_json(&serde_json::json!({
            "stages": records,
            "next": snapshot.next_stage(),
        }));
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.name.to_string(),
                r.status.to_string(),
                timestamp(r.updated_at),
                r.detail.clone(),
            ]
        })
        .collect();
    print_table(&["STAGE", "STATUS", "UPDATED", "DETAIL"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// mark
// ---------------------------------------------------------------------------

fn mark(root: &Path, stage: &str, status: &str, detail: &str, json: bool) -> anyhow::Result<()> {
    let stage: StageName = stage.parse()?;
    let status: StageStatus = status.parse()?;
    let config = super::load_config(root)?;

    let record = mark_stage_with_options(root, stage, status, detail, config.lock.options())
        .with_context(|| format!("failed to mark stage '{stage}'"))?;

    if json {
        return print_json(&record);
    }
    println!("Stage {stage}: {status}");
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(root: &Path, stage: &str, json: bool) -> anyhow::Result<()> {
    let stage: StageName = stage.parse()?;
    let snapshot = load_stage_snapshot(root).context("failed to load stage snapshot")?;
    let decision = can_enter_stage(&snapshot, stage);

    if json {
        print_json(&decision)?;
    } else if decision.ok {
        println!("Stage {stage} may start.");
    }

    if let Some(reason) = decision.reason {
        anyhow::bail!(reason);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// next
// ---------------------------------------------------------------------------

fn next(root: &Path, json: bool) -> anyhow::Result<()> {
    let snapshot = load_stage_snapshot(root).context("failed to load stage snapshot")?;
    let next = snapshot.next_stage();

    if json {
        return print_json(&serde_json::json!({ "next": next }));
    }
    match next {
        Some(stage) => {
            let record = snapshot.record(stage);
            if record.status == StageStatus::Failed && !record.detail.is_empty() {
                println!("{stage} (failed: {})", record.detail);
            } else {
                println!("{stage}");
            }
        }
        None => println!("All stages passed."),
    }
    Ok(())
}
