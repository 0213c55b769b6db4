use crate::output::{human_ms, print_json};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use stagehand_core::availability::AvailabilityCache;
use stagehand_core::config::Config;
use stagehand_core::retry::plan_retry;
use stagehand_core::selector::FailureContext;
use stagehand_core::types::FailureReason;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ModelSubcommand {
    /// Record a failed attempt and print the model to try next
    Choose {
        #[arg(long)]
        provider: String,
        /// Model that just failed (empty for the first attempt)
        #[arg(long, default_value = "")]
        current: String,
        /// provider_quota, provider_rate_limited, provider_command_too_long or other
        #[arg(long, default_value = "other")]
        reason: String,
        /// Model pinned by the user
        #[arg(long)]
        configured: Option<String>,
        /// Models already tried this run (repeatable)
        #[arg(long = "tried")]
        tried: Vec<String>,
        /// Consecutive failures so far
        #[arg(long, default_value_t = 0)]
        streak: u32,
        /// Provider-reported reset hint for quota and rate-limit failures
        #[arg(long)]
        hint: Option<String>,
    },

    /// Show a provider's priority list with current availability
    List {
        #[arg(long)]
        provider: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    state_dir: Option<&Path>,
    subcmd: ModelSubcommand,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let cache = AvailabilityCache::open(state_dir)
        .context("failed to resolve state directory")?
        .with_options(config.lock.options());

    match subcmd {
        ModelSubcommand::Choose {
            provider,
            current,
            reason,
            configured,
            tried,
            streak,
            hint,
        } => {
            let reason: FailureReason = reason.parse()?;
            let ctx = FailureContext::new(current, reason)
                .with_configured(configured)
                .with_streak(streak)
                .exclude(&tried);
            choose(&cache, &config, &provider, &ctx, hint.as_deref(), now, json)
        }
        ModelSubcommand::List { provider } => list(&cache, &config, &provider, now, json),
    }
}

// ---------------------------------------------------------------------------
// choose
// ---------------------------------------------------------------------------

fn choose(
    cache: &AvailabilityCache,
    config: &Config,
    provider: &str,
    ctx: &FailureContext,
    hint: Option<&str>,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let provider_config = config.provider(provider)?;
    let plan = plan_retry(cache, provider, provider_config, ctx, hint, now)
        .with_context(|| format!("failed to plan retry for provider '{provider}'"))?;

    if json {
        return print_json(&plan);
    }
    println!("{}", plan.model);
    if let Some(wait) = plan.wait_ms {
        eprintln!(
            "every {provider} model is cooling down; {} frees up in {}",
            plan.model,
            human_ms(wait)
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(
    cache: &AvailabilityCache,
    config: &Config,
    provider: &str,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let models = config.priority_list(provider)?;
    let unavailable = cache.list_unavailable_models(provider, now)?;

    if json {
        let items: Vec<_> = models
            .iter()
            .map(|m| {
                serde_json::json!({
                    "model": m,
                    "available": !unavailable.contains(m),
                })
            })
            .collect();
        return print_json(&serde_json::json!({ "provider": provider, "models": items }));
    }

    for (i, model) in models.iter().enumerate() {
        let marker = if unavailable.contains(model) {
            "  (unavailable)"
        } else {
            ""
        };
        println!("{}. {model}{marker}", i + 1);
    }
    Ok(())
}
