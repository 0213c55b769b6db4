use crate::output::{human_ms, print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use stagehand_core::availability::AvailabilityCache;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AvailabilitySubcommand {
    /// Record that a model is unusable until its reset time
    Mark {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        /// Provider-reported reset hint, e.g. "1h 2m 3s"
        #[arg(long)]
        hint: Option<String>,
        /// Cooldown when the hint is missing or unparseable
        /// (default: the provider's default_cooldown_ms)
        #[arg(long)]
        default_ms: Option<u64>,
    },

    /// Check one model; exits non-zero while it is unavailable
    Check {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
    },

    /// List a provider's unavailable models (all providers when omitted)
    List {
        #[arg(long)]
        provider: Option<String>,
    },

    /// Milliseconds until a provider's soonest model frees up
    Next {
        #[arg(long)]
        provider: String,
    },

    /// Remove expired entries from every provider
    Prune,

    /// Forget one model's cooldown regardless of expiry
    Clear {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    state_dir: Option<&Path>,
    subcmd: AvailabilitySubcommand,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let cache = AvailabilityCache::open(state_dir)
        .context("failed to resolve state directory")?
        .with_options(config.lock.options());

    match subcmd {
        AvailabilitySubcommand::Mark {
            provider,
            model,
            hint,
            default_ms,
        } => {
            let default_ms = match default_ms {
                Some(ms) => ms,
                None => config.provider(&provider)?.default_cooldown_ms,
            };
            mark(&cache, &provider, &model, hint.as_deref(), default_ms, now, json)
        }
        AvailabilitySubcommand::Check { provider, model } => {
            check(&cache, &provider, &model, now, json)
        }
        AvailabilitySubcommand::List { provider } => list(&cache, provider, now, json),
        AvailabilitySubcommand::Next { provider } => next(&cache, &provider, now, json),
        AvailabilitySubcommand::Prune => prune(&cache, now, json),
        AvailabilitySubcommand::Clear { provider, model } => {
            clear(&cache, &provider, &model, json)
        }
    }
}

// ---------------------------------------------------------------------------
// mark
// ---------------------------------------------------------------------------

fn mark(
    cache: &AvailabilityCache,
    provider: &str,
    model: &str,
    hint: Option<&str>,
    default_ms: u64,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let entry = cache
        .mark_model_unavailable(provider, model, hint, default_ms, now)
        .with_context(|| format!("failed to record cooldown for {provider}/{model}"))?;

    if json {
        return print_json(&entry);
    }
    let remaining = (entry.until - now).num_milliseconds().max(0) as u64;
    println!(
        "{provider}/{model} unavailable for {} (until {})",
        human_ms(remaining),
        entry.until.to_rfc3339()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(
    cache: &AvailabilityCache,
    provider: &str,
    model: &str,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let unavailable = cache.is_model_unavailable(provider, model, now)?;

    if json {
        print_json(&serde_json::json!({
            "provider": provider,
            "model": model,
            "available": !unavailable,
        }))?;
    } else if !unavailable {
        println!("{provider}/{model} is available.");
    }

    if unavailable {
        anyhow::bail!("{provider}/{model} is unavailable");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(
    cache: &AvailabilityCache,
    provider: Option<String>,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let providers = match provider {
        Some(p) => vec![p],
        None => cache.providers()?,
    };
    let mut entries = Vec::new();
    for p in &providers {
        entries.extend(cache.unavailable_entries(p, now)?);
    }

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No unavailable models.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            let remaining = (e.until - now).num_milliseconds().max(0) as u64;
            vec![
                e.provider.clone(),
                e.model.clone(),
                e.until.to_rfc3339(),
                human_ms(remaining),
            ]
        })
        .collect();
    print_table(&["PROVIDER", "MODEL", "UNTIL", "REMAINING"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// next
// ---------------------------------------------------------------------------

fn next(
    cache: &AvailabilityCache,
    provider: &str,
    now: DateTime<Utc>,
    json: bool,
) -> anyhow::Result<()> {
    let next = cache.next_availability_ms(provider, now)?;

    if json {
        return print_json(&serde_json::json!({
            "provider": provider,
            "next_availability_ms": next,
        }));
    }
    match next {
        Some(ms) => println!("{ms}"),
        None => println!("none pending"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// prune
// ---------------------------------------------------------------------------

fn prune(cache: &AvailabilityCache, now: DateTime<Utc>, json: bool) -> anyhow::Result<()> {
    let removed = cache
        .clear_expired_model_availability(now)
        .context("failed to prune availability cache")?;

    if json {
        return print_json(&serde_json::json!({ "removed": removed }));
    }
    println!("Removed {removed} expired entr{}.", if removed == 1 { "y" } else { "ies" });
    Ok(())
}

// ---------------------------------------------------------------------------
// clear
// ---------------------------------------------------------------------------

fn clear(cache: &AvailabilityCache, provider: &str, model: &str, json: bool) -> anyhow::Result<()> {
    let existed = cache.clear_model(provider, model)?;

    if json {
        return print_json(&serde_json::json!({
            "provider": provider,
            "model": model,
            "cleared": existed,
        }));
    }
    if existed {
        println!("Cleared {provider}/{model}.");
    } else {
        println!("{provider}/{model} had no recorded cooldown.");
    }
    Ok(())
}
