use crate::availability::{AvailabilityCache, UnavailabilityEntry};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::selector::{choose_model, FailureContext};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// RetryPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPlan {
    pub provider: String,
    /// Model to use for the next attempt.
    pub model: String,
    /// True when `model` differs from the model that just failed.
    pub rotated: bool,
    /// Set when every candidate is cooling down: how long to sleep before the
    /// soonest one frees up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    /// Window opened for the failed model, for quota and rate-limit failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded: Option<UnavailabilityEntry>,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Handle one failed AI call: record the failed model's cooldown when the
/// failure calls for it, then pick the next model, skipping models that are
/// currently unavailable as well as those already tried.
pub fn plan_retry(
    cache: &AvailabilityCache,
    provider: &str,
    provider_config: &ProviderConfig,
    ctx: &FailureContext,
    hint: Option<&str>,
    now: DateTime<Utc>,
) -> Result<RetryPlan> {
    let recorded = if ctx.reason.records_unavailability() && !ctx.current_model.is_empty() {
        Some(cache.mark_model_unavailable(
            provider,
            &ctx.current_model,
            hint,
            provider_config.default_cooldown_ms,
            now,
        )?)
    } else {
        None
    };

    let unavailable = cache.list_unavailable_models(provider, now)?;
    let mut effective = ctx.clone().exclude(&unavailable);
    effective.mark_tried(&ctx.current_model);

    let model = choose_model(&effective, &provider_config.models);
    let wait_ms = if unavailable.contains(&model) {
        cache.next_availability_ms(provider, now)?
    } else {
        None
    };

    tracing::debug!(
        provider,
        failed = %ctx.current_model,
        reason = %ctx.reason,
        streak = ctx.failure_streak,
        next = %model,
        "retry planned"
    );

    Ok(RetryPlan {
        provider: provider.to_string(),
        rotated: model != ctx.current_model,
        model,
        wait_ms,
        recorded,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureReason;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn claude() -> ProviderConfig {
        ProviderConfig {
            models: vec!["opus".into(), "sonnet".into(), "haiku".into()],
            default_cooldown_ms: 60_000,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn quota_failure_records_window_and_rotates() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        let ctx = FailureContext::new("opus", FailureReason::ProviderQuota);

        let plan = plan_retry(&cache, "claude", &claude(), &ctx, Some("30s"), now()).unwrap();
        assert_eq!(plan.model, "sonnet");
        assert!(plan.rotated);
        assert_eq!(plan.wait_ms, None);
        let recorded = plan.recorded.unwrap();
        assert_eq!(recorded.until, now() + TimeDelta::seconds(30));
        assert!(cache.is_model_unavailable("claude", "opus", now()).unwrap());
    }

    #[test]
    fn hintless_rate_limit_uses_provider_default() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        let ctx = FailureContext::new("opus", FailureReason::ProviderRateLimited);
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, None, now()).unwrap();
        assert_eq!(
            plan.recorded.unwrap().until,
            now() + TimeDelta::milliseconds(60_000)
        );
    }

    #[test]
    fn skips_models_unavailable_from_earlier_runs() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        cache
            .mark_model_unavailable("claude", "sonnet", Some("10m"), 0, now())
            .unwrap();

        let ctx = FailureContext::new("opus", FailureReason::Other);
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, None, now()).unwrap();
        assert_eq!(plan.model, "haiku");
        assert!(plan.recorded.is_none());
    }

    #[test]
    fn all_unavailable_wraps_and_reports_wait() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        cache
            .mark_model_unavailable("claude", "opus", Some("20s"), 0, now())
            .unwrap();
        cache
            .mark_model_unavailable("claude", "sonnet", Some("5s"), 0, now())
            .unwrap();

        let ctx = FailureContext::new("haiku", FailureReason::ProviderQuota);
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, Some("1m"), now()).unwrap();
        assert_eq!(plan.model, "opus");
        assert_eq!(plan.wait_ms, Some(5_000));
    }

    #[test]
    fn wait_is_reported_right_up_to_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        for model in ["opus", "sonnet", "haiku"] {
            cache
                .mark_model_unavailable("claude", model, Some("1s"), 0, now())
                .unwrap();
        }

        let almost = now() + TimeDelta::seconds(1) - TimeDelta::microseconds(500);
        let ctx = FailureContext::new("haiku", FailureReason::Other);
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, None, almost).unwrap();
        assert_eq!(plan.model, "opus");
        assert_eq!(plan.wait_ms, Some(1));
    }

    #[test]
    fn command_too_long_keeps_model_and_records_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        let ctx = FailureContext::new("sonnet", FailureReason::ProviderCommandTooLong);
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, Some("1h"), now()).unwrap();
        assert_eq!(plan.model, "sonnet");
        assert!(!plan.rotated);
        assert!(plan.recorded.is_none());
        assert!(cache.providers().unwrap().is_empty());
    }

    #[test]
    fn failed_pin_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let cache = AvailabilityCache::new(dir.path());
        let ctx = FailureContext::new("haiku", FailureReason::Other)
            .with_configured(Some("haiku".into()));
        let plan = plan_retry(&cache, "claude", &claude(), &ctx, None, now()).unwrap();
        assert_eq!(plan.model, "opus");
    }
}
