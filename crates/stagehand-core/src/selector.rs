use crate::types::FailureReason;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FailureContext
// ---------------------------------------------------------------------------

/// What the retry loop knows about the last failed AI call. Rebuilt by every
/// process from its own retry loop; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Model pinned by the user, if any.
    #[serde(default)]
    pub configured_model: Option<String>,
    pub current_model: String,
    pub reason: FailureReason,
    /// Consecutive failures so far. Accepted for future backoff shaping; the
    /// selection rule does not branch on it.
    #[serde(default)]
    pub failure_streak: u32,
    /// Models already attempted this run, in attempt order, without
    /// duplicates.
    #[serde(default)]
    pub tried_models: Vec<String>,
}

impl FailureContext {
    pub fn new(current_model: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            configured_model: None,
            current_model: current_model.into(),
            reason,
            failure_streak: 0,
            tried_models: Vec::new(),
        }
    }

    pub fn with_configured(mut self, model: Option<String>) -> Self {
        self.configured_model = model.filter(|m| !m.is_empty());
        self
    }

    pub fn with_streak(mut self, streak: u32) -> Self {
        self.failure_streak = streak;
        self
    }

    pub fn has_tried(&self, model: &str) -> bool {
        self.tried_models.iter().any(|m| m == model)
    }

    /// Add `model` to the tried set, keeping first-seen order.
    pub fn mark_tried(&mut self, model: &str) {
        if !model.is_empty() && !self.has_tried(model) {
            self.tried_models.push(model.to_string());
        }
    }

    /// Treat extra models (e.g. ones currently rate-limited) as already tried.
    pub fn exclude<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for m in models {
            self.mark_tried(m.as_ref());
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the model for the next attempt.
///
/// 1. An untried user pin wins.
/// 2. `provider_command_too_long` keeps the current model: the payload is the
///    problem, not the model.
/// 3. Otherwise the first untried model in `priority_list`, wrapping to the
///    head of the list once everything has been tried.
///
/// An empty `priority_list` keeps the current model.
pub fn choose_model(ctx: &FailureContext, priority_list: &[String]) -> String {
    if let Some(pinned) = &ctx.configured_model {
        if !ctx.has_tried(pinned) {
            return pinned.clone();
        }
    }

    if ctx.reason == FailureReason::ProviderCommandTooLong {
        return ctx.current_model.clone();
    }

    priority_list
        .iter()
        .find(|m| !ctx.has_tried(m))
        .or_else(|| priority_list.first())
        .cloned()
        .unwrap_or_else(|| ctx.current_model.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
