use crate::error::StagehandError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

/// Pipeline stages in their fixed entry order. Declaration order is the gate
/// order: a stage's prerequisites are every variant declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Discovery,
    FunctionalRequirements,
    TechnicalBacklog,
    Implementation,
    QualityValidation,
    PullRequest,
}

impl StageName {
    pub fn all() -> &'static [StageName] {
        &[
            StageName::Discovery,
            StageName::FunctionalRequirements,
            StageName::TechnicalBacklog,
            StageName::Implementation,
            StageName::QualityValidation,
            StageName::PullRequest,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Every stage strictly before `self`, in order.
    pub fn prerequisites(self) -> &'static [StageName] {
        &StageName::all()[..self.index()]
    }

    pub fn next(self) -> Option<StageName> {
        StageName::all().get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Discovery => "discovery",
            StageName::FunctionalRequirements => "functional_requirements",
            StageName::TechnicalBacklog => "technical_backlog",
            StageName::Implementation => "implementation",
            StageName::QualityValidation => "quality_validation",
            StageName::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s || stage.as_str().replace('_', "-") == s)
            .ok_or_else(|| StagehandError::UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "passed" | "pass" => Ok(StageStatus::Passed),
            "failed" | "fail" => Ok(StageStatus::Failed),
            _ => Err(StagehandError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Classified cause of a failed AI call, as reported by the AI-call layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProviderQuota,
    ProviderRateLimited,
    ProviderCommandTooLong,
    Other,
}

impl FailureReason {
    pub fn all() -> &'static [FailureReason] {
        &[
            FailureReason::ProviderQuota,
            FailureReason::ProviderRateLimited,
            FailureReason::ProviderCommandTooLong,
            FailureReason::Other,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::ProviderQuota => "provider_quota",
            FailureReason::ProviderRateLimited => "provider_rate_limited",
            FailureReason::ProviderCommandTooLong => "provider_command_too_long",
            FailureReason::Other => "other",
        }
    }

    /// Quota and rate-limit failures make the model unusable for a while and
    /// should open an unavailability window.
    pub fn records_unavailability(self) -> bool {
        matches!(
            self,
            FailureReason::ProviderQuota | FailureReason::ProviderRateLimited
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureReason {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureReason::all()
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| StagehandError::InvalidReason(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
