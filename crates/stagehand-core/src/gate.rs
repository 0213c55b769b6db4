use crate::error::Result;
use crate::stage::StageSnapshot;
use crate::types::{StageName, StageStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GateDecision
// ---------------------------------------------------------------------------

/// Whether a stage may start. A rejection is an ordinary outcome, not an
/// error; `reason` is meant to be shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub stage: StageName,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The first unmet prerequisite, when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<StageName>,
}

// ---------------------------------------------------------------------------
// Gate evaluation
// ---------------------------------------------------------------------------

/// A stage may be entered only when every earlier stage has passed. The first
/// stage is always enterable. Pure: no I/O.
pub fn can_enter_stage(snapshot: &StageSnapshot, target: StageName) -> GateDecision {
    let unmet = target
        .prerequisites()
        .iter()
        .copied()
        .find(|s| snapshot.status(*s) != StageStatus::Passed);

    match unmet {
        None => GateDecision {
            stage: target,
            ok: true,
            reason: None,
            blocked_by: None,
        },
        Some(prereq) => {
            let record = snapshot.record(prereq);
            let mut reason = format!(
                "cannot enter '{target}': prerequisite stage '{prereq}' is {}",
                record.status
            );
            if !record.detail.is_empty() {
                reason.push_str(&format!(" ({})", record.detail));
            }
            GateDecision {
                stage: target,
                ok: false,
                reason: Some(reason),
                blocked_by: Some(prereq),
            }
        }
    }
}

/// [`can_enter_stage`] for a stage name arriving as text; unknown names fail
/// with `UnknownStage`.
pub fn can_enter_stage_named(snapshot: &StageSnapshot, target: &str) -> Result<GateDecision> {
    Ok(can_enter_stage(snapshot, target.parse()?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
