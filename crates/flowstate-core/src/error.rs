use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Benign engine outcomes that callers are expected to match on.
///
/// None of these are faults: the engine state is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("a session is already open ({0})")]
    SessionAlreadyOpen(Uuid),

    #[error("no pending intervention with id {0}")]
    UnknownIntervention(Uuid),

    #[error("no intervention is pending")]
    NoPendingIntervention,

    #[error("focus score {0} is outside 0-100")]
    InvalidFocusScore(f64),
}
