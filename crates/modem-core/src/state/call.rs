use serde::{Deserialize, Serialize};

/// Call index as used by `+CLCC` and `+CHLD`
pub type CallId = u8;

/// Lifecycle of a call
///
/// The regular path is `Idle → Initiating → Outgoing → Active → Releasing →
/// Idle`. Release may start from any live status, and an incoming call goes
/// from `Initiating` straight to `Active` when answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Idle,
    Initiating,
    Outgoing,
    Active,
    Releasing,
}

impl CallStatus {
    pub fn is_live(self) -> bool {
        self != Self::Idle
    }

    /// Whether `self → to` is a legal single step
    pub fn can_transition(self, to: CallStatus, direction: CallDirection) -> bool {
        use CallStatus::*;
        match (self, to) {
            (Idle, Initiating)
            | (Initiating, Outgoing)
            | (Outgoing, Active)
            | (Active, Releasing)
            | (Releasing, Idle) => true,
            (Initiating | Outgoing, Releasing) => true,
            (Initiating, Active) => direction == CallDirection::Incoming,
            _ => false,
        }
    }

    /// Forward path a call of `direction` takes
    pub(crate) fn path(direction: CallDirection) -> &'static [CallStatus] {
        use CallStatus::*;
        match direction {
            CallDirection::Outgoing => &[Idle, Initiating, Outgoing, Active, Releasing, Idle],
            CallDirection::Incoming => &[Idle, Initiating, Active, Releasing, Idle],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    #[default]
    Voice,
    Data,
}

/// One live call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallInfo {
    pub id: CallId,
    pub status: CallStatus,
    pub direction: CallDirection,
    pub kind: CallKind,
    /// Remote number, once known
    pub peer: Option<String>,
}
