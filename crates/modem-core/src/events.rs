//! Events published to engine subscribers

use crate::state::{CallId, CallInfo, ContextStatus, NetworkStatus};
use serde::Serialize;

/// State changes and announcements, in the order they happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModemEvent {
    /// Registration, roaming, cell or operator changed
    RegistrationChanged { network: NetworkStatus },
    /// Signal strength in percent
    SignalStrength { percent: u8 },
    /// A call changed status or details
    CallStatusChanged { call: CallInfo },
    /// A new call is ringing
    IncomingCall { id: CallId },
    /// The packet-data context changed state
    ContextStatusChanged { status: ContextStatus },
    /// SIM authentication state, e.g. `READY` or `SIM PIN`
    AuthStatus { status: String },
    /// A message was stored on the device
    NewMessage { storage: String, index: u32 },
    /// A message was delivered without being stored
    IncomingMessage { header: String, pdu: String },
    /// The engine stopped; no further events follow
    Closed,
}
