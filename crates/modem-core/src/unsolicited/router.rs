//! Handlers for unsolicited notifications

use super::{Notification, NotificationTable, NotificationTag};
use crate::events::ModemEvent;
use crate::operation::Operation;
use crate::parse::signal_quality_to_percent;
use crate::state::{CallDirection, CallId, CallKind, CallStatus, ConnectionState, RegistrationStatus};
use tracing::{debug, info, trace, warn};

/// `%CPI` message types
mod cpi {
    pub const SETUP: u8 = 0;
    pub const DISCONNECT: u8 = 1;
    pub const ALERT: u8 = 2;
    pub const PROCEED: u8 = 3;
    pub const CONNECTED: u8 = 6;
    pub const RELEASE: u8 = 7;
    pub const REJECT: u8 = 8;
    pub const REQUEST: u8 = 9;
}

/// Routes notification lines to their handlers
///
/// Handlers run on the engine task with exclusive access to the
/// [`ConnectionState`]. They never block and never talk to the device
/// directly; when a handler needs the device queried it returns the
/// follow-up operation and the engine starts it.
#[derive(Debug, Clone, Default)]
pub struct UnsolicitedRouter {
    table: NotificationTable,
}

impl UnsolicitedRouter {
    pub fn new(table: NotificationTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &NotificationTable {
        &self.table
    }

    /// Handle one notification, returning operations to start afterwards
    ///
    /// `lines` is the notification line, plus the PDU line for tags that
    /// carry one. Lines without a known prefix are logged and dropped.
    pub fn route(&self, lines: &[String], state: &mut ConnectionState) -> Vec<Operation> {
        let Some(first) = lines.first() else {
            return Vec::new();
        };
        let Some(tag) = self.table.lookup(first) else {
            debug!("Discarding unsolicited line '{}'", first);
            return Vec::new();
        };
        let notification = match Notification::parse(tag, lines) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("Dropping {:?} notification: {}", tag, e);
                return Vec::new();
            }
        };

        trace!("Unsolicited {:?}", notification);
        let mut follow_ups = Vec::new();
        match notification {
            Notification::Registration {
                status,
                roaming,
                lac,
                cell_id,
            } => on_registration(state, status, roaming, lac, cell_id, &mut follow_ups),
            Notification::Ring => on_ring(state, None),
            Notification::CallRing { kind } => {
                if kind.starts_with("VOICE") {
                    on_ring(state, None);
                } else {
                    debug!("Ignoring {} ring", kind);
                }
            }
            Notification::CallerId { number } => on_ring(state, Some(number)),
            Notification::CallWaiting { number } => on_ring(state, number),
            Notification::SignalQuality { rssi } => {
                state.set_signal_strength(signal_quality_to_percent(rssi));
            }
            Notification::CallProgress {
                id,
                message,
                direction,
                number,
            } => on_call_progress(state, id, message, direction, number),
            Notification::CarrierLost | Notification::Busy => on_carrier_lost(state),
            Notification::NewMessage { storage, index } => {
                info!("New message {} in {}", index, storage);
                state.emit(ModemEvent::NewMessage { storage, index });
            }
            Notification::IncomingMessage { header, pdu } => {
                info!("Incoming message");
                state.emit(ModemEvent::IncomingMessage { header, pdu });
            }
            Notification::SimStatus { status } => state.announce_auth_status(status),
        }
        follow_ups
    }

    /// Whether `tag` has a prefix on this device
    pub fn handles(&self, tag: NotificationTag) -> bool {
        self.table.contains_tag(tag)
    }
}

fn on_registration(
    state: &mut ConnectionState,
    status: RegistrationStatus,
    roaming: bool,
    lac: Option<String>,
    cell_id: Option<String>,
    follow_ups: &mut Vec<Operation>,
) {
    let was_registered = state.registration() == RegistrationStatus::Registered;
    state.set_registration(status, roaming, lac, cell_id);
    if !was_registered && status == RegistrationStatus::Registered {
        // Fetch operator and signal for the new registration
        follow_ups.push(Operation::GetRegistrationStatus);
    }
}

/// `RING`, `+CRING`, `+CLIP` and `+CCWA` all announce the same call
fn on_ring(state: &mut ConnectionState, peer: Option<String>) {
    if let Some(id) = state.ringing_call() {
        if let Some(peer) = peer {
            if let Err(e) = state.set_call_peer(id, peer) {
                warn!("{}", e);
            }
        }
        return;
    }
    match state.new_call(CallDirection::Incoming, CallKind::Voice, peer) {
        Ok(id) => info!("Incoming call {}", id),
        Err(e) => warn!("Ignoring incoming call: {}", e),
    }
}

fn on_call_progress(
    state: &mut ConnectionState,
    id: CallId,
    message: u8,
    direction: CallDirection,
    number: Option<String>,
) {
    let known = state.call(id).is_some();
    let result = match message {
        cpi::SETUP if !known => state
            .insert_call(id, CallDirection::Incoming, CallKind::Voice, number)
            .map_err(|e| e.to_string()),
        cpi::REQUEST | cpi::ALERT | cpi::PROCEED => {
            if !known {
                if let Err(e) = state.insert_call(id, direction, CallKind::Voice, number) {
                    warn!("Ignoring call progress for {}: {}", id, e);
                    return;
                }
            }
            if direction == CallDirection::Outgoing {
                state.advance_call(id, CallStatus::Outgoing).map_err(|e| e.to_string())
            } else {
                Ok(())
            }
        }
        cpi::CONNECTED if known => state.advance_call(id, CallStatus::Active).map_err(|e| e.to_string()),
        cpi::DISCONNECT | cpi::RELEASE | cpi::REJECT if known => {
            state.release_call(id).map_err(|e| e.to_string())
        }
        _ => {
            trace!("Call progress {} for call {} ignored", message, id);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("Call progress {} for call {}: {}", message, id, e);
    }
}

fn on_carrier_lost(state: &mut ConnectionState) {
    let released = state.release_all_calls();
    let dropped = state.drop_context();
    if released == 0 && !dropped {
        debug!("Carrier lost with nothing connected");
    } else {
        info!("Carrier lost: released {} calls, context dropped: {}", released, dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ContextParams, ContextStatus};
    use crate::provider::AuthMethod;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|l| l.to_string()).collect()
    }

    fn calypso_router() -> UnsolicitedRouter {
        let mut table = NotificationTable::standard();
        table.insert("%CPI:", NotificationTag::CallProgress);
        UnsolicitedRouter::new(table)
    }

    #[test]
    fn ring_creates_incoming_call_once() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();

        assert!(router.route(&lines(&["RING"]), &mut state).is_empty());
        let call = state.calls().next().cloned().unwrap();
        assert_eq!(call.status, CallStatus::Initiating);
        assert_eq!(call.direction, CallDirection::Incoming);

        router.route(&lines(&["RING"]), &mut state);
        router.route(&lines(&["+CLIP: \"4915112345\",145,,,,0"]), &mut state);
        assert_eq!(state.call_count(), 1);
        assert_eq!(state.call(call.id).unwrap().peer.as_deref(), Some("+4915112345"));

        let events = state.take_events();
        assert!(events.contains(&ModemEvent::IncomingCall { id: call.id }));
    }

    #[test]
    fn data_ring_is_ignored() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();
        router.route(&lines(&["+CRING: GPRS \"IP\""]), &mut state);
        assert_eq!(state.call_count(), 0);
    }

    #[test]
    fn registration_spawns_query() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();

        let follow = router.route(&lines(&["+CREG: 2"]), &mut state);
        assert!(follow.is_empty());
        assert_eq!(state.registration(), RegistrationStatus::Searching);

        let follow = router.route(&lines(&["+CREG: 1,\"00C3\",\"0A1F\""]), &mut state);
        assert_eq!(follow, vec![Operation::GetRegistrationStatus]);
        assert_eq!(state.network().lac.as_deref(), Some("00C3"));

        // Cell change while registered needs no query
        let follow = router.route(&lines(&["+CREG: 1,\"00C3\",\"0B00\""]), &mut state);
        assert!(follow.is_empty());
    }

    #[test]
    fn carrier_loss_clears_calls_and_context() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();
        state
            .begin_activation(ContextParams {
                apn: "internet".into(),
                user: String::new(),
                password: String::new(),
                auth: AuthMethod::None,
                dns: Vec::new(),
                provider: None,
            })
            .unwrap();
        state.complete_activation().unwrap();
        router.route(&lines(&["RING"]), &mut state);

        router.route(&lines(&["NO CARRIER"]), &mut state);
        assert_eq!(state.call_count(), 0);
        assert_eq!(*state.context(), ContextStatus::Idle);
    }

    #[test]
    fn signal_and_messages() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();
        router.route(&lines(&["+CSQ: 31,99"]), &mut state);
        assert_eq!(state.network().strength, Some(100));

        router.route(&lines(&["+CMTI: \"SM\",4"]), &mut state);
        router.route(&lines(&["+CMT: ,20", "07911326040000F0"]), &mut state);
        let events = state.take_events();
        assert!(events.contains(&ModemEvent::NewMessage { storage: "SM".into(), index: 4 }));
        assert!(events.contains(&ModemEvent::IncomingMessage {
            header: ",20".into(),
            pdu: "07911326040000F0".into(),
        }));
    }

    #[test]
    fn sim_status_is_announced() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();
        router.route(&lines(&["+CPIN: SIM PIN"]), &mut state);
        assert_eq!(state.auth_status(), Some("SIM PIN"));
    }

    #[test]
    fn unknown_lines_are_dropped() {
        let router = UnsolicitedRouter::default();
        let mut state = ConnectionState::default();
        assert!(router.route(&lines(&["^BOOT:1,0,0"]), &mut state).is_empty());
        assert!(router.route(&lines(&["+CREG: garbage"]), &mut state).is_empty());
        assert!(state.take_events().is_empty());
    }

    #[test]
    fn call_progress_drives_outgoing_call() {
        let router = calypso_router();
        let mut state = ConnectionState::default();
        let id = state.new_call(CallDirection::Outgoing, CallKind::Voice, None).unwrap();

        router.route(&lines(&[&format!("%CPI: {},9,0,0,0,0,\"123\",129", id)]), &mut state);
        assert_eq!(state.call(id).unwrap().status, CallStatus::Outgoing);
        router.route(&lines(&[&format!("%CPI: {},6,0,1,0,0", id)]), &mut state);
        assert_eq!(state.call(id).unwrap().status, CallStatus::Active);
        router.route(&lines(&[&format!("%CPI: {},1,0,1,0,0", id)]), &mut state);
        assert!(state.call(id).is_none());
    }

    #[test]
    fn call_progress_incoming_setup() {
        let router = calypso_router();
        let mut state = ConnectionState::default();
        router.route(&lines(&["%CPI: 1,0,0,0,1,0,\"4930123\",145"]), &mut state);
        let call = state.call(1).unwrap();
        assert_eq!(call.direction, CallDirection::Incoming);
        assert_eq!(call.status, CallStatus::Initiating);
        assert_eq!(call.peer.as_deref(), Some("+4930123"));

        // Connect of an incoming call skips Outgoing
        router.route(&lines(&["%CPI: 1,6,0,1,1,0"]), &mut state);
        assert_eq!(state.call(1).unwrap().status, CallStatus::Active);
    }
}
