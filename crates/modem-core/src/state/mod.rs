//! Connection state of one modem line
//!
//! [`ConnectionState`] is owned by the engine task and mutated only while a
//! reply or an unsolicited line is being processed. Every mutator compares
//! against the current value and queues a [`ModemEvent`] only when something
//! actually changed; the engine drains those events after each turn.

mod call;

pub use call::{CallDirection, CallId, CallInfo, CallKind, CallStatus};

use crate::error::CapabilityError;
use crate::events::ModemEvent;
use crate::provider::AuthMethod;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Network registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    #[default]
    Unregistered,
    Searching,
    Registered,
    Denied,
}

impl RegistrationStatus {
    /// Decode the `<stat>` of `+CREG`, returning the status and roaming flag
    pub fn from_creg(stat: u8) -> (Self, bool) {
        match stat {
            1 => (Self::Registered, false),
            2 => (Self::Searching, false),
            3 => (Self::Denied, false),
            5 => (Self::Registered, true),
            _ => (Self::Unregistered, false),
        }
    }
}

/// Registration details and signal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub registration: RegistrationStatus,
    pub roaming: bool,
    pub operator: Option<String>,
    /// Signal strength in percent
    pub strength: Option<u8>,
    pub lac: Option<String>,
    pub cell_id: Option<String>,
}

/// Parameters of a packet-data context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextParams {
    pub apn: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub auth: AuthMethod,
    pub dns: Vec<String>,
    /// Provider entry the parameters came from
    pub provider: Option<String>,
}

/// Packet-data context lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "params", rename_all = "snake_case")]
pub enum ContextStatus {
    #[default]
    Idle,
    Activating(ContextParams),
    Active(ContextParams),
}

impl ContextStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn params(&self) -> Option<&ContextParams> {
        match self {
            Self::Idle => None,
            Self::Activating(params) | Self::Active(params) => Some(params),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Activating(_) => "activating",
            Self::Active(_) => "active",
        }
    }
}

/// Rejected state mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("call {0} does not exist")]
    UnknownCall(CallId),

    #[error("illegal transition of call {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: CallId,
        from: CallStatus,
        to: CallStatus,
    },

    #[error("illegal context transition: {from} -> {to}")]
    IllegalContextTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Read-only copy of the state for callers outside the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub network: NetworkStatus,
    pub context: ContextStatus,
    pub calls: Vec<CallInfo>,
    pub auth_status: Option<String>,
}

/// Registration, packet-data context and live calls of one line
#[derive(Debug)]
pub struct ConnectionState {
    network: NetworkStatus,
    context: ContextStatus,
    calls: BTreeMap<CallId, CallInfo>,
    auth_status: Option<String>,
    max_calls: usize,
    events: Vec<ModemEvent>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(2)
    }
}

impl ConnectionState {
    pub fn new(max_calls: usize) -> Self {
        Self {
            network: NetworkStatus::default(),
            context: ContextStatus::Idle,
            calls: BTreeMap::new(),
            auth_status: None,
            max_calls,
            events: Vec::new(),
        }
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    pub fn registration(&self) -> RegistrationStatus {
        self.network.registration
    }

    pub fn context(&self) -> &ContextStatus {
        &self.context
    }

    pub fn call(&self, id: CallId) -> Option<&CallInfo> {
        self.calls.get(&id)
    }

    pub fn calls(&self) -> impl Iterator<Item = &CallInfo> {
        self.calls.values()
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn auth_status(&self) -> Option<&str> {
        self.auth_status.as_deref()
    }

    /// The incoming call that is still ringing
    pub fn ringing_call(&self) -> Option<CallId> {
        self.calls
            .values()
            .find(|c| c.direction == CallDirection::Incoming && c.status == CallStatus::Initiating)
            .map(|c| c.id)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            network: self.network.clone(),
            context: self.context.clone(),
            calls: self.calls.values().cloned().collect(),
            auth_status: self.auth_status.clone(),
        }
    }

    /// Events queued since the last call
    pub fn take_events(&mut self) -> Vec<ModemEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: ModemEvent) {
        self.events.push(event);
    }

    // Network

    /// Apply a `+CREG` report
    pub fn set_registration(
        &mut self,
        registration: RegistrationStatus,
        roaming: bool,
        lac: Option<String>,
        cell_id: Option<String>,
    ) -> bool {
        let mut next = self.network.clone();
        next.registration = registration;
        next.roaming = roaming;
        if lac.is_some() || registration != RegistrationStatus::Registered {
            next.lac = lac;
            next.cell_id = cell_id;
        }
        if registration != RegistrationStatus::Registered {
            next.operator = None;
        }
        self.replace_network(next)
    }

    /// Apply the result of a full registration query
    ///
    /// Location is kept while registered if the reply carried none, as
    /// with [`set_registration`](Self::set_registration).
    pub fn update_network(
        &mut self,
        registration: RegistrationStatus,
        roaming: bool,
        lac: Option<String>,
        cell_id: Option<String>,
        operator: Option<String>,
        strength: Option<u8>,
    ) -> bool {
        let mut next = self.network.clone();
        next.registration = registration;
        next.roaming = roaming;
        if lac.is_some() || registration != RegistrationStatus::Registered {
            next.lac = lac;
            next.cell_id = cell_id;
        }
        next.operator = operator;
        let strength_changed = self.set_signal_strength_opt(strength);
        next.strength = self.network.strength;
        self.replace_network(next) || strength_changed
    }

    /// Signal strength in percent
    pub fn set_signal_strength(&mut self, percent: u8) -> bool {
        self.set_signal_strength_opt(Some(percent))
    }

    fn set_signal_strength_opt(&mut self, percent: Option<u8>) -> bool {
        let Some(percent) = percent else {
            return false;
        };
        if self.network.strength == Some(percent) {
            return false;
        }
        self.network.strength = Some(percent);
        self.emit(ModemEvent::SignalStrength { percent });
        true
    }

    fn replace_network(&mut self, next: NetworkStatus) -> bool {
        if next == self.network {
            return false;
        }
        if next.registration != self.network.registration {
            info!(
                "Registration {:?} -> {:?}",
                self.network.registration, next.registration
            );
        }
        self.network = next;
        self.emit(ModemEvent::RegistrationChanged {
            network: self.network.clone(),
        });
        true
    }

    // SIM

    /// Record and announce the SIM authentication state
    ///
    /// Announced even when unchanged: a successful PIN entry re-announces
    /// the state to whoever waits for it.
    pub fn announce_auth_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        self.auth_status = Some(status.clone());
        self.emit(ModemEvent::AuthStatus { status });
    }

    // Packet-data context

    /// `Idle → Activating`
    pub fn begin_activation(&mut self, params: ContextParams) -> Result<(), CapabilityError> {
        match self.context {
            ContextStatus::Idle => {}
            ContextStatus::Activating(_) => return Err(CapabilityError::ContextActivating),
            ContextStatus::Active(_) => return Err(CapabilityError::ContextActive),
        }
        self.set_context(ContextStatus::Activating(params));
        Ok(())
    }

    /// `Activating → Active`
    pub fn complete_activation(&mut self) -> Result<(), StateError> {
        match std::mem::take(&mut self.context) {
            ContextStatus::Activating(params) => {
                self.set_context(ContextStatus::Active(params));
                Ok(())
            }
            other => {
                let from = other.name();
                self.context = other;
                Err(self.context_error(from, "active"))
            }
        }
    }

    /// `Activating → Idle`
    pub fn abort_activation(&mut self) -> Result<(), StateError> {
        if !matches!(self.context, ContextStatus::Activating(_)) {
            return Err(self.context_error(self.context.name(), "idle"));
        }
        self.set_context(ContextStatus::Idle);
        Ok(())
    }

    /// `Active → Idle`
    pub fn deactivate(&mut self) -> Result<(), StateError> {
        if !self.context.is_active() {
            return Err(self.context_error(self.context.name(), "idle"));
        }
        self.set_context(ContextStatus::Idle);
        Ok(())
    }

    /// Drop whatever context exists, e.g. after the carrier was lost
    pub fn drop_context(&mut self) -> bool {
        if self.context.is_idle() {
            return false;
        }
        self.set_context(ContextStatus::Idle);
        true
    }

    fn set_context(&mut self, next: ContextStatus) {
        info!("Context {} -> {}", self.context.name(), next.name());
        self.context = next;
        self.emit(ModemEvent::ContextStatusChanged {
            status: self.context.clone(),
        });
    }

    fn context_error(&self, from: &'static str, to: &'static str) -> StateError {
        warn!("Rejected context transition {} -> {}", from, to);
        StateError::IllegalContextTransition { from, to }
    }

    // Calls

    /// Lowest call index not in use
    pub fn next_call_id(&self) -> CallId {
        (1..=CallId::MAX)
            .find(|id| !self.calls.contains_key(id))
            .unwrap_or(CallId::MAX)
    }

    /// Create a call in `Initiating` with the next free index
    pub fn new_call(
        &mut self,
        direction: CallDirection,
        kind: CallKind,
        peer: Option<String>,
    ) -> Result<CallId, CapabilityError> {
        let id = self.next_call_id();
        self.insert_call(id, direction, kind, peer)?;
        Ok(id)
    }

    /// Create a call in `Initiating` with an index chosen by the device
    pub fn insert_call(
        &mut self,
        id: CallId,
        direction: CallDirection,
        kind: CallKind,
        peer: Option<String>,
    ) -> Result<(), CapabilityError> {
        if self.calls.contains_key(&id) {
            return Err(CapabilityError::CallState {
                id,
                status: self.calls[&id].status,
            });
        }
        if self.calls.len() >= self.max_calls {
            return Err(CapabilityError::TooManyCalls(self.max_calls));
        }

        let info = CallInfo {
            id,
            status: CallStatus::Initiating,
            direction,
            kind,
            peer,
        };
        info!("Call {} created ({:?})", id, direction);
        self.calls.insert(id, info.clone());
        self.emit(ModemEvent::CallStatusChanged { call: info });
        if direction == CallDirection::Incoming {
            self.emit(ModemEvent::IncomingCall { id });
        }
        Ok(())
    }

    /// One legal step; a call reaching `Idle` is removed
    pub fn transition_call(&mut self, id: CallId, to: CallStatus) -> Result<(), StateError> {
        let call = self.calls.get_mut(&id).ok_or(StateError::UnknownCall(id))?;
        let from = call.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition(to, call.direction) {
            warn!("Rejected transition of call {}: {:?} -> {:?}", id, from, to);
            return Err(StateError::IllegalTransition { id, from, to });
        }

        call.status = to;
        let info = call.clone();
        debug!("Call {} {:?} -> {:?}", id, from, to);
        if to == CallStatus::Idle {
            self.calls.remove(&id);
        }
        self.emit(ModemEvent::CallStatusChanged { call: info });
        Ok(())
    }

    /// Move forward to `to`, passing through every intermediate status
    ///
    /// Used when the device reports a status further along than the one we
    /// know, e.g. a call list showing an outgoing call already active.
    pub fn advance_call(&mut self, id: CallId, to: CallStatus) -> Result<(), StateError> {
        let call = self.calls.get(&id).ok_or(StateError::UnknownCall(id))?;
        let from = call.status;
        if from == to {
            return Ok(());
        }
        if from.can_transition(to, call.direction) {
            return self.transition_call(id, to);
        }

        let path = CallStatus::path(call.direction);
        let start = path.iter().position(|s| *s == from).unwrap_or(0);
        let steps: Vec<CallStatus> = path[start + 1..].to_vec();
        match steps.iter().position(|s| *s == to) {
            Some(end) => {
                for step in &steps[..=end] {
                    self.transition_call(id, *step)?;
                }
                Ok(())
            }
            None => {
                warn!("Rejected transition of call {}: {:?} -> {:?}", id, from, to);
                Err(StateError::IllegalTransition { id, from, to })
            }
        }
    }

    /// `→ Releasing → Idle`
    pub fn release_call(&mut self, id: CallId) -> Result<(), StateError> {
        self.transition_call(id, CallStatus::Releasing)?;
        self.transition_call(id, CallStatus::Idle)
    }

    /// Release every live call, returning how many there were
    pub fn release_all_calls(&mut self) -> usize {
        let ids: Vec<CallId> = self.calls.keys().copied().collect();
        for id in &ids {
            if let Err(e) = self.release_call(*id) {
                warn!("Could not release call {}: {}", id, e);
            }
        }
        ids.len()
    }

    /// Return a `Releasing` call to the status it had before a hang-up the
    /// device refused
    ///
    /// This is the only way out of `Releasing` other than `Idle`, so it
    /// bypasses the transition table.
    pub fn restore_call(&mut self, id: CallId, to: CallStatus) -> Result<(), StateError> {
        let call = self.calls.get_mut(&id).ok_or(StateError::UnknownCall(id))?;
        let from = call.status;
        if from != CallStatus::Releasing || !to.is_live() || to == CallStatus::Releasing {
            warn!("Rejected restore of call {}: {:?} -> {:?}", id, from, to);
            return Err(StateError::IllegalTransition { id, from, to });
        }

        call.status = to;
        let info = call.clone();
        info!("Call {} restored to {:?}", id, to);
        self.emit(ModemEvent::CallStatusChanged { call: info });
        Ok(())
    }

    /// Record the remote number of a call
    pub fn set_call_peer(&mut self, id: CallId, peer: String) -> Result<(), StateError> {
        let call = self.calls.get_mut(&id).ok_or(StateError::UnknownCall(id))?;
        if call.peer.as_deref() == Some(peer.as_str()) {
            return Ok(());
        }
        call.peer = Some(peer);
        let info = call.clone();
        self.emit(ModemEvent::CallStatusChanged { call: info });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(apn: &str) -> ContextParams {
        ContextParams {
            apn: apn.to_string(),
            user: String::new(),
            password: String::new(),
            auth: AuthMethod::Pap,
            dns: Vec::new(),
            provider: None,
        }
    }

    fn call_statuses(events: &[ModemEvent]) -> Vec<CallStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                ModemEvent::CallStatusChanged { call } => Some(call.status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn registration_events_only_on_change() {
        let mut state = ConnectionState::default();
        assert!(state.set_registration(RegistrationStatus::Searching, false, None, None));
        assert!(!state.set_registration(RegistrationStatus::Searching, false, None, None));
        assert!(state.set_registration(
            RegistrationStatus::Registered,
            false,
            Some("00C3".into()),
            Some("0A1F".into())
        ));
        let events = state.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(state.network().lac.as_deref(), Some("00C3"));
        assert!(state.take_events().is_empty());
    }

    #[test]
    fn strength_and_operator_updates() {
        let mut state = ConnectionState::default();
        assert!(state.update_network(
            RegistrationStatus::Registered,
            false,
            Some("00C3".into()),
            Some("0A1F".into()),
            Some("O2".into()),
            Some(50)
        ));
        let events = state.take_events();
        assert!(events.contains(&ModemEvent::SignalStrength { percent: 50 }));
        assert!(events.iter().any(|e| matches!(e, ModemEvent::RegistrationChanged { .. })));
        assert_eq!(state.network().cell_id.as_deref(), Some("0A1F"));

        // A reply without location keeps the known cell
        assert!(!state.update_network(RegistrationStatus::Registered, false, None, None, Some("O2".into()), Some(50)));
        assert!(state.take_events().is_empty());
        assert_eq!(state.network().lac.as_deref(), Some("00C3"));

        assert!(state.update_network(RegistrationStatus::Searching, false, None, None, None, None));
        assert_eq!(state.network().lac, None);
        state.take_events();

        assert!(state.set_signal_strength(60));
        assert_eq!(state.take_events(), vec![ModemEvent::SignalStrength { percent: 60 }]);
    }

    #[test]
    fn creg_stat_decoding() {
        assert_eq!(RegistrationStatus::from_creg(1), (RegistrationStatus::Registered, false));
        assert_eq!(RegistrationStatus::from_creg(5), (RegistrationStatus::Registered, true));
        assert_eq!(RegistrationStatus::from_creg(2), (RegistrationStatus::Searching, false));
        assert_eq!(RegistrationStatus::from_creg(3), (RegistrationStatus::Denied, false));
        assert_eq!(RegistrationStatus::from_creg(4), (RegistrationStatus::Unregistered, false));
    }

    #[test]
    fn context_lifecycle() {
        let mut state = ConnectionState::default();
        state.begin_activation(params("internet")).unwrap();
        assert_eq!(
            state.begin_activation(params("internet")),
            Err(CapabilityError::ContextActivating)
        );
        state.complete_activation().unwrap();
        assert!(state.context().is_active());
        assert_eq!(
            state.begin_activation(params("other")),
            Err(CapabilityError::ContextActive)
        );
        assert!(state.abort_activation().is_err());
        state.deactivate().unwrap();
        assert!(state.context().is_idle());
        assert!(state.deactivate().is_err());
        assert!(state.complete_activation().is_err());
        assert_eq!(state.take_events().len(), 3);
    }

    #[test]
    fn outgoing_call_walks_the_chain() {
        let mut state = ConnectionState::default();
        let id = state
            .new_call(CallDirection::Outgoing, CallKind::Voice, Some("123".into()))
            .unwrap();
        assert_eq!(id, 1);
        state.transition_call(id, CallStatus::Outgoing).unwrap();
        state.transition_call(id, CallStatus::Active).unwrap();
        state.release_call(id).unwrap();
        assert!(state.call(id).is_none());

        let statuses = call_statuses(&state.take_events());
        assert_eq!(
            statuses,
            vec![
                CallStatus::Initiating,
                CallStatus::Outgoing,
                CallStatus::Active,
                CallStatus::Releasing,
                CallStatus::Idle
            ]
        );
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut state = ConnectionState::default();
        let id = state.new_call(CallDirection::Outgoing, CallKind::Voice, None).unwrap();
        state.take_events();

        let err = state.transition_call(id, CallStatus::Active).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                id,
                from: CallStatus::Initiating,
                to: CallStatus::Active
            }
        );
        assert_eq!(state.call(id).map(|c| c.status), Some(CallStatus::Initiating));
        assert!(state.take_events().is_empty());
        assert_eq!(
            state.transition_call(9, CallStatus::Active),
            Err(StateError::UnknownCall(9))
        );
    }

    #[test]
    fn advance_passes_intermediate_states() {
        let mut state = ConnectionState::default();
        let id = state.new_call(CallDirection::Outgoing, CallKind::Voice, None).unwrap();
        state.take_events();

        state.advance_call(id, CallStatus::Active).unwrap();
        assert_eq!(
            call_statuses(&state.take_events()),
            vec![CallStatus::Outgoing, CallStatus::Active]
        );
        assert!(state.advance_call(id, CallStatus::Outgoing).is_err());
    }

    #[test]
    fn incoming_calls_and_capacity() {
        let mut state = ConnectionState::new(2);
        let first = state.new_call(CallDirection::Incoming, CallKind::Voice, None).unwrap();
        assert_eq!(state.ringing_call(), Some(first));
        let events = state.take_events();
        assert!(events.contains(&ModemEvent::IncomingCall { id: first }));

        state.transition_call(first, CallStatus::Active).unwrap();
        assert_eq!(state.ringing_call(), None);

        let second = state.new_call(CallDirection::Outgoing, CallKind::Voice, None).unwrap();
        assert_eq!(second, 2);
        assert_eq!(
            state.new_call(CallDirection::Outgoing, CallKind::Voice, None),
            Err(CapabilityError::TooManyCalls(2))
        );

        assert_eq!(state.release_all_calls(), 2);
        assert_eq!(state.call_count(), 0);
        assert_eq!(state.next_call_id(), 1);
    }

    #[test]
    fn peer_updates_emit_once() {
        let mut state = ConnectionState::default();
        let id = state.new_call(CallDirection::Incoming, CallKind::Voice, None).unwrap();
        state.take_events();
        state.set_call_peer(id, "+4912345".into()).unwrap();
        state.set_call_peer(id, "+4912345".into()).unwrap();
        assert_eq!(state.take_events().len(), 1);
    }
}
