//! Call lifecycle: dial, answer, hang up, call list

use super::{Mediator, MediatorContext, Step};
use crate::command::{CommandSpec, ReplyGroup};
use crate::error::{CapabilityError, ModemError, ModemResult};
use crate::operation::{DialParams, Operation, OperationKind, OperationOutput};
use crate::parse::{fields_of, is_dialable, numeric_field, text_field, tuple_to_number, NUMBER_NATIONAL};
use crate::state::{CallDirection, CallId, CallInfo, CallKind, CallStatus, ConnectionState};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// `D<number>;`, creating an outgoing call
#[derive(Debug)]
pub struct DialMediator {
    params: DialParams,
    call: Option<CallId>,
}

impl DialMediator {
    pub fn new(params: DialParams) -> Self {
        Self { params, call: None }
    }

    fn release(&mut self, state: &mut ConnectionState) {
        if let Some(id) = self.call.take() {
            if state.call(id).is_some() {
                if let Err(e) = state.release_call(id) {
                    warn!("Could not release call {}: {}", id, e);
                }
            }
        }
    }
}

impl Mediator for DialMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::Dial
    }

    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        let number = self.params.number.trim();
        if !is_dialable(number) {
            return Err(ModemError::invalid_parameter(format!("'{}' is not a dialable number", number)));
        }
        let dialing = ctx.state.calls().any(|c| {
            c.direction == CallDirection::Outgoing
                && matches!(c.status, CallStatus::Initiating | CallStatus::Outgoing)
        });
        if dialing {
            return Err(CapabilityError::DialInProgress.into());
        }

        let id = ctx
            .state
            .new_call(CallDirection::Outgoing, self.params.kind, Some(number.to_string()))?;
        self.call = Some(id);
        info!("Dialing {} as call {}", number, id);

        Ok(match self.params.kind {
            CallKind::Voice => CommandSpec::new(format!("D{};", number)),
            CallKind::Data => CommandSpec::new(format!("D{}", number)).succeeds_on("CONNECT"),
        })
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        let Some(id) = self.call else {
            return Step::Fail(ModemError::internal("dial completed without a call"));
        };
        let target = match self.params.kind {
            CallKind::Voice => CallStatus::Outgoing,
            CallKind::Data => CallStatus::Active,
        };
        match ctx.state.call(id).map(|c| c.status) {
            // Call progress may already have moved it along
            Some(CallStatus::Initiating) | Some(CallStatus::Outgoing) => {
                if let Err(e) = ctx.state.advance_call(id, target) {
                    warn!("{}", e);
                }
            }
            Some(_) => {}
            None => {
                debug!("Call {} ended before the dial completed", id);
            }
        }
        Step::Succeed(OperationOutput::Call(id))
    }

    fn on_failure(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        self.release(ctx.state);
        Step::Fail(ctx.failure(reply))
    }

    fn on_cancel(&mut self, ctx: &mut MediatorContext<'_>) {
        if self.call.is_some() {
            self.release(ctx.state);
            ctx.send_detached(CommandSpec::new("H"));
        }
    }
}

/// `A`, accepting the ringing call
#[derive(Debug)]
pub struct AnswerMediator {
    call: Option<CallId>,
}

impl AnswerMediator {
    pub fn new(call: Option<CallId>) -> Self {
        Self { call }
    }
}

impl Mediator for AnswerMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::Answer
    }

    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        let id = match self.call {
            Some(id) => id,
            None => ctx.state.ringing_call().ok_or(CapabilityError::NoCall)?,
        };
        let call = ctx.state.call(id).ok_or(CapabilityError::CallNotFound(id))?;
        if call.direction != CallDirection::Incoming || call.status != CallStatus::Initiating {
            return Err(CapabilityError::CallState { id, status: call.status }.into());
        }
        self.call = Some(id);
        Ok(CommandSpec::new("A"))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        let Some(id) = self.call else {
            return Step::Fail(ModemError::internal("answer completed without a call"));
        };
        if ctx.state.call(id).is_some() {
            if let Err(e) = ctx.state.advance_call(id, CallStatus::Active) {
                warn!("{}", e);
            }
        }
        Step::Succeed(OperationOutput::Call(id))
    }
}

/// `H` or `+CHLD=1x`, releasing one or all calls
#[derive(Debug)]
pub struct HangUpMediator {
    call: Option<CallId>,
    /// Calls moved to `Releasing`, with the status each had before
    targets: Vec<(CallId, CallStatus)>,
}

impl HangUpMediator {
    /// `None` releases every call
    pub fn new(call: Option<CallId>) -> Self {
        Self {
            call,
            targets: Vec::new(),
        }
    }

    /// Put the targets back where they were; the device still has them
    fn restore(&mut self, state: &mut ConnectionState) {
        for (id, previous) in self.targets.drain(..) {
            if state.call(id).map(|c| c.status) == Some(CallStatus::Releasing) {
                if let Err(e) = state.restore_call(id, previous) {
                    warn!("{}", e);
                }
            }
        }
    }
}

impl Mediator for HangUpMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::HangUp
    }

    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        let spec = match self.call {
            Some(id) => {
                let call = ctx.state.call(id).ok_or(CapabilityError::CallNotFound(id))?;
                if call.status == CallStatus::Releasing {
                    return Err(CapabilityError::CallState { id, status: call.status }.into());
                }
                self.targets = vec![(id, call.status)];
                if ctx.state.call_count() > 1 {
                    CommandSpec::new(format!("+CHLD=1{}", id))
                } else {
                    CommandSpec::new("H")
                }
            }
            None => {
                self.targets = ctx
                    .state
                    .calls()
                    .filter(|c| c.status != CallStatus::Releasing)
                    .map(|c| (c.id, c.status))
                    .collect();
                if self.targets.is_empty() {
                    return Err(CapabilityError::NoCall.into());
                }
                CommandSpec::new("H")
            }
        };

        for (id, _) in &self.targets {
            if let Err(e) = ctx.state.transition_call(*id, CallStatus::Releasing) {
                warn!("{}", e);
            }
        }
        Ok(spec)
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        for (id, _) in &self.targets {
            if ctx.state.call(*id).is_some() {
                if let Err(e) = ctx.state.transition_call(*id, CallStatus::Idle) {
                    warn!("{}", e);
                }
            }
        }
        Step::Succeed(OperationOutput::Done)
    }

    fn on_failure(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        self.restore(ctx.state);
        // The device decides what is still up
        ctx.spawn(Operation::GetCallStatus);
        Step::Fail(ctx.failure(reply))
    }

    fn on_cancel(&mut self, ctx: &mut MediatorContext<'_>) {
        // Queued behind the hang-up, so it sees its effect
        self.restore(ctx.state);
        ctx.spawn(Operation::GetCallStatus);
    }
}

/// `+CLCC`, reconciling the call table with the device
#[derive(Debug, Default)]
pub struct GetCallStatusMediator;

impl GetCallStatusMediator {
    pub fn new() -> Self {
        Self
    }
}

/// Decode one `+CLCC: id,dir,stat,mode,mpty[,"number",type]` line
pub(crate) fn parse_clcc(line: &str) -> Option<CallInfo> {
    let fields = fields_of(line);
    let id: CallId = numeric_field(&fields, 0)?;
    let direction = match numeric_field::<u8>(&fields, 1)? {
        0 => CallDirection::Outgoing,
        _ => CallDirection::Incoming,
    };
    let status = match numeric_field::<u8>(&fields, 2)? {
        0 | 1 => CallStatus::Active,
        2 | 3 => CallStatus::Outgoing,
        _ => CallStatus::Initiating,
    };
    let kind = match numeric_field::<u8>(&fields, 3)? {
        0 => CallKind::Voice,
        _ => CallKind::Data,
    };
    let peer = text_field(&fields, 5).map(|digits| {
        let ntype = numeric_field(&fields, 6).unwrap_or(NUMBER_NATIONAL);
        tuple_to_number(&digits, ntype)
    });
    Some(CallInfo {
        id,
        status,
        direction,
        kind,
        peer,
    })
}

fn reconcile(state: &mut ConnectionState, listed: &[CallInfo]) {
    let seen: BTreeSet<CallId> = listed.iter().map(|c| c.id).collect();

    for info in listed {
        match state.call(info.id).map(|c| c.status) {
            None => {
                if let Err(e) = state.insert_call(info.id, info.direction, info.kind, info.peer.clone()) {
                    warn!("Cannot track call {}: {}", info.id, e);
                    continue;
                }
                if let Err(e) = state.advance_call(info.id, info.status) {
                    warn!("{}", e);
                }
            }
            Some(CallStatus::Releasing) => {}
            Some(status) if status != info.status => {
                if let Err(e) = state.advance_call(info.id, info.status) {
                    warn!("{}", e);
                }
            }
            Some(_) => {}
        }
        if let Some(peer) = &info.peer {
            if state.call(info.id).is_some() {
                let _ = state.set_call_peer(info.id, peer.clone());
            }
        }
    }

    let gone: Vec<CallId> = state
        .calls()
        .map(|c| c.id)
        .filter(|id| !seen.contains(id))
        .collect();
    for id in gone {
        debug!("Call {} no longer listed", id);
        if let Err(e) = state.release_call(id) {
            warn!("{}", e);
        }
    }
}

impl Mediator for GetCallStatusMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetCallStatus
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CLCC"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        let mut listed = Vec::new();
        for line in reply.lines().iter().filter(|l| l.starts_with("+CLCC:")) {
            match parse_clcc(line) {
                Some(info) => listed.push(info),
                None => return Step::malformed(reply, format!("bad call entry '{}'", line)),
            }
        }
        reconcile(ctx.state, &listed);
        Step::Succeed(OperationOutput::Calls(ctx.state.calls().cloned().collect()))
    }
}
