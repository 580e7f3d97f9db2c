//! Operation state machines
//!
//! A [`Mediator`] turns one [`Operation`] into a sequence of AT commands. The
//! engine calls [`Mediator::trigger`] once, writes the returned command, and
//! hands each completed reply group to [`Mediator::on_success`] or
//! [`Mediator::on_failure`]. Those return the next [`Step`]: another command,
//! or the final result. A mediator settles exactly once; the engine drops it
//! right after.
//!
//! Mediators never see the channel. They read and change the
//! [`ConnectionState`] through the [`MediatorContext`], and may ask the
//! engine to start follow-up operations or to send fire-and-forget commands.

mod call;
mod device;
mod network;
mod pdp;
mod sim;

pub use call::{AnswerMediator, DialMediator, GetCallStatusMediator, HangUpMediator};
pub use device::{
    GetAntennaPowerMediator, GetDeviceInfoMediator, GetFeaturesMediator, RawCommandMediator, SendMessageMediator,
    SetAntennaPowerMediator,
};
pub use network::{
    GetRegistrationStatusMediator, GetSignalStrengthMediator, ListProvidersMediator, RegisterMediator,
    RegisterWithProviderMediator, UnregisterMediator,
};
pub use pdp::{ActivateContextMediator, DeactivateContextMediator, DEFAULT_DATA_DIAL};
pub use sim::{
    ChangeAuthCodeMediator, GetAuthStatusMediator, GetImsiMediator, GetServiceCenterNumberMediator,
    RetrieveMessagebookMediator, RetrievePhonebookMediator, SendAuthCodeMediator, UnlockMediator,
};

use crate::command::{CommandSpec, ReplyGroup, TerminalSet};
use crate::error::{ModemError, ModemResult, ProtocolError};
use crate::operation::{Operation, OperationKind, OperationOutput};
use crate::provider::ProviderTable;
use crate::state::ConnectionState;
use std::fmt;

/// What a mediator wants after a reply
#[derive(Debug)]
pub enum Step {
    /// Write another command and wait for its reply
    Send(CommandSpec),
    Succeed(OperationOutput),
    Fail(ModemError),
}

impl Step {
    /// Fail with a payload that did not parse
    pub fn malformed(reply: &ReplyGroup, reason: impl Into<String>) -> Self {
        Step::Fail(ProtocolError::malformed(reply.command(), reason).into())
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Step::Send(_))
    }
}

impl From<ModemResult<OperationOutput>> for Step {
    fn from(result: ModemResult<OperationOutput>) -> Self {
        match result {
            Ok(output) => Step::Succeed(output),
            Err(e) => Step::Fail(e),
        }
    }
}

/// Where a mediator is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediatorState {
    Created,
    /// Waiting for the reply to command number `n` (from 1)
    AwaitingReply(usize),
    Succeeded,
    Failed,
}

impl MediatorState {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// State after `step` was decided
    pub fn after(self, step: &Step) -> Self {
        match (self, step) {
            (Self::Created, Step::Send(_)) => Self::AwaitingReply(1),
            (Self::AwaitingReply(n), Step::Send(_)) => Self::AwaitingReply(n + 1),
            (_, Step::Succeed(_)) => Self::Succeeded,
            (_, Step::Fail(_)) => Self::Failed,
            (settled, Step::Send(_)) => settled,
        }
    }
}

/// What mediators may touch while handling a step
pub struct MediatorContext<'a> {
    pub state: &'a mut ConnectionState,
    pub providers: &'a ProviderTable,
    pub terminals: &'a TerminalSet,
    follow_ups: Vec<Operation>,
    detached: Vec<CommandSpec>,
}

impl<'a> MediatorContext<'a> {
    pub fn new(
        state: &'a mut ConnectionState,
        providers: &'a ProviderTable,
        terminals: &'a TerminalSet,
    ) -> Self {
        Self {
            state,
            providers,
            terminals,
            follow_ups: Vec::new(),
            detached: Vec::new(),
        }
    }

    /// Start `operation` once the current step is done
    ///
    /// The follow-up runs on its own and its result is only logged.
    pub fn spawn(&mut self, operation: Operation) {
        self.follow_ups.push(operation);
    }

    /// Queue a command nobody waits for
    pub fn send_detached(&mut self, spec: CommandSpec) {
        self.detached.push(spec);
    }

    /// Default failure mapping for `reply`
    pub fn failure(&self, reply: &ReplyGroup) -> ModemError {
        ModemError::from_reply(reply, self.terminals)
    }

    pub fn into_parts(self) -> (Vec<Operation>, Vec<CommandSpec>) {
        (self.follow_ups, self.detached)
    }
}

impl fmt::Debug for MediatorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatorContext")
            .field("follow_ups", &self.follow_ups)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

/// State machine of one operation
pub trait Mediator: Send + fmt::Debug {
    fn kind(&self) -> OperationKind;

    /// Validate against the current state and return the first command
    ///
    /// An error here settles the operation before anything is written.
    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec>;

    /// The last command ended with a success terminator
    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step;

    /// The last command failed, timed out or lost the channel
    fn on_failure(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        Step::Fail(ctx.failure(reply))
    }

    /// The caller gave up; undo whatever trigger or a step changed
    fn on_cancel(&mut self, _ctx: &mut MediatorContext<'_>) {}
}
