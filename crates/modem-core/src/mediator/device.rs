//! Device level operations: antenna power, identity, messages, raw commands

use super::{Mediator, MediatorContext, Step};
use crate::command::{CommandSpec, ReplyGroup};
use crate::error::{ModemError, ModemResult};
use crate::operation::{DeviceFeatures, DeviceInfo, MessageParams, OperationKind, OperationOutput};
use crate::parse::{fields_of, is_dialable, number_to_tuple, numeric_field, quoted, right_hand_side};
use tracing::debug;

/// Longest text message accepted in text mode
const MAX_MESSAGE_LEN: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerStep {
    Query,
    Set,
}

/// `+CFUN?`, then `+CFUN=<level>` when the level differs
#[derive(Debug)]
pub struct SetAntennaPowerMediator {
    on: bool,
    step: PowerStep,
}

impl SetAntennaPowerMediator {
    pub fn new(on: bool) -> Self {
        Self {
            on,
            step: PowerStep::Query,
        }
    }
}

impl Mediator for SetAntennaPowerMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::SetAntennaPower
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CFUN?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        match self.step {
            PowerStep::Query => {
                let Some(level) = reply
                    .find("+CFUN:")
                    .and_then(|line| numeric_field::<u8>(&fields_of(line), 0))
                else {
                    return Step::malformed(reply, "no functionality level");
                };
                if (level == 1) == self.on {
                    debug!("Antenna power already {}", if self.on { "on" } else { "off" });
                    return Step::Succeed(OperationOutput::Done);
                }
                self.step = PowerStep::Set;
                Step::Send(CommandSpec::new(format!("+CFUN={}", u8::from(self.on))))
            }
            PowerStep::Set => Step::Succeed(OperationOutput::Done),
        }
    }
}

/// `+CFUN?`; any level but 0 counts as powered
#[derive(Debug, Default)]
pub struct GetAntennaPowerMediator;

impl GetAntennaPowerMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetAntennaPowerMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetAntennaPower
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CFUN?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        match reply
            .find("+CFUN:")
            .and_then(|line| numeric_field::<u8>(&fields_of(line), 0))
        {
            Some(level) => Step::Succeed(OperationOutput::AntennaPower(level != 0)),
            None => Step::malformed(reply, "no functionality level"),
        }
    }
}

/// `+GCAP;+CGCLASS?;+FCLASS?`
#[derive(Debug, Default)]
pub struct GetFeaturesMediator;

impl GetFeaturesMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetFeaturesMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetFeatures
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+GCAP;+CGCLASS?;+FCLASS?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        // +GCAP: +CGSM,+FCLASS,+DS
        let Some(gcap) = reply.find("+GCAP:") else {
            return Step::malformed(reply, "no capability list");
        };
        let capabilities: Vec<String> = fields_of(gcap).into_iter().filter(|c| !c.is_empty()).collect();
        let gprs_class = reply
            .find("+CGCLASS:")
            .map(|line| right_hand_side(line).trim_matches('"').to_string());
        // The fax class answer is often unprefixed
        let fax_classes = reply
            .find("+FCLASS:")
            .map(right_hand_side)
            .or_else(|| reply.lines().iter().map(String::as_str).find(|line| !line.starts_with('+')))
            .map(|classes| classes.trim().to_string());
        Step::Succeed(OperationOutput::Features(DeviceFeatures {
            capabilities,
            gprs_class,
            fax_classes,
        }))
    }
}

/// `+CGMI;+CGMM;+CGMR;+CGSN`
#[derive(Debug, Default)]
pub struct GetDeviceInfoMediator;

impl GetDeviceInfoMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetDeviceInfoMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetDeviceInfo
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CGMI;+CGMM;+CGMR;+CGSN"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        // Some devices prefix each answer with the command name
        let values: Vec<String> = reply
            .lines()
            .iter()
            .map(|line| {
                if line.starts_with('+') {
                    right_hand_side(line).to_string()
                } else {
                    line.trim().to_string()
                }
            })
            .collect();
        match values.as_slice() {
            [manufacturer, model, revision, imei, ..] => Step::Succeed(OperationOutput::DeviceInfo(DeviceInfo {
                manufacturer: manufacturer.clone(),
                model: model.clone(),
                revision: revision.clone(),
                imei: imei.clone(),
            })),
            _ => Step::malformed(reply, format!("expected 4 lines, got {}", values.len())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageStep {
    TextMode,
    Submit,
}

/// `+CMGF=1`, then `+CMGS` with the text as body
#[derive(Debug)]
pub struct SendMessageMediator {
    params: MessageParams,
    step: MessageStep,
}

impl SendMessageMediator {
    pub fn new(params: MessageParams) -> Self {
        Self {
            params,
            step: MessageStep::TextMode,
        }
    }

    fn submit(&self) -> CommandSpec {
        let (digits, ntype) = number_to_tuple(&self.params.number);
        CommandSpec::new(format!("+CMGS={},{}", quoted(digits), ntype)).with_body(self.params.text.clone())
    }
}

impl Mediator for SendMessageMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::SendMessage
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        if !is_dialable(&self.params.number) {
            return Err(ModemError::invalid_parameter(format!(
                "'{}' is not a valid recipient",
                self.params.number
            )));
        }
        let text = &self.params.text;
        if text.is_empty() || text.chars().count() > MAX_MESSAGE_LEN || text.contains('\u{1a}') {
            return Err(ModemError::invalid_parameter(format!(
                "message text must be 1 to {} characters",
                MAX_MESSAGE_LEN
            )));
        }
        Ok(CommandSpec::new("+CMGF=1"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        match self.step {
            MessageStep::TextMode => {
                self.step = MessageStep::Submit;
                Step::Send(self.submit())
            }
            MessageStep::Submit => match reply
                .find("+CMGS:")
                .and_then(|line| numeric_field::<u16>(&fields_of(line), 0))
            {
                Some(reference) => Step::Succeed(OperationOutput::MessageReference(reference)),
                None => Step::malformed(reply, "no message reference"),
            },
        }
    }
}

/// Any command, answered with its information lines
#[derive(Debug)]
pub struct RawCommandMediator {
    command: String,
}

impl RawCommandMediator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Mediator for RawCommandMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::RawCommand
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        let command = self.command.trim();
        let command = match command.get(..2) {
            Some(at) if at.eq_ignore_ascii_case("AT") => &command[2..],
            _ => command,
        };
        if command.contains(|c| c == '\r' || c == '\n') {
            return Err(ModemError::invalid_parameter("command must be a single line"));
        }
        Ok(CommandSpec::new(command))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        Step::Succeed(OperationOutput::Lines(reply.lines().to_vec()))
    }
}
