//! Network registration and signal

use super::{Mediator, MediatorContext, Step};
use crate::command::{CommandSpec, ReplyGroup};
use crate::error::{ModemError, ModemResult};
use crate::operation::{NetworkProvider, Operation, OperationKind, OperationOutput, ProviderStatus};
use crate::parse::{
    fields_of, numeric_field, parenthesised_groups, quoted, right_hand_side, signal_quality_to_percent,
    split_fields, text_field,
};
use crate::state::RegistrationStatus;
use std::time::Duration;
use tracing::{debug, info};

const REGISTRATION_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Percent from a `+CSQ: <rssi>,<ber>` line
fn signal_percent(line: &str) -> Option<u8> {
    numeric_field(&fields_of(line), 0).map(signal_quality_to_percent)
}

/// `+CREG?;+COPS?;+CSQ` in one go
#[derive(Debug, Default)]
pub struct GetRegistrationStatusMediator;

impl GetRegistrationStatusMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetRegistrationStatusMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetRegistrationStatus
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CREG?;+COPS?;+CSQ").with_timeout(REGISTRATION_QUERY_TIMEOUT))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        // +CREG: <n>,<stat>[,<lac>,<ci>]
        let creg = reply.find("+CREG:").map(fields_of).unwrap_or_default();
        let Some(stat) = numeric_field::<u8>(&creg, 1) else {
            return Step::malformed(reply, "no registration status");
        };
        let (registration, roaming) = RegistrationStatus::from_creg(stat);
        let lac = text_field(&creg, 2);
        let cell_id = text_field(&creg, 3);

        // +COPS: <mode>[,<format>,"<oper>"]
        let operator = reply
            .find("+COPS:")
            .and_then(|line| text_field(&fields_of(line), 2));
        let strength = reply.find("+CSQ:").and_then(signal_percent);

        ctx.state
            .update_network(registration, roaming, lac, cell_id, operator, strength);
        Step::Succeed(OperationOutput::Network(ctx.state.network().clone()))
    }
}

/// `+COPS=0`, automatic registration
#[derive(Debug, Default)]
pub struct RegisterMediator;

impl RegisterMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for RegisterMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::Register
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+COPS=0"))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        Step::Succeed(OperationOutput::Done)
    }
}

/// `+CSQ`
#[derive(Debug, Default)]
pub struct GetSignalStrengthMediator;

impl GetSignalStrengthMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetSignalStrengthMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetSignalStrength
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CSQ"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        match reply.find("+CSQ:").and_then(signal_percent) {
            Some(percent) => {
                ctx.state.set_signal_strength(percent);
                Step::Succeed(OperationOutput::SignalStrength(percent))
            }
            None => Step::malformed(reply, "no signal quality"),
        }
    }
}

/// Entries of a `+COPS: (<stat>,"<long>","<short>","<numeric>"),...` line
///
/// The trailing groups listing supported modes and formats carry no quoted
/// names and are skipped.
fn parse_providers(line: &str) -> Vec<NetworkProvider> {
    parenthesised_groups(right_hand_side(line))
        .into_iter()
        .filter(|group| group.contains('"'))
        .filter_map(|group| {
            let fields = split_fields(group);
            let status = numeric_field::<u8>(&fields, 0).and_then(ProviderStatus::from_cops)?;
            Some(NetworkProvider {
                code: text_field(&fields, 3)?,
                status,
                name: text_field(&fields, 1)?,
                short_name: fields.get(2).cloned().unwrap_or_default(),
            })
        })
        .collect()
}

/// `+COPS=?`, a network scan
///
/// Takes the long `+COPS=?` deadline from the timeout table.
#[derive(Debug, Default)]
pub struct ListProvidersMediator;

impl ListProvidersMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for ListProvidersMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::ListProviders
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+COPS=?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        let providers = reply.find("+COPS:").map(parse_providers).unwrap_or_default();
        debug!("Network scan found {} providers", providers.len());
        Step::Succeed(OperationOutput::Providers(providers))
    }
}

/// `+COPS=2`, deregister from the network
#[derive(Debug, Default)]
pub struct UnregisterMediator;

impl UnregisterMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for UnregisterMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::Unregister
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+COPS=2"))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        ctx.state
            .set_registration(RegistrationStatus::Unregistered, false, None, None);
        Step::Succeed(OperationOutput::Done)
    }
}

/// `+COPS=1,2,"<code>"`, manual registration
#[derive(Debug)]
pub struct RegisterWithProviderMediator {
    code: String,
}

impl RegisterWithProviderMediator {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl Mediator for RegisterWithProviderMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::RegisterWithProvider
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        let valid = (5..=6).contains(&self.code.len()) && self.code.chars().all(|c| c.is_ascii_digit());
        if !valid {
            return Err(ModemError::invalid_parameter(format!(
                "'{}' is not a numeric operator code",
                self.code
            )));
        }
        Ok(CommandSpec::new(format!("+COPS=1,2,{}", quoted(&self.code))))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        info!("Registered with operator {}", self.code);
        ctx.spawn(Operation::GetRegistrationStatus);
        Step::Succeed(OperationOutput::Done)
    }
}
