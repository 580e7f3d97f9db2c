//! Packet-data context activation and deactivation

use super::{Mediator, MediatorContext, Step};
use crate::command::{CommandSpec, ReplyGroup};
use crate::error::{CapabilityError, ModemError, ModemResult};
use crate::operation::{ContextRequest, OperationKind, OperationOutput};
use crate::parse::quoted;
use crate::provider::AuthMethod;
use crate::state::{ContextParams, ContextStatus};
use std::time::Duration;
use tracing::{info, warn};

/// Dial string of standard devices
pub const DEFAULT_DATA_DIAL: &str = "*99#";

const DATA_DIAL_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivationStep {
    Define,
    Qos,
    Dial,
}

/// `+CGDCONT`, optional `+CGQREQ`, then the data dial
///
/// Succeeds on `CONNECT`. A carrier-lost terminator on the dial is reported
/// as [`ProtocolError::NoCarrier`](crate::error::ProtocolError::NoCarrier);
/// every failure puts the context back to idle.
#[derive(Debug)]
pub struct ActivateContextMediator {
    request: ContextRequest,
    dial: String,
    step: ActivationStep,
    qos: Option<String>,
    activating: bool,
}

impl ActivateContextMediator {
    pub fn new(request: ContextRequest, dial: impl Into<String>) -> Self {
        Self {
            request,
            dial: dial.into(),
            step: ActivationStep::Define,
            qos: None,
            activating: false,
        }
    }

    fn params(&mut self, ctx: &MediatorContext<'_>) -> ModemResult<ContextParams> {
        if let Some(apn) = self.request.apn.clone() {
            let auth = if self.request.user.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::Pap
            };
            return Ok(ContextParams {
                apn,
                user: self.request.user.clone(),
                password: self.request.password.clone(),
                auth,
                dns: Vec::new(),
                provider: None,
            });
        }

        let operator = ctx
            .state
            .network()
            .operator
            .clone()
            .ok_or_else(|| CapabilityError::UnknownProvider("(not registered)".to_string()))?;
        let entry = ctx
            .providers
            .lookup(&operator)
            .ok_or(CapabilityError::UnknownProvider(operator))?;
        self.qos = entry.qos.clone();

        let pick = |requested: &str, configured: &str| {
            if requested.is_empty() {
                configured.to_string()
            } else {
                requested.to_string()
            }
        };
        Ok(ContextParams {
            apn: entry.apn.clone(),
            user: pick(&self.request.user, &entry.user),
            password: pick(&self.request.password, &entry.password),
            auth: entry.auth,
            dns: entry.dns.clone(),
            provider: Some(entry.name.clone()),
        })
    }

    fn dial_command(&self) -> CommandSpec {
        CommandSpec::new(format!("D{}", self.dial))
            .succeeds_on("CONNECT")
            .with_timeout(DATA_DIAL_TIMEOUT)
    }

    fn abort(&mut self, ctx: &mut MediatorContext<'_>) {
        if std::mem::take(&mut self.activating) {
            if let Err(e) = ctx.state.abort_activation() {
                warn!("{}", e);
            }
        }
    }
}

impl Mediator for ActivateContextMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::ActivateContext
    }

    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        match ctx.state.context() {
            ContextStatus::Idle => {}
            ContextStatus::Activating(_) => return Err(CapabilityError::ContextActivating.into()),
            ContextStatus::Active(_) => return Err(CapabilityError::ContextActive.into()),
        }
        let params = self.params(ctx)?;
        let apn = params.apn.clone();
        info!(
            "Activating context on APN {} ({})",
            apn,
            params.provider.as_deref().unwrap_or("explicit")
        );
        ctx.state.begin_activation(params)?;
        self.activating = true;
        Ok(CommandSpec::new(format!("+CGDCONT=1,\"IP\",{}", quoted(&apn))))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        match self.step {
            ActivationStep::Define => match self.qos.take() {
                Some(qos) => {
                    self.step = ActivationStep::Qos;
                    Step::Send(CommandSpec::new(format!("+CGQREQ={}", qos)))
                }
                None => {
                    self.step = ActivationStep::Dial;
                    Step::Send(self.dial_command())
                }
            },
            ActivationStep::Qos => {
                self.step = ActivationStep::Dial;
                Step::Send(self.dial_command())
            }
            ActivationStep::Dial => {
                self.activating = false;
                if let Err(e) = ctx.state.complete_activation() {
                    return Step::Fail(ModemError::internal(e.to_string()));
                }
                match ctx.state.context().params() {
                    Some(params) => Step::Succeed(OperationOutput::Context(params.clone())),
                    None => Step::Fail(ModemError::internal("context vanished after connect")),
                }
            }
        }
    }

    fn on_failure(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        self.abort(ctx);
        let error = ctx.failure(reply);
        if let ModemError::Protocol(e) = &error {
            if e.is_no_carrier() {
                info!("Context activation got no carrier");
            }
        }
        Step::Fail(error)
    }

    fn on_cancel(&mut self, ctx: &mut MediatorContext<'_>) {
        self.abort(ctx);
    }
}

/// `+CGACT=0,1`
#[derive(Debug, Default)]
pub struct DeactivateContextMediator;

impl DeactivateContextMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for DeactivateContextMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::DeactivateContext
    }

    fn trigger(&mut self, ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        match ctx.state.context() {
            ContextStatus::Active(_) => Ok(CommandSpec::new("+CGACT=0,1")),
            ContextStatus::Activating(_) => Err(CapabilityError::ContextActivating.into()),
            ContextStatus::Idle => Err(CapabilityError::ContextNotActive.into()),
        }
    }

    fn on_success(&mut self, _reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        // Carrier loss may have dropped it meanwhile
        if ctx.state.context().is_active() {
            if let Err(e) = ctx.state.deactivate() {
                warn!("{}", e);
            }
        }
        Step::Succeed(OperationOutput::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::mediator::testing::{failed, sent, succeeded, Harness};
    use crate::state::RegistrationStatus;

    fn explicit(apn: &str) -> ActivateContextMediator {
        ActivateContextMediator::new(
            ContextRequest {
                apn: Some(apn.to_string()),
                ..Default::default()
            },
            DEFAULT_DATA_DIAL,
        )
    }

    #[test]
    fn activation_connects() {
        let mut h = Harness::default();
        let mut activate = explicit("internet");

        let define = h.trigger(&mut activate).unwrap();
        assert_eq!(define.text(), "+CGDCONT=1,\"IP\",\"internet\"");
        assert!(matches!(h.state.context(), ContextStatus::Activating(_)));

        let dial = sent(h.reply(&mut activate, &define, &[], "OK"));
        assert_eq!(dial.text(), "D*99#");
        assert_eq!(dial.timeout(), Some(Duration::from_secs(180)));

        let output = succeeded(h.reply(&mut activate, &dial, &[], "CONNECT 115200"));
        assert!(matches!(output, OperationOutput::Context(ref p) if p.apn == "internet"));
        assert!(h.state.context().is_active());
    }

    #[test]
    fn no_carrier_leaves_context_idle() {
        let mut h = Harness::default();
        let mut activate = explicit("internet");
        let define = h.trigger(&mut activate).unwrap();
        let dial = sent(h.reply(&mut activate, &define, &[], "OK"));

        let err = failed(h.reply(&mut activate, &dial, &[], "NO CARRIER"));
        assert!(matches!(err, ModemError::Protocol(ProtocolError::NoCarrier { .. })));
        assert_eq!(*h.state.context(), ContextStatus::Idle);
    }

    #[test]
    fn define_error_leaves_context_idle() {
        let mut h = Harness::default();
        let mut activate = explicit("internet");
        let define = h.trigger(&mut activate).unwrap();
        let err = failed(h.reply(&mut activate, &define, &[], "ERROR"));
        assert!(matches!(err, ModemError::Protocol(ProtocolError::DeviceFailed { .. })));
        assert!(h.state.context().is_idle());
    }

    #[test]
    fn second_activation_is_refused() {
        let mut h = Harness::default();
        let mut first = explicit("internet");
        h.trigger(&mut first).unwrap();
        assert!(matches!(
            h.trigger(&mut explicit("internet")),
            Err(ModemError::Capability(CapabilityError::ContextActivating))
        ));
    }

    #[test]
    fn provider_lookup_adds_qos_step() {
        let mut h = Harness::default();
        h.state
            .update_network(RegistrationStatus::Registered, false, None, None, Some("T-Mobile D".into()), None);

        let mut activate = ActivateContextMediator::new(ContextRequest::default(), "*99***1#");
        let define = h.trigger(&mut activate).unwrap();
        assert_eq!(define.text(), "+CGDCONT=1,\"IP\",\"internet.t-d1.de\"");

        let qos = sent(h.reply(&mut activate, &define, &[], "OK"));
        assert!(qos.text().starts_with("+CGQREQ="));
        let dial = sent(h.reply(&mut activate, &qos, &[], "OK"));
        assert_eq!(dial.text(), "D*99***1#");
        let output = succeeded(h.reply(&mut activate, &dial, &[], "CONNECT"));
        match output {
            OperationOutput::Context(params) => {
                assert_eq!(params.provider.as_deref(), Some("T-Mobile"));
                assert_eq!(params.dns, vec!["193.254.160.1".to_string()]);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn unknown_operator_is_refused() {
        let mut h = Harness::default();
        let mut activate = ActivateContextMediator::new(ContextRequest::default(), DEFAULT_DATA_DIAL);
        assert!(matches!(
            h.trigger(&mut activate),
            Err(ModemError::Capability(CapabilityError::UnknownProvider(_)))
        ));

        h.state
            .update_network(RegistrationStatus::Registered, false, None, None, Some("Nowhere Mobile".into()), None);
        assert!(matches!(
            h.trigger(&mut activate),
            Err(ModemError::Capability(CapabilityError::UnknownProvider(op))) if op == "Nowhere Mobile"
        ));
        assert!(h.state.context().is_idle());
    }

    #[test]
    fn cancel_rolls_back() {
        let mut h = Harness::default();
        let mut activate = explicit("internet");
        h.trigger(&mut activate).unwrap();
        h.cancel(&mut activate);
        assert!(h.state.context().is_idle());
    }

    #[test]
    fn deactivation() {
        let mut h = Harness::default();
        assert!(matches!(
            h.trigger(&mut DeactivateContextMediator::new()),
            Err(ModemError::Capability(CapabilityError::ContextNotActive))
        ));

        let mut activate = explicit("internet");
        let define = h.trigger(&mut activate).unwrap();
        let dial = sent(h.reply(&mut activate, &define, &[], "OK"));
        succeeded(h.reply(&mut activate, &dial, &[], "CONNECT"));

        let mut deactivate = DeactivateContextMediator::new();
        let spec = h.trigger(&mut deactivate).unwrap();
        assert_eq!(succeeded(h.reply(&mut deactivate, &spec, &[], "OK")), OperationOutput::Done);
        assert!(h.state.context().is_idle());
    }
}
