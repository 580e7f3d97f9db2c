//! Device profiles
//!
//! A profile describes one family of modems: how its lines are classified
//! ([`DeviceProfile`]) and which [`Mediator`] runs each operation
//! ([`OperationCatalog`]). Both traits come with standard 27.007 defaults, so
//! a profile only overrides what its device does differently.

mod generic;
mod qualcomm_msm;
mod ti_calypso;

pub use generic::GenericModem;
pub use qualcomm_msm::QualcommMsm;
pub use ti_calypso::TiCalypso;

use crate::command::{CommandSpec, TerminalSet, CTRL_Z};
use crate::config::TimeoutTable;
use crate::mediator::*;
use crate::operation::{ContextRequest, DialParams, MessageParams, MessageStatus, Operation};
use crate::state::CallId;
use crate::unsolicited::NotificationTable;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Commands every device gets after power-up
pub fn default_init_commands() -> Vec<CommandSpec> {
    [
        "Z", "E0V1", "+CMEE=1", "+CRC=1", "+CLIP=1", "+COLP=1", "+CCWA=1", "+CREG=2", "+CSQ",
    ]
    .into_iter()
    .map(CommandSpec::new)
    .collect()
}

/// Line level behaviour of a device family
pub trait DeviceProfile: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn terminals(&self) -> TerminalSet {
        TerminalSet::default()
    }

    fn notifications(&self) -> NotificationTable {
        NotificationTable::standard()
    }

    fn init_commands(&self) -> Vec<CommandSpec> {
        default_init_commands()
    }

    /// Written after a command missed its deadline
    fn abort_sequence(&self) -> Option<Bytes> {
        Some(Bytes::from_static(&[CTRL_Z]))
    }

    fn max_calls(&self) -> usize {
        2
    }

    fn timeouts(&self) -> TimeoutTable {
        TimeoutTable::builtin()
    }
}

/// Which mediator runs an operation
///
/// Override a single method to swap one operation for a device; `build`
/// dispatches every [`Operation`] and should not need overriding.
pub trait OperationCatalog: Send + Sync {
    fn dial(&self, params: DialParams) -> Box<dyn Mediator> {
        Box::new(DialMediator::new(params))
    }

    fn answer(&self, call: Option<CallId>) -> Box<dyn Mediator> {
        Box::new(AnswerMediator::new(call))
    }

    fn hang_up(&self, call: Option<CallId>) -> Box<dyn Mediator> {
        Box::new(HangUpMediator::new(call))
    }

    fn get_call_status(&self) -> Box<dyn Mediator> {
        Box::new(GetCallStatusMediator::new())
    }

    fn activate_context(&self, request: ContextRequest) -> Box<dyn Mediator> {
        Box::new(ActivateContextMediator::new(request, DEFAULT_DATA_DIAL))
    }

    fn deactivate_context(&self) -> Box<dyn Mediator> {
        Box::new(DeactivateContextMediator::new())
    }

    fn send_auth_code(&self, code: String) -> Box<dyn Mediator> {
        Box::new(SendAuthCodeMediator::new(code))
    }

    fn get_auth_status(&self) -> Box<dyn Mediator> {
        Box::new(GetAuthStatusMediator::new())
    }

    fn get_registration_status(&self) -> Box<dyn Mediator> {
        Box::new(GetRegistrationStatusMediator::new())
    }

    fn register(&self) -> Box<dyn Mediator> {
        Box::new(RegisterMediator::new())
    }

    fn get_signal_strength(&self) -> Box<dyn Mediator> {
        Box::new(GetSignalStrengthMediator::new())
    }

    fn get_device_info(&self) -> Box<dyn Mediator> {
        Box::new(GetDeviceInfoMediator::new())
    }

    fn set_antenna_power(&self, on: bool) -> Box<dyn Mediator> {
        Box::new(SetAntennaPowerMediator::new(on))
    }

    fn send_message(&self, params: MessageParams) -> Box<dyn Mediator> {
        Box::new(SendMessageMediator::new(params))
    }

    fn raw_command(&self, command: String) -> Box<dyn Mediator> {
        Box::new(RawCommandMediator::new(command))
    }

    fn list_providers(&self) -> Box<dyn Mediator> {
        Box::new(ListProvidersMediator::new())
    }

    fn unregister(&self) -> Box<dyn Mediator> {
        Box::new(UnregisterMediator::new())
    }

    fn register_with_provider(&self, code: String) -> Box<dyn Mediator> {
        Box::new(RegisterWithProviderMediator::new(code))
    }

    fn get_imsi(&self) -> Box<dyn Mediator> {
        Box::new(GetImsiMediator::new())
    }

    fn change_auth_code(&self, old: String, new: String) -> Box<dyn Mediator> {
        Box::new(ChangeAuthCodeMediator::new(old, new))
    }

    fn unlock(&self, puk: String, new_pin: String) -> Box<dyn Mediator> {
        Box::new(UnlockMediator::new(puk, new_pin))
    }

    fn get_antenna_power(&self) -> Box<dyn Mediator> {
        Box::new(GetAntennaPowerMediator::new())
    }

    fn get_features(&self) -> Box<dyn Mediator> {
        Box::new(GetFeaturesMediator::new())
    }

    fn get_service_center_number(&self) -> Box<dyn Mediator> {
        Box::new(GetServiceCenterNumberMediator::new())
    }

    fn retrieve_phonebook(&self) -> Box<dyn Mediator> {
        Box::new(RetrievePhonebookMediator::new())
    }

    fn retrieve_messagebook(&self, status: Option<MessageStatus>) -> Box<dyn Mediator> {
        Box::new(RetrieveMessagebookMediator::new(status))
    }

    fn build(&self, operation: Operation) -> Box<dyn Mediator> {
        match operation {
            Operation::Dial(params) => self.dial(params),
            Operation::Answer { call } => self.answer(call),
            Operation::HangUp { call } => self.hang_up(call),
            Operation::GetCallStatus => self.get_call_status(),
            Operation::ActivateContext(request) => self.activate_context(request),
            Operation::DeactivateContext => self.deactivate_context(),
            Operation::SendAuthCode { code } => self.send_auth_code(code),
            Operation::GetAuthStatus => self.get_auth_status(),
            Operation::GetRegistrationStatus => self.get_registration_status(),
            Operation::Register => self.register(),
            Operation::GetSignalStrength => self.get_signal_strength(),
            Operation::GetDeviceInfo => self.get_device_info(),
            Operation::SetAntennaPower { on } => self.set_antenna_power(on),
            Operation::SendMessage(params) => self.send_message(params),
            Operation::RawCommand { command } => self.raw_command(command),
            Operation::ListProviders => self.list_providers(),
            Operation::Unregister => self.unregister(),
            Operation::RegisterWithProvider { code } => self.register_with_provider(code),
            Operation::GetImsi => self.get_imsi(),
            Operation::ChangeAuthCode { old, new } => self.change_auth_code(old, new),
            Operation::Unlock { puk, new_pin } => self.unlock(puk, new_pin),
            Operation::GetAntennaPower => self.get_antenna_power(),
            Operation::GetFeatures => self.get_features(),
            Operation::GetServiceCenterNumber => self.get_service_center_number(),
            Operation::RetrievePhonebook => self.retrieve_phonebook(),
            Operation::RetrieveMessagebook { status } => self.retrieve_messagebook(status),
        }
    }
}

/// A complete device profile
pub trait ModemProfile: DeviceProfile + OperationCatalog {}

impl<T: DeviceProfile + OperationCatalog> ModemProfile for T {}

/// Profiles selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Generic,
    TiCalypso,
    QualcommMsm,
}

impl ProfileKind {
    pub fn build(self) -> Arc<dyn ModemProfile> {
        match self {
            Self::Generic => Arc::new(GenericModem),
            Self::TiCalypso => Arc::new(TiCalypso::new()),
            Self::QualcommMsm => Arc::new(QualcommMsm::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::TiCalypso => "ti_calypso",
            Self::QualcommMsm => "qualcomm_msm",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "generic" => Ok(Self::Generic),
            "ti_calypso" | "calypso" => Ok(Self::TiCalypso),
            "qualcomm_msm" | "msm" => Ok(Self::QualcommMsm),
            other => Err(format!("unknown modem profile '{}'", other)),
        }
    }
}
