//! Operation requests and results as seen by callers

use crate::state::{CallId, CallInfo, CallKind, ContextParams, NetworkStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialParams {
    pub number: String,
    #[serde(default)]
    pub kind: CallKind,
}

/// Packet-data context request; the APN may come from the provider table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub apn: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParams {
    pub number: String,
    pub text: String,
}

/// Every operation the engine can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Dial(DialParams),
    /// Accept the ringing call
    Answer { call: Option<CallId> },
    /// Release a call; `None` picks the only live call
    HangUp { call: Option<CallId> },
    GetCallStatus,
    ActivateContext(ContextRequest),
    DeactivateContext,
    SendAuthCode { code: String },
    GetAuthStatus,
    GetRegistrationStatus,
    /// Automatic network registration
    Register,
    GetSignalStrength,
    GetDeviceInfo,
    SetAntennaPower { on: bool },
    SendMessage(MessageParams),
    /// Pass a command through, e.g. for diagnostics
    RawCommand { command: String },
    /// Scan for networks; slow
    ListProviders,
    Unregister,
    /// Manual registration with a numeric operator code, e.g. `26201`
    RegisterWithProvider { code: String },
    GetImsi,
    /// Change the SIM PIN
    ChangeAuthCode { old: String, new: String },
    /// Unblock the SIM with its PUK and set a new PIN
    Unlock { puk: String, new_pin: String },
    GetAntennaPower,
    GetFeatures,
    GetServiceCenterNumber,
    RetrievePhonebook,
    /// List stored messages; `None` lists all of them
    RetrieveMessagebook { status: Option<MessageStatus> },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Dial(_) => OperationKind::Dial,
            Self::Answer { .. } => OperationKind::Answer,
            Self::HangUp { .. } => OperationKind::HangUp,
            Self::GetCallStatus => OperationKind::GetCallStatus,
            Self::ActivateContext(_) => OperationKind::ActivateContext,
            Self::DeactivateContext => OperationKind::DeactivateContext,
            Self::SendAuthCode { .. } => OperationKind::SendAuthCode,
            Self::GetAuthStatus => OperationKind::GetAuthStatus,
            Self::GetRegistrationStatus => OperationKind::GetRegistrationStatus,
            Self::Register => OperationKind::Register,
            Self::GetSignalStrength => OperationKind::GetSignalStrength,
            Self::GetDeviceInfo => OperationKind::GetDeviceInfo,
            Self::SetAntennaPower { .. } => OperationKind::SetAntennaPower,
            Self::SendMessage(_) => OperationKind::SendMessage,
            Self::RawCommand { .. } => OperationKind::RawCommand,
            Self::ListProviders => OperationKind::ListProviders,
            Self::Unregister => OperationKind::Unregister,
            Self::RegisterWithProvider { .. } => OperationKind::RegisterWithProvider,
            Self::GetImsi => OperationKind::GetImsi,
            Self::ChangeAuthCode { .. } => OperationKind::ChangeAuthCode,
            Self::Unlock { .. } => OperationKind::Unlock,
            Self::GetAntennaPower => OperationKind::GetAntennaPower,
            Self::GetFeatures => OperationKind::GetFeatures,
            Self::GetServiceCenterNumber => OperationKind::GetServiceCenterNumber,
            Self::RetrievePhonebook => OperationKind::RetrievePhonebook,
            Self::RetrieveMessagebook { .. } => OperationKind::RetrieveMessagebook,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Dial,
    Answer,
    HangUp,
    GetCallStatus,
    ActivateContext,
    DeactivateContext,
    SendAuthCode,
    GetAuthStatus,
    GetRegistrationStatus,
    Register,
    GetSignalStrength,
    GetDeviceInfo,
    SetAntennaPower,
    SendMessage,
    RawCommand,
    ListProviders,
    Unregister,
    RegisterWithProvider,
    GetImsi,
    ChangeAuthCode,
    Unlock,
    GetAntennaPower,
    GetFeatures,
    GetServiceCenterNumber,
    RetrievePhonebook,
    RetrieveMessagebook,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub revision: String,
    pub imei: String,
}

/// `+GCAP` capabilities plus the GPRS and fax classes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceFeatures {
    pub capabilities: Vec<String>,
    pub gprs_class: Option<String>,
    pub fax_classes: Option<String>,
}

/// Availability of a network found by a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Unknown,
    Available,
    Current,
    Forbidden,
}

impl ProviderStatus {
    /// Decode the `<stat>` of a `+COPS=?` entry
    pub fn from_cops(stat: u8) -> Option<Self> {
        match stat {
            0 => Some(Self::Unknown),
            1 => Some(Self::Available),
            2 => Some(Self::Current),
            3 => Some(Self::Forbidden),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkProvider {
    /// Numeric MCC and MNC
    pub code: String,
    pub status: ProviderStatus,
    pub name: String,
    pub short_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhonebookEntry {
    pub index: u16,
    pub name: String,
    pub number: String,
}

/// Storage status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Unread,
    Read,
    Unsent,
    Sent,
}

impl MessageStatus {
    /// Text mode name, as used by `+CMGL`
    pub fn as_text(self) -> &'static str {
        match self {
            Self::Unread => "REC UNREAD",
            Self::Read => "REC READ",
            Self::Unsent => "STO UNSENT",
            Self::Sent => "STO SENT",
        }
    }

    pub fn from_text(text: &str) -> Option<Self> {
        [Self::Unread, Self::Read, Self::Unsent, Self::Sent]
            .into_iter()
            .find(|status| status.as_text().eq_ignore_ascii_case(text.trim()))
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            "unsent" => Ok(Self::Unsent),
            "sent" => Ok(Self::Sent),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// A message read back from storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub index: u16,
    pub status: MessageStatus,
    pub number: String,
    pub text: String,
}

/// Result value of a successful operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OperationOutput {
    Done,
    Call(CallId),
    Calls(Vec<CallInfo>),
    Context(ContextParams),
    AuthStatus(String),
    Network(NetworkStatus),
    SignalStrength(u8),
    DeviceInfo(DeviceInfo),
    MessageReference(u16),
    Lines(Vec<String>),
    Providers(Vec<NetworkProvider>),
    Imsi(String),
    AntennaPower(bool),
    Features(DeviceFeatures),
    ServiceCenter(String),
    Phonebook(Vec<PhonebookEntry>),
    Messages(Vec<StoredMessage>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_status_names() {
        assert_eq!(MessageStatus::from_text("REC UNREAD"), Some(MessageStatus::Unread));
        assert_eq!(MessageStatus::from_text("sto sent"), Some(MessageStatus::Sent));
        assert_eq!(MessageStatus::from_text("ALL"), None);
        assert_eq!("Read".parse::<MessageStatus>(), Ok(MessageStatus::Read));
        assert!("deleted".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn provider_status_codes() {
        assert_eq!(ProviderStatus::from_cops(2), Some(ProviderStatus::Current));
        assert_eq!(ProviderStatus::from_cops(3), Some(ProviderStatus::Forbidden));
        assert_eq!(ProviderStatus::from_cops(7), None);
    }
}
