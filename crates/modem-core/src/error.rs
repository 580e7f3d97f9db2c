//! Error taxonomy of the engine
//!
//! Three families reach callers:
//!
//! - transport failures ([`TransportError`]) are fatal to every in-flight and
//!   queued command;
//! - [`ProtocolError`]s fail only the operation whose step produced them;
//! - [`CapabilityError`]s reject an operation at trigger time, before any
//!   byte is written.
//!
//! The engine never retries. Every invocation ends with exactly one of these
//! or a result value.

use crate::command::{ReplyGroup, TerminalSet, Terminator};
use crate::parse;
use crate::state::{CallId, CallStatus};
use gsmd_modem_transport::TransportError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for modem operations
pub type ModemResult<T> = Result<T, ModemError>;

/// Errors reported to the caller of an operation
#[derive(Debug, Error)]
pub enum ModemError {
    /// The channel failed; the host has to reopen it
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No terminator arrived before the command deadline
    #[error("Device did not answer within {0:?}")]
    Timeout(Duration),

    /// The device replied, but not with what the operation needed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The operation is not legal in the current connection state
    #[error("Operation not permitted: {0}")]
    Capability(#[from] CapabilityError),

    /// Rejected before anything was sent
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModemError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error for a channel that is gone
    pub fn disconnected() -> Self {
        Self::Transport(TransportError::Disconnected)
    }

    /// Map a failed reply group to the error the caller sees
    pub fn from_reply(reply: &ReplyGroup, terminals: &TerminalSet) -> Self {
        match reply.terminator() {
            Terminator::NoReply => Self::disconnected(),
            Terminator::Timeout(after) => Self::Timeout(*after),
            Terminator::Line(line) => {
                Self::Protocol(ProtocolError::from_terminal(reply.command(), line, terminals))
            }
        }
    }

    /// The device error category, when the device reported one
    pub fn device_error(&self) -> Option<DeviceErrorKind> {
        match self {
            Self::Protocol(ProtocolError::Equipment { kind, .. }) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Which family of extended error a device reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    /// Mobile equipment, `+CME ERROR`
    Cme,
    /// Message service, `+CMS ERROR`
    Cms,
    /// Vendor extension, `+EXT ERROR`
    Ext,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cme => "CME",
            Self::Cms => "CMS",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Categories callers act upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceErrorKind {
    SimNotPresent,
    SimAuthFailed,
    SimBlocked,
    SimNotFound,
    SimMemoryFull,
    SimInvalidIndex,
    NetworkNotPresent,
    NetworkUnauthorized,
    Other,
}

impl DeviceErrorKind {
    pub fn classify(class: ErrorClass, code: u16) -> Self {
        match (class, code) {
            (ErrorClass::Cme, 3) => Self::NetworkUnauthorized,
            (ErrorClass::Cme, 10) => Self::SimNotPresent,
            (ErrorClass::Cme, 5 | 6 | 7 | 11 | 12 | 15 | 16 | 17 | 18 | 48) => Self::SimAuthFailed,
            (ErrorClass::Cme, 21 | 22) => Self::SimNotFound,
            (ErrorClass::Cme, 30) => Self::NetworkNotPresent,
            (ErrorClass::Cme, 32 | 262) => Self::SimBlocked,
            (ErrorClass::Cms, 310) => Self::SimNotPresent,
            (ErrorClass::Cms, 311 | 312 | 316 | 317 | 318) => Self::SimAuthFailed,
            (ErrorClass::Cms, 321) => Self::SimNotFound,
            (ErrorClass::Cms, 322) => Self::SimMemoryFull,
            (ErrorClass::Ext, 0) => Self::SimInvalidIndex,
            _ => Self::Other,
        }
    }
}

/// Unexpected or failing replies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Plain `ERROR`
    #[error("{command} failed")]
    DeviceFailed { command: String },

    /// `+CME ERROR`, `+CMS ERROR` or `+EXT ERROR`
    #[error("{command} failed with {class} error {code}: {text}")]
    Equipment {
        command: String,
        class: ErrorClass,
        code: u16,
        kind: DeviceErrorKind,
        text: String,
    },

    /// The carrier was lost or never established
    #[error("{command}: no carrier")]
    NoCarrier { command: String },

    #[error("{command}: remote busy")]
    Busy { command: String },

    #[error("{command}: no answer")]
    NoAnswer { command: String },

    #[error("{command}: no dialtone")]
    NoDialtone { command: String },

    /// A terminal line the operation does not expect at this step
    #[error("Unexpected reply '{line}' to {command}")]
    UnexpectedReply { command: String, line: String },

    /// The reply terminated fine but its payload did not parse
    #[error("Malformed reply to {command}: {reason}")]
    Malformed { command: String, reason: String },
}

impl ProtocolError {
    pub fn malformed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn unexpected(command: impl Into<String>, line: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            command: command.into(),
            line: line.into(),
        }
    }

    /// Classify a failure terminator line
    pub fn from_terminal(command: &str, line: &str, terminals: &TerminalSet) -> Self {
        let command = command.to_string();
        if let Some((class, code, text)) = parse_extended_error(line) {
            return Self::Equipment {
                command,
                class,
                code,
                kind: DeviceErrorKind::classify(class, code),
                text,
            };
        }
        if terminals.is_carrier_lost(line) {
            return Self::NoCarrier { command };
        }
        match line {
            "ERROR" => Self::DeviceFailed { command },
            "BUSY" => Self::Busy { command },
            "NO ANSWER" => Self::NoAnswer { command },
            "NO DIALTONE" => Self::NoDialtone { command },
            _ => Self::UnexpectedReply {
                command,
                line: line.to_string(),
            },
        }
    }

    pub fn is_no_carrier(&self) -> bool {
        matches!(self, Self::NoCarrier { .. })
    }
}

/// Split `+CME ERROR: 10` into class, code and text
///
/// Devices in verbose mode (`+CMEE=2`) send the text instead of the number;
/// those map to code 0 with the text kept, unless the text is a known one.
fn parse_extended_error(line: &str) -> Option<(ErrorClass, u16, String)> {
    let (class, rest) = if let Some(rest) = line.strip_prefix("+CME ERROR") {
        (ErrorClass::Cme, rest)
    } else if let Some(rest) = line.strip_prefix("+CMS ERROR") {
        (ErrorClass::Cms, rest)
    } else if let Some(rest) = line.strip_prefix("+EXT ERROR") {
        (ErrorClass::Ext, rest)
    } else {
        return None;
    };

    let value = rest.trim_start_matches(':').trim();
    match value.parse::<u16>() {
        Ok(code) => Some((class, code, parse::device_error_text(class, code).to_string())),
        Err(_) => {
            let code = parse::device_error_code(class, value).unwrap_or(0);
            Some((class, code, value.to_string()))
        }
    }
}

/// Reasons an operation is refused at trigger time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("packet-data context already active")]
    ContextActive,

    #[error("packet-data context activation in progress")]
    ContextActivating,

    #[error("no packet-data context active")]
    ContextNotActive,

    #[error("call {0} not found")]
    CallNotFound(CallId),

    #[error("no call to act on")]
    NoCall,

    #[error("call {id} is {status:?}")]
    CallState { id: CallId, status: CallStatus },

    #[error("cannot have more than {0} calls")]
    TooManyCalls(usize),

    #[error("another call is being set up")]
    DialInProgress,

    #[error("no access point known for operator {0}")]
    UnknownProvider(String),
}
