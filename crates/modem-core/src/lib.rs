//! AT command protocol engine
//!
//! This crate sits between high level telephony operations (place a call,
//! activate a packet-data context, query registration) and a modem that only
//! speaks the serial AT command/response protocol with unsolicited
//! notifications mixed in.
//!
//! The pieces, leaves first:
//!
//! - [`Dispatcher`](dispatcher::Dispatcher): single-outstanding-command FIFO
//!   that correlates reply lines with the command at the head of the queue.
//! - [`UnsolicitedRouter`](unsolicited::UnsolicitedRouter): handles the lines
//!   no command asked for, through a closed set of
//!   [`NotificationTag`](unsolicited::NotificationTag)s.
//! - [`Mediator`](mediator::Mediator): one state machine per operation,
//!   issuing one or more commands and settling exactly once.
//! - [`ConnectionState`](state::ConnectionState): registration, packet-data
//!   context and live calls, with checked call transitions.
//! - [`Engine`](engine::Engine): the single task that owns all of the above
//!   and the [`Channel`](gsmd_modem_transport::Channel); callers reach it
//!   through a cloneable [`ModemHandle`](engine::ModemHandle).
//!
//! Device quirks live in [`profile`]: a profile supplies terminal strings,
//! notification prefixes and init commands, and may override individual
//! operations of the [`OperationCatalog`](profile::OperationCatalog).

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod mediator;
pub mod operation;
pub mod parse;
pub mod profile;
pub mod provider;
pub mod state;
pub mod unsolicited;

pub use command::{CommandSpec, Outcome, ReplyGroup, TerminalSet, Terminator};
pub use config::{ModemConfig, TimeoutTable};
pub use engine::{Engine, ModemHandle, PendingOperation};
pub use error::{CapabilityError, DeviceErrorKind, ModemError, ModemResult, ProtocolError};
pub use events::ModemEvent;
pub use operation::{Operation, OperationId, OperationKind, OperationOutput};
pub use profile::{DeviceProfile, ModemProfile, OperationCatalog, ProfileKind};
pub use provider::{AuthMethod, ProviderEntry, ProviderTable};
pub use state::{
    CallDirection, CallId, CallInfo, CallStatus, ConnectionSnapshot, ConnectionState,
    ContextParams, ContextStatus, NetworkStatus, RegistrationStatus,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        CallId, CallStatus, ConnectionSnapshot, ContextStatus, Engine, ModemConfig, ModemError,
        ModemEvent, ModemHandle, ModemResult, Operation, OperationOutput, PendingOperation,
        ProfileKind, RegistrationStatus,
    };
}
