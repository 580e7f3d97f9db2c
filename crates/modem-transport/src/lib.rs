//! Byte transport for AT command modems
//!
//! A modem is reached through an ordered byte stream: a serial tty, a
//! pseudo-terminal, or a TCP socket exposed by an emulator. This crate owns
//! that stream and turns it into whole text lines, plus the one special
//! frame the AT protocol has without a line terminator: the `> ` prompt that
//! asks for the body of a multiline command.
//!
//! Some devices must be energized before the serial link works. The
//! [`PowerControl`] side-channel covers that by writing to a sysfs-style node.

pub mod channel;
pub mod codec;
pub mod error;
pub mod power;

pub use channel::{Channel, ChannelConfig};
pub use codec::{AtLineCodec, Line};
pub use error::{Result, TransportError};
pub use power::{PowerControl, SysfsPowerControl};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        AtLineCodec, Channel, ChannelConfig, Line, PowerControl, Result, SysfsPowerControl,
        TransportError,
    };
}
