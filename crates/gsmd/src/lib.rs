//! # gsmd - talking to GSM/GPRS modems over AT commands
//!
//! The stack is split into three crates, re-exported here as modules:
//!
//! - [`modem_transport`]: the byte stream to the device, framed into lines,
//!   and the optional power switch
//! - [`modem_core`]: the protocol engine, mediators, connection state and
//!   device profiles
//! - [`infra_common`]: logging setup and configuration loading
//!
//! ## Quick Start
//!
//! ```no_run
//! use gsmd::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Channel::open_device("/dev/ttyUSB0", ChannelConfig::default()).await?;
//! let (modem, _task) = Engine::spawn(channel, ModemConfig::default());
//!
//! modem.send_auth_code("1234").await?;
//! let network = modem.registration_status().await?;
//! println!("registered with {:?}", network.operator);
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

pub use gsmd_infra_common as infra_common;
pub use gsmd_modem_core as modem_core;
pub use gsmd_modem_transport as modem_transport;

pub mod prelude {
    //! Common imports for gsmd applications

    pub use crate::modem_core::prelude::*;
    pub use crate::modem_transport::{Channel, ChannelConfig, SysfsPowerControl, TransportError};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
