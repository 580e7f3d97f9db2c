//! gsmd - drive an AT command modem from the shell
//!
//! Opens the device named in the configuration file or on the command line,
//! starts the protocol engine on it and runs one command. `monitor`, the
//! default, prints every modem event as a JSON line until interrupted.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gsmd::infra_common::{log_welcome, setup_logging};
use gsmd::modem_core::operation::MessageStatus;
use gsmd::modem_core::Engine;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::{GsmdConfig, Overrides};

#[derive(Parser, Debug)]
#[command(name = "gsmd", author, version, about = "Talk to a GSM/GPRS modem over AT commands")]
struct Cli {
    /// Configuration file (defaults to gsmd/gsmd.toml in the user config directory)
    #[arg(short, long, env = "GSMD_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device of the modem
    #[arg(short, long, env = "GSMD_DEVICE")]
    device: Option<PathBuf>,

    /// Modem emulator reachable over TCP, as host:port
    #[arg(long, conflicts_with = "device")]
    tcp: Option<String>,

    /// Device profile: generic, ti_calypso or qualcomm_msm
    #[arg(short, long)]
    profile: Option<String>,

    /// Log level, overriding the configuration file
    #[arg(long)]
    log_level: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print modem events until interrupted
    Monitor,
    /// Show SIM, registration and signal state
    Status,
    /// Show manufacturer, model, revision and IMEI
    Info,
    /// Unlock the SIM
    Pin { code: String },
    /// Register with the network automatically
    Register,
    /// Scan for networks
    Scan,
    /// Register with one operator by its numeric code
    Operator { code: String },
    /// Unblock the SIM with its PUK and set a new PIN
    Puk { puk: String, pin: String },
    /// List the SIM phonebook
    Phonebook,
    /// List stored messages
    Messages {
        /// unread, read, unsent or sent; all when omitted
        status: Option<MessageStatus>,
    },
    /// Place a voice call and hang up on Ctrl-C
    Dial { number: String },
    /// List the calls the device knows about
    Calls,
    /// Hang up one call, or all of them
    Hangup { call: Option<u8> },
    /// Bring up the packet-data context and hold it until Ctrl-C
    Connect {
        /// Access point name; looked up from the operator when omitted
        #[arg(long)]
        apn: Option<String>,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Send a text message
    Sms { number: String, text: String },
    /// Switch the radio on or off
    Antenna {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        on: bool,
    },
    /// Send a raw command, printing the reply lines
    At { command: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = GsmdConfig::load(cli.config.as_deref())?;
    config.apply(Overrides {
        device: cli.device,
        tcp: cli.tcp,
        profile: cli.profile,
        log_level: cli.log_level,
        json: cli.json,
    })?;

    setup_logging(&config.logging)?;
    log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));

    let channel = config.device.open().await?;
    let modem_config = config.modem_config();
    info!("Using {} profile on {}", modem_config.profile, channel.name());
    let (modem, task) = Engine::spawn(channel, modem_config);

    let result = commands::run(&modem, cli.command.unwrap_or(Command::Monitor)).await;

    if let Err(e) = modem.shutdown().await {
        warn!("Engine already stopped: {}", e);
    }
    if let Err(e) = task.await {
        warn!("Engine task failed: {}", e);
    }
    result
}
