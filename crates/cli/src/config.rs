//! The `gsmd.toml` file and the command line overrides applied on top of it

use anyhow::{bail, Context, Result};
use gsmd::infra_common::{config, LoggingConfig};
use gsmd::modem_core::provider::ProviderEntry;
use gsmd::modem_core::{ModemConfig, ProfileKind};
use gsmd::modem_transport::{codec::DEFAULT_MAX_LINE_LENGTH, Channel, ChannelConfig, SysfsPowerControl};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const CONFIG_FILE: &str = "gsmd.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GsmdConfig {
    pub logging: LoggingConfig,
    pub device: DeviceConfig,
    pub modem: ModemConfig,
    /// Merged into `modem.providers`
    pub providers: Vec<ProviderEntry>,
}

/// Where the modem is and how to switch it on
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device, e.g. `/dev/ttyUSB0`
    pub path: Option<PathBuf>,
    /// `host:port` of a modem emulator; wins over `path`
    pub tcp: Option<String>,
    pub write_timeout_ms: u64,
    pub max_line_length: usize,
    /// sysfs-style node energizing the modem
    pub power_node: Option<PathBuf>,
    pub power_on: String,
    pub power_off: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: None,
            tcp: None,
            write_timeout_ms: 2000,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            power_node: None,
            power_on: "1".to_string(),
            power_off: "0".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_line_length: self.max_line_length,
        }
    }

    /// Open the configured transport
    pub async fn open(&self) -> Result<Channel> {
        let channel = match (&self.tcp, &self.path) {
            (Some(addr), _) => Channel::connect_tcp(addr, self.channel_config())
                .await
                .with_context(|| format!("connecting to {}", addr))?,
            (None, Some(path)) => Channel::open_device(path, self.channel_config())
                .await
                .with_context(|| format!("opening {}", path.display()))?,
            (None, None) => bail!("no modem configured: pass --device or --tcp, or set [device] in {}", CONFIG_FILE),
        };

        Ok(match &self.power_node {
            Some(node) => channel.with_power(
                SysfsPowerControl::new(node).with_values(self.power_on.clone(), self.power_off.clone()),
            ),
            None => channel,
        })
    }
}

/// Command line values that replace file values when given
#[derive(Debug, Default)]
pub struct Overrides {
    pub device: Option<PathBuf>,
    pub tcp: Option<String>,
    pub profile: Option<String>,
    pub log_level: Option<String>,
    pub json: bool,
}

impl GsmdConfig {
    /// Load `path`, or `gsmd.toml` from the user config directory if present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = dirs::config_dir()
            .map(|dir| dir.join("gsmd").join(CONFIG_FILE))
            .filter(|candidate| candidate.exists());
        let path = path.map(Path::to_path_buf).or(default_path);
        let parsed: GsmdConfig = config::load_or_default(path.as_deref())?;
        if let Some(path) = &path {
            info!("Configuration from {}", path.display());
        }
        Ok(parsed)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(config::from_toml_str(text)?)
    }

    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(device) = overrides.device {
            self.device.path = Some(device);
            self.device.tcp = None;
        }
        if let Some(tcp) = overrides.tcp {
            self.device.tcp = Some(tcp);
        }
        if let Some(profile) = overrides.profile {
            self.modem.profile = profile.parse::<ProfileKind>().map_err(anyhow::Error::msg)?;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if overrides.json {
            self.logging.json = true;
        }
        Ok(())
    }

    /// The modem section with the top-level providers folded in
    pub fn modem_config(&self) -> ModemConfig {
        let mut modem = self.modem.clone();
        modem.providers.extend(self.providers.iter().cloned());
        modem
    }
}
