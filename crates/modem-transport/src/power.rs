//! Power side-channel
//!
//! Embedded modems are often wired behind a GPIO exposed as a sysfs file:
//! writing `1` energizes the device, `0` cuts it. The engine calls
//! [`PowerControl::set_power`] once before the first command and once at
//! shutdown; devices without such a node simply have no power control.

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Switch the physical link on or off
#[async_trait]
pub trait PowerControl: Send + Sync + fmt::Debug {
    async fn set_power(&self, on: bool) -> Result<()>;
}

/// Power control through a writable device node
#[derive(Debug, Clone)]
pub struct SysfsPowerControl {
    node: PathBuf,
    on_value: String,
    off_value: String,
}

impl SysfsPowerControl {
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            on_value: "1".to_string(),
            off_value: "0".to_string(),
        }
    }

    /// Use different values than `1`/`0`
    pub fn with_values(mut self, on: impl Into<String>, off: impl Into<String>) -> Self {
        self.on_value = on.into();
        self.off_value = off.into();
        self
    }

    pub fn node(&self) -> &PathBuf {
        &self.node
    }
}

#[async_trait]
impl PowerControl for SysfsPowerControl {
    async fn set_power(&self, on: bool) -> Result<()> {
        let value = if on { &self.on_value } else { &self.off_value };
        debug!("Writing '{}' to {}", value, self.node.display());
        tokio::fs::write(&self.node, format!("{}\n", value))
            .await
            .map_err(TransportError::Power)?;
        info!("Modem power {}", if on { "on" } else { "off" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_node(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gsmd-power-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn writes_on_and_off_values() {
        let node = scratch_node("toggle");
        let power = SysfsPowerControl::new(&node);

        power.set_power(true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&node).unwrap(), "1\n");

        power.set_power(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&node).unwrap(), "0\n");

        let _ = std::fs::remove_file(&node);
    }

    #[tokio::test]
    async fn custom_values() {
        let node = scratch_node("custom");
        let power = SysfsPowerControl::new(&node).with_values("enabled", "disabled");
        power.set_power(true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&node).unwrap(), "enabled\n");
        let _ = std::fs::remove_file(&node);
    }

    #[tokio::test]
    async fn missing_directory_is_power_error() {
        let power = SysfsPowerControl::new("/nonexistent-gsmd-dir/power_on");
        let err = power.set_power(true).await.unwrap_err();
        assert!(matches!(err, TransportError::Power(_)));
        assert!(!err.is_fatal());
    }
}
