//! Engine configuration, the `[modem]` section

use crate::command::{CommandSpec, TerminalSet};
use crate::profile::ProfileKind;
use crate::provider::ProviderEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-command deadlines in seconds, keyed by command prefix
///
/// The longest key the command text starts with wins, so `+COPS=?` beats
/// `+COPS` for a network scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutTable {
    entries: BTreeMap<String, f64>,
}

impl TimeoutTable {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Deadlines of standard commands that take longer than usual
    pub fn builtin() -> Self {
        Self::new([
            ("+CPIN", 7.0),
            ("+CFUN", 9.0),
            ("+COPS", 15.0),
            ("+COPS=?", 80.0),
            ("D", 60.0),
        ])
    }

    pub fn insert(&mut self, prefix: impl Into<String>, seconds: f64) {
        self.entries.insert(prefix.into(), seconds);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, command: &str) -> Option<Duration> {
        self.entries
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, seconds)| Duration::try_from_secs_f64(*seconds).ok())
    }
}

/// Modem section of the daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Device family
    pub profile: ProfileKind,

    /// Deadline of commands without a specific one, in milliseconds
    pub command_timeout_ms: u64,

    /// Deadline overrides in seconds; these beat everything else
    pub timeouts: TimeoutTable,

    /// Replaces the profile's terminal strings
    pub terminals: Option<TerminalSet>,

    /// Replaces the profile's simultaneous call limit
    pub max_calls: Option<usize>,

    /// Commands sent after the profile's init sequence
    pub extra_init: Vec<String>,

    /// Added to, or replacing, the built-in provider table
    pub providers: Vec<ProviderEntry>,

    /// Pending requests from handles before callers wait
    pub request_queue: usize,

    /// Events buffered per subscriber before slow ones lag
    pub event_capacity: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            profile: ProfileKind::default(),
            command_timeout_ms: 5_000,
            timeouts: TimeoutTable::default(),
            terminals: None,
            max_calls: None,
            extra_init: Vec::new(),
            providers: Vec::new(),
            request_queue: 32,
            event_capacity: 64,
        }
    }
}

impl ModemConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Deadline of `spec`
    ///
    /// Configured overrides first, then whatever the operation asked for,
    /// then the built-in table, then the default.
    pub fn resolve_timeout(&self, spec: &CommandSpec, builtin: &TimeoutTable) -> Duration {
        self.timeouts
            .lookup(spec.text())
            .or_else(|| spec.timeout())
            .or_else(|| builtin.lookup(spec.text()))
            .unwrap_or_else(|| self.command_timeout())
    }
}
