//! Access-point settings per network operator
//!
//! A read-only table consulted when a packet-data context is activated
//! without an explicit APN. Built-in entries can be replaced or extended
//! from configuration; the table is shared by reference after startup.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// PPP authentication used by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Pap,
    Chap,
    None,
}

/// Settings of one operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub apn: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub auth: AuthMethod,
    /// IP header compression
    #[serde(default)]
    pub header_compression: bool,
    /// `+CGQREQ` parameters, `<cid>,<precedence>,<delay>,<reliability>,<peak>,<mean>`
    #[serde(default)]
    pub qos: Option<String>,
}

impl ProviderEntry {
    fn builtin(
        name: &str,
        aliases: &[&str],
        apn: &str,
        dns: &[&str],
        auth: AuthMethod,
        header_compression: bool,
        qos: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            apn: apn.to_string(),
            user: String::new(),
            password: String::new(),
            dns: dns.iter().map(|d| d.to_string()).collect(),
            auth,
            header_compression,
            qos: Some(qos.to_string()),
        }
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Lookup table keyed by operator name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderTable {
    entries: Vec<ProviderEntry>,
}

impl ProviderTable {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self { entries }
    }

    /// German and Dutch operators shipped with the daemon
    pub fn builtin() -> Self {
        use AuthMethod::{Chap, Pap};
        Self::new(vec![
            ProviderEntry::builtin(
                "T-Mobile",
                &[],
                "internet.t-d1.de",
                &["193.254.160.1"],
                Pap,
                false,
                "1,3,4,3,0,0",
            ),
            ProviderEntry::builtin(
                "Vodafone",
                &[],
                "web.vodafone.de",
                &["139.7.30.125", "139.7.30.126"],
                Chap,
                true,
                "1,3,4,3,7,31",
            ),
            ProviderEntry::builtin(
                "E-Plus",
                &["Base", "simyo"],
                "internet.eplus.de",
                &["212.23.97.2", "212.23.97.3"],
                Pap,
                false,
                "1,2,4,3,9,31",
            ),
            ProviderEntry::builtin(
                "O2",
                &["Alice"],
                "internet",
                &["195.182.96.28", "195.182.96.61"],
                Pap,
                false,
                "1,0,0,0,0,0",
            ),
            ProviderEntry::builtin(
                "Telfort",
                &[],
                "internet",
                &["0.0.0.0", "0.0.0.0"],
                Chap,
                false,
                "1,0,0,0,0,0",
            ),
        ])
    }

    /// Add entries, replacing existing ones with the same name
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = ProviderEntry>) -> Self {
        for entry in overrides {
            self.entries
                .retain(|existing| !existing.name.eq_ignore_ascii_case(&entry.name));
            self.entries.push(entry);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find the entry for an operator name as reported by `+COPS?`
    ///
    /// Exact (case-insensitive) name or alias matches win; otherwise the
    /// longest name the operator string starts with, so `T-Mobile D` and
    /// `o2 - de` still resolve.
    pub fn lookup(&self, operator: &str) -> Option<&ProviderEntry> {
        let operator = operator.trim();
        let exact = self
            .entries
            .iter()
            .find(|e| e.names().any(|n| n.eq_ignore_ascii_case(operator)));
        if exact.is_some() {
            return exact;
        }

        let lowered = operator.to_ascii_lowercase();
        let found = self
            .entries
            .iter()
            .filter_map(|e| {
                e.names()
                    .filter(|n| lowered.starts_with(&n.to_ascii_lowercase()))
                    .map(str::len)
                    .max()
                    .map(|len| (len, e))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, e)| e);
        if let Some(entry) = found {
            debug!("Operator '{}' resolved to provider {}", operator, entry.name);
        }
        found
    }
}
