//! Unsolicited notifications
//!
//! Lines nobody asked for are recognised by prefix and mapped onto a closed
//! set of [`NotificationTag`]s. Which prefixes exist is a property of the
//! device profile; what each tag does is fixed in [`router`].

pub mod notification;
pub mod router;

pub use notification::Notification;
pub use router::UnsolicitedRouter;

use serde::{Deserialize, Serialize};

/// Every notification the engine knows how to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTag {
    /// Network registration changed, `+CREG:`
    Registration,
    /// Bare `RING`
    Ring,
    /// Typed ring, `+CRING:`
    CallRing,
    /// Caller id of the ringing call, `+CLIP:`
    CallerId,
    /// Second call while one is up, `+CCWA:`
    CallWaiting,
    /// Signal strength report, `+CSQ:` or `%CSQ:`
    SignalQuality,
    /// Call progress of TI Calypso chipsets, `%CPI:`
    CallProgress,
    /// `NO CARRIER` with no command waiting
    CarrierLost,
    /// `BUSY` with no command waiting
    Busy,
    /// New message stored, `+CMTI:`
    NewMessage,
    /// Message delivered directly, `+CMT:` followed by the PDU line
    IncomingMessage,
    /// SIM authentication state, `+CPIN:`
    SimStatus,
}

impl NotificationTag {
    /// Whether the notification carries a second, unprefixed line
    pub fn has_pdu_line(self) -> bool {
        matches!(self, Self::IncomingMessage)
    }
}

/// Prefix table mapping line starts to tags
///
/// Entries ending in `:` match by prefix, bare words (`RING`) only match the
/// whole line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTable {
    entries: Vec<(String, NotificationTag)>,
}

impl NotificationTable {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, NotificationTag)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(p, t)| (p.into(), t)).collect(),
        }
    }

    /// Table used by standard 27.007 devices
    pub fn standard() -> Self {
        Self::new([
            ("+CREG:", NotificationTag::Registration),
            ("RING", NotificationTag::Ring),
            ("+CRING:", NotificationTag::CallRing),
            ("+CLIP:", NotificationTag::CallerId),
            ("+CCWA:", NotificationTag::CallWaiting),
            ("+CSQ:", NotificationTag::SignalQuality),
            ("NO CARRIER", NotificationTag::CarrierLost),
            ("BUSY", NotificationTag::Busy),
            ("+CMTI:", NotificationTag::NewMessage),
            ("+CMT:", NotificationTag::IncomingMessage),
            ("+CPIN:", NotificationTag::SimStatus),
        ])
    }

    pub fn insert(&mut self, prefix: impl Into<String>, tag: NotificationTag) {
        let prefix = prefix.into();
        self.entries.retain(|(p, _)| *p != prefix);
        self.entries.push((prefix, tag));
    }

    /// Drop every prefix mapped to `tag`
    pub fn remove_tag(&mut self, tag: NotificationTag) {
        self.entries.retain(|(_, t)| *t != tag);
    }

    pub fn lookup(&self, line: &str) -> Option<NotificationTag> {
        self.entries
            .iter()
            .find(|(prefix, _)| {
                if prefix.ends_with(':') {
                    line.starts_with(prefix.as_str())
                } else {
                    line == prefix
                }
            })
            .map(|(_, tag)| *tag)
    }

    pub fn contains_tag(&self, tag: NotificationTag) -> bool {
        self.entries.iter().any(|(_, t)| *t == tag)
    }
}

impl Default for NotificationTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_word_matching() {
        let table = NotificationTable::standard();
        assert_eq!(table.lookup("+CREG: 1,\"00C3\",\"0A1F\""), Some(NotificationTag::Registration));
        assert_eq!(table.lookup("RING"), Some(NotificationTag::Ring));
        assert_eq!(table.lookup("RINGBACK"), None);
        assert_eq!(table.lookup("+CRING: VOICE"), Some(NotificationTag::CallRing));
        assert_eq!(table.lookup("+COPS: 0,0,\"O2\""), None);
    }

    #[test]
    fn profile_adjustments() {
        let mut table = NotificationTable::standard();
        table.remove_tag(NotificationTag::CallerId);
        table.insert("%CPI:", NotificationTag::CallProgress);
        assert_eq!(table.lookup("+CLIP: \"123\",129"), None);
        assert_eq!(table.lookup("%CPI: 1,0,0,0,1,0"), Some(NotificationTag::CallProgress));
        assert!(table.contains_tag(NotificationTag::CallProgress));
        assert!(!table.contains_tag(NotificationTag::CallerId));
    }
}
