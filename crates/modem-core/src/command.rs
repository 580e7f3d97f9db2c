//! Commands, reply groups and terminal strings
//!
//! A [`CommandSpec`] is what a mediator asks for: the command text without
//! the `AT` prefix, an optional body for multiline commands, and the
//! alternate success markers it accepts. The dispatcher turns it into a
//! [`Command`] carrying the wire bytes, the resolved deadline and an opaque
//! owner token, and later hands back a [`ReplyGroup`] with an [`Outcome`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ctrl-Z, ends a multiline body and aborts a pending command
pub const CTRL_Z: u8 = 0x1a;

/// A command as requested by a mediator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    text: String,
    body: Option<String>,
    timeout: Option<Duration>,
    alternate_success: Vec<String>,
}

impl CommandSpec {
    /// `text` is the command without `AT`, e.g. `+CREG?`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            body: None,
            timeout: None,
            alternate_success: Vec::new(),
        }
    }

    /// Attach a body sent after the `> ` prompt
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Override the deadline for this command
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Treat lines starting with `marker` as success
    pub fn succeeds_on(mut self, marker: impl Into<String>) -> Self {
        self.alternate_success.push(marker.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn alternate_success(&self) -> &[String] {
        &self.alternate_success
    }

    pub fn expects_multiline(&self) -> bool {
        self.body.is_some()
    }

    /// Information-response prefixes this command produces
    ///
    /// `+CREG?;+COPS?;+CSQ` answers with `+CREG:`, `+COPS:` and `+CSQ:`
    /// lines. Plain commands such as `D123;` or `Z` produce none.
    pub fn response_prefixes(&self) -> Vec<String> {
        self.text
            .split(';')
            .filter_map(|part| {
                let part = part.trim();
                let first = part.chars().next()?;
                if first != '+' && first != '%' && first != '$' && first != '^' {
                    return None;
                }
                let name: String = part
                    .chars()
                    .enumerate()
                    .take_while(|(i, c)| *i == 0 || c.is_ascii_alphanumeric())
                    .map(|(_, c)| c)
                    .collect();
                (name.len() > 1).then(|| format!("{}:", name))
            })
            .collect()
    }

    /// Wire bytes of the command line
    pub fn payload(&self) -> Bytes {
        let terminator = if self.expects_multiline() { "\r" } else { "\r\n" };
        Bytes::from(format!("AT{}{}", self.text, terminator))
    }

    /// Wire bytes of the body, ending with Ctrl-Z
    pub fn continuation(&self) -> Option<Bytes> {
        self.body.as_ref().map(|body| {
            let mut bytes = Vec::with_capacity(body.len() + 1);
            bytes.extend_from_slice(body.as_bytes());
            bytes.push(CTRL_Z);
            Bytes::from(bytes)
        })
    }
}

/// A queued command owned by the dispatcher
///
/// `T` identifies whoever is waiting for the reply; the dispatcher never
/// looks inside it.
#[derive(Debug)]
pub struct Command<T> {
    pub(crate) spec: CommandSpec,
    pub(crate) payload: Bytes,
    pub(crate) continuation: Option<Bytes>,
    pub(crate) response_prefixes: Vec<String>,
    pub(crate) timeout: Duration,
    pub(crate) token: T,
}

impl<T> Command<T> {
    pub fn new(spec: CommandSpec, timeout: Duration, token: T) -> Self {
        Self {
            payload: spec.payload(),
            continuation: spec.continuation(),
            response_prefixes: spec.response_prefixes(),
            timeout: spec.timeout().unwrap_or(timeout),
            spec,
            token,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub(crate) fn expects_response(&self, line: &str) -> bool {
        self.response_prefixes.iter().any(|p| line.starts_with(p.as_str()))
    }
}

/// How a reply group ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// A terminal line from the device
    Line(String),
    /// The deadline passed first
    Timeout(Duration),
    /// The channel closed before any terminal line
    NoReply,
}

/// Success or failure of a command, decided by its terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// The lines of one solicited reply, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyGroup {
    command: String,
    lines: Vec<String>,
    terminator: Terminator,
}

impl ReplyGroup {
    pub fn new(command: impl Into<String>, lines: Vec<String>, terminator: Terminator) -> Self {
        Self {
            command: command.into(),
            lines,
            terminator,
        }
    }

    /// Text of the command this reply answers
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Information lines, terminator excluded
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// The terminal line, if the device sent one
    pub fn terminal_line(&self) -> Option<&str> {
        match &self.terminator {
            Terminator::Line(line) => Some(line),
            _ => None,
        }
    }

    /// First information line starting with `prefix`
    pub fn find(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|line| line.starts_with(prefix))
    }

    pub fn is_no_reply(&self) -> bool {
        matches!(self.terminator, Terminator::NoReply)
    }
}

/// Terminal strings of a device
///
/// Matching is by prefix for failures and alternates (`+CME ERROR: 10`,
/// `CONNECT 115200`) and exact for success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSet {
    pub success: Vec<String>,
    pub failure: Vec<String>,
    /// Failures meaning the carrier was lost or never came up
    pub carrier_lost: Vec<String>,
}

impl Default for TerminalSet {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            success: owned(&["OK"]),
            failure: owned(&[
                "ERROR",
                "+CME ERROR",
                "+CMS ERROR",
                "+EXT ERROR",
                "BUSY",
                "CONNECT",
                "NO ANSWER",
                "NO CARRIER",
                "NO DIALTONE",
            ]),
            carrier_lost: owned(&["NO CARRIER"]),
        }
    }
}

impl TerminalSet {
    /// Whether `line` ends a reply, and how
    pub fn classify(&self, line: &str, alternates: &[String]) -> Option<Outcome> {
        if self.success.iter().any(|s| s == line)
            || alternates.iter().any(|a| line.starts_with(a.as_str()))
        {
            return Some(Outcome::Success);
        }
        if self.failure.iter().any(|f| line.starts_with(f.as_str())) {
            return Some(Outcome::Failure);
        }
        None
    }

    pub fn is_carrier_lost(&self, line: &str) -> bool {
        self.carrier_lost.iter().any(|c| line.starts_with(c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_framing() {
        assert_eq!(CommandSpec::new("+CSQ").payload(), Bytes::from_static(b"AT+CSQ\r\n"));

        let sms = CommandSpec::new("+CMGS=\"+4912345\",145").with_body("hello");
        assert!(sms.expects_multiline());
        assert_eq!(sms.payload(), Bytes::from_static(b"AT+CMGS=\"+4912345\",145\r"));
        assert_eq!(sms.continuation(), Some(Bytes::from_static(b"hello\x1a")));
    }

    #[test]
    fn response_prefixes_from_compound_command() {
        let spec = CommandSpec::new("+CREG?;+COPS?;+CSQ");
        assert_eq!(spec.response_prefixes(), vec!["+CREG:", "+COPS:", "+CSQ:"]);
        assert_eq!(CommandSpec::new("+CGDCONT=1,\"IP\",\"internet\"").response_prefixes(), vec!["+CGDCONT:"]);
        assert_eq!(CommandSpec::new("%CPI=3").response_prefixes(), vec!["%CPI:"]);
        assert!(CommandSpec::new("D*99#").response_prefixes().is_empty());
        assert!(CommandSpec::new("E0V1").response_prefixes().is_empty());
    }

    #[test]
    fn explicit_timeout_wins() {
        let cmd = Command::new(
            CommandSpec::new("D*99#").with_timeout(Duration::from_secs(180)),
            Duration::from_secs(5),
            (),
        );
        assert_eq!(cmd.timeout(), Duration::from_secs(180));
        let cmd = Command::new(CommandSpec::new("+CSQ"), Duration::from_secs(5), ());
        assert_eq!(cmd.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn terminal_classification() {
        let terminals = TerminalSet::default();
        assert_eq!(terminals.classify("OK", &[]), Some(Outcome::Success));
        assert_eq!(terminals.classify("+CME ERROR: 10", &[]), Some(Outcome::Failure));
        assert_eq!(terminals.classify("CONNECT 115200", &[]), Some(Outcome::Failure));
        assert_eq!(
            terminals.classify("CONNECT 115200", &["CONNECT".to_string()]),
            Some(Outcome::Success)
        );
        assert_eq!(terminals.classify("+CSQ: 12,99", &[]), None);
        assert_eq!(terminals.classify("OK then", &[]), None);
    }

    #[test]
    fn reply_group_lookup() {
        let reply = ReplyGroup::new(
            "+CREG?;+CSQ",
            vec!["+CREG: 2,1".into(), "+CSQ: 20,99".into()],
            Terminator::Line("OK".into()),
        );
        assert_eq!(reply.find("+CSQ"), Some("+CSQ: 20,99"));
        assert_eq!(reply.find("+COPS"), None);
        assert_eq!(reply.terminal_line(), Some("OK"));
        assert!(!reply.is_no_reply());
    }
}
