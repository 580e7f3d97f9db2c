//! Command/reply correlation
//!
//! The [`Dispatcher`] keeps the FIFO of queued commands and decides, line by
//! line, whether an inbound line belongs to the command in flight, ends it,
//! or is an unsolicited notification. It performs no I/O itself: the engine
//! feeds it lines and deadlines and writes whatever [`Dispatcher::poll_transmit`]
//! hands out. At most one command is in flight at any time.

use crate::command::{Command, Outcome, ReplyGroup, TerminalSet, Terminator};
use crate::unsolicited::NotificationTable;
use bytes::Bytes;
use gsmd_modem_transport::Line;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Line classification rules of one device
#[derive(Debug, Clone)]
pub struct LineRules {
    pub terminals: TerminalSet,
    pub notifications: NotificationTable,
    /// Written when a command misses its deadline
    pub abort_sequence: Option<Bytes>,
}

impl Default for LineRules {
    fn default() -> Self {
        Self {
            terminals: TerminalSet::default(),
            notifications: NotificationTable::standard(),
            abort_sequence: Some(Bytes::from_static(&[crate::command::CTRL_Z])),
        }
    }
}

/// What the dispatcher decided about inbound data
#[derive(Debug)]
pub enum DispatchEvent<T> {
    /// The head command finished
    Completed {
        token: T,
        outcome: Outcome,
        reply: ReplyGroup,
    },
    /// Lines for the unsolicited router
    Unsolicited(Vec<String>),
}

/// Bytes to write next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub bytes: Bytes,
    /// The device will answer with the `> ` prompt
    pub expect_prompt: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("dispatcher is closed")]
pub struct DispatcherClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    Unsent,
    AwaitingPrompt,
    BodyDue,
    AwaitingReply,
}

/// Single-outstanding-command FIFO
#[derive(Debug)]
pub struct Dispatcher<T> {
    rules: Arc<LineRules>,
    queue: VecDeque<Command<T>>,
    head: HeadState,
    deadline: Option<Instant>,
    collected: Vec<String>,
    pdu_notification: Option<Vec<String>>,
    abort_due: bool,
    closed: bool,
}

impl<T> Dispatcher<T> {
    pub fn new(rules: Arc<LineRules>) -> Self {
        Self {
            rules,
            queue: VecDeque::new(),
            head: HeadState::Unsent,
            deadline: None,
            collected: Vec::new(),
            pdu_notification: None,
            abort_due: false,
            closed: false,
        }
    }

    pub fn rules(&self) -> &LineRules {
        &self.rules
    }

    /// Append a command; it is written once everything before it completed
    pub fn enqueue(&mut self, command: Command<T>) -> Result<(), DispatcherClosed> {
        if self.closed {
            return Err(DispatcherClosed);
        }
        trace!("Queued AT{} ({} ahead)", command.spec.text(), self.queue.len());
        self.queue.push_back(command);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the head command has been written and awaits its reply
    pub fn in_flight(&self) -> bool {
        !self.queue.is_empty() && self.head != HeadState::Unsent
    }

    /// When the command in flight gives up
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight() {
            self.deadline
        } else {
            None
        }
    }

    /// Next bytes to write, if any
    ///
    /// Returns the abort sequence after a timeout, the head command once it
    /// reaches the front, and the body of a multiline command once the
    /// prompt arrived.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Transmit> {
        if self.closed {
            return None;
        }
        if self.abort_due {
            self.abort_due = false;
            if let Some(abort) = self.rules.abort_sequence.clone() {
                return Some(Transmit {
                    bytes: abort,
                    expect_prompt: false,
                });
            }
        }

        let head = self.queue.front()?;
        match self.head {
            HeadState::Unsent => {
                let expect_prompt = head.continuation.is_some();
                self.head = if expect_prompt {
                    HeadState::AwaitingPrompt
                } else {
                    HeadState::AwaitingReply
                };
                self.deadline = Some(now + head.timeout);
                debug!("Sending AT{}", head.spec.text());
                Some(Transmit {
                    bytes: head.payload.clone(),
                    expect_prompt,
                })
            }
            HeadState::BodyDue => {
                self.head = HeadState::AwaitingReply;
                self.deadline = Some(now + head.timeout);
                head.continuation.clone().map(|bytes| Transmit {
                    bytes,
                    expect_prompt: false,
                })
            }
            HeadState::AwaitingPrompt | HeadState::AwaitingReply => None,
        }
    }

    /// Feed one inbound frame
    pub fn on_line(&mut self, line: Line) -> Option<DispatchEvent<T>> {
        let text = match line {
            Line::Prompt => {
                if self.in_flight() && self.head == HeadState::AwaitingPrompt {
                    self.head = HeadState::BodyDue;
                } else {
                    warn!("Ignoring continuation prompt with no multiline command waiting");
                }
                return None;
            }
            Line::Text(text) => text,
        };

        if let Some(mut lines) = self.pdu_notification.take() {
            lines.push(text);
            return Some(DispatchEvent::Unsolicited(lines));
        }

        if self.in_flight() {
            let head = &self.queue[0];
            if let Some(outcome) = self.rules.terminals.classify(&text, head.spec.alternate_success()) {
                return self.complete(outcome, Terminator::Line(text));
            }
            if let Some(tag) = self.rules.notifications.lookup(&text) {
                if !head.expects_response(&text) {
                    return self.unsolicited(tag.has_pdu_line(), text);
                }
            }
            trace!("Collected '{}' for AT{}", text, head.spec.text());
            self.collected.push(text);
            return None;
        }

        let has_pdu = self
            .rules
            .notifications
            .lookup(&text)
            .map(|tag| tag.has_pdu_line())
            .unwrap_or(false);
        self.unsolicited(has_pdu, text)
    }

    /// Fail the head command if its deadline passed
    pub fn on_deadline(&mut self, now: Instant) -> Option<DispatchEvent<T>> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        let timeout = self.queue.front().map(|c| c.timeout)?;
        warn!(
            "AT{} got no reply within {:?}",
            self.queue[0].spec.text(),
            timeout
        );
        self.abort_due = true;
        self.complete(Outcome::Failure, Terminator::Timeout(timeout))
    }

    /// Fail everything, in queue order, and refuse further commands
    pub fn close(&mut self) -> Vec<DispatchEvent<T>> {
        self.closed = true;
        self.abort_due = false;
        self.deadline = None;
        self.head = HeadState::Unsent;
        self.pdu_notification = None;
        let mut collected = std::mem::take(&mut self.collected);

        self.queue
            .drain(..)
            .map(|command| DispatchEvent::Completed {
                reply: ReplyGroup::new(
                    command.spec.text(),
                    std::mem::take(&mut collected),
                    Terminator::NoReply,
                ),
                outcome: Outcome::Failure,
                token: command.token,
            })
            .collect()
    }

    fn unsolicited(&mut self, has_pdu: bool, text: String) -> Option<DispatchEvent<T>> {
        if has_pdu {
            self.pdu_notification = Some(vec![text]);
            None
        } else {
            Some(DispatchEvent::Unsolicited(vec![text]))
        }
    }

    fn complete(&mut self, outcome: Outcome, terminator: Terminator) -> Option<DispatchEvent<T>> {
        let command = self.queue.pop_front()?;
        self.head = HeadState::Unsent;
        self.deadline = None;
        let lines = std::mem::take(&mut self.collected);
        debug!(
            "AT{} completed: {:?} ({} lines, {:?})",
            command.spec.text(),
            outcome,
            lines.len(),
            terminator
        );
        Some(DispatchEvent::Completed {
            token: command.token,
            outcome,
            reply: ReplyGroup::new(command.spec.text(), lines, terminator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use std::time::Duration;

    fn dispatcher() -> Dispatcher<u32> {
        Dispatcher::new(Arc::new(LineRules::default()))
    }

    fn cmd(text: &str, token: u32) -> Command<u32> {
        Command::new(CommandSpec::new(text), Duration::from_secs(5), token)
    }

    fn line(text: &str) -> Line {
        Line::Text(text.to_string())
    }

    fn completed(event: Option<DispatchEvent<u32>>) -> (u32, Outcome, ReplyGroup) {
        match event {
            Some(DispatchEvent::Completed { token, outcome, reply }) => (token, outcome, reply),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn writes_one_command_at_a_time() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.enqueue(cmd("+CSQ", 1)).unwrap();
        d.enqueue(cmd("+CREG?", 2)).unwrap();

        let first = d.poll_transmit(now).unwrap();
        assert_eq!(first.bytes, Bytes::from_static(b"AT+CSQ\r\n"));
        assert!(d.poll_transmit(now).is_none());

        assert!(d.on_line(line("+CSQ: 20,99")).is_none());
        let (token, outcome, reply) = completed(d.on_line(line("OK")));
        assert_eq!((token, outcome), (1, Outcome::Success));
        assert_eq!(reply.lines(), &["+CSQ: 20,99".to_string()]);

        let second = d.poll_transmit(now).unwrap();
        assert_eq!(second.bytes, Bytes::from_static(b"AT+CREG?\r\n"));
    }

    #[test]
    fn fifo_holds_with_interleaved_notifications() {
        let mut d = dispatcher();
        let now = Instant::now();
        for (i, text) in ["+CSQ", "+CPIN?", "+CGMR"].iter().enumerate() {
            d.enqueue(cmd(text, i as u32)).unwrap();
        }

        let mut order = Vec::new();
        let mut unsolicited = Vec::new();
        let script = [
            vec!["RING", "+CSQ: 10,99", "OK"],
            vec!["+CREG: 1", "+CPIN: READY", "+CRING: VOICE", "OK"],
            vec!["revision 1.0", "RING", "ERROR"],
        ];
        for replies in script {
            assert!(d.poll_transmit(now).is_some());
            for text in replies {
                match d.on_line(line(text)) {
                    Some(DispatchEvent::Completed { token, reply, .. }) => order.push((token, reply)),
                    Some(DispatchEvent::Unsolicited(lines)) => unsolicited.extend(lines),
                    None => {}
                }
            }
        }

        let tokens: Vec<u32> = order.iter().map(|(t, _)| *t).collect();
        assert_eq!(tokens, vec![0, 1, 2]);
        assert_eq!(order[0].1.lines(), &["+CSQ: 10,99".to_string()]);
        assert_eq!(order[1].1.lines(), &["+CPIN: READY".to_string()]);
        assert_eq!(order[2].1.lines(), &["revision 1.0".to_string()]);
        assert_eq!(unsolicited, vec!["RING", "+CREG: 1", "+CRING: VOICE", "RING"]);
    }

    #[test]
    fn idle_lines_are_unsolicited() {
        let mut d = dispatcher();
        match d.on_line(line("NO CARRIER")) {
            Some(DispatchEvent::Unsolicited(lines)) => assert_eq!(lines, vec!["NO CARRIER"]),
            other => panic!("unexpected {:?}", other),
        }
        match d.on_line(line("garbage")) {
            Some(DispatchEvent::Unsolicited(lines)) => assert_eq!(lines, vec!["garbage"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pdu_notification_takes_next_line_even_mid_command() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.enqueue(cmd("+CSQ", 7)).unwrap();
        d.poll_transmit(now).unwrap();

        assert!(d.on_line(line("+CMT: ,23")).is_none());
        match d.on_line(line("0791947106004034040D91")) {
            Some(DispatchEvent::Unsolicited(lines)) => {
                assert_eq!(lines, vec!["+CMT: ,23", "0791947106004034040D91"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        let (token, outcome, reply) = completed(d.on_line(line("OK")));
        assert_eq!((token, outcome), (7, Outcome::Success));
        assert!(reply.lines().is_empty());
    }

    #[test]
    fn alternate_success_marker() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.enqueue(Command::new(
            CommandSpec::new("D*99#").succeeds_on("CONNECT"),
            Duration::from_secs(5),
            1,
        ))
        .unwrap();
        d.poll_transmit(now).unwrap();
        let (_, outcome, reply) = completed(d.on_line(line("CONNECT 115200")));
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(reply.terminal_line(), Some("CONNECT 115200"));
    }

    #[test]
    fn multiline_command_waits_for_prompt() {
        let mut d = dispatcher();
        let now = Instant::now();
        d.enqueue(Command::new(
            CommandSpec::new("+CMGS=\"123\",129").with_body("hi"),
            Duration::from_secs(5),
            1,
        ))
        .unwrap();

        let first = d.poll_transmit(now).unwrap();
        assert!(first.expect_prompt);
        assert_eq!(first.bytes, Bytes::from_static(b"AT+CMGS=\"123\",129\r"));
        assert!(d.poll_transmit(now).is_none());

        assert!(d.on_line(Line::Prompt).is_none());
        let body = d.poll_transmit(now).unwrap();
        assert_eq!(body.bytes, Bytes::from_static(b"hi\x1a"));

        assert!(d.on_line(line("+CMGS: 42")).is_none());
        let (_, outcome, reply) = completed(d.on_line(line("OK")));
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(reply.lines(), &["+CMGS: 42".to_string()]);
    }

    #[test]
    fn deadline_fails_head_and_sends_abort() {
        let mut d = dispatcher();
        let start = Instant::now();
        d.enqueue(cmd("+COPS", 1)).unwrap();
        d.enqueue(cmd("+CSQ", 2)).unwrap();
        d.poll_transmit(start).unwrap();

        assert_eq!(d.next_deadline(), Some(start + Duration::from_secs(5)));
        assert!(d.on_deadline(start + Duration::from_secs(4)).is_none());

        let (token, outcome, reply) = completed(d.on_deadline(start + Duration::from_secs(5)));
        assert_eq!((token, outcome), (1, Outcome::Failure));
        assert_eq!(reply.terminator(), &Terminator::Timeout(Duration::from_secs(5)));

        let abort = d.poll_transmit(start).unwrap();
        assert_eq!(abort.bytes, Bytes::from_static(b"\x1a"));
        let next = d.poll_transmit(start).unwrap();
        assert_eq!(next.bytes, Bytes::from_static(b"AT+CSQ\r\n"));
    }

    #[test]
    fn close_fails_all_in_order() {
        let mut d = dispatcher();
        d.enqueue(cmd("+CSQ", 1)).unwrap();
        d.enqueue(cmd("+CREG?", 2)).unwrap();
        d.poll_transmit(Instant::now()).unwrap();
        d.on_line(line("+CSQ: 5,99"));

        let events = d.close();
        let tokens: Vec<u32> = events
            .into_iter()
            .map(|e| match e {
                DispatchEvent::Completed { token, outcome, reply } => {
                    assert_eq!(outcome, Outcome::Failure);
                    assert!(reply.is_no_reply());
                    token
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(tokens, vec![1, 2]);
        assert!(d.is_closed());
        assert_eq!(d.enqueue(cmd("+CSQ", 3)), Err(DispatcherClosed));
        assert!(d.poll_transmit(Instant::now()).is_none());
    }
}
