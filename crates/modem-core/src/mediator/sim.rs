//! SIM authentication, identity and storage

use super::{Mediator, MediatorContext, Step};
use crate::command::{CommandSpec, ReplyGroup};
use crate::error::{DeviceErrorKind, ModemError, ModemResult};
use crate::operation::{MessageStatus, Operation, OperationKind, OperationOutput, PhonebookEntry, StoredMessage};
use crate::parse::{
    fields_of, numeric_field, quoted, right_hand_side, text_field, tuple_to_number, NUMBER_INTERNATIONAL,
    NUMBER_NATIONAL,
};
use tracing::{debug, info};

/// Refuse anything but `min..=max` ASCII digits
fn check_digits(code: &str, what: &str, min: usize, max: usize) -> ModemResult<()> {
    if (min..=max).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    let message = if min == max {
        format!("{} must be {} digits", what, min)
    } else {
        format!("{} must be {} to {} digits", what, min, max)
    };
    Err(ModemError::invalid_parameter(message))
}

/// Announce the authentication state after the SIM took a code
///
/// Taken from the reply when the device includes a `+CPIN:` line, queried
/// otherwise.
fn reannounce_auth_status(reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) {
    match reply.find("+CPIN:") {
        Some(line) => ctx.state.announce_auth_status(right_hand_side(line)),
        None => ctx.spawn(Operation::GetAuthStatus),
    }
}

/// `+CPIN="<code>"`, then the authentication state is announced again
#[derive(Debug)]
pub struct SendAuthCodeMediator {
    code: String,
}

impl SendAuthCodeMediator {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl Mediator for SendAuthCodeMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::SendAuthCode
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        check_digits(&self.code, "auth code", 4, 8)?;
        Ok(CommandSpec::new(format!("+CPIN={}", quoted(&self.code))))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        info!("Auth code accepted");
        reannounce_auth_status(reply, ctx);
        Step::Succeed(OperationOutput::Done)
    }
}

/// `+CPIN?`
#[derive(Debug, Default)]
pub struct GetAuthStatusMediator;

impl GetAuthStatusMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetAuthStatusMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetAuthStatus
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CPIN?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        let Some(line) = reply.find("+CPIN:") else {
            return Step::malformed(reply, "no +CPIN line");
        };
        let status = right_hand_side(line).to_string();
        ctx.state.announce_auth_status(status.clone());
        Step::Succeed(OperationOutput::AuthStatus(status))
    }
}

/// `+CPIN="<puk>","<new pin>"`
#[derive(Debug)]
pub struct UnlockMediator {
    puk: String,
    new_pin: String,
}

impl UnlockMediator {
    pub fn new(puk: impl Into<String>, new_pin: impl Into<String>) -> Self {
        Self {
            puk: puk.into(),
            new_pin: new_pin.into(),
        }
    }
}

impl Mediator for UnlockMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::Unlock
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        check_digits(&self.puk, "PUK", 8, 8)?;
        check_digits(&self.new_pin, "new PIN", 4, 8)?;
        Ok(CommandSpec::new(format!(
            "+CPIN={},{}",
            quoted(&self.puk),
            quoted(&self.new_pin)
        )))
    }

    fn on_success(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        info!("SIM unblocked");
        reannounce_auth_status(reply, ctx);
        Step::Succeed(OperationOutput::Done)
    }
}

/// `+CPWD="SC","<old>","<new>"`
#[derive(Debug)]
pub struct ChangeAuthCodeMediator {
    old: String,
    new: String,
}

impl ChangeAuthCodeMediator {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

impl Mediator for ChangeAuthCodeMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::ChangeAuthCode
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        check_digits(&self.old, "old PIN", 4, 8)?;
        check_digits(&self.new, "new PIN", 4, 8)?;
        Ok(CommandSpec::new(format!(
            "+CPWD=\"SC\",{},{}",
            quoted(&self.old),
            quoted(&self.new)
        )))
    }

    fn on_success(&mut self, _reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        info!("SIM PIN changed");
        Step::Succeed(OperationOutput::Done)
    }
}

/// `+CIMI`
#[derive(Debug, Default)]
pub struct GetImsiMediator;

impl GetImsiMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetImsiMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetImsi
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CIMI"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        // Plain digits, or `+CIMI: "<digits>"` on some firmwares
        let imsi = reply
            .lines()
            .first()
            .map(|line| right_hand_side(line).trim_matches('"').to_string())
            .unwrap_or_default();
        if imsi.is_empty() {
            return Step::malformed(reply, "no IMSI");
        }
        Step::Succeed(OperationOutput::Imsi(imsi))
    }
}

/// `+CSCA?`
#[derive(Debug, Default)]
pub struct GetServiceCenterNumberMediator;

impl GetServiceCenterNumberMediator {
    pub fn new() -> Self {
        Self
    }
}

impl Mediator for GetServiceCenterNumberMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::GetServiceCenterNumber
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CSCA?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        // +CSCA: "<number>"[,<type>]
        let fields = reply.find("+CSCA:").map(fields_of).unwrap_or_default();
        let Some(digits) = text_field(&fields, 0) else {
            return Step::malformed(reply, "no service center address");
        };
        let ntype = numeric_field(&fields, 1).unwrap_or(NUMBER_INTERNATIONAL);
        Step::Succeed(OperationOutput::ServiceCenter(tuple_to_number(&digits, ntype)))
    }
}

/// Index range from `+CPBR: (<first>-<last>)[,<nlength>,<tlength>]`
fn phonebook_range(line: &str) -> Option<(u16, u16)> {
    let fields = fields_of(line);
    let (first, last) = fields.first()?.trim_matches(|c: char| c == '(' || c == ')').split_once('-')?;
    Some((first.trim().parse().ok()?, last.trim().parse().ok()?))
}

/// `+CPBR: <index>,"<number>",<type>,"<name>"`
fn phonebook_entry(line: &str) -> Option<PhonebookEntry> {
    let fields = fields_of(line);
    let number = fields.get(1)?;
    let ntype = numeric_field(&fields, 2).unwrap_or(NUMBER_NATIONAL);
    Some(PhonebookEntry {
        index: numeric_field(&fields, 0)?,
        name: fields.get(3).cloned().unwrap_or_default(),
        number: tuple_to_number(number, ntype),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhonebookStep {
    Range,
    Read,
}

/// `+CPBS="SM";+CPBR=?` for the valid indices, then `+CPBR=<first>,<last>`
#[derive(Debug)]
pub struct RetrievePhonebookMediator {
    step: PhonebookStep,
}

impl RetrievePhonebookMediator {
    pub fn new() -> Self {
        Self {
            step: PhonebookStep::Range,
        }
    }
}

impl Default for RetrievePhonebookMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mediator for RetrievePhonebookMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::RetrievePhonebook
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CPBS=\"SM\";+CPBR=?"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        match self.step {
            PhonebookStep::Range => {
                let Some((first, last)) = reply.find("+CPBR:").and_then(phonebook_range) else {
                    return Step::malformed(reply, "no phonebook index range");
                };
                self.step = PhonebookStep::Read;
                Step::Send(CommandSpec::new(format!("+CPBR={},{}", first, last)))
            }
            PhonebookStep::Read => {
                let entries: Vec<PhonebookEntry> = reply
                    .lines()
                    .iter()
                    .filter(|line| line.starts_with("+CPBR:"))
                    .filter_map(|line| phonebook_entry(line))
                    .collect();
                debug!("Read {} phonebook entries", entries.len());
                Step::Succeed(OperationOutput::Phonebook(entries))
            }
        }
    }

    fn on_failure(&mut self, reply: &ReplyGroup, ctx: &mut MediatorContext<'_>) -> Step {
        let error = ctx.failure(reply);
        // An empty range is reported as "not found"
        if self.step == PhonebookStep::Read && error.device_error() == Some(DeviceErrorKind::SimNotFound) {
            return Step::Succeed(OperationOutput::Phonebook(Vec::new()));
        }
        Step::Fail(error)
    }
}

/// Text mode listing: a `+CMGL:` header per message followed by its text
fn parse_message_list(lines: &[String]) -> Result<Vec<StoredMessage>, String> {
    let mut messages: Vec<StoredMessage> = Vec::new();
    let mut has_text = false;

    for line in lines {
        if line.starts_with("+CMGL:") {
            // <index>,<stat>,<oa/da>,[<alpha>],[<scts>],<tooa/toda>,<length>
            let fields = fields_of(line);
            let index = numeric_field(&fields, 0).ok_or_else(|| format!("bad message index in '{}'", line))?;
            let status = fields
                .get(1)
                .and_then(|stat| MessageStatus::from_text(stat))
                .ok_or_else(|| format!("bad message status in '{}'", line))?;
            let number = fields.get(2).cloned().unwrap_or_default();
            let default_type = if number.starts_with('+') {
                NUMBER_INTERNATIONAL
            } else {
                NUMBER_NATIONAL
            };
            let ntype = numeric_field(&fields, 5).unwrap_or(default_type);
            messages.push(StoredMessage {
                index,
                status,
                number: tuple_to_number(&number, ntype),
                text: String::new(),
            });
            has_text = false;
        } else if let Some(message) = messages.last_mut() {
            if has_text {
                message.text.push('\n');
            }
            message.text.push_str(line);
            has_text = true;
        } else {
            debug!("Skipping text before the first message header: '{}'", line);
        }
    }
    Ok(messages)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessagebookStep {
    TextMode,
    List,
}

/// `+CMGF=1`, then `+CMGL="<status>"`
#[derive(Debug)]
pub struct RetrieveMessagebookMediator {
    status: Option<MessageStatus>,
    step: MessagebookStep,
}

impl RetrieveMessagebookMediator {
    pub fn new(status: Option<MessageStatus>) -> Self {
        Self {
            status,
            step: MessagebookStep::TextMode,
        }
    }
}

impl Mediator for RetrieveMessagebookMediator {
    fn kind(&self) -> OperationKind {
        OperationKind::RetrieveMessagebook
    }

    fn trigger(&mut self, _ctx: &mut MediatorContext<'_>) -> ModemResult<CommandSpec> {
        Ok(CommandSpec::new("+CMGF=1"))
    }

    fn on_success(&mut self, reply: &ReplyGroup, _ctx: &mut MediatorContext<'_>) -> Step {
        match self.step {
            MessagebookStep::TextMode => {
                self.step = MessagebookStep::List;
                let status = self.status.map(MessageStatus::as_text).unwrap_or("ALL");
                Step::Send(CommandSpec::new(format!("+CMGL={}", quoted(status))))
            }
            MessagebookStep::List => match parse_message_list(reply.lines()) {
                Ok(messages) => Step::Succeed(OperationOutput::Messages(messages)),
                Err(reason) => Step::malformed(reply, reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::events::ModemEvent;
    use crate::mediator::testing::{failed, sent, succeeded, Harness};

    #[test]
    fn accepted_code_reannounces_status() {
        let mut h = Harness::default();
        let mut send = SendAuthCodeMediator::new("1234");
        let spec = h.trigger(&mut send).unwrap();
        assert_eq!(spec.text(), "+CPIN=\"1234\"");

        succeeded(h.reply(&mut send, &spec, &["+CPIN: READY"], "OK"));
        assert_eq!(h.state.auth_status(), Some("READY"));
        assert!(h
            .state
            .take_events()
            .contains(&ModemEvent::AuthStatus { status: "READY".into() }));
        assert!(h.follow_ups.is_empty());
    }

    #[test]
    fn bare_ok_queries_status() {
        let mut h = Harness::default();
        let mut send = SendAuthCodeMediator::new("1234");
        let spec = h.trigger(&mut send).unwrap();
        succeeded(h.reply(&mut send, &spec, &[], "OK"));
        assert_eq!(h.follow_ups, vec![Operation::GetAuthStatus]);
    }

    #[test]
    fn wrong_code_is_reported() {
        let mut h = Harness::default();
        let mut send = SendAuthCodeMediator::new("0000");
        let spec = h.trigger(&mut send).unwrap();
        let err = failed(h.reply(&mut send, &spec, &[], "+CME ERROR: 16"));
        assert_eq!(err.device_error(), Some(DeviceErrorKind::SimAuthFailed));
        assert!(h.state.take_events().is_empty());
    }

    #[test]
    fn malformed_codes_are_refused() {
        let mut h = Harness::default();
        assert!(h.trigger(&mut SendAuthCodeMediator::new("12")).is_err());
        assert!(h.trigger(&mut SendAuthCodeMediator::new("12a4")).is_err());
    }

    #[test]
    fn status_query() {
        let mut h = Harness::default();
        let mut query = GetAuthStatusMediator::new();
        let spec = h.trigger(&mut query).unwrap();
        assert_eq!(
            succeeded(h.reply(&mut query, &spec, &["+CPIN: SIM PIN"], "OK")),
            OperationOutput::AuthStatus("SIM PIN".into())
        );

        let spec = h.trigger(&mut query).unwrap();
        let err = failed(h.reply(&mut query, &spec, &[], "OK"));
        assert!(matches!(err, ModemError::Protocol(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn unlock_with_puk() {
        let mut h = Harness::default();
        let mut unlock = UnlockMediator::new("12345678", "4321");
        let spec = h.trigger(&mut unlock).unwrap();
        assert_eq!(spec.text(), "+CPIN=\"12345678\",\"4321\"");
        succeeded(h.reply(&mut unlock, &spec, &[], "OK"));
        assert_eq!(h.follow_ups, vec![Operation::GetAuthStatus]);

        let mut unlock = UnlockMediator::new("12345678", "4321");
        let spec = h.trigger(&mut unlock).unwrap();
        let err = failed(h.reply(&mut unlock, &spec, &[], "+CME ERROR: 16"));
        assert_eq!(err.device_error(), Some(DeviceErrorKind::SimAuthFailed));

        assert!(h.trigger(&mut UnlockMediator::new("1234", "4321")).is_err());
        assert!(h.trigger(&mut UnlockMediator::new("12345678", "12")).is_err());
    }

    #[test]
    fn change_pin() {
        let mut h = Harness::default();
        let mut change = ChangeAuthCodeMediator::new("1234", "98765");
        let spec = h.trigger(&mut change).unwrap();
        assert_eq!(spec.text(), "+CPWD=\"SC\",\"1234\",\"98765\"");
        assert_eq!(succeeded(h.reply(&mut change, &spec, &[], "OK")), OperationOutput::Done);
        assert!(h.trigger(&mut ChangeAuthCodeMediator::new("1234", "x")).is_err());
    }

    #[test]
    fn imsi_plain_or_prefixed() {
        let mut h = Harness::default();
        let mut imsi = GetImsiMediator::new();
        let spec = h.trigger(&mut imsi).unwrap();
        assert_eq!(
            succeeded(h.reply(&mut imsi, &spec, &["262011234567890"], "OK")),
            OperationOutput::Imsi("262011234567890".into())
        );
        assert_eq!(
            succeeded(h.reply(&mut imsi, &spec, &["+CIMI: \"262011234567890\""], "OK")),
            OperationOutput::Imsi("262011234567890".into())
        );
        failed(h.reply(&mut imsi, &spec, &[], "OK"));
    }

    #[test]
    fn service_center_number() {
        let mut h = Harness::default();
        let mut query = GetServiceCenterNumberMediator::new();
        let spec = h.trigger(&mut query).unwrap();
        assert_eq!(
            succeeded(h.reply(&mut query, &spec, &["+CSCA: \"+491710760000\",145"], "OK")),
            OperationOutput::ServiceCenter("+491710760000".into())
        );
        assert_eq!(
            succeeded(h.reply(&mut query, &spec, &["+CSCA: \"01710760000\",129"], "OK")),
            OperationOutput::ServiceCenter("01710760000".into())
        );
        assert_eq!(
            succeeded(h.reply(&mut query, &spec, &["+CSCA: \"491710760000\""], "OK")),
            OperationOutput::ServiceCenter("+491710760000".into())
        );
        failed(h.reply(&mut query, &spec, &["+CSCA: \"\",129"], "OK"));
    }

    #[test]
    fn phonebook_reads_advertised_range() {
        let mut h = Harness::default();
        let mut phonebook = RetrievePhonebookMediator::new();
        let spec = h.trigger(&mut phonebook).unwrap();
        assert_eq!(spec.text(), "+CPBS=\"SM\";+CPBR=?");

        let read = sent(h.reply(&mut phonebook, &spec, &["+CPBR: (1-250),44,17"], "OK"));
        assert_eq!(read.text(), "+CPBR=1,250");

        let output = succeeded(h.reply(
            &mut phonebook,
            &read,
            &["+CPBR: 1,\"491701234567\",145,\"Alice\"", "+CPBR: 4,\"0301234\",129,\"Bob, Jr.\""],
            "OK",
        ));
        assert_eq!(
            output,
            OperationOutput::Phonebook(vec![
                PhonebookEntry {
                    index: 1,
                    name: "Alice".into(),
                    number: "+491701234567".into(),
                },
                PhonebookEntry {
                    index: 4,
                    name: "Bob, Jr.".into(),
                    number: "0301234".into(),
                },
            ])
        );
    }

    #[test]
    fn empty_phonebook() {
        let mut h = Harness::default();
        let mut phonebook = RetrievePhonebookMediator::new();
        let spec = h.trigger(&mut phonebook).unwrap();
        let read = sent(h.reply(&mut phonebook, &spec, &["+CPBR: (1-100)"], "OK"));
        assert_eq!(
            succeeded(h.reply(&mut phonebook, &read, &[], "+CME ERROR: 22")),
            OperationOutput::Phonebook(Vec::new())
        );

        // Without a range nothing is read
        let mut phonebook = RetrievePhonebookMediator::new();
        let spec = h.trigger(&mut phonebook).unwrap();
        failed(h.reply(&mut phonebook, &spec, &[], "OK"));
        let mut phonebook = RetrievePhonebookMediator::new();
        let spec = h.trigger(&mut phonebook).unwrap();
        failed(h.reply(&mut phonebook, &spec, &[], "+CME ERROR: 22"));
    }

    #[test]
    fn messagebook_groups_text_under_headers() {
        let mut h = Harness::default();
        let mut list = RetrieveMessagebookMediator::new(None);
        let mode = h.trigger(&mut list).unwrap();
        assert_eq!(mode.text(), "+CMGF=1");
        let spec = sent(h.reply(&mut list, &mode, &[], "OK"));
        assert_eq!(spec.text(), "+CMGL=\"ALL\"");

        let output = succeeded(h.reply(
            &mut list,
            &spec,
            &[
                "+CMGL: 1,\"REC READ\",\"+491701234567\",,\"08/05/13,09:12:15+08\",145,11",
                "hello there",
                "+CMGL: 2,\"STO UNSENT\",\"0301234\",,,129,9",
                "two",
                "lines",
            ],
            "OK",
        ));
        assert_eq!(
            output,
            OperationOutput::Messages(vec![
                StoredMessage {
                    index: 1,
                    status: MessageStatus::Read,
                    number: "+491701234567".into(),
                    text: "hello there".into(),
                },
                StoredMessage {
                    index: 2,
                    status: MessageStatus::Unsent,
                    number: "0301234".into(),
                    text: "two\nlines".into(),
                },
            ])
        );
    }

    #[test]
    fn messagebook_by_status() {
        let mut h = Harness::default();
        let mut list = RetrieveMessagebookMediator::new(Some(MessageStatus::Unread));
        let mode = h.trigger(&mut list).unwrap();
        let spec = sent(h.reply(&mut list, &mode, &[], "OK"));
        assert_eq!(spec.text(), "+CMGL=\"REC UNREAD\"");
        assert_eq!(
            succeeded(h.reply(&mut list, &spec, &[], "OK")),
            OperationOutput::Messages(Vec::new())
        );

        let mut list = RetrieveMessagebookMediator::new(None);
        let mode = h.trigger(&mut list).unwrap();
        let spec = sent(h.reply(&mut list, &mode, &[], "OK"));
        failed(h.reply(&mut list, &spec, &["+CMGL: 1,\"BOGUS\",\"123\",,,129,1", "x"], "OK"));
    }
}
