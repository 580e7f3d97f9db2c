//! Typed decoding of notification lines

use super::NotificationTag;
use crate::error::ProtocolError;
use crate::parse::{fields_of, numeric_field, right_hand_side, text_field, tuple_to_number, NUMBER_NATIONAL};
use crate::state::{CallDirection, CallId, RegistrationStatus};

/// A decoded unsolicited notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Registration {
        status: RegistrationStatus,
        roaming: bool,
        lac: Option<String>,
        cell_id: Option<String>,
    },
    Ring,
    CallRing {
        kind: String,
    },
    CallerId {
        number: String,
    },
    CallWaiting {
        number: Option<String>,
    },
    SignalQuality {
        rssi: u8,
    },
    CallProgress {
        id: CallId,
        message: u8,
        direction: CallDirection,
        number: Option<String>,
    },
    CarrierLost,
    Busy,
    NewMessage {
        storage: String,
        index: u32,
    },
    IncomingMessage {
        header: String,
        pdu: String,
    },
    SimStatus {
        status: String,
    },
}

fn malformed(line: &str, reason: &str) -> ProtocolError {
    ProtocolError::malformed(format!("unsolicited '{}'", line), reason)
}

/// Number from a `"digits",type` pair at `index`
fn number_at(fields: &[String], index: usize) -> Option<String> {
    let digits = text_field(fields, index)?;
    let ntype = numeric_field(fields, index + 1).unwrap_or(NUMBER_NATIONAL);
    Some(tuple_to_number(&digits, ntype))
}

impl Notification {
    pub fn parse(tag: NotificationTag, lines: &[String]) -> Result<Self, ProtocolError> {
        let line = lines.first().map(String::as_str).unwrap_or_default();
        let fields = fields_of(line);

        let notification = match tag {
            NotificationTag::Registration => {
                // Unsolicited form is <stat>[,<lac>,<ci>]; tolerate the
                // query form <n>,<stat>[,<lac>,<ci>] some firmwares send.
                let offset = if fields.len() % 2 == 0 { 1 } else { 0 };
                let stat: u8 = numeric_field(&fields, offset)
                    .ok_or_else(|| malformed(line, "missing registration status"))?;
                let (status, roaming) = RegistrationStatus::from_creg(stat);
                Self::Registration {
                    status,
                    roaming,
                    lac: text_field(&fields, offset + 1),
                    cell_id: text_field(&fields, offset + 2),
                }
            }
            NotificationTag::Ring => Self::Ring,
            NotificationTag::CallRing => Self::CallRing {
                kind: right_hand_side(line).to_string(),
            },
            NotificationTag::CallerId => Self::CallerId {
                number: number_at(&fields, 0).ok_or_else(|| malformed(line, "missing number"))?,
            },
            NotificationTag::CallWaiting => Self::CallWaiting {
                number: number_at(&fields, 0),
            },
            NotificationTag::SignalQuality => Self::SignalQuality {
                rssi: numeric_field(&fields, 0).ok_or_else(|| malformed(line, "missing rssi"))?,
            },
            NotificationTag::CallProgress => {
                let id = numeric_field(&fields, 0).ok_or_else(|| malformed(line, "missing call id"))?;
                let message = numeric_field(&fields, 1).ok_or_else(|| malformed(line, "missing message type"))?;
                let direction = match numeric_field::<u8>(&fields, 4) {
                    Some(1) => CallDirection::Incoming,
                    _ => CallDirection::Outgoing,
                };
                Self::CallProgress {
                    id,
                    message,
                    direction,
                    number: number_at(&fields, 6),
                }
            }
            NotificationTag::CarrierLost => Self::CarrierLost,
            NotificationTag::Busy => Self::Busy,
            NotificationTag::NewMessage => Self::NewMessage {
                storage: text_field(&fields, 0).unwrap_or_else(|| "SM".to_string()),
                index: numeric_field(&fields, 1).ok_or_else(|| malformed(line, "missing index"))?,
            },
            NotificationTag::IncomingMessage => Self::IncomingMessage {
                header: right_hand_side(line).to_string(),
                pdu: lines
                    .get(1)
                    .cloned()
                    .ok_or_else(|| malformed(line, "missing PDU line"))?,
            },
            NotificationTag::SimStatus => Self::SimStatus {
                status: right_hand_side(line).to_string(),
            },
        };
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tag: NotificationTag, lines: &[&str]) -> Result<Notification, ProtocolError> {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        Notification::parse(tag, &lines)
    }

    #[test]
    fn registration_forms() {
        assert_eq!(
            parse(NotificationTag::Registration, &["+CREG: 1,\"00C3\",\"0A1F\""]).unwrap(),
            Notification::Registration {
                status: RegistrationStatus::Registered,
                roaming: false,
                lac: Some("00C3".into()),
                cell_id: Some("0A1F".into()),
            }
        );
        assert_eq!(
            parse(NotificationTag::Registration, &["+CREG: 2,5,\"00C3\",\"0A1F\""]).unwrap(),
            Notification::Registration {
                status: RegistrationStatus::Registered,
                roaming: true,
                lac: Some("00C3".into()),
                cell_id: Some("0A1F".into()),
            }
        );
        assert!(matches!(
            parse(NotificationTag::Registration, &["+CREG: 2"]).unwrap(),
            Notification::Registration { status: RegistrationStatus::Searching, lac: None, .. }
        ));
        assert!(parse(NotificationTag::Registration, &["+CREG: x"]).is_err());
    }

    #[test]
    fn caller_id_numbers() {
        assert_eq!(
            parse(NotificationTag::CallerId, &["+CLIP: \"491771234\",145,,,,0"]).unwrap(),
            Notification::CallerId { number: "+491771234".into() }
        );
        assert_eq!(
            parse(NotificationTag::CallerId, &["+CLIP: \"01771234\",129"]).unwrap(),
            Notification::CallerId { number: "01771234".into() }
        );
    }

    #[test]
    fn call_progress_fields() {
        assert_eq!(
            parse(NotificationTag::CallProgress, &["%CPI: 1,0,0,0,1,0,\"491234\",145,,,0"]).unwrap(),
            Notification::CallProgress {
                id: 1,
                message: 0,
                direction: CallDirection::Incoming,
                number: Some("+491234".into()),
            }
        );
        assert!(matches!(
            parse(NotificationTag::CallProgress, &["%CPI: 2,6,0,1,0,0"]).unwrap(),
            Notification::CallProgress { id: 2, message: 6, direction: CallDirection::Outgoing, number: None }
        ));
    }

    #[test]
    fn message_notifications() {
        assert_eq!(
            parse(NotificationTag::NewMessage, &["+CMTI: \"SM\",7"]).unwrap(),
            Notification::NewMessage { storage: "SM".into(), index: 7 }
        );
        assert_eq!(
            parse(NotificationTag::IncomingMessage, &["+CMT: ,23", "0791"]).unwrap(),
            Notification::IncomingMessage { header: ",23".into(), pdu: "0791".into() }
        );
        assert!(parse(NotificationTag::IncomingMessage, &["+CMT: ,23"]).is_err());
    }

    #[test]
    fn simple_notifications() {
        assert_eq!(parse(NotificationTag::Ring, &["RING"]).unwrap(), Notification::Ring);
        assert_eq!(
            parse(NotificationTag::CallRing, &["+CRING: VOICE"]).unwrap(),
            Notification::CallRing { kind: "VOICE".into() }
        );
        assert_eq!(
            parse(NotificationTag::SignalQuality, &["%CSQ: 23,99,2"]).unwrap(),
            Notification::SignalQuality { rssi: 23 }
        );
        assert_eq!(
            parse(NotificationTag::SimStatus, &["+CPIN: SIM PIN"]).unwrap(),
            Notification::SimStatus { status: "SIM PIN".into() }
        );
    }
}
