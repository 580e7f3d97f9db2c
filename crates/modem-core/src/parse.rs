//! Helpers for picking apart AT reply lines

use crate::error::ErrorClass;

const CME_TEXT: &[(u16, &str)] = &[
    (0, "Phone failure"),
    (1, "No connection to phone"),
    (2, "Phone adapter link reserved"),
    (3, "Operation not allowed"),
    (4, "Operation not supported"),
    (5, "PH_SIM PIN required"),
    (6, "PH_FSIM PIN required"),
    (7, "PH_FSIM PUK required"),
    (10, "SIM not inserted"),
    (11, "SIM PIN required"),
    (12, "SIM PUK required"),
    (13, "SIM failure"),
    (14, "SIM busy"),
    (15, "SIM wrong"),
    (16, "Incorrect password"),
    (17, "SIM PIN2 required"),
    (18, "SIM PUK2 required"),
    (20, "Memory full"),
    (21, "Invalid index"),
    (22, "Not found"),
    (23, "Memory failure"),
    (24, "Text string too long"),
    (26, "Dial string too long"),
    (27, "Invalid characters in dial string"),
    (30, "No network service"),
    (31, "Network timeout"),
    (32, "Network not allowed, emergency calls only"),
    (48, "PH-SIM PUK required"),
    (100, "Unknown error"),
    (107, "GPRS services not allowed"),
    (148, "Unspecified GPRS error"),
    (149, "PDP authentication failure"),
    (258, "Phone is busy"),
    (262, "SIM Blocked"),
];

const CMS_TEXT: &[(u16, &str)] = &[
    (300, "ME Failure"),
    (302, "Operation not allowed"),
    (303, "Operation not supported"),
    (304, "Invalid PDU mode parameter"),
    (305, "Invalid Text mode parameter"),
    (310, "SIM not inserted"),
    (311, "SIM PIN required"),
    (312, "PH-SIM PIN required"),
    (313, "SIM failure"),
    (314, "SIM busy"),
    (315, "SIM wrong"),
    (316, "SIM PUK required"),
    (317, "SIM PIN2 required"),
    (318, "SIM PUK2 required"),
    (320, "Memory failure"),
    (321, "Invalid memory index"),
    (322, "Memory full"),
    (330, "SMSC address unknown"),
    (331, "No network service"),
    (332, "Network timeout"),
];

fn table(class: ErrorClass) -> &'static [(u16, &'static str)] {
    match class {
        ErrorClass::Cme => CME_TEXT,
        ErrorClass::Cms => CMS_TEXT,
        ErrorClass::Ext => &[],
    }
}

/// Human readable text for a numeric device error
pub fn device_error_text(class: ErrorClass, code: u16) -> &'static str {
    table(class)
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, text)| *text)
        .unwrap_or("Unknown error")
}

/// Numeric code for a verbose device error text
pub fn device_error_code(class: ErrorClass, text: &str) -> Option<u16> {
    table(class)
        .iter()
        .find(|(_, t)| t.eq_ignore_ascii_case(text.trim()))
        .map(|(code, _)| *code)
}

/// Everything after the first `:` of an information line, trimmed
///
/// `+CPIN: READY` gives `READY`; a line without a colon is returned trimmed.
pub fn right_hand_side(line: &str) -> &str {
    match line.split_once(':') {
        Some((_, rhs)) => rhs.trim(),
        None => line.trim(),
    }
}

/// Split a parameter list at commas outside double quotes
///
/// Quotes are removed from the fields and surrounding blanks trimmed, so
/// `1,"00C3", "0A1F"` gives `["1", "00C3", "0A1F"]`.
pub fn split_fields(params: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in params.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !params.is_empty() {
        fields.push(current.trim().to_string());
    }
    fields
}

/// Contents of each top-level `( ... )` group, quotes respected
///
/// `(2,"A (1)","A","26201"),,(0,1)` gives `2,"A (1)","A","26201"` and `0,1`.
pub fn parenthesised_groups(params: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut start = None;
    let mut quoted = false;

    for (i, ch) in params.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' if !quoted && start.is_none() => start = Some(i + 1),
            ')' if !quoted => {
                if let Some(from) = start.take() {
                    groups.push(&params[from..i]);
                }
            }
            _ => {}
        }
    }
    groups
}

/// Parameters of an information line: `+CSQ: 17,99` gives `["17", "99"]`
pub fn fields_of(line: &str) -> Vec<String> {
    split_fields(right_hand_side(line))
}

/// Numeric field `index`, if present and numeric
pub fn numeric_field<T: std::str::FromStr>(fields: &[String], index: usize) -> Option<T> {
    fields.get(index).and_then(|f| f.parse().ok())
}

/// Non-empty text field `index`
pub fn text_field(fields: &[String], index: usize) -> Option<String> {
    fields.get(index).filter(|f| !f.is_empty()).cloned()
}

/// Convert a `+CSQ` RSSI value (0..31, 99 unknown) to percent
pub fn signal_quality_to_percent(rssi: u8) -> u8 {
    if rssi == 0 || rssi > 31 {
        0
    } else {
        ((rssi as f64).ln() / 31f64.ln() * 100.0).round() as u8
    }
}

/// Type-of-number for international numbers
pub const NUMBER_INTERNATIONAL: u8 = 145;
/// Type-of-number for everything else
pub const NUMBER_NATIONAL: u8 = 129;

/// Split a dialable number into digits and type-of-number
pub fn number_to_tuple(number: &str) -> (&str, u8) {
    match number.strip_prefix('+') {
        Some(digits) => (digits, NUMBER_INTERNATIONAL),
        None => (number, NUMBER_NATIONAL),
    }
}

/// Rebuild a number from digits and type-of-number
pub fn tuple_to_number(digits: &str, ntype: u8) -> String {
    let digits = digits.trim_start_matches('+');
    if ntype == NUMBER_INTERNATIONAL {
        format!("+{}", digits)
    } else {
        digits.to_string()
    }
}

const DIAL_CHARS: &str = "0123456789*#pPwW";

/// Whether `number` is acceptable in a dial string
pub fn is_dialable(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    !digits.is_empty() && digits.len() <= 40 && digits.chars().all(|c| DIAL_CHARS.contains(c))
}

/// Quote a string parameter, dropping embedded quotes
pub fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}
