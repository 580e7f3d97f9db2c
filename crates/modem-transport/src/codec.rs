//! Line framing for the AT protocol
//!
//! Replies arrive as `\r\n`-framed text, often with a leading `\r\n` before
//! every line. Blank lines carry no information and are dropped here. The
//! multiline command prompt `> ` has no terminator at all, so it is only
//! recognised while the decoder has been armed for it.

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

/// Longest line kept before the buffer is discarded
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// One inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete text line, terminator stripped
    Text(String),
    /// The continuation prompt of a multiline command
    Prompt,
}

impl Line {
    /// The line text, or `None` for the prompt
    pub fn text(&self) -> Option<&str> {
        match self {
            Line::Text(text) => Some(text),
            Line::Prompt => None,
        }
    }
}

/// Decoder turning the modem byte stream into [`Line`]s
#[derive(Debug, Clone)]
pub struct AtLineCodec {
    prompt_armed: bool,
    max_line_length: usize,
    discarding: bool,
}

impl Default for AtLineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl AtLineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            prompt_armed: false,
            max_line_length,
            discarding: false,
        }
    }

    /// Expect a `> ` prompt before the next line
    pub fn arm_prompt(&mut self) {
        self.prompt_armed = true;
    }

    pub fn disarm_prompt(&mut self) {
        self.prompt_armed = false;
    }

    pub fn is_prompt_armed(&self) -> bool {
        self.prompt_armed
    }
}

fn is_eol(byte: &u8) -> bool {
    *byte == b'\r' || *byte == b'\n'
}

impl Decoder for AtLineCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        loop {
            let leading = src.iter().take_while(|b| is_eol(b)).count();
            if leading > 0 {
                src.advance(leading);
                self.discarding = false;
            }
            if src.is_empty() {
                return Ok(None);
            }

            if self.prompt_armed && !self.discarding {
                if src.starts_with(b"> ") {
                    src.advance(2);
                    self.prompt_armed = false;
                    trace!("continuation prompt");
                    return Ok(Some(Line::Prompt));
                }
                if src[..] == b">"[..] {
                    return Ok(None);
                }
            }

            let Some(end) = src.iter().position(is_eol) else {
                if src.len() > self.max_line_length {
                    warn!(
                        "Discarding {} bytes without line terminator",
                        src.len()
                    );
                    src.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };

            let raw = src.split_to(end);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let text = String::from_utf8_lossy(&raw).trim_end().to_string();
            if text.is_empty() {
                continue;
            }
            trace!("<- {}", text);
            return Ok(Some(Line::Text(text)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !src.is_empty() {
                    warn!("Dropping {} bytes of partial line at end of stream", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}
