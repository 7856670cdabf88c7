//! Diagnostic messages returned by command and program calls
//!
//! Two layouts share a reply payload, told apart by code point:
//!
//! * `0x1102` classic: id (7), type (2 EBCDIC digits), severity (u16),
//!   file (10), library (10), substitution length (u16), text length (u16),
//!   substitution data, text.
//! * `0x1106` extended: text CCSID (u32), substitution CCSID (u32),
//!   severity (u16), type (u16), then u32-length blocks for id, file,
//!   library, text, substitution data and help.

use std::fmt;

use log::debug;

use crate::codec::{decode_fixed_text, decode_u16, decode_u32, field, lookup, TextCodec};
use crate::envelope::CODE_POINT_HEADER_LENGTH;
use crate::error::{HostResult, ProtocolError};

pub const CP_MESSAGE: u16 = 0x1102;
pub const CP_MESSAGE_EXTENDED: u16 = 0x1106;

const CLASSIC_FIXED_LENGTH: usize = 35;
const EXTENDED_FIXED_LENGTH: usize = 12;

/// Message type as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Completion,
    Diagnostic,
    Informational,
    Inquiry,
    SendersCopy,
    Request,
    RequestWithPrompting,
    Notify,
    Escape,
    NotifyNotHandled,
    EscapeNotHandled,
    ReplyNotValidityChecked,
    ReplyValidityChecked,
    ReplyMessageDefaultUsed,
    ReplySystemDefaultUsed,
    ReplyFromSystemReplyList,
    Other(u16),
}

impl MessageType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MessageType::Completion,
            2 => MessageType::Diagnostic,
            4 => MessageType::Informational,
            5 => MessageType::Inquiry,
            6 => MessageType::SendersCopy,
            8 => MessageType::Request,
            10 => MessageType::RequestWithPrompting,
            14 => MessageType::Notify,
            15 => MessageType::Escape,
            16 => MessageType::NotifyNotHandled,
            17 => MessageType::EscapeNotHandled,
            21 => MessageType::ReplyNotValidityChecked,
            22 => MessageType::ReplyValidityChecked,
            23 => MessageType::ReplyMessageDefaultUsed,
            24 => MessageType::ReplySystemDefaultUsed,
            25 => MessageType::ReplyFromSystemReplyList,
            other => MessageType::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            MessageType::Completion => 1,
            MessageType::Diagnostic => 2,
            MessageType::Informational => 4,
            MessageType::Inquiry => 5,
            MessageType::SendersCopy => 6,
            MessageType::Request => 8,
            MessageType::RequestWithPrompting => 10,
            MessageType::Notify => 14,
            MessageType::Escape => 15,
            MessageType::NotifyNotHandled => 16,
            MessageType::EscapeNotHandled => 17,
            MessageType::ReplyNotValidityChecked => 21,
            MessageType::ReplyValidityChecked => 22,
            MessageType::ReplyMessageDefaultUsed => 23,
            MessageType::ReplySystemDefaultUsed => 24,
            MessageType::ReplyFromSystemReplyList => 25,
            MessageType::Other(code) => *code,
        }
    }
}

/// One diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMessage {
    id: String,
    message_type: MessageType,
    severity: u16,
    file: String,
    library: String,
    text: String,
    substitution_data: Vec<u8>,
    help: Option<String>,
}

impl HostMessage {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, text: T) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Diagnostic,
            severity: 0,
            file: String::new(),
            library: String::new(),
            text: text.into(),
            substitution_data: Vec::new(),
            help: None,
        }
    }

    /// Seven-character message id, e.g. `CPF9801`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn severity(&self) -> u16 {
        self.severity
    }

    /// Message file the id was resolved from
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn substitution_data(&self) -> &[u8] {
        &self.substitution_data
    }

    /// Second-level text, extended layout only
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }
}

impl fmt::Display for HostMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.id, self.severity, self.text)
    }
}

/// Decode `count` messages from `bytes`. `base` is the envelope offset of
/// `bytes[0]` for error reports. A message whose length runs past the
/// available bytes, or fewer than `count` messages, is a framing error.
pub fn decode_messages(
    bytes: &[u8],
    count: usize,
    codec: &dyn TextCodec,
    base: usize,
) -> HostResult<Vec<HostMessage>> {
    let mut messages = Vec::with_capacity(count);
    let mut position = 0;

    while messages.len() < count {
        let index = messages.len();
        let available = bytes.len() - position;
        if available < CODE_POINT_HEADER_LENGTH {
            return Err(ProtocolError::TruncatedMessage {
                index,
                declared: CODE_POINT_HEADER_LENGTH,
                available,
            }
            .into());
        }
        let declared = decode_u32(bytes, position)? as usize;
        if declared < CODE_POINT_HEADER_LENGTH || declared > available {
            return Err(ProtocolError::TruncatedMessage { index, declared, available }.into());
        }
        let code_point = decode_u16(bytes, position + 4)?;
        let data = &bytes[position + CODE_POINT_HEADER_LENGTH..position + declared];

        let message = match code_point {
            CP_MESSAGE => decode_classic(data, index, codec)?,
            CP_MESSAGE_EXTENDED => decode_extended(data, index, codec)?,
            other => {
                return Err(ProtocolError::UnknownCodePoint { code_point: other, offset: base + position }.into())
            }
        };
        messages.push(message);
        position += declared;
    }

    if position < bytes.len() {
        debug!("{} bytes after the last message ignored", bytes.len() - position);
    }
    Ok(messages)
}

/// Fail when a message body is shorter than its own fields declare
fn require(data: &[u8], needed: usize, index: usize) -> HostResult<()> {
    if data.len() < needed {
        return Err(ProtocolError::TruncatedMessage {
            index,
            declared: CODE_POINT_HEADER_LENGTH + needed,
            available: CODE_POINT_HEADER_LENGTH + data.len(),
        }
        .into());
    }
    Ok(())
}

fn classic_type(raw: &[u8], codec: &dyn TextCodec) -> HostResult<MessageType> {
    let text = codec.decode(raw)?;
    Ok(text.trim().parse::<u16>().map(MessageType::from_code).unwrap_or(MessageType::Other(0)))
}

fn decode_classic(data: &[u8], index: usize, codec: &dyn TextCodec) -> HostResult<HostMessage> {
    require(data, CLASSIC_FIXED_LENGTH, index)?;
    let substitution_length = decode_u16(data, 31)? as usize;
    let text_length = decode_u16(data, 33)? as usize;
    let substitution_end = CLASSIC_FIXED_LENGTH + substitution_length;
    let text_end = substitution_end + text_length;
    require(data, text_end, index)?;

    Ok(HostMessage {
        id: decode_fixed_text(data, 0, 7, codec)?,
        message_type: classic_type(&data[7..9], codec)?,
        severity: decode_u16(data, 9)?,
        file: decode_fixed_text(data, 11, 10, codec)?,
        library: decode_fixed_text(data, 21, 10, codec)?,
        substitution_data: data[CLASSIC_FIXED_LENGTH..substitution_end].to_vec(),
        text: codec.decode(&data[substitution_end..text_end])?.trim_end().to_string(),
        help: None,
    })
}

/// Split the next u32-length block off `data`
fn next_block<'a>(data: &'a [u8], position: &mut usize, index: usize) -> HostResult<&'a [u8]> {
    require(data, *position + 4, index)?;
    let length = decode_u32(data, *position)? as usize;
    require(data, *position + 4 + length, index)?;
    let block = field(data, *position + 4, length)?;
    *position += 4 + length;
    Ok(block)
}

fn decode_extended(data: &[u8], index: usize, codec: &dyn TextCodec) -> HostResult<HostMessage> {
    require(data, EXTENDED_FIXED_LENGTH, index)?;
    let text_ccsid = decode_u32(data, 0)?;
    let severity = decode_u16(data, 8)?;
    let message_type = MessageType::from_code(decode_u16(data, 10)?);

    let mut position = EXTENDED_FIXED_LENGTH;
    let id = next_block(data, &mut position, index)?;
    let file = next_block(data, &mut position, index)?;
    let library = next_block(data, &mut position, index)?;
    let text = next_block(data, &mut position, index)?;
    let substitution = next_block(data, &mut position, index)?;
    let help = next_block(data, &mut position, index)?;

    let text_codec: &dyn TextCodec = match text_ccsid {
        0 | 65535 => codec,
        ccsid => lookup(ccsid).unwrap_or(codec),
    };
    let help = text_codec.decode(help)?.trim_end().to_string();

    Ok(HostMessage {
        id: codec.decode(id)?.trim_end().to_string(),
        message_type,
        severity,
        file: codec.decode(file)?.trim_end().to_string(),
        library: codec.decode(library)?.trim_end().to_string(),
        text: text_codec.decode(text)?.trim_end().to_string(),
        substitution_data: substitution.to_vec(),
        help: if help.is_empty() { None } else { Some(help) },
    })
}
