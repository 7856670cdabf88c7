//! Request and reply framing
//!
//! Every exchange with a host server is one envelope: a 20-byte big-endian
//! header, `template_length` bytes of fixed template, and a payload made of
//! code-point fields (`LL` u32, `CP` u16, data).
//!
//! ```text
//! 0       4          6          8            12           16        18
//! | length | header_id | server_id | cs_instance | correlation | tmpl_len | req_id |
//! ```

use std::io::{Read, Write};

use log::debug;

use crate::codec::{decode_u16, decode_u32};
use crate::error::{HostResult, ProtocolError, ProtocolResult, TransportError};

/// Fixed header size
pub const HEADER_LENGTH: usize = 20;
/// Size of the `LL` + `CP` prefix of a code-point field
pub const CODE_POINT_HEADER_LENGTH: usize = 6;

/// Remote command and program call server
pub const SERVER_REMOTE_COMMAND: u16 = 0xE008;

/// One request or reply unit on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header_id: u16,
    pub server_id: u16,
    pub cs_instance: u32,
    pub correlation: u32,
    pub request_id: u16,
    pub template: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(server_id: u16, request_id: u16, template: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            header_id: 0,
            server_id,
            cs_instance: 0,
            correlation: 0,
            request_id,
            template,
            payload,
        }
    }

    /// Total length written into the header
    pub fn length(&self) -> usize {
        HEADER_LENGTH + self.template.len() + self.payload.len()
    }

    /// Serialize header, template and payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        out.extend_from_slice(&(self.length() as u32).to_be_bytes());
        out.extend_from_slice(&self.header_id.to_be_bytes());
        out.extend_from_slice(&self.server_id.to_be_bytes());
        out.extend_from_slice(&self.cs_instance.to_be_bytes());
        out.extend_from_slice(&self.correlation.to_be_bytes());
        out.extend_from_slice(&(self.template.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&self.template);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one complete envelope. Trailing bytes past the declared length
    /// are ignored.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let header = parse_header(bytes)?;
        if bytes.len() < header.length {
            return Err(ProtocolError::ShortReply { expected: header.length, received: bytes.len() });
        }
        let length = header.length;
        Ok(header.into_envelope(&bytes[HEADER_LENGTH..length]))
    }

    /// Read exactly one envelope, refusing declared lengths above `max_length`.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, max_length: usize) -> HostResult<Self> {
        let mut head = [0u8; HEADER_LENGTH];
        reader.read_exact(&mut head).map_err(TransportError::from)?;
        let header = parse_header(&head)?;
        if header.length > max_length {
            return Err(ProtocolError::ReplyTooLarge { length: header.length, max: max_length }.into());
        }

        let mut rest = vec![0u8; header.length - HEADER_LENGTH];
        reader.read_exact(&mut rest).map_err(TransportError::from)?;
        let envelope = header.into_envelope(&rest);
        debug!(
            "received 0x{:04X} correlation {} ({} bytes)",
            envelope.request_id, envelope.correlation, header.length
        );
        Ok(envelope)
    }

    /// Write the serialized envelope and flush.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> HostResult<()> {
        let bytes = self.to_bytes();
        debug!(
            "sending 0x{:04X} correlation {} ({} bytes)",
            self.request_id,
            self.correlation,
            bytes.len()
        );
        writer.write_all(&bytes).map_err(TransportError::from)?;
        writer.flush().map_err(TransportError::from)?;
        Ok(())
    }

    /// Big-endian u16 at `offset` within the template
    pub fn template_u16(&self, offset: usize) -> ProtocolResult<u16> {
        decode_u16(&self.template, offset).map_err(|_| self.short_template(offset + 2))
    }

    /// Big-endian u32 at `offset` within the template
    pub fn template_u32(&self, offset: usize) -> ProtocolResult<u32> {
        decode_u32(&self.template, offset).map_err(|_| self.short_template(offset + 4))
    }

    fn short_template(&self, needed: usize) -> ProtocolError {
        ProtocolError::ShortReply {
            expected: HEADER_LENGTH + needed,
            received: HEADER_LENGTH + self.template.len(),
        }
    }

    /// Iterate over the payload's code-point fields
    pub fn code_points(&self) -> CodePoints<'_> {
        CodePoints::new(&self.payload, HEADER_LENGTH + self.template.len())
    }

    /// Data of the first field with `code_point`, if present
    pub fn find_code_point(&self, code_point: u16) -> ProtocolResult<Option<&[u8]>> {
        for field in self.code_points() {
            let field = field?;
            if field.code_point == code_point {
                return Ok(Some(field.data));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    length: usize,
    header_id: u16,
    server_id: u16,
    cs_instance: u32,
    correlation: u32,
    template_length: usize,
    request_id: u16,
}

impl Header {
    fn into_envelope(self, body: &[u8]) -> Envelope {
        let (template, payload) = body.split_at(self.template_length);
        Envelope {
            header_id: self.header_id,
            server_id: self.server_id,
            cs_instance: self.cs_instance,
            correlation: self.correlation,
            request_id: self.request_id,
            template: template.to_vec(),
            payload: payload.to_vec(),
        }
    }
}

fn parse_header(bytes: &[u8]) -> ProtocolResult<Header> {
    if bytes.len() < HEADER_LENGTH {
        return Err(ProtocolError::ShortReply { expected: HEADER_LENGTH, received: bytes.len() });
    }
    let be32 = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let be16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);

    let length = be32(0) as usize;
    if length < HEADER_LENGTH {
        return Err(ProtocolError::InvalidLength { length });
    }
    let template_length = be16(16) as usize;
    if template_length > length - HEADER_LENGTH {
        return Err(ProtocolError::InvalidTemplateLength { template_length, length });
    }
    Ok(Header {
        length,
        header_id: be16(4),
        server_id: be16(6),
        cs_instance: be32(8),
        correlation: be32(12),
        template_length,
        request_id: be16(18),
    })
}

/// Verify a reply comes from `server_id` and answers the request sent with
/// `correlation`.
pub fn check_reply(reply: &Envelope, server_id: u16, expected_reply: u16, correlation: u32) -> ProtocolResult<()> {
    if reply.server_id != server_id {
        return Err(ProtocolError::UnexpectedServer { expected: server_id, received: reply.server_id });
    }
    if reply.correlation != correlation {
        return Err(ProtocolError::CorrelationMismatch { expected: correlation, received: reply.correlation });
    }
    if reply.request_id != expected_reply {
        return Err(ProtocolError::UnexpectedReply { expected: expected_reply, received: reply.request_id });
    }
    Ok(())
}

/// Append one `LL CP data` field
pub fn write_code_point(buf: &mut Vec<u8>, code_point: u16, data: &[u8]) {
    let length = (CODE_POINT_HEADER_LENGTH + data.len()) as u32;
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(&code_point.to_be_bytes());
    buf.extend_from_slice(data);
}

/// A code-point field borrowed from a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePoint<'a> {
    pub code_point: u16,
    /// Field data without the 6-byte prefix
    pub data: &'a [u8],
    /// Offset of the field from the start of the envelope
    pub offset: usize,
}

/// Iterator over `LL CP data` fields. A field whose length runs past the end
/// of the payload yields an error and ends iteration.
pub struct CodePoints<'a> {
    bytes: &'a [u8],
    position: usize,
    base: usize,
    failed: bool,
}

impl<'a> CodePoints<'a> {
    /// `base` is the envelope offset of `bytes[0]`, used in error reports
    pub fn new(bytes: &'a [u8], base: usize) -> Self {
        Self { bytes, position: 0, base, failed: false }
    }
}

impl<'a> Iterator for CodePoints<'a> {
    type Item = ProtocolResult<CodePoint<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.bytes.len() {
            return None;
        }
        let remaining = &self.bytes[self.position..];
        let offset = self.base + self.position;
        if remaining.len() < CODE_POINT_HEADER_LENGTH {
            self.failed = true;
            return Some(Err(ProtocolError::ShortReply {
                expected: offset + CODE_POINT_HEADER_LENGTH,
                received: self.base + self.bytes.len(),
            }));
        }
        let length = u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        let code_point = u16::from_be_bytes([remaining[4], remaining[5]]);
        if length < CODE_POINT_HEADER_LENGTH || length > remaining.len() {
            self.failed = true;
            return Some(Err(ProtocolError::ShortReply {
                expected: offset + length.max(CODE_POINT_HEADER_LENGTH),
                received: self.base + self.bytes.len(),
            }));
        }
        self.position += length;
        Some(Ok(CodePoint { code_point, data: &remaining[CODE_POINT_HEADER_LENGTH..length], offset }))
    }
}
