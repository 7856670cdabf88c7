//! Error types for the host server client
//!
//! Errors are grouped by the layer that raises them. Transport, protocol and
//! authentication errors are fatal for the connection that produced them;
//! a failed command or program call is not an error at all and comes back as
//! a [`CommandResult`](crate::remote::CommandResult).

use std::io;
use thiserror::Error;

use crate::remote::HostMessage;

/// Top-level error type for host server operations
#[derive(Debug, Error)]
pub enum HostServerError {
    /// Socket, TLS or timeout failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// Malformed or unexpected data on the wire
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Sign-on or attribute exchange rejected
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),
    /// Field conversion failures
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    /// List API failures
    #[error("List error: {0}")]
    List(#[from] ListError),
    /// Streaming buffer pool failures
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HostServerError {
    /// Whether the connection that raised this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        match self {
            HostServerError::Transport(_) | HostServerError::Authentication(_) => true,
            HostServerError::Protocol(err) => err.is_fatal(),
            _ => false,
        }
    }
}

/// Connection level failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused by remote host
    #[error("Connection refused to {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },
    /// Connect, read or write did not finish in time
    #[error("Timed out after {timeout_ms}ms while {operation}")]
    Timeout { operation: String, timeout_ms: u64 },
    /// DNS resolution failure
    #[error("DNS resolution failed for {host}")]
    DnsResolution { host: String },
    /// Connection lost during operation
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
    /// The connection was closed earlier and cannot be reused
    #[error("Connection closed")]
    ConnectionClosed,
    /// TLS setup or handshake failure
    #[error("TLS error: {message}")]
    Tls { message: String },
}

/// Framing and data stream errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes than the layout requires
    #[error("Short reply: expected at least {expected} bytes, received {received}")]
    ShortReply { expected: usize, received: usize },
    /// Length field smaller than the fixed header
    #[error("Invalid length field {length}")]
    InvalidLength { length: usize },
    /// Template length does not fit inside the envelope
    #[error("Template length {template_length} exceeds envelope length {length}")]
    InvalidTemplateLength { template_length: usize, length: usize },
    /// Length field larger than the configured limit
    #[error("Reply of {length} bytes exceeds the {max} byte limit")]
    ReplyTooLarge { length: usize, max: usize },
    /// Reply id does not answer the request that was sent
    #[error("Unexpected reply 0x{received:04X}, expected 0x{expected:04X}")]
    UnexpectedReply { expected: u16, received: u16 },
    /// Reply header names a different server
    #[error("Reply from server 0x{received:04X}, expected 0x{expected:04X}")]
    UnexpectedServer { expected: u16, received: u16 },
    /// Reply correlation does not match the outstanding request
    #[error("Correlation mismatch: expected {expected}, received {received}")]
    CorrelationMismatch { expected: u32, received: u32 },
    /// Code point not valid at this position
    #[error("Unknown code point 0x{code_point:04X} at offset {offset}")]
    UnknownCodePoint { code_point: u16, offset: usize },
    /// Required code point missing from a reply
    #[error("Missing code point 0x{code_point:04X} in {context}")]
    MissingField { code_point: u16, context: String },
    /// A diagnostic message runs past the end of the reply
    #[error("Message {index} declares {declared} bytes but only {available} remain")]
    TruncatedMessage { index: usize, declared: usize, available: usize },
    /// Parameter cannot be sent at the negotiated level
    #[error("Unsupported parameter: {reason}")]
    UnsupportedParameter { reason: String },
    /// A request is still waiting for its reply
    #[error("Request {correlation} is still awaiting a reply")]
    RequestInFlight { correlation: u32 },
    /// receive called with nothing outstanding
    #[error("No request is awaiting a reply")]
    NoOutstandingRequest,
}

impl ProtocolError {
    /// Misuse errors are raised before any I/O and leave the stream intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::UnsupportedParameter { .. }
                | ProtocolError::RequestInFlight { .. }
                | ProtocolError::NoOutstandingRequest
        )
    }
}

/// Sign-on failures
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Server rejected a handshake step
    #[error("{stage} rejected with return code 0x{return_code:08X}: {reason}")]
    Rejected { stage: String, return_code: u32, reason: String },
    /// Password level requires an encryption scheme this client lacks
    #[error("Password level {level} is not supported")]
    UnsupportedPasswordLevel { level: u8 },
    /// Credential unusable before it reaches the server
    #[error("Invalid credential: {reason}")]
    InvalidCredential { reason: String },
}

/// Field conversion errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Field extends beyond the available bytes
    #[error("Field at offset {offset} with length {length} exceeds {available} available bytes")]
    OutOfBounds { offset: usize, length: usize, available: usize },
    /// Digit nibble outside 0-9
    #[error("Invalid decimal nibble 0x{nibble:X} at position {position}")]
    InvalidDecimal { nibble: u8, position: usize },
    /// Sign nibble not one of A-F
    #[error("Invalid decimal sign nibble 0x{nibble:X}")]
    InvalidDecimalSign { nibble: u8 },
    /// Scale larger than the digit count
    #[error("Scale {scale} exceeds {digits} digits")]
    InvalidScale { digits: usize, scale: usize },
    /// Value does not fit the declared precision
    #[error("Value {value} does not fit in {digits} digits")]
    DecimalOverflow { value: String, digits: usize },
    /// Text is not a decimal number
    #[error("Invalid decimal text '{value}'")]
    InvalidDecimalText { value: String },
    /// No codec registered for this CCSID
    #[error("Unsupported code page {ccsid}")]
    UnsupportedCodePage { ccsid: u32 },
    /// Character has no encoding in the code page
    #[error("Character '{ch}' cannot be encoded in code page {ccsid}")]
    Unmappable { ch: char, ccsid: u32 },
    /// UTF-16 data with an odd byte count
    #[error("UTF-16 data has odd length {length}")]
    InvalidUtf16 { length: usize },
}

/// List API errors
#[derive(Debug, Error)]
pub enum ListError {
    /// Open, fetch or close program reported failure
    #[error("{program} failed with return code 0x{return_code:04X}{}", first_message(.messages))]
    CallFailed { program: String, return_code: u16, messages: Vec<HostMessage> },
    /// Program returned less than the minimum list information
    #[error("{program} returned no list information")]
    NoListInformation { program: String },
    /// Server reported an error while building the list
    #[error("Server failed to build the list (status '{status}')")]
    BuildFailed { status: char },
    /// List information reports an unusable record length
    #[error("Invalid record length {record_length} for a list of {total} records")]
    InvalidRecordLength { record_length: i32, total: i32 },
    /// Fetch returned no records before the total was reached
    #[error("List stalled after {consumed} of {total} records")]
    Stalled { consumed: i32, total: i32 },
    /// Cursor used after close
    #[error("List cursor already closed")]
    Closed,
}

fn first_message(messages: &[HostMessage]) -> String {
    match messages.first() {
        Some(message) => format!(": {} {}", message.id(), message.text()),
        None => String::new(),
    }
}

/// Buffer pool errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// Pool sizing rejected
    #[error("Invalid buffer pool configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// Record larger than the buffer it is loaded into
    #[error("Record of {size} bytes exceeds buffer capacity {capacity}")]
    RecordTooLarge { size: usize, capacity: usize },
    /// Null-field index outside the bitmap
    #[error("Null field {field} outside bitmap of {fields} fields")]
    NullFieldOutOfRange { field: usize, fields: usize },
    /// A worker panicked while processing
    #[error("Worker {worker} panicked while processing record {record_number}")]
    WorkerPanicked { worker: usize, record_number: i64 },
    /// The record source panicked while filling a buffer
    #[error("Record source panicked after {records} records")]
    SourcePanicked { records: u64 },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration parameter
    #[error("Invalid configuration parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Missing required configuration
    #[error("Missing required configuration parameter: {parameter}")]
    MissingRequired { parameter: String },
    /// Configuration file error
    #[error("Configuration file error '{path}': {error}")]
    FileError { path: String, error: String },
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout {
                operation: "waiting for the host".to_string(),
                timeout_ms: 0,
            },
            io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost {
                reason: "host closed the connection".to_string(),
            },
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => TransportError::ConnectionLost {
                reason: err.to_string(),
            },
            _ => TransportError::ConnectionLost {
                reason: format!("IO Error: {err}"),
            },
        }
    }
}

impl From<io::Error> for HostServerError {
    fn from(err: io::Error) -> Self {
        HostServerError::Transport(err.into())
    }
}

/// Result type alias for host server operations
pub type HostResult<T> = Result<T, HostServerError>;

/// Specialized result types for different components
pub type TransportResult<T> = Result<T, TransportError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type CodecResult<T> = Result<T, CodecError>;
pub type StreamResult<T> = Result<T, StreamError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_maps_to_transport_timeout() {
        let err: HostServerError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, HostServerError::Transport(TransportError::Timeout { .. })));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_eof_maps_to_connection_lost() {
        let err: TransportError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, TransportError::ConnectionLost { .. }));
    }

    #[test]
    fn test_misuse_is_not_fatal() {
        let err = HostServerError::from(ProtocolError::RequestInFlight { correlation: 4 });
        assert!(!err.is_fatal());
        let err = HostServerError::from(ProtocolError::ShortReply { expected: 24, received: 20 });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_list_error_display_includes_first_message() {
        let err = ListError::CallFailed {
            program: "QGY/QGYGTLE".to_string(),
            return_code: 0x0400,
            messages: vec![HostMessage::new("GUI0001", "Handle not valid")],
        };
        let text = err.to_string();
        assert!(text.contains("QGY/QGYGTLE"));
        assert!(text.contains("GUI0001"));
    }
}
