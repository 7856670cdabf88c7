//! Remote command execution and program calls
//!
//! Both operations return a [`CommandResult`]: a failed command is data,
//! not an error. Only transport and framing problems surface as `Err`.

pub mod command;
pub mod message;
pub mod parameter;

pub use message::{decode_messages, HostMessage, MessageType};
pub use parameter::{ProgramCall, ProgramParameter};

pub const REQ_EXECUTE: u16 = 0x1002;
pub const REPLY_EXECUTE: u16 = 0x8002;
pub const REQ_CALL: u16 = 0x1003;
pub const REPLY_CALL: u16 = 0x8003;

pub const CP_COMMAND: u16 = 0x1101;
pub const CP_COMMAND_CCSID: u16 = 0x1104;
pub const CP_PARAMETER: u16 = 0x1103;

/// Return code meaning success with no message list
pub const RC_NO_MESSAGES: u16 = 0x0100;

/// Up to ten messages, classic layout
pub const MESSAGE_OPTION_CLASSIC: u8 = 0;
/// All messages, extended layout
pub const MESSAGE_OPTION_EXTENDED: u8 = 4;
/// Datastream level at which the extended layout and CCSID-tagged command
/// text are used
pub const EXTENDED_LEVEL: u16 = 10;

/// program (10) + library (10) + message option (1) + parameter count (2)
pub const CALL_TEMPLATE_LENGTH: usize = 23;

pub fn message_option(datastream_level: u16) -> u8 {
    if datastream_level >= EXTENDED_LEVEL {
        MESSAGE_OPTION_EXTENDED
    } else {
        MESSAGE_OPTION_CLASSIC
    }
}

/// Outcome of one command or program call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    succeeded: bool,
    return_code: u16,
    messages: Vec<HostMessage>,
}

impl CommandResult {
    pub fn new(succeeded: bool, return_code: u16, messages: Vec<HostMessage>) -> Self {
        Self { succeeded, return_code, messages }
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn return_code(&self) -> u16 {
        self.return_code
    }

    pub fn messages(&self) -> &[HostMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<HostMessage> {
        self.messages
    }
}
