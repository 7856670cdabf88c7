//! List information returned by the open and get-entries APIs
//!
//! | offset | length | field                         |
//! |--------|--------|-------------------------------|
//! | 0      | 4      | total records                 |
//! | 4      | 4      | records returned              |
//! | 8      | 4      | request handle                |
//! | 12     | 4      | record length                 |
//! | 16     | 1      | information complete          |
//! | 17     | 13     | date and time created         |
//! | 30     | 1      | list status                   |
//! | 32     | 4      | length of information returned|
//! | 36     | 4      | first record in receiver      |

use chrono::{NaiveDate, NaiveDateTime};

use crate::codec::{decode_int, field, TextCodec};
use crate::error::CodecResult;

/// Size of the list information output parameter
pub const LIST_INFORMATION_LENGTH: u32 = 80;
/// Fewer bytes than this means no list information is available
pub const MIN_LIST_INFORMATION_LENGTH: usize = 12;

/// Opaque server-side cursor id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHandle([u8; 4]);

impl ListHandle {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformationComplete {
    /// All requested information was returned
    Complete,
    /// Some information could not be returned
    Incomplete,
    /// Partial information returned because the receiver was too small
    Partial,
    Other(char),
}

impl InformationComplete {
    fn from_char(c: char) -> Self {
        match c {
            'C' => InformationComplete::Complete,
            'I' => InformationComplete::Incomplete,
            'P' => InformationComplete::Partial,
            other => InformationComplete::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    Pending,
    Building,
    Built,
    Error,
    Primed,
    Overflow,
    Unknown(char),
}

impl ListStatus {
    fn from_char(c: char) -> Self {
        match c {
            '0' => ListStatus::Pending,
            '1' => ListStatus::Building,
            '2' => ListStatus::Built,
            '3' => ListStatus::Error,
            '4' => ListStatus::Primed,
            '5' => ListStatus::Overflow,
            other => ListStatus::Unknown(other),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            ListStatus::Pending => '0',
            ListStatus::Building => '1',
            ListStatus::Built => '2',
            ListStatus::Error => '3',
            ListStatus::Primed => '4',
            ListStatus::Overflow => '5',
            ListStatus::Unknown(c) => *c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInformation {
    pub total: i32,
    pub returned: i32,
    pub handle: ListHandle,
    pub record_length: i32,
    pub complete: Option<InformationComplete>,
    pub created: Option<NaiveDateTime>,
    pub status: Option<ListStatus>,
    pub info_length: i32,
    pub first_record: i32,
}

impl ListInformation {
    /// Parse list information. Fewer than 12 bytes yields `None`; fields past
    /// the end of a short block keep their defaults.
    pub fn parse(bytes: &[u8], codec: &dyn TextCodec) -> CodecResult<Option<Self>> {
        if bytes.len() < MIN_LIST_INFORMATION_LENGTH {
            return Ok(None);
        }
        let optional_int = |offset: usize| if bytes.len() >= offset + 4 { decode_int(bytes, offset) } else { Ok(0) };
        let optional_char = |offset: usize| -> CodecResult<Option<char>> {
            if bytes.len() > offset {
                Ok(codec.decode(&bytes[offset..offset + 1])?.chars().next())
            } else {
                Ok(None)
            }
        };

        let created = if bytes.len() >= 30 {
            parse_timestamp(&codec.decode(field(bytes, 17, 13)?)?)
        } else {
            None
        };

        Ok(Some(Self {
            total: decode_int(bytes, 0)?,
            returned: decode_int(bytes, 4)?,
            handle: ListHandle([bytes[8], bytes[9], bytes[10], bytes[11]]),
            record_length: optional_int(12)?,
            complete: optional_char(16)?.map(InformationComplete::from_char),
            created,
            status: optional_char(30)?.map(ListStatus::from_char),
            info_length: optional_int(32)?,
            first_record: optional_int(36)?,
        }))
    }

    /// Whether the server has finished materializing the list
    pub fn is_built(&self) -> bool {
        matches!(self.status, Some(ListStatus::Built) | None)
    }
}

/// `CYYMMDDHHMMSS`, century digit 0 for 19xx and 1 for 20xx
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if text.len() != 13 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number = |range: std::ops::Range<usize>| text[range].parse::<u32>().ok();
    let year = 1900 + 100 * number(0..1)? as i32 + number(1..3)? as i32;
    NaiveDate::from_ymd_opt(year, number(3..5)?, number(5..7)?)?.and_hms_opt(
        number(7..9)?,
        number(9..11)?,
        number(11..13)?,
    )
}
