//! Paginated list protocol
//!
//! Lists are built on the server by an open API that returns a handle and
//! a list information block. Records are then pulled in chunks through
//! QGYGTLE and the handle is released through QGYCLST.

pub mod cursor;
pub mod driver;
pub mod format;
pub mod info;
pub mod object;
pub mod stream;

pub use cursor::{ListBlock, ListCursor, OpenListRequest};
pub use driver::{ListDriver, ListSummary};
pub use format::{EntryFormat, RawEntryFormat};
pub use info::{InformationComplete, ListHandle, ListInformation, ListStatus, LIST_INFORMATION_LENGTH};
pub use object::{ObjectEntry, ObjectEntryFormat, ObjectListRequest};
pub use stream::ListRecordSource;

/// Library holding the open list APIs
pub const LIST_LIBRARY: &str = "QGY";
pub const GET_LIST_ENTRIES: &str = "QGYGTLE";
pub const CLOSE_LIST: &str = "QGYCLST";
