//! Client for IBM i host servers
//!
//! Signs on to the remote command server, runs CL commands, calls programs
//! with typed parameters, pages through server-side lists and streams bulk
//! records through a fixed pool of reusable buffers.

/// Big-endian integers, fixed-width text and decimal fields
pub mod codec;

/// Client configuration persisted as JSON
pub mod config;

/// Request/reply framing shared by every host server
pub mod envelope;

/// Layered error types
pub mod error;

/// Seed exchange, sign-on and attribute negotiation
pub mod handshake;

/// TCP and TLS transports
pub mod network;

/// Connection lifecycle and the single in-flight request rule
pub mod connection;

/// Remote command execution and program calls
pub mod remote;

/// Open / fetch / close cursor protocol
pub mod list;

/// Ring of reusable record buffers drained by worker threads
pub mod buffer_pool;

pub use buffer_pool::{BufferPool, DataBuffer, PoolConfig, RecordSource};
pub use config::ClientConfig;
pub use connection::{ConnectionState, HostConnection};
pub use error::{HostResult, HostServerError};
pub use handshake::{CredentialProvider, PasswordCredential, ProfileTokenCredential};
pub use list::{ListDriver, ObjectListRequest};
pub use remote::{CommandResult, HostMessage, ProgramCall, ProgramParameter};
