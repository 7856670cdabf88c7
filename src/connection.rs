//! Host server connection
//!
//! A [`HostConnection`] owns one transport and walks it through
//! `Disconnected -> Handshaking -> Ready -> Closed`. A connection value only
//! escapes [`HostConnection::establish`] once the handshake has succeeded, so
//! no application request can reach a server that has not accepted the
//! credential.
//!
//! Exactly one request may be in flight. Any transport or framing error
//! drops the transport and leaves the connection `Closed`; every later call
//! fails with [`TransportError::ConnectionClosed`].

use log::{debug, error, info, warn};
use rand::RngCore;

use crate::codec::{lookup, TextCodec};
use crate::config::ClientConfig;
use crate::envelope::{check_reply, Envelope, SERVER_REMOTE_COMMAND};
use crate::error::{HostResult, HostServerError, ProtocolError, TransportError};
use crate::handshake::{self, CredentialProvider};
use crate::network::{self, DynTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Ready,
    Closed,
}

/// Values agreed during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAttributes {
    pub client_ccsid: u32,
    pub server_ccsid: u32,
    pub server_nlv: String,
    pub server_version: u32,
    /// min(client level, server level)
    pub datastream_level: u16,
    pub password_level: u8,
    pub user: Option<String>,
    pub job_name: Option<String>,
}

pub struct HostConnection {
    transport: Option<DynTransport>,
    state: ConnectionState,
    attributes: NegotiatedAttributes,
    codec: &'static dyn TextCodec,
    max_reply_length: usize,
    io_timeout_ms: u64,
    next_correlation: u32,
    outstanding: Option<u32>,
    requests_sent: u64,
    bytes_sent: u64,
}

impl std::fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnection")
            .field("state", &self.state)
            .field("attributes", &self.attributes)
            .field("next_correlation", &self.next_correlation)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl HostConnection {
    /// Open a transport to the configured host and sign on.
    pub fn connect(config: &ClientConfig, credential: &dyn CredentialProvider) -> HostResult<Self> {
        config.validate()?;
        let transport = network::connect(config)?;
        Self::establish(transport, config, credential)
    }

    /// Run the handshake over an already open transport.
    pub fn establish(
        transport: DynTransport,
        config: &ClientConfig,
        credential: &dyn CredentialProvider,
    ) -> HostResult<Self> {
        let codec = lookup(config.client_ccsid)?;
        let mut connection = Self {
            transport: Some(transport),
            state: ConnectionState::Disconnected,
            attributes: NegotiatedAttributes {
                client_ccsid: config.client_ccsid,
                server_ccsid: 0,
                server_nlv: String::new(),
                server_version: 0,
                datastream_level: 0,
                password_level: 0,
                user: None,
                job_name: None,
            },
            codec,
            max_reply_length: config.max_reply_length,
            io_timeout_ms: config.io_timeout_ms,
            next_correlation: 1,
            outstanding: None,
            requests_sent: 0,
            bytes_sent: 0,
        };

        match connection.handshake(config, credential) {
            Ok(()) => {
                connection.state = ConnectionState::Ready;
                info!(
                    "session ready: level {}, server CCSID {}",
                    connection.attributes.datastream_level, connection.attributes.server_ccsid
                );
                Ok(connection)
            }
            Err(err) => {
                let err = connection.with_timeout(err);
                warn!("handshake failed: {err}");
                connection.teardown();
                Err(err)
            }
        }
    }

    fn handshake(&mut self, config: &ClientConfig, credential: &dyn CredentialProvider) -> HostResult<()> {
        self.state = ConnectionState::Handshaking;
        let max_length = self.max_reply_length;

        let mut client_seed = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_seed);

        let correlation = self.take_correlation();
        let challenge = handshake::exchange_random_seed(self.transport_mut()?, client_seed, correlation, max_length)?;
        self.attributes.password_level = challenge.password_level;

        let auth = credential.authenticate(&challenge)?;
        let correlation = self.take_correlation();
        let identity = handshake::start_server(self.transport_mut()?, &auth, correlation, max_length)?;
        self.attributes.user = identity.user;
        self.attributes.job_name = identity.job_name;

        let correlation = self.take_correlation();
        let server = handshake::exchange_attributes(
            self.transport_mut()?,
            config.client_ccsid,
            config.datastream_level,
            correlation,
            max_length,
        )?;
        self.attributes.server_ccsid = server.ccsid;
        self.attributes.server_nlv = server.nlv;
        self.attributes.server_version = server.version;
        self.attributes.datastream_level = config.datastream_level.min(server.datastream_level);
        Ok(())
    }

    fn take_correlation(&mut self) -> u32 {
        let correlation = self.next_correlation;
        self.next_correlation = self.next_correlation.wrapping_add(1).max(1);
        correlation
    }

    fn transport_mut(&mut self) -> HostResult<&mut DynTransport> {
        self.transport.as_mut().ok_or_else(|| TransportError::ConnectionClosed.into())
    }

    fn ensure_ready(&self) -> HostResult<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            _ => Err(TransportError::ConnectionClosed.into()),
        }
    }

    /// Tear the connection down if `err` leaves the stream unusable.
    fn fail<T>(&mut self, err: HostServerError) -> HostResult<T> {
        let err = self.with_timeout(err);
        if err.is_fatal() {
            error!("closing connection after error: {err}");
            self.teardown();
        }
        Err(err)
    }

    /// Pass `result` through, closing the connection on a fatal error.
    /// Used by callers that parse a reply after `exchange` returned it.
    pub(crate) fn guard<T>(&mut self, result: HostResult<T>) -> HostResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.fail(err),
        }
    }

    /// Socket timeouts surface from I/O without a duration; fill in ours.
    fn with_timeout(&self, err: HostServerError) -> HostServerError {
        match err {
            HostServerError::Transport(TransportError::Timeout { operation, timeout_ms: 0 }) => {
                TransportError::Timeout { operation, timeout_ms: self.io_timeout_ms }.into()
            }
            other => other,
        }
    }

    fn teardown(&mut self) {
        self.transport = None;
        self.outstanding = None;
        self.state = ConnectionState::Closed;
    }

    /// Send one request and return its correlation id.
    pub fn send_envelope(&mut self, request_id: u16, template: Vec<u8>, payload: Vec<u8>) -> HostResult<u32> {
        self.ensure_ready()?;
        if let Some(correlation) = self.outstanding {
            return Err(ProtocolError::RequestInFlight { correlation }.into());
        }

        let correlation = self.take_correlation();
        let mut request = Envelope::new(SERVER_REMOTE_COMMAND, request_id, template, payload);
        request.correlation = correlation;
        let length = request.length() as u64;

        let written = match self.transport.as_mut() {
            Some(transport) => request.write_to(transport),
            None => Err(TransportError::ConnectionClosed.into()),
        };
        if let Err(err) = written {
            return self.fail(err);
        }
        self.outstanding = Some(correlation);
        self.requests_sent += 1;
        self.bytes_sent += length;
        Ok(correlation)
    }

    /// Receive the reply to the outstanding request.
    pub fn receive_envelope(&mut self) -> HostResult<Envelope> {
        self.ensure_ready()?;
        let Some(correlation) = self.outstanding else {
            return Err(ProtocolError::NoOutstandingRequest.into());
        };

        let max_length = self.max_reply_length;
        let read = match self.transport.as_mut() {
            Some(transport) => Envelope::read_from(transport, max_length),
            None => Err(TransportError::ConnectionClosed.into()),
        };
        let reply = match read {
            Ok(reply) => reply,
            Err(err) => return self.fail(err),
        };
        if reply.correlation != correlation {
            return self.fail(
                ProtocolError::CorrelationMismatch { expected: correlation, received: reply.correlation }.into(),
            );
        }
        self.outstanding = None;
        Ok(reply)
    }

    /// Send a request and wait for the reply with `expected_reply` id.
    pub fn exchange(
        &mut self,
        request_id: u16,
        expected_reply: u16,
        template: Vec<u8>,
        payload: Vec<u8>,
    ) -> HostResult<Envelope> {
        let correlation = self.send_envelope(request_id, template, payload)?;
        let reply = self.receive_envelope()?;
        if let Err(err) = check_reply(&reply, SERVER_REMOTE_COMMAND, expected_reply, correlation) {
            return self.fail(err.into());
        }
        Ok(reply)
    }

    /// Drop the transport. Idempotent.
    pub fn close(&mut self) {
        if self.transport.is_some() {
            info!("closing connection to job {}", self.attributes.job_name.as_deref().unwrap_or("?"));
        }
        self.teardown();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn attributes(&self) -> &NegotiatedAttributes {
        &self.attributes
    }

    pub fn datastream_level(&self) -> u16 {
        self.attributes.datastream_level
    }

    /// Codec for text sent to and read from the server
    pub fn codec(&self) -> &'static dyn TextCodec {
        self.codec
    }

    /// Application requests sent since the handshake
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl Drop for HostConnection {
    fn drop(&mut self) {
        if self.transport.is_some() {
            debug!("dropping open connection");
            self.close();
        }
    }
}
