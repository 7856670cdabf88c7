//! Connection lifecycle tests against a scripted host
//!
//! Covers sign-on gating, correlation bookkeeping and the closed-connection
//! fail-fast rule.

mod common;

use std::io::{self, Read, Write};

use common::*;
use hostserver::connection::ConnectionState;
use hostserver::error::{AuthenticationError, HostServerError, ProtocolError, TransportError};
use hostserver::connection::HostConnection;
use hostserver::envelope::SERVER_REMOTE_COMMAND;
use hostserver::handshake::{REQ_EXCHANGE_ATTRIBUTES, REQ_EXCHANGE_SEED, REQ_START_SERVER};
use hostserver::remote::{REPLY_CALL, REPLY_EXECUTE, REQ_EXECUTE};

#[test]
fn test_handshake_runs_three_steps_in_order() {
    let (connection, log) = connect(no_requests());

    assert_eq!(log.request_ids(), vec![REQ_EXCHANGE_SEED, REQ_START_SERVER, REQ_EXCHANGE_ATTRIBUTES]);
    assert_eq!(log.correlations(), vec![1, 2, 3]);
    assert_eq!(connection.state(), ConnectionState::Ready);

    let attributes = connection.attributes();
    assert_eq!(attributes.password_level, 2);
    assert_eq!(attributes.server_ccsid, 37);
    assert_eq!(attributes.server_nlv, "2924");
    assert_eq!(attributes.server_version, 7);
    assert_eq!(attributes.datastream_level, 10);
    assert_eq!(attributes.user.as_deref(), Some("TESTER"));
    assert_eq!(attributes.job_name.as_deref(), Some("123456/QUSER/QZRCSRVS"));
}

#[test]
fn test_start_server_carries_substitute_and_user() {
    let (_connection, log) = connect(no_requests());
    let start = &log.requests()[1];
    assert_eq!(start.template, vec![3, 1]);
    let substitute = start.find_code_point(0x1105).unwrap().unwrap();
    assert_eq!(substitute.len(), 20);
    let user = start.find_code_point(0x1104).unwrap().unwrap();
    assert_eq!(user.len(), 10);
}

#[test]
fn test_datastream_level_is_the_lower_of_both_sides() {
    let script = HostScript { datastream_level: 8, ..HostScript::default() };
    let (connection, _) = connect_with(script, &test_config(), no_requests()).unwrap();
    assert_eq!(connection.datastream_level(), 8);

    let mut config = test_config();
    config.datastream_level = 5;
    let (connection, log) = connect_with(HostScript::default(), &config, no_requests()).unwrap();
    assert_eq!(connection.datastream_level(), 5);
    let attributes_request = &log.requests()[2];
    assert_eq!(&attributes_request.template[12..14], &5u16.to_be_bytes());
}

#[test]
fn test_rejected_sign_on_sends_no_further_requests() {
    let script = HostScript { start_server_rc: 0x0003_000B, ..HostScript::default() };
    let (host, log) = ScriptedHost::new(script, no_requests());
    init_logging();

    let err = hostserver::HostConnection::establish(Box::new(host), &test_config(), &credential()).unwrap_err();
    match err {
        HostServerError::Authentication(AuthenticationError::Rejected { return_code, reason, .. }) => {
            assert_eq!(return_code, 0x0003_000B);
            assert_eq!(reason, "password incorrect");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(log.request_ids(), vec![REQ_EXCHANGE_SEED, REQ_START_SERVER]);
}

#[test]
fn test_des_password_level_is_unsupported() {
    let script = HostScript { password_level: 0, ..HostScript::default() };
    let (host, log) = ScriptedHost::new(script, no_requests());

    let err = hostserver::HostConnection::establish(Box::new(host), &test_config(), &credential()).unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Authentication(AuthenticationError::UnsupportedPasswordLevel { level: 0 })
    ));
    assert!(err.is_fatal());
    assert_eq!(log.request_ids(), vec![REQ_EXCHANGE_SEED]);
}

#[test]
fn test_one_request_in_flight_with_increasing_correlation() {
    let (mut connection, log) = connect(Box::new(|_| execute_reply(0, &[])));

    let first = connection.send_envelope(REQ_EXECUTE, vec![0], Vec::new()).unwrap();
    assert_eq!(first, 4);

    let err = connection.send_envelope(REQ_EXECUTE, vec![0], Vec::new()).unwrap_err();
    assert!(matches!(err, HostServerError::Protocol(ProtocolError::RequestInFlight { correlation: 4 })));
    assert!(!err.is_fatal());
    assert!(connection.is_ready());

    let reply = connection.receive_envelope().unwrap();
    assert_eq!(reply.correlation, first);
    assert_eq!(reply.request_id, REPLY_EXECUTE);

    let second = connection.send_envelope(REQ_EXECUTE, vec![0], Vec::new()).unwrap();
    assert_eq!(second, 5);
    assert_eq!(connection.receive_envelope().unwrap().correlation, 5);

    assert_eq!(log.correlations(), vec![1, 2, 3, 4, 5]);
    assert_eq!(connection.requests_sent(), 2);
}

#[test]
fn test_receive_without_request_is_misuse() {
    let (mut connection, _) = connect(no_requests());
    let err = connection.receive_envelope().unwrap_err();
    assert!(matches!(err, HostServerError::Protocol(ProtocolError::NoOutstandingRequest)));
    assert!(connection.is_ready());
}

#[test]
fn test_correlation_mismatch_closes_connection() {
    let (mut connection, log) = connect(Box::new(|_| {
        let mut reply = execute_reply(0, &[]);
        reply.correlation = 99;
        reply
    }));

    let err = connection.execute("DSPLIBL").unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Protocol(ProtocolError::CorrelationMismatch { expected: 4, received: 99 })
    ));
    assert_eq!(connection.state(), ConnectionState::Closed);

    let err = connection.execute("DSPLIBL").unwrap_err();
    assert!(matches!(err, HostServerError::Transport(TransportError::ConnectionClosed)));
    assert_eq!(log.requests().len(), 4);
}

#[test]
fn test_unexpected_reply_id_is_fatal() {
    let (mut connection, _) = connect(Box::new(|_| reply(REPLY_CALL, vec![0; 4], Vec::new())));

    let err = connection.execute("DSPLIBL").unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Protocol(ProtocolError::UnexpectedReply { expected: REPLY_EXECUTE, received: REPLY_CALL })
    ));
    assert!(!connection.is_ready());
}

#[test]
fn test_short_reply_template_is_fatal() {
    let (mut connection, _) = connect(Box::new(|_| reply(REPLY_EXECUTE, vec![0], Vec::new())));

    let err = connection.execute("DSPLIBL").unwrap_err();
    assert!(matches!(err, HostServerError::Protocol(ProtocolError::ShortReply { .. })));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn test_close_is_idempotent() {
    let (mut connection, log) = connect(no_requests());
    connection.close();
    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);

    let err = connection.send_envelope(REQ_EXECUTE, vec![0], Vec::new()).unwrap_err();
    assert!(matches!(err, HostServerError::Transport(TransportError::ConnectionClosed)));
    assert_eq!(log.requests().len(), 3);
}

#[test]
fn test_reply_from_another_server_is_fatal() {
    let (mut connection, _) = connect(Box::new(|_| {
        let mut reply = execute_reply(0, &[]);
        reply.server_id = 0xE004;
        reply
    }));

    let err = connection.execute("DSPLIBL").unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Protocol(ProtocolError::UnexpectedServer { expected: SERVER_REMOTE_COMMAND, received: 0xE004 })
    ));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

/// Accepts every write and times out on every read
struct SilentHost;

impl Read for SilentHost {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
    }
}

impl Write for SilentHost {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_read_timeout_reports_configured_duration() {
    init_logging();
    let mut config = test_config();
    config.io_timeout_ms = 1_500;

    let err = HostConnection::establish(Box::new(SilentHost), &config, &credential()).unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Transport(TransportError::Timeout { timeout_ms: 1_500, .. })
    ));
}
