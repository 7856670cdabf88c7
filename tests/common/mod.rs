//! Scripted in-memory host server for integration tests
//!
//! `ScriptedHost` implements `Read + Write`: every complete envelope the
//! client writes is parsed, logged and answered immediately. The sign-on
//! steps are answered from `HostScript`; application requests go to a
//! handler closure.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use hostserver::codec::{decode_fixed_text, decode_int, decode_u16, decode_u32, encode_fixed_text, lookup, CCSID_037};
use hostserver::config::ClientConfig;
use hostserver::envelope::{write_code_point, Envelope, HEADER_LENGTH, SERVER_REMOTE_COMMAND};
use hostserver::handshake::{
    PasswordCredential, CP_JOB_NAME, CP_SEED, CP_USER_ID, REPLY_EXCHANGE_ATTRIBUTES, REPLY_EXCHANGE_SEED,
    REPLY_START_SERVER, REQ_EXCHANGE_ATTRIBUTES, REQ_EXCHANGE_SEED, REQ_START_SERVER,
};
use hostserver::remote::message::CP_MESSAGE;
use hostserver::remote::{CP_COMMAND, CP_COMMAND_CCSID, CP_PARAMETER, REPLY_CALL, REPLY_EXECUTE};
use hostserver::{HostConnection, HostResult};

pub type Handler = Box<dyn FnMut(&Envelope) -> Envelope + Send>;

/// Every envelope the client sent, in order
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<Envelope>>>);

impl RequestLog {
    pub fn requests(&self) -> Vec<Envelope> {
        self.0.lock().unwrap().clone()
    }

    pub fn request_ids(&self) -> Vec<u16> {
        self.requests().iter().map(|r| r.request_id).collect()
    }

    pub fn correlations(&self) -> Vec<u32> {
        self.requests().iter().map(|r| r.correlation).collect()
    }

    fn push(&self, request: Envelope) {
        self.0.lock().unwrap().push(request);
    }
}

/// How the host answers the sign-on steps
#[derive(Debug, Clone)]
pub struct HostScript {
    pub password_level: u8,
    pub start_server_rc: u32,
    pub datastream_level: u16,
    pub server_ccsid: u32,
}

impl Default for HostScript {
    fn default() -> Self {
        Self { password_level: 2, start_server_rc: 0, datastream_level: 10, server_ccsid: 37 }
    }
}

pub struct ScriptedHost {
    script: HostScript,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    log: RequestLog,
    handler: Handler,
}

impl ScriptedHost {
    pub fn new(script: HostScript, handler: Handler) -> (Self, RequestLog) {
        let log = RequestLog::default();
        let host = Self { script, inbound: Vec::new(), outbound: VecDeque::new(), log: log.clone(), handler };
        (host, log)
    }

    fn answer(&mut self, request: &Envelope) -> Envelope {
        let ebcdic = lookup(CCSID_037).unwrap();
        match request.request_id {
            REQ_EXCHANGE_SEED => {
                let mut payload = Vec::new();
                write_code_point(&mut payload, CP_SEED, &[7; 8]);
                let mut reply = reply(REPLY_EXCHANGE_SEED, 0u32.to_be_bytes().to_vec(), payload);
                reply.header_id = u16::from(self.script.password_level) << 8;
                reply
            }
            REQ_START_SERVER => {
                let mut payload = Vec::new();
                let mut user = 37u32.to_be_bytes().to_vec();
                user.extend(encode_fixed_text("TESTER", 10, ebcdic).unwrap());
                write_code_point(&mut payload, CP_USER_ID, &user);
                let mut job = 37u32.to_be_bytes().to_vec();
                job.extend(ebcdic.encode("123456/QUSER/QZRCSRVS").unwrap());
                write_code_point(&mut payload, CP_JOB_NAME, &job);
                reply(REPLY_START_SERVER, self.script.start_server_rc.to_be_bytes().to_vec(), payload)
            }
            REQ_EXCHANGE_ATTRIBUTES => {
                let mut template = 0u16.to_be_bytes().to_vec();
                template.extend(self.script.server_ccsid.to_be_bytes());
                template.extend(ebcdic.encode("2924").unwrap());
                template.extend(7u32.to_be_bytes());
                template.extend(self.script.datastream_level.to_be_bytes());
                reply(REPLY_EXCHANGE_ATTRIBUTES, template, Vec::new())
            }
            _ => (self.handler)(request),
        }
    }
}

impl Write for ScriptedHost {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(buf);
        while self.inbound.len() >= 4 {
            let length = u32::from_be_bytes([self.inbound[0], self.inbound[1], self.inbound[2], self.inbound[3]]) as usize;
            if self.inbound.len() < length {
                break;
            }
            let bytes: Vec<u8> = self.inbound.drain(..length).collect();
            let request = Envelope::from_bytes(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.log.push(request.clone());
            let mut response = self.answer(&request);
            if response.correlation == 0 {
                response.correlation = request.correlation;
            }
            self.outbound.extend(response.to_bytes());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedHost {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn reply(request_id: u16, template: Vec<u8>, payload: Vec<u8>) -> Envelope {
    Envelope::new(SERVER_REMOTE_COMMAND, request_id, template, payload)
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new("scripted.host")
}

pub fn credential() -> PasswordCredential {
    PasswordCredential::new("tester", "secret")
}

/// Sign on to a scripted host.
pub fn connect_with(script: HostScript, config: &ClientConfig, handler: Handler) -> HostResult<(HostConnection, RequestLog)> {
    init_logging();
    let (host, log) = ScriptedHost::new(script, handler);
    let connection = HostConnection::establish(Box::new(host), config, &credential())?;
    Ok((connection, log))
}

pub fn connect(handler: Handler) -> (HostConnection, RequestLog) {
    connect_with(HostScript::default(), &test_config(), handler).unwrap()
}

/// Handler that fails the test if any application request arrives
pub fn no_requests() -> Handler {
    Box::new(|request: &Envelope| -> Envelope { panic!("unexpected request 0x{:04X}", request.request_id) })
}

/// Classic-layout message code point
pub fn classic_message(id: &str, severity: u16, text: &str) -> Vec<u8> {
    let codec = lookup(CCSID_037).unwrap();
    let text = codec.encode(text).unwrap();
    let mut data = encode_fixed_text(id, 7, codec).unwrap();
    data.extend(codec.encode("15").unwrap());
    data.extend(severity.to_be_bytes());
    data.extend(encode_fixed_text("QCPFMSG", 10, codec).unwrap());
    data.extend(encode_fixed_text("QSYS", 10, codec).unwrap());
    data.extend(0u16.to_be_bytes());
    data.extend((text.len() as u16).to_be_bytes());
    data.extend(text);
    let mut out = Vec::new();
    write_code_point(&mut out, CP_MESSAGE, &data);
    out
}

pub fn execute_reply(return_code: u16, messages: &[Vec<u8>]) -> Envelope {
    let mut template = return_code.to_be_bytes().to_vec();
    template.extend((messages.len() as u16).to_be_bytes());
    reply(REPLY_EXECUTE, template, messages.concat())
}

/// Output parameter sub-envelope as the server returns it
pub fn output_parameter(data: &[u8]) -> Vec<u8> {
    let mut out = ((12 + data.len()) as u32).to_be_bytes().to_vec();
    out.extend(CP_PARAMETER.to_be_bytes());
    out.extend((data.len() as u32).to_be_bytes());
    out.extend(12u16.to_be_bytes());
    out.extend_from_slice(data);
    out
}

pub fn call_reply(return_code: u16, outputs: &[Vec<u8>], messages: &[Vec<u8>]) -> Envelope {
    let mut template = return_code.to_be_bytes().to_vec();
    template.extend((messages.len() as u16).to_be_bytes());
    let mut payload: Vec<u8> = outputs.iter().flat_map(|o| output_parameter(o)).collect();
    payload.extend(messages.concat());
    reply(REPLY_CALL, template, payload)
}

/// Command text of an execute request
pub fn command_text(request: &Envelope) -> String {
    let codec = lookup(CCSID_037).unwrap();
    if let Some(data) = request.find_code_point(CP_COMMAND_CCSID).unwrap() {
        assert_eq!(decode_u32(data, 0).unwrap(), 37);
        return codec.decode(&data[4..]).unwrap();
    }
    let data = request.find_code_point(CP_COMMAND).unwrap().expect("command text");
    codec.decode(data).unwrap()
}

/// One parameter of a call request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentParameter {
    pub max_length: u32,
    pub usage: u16,
    pub input: Vec<u8>,
}

impl SentParameter {
    pub fn int(&self) -> i32 {
        decode_int(&self.input, 0).unwrap()
    }
}

/// (library, program) of a call request
pub fn called_program(request: &Envelope) -> (String, String) {
    let codec = lookup(CCSID_037).unwrap();
    (
        decode_fixed_text(&request.template, 10, 10, codec).unwrap(),
        decode_fixed_text(&request.template, 0, 10, codec).unwrap(),
    )
}

pub fn sent_parameters(request: &Envelope) -> Vec<SentParameter> {
    let count = decode_u16(&request.template, 21).unwrap() as usize;
    let payload = &request.payload;
    let mut position = 0;
    let mut parameters = Vec::with_capacity(count);
    for _ in 0..count {
        let length = decode_u32(payload, position).unwrap() as usize;
        assert_eq!(decode_u16(payload, position + 4).unwrap(), CP_PARAMETER);
        parameters.push(SentParameter {
            max_length: decode_u32(payload, position + 6).unwrap(),
            usage: decode_u16(payload, position + 10).unwrap(),
            input: payload[position + 12..position + length].to_vec(),
        });
        position += length;
    }
    assert_eq!(position, payload.len());
    assert_eq!(HEADER_LENGTH + request.template.len() + payload.len(), request.length());
    parameters
}

/// Counters kept by [`FakeListServer`]
#[derive(Debug, Default, Clone)]
pub struct ListStats {
    pub opens: usize,
    /// (records requested, starting record) of every QGYGTLE call
    pub fetches: Vec<(i32, i32)>,
    pub closes: usize,
}

/// Serves QGYOLOBJ / QGYGTLE / QGYCLST over a fixed set of records.
pub struct FakeListServer {
    pub records: Vec<Vec<u8>>,
    pub record_length: usize,
    /// Largest number of records returned by one fetch
    pub max_per_fetch: usize,
    /// Zero-based fetch (after the initial wait) that fails
    pub fail_fetch: Option<usize>,
    /// Return no records from this starting record on
    pub stall_from: Option<i32>,
    pub build_status: char,
    pub stats: Arc<Mutex<ListStats>>,
}

pub const HANDLE: [u8; 4] = [0, 0, 0, 42];

impl FakeListServer {
    pub fn new(records: Vec<Vec<u8>>, record_length: usize) -> Self {
        Self {
            records,
            record_length,
            max_per_fetch: usize::MAX,
            fail_fetch: None,
            stall_from: None,
            build_status: '2',
            stats: Arc::new(Mutex::new(ListStats::default())),
        }
    }

    fn list_information(&self, returned: usize, first_record: i32) -> Vec<u8> {
        let codec = lookup(CCSID_037).unwrap();
        let mut info = Vec::with_capacity(80);
        info.extend((self.records.len() as i32).to_be_bytes());
        info.extend((returned as i32).to_be_bytes());
        info.extend(HANDLE);
        info.extend((self.record_length as i32).to_be_bytes());
        info.extend(codec.encode("C1240101120000").unwrap());
        info.extend(codec.encode(&self.build_status.to_string()).unwrap());
        info.push(0);
        info.extend(80i32.to_be_bytes());
        info.extend(first_record.to_be_bytes());
        info.resize(80, 0);
        info
    }

    fn handle(&mut self, request: &Envelope) -> Envelope {
        let (library, program) = called_program(request);
        assert_eq!(library, "QGY");
        let parameters = sent_parameters(request);
        match program.as_str() {
            "QGYOLOBJ" => {
                assert_eq!(parameters.len(), 12);
                self.stats.lock().unwrap().opens += 1;
                call_reply(0, &[vec![0; 8], self.list_information(0, 0), vec![0; 4]], &[])
            }
            "QGYGTLE" => {
                assert_eq!(parameters[2].input, HANDLE);
                let requested = parameters[4].int();
                let start = parameters[5].int();
                let fetch_index = {
                    let mut stats = self.stats.lock().unwrap();
                    stats.fetches.push((requested, start));
                    stats.fetches.len() - 1
                };
                if self.fail_fetch.map(|n| n + 1) == Some(fetch_index) {
                    return call_reply(0x0500, &[], &[classic_message("CPF3C4D", 40, "Length not valid.")]);
                }
                let stalled = self.stall_from.map_or(false, |from| start >= from);
                let returned = if start < 1 || stalled {
                    0
                } else {
                    let remaining = self.records.len().saturating_sub(start as usize - 1);
                    (requested.max(0) as usize).min(self.max_per_fetch).min(remaining)
                };
                let data: Vec<u8> = if returned == 0 {
                    Vec::new()
                } else {
                    let first = start as usize - 1;
                    self.records[first..first + returned].concat()
                };
                assert!(data.len() <= parameters[1].int() as usize);
                call_reply(0, &[data, self.list_information(returned, start.max(0)), vec![0; 4]], &[])
            }
            "QGYCLST" => {
                assert_eq!(parameters[0].input, HANDLE);
                self.stats.lock().unwrap().closes += 1;
                call_reply(0, &[vec![0; 4]], &[])
            }
            other => panic!("unexpected program {other}"),
        }
    }

    pub fn into_handler(mut self) -> (Handler, Arc<Mutex<ListStats>>) {
        let stats = Arc::clone(&self.stats);
        (Box::new(move |request: &Envelope| self.handle(request)), stats)
    }
}
