//! Sign-on handshake
//!
//! Three exchanges take a fresh transport to a usable session:
//!
//! 1. exchange random seed (`0x7001`/`0xF001`): trade 8-byte seeds and learn
//!    the server password level;
//! 2. start server (`0x7002`/`0xF002`): present the credential, receive the
//!    authenticated user and the server job name;
//! 3. exchange attributes (`0x1001`/`0x8001`): agree on CCSID and datastream
//!    level.
//!
//! Each step is a plain function over the byte stream so the connection can
//! drive them in order and tests can drive them one at a time.

use std::fmt;
use std::io::{Read, Write};

use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::codec::{self, decode_u32, encode_fixed_text, lookup, TextCodec, CCSID_037};
use crate::envelope::{check_reply, write_code_point, Envelope, SERVER_REMOTE_COMMAND};
use crate::error::{AuthenticationError, HostResult, ProtocolError};

pub const REQ_EXCHANGE_SEED: u16 = 0x7001;
pub const REPLY_EXCHANGE_SEED: u16 = 0xF001;
pub const REQ_START_SERVER: u16 = 0x7002;
pub const REPLY_START_SERVER: u16 = 0xF002;
pub const REQ_EXCHANGE_ATTRIBUTES: u16 = 0x1001;
pub const REPLY_EXCHANGE_ATTRIBUTES: u16 = 0x8001;

pub const CP_SEED: u16 = 0x1103;
pub const CP_USER_ID: u16 = 0x1104;
pub const CP_PASSWORD: u16 = 0x1105;
pub const CP_PROFILE_TOKEN: u16 = 0x1115;
pub const CP_JOB_NAME: u16 = 0x111F;

/// Client attribute bits sent in the seed request header: SHA-1 capable
const CLIENT_ATTRIBUTES: u16 = 0x0100;
/// National language version requested during attribute exchange
pub const DEFAULT_NLV: &str = "2924";
const CLIENT_VERSION: u32 = 1;

/// Seeds and password level from the first exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub password_level: u8,
    pub server_seed: [u8; 8],
    pub client_seed: [u8; 8],
}

/// Authentication scheme byte of the start-server template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthScheme {
    DesPassword = 1,
    ProfileToken = 2,
    Sha1Password = 3,
}

/// What a credential provider hands to the start-server request
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationBytes {
    pub scheme: AuthScheme,
    pub bytes: Vec<u8>,
    /// Sent for password schemes only
    pub user_id: Option<String>,
}

impl fmt::Debug for AuthenticationBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationBytes")
            .field("scheme", &self.scheme)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of the opaque bytes presented at start server.
pub trait CredentialProvider {
    fn authenticate(&self, challenge: &Challenge) -> Result<AuthenticationBytes, AuthenticationError>;
}

/// User profile and password
#[derive(Clone)]
pub struct PasswordCredential {
    user: String,
    password: String,
}

impl PasswordCredential {
    pub fn new<U: Into<String>, P: Into<String>>(user: U, password: P) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

impl CredentialProvider for PasswordCredential {
    fn authenticate(&self, challenge: &Challenge) -> Result<AuthenticationBytes, AuthenticationError> {
        if self.user.is_empty() || self.user.chars().count() > 10 {
            return Err(AuthenticationError::InvalidCredential {
                reason: "user profile must be 1 to 10 characters".to_string(),
            });
        }
        if self.password.is_empty() {
            return Err(AuthenticationError::InvalidCredential { reason: "password is empty".to_string() });
        }
        match challenge.password_level {
            0 | 1 => Err(AuthenticationError::UnsupportedPasswordLevel { level: challenge.password_level }),
            _ => Ok(AuthenticationBytes {
                scheme: AuthScheme::Sha1Password,
                bytes: password_substitute(
                    &self.user,
                    &self.password,
                    &challenge.server_seed,
                    &challenge.client_seed,
                )
                .to_vec(),
                user_id: Some(self.user.to_uppercase()),
            }),
        }
    }
}

/// Pre-issued profile token, passed through unchanged
#[derive(Clone)]
pub struct ProfileTokenCredential {
    token: Vec<u8>,
}

impl ProfileTokenCredential {
    pub fn new(token: Vec<u8>) -> Self {
        Self { token }
    }
}

impl fmt::Debug for ProfileTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileTokenCredential(<{} bytes>)", self.token.len())
    }
}

impl CredentialProvider for ProfileTokenCredential {
    fn authenticate(&self, _challenge: &Challenge) -> Result<AuthenticationBytes, AuthenticationError> {
        if self.token.is_empty() {
            return Err(AuthenticationError::InvalidCredential { reason: "profile token is empty".to_string() });
        }
        Ok(AuthenticationBytes { scheme: AuthScheme::ProfileToken, bytes: self.token.clone(), user_id: None })
    }
}

fn utf16_be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

/// SHA-1 password substitute for password levels 2 to 4.
pub fn password_substitute(
    user: &str,
    password: &str,
    server_seed: &[u8; 8],
    client_seed: &[u8; 8],
) -> [u8; 20] {
    let user_id = utf16_be(&format!("{:<10}", user.to_uppercase()));

    let mut hasher = Sha1::new();
    hasher.update(&user_id);
    hasher.update(utf16_be(password));
    let token = hasher.finalize();

    let mut hasher = Sha1::new();
    hasher.update(token);
    hasher.update(server_seed);
    hasher.update(client_seed);
    hasher.update(&user_id);
    hasher.update([0, 0, 0, 0, 0, 0, 0, 1]);
    hasher.finalize().into()
}

/// Reason text for known sign-on return codes
pub fn describe_return_code(return_code: u32) -> &'static str {
    match return_code {
        0x0001_0001 => "request data error",
        0x0002_0001 => "user ID unknown",
        0x0002_0002 => "user ID disabled",
        0x0002_0003 => "user ID does not match the authentication token",
        0x0003_000B => "password incorrect",
        0x0003_000C => "password incorrect, profile will be disabled on the next failure",
        0x0003_000D => "password expired",
        0x0003_000E => "pre-V2R2 encrypted password",
        0x0003_0010 => "password is *NONE",
        0x0004_0000 => "general security error",
        0x0006_0000 => "profile token not valid",
        0x0006_0001 => "profile token expired",
        _ => "unknown return code",
    }
}

fn rejected(stage: &str, return_code: u32) -> AuthenticationError {
    AuthenticationError::Rejected {
        stage: stage.to_string(),
        return_code,
        reason: describe_return_code(return_code).to_string(),
    }
}

fn round_trip<S: Read + Write + ?Sized>(
    stream: &mut S,
    mut request: Envelope,
    expected_reply: u16,
    correlation: u32,
    max_length: usize,
) -> HostResult<Envelope> {
    request.correlation = correlation;
    request.write_to(stream)?;
    let reply = Envelope::read_from(stream, max_length)?;
    check_reply(&reply, request.server_id, expected_reply, correlation)?;
    Ok(reply)
}

/// Step 1: trade seeds and learn the password level.
pub fn exchange_random_seed<S: Read + Write + ?Sized>(
    stream: &mut S,
    client_seed: [u8; 8],
    correlation: u32,
    max_length: usize,
) -> HostResult<Challenge> {
    let mut request = Envelope::new(SERVER_REMOTE_COMMAND, REQ_EXCHANGE_SEED, client_seed.to_vec(), Vec::new());
    request.header_id = CLIENT_ATTRIBUTES;
    let reply = round_trip(stream, request, REPLY_EXCHANGE_SEED, correlation, max_length)?;

    let return_code = reply.template_u32(0)?;
    if return_code != 0 {
        return Err(rejected("exchange random seed", return_code).into());
    }
    let seed = reply.find_code_point(CP_SEED)?.ok_or_else(|| ProtocolError::MissingField {
        code_point: CP_SEED,
        context: "exchange random seed reply".to_string(),
    })?;
    let server_seed: [u8; 8] = seed.try_into().map_err(|_| ProtocolError::ShortReply {
        expected: 8,
        received: seed.len(),
    })?;

    let challenge = Challenge { password_level: (reply.header_id >> 8) as u8, server_seed, client_seed };
    debug!("server password level {}", challenge.password_level);
    Ok(challenge)
}

/// Identity assigned by the server at start server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartServerReply {
    pub user: Option<String>,
    pub job_name: Option<String>,
}

/// Step 2: present the credential.
pub fn start_server<S: Read + Write + ?Sized>(
    stream: &mut S,
    auth: &AuthenticationBytes,
    correlation: u32,
    max_length: usize,
) -> HostResult<StartServerReply> {
    let ebcdic = lookup(CCSID_037)?;
    let mut payload = Vec::new();
    match auth.scheme {
        AuthScheme::ProfileToken => write_code_point(&mut payload, CP_PROFILE_TOKEN, &auth.bytes),
        AuthScheme::DesPassword | AuthScheme::Sha1Password => {
            write_code_point(&mut payload, CP_PASSWORD, &auth.bytes);
        }
    }
    if let Some(user) = &auth.user_id {
        write_code_point(&mut payload, CP_USER_ID, &encode_fixed_text(user, 10, ebcdic)?);
    }

    let template = vec![auth.scheme as u8, 1];
    let request = Envelope::new(SERVER_REMOTE_COMMAND, REQ_START_SERVER, template, payload);
    let reply = round_trip(stream, request, REPLY_START_SERVER, correlation, max_length)?;

    let return_code = reply.template_u32(0)?;
    if return_code != 0 {
        return Err(rejected("start server", return_code).into());
    }

    let mut result = StartServerReply::default();
    for field in reply.code_points() {
        let field = field?;
        match field.code_point {
            CP_USER_ID => result.user = Some(decode_ccsid_text(field.data)?),
            CP_JOB_NAME => result.job_name = Some(decode_ccsid_text(field.data)?),
            other => debug!("ignoring start server field 0x{other:04X}"),
        }
    }
    info!(
        "signed on as {} in job {}",
        result.user.as_deref().unwrap_or("?"),
        result.job_name.as_deref().unwrap_or("?")
    );
    Ok(result)
}

/// Text prefixed by its own 4-byte CCSID
fn decode_ccsid_text(data: &[u8]) -> HostResult<String> {
    let ccsid = decode_u32(data, 0)?;
    let codec: &dyn TextCodec = lookup(ccsid).unwrap_or_else(|_| codec::default_codec());
    Ok(codec.decode(&data[4..])?.trim_end().to_string())
}

/// Server side of the attribute exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAttributes {
    pub ccsid: u32,
    pub nlv: String,
    pub version: u32,
    pub datastream_level: u16,
}

/// Step 3: agree on CCSID and datastream level.
pub fn exchange_attributes<S: Read + Write + ?Sized>(
    stream: &mut S,
    client_ccsid: u32,
    datastream_level: u16,
    correlation: u32,
    max_length: usize,
) -> HostResult<ServerAttributes> {
    let ebcdic = lookup(CCSID_037)?;
    let mut template = Vec::with_capacity(14);
    template.extend_from_slice(&client_ccsid.to_be_bytes());
    template.extend_from_slice(&ebcdic.encode(DEFAULT_NLV)?);
    template.extend_from_slice(&CLIENT_VERSION.to_be_bytes());
    template.extend_from_slice(&datastream_level.to_be_bytes());

    let request = Envelope::new(SERVER_REMOTE_COMMAND, REQ_EXCHANGE_ATTRIBUTES, template, Vec::new());
    let reply = round_trip(stream, request, REPLY_EXCHANGE_ATTRIBUTES, correlation, max_length)?;

    let return_code = reply.template_u16(0)?;
    if return_code != 0 {
        return Err(rejected("exchange attributes", u32::from(return_code)).into());
    }
    let nlv = codec::field(&reply.template, 6, 4).map_err(|_| ProtocolError::ShortReply {
        expected: 30,
        received: 20 + reply.template.len(),
    })?;
    let attributes = ServerAttributes {
        ccsid: reply.template_u32(2)?,
        nlv: ebcdic.decode(nlv)?,
        version: reply.template_u32(10)?,
        datastream_level: reply.template_u16(14)?,
    };
    debug!("server attributes {attributes:?}");
    Ok(attributes)
}
