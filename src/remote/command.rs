//! `execute` and `call` over a ready connection

use log::{debug, info};

use super::parameter::{ProgramCall, PARAMETER_HEADER_LENGTH};
use super::{
    message_option, CommandResult, CALL_TEMPLATE_LENGTH, CP_COMMAND, CP_COMMAND_CCSID, CP_PARAMETER,
    EXTENDED_LEVEL, RC_NO_MESSAGES, REPLY_CALL, REPLY_EXECUTE, REQ_CALL, REQ_EXECUTE,
};
use crate::codec::{decode_u16, decode_u32, encode_fixed_text, TextCodec};
use crate::connection::HostConnection;
use crate::envelope::{write_code_point, Envelope, HEADER_LENGTH};
use crate::error::{HostResult, ProtocolError};
use crate::remote::message::{decode_messages, HostMessage};

const NAME_WIDTH: usize = 10;

/// Return code and message count from the first four template bytes
fn reply_status(reply: &Envelope) -> HostResult<(u16, usize)> {
    Ok((reply.template_u16(0)?, reply.template_u16(2)? as usize))
}

impl HostConnection {
    /// Run a CL command.
    pub fn execute(&mut self, command: &str) -> HostResult<CommandResult> {
        let level = self.datastream_level();
        let codec = self.codec();
        let text = codec.encode(command)?;

        let mut payload = Vec::with_capacity(text.len() + 10);
        if level >= EXTENDED_LEVEL {
            let mut data = codec.ccsid().to_be_bytes().to_vec();
            data.extend_from_slice(&text);
            write_code_point(&mut payload, CP_COMMAND_CCSID, &data);
        } else {
            write_code_point(&mut payload, CP_COMMAND, &text);
        }

        debug!("execute {command}");
        let reply = self.exchange(REQ_EXECUTE, REPLY_EXECUTE, vec![message_option(level)], payload)?;
        let result = self.guard(parse_execute_reply(&reply, codec))?;
        info!(
            "command {} (rc 0x{:04X}, {} messages)",
            if result.succeeded() { "succeeded" } else { "failed" },
            result.return_code(),
            result.messages().len()
        );
        Ok(result)
    }

    /// Call a program. Output-capable parameters receive their data when the
    /// call succeeds and are cleared otherwise.
    pub fn call(&mut self, call: &mut ProgramCall) -> HostResult<CommandResult> {
        let level = self.datastream_level();
        let (template, payload) = encode_call(call, level, self.codec())?;

        for parameter in call.parameters_mut() {
            parameter.clear_output();
        }
        debug!("call {} with {} parameters", call.qualified_name(), call.parameters().len());
        let reply = self.exchange(REQ_CALL, REPLY_CALL, template, payload)?;
        let result = self.guard(parse_call_reply(&reply, call, self.codec()))?;
        info!(
            "call {} {} (rc 0x{:04X}, {} messages)",
            call.qualified_name(),
            if result.succeeded() { "succeeded" } else { "failed" },
            result.return_code(),
            result.messages().len()
        );
        Ok(result)
    }
}

fn parse_execute_reply(reply: &Envelope, codec: &dyn TextCodec) -> HostResult<CommandResult> {
    let (return_code, count) = reply_status(reply)?;
    Ok(match return_code {
        0 => CommandResult::new(true, 0, reply_messages(reply, 0, count, codec)?),
        RC_NO_MESSAGES => CommandResult::new(true, return_code, Vec::new()),
        _ => CommandResult::new(false, return_code, reply_messages(reply, 0, count, codec)?),
    })
}

fn parse_call_reply(reply: &Envelope, call: &mut ProgramCall, codec: &dyn TextCodec) -> HostResult<CommandResult> {
    let (return_code, count) = reply_status(reply)?;
    Ok(match return_code {
        0 => {
            let consumed = read_outputs(reply, call)?;
            CommandResult::new(true, 0, reply_messages(reply, consumed, count, codec)?)
        }
        RC_NO_MESSAGES => {
            read_outputs(reply, call)?;
            CommandResult::new(true, return_code, Vec::new())
        }
        _ => CommandResult::new(false, return_code, reply_messages(reply, 0, count, codec)?),
    })
}

/// Decode `count` messages starting `skip` bytes into the payload.
fn reply_messages(reply: &Envelope, skip: usize, count: usize, codec: &dyn TextCodec) -> HostResult<Vec<HostMessage>> {
    let base = HEADER_LENGTH + reply.template.len() + skip;
    decode_messages(&reply.payload[skip..], count, codec, base)
}

/// Build the call template and parameter sub-envelopes.
fn encode_call(call: &ProgramCall, level: u16, codec: &dyn TextCodec) -> HostResult<(Vec<u8>, Vec<u8>)> {
    for (what, name) in [("program", call.program()), ("library", call.library())] {
        if name.is_empty() || name.chars().count() > NAME_WIDTH {
            return Err(ProtocolError::UnsupportedParameter {
                reason: format!("{what} name '{name}' must be 1 to {NAME_WIDTH} characters"),
            }
            .into());
        }
    }
    let count = u16::try_from(call.parameters().len()).map_err(|_| ProtocolError::UnsupportedParameter {
        reason: format!("{} parameters exceed the protocol limit", call.parameters().len()),
    })?;

    let mut template = Vec::with_capacity(CALL_TEMPLATE_LENGTH);
    template.extend(encode_fixed_text(&call.program().to_uppercase(), NAME_WIDTH, codec)?);
    template.extend(encode_fixed_text(&call.library().to_uppercase(), NAME_WIDTH, codec)?);
    template.push(message_option(level));
    template.extend_from_slice(&count.to_be_bytes());

    let mut payload = Vec::with_capacity(call.request_length() - HEADER_LENGTH - CALL_TEMPLATE_LENGTH);
    for parameter in call.parameters() {
        let input = parameter.input_bytes();
        payload.extend_from_slice(&((PARAMETER_HEADER_LENGTH + input.len()) as u32).to_be_bytes());
        payload.extend_from_slice(&CP_PARAMETER.to_be_bytes());
        payload.extend_from_slice(&parameter.max_length().to_be_bytes());
        payload.extend_from_slice(&parameter.usage(level)?.to_be_bytes());
        payload.extend_from_slice(input);
    }
    Ok((template, payload))
}

/// Attach output data to each output-capable parameter, in order. Returns
/// the number of payload bytes consumed.
fn read_outputs(reply: &Envelope, call: &mut ProgramCall) -> HostResult<usize> {
    let payload = &reply.payload;
    let base = HEADER_LENGTH + reply.template.len();
    let mut position = 0;

    for parameter in call.parameters_mut().iter_mut().filter(|p| p.is_output()) {
        let short = |needed: usize| ProtocolError::ShortReply {
            expected: base + needed,
            received: base + payload.len(),
        };
        if payload.len() < position + PARAMETER_HEADER_LENGTH {
            return Err(short(position + PARAMETER_HEADER_LENGTH).into());
        }
        let length = decode_u32(payload, position)? as usize;
        let code_point = decode_u16(payload, position + 4)?;
        if code_point != CP_PARAMETER {
            return Err(ProtocolError::UnknownCodePoint { code_point, offset: base + position }.into());
        }
        if length < PARAMETER_HEADER_LENGTH || payload.len() < position + length {
            return Err(short(position + length.max(PARAMETER_HEADER_LENGTH)).into());
        }
        let data_length = decode_u32(payload, position + 6)? as usize;
        let data_start = position + PARAMETER_HEADER_LENGTH;
        let data_end = data_start + data_length.min(length - PARAMETER_HEADER_LENGTH);
        parameter.set_output(payload[data_start..data_end].to_vec());
        position += length;
    }
    Ok(position)
}
