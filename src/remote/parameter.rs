//! Program call parameters

use crate::error::{ProtocolError, ProtocolResult};

pub const USAGE_INPUT: u16 = 11;
pub const USAGE_OUTPUT: u16 = 12;
pub const USAGE_INPUT_OUTPUT: u16 = 13;
pub const USAGE_NULL: u16 = 255;

/// Lowest datastream level that accepts null parameters
pub const NULL_PARAMETER_LEVEL: u16 = 6;

/// Size of a parameter sub-envelope header: LL, CP, max length, usage
pub const PARAMETER_HEADER_LENGTH: usize = 12;

/// One positional argument of a program call. Output data is attached by
/// the call and only exists on the output-capable variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramParameter {
    Input(Vec<u8>),
    Output { max_length: u32, data: Option<Vec<u8>> },
    InputOutput { input: Vec<u8>, max_length: u32, data: Option<Vec<u8>> },
    Null,
}

impl ProgramParameter {
    pub fn input(bytes: Vec<u8>) -> Self {
        ProgramParameter::Input(bytes)
    }

    pub fn output(max_length: u32) -> Self {
        ProgramParameter::Output { max_length, data: None }
    }

    pub fn input_output(input: Vec<u8>, max_length: u32) -> Self {
        ProgramParameter::InputOutput { input, max_length, data: None }
    }

    pub fn null() -> Self {
        ProgramParameter::Null
    }

    /// Bytes sent with the request
    pub fn input_bytes(&self) -> &[u8] {
        match self {
            ProgramParameter::Input(bytes) | ProgramParameter::InputOutput { input: bytes, .. } => bytes,
            ProgramParameter::Output { .. } | ProgramParameter::Null => &[],
        }
    }

    /// Value of the max-length field. Input-output parameters never
    /// advertise less than their input.
    pub fn max_length(&self) -> u32 {
        match self {
            ProgramParameter::Input(bytes) => bytes.len() as u32,
            ProgramParameter::Output { max_length, .. } => *max_length,
            ProgramParameter::InputOutput { input, max_length, .. } => (*max_length).max(input.len() as u32),
            ProgramParameter::Null => 0,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ProgramParameter::Output { .. } | ProgramParameter::InputOutput { .. })
    }

    /// Usage code at `datastream_level`
    pub fn usage(&self, datastream_level: u16) -> ProtocolResult<u16> {
        Ok(match self {
            ProgramParameter::Input(_) => USAGE_INPUT,
            ProgramParameter::Output { .. } => USAGE_OUTPUT,
            ProgramParameter::InputOutput { .. } => USAGE_INPUT_OUTPUT,
            ProgramParameter::Null if datastream_level >= NULL_PARAMETER_LEVEL => USAGE_NULL,
            ProgramParameter::Null => {
                return Err(ProtocolError::UnsupportedParameter {
                    reason: format!(
                        "null parameters need datastream level {NULL_PARAMETER_LEVEL}, negotiated {datastream_level}"
                    ),
                })
            }
        })
    }

    /// Output returned by the last call
    pub fn output_data(&self) -> Option<&[u8]> {
        match self {
            ProgramParameter::Output { data, .. } | ProgramParameter::InputOutput { data, .. } => data.as_deref(),
            ProgramParameter::Input(_) | ProgramParameter::Null => None,
        }
    }

    pub(crate) fn set_output(&mut self, bytes: Vec<u8>) {
        if let ProgramParameter::Output { data, .. } | ProgramParameter::InputOutput { data, .. } = self {
            *data = Some(bytes);
        }
    }

    pub(crate) fn clear_output(&mut self) {
        if let ProgramParameter::Output { data, .. } | ProgramParameter::InputOutput { data, .. } = self {
            *data = None;
        }
    }
}

/// A program, its library and its ordered parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCall {
    library: String,
    program: String,
    parameters: Vec<ProgramParameter>,
}

impl ProgramCall {
    pub fn new<L: Into<String>, P: Into<String>>(library: L, program: P) -> Self {
        Self { library: library.into(), program: program.into(), parameters: Vec::new() }
    }

    pub fn with_parameter(mut self, parameter: ProgramParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn push(&mut self, parameter: ProgramParameter) {
        self.parameters.push(parameter);
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `LIBRARY/PROGRAM`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.library, self.program)
    }

    pub fn parameters(&self) -> &[ProgramParameter] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<&ProgramParameter> {
        self.parameters.get(index)
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [ProgramParameter] {
        &mut self.parameters
    }

    /// Total request length: header, call template, and one sub-envelope
    /// plus input bytes per parameter.
    pub fn request_length(&self) -> usize {
        crate::envelope::HEADER_LENGTH
            + super::CALL_TEMPLATE_LENGTH
            + self
                .parameters
                .iter()
                .map(|p| PARAMETER_HEADER_LENGTH + p.input_bytes().len())
                .sum::<usize>()
    }
}
