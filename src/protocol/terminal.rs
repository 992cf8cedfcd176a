//! Bodies of the terminal lifecycle messages: registration, authentication, generic responses
//! and parameter lists.

use bytes::{BufMut, Bytes, BytesMut};

use super::reader::BodyReader;
use super::ParseError;

/// Fixed part of a 2019 registration body: province, city, manufacturer(11), model(30),
/// terminal id(30), plate color. The plate number follows.
pub const REGISTRATION_MIN_LEN: usize = 76;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub province_id: u16,
    pub city_id: u16,
    pub manufacturer_id: String,
    pub terminal_model: String,
    pub terminal_id: String,
    pub plate_color: u8,
    pub plate_number: String,
}

impl RegistrationRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        if body.len() < REGISTRATION_MIN_LEN {
            return Err(ParseError::TooShort {
                needed: REGISTRATION_MIN_LEN,
                available: body.len(),
            });
        }
        let mut reader = BodyReader::new(body);
        Ok(RegistrationRequest {
            province_id: reader.u16()?,
            city_id: reader.u16()?,
            manufacturer_id: reader.fixed_str(11)?,
            terminal_model: reader.fixed_str(30)?,
            terminal_id: reader.fixed_str(30)?,
            plate_color: reader.u8()?,
            plate_number: String::from_utf8_lossy(reader.rest())
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REGISTRATION_MIN_LEN + self.plate_number.len());
        buf.put_u16(self.province_id);
        buf.put_u16(self.city_id);
        put_fixed_str(&mut buf, &self.manufacturer_id, 11);
        put_fixed_str(&mut buf, &self.terminal_model, 30);
        put_fixed_str(&mut buf, &self.terminal_id, 30);
        buf.put_u8(self.plate_color);
        buf.put_slice(self.plate_number.as_bytes());
        buf.freeze()
    }
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let raw = value.as_bytes();
    let len = raw.len().min(width);
    buf.put_slice(&raw[..len]);
    buf.put_bytes(0, width - len);
}

/// Result codes carried by the registration response (`0x8100`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegistrationResult {
    Success = 0,
    VehicleAlreadyRegistered = 1,
    MessageError = 2,
    TerminalAlreadyRegistered = 3,
    TerminalNotAllowed = 4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    pub auth_code: String,
    pub imei: Option<String>,
    pub software_version: Option<String>,
}

impl AuthenticationRequest {
    /// Length prefixed auth code; the 2019 profile appends IMEI(15) and software version(20).
    /// Bodies without a plausible length prefix are read as a bare auth code.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        if body.is_empty() {
            return Err(ParseError::Malformed("empty authentication body".into()));
        }
        let mut reader = BodyReader::new(body);
        let declared = body[0] as usize;
        if declared == 0 || declared + 1 > body.len() {
            let auth_code = reader.fixed_str(body.len())?;
            return Ok(AuthenticationRequest {
                auth_code,
                imei: None,
                software_version: None,
            });
        }
        let auth_code = reader.short_str()?;
        let imei = if reader.remaining() >= 15 {
            Some(reader.fixed_str(15)?)
        } else {
            None
        };
        let software_version = if reader.remaining() >= 20 {
            Some(reader.fixed_str(20)?)
        } else {
            None
        };
        Ok(AuthenticationRequest {
            auth_code,
            imei,
            software_version,
        })
    }
}

/// Result codes of generic responses in both directions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GenericResult {
    Success = 0,
    Failure = 1,
    MessageError = 2,
    Unsupported = 3,
    AlarmConfirmed = 4,
}

impl GenericResult {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => GenericResult::Success,
            2 => GenericResult::MessageError,
            3 => GenericResult::Unsupported,
            4 => GenericResult::AlarmConfirmed,
            _ => GenericResult::Failure,
        }
    }
}

/// Standard layout of a terminal generic response (`0x0001`): reply serial, reply id, result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GenericResponse {
    pub reply_serial: u16,
    pub reply_id: u16,
    pub result: u8,
}

impl GenericResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        Ok(GenericResponse {
            reply_serial: reader.u16()?,
            reply_id: reader.u16()?,
            result: reader.u8()?,
        })
    }

    /// Finds the result byte that follows the first occurrence of `request_id` in `body`.
    ///
    /// Some terminals do not place the reply id at a fixed offset, so the body is scanned for the
    /// id's big endian byte pattern instead.
    pub fn scan_result_for(body: &[u8], request_id: u16) -> Option<u8> {
        let pattern = request_id.to_be_bytes();
        body.windows(3)
            .find(|window| window[..2] == pattern)
            .map(|window| window[2])
    }
}

/// One `{id:u32, len:u8, value}` parameter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: u32,
    pub value: Bytes,
}

impl Parameter {
    pub fn u32(id: u32, value: u32) -> Self {
        Parameter {
            id,
            value: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn text(id: u32, value: &str) -> Self {
        Parameter {
            id,
            value: Bytes::copy_from_slice(value.as_bytes()),
        }
    }
}

/// Count prefixed parameter list, used by parameter set commands and query responses.
pub fn parse_parameters(reader: &mut BodyReader<'_>) -> Result<Vec<Parameter>, ParseError> {
    let count = reader.u8()? as usize;
    let mut parameters = Vec::with_capacity(count);
    for _ in 0..count {
        let id = reader.u32()?;
        let len = reader.u8()? as usize;
        let value = Bytes::copy_from_slice(reader.bytes(len)?);
        parameters.push(Parameter { id, value });
    }
    Ok(parameters)
}

/// Parameter query response (`0x0104`): reply serial followed by the parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterQueryResponse {
    pub reply_serial: u16,
    pub parameters: Vec<Parameter>,
}

impl ParameterQueryResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let reply_serial = reader.u16()?;
        let parameters = parse_parameters(&mut reader)?;
        Ok(ParameterQueryResponse {
            reply_serial,
            parameters,
        })
    }
}
