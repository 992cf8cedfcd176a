use bytes::{BufMut, BytesMut};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::protocol::bcd::encode_bcd_time;
use crate::protocol::terminal::{GenericResult, Parameter, RegistrationResult};
use crate::protocol::MessageId;
use crate::session::StreamingOptions;
use crate::{AppError, AppResult};

/// Terminal control command word that makes the terminal restart.
pub const RESTART_COMMAND: u8 = 0x74;
/// Parameter id of the heartbeat interval, in seconds.
pub const HEARTBEAT_PARAMETER_ID: u32 = 0x0001;

/// `0x9102` control commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamControl {
    Close = 0,
    SwitchStream = 1,
    Pause = 2,
    Resume = 3,
    CloseTalk = 4,
}

/// `0x9207` control commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadControl {
    Pause = 0,
    Resume = 1,
    Cancel = 2,
}

/// Filter of a `0x9205` resource list query. Missing times are sent as all zero BCD, meaning
/// "no bound".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceQuery {
    pub channel: u8,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub alarm_flags: u64,
    /// 0 audio+video, 1 audio, 2 video, 3 audio or video
    pub resource_type: u8,
    /// 0 any, 1 main, 2 sub
    pub stream_type: u8,
    /// 0 any, 1 main storage, 2 backup storage
    pub storage_type: u8,
}

/// `0x9206`: ask the terminal to push recorded files to an FTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadInstruction {
    pub server_ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub path: String,
    pub channel: u8,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub alarm_flags: u64,
    pub resource_type: u8,
    pub stream_type: u8,
    pub storage_location: u8,
    /// bit0 wifi, bit1 lan, bit2 3g/4g
    pub conditions: u8,
}

/// Every message the platform can send to a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCommand {
    GenericResponse {
        reply_serial: u16,
        reply_id: u16,
        result: GenericResult,
    },
    RegistrationResponse {
        reply_serial: u16,
        result: RegistrationResult,
        /// Only sent on success.
        auth_code: Option<String>,
    },
    SetParameters(Vec<Parameter>),
    QueryParameters,
    TerminalControl {
        command: u8,
        /// `;` separated argument list, when the command word takes one
        arguments: Option<String>,
    },
    LocationQuery,
    MultimediaDataResponse {
        data_id: u32,
        missing: Vec<u16>,
    },
    StreamingRequest(StreamingOptions),
    StreamingControl {
        channel: u8,
        control: StreamControl,
        /// 0 audio+video, 1 audio only, 2 video only
        close_type: u8,
        /// 0 main stream, 1 sub stream
        switch_stream: u8,
    },
    ResourceQuery(ResourceQuery),
    FileUploadInstruction(FileUploadInstruction),
    FileUploadControl {
        reply_serial: u16,
        control: UploadControl,
    },
    VendorParameterQuery(Vec<u32>),
    VendorFileDiscovery {
        channel: u8,
        start_time: Option<NaiveDateTime>,
        end_time: Option<NaiveDateTime>,
    },
    VendorFileMetadata {
        file_name: String,
    },
    VendorFileAccess {
        file_name: String,
        offset: u32,
        length: u32,
    },
}

impl PlatformCommand {
    pub fn restart() -> Self {
        PlatformCommand::TerminalControl {
            command: RESTART_COMMAND,
            arguments: None,
        }
    }

    /// The heartbeat instruction: a parameter set carrying only the heartbeat interval.
    pub fn heartbeat_interval(secs: u32) -> Self {
        PlatformCommand::SetParameters(vec![Parameter::u32(HEARTBEAT_PARAMETER_ID, secs)])
    }

    pub fn ack(reply_serial: u16, reply_id: u16, result: GenericResult) -> Self {
        PlatformCommand::GenericResponse {
            reply_serial,
            reply_id,
            result,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            PlatformCommand::GenericResponse { .. } => MessageId::PlatformGenericResponse,
            PlatformCommand::RegistrationResponse { .. } => MessageId::RegistrationResponse,
            PlatformCommand::SetParameters(_) => MessageId::SetParameters,
            PlatformCommand::QueryParameters => MessageId::QueryParameters,
            PlatformCommand::TerminalControl { .. } => MessageId::TerminalControl,
            PlatformCommand::LocationQuery => MessageId::LocationQuery,
            PlatformCommand::MultimediaDataResponse { .. } => MessageId::MultimediaDataResponse,
            PlatformCommand::StreamingRequest(_) => MessageId::StreamingRequest,
            PlatformCommand::StreamingControl { .. } => MessageId::StreamingControl,
            PlatformCommand::ResourceQuery(_) => MessageId::ResourceQuery,
            PlatformCommand::FileUploadInstruction(_) => MessageId::FileUploadInstruction,
            PlatformCommand::FileUploadControl { .. } => MessageId::FileUploadControl,
            PlatformCommand::VendorParameterQuery(_) => MessageId::VendorParameterQuery,
            PlatformCommand::VendorFileDiscovery { .. } => MessageId::VendorFileDiscovery,
            PlatformCommand::VendorFileMetadata { .. } => MessageId::VendorFileMetadata,
            PlatformCommand::VendorFileAccess { .. } => MessageId::VendorFileAccess,
        }
    }

    /// Writes the message body. The caller derives the body length from what was written.
    pub fn write_body(&self, buf: &mut BytesMut) -> AppResult<()> {
        match self {
            PlatformCommand::GenericResponse {
                reply_serial,
                reply_id,
                result,
            } => {
                buf.put_u16(*reply_serial);
                buf.put_u16(*reply_id);
                buf.put_u8(*result as u8);
            }
            PlatformCommand::RegistrationResponse {
                reply_serial,
                result,
                auth_code,
            } => {
                buf.put_u16(*reply_serial);
                buf.put_u8(*result as u8);
                if let (RegistrationResult::Success, Some(code)) = (result, auth_code) {
                    buf.put_slice(code.as_bytes());
                }
            }
            PlatformCommand::SetParameters(parameters) => {
                let count = u8::try_from(parameters.len()).map_err(|_| {
                    AppError::InvalidValue(format!("{} parameters in one message", parameters.len()))
                })?;
                buf.put_u8(count);
                for parameter in parameters {
                    let len = u8::try_from(parameter.value.len()).map_err(|_| {
                        AppError::InvalidValue(format!(
                            "parameter 0x{:04X} value of {} bytes",
                            parameter.id,
                            parameter.value.len()
                        ))
                    })?;
                    buf.put_u32(parameter.id);
                    buf.put_u8(len);
                    buf.put_slice(&parameter.value);
                }
            }
            PlatformCommand::QueryParameters | PlatformCommand::LocationQuery => {}
            PlatformCommand::TerminalControl { command, arguments } => {
                buf.put_u8(*command);
                if let Some(arguments) = arguments {
                    buf.put_slice(arguments.as_bytes());
                }
            }
            PlatformCommand::MultimediaDataResponse { data_id, missing } => {
                let count = u8::try_from(missing.len()).map_err(|_| {
                    AppError::InvalidValue(format!("{} packets to retransmit", missing.len()))
                })?;
                buf.put_u32(*data_id);
                buf.put_u8(count);
                for index in missing {
                    buf.put_u16(*index);
                }
            }
            PlatformCommand::StreamingRequest(options) => {
                put_short_str(buf, &options.server_ip)?;
                buf.put_u16(options.tcp_port);
                buf.put_u16(options.udp_port);
                buf.put_u8(options.channel);
                buf.put_u8(options.data_type);
                buf.put_u8(options.stream_type);
            }
            PlatformCommand::StreamingControl {
                channel,
                control,
                close_type,
                switch_stream,
            } => {
                buf.put_u8(*channel);
                buf.put_u8(*control as u8);
                buf.put_u8(*close_type);
                buf.put_u8(*switch_stream);
            }
            PlatformCommand::ResourceQuery(query) => {
                buf.put_u8(query.channel);
                put_bcd_time(buf, query.start_time.as_ref());
                put_bcd_time(buf, query.end_time.as_ref());
                buf.put_u64(query.alarm_flags);
                buf.put_u8(query.resource_type);
                buf.put_u8(query.stream_type);
                buf.put_u8(query.storage_type);
            }
            PlatformCommand::FileUploadInstruction(upload) => {
                put_short_str(buf, &upload.server_ip)?;
                buf.put_u16(upload.port);
                put_short_str(buf, &upload.user)?;
                put_short_str(buf, &upload.password)?;
                put_short_str(buf, &upload.path)?;
                buf.put_u8(upload.channel);
                put_bcd_time(buf, upload.start_time.as_ref());
                put_bcd_time(buf, upload.end_time.as_ref());
                buf.put_u64(upload.alarm_flags);
                buf.put_u8(upload.resource_type);
                buf.put_u8(upload.stream_type);
                buf.put_u8(upload.storage_location);
                buf.put_u8(upload.conditions);
            }
            PlatformCommand::FileUploadControl {
                reply_serial,
                control,
            } => {
                buf.put_u16(*reply_serial);
                buf.put_u8(*control as u8);
            }
            PlatformCommand::VendorParameterQuery(ids) => {
                let count = u8::try_from(ids.len()).map_err(|_| {
                    AppError::InvalidValue(format!("{} vendor parameter ids", ids.len()))
                })?;
                buf.put_u8(count);
                for id in ids {
                    buf.put_u32(*id);
                }
            }
            PlatformCommand::VendorFileDiscovery {
                channel,
                start_time,
                end_time,
            } => {
                buf.put_u8(*channel);
                put_bcd_time(buf, start_time.as_ref());
                put_bcd_time(buf, end_time.as_ref());
            }
            PlatformCommand::VendorFileMetadata { file_name } => {
                put_short_str(buf, file_name)?;
            }
            PlatformCommand::VendorFileAccess {
                file_name,
                offset,
                length,
            } => {
                put_short_str(buf, file_name)?;
                buf.put_u32(*offset);
                buf.put_u32(*length);
            }
        }
        Ok(())
    }
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> AppResult<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| AppError::InvalidValue(format!("string of {} bytes", value.len())))?;
    buf.put_u8(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_bcd_time(buf: &mut BytesMut, time: Option<&NaiveDateTime>) {
    match time {
        Some(time) => buf.put_slice(&encode_bcd_time(time)),
        None => buf.put_bytes(0, 6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(command: &PlatformCommand) -> Vec<u8> {
        let mut buf = BytesMut::new();
        command.write_body(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_restart_body() {
        let restart = PlatformCommand::restart();
        assert_eq!(restart.message_id(), MessageId::TerminalControl);
        assert_eq!(body(&restart), vec![0x74]);
    }

    #[test]
    fn test_set_parameters_body() {
        let command = PlatformCommand::SetParameters(vec![
            Parameter::u32(0x0001, 30),
            Parameter::text(0x0013, "10.0.0.1"),
        ]);
        let mut expected = vec![2, 0, 0, 0, 1, 4, 0, 0, 0, 30, 0, 0, 0, 0x13, 8];
        expected.extend_from_slice(b"10.0.0.1");
        assert_eq!(body(&command), expected);
    }

    #[test]
    fn test_oversized_parameter_value_is_rejected() {
        let command = PlatformCommand::SetParameters(vec![Parameter::text(0x0083, &"x".repeat(300))]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            command.write_body(&mut buf),
            Err(AppError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_registration_response_carries_auth_code_only_on_success() {
        let ok = PlatformCommand::RegistrationResponse {
            reply_serial: 7,
            result: RegistrationResult::Success,
            auth_code: Some("T1".into()),
        };
        assert_eq!(body(&ok), vec![0, 7, 0, b'T', b'1']);
        let refused = PlatformCommand::RegistrationResponse {
            reply_serial: 7,
            result: RegistrationResult::MessageError,
            auth_code: Some("T1".into()),
        };
        assert_eq!(body(&refused), vec![0, 7, 2]);
    }

    #[test]
    fn test_streaming_request_body() {
        let command = PlatformCommand::StreamingRequest(StreamingOptions {
            server_ip: "1.2.3.4".into(),
            tcp_port: 1078,
            udp_port: 0,
            channel: 1,
            data_type: 0,
            stream_type: 1,
        });
        let mut expected = vec![7];
        expected.extend_from_slice(b"1.2.3.4");
        expected.extend_from_slice(&[0x04, 0x36, 0, 0, 1, 0, 1]);
        assert_eq!(body(&command), expected);
    }

    #[test]
    fn test_multimedia_response_body() {
        let done = PlatformCommand::MultimediaDataResponse {
            data_id: 5,
            missing: vec![],
        };
        assert_eq!(body(&done), vec![0, 0, 0, 5, 0]);
        let retry = PlatformCommand::MultimediaDataResponse {
            data_id: 5,
            missing: vec![2, 4],
        };
        assert_eq!(body(&retry), vec![0, 0, 0, 5, 2, 0, 2, 0, 4]);
    }

    #[test]
    fn test_resource_query_without_bounds() {
        let command = PlatformCommand::ResourceQuery(ResourceQuery {
            channel: 1,
            ..Default::default()
        });
        let body = body(&command);
        assert_eq!(body.len(), 1 + 6 + 6 + 8 + 3);
        assert!(body[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_stream_control_body() {
        let command = PlatformCommand::StreamingControl {
            channel: 2,
            control: StreamControl::Pause,
            close_type: 0,
            switch_stream: 0,
        };
        assert_eq!(body(&command), vec![2, 2, 0, 0]);
    }
}
