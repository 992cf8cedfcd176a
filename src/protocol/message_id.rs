use std::fmt;

/// Message ids known to the gateway.
///
/// Ids below `0x8000` travel terminal to platform, ids at or above `0x8000` travel platform
/// to terminal. The vendor (ULV) profile breaks that rule for streaming data (`0x9103`) and for
/// its `0xB0xx` replies, which are listed here explicitly so the dispatch table can route them.
///
/// Decoding goes through [`MessageId::from_u16`], so a numeric id maps to exactly one variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    // terminal -> platform
    TerminalGenericResponse,
    Heartbeat,
    Logout,
    Registration,
    Authentication,
    ParameterQueryResponse,
    LocationReport,
    LocationQueryResponse,
    BulkLocationUpload,
    MultimediaEventUpload,
    MultimediaDataUpload,
    StreamingResponse,
    ResourceListResponse,
    FileUploadCompleted,

    // platform -> terminal
    PlatformGenericResponse,
    RegistrationResponse,
    SetParameters,
    QueryParameters,
    TerminalControl,
    LocationQuery,
    MultimediaDataResponse,
    StreamingRequest,
    StreamingControl,
    ResourceQuery,
    FileUploadInstruction,
    FileUploadControl,

    // vendor profile
    StreamingData,
    VendorParameterQuery,
    VendorParameterResponse,
    VendorFileDiscovery,
    VendorFileDiscoveryResponse,
    VendorFileMetadata,
    VendorFileMetadataResponse,
    VendorFileAccess,
    VendorFileAccessResponse,
}

impl MessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        let id = match value {
            0x0001 => MessageId::TerminalGenericResponse,
            0x0002 => MessageId::Heartbeat,
            0x0003 => MessageId::Logout,
            0x0100 => MessageId::Registration,
            0x0102 => MessageId::Authentication,
            0x0104 => MessageId::ParameterQueryResponse,
            0x0200 => MessageId::LocationReport,
            0x0201 => MessageId::LocationQueryResponse,
            0x0704 => MessageId::BulkLocationUpload,
            0x0800 => MessageId::MultimediaEventUpload,
            0x0801 => MessageId::MultimediaDataUpload,
            0x1101 => MessageId::StreamingResponse,
            0x1205 => MessageId::ResourceListResponse,
            0x1206 => MessageId::FileUploadCompleted,
            0x8001 => MessageId::PlatformGenericResponse,
            0x8100 => MessageId::RegistrationResponse,
            0x8103 => MessageId::SetParameters,
            0x8104 => MessageId::QueryParameters,
            0x8105 => MessageId::TerminalControl,
            0x8201 => MessageId::LocationQuery,
            0x8800 => MessageId::MultimediaDataResponse,
            0x9101 => MessageId::StreamingRequest,
            0x9102 => MessageId::StreamingControl,
            0x9103 => MessageId::StreamingData,
            0x9205 => MessageId::ResourceQuery,
            0x9206 => MessageId::FileUploadInstruction,
            0x9207 => MessageId::FileUploadControl,
            0xB050 => MessageId::VendorParameterQuery,
            0xB051 => MessageId::VendorParameterResponse,
            0xB060 => MessageId::VendorFileDiscovery,
            0xB061 => MessageId::VendorFileDiscoveryResponse,
            0xB062 => MessageId::VendorFileMetadata,
            0xB063 => MessageId::VendorFileMetadataResponse,
            0xB064 => MessageId::VendorFileAccess,
            0xB065 => MessageId::VendorFileAccessResponse,
            _ => return None,
        };
        Some(id)
    }

    pub const fn as_u16(&self) -> u16 {
        match self {
            MessageId::TerminalGenericResponse => 0x0001,
            MessageId::Heartbeat => 0x0002,
            MessageId::Logout => 0x0003,
            MessageId::Registration => 0x0100,
            MessageId::Authentication => 0x0102,
            MessageId::ParameterQueryResponse => 0x0104,
            MessageId::LocationReport => 0x0200,
            MessageId::LocationQueryResponse => 0x0201,
            MessageId::BulkLocationUpload => 0x0704,
            MessageId::MultimediaEventUpload => 0x0800,
            MessageId::MultimediaDataUpload => 0x0801,
            MessageId::StreamingResponse => 0x1101,
            MessageId::ResourceListResponse => 0x1205,
            MessageId::FileUploadCompleted => 0x1206,
            MessageId::PlatformGenericResponse => 0x8001,
            MessageId::RegistrationResponse => 0x8100,
            MessageId::SetParameters => 0x8103,
            MessageId::QueryParameters => 0x8104,
            MessageId::TerminalControl => 0x8105,
            MessageId::LocationQuery => 0x8201,
            MessageId::MultimediaDataResponse => 0x8800,
            MessageId::StreamingRequest => 0x9101,
            MessageId::StreamingControl => 0x9102,
            MessageId::StreamingData => 0x9103,
            MessageId::ResourceQuery => 0x9205,
            MessageId::FileUploadInstruction => 0x9206,
            MessageId::FileUploadControl => 0x9207,
            MessageId::VendorParameterQuery => 0xB050,
            MessageId::VendorParameterResponse => 0xB051,
            MessageId::VendorFileDiscovery => 0xB060,
            MessageId::VendorFileDiscoveryResponse => 0xB061,
            MessageId::VendorFileMetadata => 0xB062,
            MessageId::VendorFileMetadataResponse => 0xB063,
            MessageId::VendorFileAccess => 0xB064,
            MessageId::VendorFileAccessResponse => 0xB065,
        }
    }

    /// True for ids in the platform-to-terminal half of the id space.
    pub const fn is_platform_originated(value: u16) -> bool {
        value >= 0x8000
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:04X})", self, self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_id_maps_back_to_itself() {
        for raw in 0u16..=0xFFFF {
            if let Some(id) = MessageId::from_u16(raw) {
                assert_eq!(id.as_u16(), raw);
            }
        }
    }

    #[test]
    fn test_unknown_ids() {
        assert_eq!(MessageId::from_u16(0x0F00), None);
        assert_eq!(MessageId::from_u16(0x8F00), None);
        assert!(MessageId::is_platform_originated(0x8001));
        assert!(!MessageId::is_platform_originated(0x0801));
    }
}
