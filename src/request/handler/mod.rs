mod lifecycle;
mod location;
mod multimedia;
mod report;
mod streaming;
mod terminal_response;

use crate::protocol::terminal::{AuthenticationRequest, RegistrationRequest};
use crate::protocol::{Message, MessageId};
use crate::session::TerminalSession;
use crate::AppResult;

use super::{DispatchOutcome, RequestContext};

pub type Handler = fn(
    &Message,
    &mut TerminalSession,
    &RequestContext<'_>,
    &mut DispatchOutcome,
) -> AppResult<()>;

/// A dispatch table entry.
#[derive(Clone, Copy)]
pub struct Route {
    pub handler: Handler,
    /// Dropped without a reply unless the connection is authenticated.
    pub requires_authentication: bool,
}

impl Route {
    const fn open(handler: Handler) -> Self {
        Route {
            handler,
            requires_authentication: false,
        }
    }

    const fn authenticated(handler: Handler) -> Self {
        Route {
            handler,
            requires_authentication: true,
        }
    }
}

/// Canonical id of `message` for this connection.
///
/// Terminals disagree on the handshake ids. Standard ones register with `0x0100` and
/// authenticate with `0x0102`; others register with `0x0001` and authenticate with `0x0100`.
/// The connection state and the body decide which one a frame is:
/// - `0x0001` from an unregistered terminal carrying a full registration body is a registration,
///   anything else is a generic response.
/// - `0x0100` from a registered terminal is an authentication, unless its body is a full
///   registration that does not start with the issued auth code.
pub fn resolve(message: &Message, session: &TerminalSession) -> Option<MessageId> {
    let id = message.id()?;
    let resolved = match id {
        MessageId::TerminalGenericResponse
            if !session.is_registered() && RegistrationRequest::parse(&message.body).is_ok() =>
        {
            MessageId::Registration
        }
        MessageId::Registration if session.is_registered() => {
            let presents_auth_code = AuthenticationRequest::parse(&message.body)
                .map(|auth| session.auth_code.as_deref() == Some(auth.auth_code.as_str()))
                .unwrap_or(false);
            if !presents_auth_code && RegistrationRequest::parse(&message.body).is_ok() {
                MessageId::Registration
            } else {
                MessageId::Authentication
            }
        }
        id => id,
    };
    Some(resolved)
}

/// The dispatch table. Platform-to-terminal ids have no route unless a terminal sends them:
/// the vendor profile uses a few, and conformant terminals answer stream requests with `0x8001`.
pub fn route(id: MessageId) -> Option<Route> {
    let route = match id {
        MessageId::Registration => Route::open(lifecycle::handle_registration),
        MessageId::Authentication => Route::open(lifecycle::handle_authentication),
        MessageId::Heartbeat => Route::authenticated(lifecycle::handle_heartbeat),
        MessageId::Logout => Route::authenticated(lifecycle::handle_logout),
        MessageId::TerminalGenericResponse | MessageId::PlatformGenericResponse => {
            Route::authenticated(terminal_response::handle_generic_response)
        }
        MessageId::LocationReport => Route::authenticated(location::handle_location_report),
        MessageId::LocationQueryResponse => {
            Route::authenticated(location::handle_location_query_response)
        }
        MessageId::BulkLocationUpload => Route::authenticated(location::handle_bulk_location),
        MessageId::MultimediaEventUpload => {
            Route::authenticated(multimedia::handle_multimedia_event)
        }
        MessageId::MultimediaDataUpload => Route::authenticated(multimedia::handle_multimedia_data),
        MessageId::StreamingData => Route::authenticated(streaming::handle_streaming_data),
        MessageId::StreamingResponse => Route::authenticated(streaming::handle_streaming_response),
        MessageId::ParameterQueryResponse => {
            Route::authenticated(report::handle_parameter_response)
        }
        MessageId::ResourceListResponse => Route::authenticated(report::handle_resource_list),
        MessageId::FileUploadCompleted => {
            Route::authenticated(report::handle_file_upload_completed)
        }
        MessageId::VendorParameterResponse
        | MessageId::VendorFileDiscoveryResponse
        | MessageId::VendorFileMetadataResponse
        | MessageId::VendorFileAccessResponse => Route::authenticated(report::handle_vendor_reply),
        MessageId::RegistrationResponse
        | MessageId::SetParameters
        | MessageId::QueryParameters
        | MessageId::TerminalControl
        | MessageId::LocationQuery
        | MessageId::MultimediaDataResponse
        | MessageId::StreamingRequest
        | MessageId::StreamingControl
        | MessageId::ResourceQuery
        | MessageId::FileUploadInstruction
        | MessageId::FileUploadControl
        | MessageId::VendorParameterQuery
        | MessageId::VendorFileDiscovery
        | MessageId::VendorFileMetadata
        | MessageId::VendorFileAccess => return None,
    };
    Some(route)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(MessageId::Registration, false)]
    #[case(MessageId::Authentication, false)]
    #[case(MessageId::Heartbeat, true)]
    #[case(MessageId::MultimediaDataUpload, true)]
    #[case(MessageId::StreamingData, true)]
    #[case(MessageId::VendorFileAccessResponse, true)]
    #[case(MessageId::PlatformGenericResponse, true)]
    fn test_routes(#[case] id: MessageId, #[case] requires_authentication: bool) {
        assert_eq!(
            route(id).map(|r| r.requires_authentication),
            Some(requires_authentication)
        );
    }

    #[test]
    fn test_platform_ids_have_no_route() {
        assert!(route(MessageId::StreamingRequest).is_none());
        assert!(route(MessageId::VendorParameterQuery).is_none());
    }
}
