//! Inbound message dispatch.
//!
//! [`RequestProcessor::process_request`] looks a decoded message up in the dispatch table
//! ([`route`]), enforces authentication, and runs the handler against the connection's
//! [`crate::session::TerminalSession`]. Handlers never write to the socket; they collect the
//! frames to send in a [`DispatchOutcome`].

mod handler;
mod request_context;
mod request_processor;

pub use handler::{route, Handler, Route};
pub use request_context::{DispatchOutcome, RequestContext};
pub use request_processor::RequestProcessor;
