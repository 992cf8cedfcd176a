//! Per-connection protocol state.
//!
//! Everything in here is owned by a single connection worker and mutated only from it, so no
//! locking is involved. Cross-connection access goes through [`crate::registry`].

pub mod multimedia;
pub mod state;
pub mod streaming;
mod terminal_session;

pub use multimedia::{
    CompletedUpload, DataAcceptance, MultimediaEvent, MultimediaLedger, MultimediaStatus,
};
pub use state::ConnectionState;
pub use streaming::{StreamingOptions, StreamingSession, StreamingSessions, StreamingStatus};
pub use terminal_session::{PendingLocationQuery, TerminalCapabilities, TerminalSession};
