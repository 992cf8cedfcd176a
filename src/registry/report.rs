use chrono::{DateTime, Local};

use crate::protocol::resource::{FileUploadCompleted, ResourceListResponse, VendorReply};
use crate::protocol::terminal::ParameterQueryResponse;
use crate::protocol::MessageId;

/// Terminal answers to platform queries, fanned out to whoever subscribed on the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportKind {
    Parameters(ParameterQueryResponse),
    ResourceList(ResourceListResponse),
    FileUploadCompleted(FileUploadCompleted),
    Vendor {
        message_id: MessageId,
        reply: VendorReply,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalReport {
    pub terminal_id: String,
    pub received_at: DateTime<Local>,
    pub kind: ReportKind,
}

impl TerminalReport {
    pub fn new(terminal_id: impl Into<String>, kind: ReportKind) -> Self {
        TerminalReport {
            terminal_id: terminal_id.into(),
            received_at: Local::now(),
            kind,
        }
    }
}
