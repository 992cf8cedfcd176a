//! Destination of completed multimedia uploads.
//!
//! Connection workers hand a [`CompletedUpload`] to a [`MediaStore`] and move on; naming and
//! placing the file is the store's business.

mod directory;

use std::fmt::Debug;

use parking_lot::Mutex;

pub use directory::{media_extension, DirectoryMediaStore};

use crate::session::CompletedUpload;
use crate::AppResult;

pub trait MediaStore: Send + Sync + Debug {
    /// Accepts an upload without blocking the caller.
    fn store(&self, upload: CompletedUpload) -> AppResult<()>;
}

/// Keeps uploads in memory; for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    uploads: Mutex<Vec<CompletedUpload>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<CompletedUpload> {
        self.uploads.lock().clone()
    }
}

impl MediaStore for MemoryMediaStore {
    fn store(&self, upload: CompletedUpload) -> AppResult<()> {
        self.uploads.lock().push(upload);
        Ok(())
    }
}
