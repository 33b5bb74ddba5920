//! Legal status transitions of a single upload item.
//!
//! ```text
//! queued -> pending -> done
//!              |  ^
//!              v  |
//!      paused / failed
//! ```
//!
//! `failed -> pending` only happens through an explicit retry; `done` is terminal.
//! Cancellation is not a transition, the manager removes the item instead.

use super::errors::{Result, UploadError};
use super::types::{UploadId, UploadStatus};

impl UploadStatus {
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (self, next),
            (Queued, Pending)
                | (Pending, Done)
                | (Pending, Paused)
                | (Pending, Failed)
                | (Paused, Pending)
                | (Failed, Pending)
        )
    }

    /// Checks `self -> next` against the table and returns `next` when legal.
    pub fn transition(self, identifier: &UploadId, next: UploadStatus) -> Result<UploadStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(UploadError::InvalidTransition {
                identifier: identifier.clone(),
                from: self,
                to: next,
            })
        }
    }
}
