use std::sync::Arc;

use easel_core::types::{PhotoRef, UserId};
use easel_store::SessionStore;

use crate::error::Result;

/// Photos uploaded ahead of their prompt.
///
/// Lifecycle: a fresh photo-only submission replaces the buffer; a
/// successful generation that consumed it clears it. Nothing else touches
/// it. Failed attempts and early returns leave the buffer intact so a
/// prompt-only retry still has its images.
pub struct PendingImageBuffer {
    store: Arc<SessionStore>,
}

impl PendingImageBuffer {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Replace the buffer with a new ordered set.
    pub fn replace(&self, user: UserId, photos: &[PhotoRef]) -> Result<()> {
        self.store.set_pending_images(user, photos)?;
        Ok(())
    }

    /// Current contents, in upload order.
    pub fn current(&self, user: UserId) -> Result<Vec<PhotoRef>> {
        Ok(self.store.pending_images(user)?)
    }

    pub fn clear(&self, user: UserId) -> Result<()> {
        self.store.clear_pending_images(user)?;
        Ok(())
    }
}
