//! Batch evaluation: turns one user's completed submission into exactly one
//! terminal outcome (a delivered image or a single notice).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use easel_api::{ImageGenerator, ModelCatalog};
use easel_core::types::{MessageSnapshot, PhotoRef, UserId};
use easel_store::SessionStore;

use crate::error::{Result, SessionError};
use crate::ledger::MessageLedger;
use crate::pending::PendingImageBuffer;
use crate::sessions::SessionTable;
use crate::transport::ChatTransport;

pub const INSTRUCTION_MESSAGE: &str =
    "Model selected. Send a prompt, optionally with photos, in one message.";
pub const NEED_PROMPT_MESSAGE: &str = "Send a text prompt for the generation.";
pub const PENDING_PHOTOS_MESSAGE: &str = "Photos saved. Now send a text prompt.";
pub const PENDING_PHOTOS_WAIT_MESSAGE: &str =
    "Photos saved. The current generation is still running; send a prompt once it finishes.";
pub const WAIT_MESSAGE: &str =
    "Still working on your previous request. Wait for it to finish, then send the prompt again.";
pub const GENERATING_MESSAGE: &str = "Generating...";
pub const GENERATION_FAILED_MESSAGE: &str = "Generation failed. Try again.";
pub const PICK_MODEL_GREETING: &str = "Hi! Pick a model to get started.";
pub const PICK_MODEL_MESSAGE: &str = "Pick a model.";
pub const MODEL_UNAVAILABLE_MESSAGE: &str = "Model unavailable";
pub const RESULT_FILE_NAME: &str = "result.png";

/// Outcome of a model tap, used to pick the callback acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelection {
    Accepted,
    Rejected,
}

/// Drives every user submission to its terminal state.
///
/// Owns the in-memory session table (gates + menu slots) and composes the
/// persistent pieces: the store, the pending buffer and the message ledger.
/// All chat I/O goes through the [`ChatTransport`] seam.
pub struct SessionOrchestrator {
    store: Arc<SessionStore>,
    catalog: ModelCatalog,
    generator: Arc<dyn ImageGenerator>,
    transport: Arc<dyn ChatTransport>,
    sessions: SessionTable,
    ledger: MessageLedger,
    pending: PendingImageBuffer,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        catalog: ModelCatalog,
        generator: Arc<dyn ImageGenerator>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            sessions: SessionTable::new(),
            ledger: MessageLedger::new(Arc::clone(&store), Arc::clone(&transport)),
            pending: PendingImageBuffer::new(Arc::clone(&store)),
            store,
            catalog,
            generator,
            transport,
        }
    }

    /// Evaluate one completed batch.
    ///
    /// 1. Order snapshots, extract prompt and photos
    /// 2. No prompt: stash photos (if any) and say what is missing
    /// 3. Prompt while busy: single wait notice
    /// 4. Sweep stale notices, resolve the model (menu when unresolved)
    /// 5. Take the gate, pick batch photos over the carry-over buffer
    /// 6. Status notice, download, generate, deliver or report
    /// 7. Always: release the gate, delete temp files; clear the carry-over
    ///    buffer only after it was consumed successfully
    ///
    /// An `Err` from here means even the failure notice could not be
    /// delivered; the caller logs it.
    #[instrument(skip(self, snapshots), fields(user = user.0, count = snapshots.len()))]
    pub async fn process_batch(
        &self,
        user: UserId,
        chat_id: i64,
        mut snapshots: Vec<MessageSnapshot>,
    ) -> Result<()> {
        // 1. Evaluate in chat order regardless of arrival order.
        snapshots.sort_by_key(|s| s.message_id);
        let prompt = extract_prompt(&snapshots);
        let photos = extract_photos(&snapshots);

        // 2.-4. No usable prompt: stash photos for later and explain.
        let Some(prompt) = prompt else {
            if !self.sessions.is_locked(user) {
                self.ledger.clear(user).await?;
            }
            if photos.is_empty() {
                self.ledger
                    .send_tracked(user, chat_id, NEED_PROMPT_MESSAGE)
                    .await?;
                return Ok(());
            }
            self.pending.replace(user, &photos)?;
            let notice = if self.sessions.is_locked(user) {
                PENDING_PHOTOS_WAIT_MESSAGE
            } else {
                PENDING_PHOTOS_MESSAGE
            };
            self.ledger.send_tracked(user, chat_id, notice).await?;
            return Ok(());
        };

        // 5. A generation is already running: one wait notice, keep the
        //    running attempt's status untouched.
        if self.sessions.is_locked(user) {
            self.ledger.send_tracked(user, chat_id, WAIT_MESSAGE).await?;
            return Ok(());
        }

        // 6. A new attempt starts: sweep stale notices.
        self.ledger.clear(user).await?;

        // 7. Resolve the selected model against the live catalog. A stale id
        //    is treated the same as no selection.
        let model_id = match self.store.selected_model(user)? {
            Some(id) if self.catalog.get(&id).is_some() => id,
            _ => {
                self.begin_model_selection(user, chat_id, false).await?;
                return Ok(());
            }
        };

        // 8. Take the gate. A concurrent batch may have won since step 5.
        let Some(permit) = self.sessions.try_acquire(user) else {
            self.ledger.send_tracked(user, chat_id, WAIT_MESSAGE).await?;
            return Ok(());
        };

        // 9. Photos in this batch win and supersede the carry-over buffer.
        let (active_photos, pending_used) = if photos.is_empty() {
            let carried = self.pending.current(user)?;
            let used = !carried.is_empty();
            (carried, used)
        } else {
            self.pending.clear(user)?;
            (photos, false)
        };

        // 10. Visible progress marker, tracked like any other notice.
        self.ledger
            .send_tracked(user, chat_id, GENERATING_MESSAGE)
            .await?;

        // 11.-13. Download, generate, deliver. Failure is reported while the
        // gate is still held so concurrent probes keep reading busy.
        let mut downloaded: Vec<PathBuf> = Vec::new();
        let outcome = self
            .run_generation(user, chat_id, &model_id, &active_photos, &prompt, &mut downloaded)
            .await;

        let mut report: Result<()> = Ok(());
        let succeeded = match outcome {
            Ok(()) => true,
            Err(e) => {
                report = self.report_failure(user, chat_id, e).await;
                false
            }
        };

        // 14. Unconditional epilogue: free the gate, remove temp artifacts.
        // The carry-over buffer is cleared only after a consuming success.
        drop(permit);
        cleanup_downloads(&downloaded).await;
        if succeeded && pending_used {
            self.pending.clear(user)?;
        }
        report
    }

    /// Download the inputs, call the generator, deliver the result and sweep
    /// the status notice.
    ///
    /// Downloaded paths are pushed into `downloaded` as they land so the
    /// caller can delete them no matter where this returns.
    async fn run_generation(
        &self,
        user: UserId,
        chat_id: i64,
        model_id: &str,
        photos: &[PhotoRef],
        prompt: &str,
        downloaded: &mut Vec<PathBuf>,
    ) -> Result<()> {
        for (index, photo) in photos.iter().enumerate() {
            let path = self.transport.fetch_photo(user, photo, index + 1).await?;
            downloaded.push(path);
        }

        let image = self
            .generator
            .generate(model_id, downloaded, prompt)
            .await?;

        debug!(user = user.0, bytes = image.len(), "generation succeeded");
        self.transport
            .send_image(chat_id, image, RESULT_FILE_NAME)
            .await?;
        self.ledger.clear(user).await?;
        Ok(())
    }

    /// Send the fixed failure notice and keep it as the only tracked
    /// message. The user sees the same text for every failure class; the
    /// log severity differs.
    async fn report_failure(&self, user: UserId, chat_id: i64, failure: SessionError) -> Result<()> {
        match &failure {
            SessionError::Generation(e) => {
                warn!(user = user.0, error = %e, "generation failed");
            }
            other => {
                error!(user = user.0, error = %other, "generation attempt failed unexpectedly");
            }
        }
        let notice = self
            .ledger
            .send_tracked(user, chat_id, GENERATION_FAILED_MESSAGE)
            .await?;
        self.ledger.clear_except(user, &[notice]).await?;
        Ok(())
    }

    /// Show the model menu, replacing any previous menu message.
    ///
    /// The menu lives in a dedicated single slot outside the transient
    /// ledger: sweeping notices must never take an open menu with it.
    pub async fn begin_model_selection(
        &self,
        user: UserId,
        chat_id: i64,
        greeting: bool,
    ) -> Result<()> {
        if let Some(previous) = self.sessions.swap_menu_message(user, None) {
            if let Err(e) = self.transport.delete_message(previous).await {
                debug!(
                    message_id = previous.message_id,
                    error = %e,
                    "previous model menu already gone"
                );
            }
        }

        let text = if greeting {
            PICK_MODEL_GREETING
        } else {
            PICK_MODEL_MESSAGE
        };
        let menu = self
            .transport
            .send_model_menu(chat_id, text, self.catalog.all())
            .await?;
        self.sessions.swap_menu_message(user, Some(menu));
        Ok(())
    }

    /// Apply a model tap: validate, persist, drop the menu, instruct.
    ///
    /// A rejected tap changes nothing; the caller shows the unavailable
    /// alert and the menu stays up.
    #[instrument(skip(self), fields(user = user.0, model = model_id))]
    pub async fn select_model(
        &self,
        user: UserId,
        chat_id: i64,
        model_id: &str,
    ) -> Result<ModelSelection> {
        if self.catalog.get(model_id).is_none() {
            return Ok(ModelSelection::Rejected);
        }

        self.store.set_selected_model(user, model_id)?;

        if let Some(menu) = self.sessions.swap_menu_message(user, None) {
            if let Err(e) = self.transport.delete_message(menu).await {
                debug!(message_id = menu.message_id, error = %e, "model menu already gone");
            }
        }
        self.clear_idle_aux(user).await?;
        self.ledger
            .send_tracked(user, chat_id, INSTRUCTION_MESSAGE)
            .await?;
        Ok(ModelSelection::Accepted)
    }

    /// Sweep transient messages, but only while no generation is running.
    /// A running generation owns its status notice.
    pub async fn clear_idle_aux(&self, user: UserId) -> Result<()> {
        if !self.sessions.is_locked(user) {
            self.ledger.clear(user).await?;
        }
        Ok(())
    }
}

/// First non-empty text, else non-empty caption, walking snapshots in
/// order. The winner still counts as absent when it is all whitespace.
fn extract_prompt(snapshots: &[MessageSnapshot]) -> Option<String> {
    for snapshot in snapshots {
        if let Some(text) = snapshot.text.as_deref() {
            if !text.is_empty() {
                return non_blank(text);
            }
        }
        if let Some(caption) = snapshot.caption.as_deref() {
            if !caption.is_empty() {
                return non_blank(caption);
            }
        }
    }
    None
}

fn non_blank(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn extract_photos(snapshots: &[MessageSnapshot]) -> Vec<PhotoRef> {
    snapshots.iter().filter_map(|s| s.photo.clone()).collect()
}

/// Delete downloaded inputs, then their directory if it emptied.
async fn cleanup_downloads(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "temp image already gone");
        }
    }
    if let Some(parent) = paths.first().and_then(|p| p.parent()) {
        // Fails while other downloads still live there; that is fine.
        let _ = tokio::fs::remove_dir(parent).await;
    }
}
