// End-to-end orchestration flows against in-memory fakes: batch outcomes,
// the per-user gate, the carry-over photo buffer and notice bookkeeping.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Notify;

use easel_api::{ApiError, ImageGenerator, ModelCatalog, ModelInfo};
use easel_core::types::{MessageRef, MessageSnapshot, PhotoRef, UserId};
use easel_session::orchestrator::{
    GENERATING_MESSAGE, GENERATION_FAILED_MESSAGE, INSTRUCTION_MESSAGE, NEED_PROMPT_MESSAGE,
    PENDING_PHOTOS_MESSAGE, PENDING_PHOTOS_WAIT_MESSAGE, PICK_MODEL_GREETING, PICK_MODEL_MESSAGE,
    WAIT_MESSAGE,
};
use easel_session::{
    ChatTransport, GroupKey, MediaGroupAggregator, ModelSelection, SessionOrchestrator,
    TransportError,
};
use easel_store::db::init_db;
use easel_store::SessionStore;

const CHAT: i64 = 77;
const USER: UserId = UserId(42);

struct MockTransport {
    next_id: AtomicI32,
    notices: Mutex<Vec<(MessageRef, String)>>,
    menus: Mutex<Vec<(MessageRef, String)>>,
    images: Mutex<Vec<(i64, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    // When set, fetch_photo writes real files under this root.
    download_root: Mutex<Option<PathBuf>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            next_id: AtomicI32::new(100),
            notices: Mutex::new(Vec::new()),
            menus: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            download_root: Mutex::new(None),
        }
    }

    fn next_message(&self, chat_id: i64) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn notice_texts(&self) -> Vec<String> {
        self.notices.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    fn last_notice(&self) -> (MessageRef, String) {
        self.notices.lock().unwrap().last().cloned().expect("no notice sent")
    }

    fn menu_texts(&self) -> Vec<String> {
        self.menus.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    fn menu_refs(&self) -> Vec<MessageRef> {
        self.menus.lock().unwrap().iter().map(|(m, _)| *m).collect()
    }

    fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    fn deleted_ids(&self) -> Vec<i32> {
        self.deleted.lock().unwrap().iter().map(|m| m.message_id).collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError> {
        let message = self.next_message(chat_id);
        self.notices.lock().unwrap().push((message, text.to_string()));
        Ok(message)
    }

    async fn send_model_menu(
        &self,
        chat_id: i64,
        text: &str,
        _models: &[ModelInfo],
    ) -> Result<MessageRef, TransportError> {
        let message = self.next_message(chat_id);
        self.menus.lock().unwrap().push((message, text.to_string()));
        Ok(message)
    }

    async fn send_image(
        &self,
        chat_id: i64,
        _image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef, TransportError> {
        self.images.lock().unwrap().push((chat_id, file_name.to_string()));
        Ok(self.next_message(chat_id))
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }

    async fn fetch_photo(
        &self,
        user: UserId,
        photo: &PhotoRef,
        index: usize,
    ) -> Result<PathBuf, TransportError> {
        let root = self.download_root.lock().unwrap().clone();
        let Some(root) = root else {
            // Synthetic path embedding the file id so calls can be inspected.
            return Ok(PathBuf::from(format!(
                "/tmp/easel-fake/{}/photo_{index}_{}",
                user.0, photo.0
            )));
        };
        let dir = root.join(user.0.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        let path = dir.join(format!("photo_{index}_{}", photo.0));
        tokio::fs::write(&path, b"jpeg-bytes")
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RecordedCall {
    model: String,
    images: Vec<PathBuf>,
    prompt: String,
}

enum Scripted {
    Fail,
    Stall(Arc<Notify>),
}

/// Generator fake: every call is recorded, the script drives the outcome
/// and an empty script means success.
struct MockGenerator {
    steps: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGenerator {
    fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(&self, step: Scripted) {
        self.steps.lock().unwrap().push_back(step);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for MockGenerator {
    async fn generate(
        &self,
        model_id: &str,
        image_paths: &[PathBuf],
        prompt: &str,
    ) -> Result<Vec<u8>, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model_id.to_string(),
            images: image_paths.to_vec(),
            prompt: prompt.to_string(),
        });
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Scripted::Fail) => Err(ApiError::NoImage),
            Some(Scripted::Stall(gate)) => {
                gate.notified().await;
                Ok(b"generated-bytes".to_vec())
            }
            None => Ok(b"generated-bytes".to_vec()),
        }
    }
}

struct Fixture {
    orchestrator: Arc<SessionOrchestrator>,
    transport: Arc<MockTransport>,
    generator: Arc<MockGenerator>,
    store: Arc<SessionStore>,
}

fn model(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: format!("models/{id}"),
        display_name: id.to_string(),
        description: String::new(),
        methods: vec!["generateContent".to_string()],
    }
}

fn fixture() -> Fixture {
    let conn = Connection::open_in_memory().unwrap();
    init_db(&conn).unwrap();
    let store = Arc::new(SessionStore::new(conn));
    let catalog = ModelCatalog::new(vec![model("gemini-image"), model("nano-banana")]).unwrap();
    let transport = Arc::new(MockTransport::new());
    let generator = Arc::new(MockGenerator::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&store),
        catalog,
        Arc::clone(&generator) as Arc<dyn ImageGenerator>,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
    ));
    Fixture {
        orchestrator,
        transport,
        generator,
        store,
    }
}

fn fixture_with_model() -> Fixture {
    let fx = fixture();
    fx.store.set_selected_model(USER, "gemini-image").unwrap();
    fx
}

fn text_msg(message_id: i32, text: &str) -> MessageSnapshot {
    MessageSnapshot {
        message_id,
        text: Some(text.to_string()),
        caption: None,
        photo: None,
    }
}

fn photo_msg(message_id: i32, file_id: &str) -> MessageSnapshot {
    MessageSnapshot {
        message_id,
        text: None,
        caption: None,
        photo: Some(PhotoRef(file_id.to_string())),
    }
}

fn captioned_photo(message_id: i32, file_id: &str, caption: &str) -> MessageSnapshot {
    MessageSnapshot {
        message_id,
        text: None,
        caption: Some(caption.to_string()),
        photo: Some(PhotoRef(file_id.to_string())),
    }
}

fn empty_msg(message_id: i32) -> MessageSnapshot {
    MessageSnapshot {
        message_id,
        text: None,
        caption: None,
        photo: None,
    }
}

async fn wait_for_generation_start(generator: &MockGenerator) {
    while generator.call_count() == 0 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn no_model_selected_shows_menu_without_generating() {
    let fx = fixture();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "a red fox")])
        .await
        .unwrap();

    assert_eq!(fx.generator.call_count(), 0);
    assert_eq!(fx.transport.menu_texts(), vec![PICK_MODEL_MESSAGE.to_string()]);
    // The menu is not a transient notice; the ledger must stay empty.
    assert!(fx.store.aux_messages(USER).unwrap().is_empty());
}

#[tokio::test]
async fn stale_model_id_is_treated_as_unselected() {
    let fx = fixture();
    fx.store.set_selected_model(USER, "retired-model").unwrap();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "a red fox")])
        .await
        .unwrap();

    assert_eq!(fx.generator.call_count(), 0);
    assert_eq!(fx.transport.menu_texts(), vec![PICK_MODEL_MESSAGE.to_string()]);
}

#[tokio::test]
async fn prompt_with_photo_generates_and_clears_status() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "a red fox")])
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "gemini-image");
    assert_eq!(calls[0].prompt, "a red fox");
    assert_eq!(calls[0].images.len(), 1);
    assert!(calls[0].images[0].to_string_lossy().contains("p1"));

    assert_eq!(fx.transport.image_count(), 1);
    // The progress notice was sent, then swept on success.
    assert_eq!(fx.transport.notice_texts(), vec![GENERATING_MESSAGE.to_string()]);
    assert_eq!(fx.transport.deleted_ids().len(), 1);
    assert!(fx.store.aux_messages(USER).unwrap().is_empty());
}

#[tokio::test]
async fn batch_is_ordered_by_message_sequence() {
    let fx = fixture_with_model();

    // Arrival order scrambled; message ids define the real sequence.
    fx.orchestrator
        .process_batch(
            USER,
            CHAT,
            vec![photo_msg(9, "late"), captioned_photo(2, "early", "two cats")],
        )
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "two cats");
    assert_eq!(calls[0].images.len(), 2);
    assert!(calls[0].images[0].to_string_lossy().contains("photo_1_early"));
    assert!(calls[0].images[1].to_string_lossy().contains("photo_2_late"));
}

#[tokio::test]
async fn arrival_order_does_not_change_the_call() {
    let snapshots = vec![
        text_msg(3, "a lighthouse at dusk"),
        photo_msg(1, "a"),
        photo_msg(2, "b"),
    ];
    let mut reversed = snapshots.clone();
    reversed.reverse();

    let fx_a = fixture_with_model();
    fx_a.orchestrator.process_batch(USER, CHAT, snapshots).await.unwrap();
    let fx_b = fixture_with_model();
    fx_b.orchestrator.process_batch(USER, CHAT, reversed).await.unwrap();

    assert_eq!(fx_a.generator.calls(), fx_b.generator.calls());
}

#[tokio::test]
async fn split_submission_matches_grouped_batch() {
    // Photo then prompt as two separate messages...
    let split = fixture_with_model();
    split
        .orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "p1")])
        .await
        .unwrap();
    split
        .orchestrator
        .process_batch(USER, CHAT, vec![text_msg(2, "a cat")])
        .await
        .unwrap();

    // ...and the same content as one grouped batch.
    let grouped = fixture_with_model();
    grouped
        .orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "p1"), text_msg(2, "a cat")])
        .await
        .unwrap();

    assert_eq!(split.generator.calls(), grouped.generator.calls());
}

#[tokio::test(start_paused = true)]
async fn flushed_album_drives_one_generation() {
    let fx = fixture_with_model();
    let (aggregator, mut rx) = MediaGroupAggregator::new(Duration::from_millis(600));
    let key = GroupKey {
        chat_id: CHAT,
        media_group_id: "g1".to_string(),
    };

    // A photo and its prompt trickle in as two album messages.
    aggregator.submit(key.clone(), USER, photo_msg(1, "p1.jpg"));
    aggregator.submit(key, USER, text_msg(2, "a cat"));

    let batch = rx.recv().await.expect("one flush");
    assert_eq!(batch.user, USER);
    assert_eq!(batch.chat_id, CHAT);
    assert_eq!(batch.snapshots.len(), 2);

    fx.orchestrator
        .process_batch(batch.user, batch.chat_id, batch.snapshots)
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "gemini-image");
    assert_eq!(calls[0].prompt, "a cat");
    assert_eq!(calls[0].images.len(), 1);
    assert!(calls[0].images[0].to_string_lossy().contains("p1.jpg"));
    assert_eq!(fx.transport.image_count(), 1);

    assert!(rx.try_recv().is_err(), "a group must flush exactly once");
}

#[tokio::test]
async fn no_prompt_no_photos_asks_for_prompt() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![empty_msg(1)])
        .await
        .unwrap();

    assert_eq!(fx.generator.call_count(), 0);
    assert_eq!(fx.transport.notice_texts(), vec![NEED_PROMPT_MESSAGE.to_string()]);
    assert!(fx.store.pending_images(USER).unwrap().is_empty());
}

#[tokio::test]
async fn photos_without_prompt_are_stashed() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "p1"), photo_msg(2, "p2")])
        .await
        .unwrap();

    assert_eq!(fx.generator.call_count(), 0);
    assert_eq!(fx.transport.notice_texts(), vec![PENDING_PHOTOS_MESSAGE.to_string()]);
    let pending = fx.store.pending_images(USER).unwrap();
    assert_eq!(pending, vec![PhotoRef("p1".into()), PhotoRef("p2".into())]);
}

#[tokio::test]
async fn whitespace_prompt_counts_as_no_prompt() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "   \n ")])
        .await
        .unwrap();

    assert_eq!(fx.generator.call_count(), 0);
    assert_eq!(fx.transport.notice_texts(), vec![PENDING_PHOTOS_MESSAGE.to_string()]);
    assert_eq!(fx.store.pending_images(USER).unwrap(), vec![PhotoRef("p1".into())]);
}

#[tokio::test]
async fn photos_then_prompt_reuses_the_stash() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "p1"), photo_msg(2, "p2")])
        .await
        .unwrap();
    fx.orchestrator
        .process_batch(USER, CHAT, vec![text_msg(3, "merge these")])
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "merge these");
    assert_eq!(calls[0].images.len(), 2);
    assert!(calls[0].images[0].to_string_lossy().contains("photo_1_p1"));
    assert!(calls[0].images[1].to_string_lossy().contains("photo_2_p2"));
    // Consumed successfully, so the stash is gone.
    assert!(fx.store.pending_images(USER).unwrap().is_empty());
}

#[tokio::test]
async fn fresh_photos_supersede_the_stash() {
    let fx = fixture_with_model();

    fx.orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "old")])
        .await
        .unwrap();
    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(2, "new", "use this one")])
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].images.len(), 1);
    assert!(calls[0].images[0].to_string_lossy().contains("new"));
    assert!(fx.store.pending_images(USER).unwrap().is_empty());
}

#[tokio::test]
async fn stash_survives_failure_until_consumed() {
    let fx = fixture_with_model();
    fx.orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(1, "p1")])
        .await
        .unwrap();

    fx.generator.script(Scripted::Fail);
    fx.orchestrator
        .process_batch(USER, CHAT, vec![text_msg(2, "first try")])
        .await
        .unwrap();

    // The failed attempt must not eat the stash.
    assert_eq!(fx.store.pending_images(USER).unwrap(), vec![PhotoRef("p1".into())]);

    fx.orchestrator
        .process_batch(USER, CHAT, vec![text_msg(3, "second try")])
        .await
        .unwrap();

    assert_eq!(fx.transport.image_count(), 1);
    assert!(fx.store.pending_images(USER).unwrap().is_empty());
}

#[tokio::test]
async fn failure_keeps_only_the_failure_notice() {
    let fx = fixture_with_model();
    fx.generator.script(Scripted::Fail);

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "a red fox")])
        .await
        .unwrap();

    assert_eq!(fx.transport.image_count(), 0);
    let (failure_ref, failure_text) = fx.transport.last_notice();
    assert_eq!(failure_text, GENERATION_FAILED_MESSAGE);
    assert_eq!(fx.store.aux_messages(USER).unwrap(), vec![failure_ref]);
    // The progress notice went away, the failure notice stayed.
    let deleted = fx.transport.deleted_ids();
    assert_eq!(deleted.len(), 1);
    assert!(!deleted.contains(&failure_ref.message_id));

    // The gate was released: the next attempt runs and sweeps the notice.
    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(2, "p2", "again")])
        .await
        .unwrap();
    assert_eq!(fx.transport.image_count(), 1);
    assert!(fx.transport.deleted_ids().contains(&failure_ref.message_id));
}

#[tokio::test]
async fn prompt_while_busy_gets_one_wait_notice() {
    let fx = fixture_with_model();
    let stall = Arc::new(Notify::new());
    fx.generator.script(Scripted::Stall(Arc::clone(&stall)));

    let orchestrator = Arc::clone(&fx.orchestrator);
    let running = tokio::spawn(async move {
        orchestrator
            .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "slow one")])
            .await
    });
    wait_for_generation_start(&fx.generator).await;

    fx.orchestrator
        .process_batch(USER, CHAT, vec![captioned_photo(2, "p2", "impatient")])
        .await
        .unwrap();

    assert_eq!(
        fx.transport.notice_texts(),
        vec![GENERATING_MESSAGE.to_string(), WAIT_MESSAGE.to_string()]
    );
    // The running attempt's status notice must survive the rebuff.
    assert!(fx.transport.deleted_ids().is_empty());
    assert_eq!(fx.generator.call_count(), 1);

    stall.notify_one();
    running.await.unwrap().unwrap();
    assert_eq!(fx.transport.image_count(), 1);
    assert!(fx.store.aux_messages(USER).unwrap().is_empty());
}

#[tokio::test]
async fn photos_while_busy_are_stashed_for_later() {
    let fx = fixture_with_model();
    let stall = Arc::new(Notify::new());
    fx.generator.script(Scripted::Stall(Arc::clone(&stall)));

    let orchestrator = Arc::clone(&fx.orchestrator);
    let running = tokio::spawn(async move {
        orchestrator
            .process_batch(USER, CHAT, vec![captioned_photo(1, "p1", "slow one")])
            .await
    });
    wait_for_generation_start(&fx.generator).await;

    fx.orchestrator
        .process_batch(USER, CHAT, vec![photo_msg(2, "p2")])
        .await
        .unwrap();

    let (_, text) = fx.transport.last_notice();
    assert_eq!(text, PENDING_PHOTOS_WAIT_MESSAGE);
    assert!(fx.transport.deleted_ids().is_empty());

    stall.notify_one();
    running.await.unwrap().unwrap();

    // The running attempt used its own photo; the stash waits for a prompt.
    assert_eq!(fx.store.pending_images(USER).unwrap(), vec![PhotoRef("p2".into())]);
    assert_eq!(fx.generator.call_count(), 1);
}

#[tokio::test]
async fn selecting_a_model_persists_and_confirms() {
    let fx = fixture();

    fx.orchestrator
        .begin_model_selection(USER, CHAT, true)
        .await
        .unwrap();
    assert_eq!(fx.transport.menu_texts(), vec![PICK_MODEL_GREETING.to_string()]);
    let menu = fx.transport.menu_refs()[0];

    let outcome = fx
        .orchestrator
        .select_model(USER, CHAT, "nano-banana")
        .await
        .unwrap();

    assert_eq!(outcome, ModelSelection::Accepted);
    assert_eq!(fx.store.selected_model(USER).unwrap().as_deref(), Some("nano-banana"));
    assert!(fx.transport.deleted_ids().contains(&menu.message_id));
    let (instruction_ref, instruction_text) = fx.transport.last_notice();
    assert_eq!(instruction_text, INSTRUCTION_MESSAGE);
    assert_eq!(fx.store.aux_messages(USER).unwrap(), vec![instruction_ref]);
}

#[tokio::test]
async fn selecting_an_unknown_model_changes_nothing() {
    let fx = fixture();
    fx.orchestrator
        .begin_model_selection(USER, CHAT, false)
        .await
        .unwrap();

    let outcome = fx
        .orchestrator
        .select_model(USER, CHAT, "not-in-catalog")
        .await
        .unwrap();

    assert_eq!(outcome, ModelSelection::Rejected);
    assert_eq!(fx.store.selected_model(USER).unwrap(), None);
    assert!(fx.transport.notice_texts().is_empty());
    // The menu stays up for another tap.
    assert!(fx.transport.deleted_ids().is_empty());
}

#[tokio::test]
async fn reentering_selection_replaces_the_menu() {
    let fx = fixture();

    fx.orchestrator
        .begin_model_selection(USER, CHAT, true)
        .await
        .unwrap();
    fx.orchestrator
        .begin_model_selection(USER, CHAT, false)
        .await
        .unwrap();

    let menus = fx.transport.menu_refs();
    assert_eq!(menus.len(), 2);
    let deleted = fx.transport.deleted_ids();
    assert!(deleted.contains(&menus[0].message_id));
    assert!(!deleted.contains(&menus[1].message_id));
}

#[tokio::test]
async fn downloaded_inputs_are_removed_after_the_attempt() {
    let fx = fixture_with_model();
    let root = std::env::temp_dir().join(format!("easel-orch-{}", std::process::id()));
    *fx.transport.download_root.lock().unwrap() = Some(root.clone());

    fx.orchestrator
        .process_batch(
            USER,
            CHAT,
            vec![photo_msg(1, "p1"), captioned_photo(2, "p2", "combine")],
        )
        .await
        .unwrap();

    let calls = fx.generator.calls();
    assert_eq!(calls[0].images.len(), 2);
    for path in &calls[0].images {
        assert!(!path.exists(), "temp file left behind: {}", path.display());
    }
    assert!(!root.join(USER.0.to_string()).exists(), "user temp dir left behind");

    std::fs::remove_dir_all(&root).ok();
}
