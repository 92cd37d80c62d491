//! Session controller: runs the effects of [`SessionState`] against a
//! [`Backend`] and feeds the results back in.
//!
//! # Event loop
//!
//! ```text
//! operation ──▶ SessionState ──Effect──▶ tokio::spawn(backend call)
//!                     ▲                          │
//!                     └──── apply(Completion) ◀──┘  mpsc channel
//! ```
//!
//! All state lives in one [`SessionState`] owned by the controller; spawned
//! tasks only hold the backend and a channel sender, so no lock is shared
//! between them.  The driver calls [`SessionController::process_next`] (or
//! [`SessionController::settle`]) to apply completions as they arrive.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::{AudioSource, DeviceLease};
use crate::backend::{Backend, Capability};
use crate::capture::{SelectedFile, StoppedRecording};
use crate::config::AppConfig;

use super::error::ControllerError;
use super::model::{ThreadId, ThreadSummary, UserId};
use super::state::{Completion, Effect, Event, SessionState};

/// Completion channel depth.  Senders wait when it is full.
const COMPLETION_CHANNEL_CAPACITY: usize = 32;

pub struct SessionController {
    state: SessionState,
    backend: Arc<dyn Backend>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    /// Completions still expected from spawned tasks.
    in_flight: usize,
}

impl SessionController {
    pub fn new(config: &AppConfig, backend: Arc<dyn Backend>, source: Arc<dyn AudioSource>) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            state: SessionState::new(config, source),
            backend,
            completion_tx,
            completion_rx,
            in_flight: 0,
        }
    }

    /// Read access to roster, history, context, buffer and pipeline states.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// `true` while any backend call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    // -----------------------------------------------------------------------
    // Session operations
    // -----------------------------------------------------------------------

    /// Fetch the user's threads and replace the roster.  A failed fetch
    /// leaves the previous roster untouched.  When no thread is active the
    /// first one is switched to.
    pub async fn load_roster(
        &mut self,
        user: &UserId,
    ) -> Result<Vec<ThreadSummary>, ControllerError> {
        let threads = self.backend.list_threads(user).await.map_err(|e| {
            log::warn!("session: loading threads for {user} failed: {e}");
            ControllerError::RosterUnavailable(e)
        })?;
        log::info!("session: loaded {} threads for {user}", threads.len());

        if let Some(first) = self.state.replace_roster(threads) {
            // The id was just taken from the roster, so the switch finds it.
            self.switch_thread(&first)?;
        }
        Ok(self.state.summaries())
    }

    /// Re-fetch one thread into the roster.  The visible history picks up
    /// the change on the next switch.
    pub async fn refresh_thread(&mut self, id: &ThreadId) -> Result<(), ControllerError> {
        let thread = self.backend.fetch_thread(id).await.map_err(|e| {
            log::warn!("session: refreshing {id} failed: {e}");
            ControllerError::transport(Capability::FetchThread, e)
        })?;
        self.state.upsert_thread(thread);
        Ok(())
    }

    pub fn switch_thread(&mut self, id: &ThreadId) -> Result<(), ControllerError> {
        let effects = self.state.switch_thread(id).inspect_err(|e| {
            log::warn!("session: {e}; visible history cleared");
        })?;
        self.spawn_all(effects);
        Ok(())
    }

    pub fn start_new_session(&mut self, user: Option<&UserId>) {
        let effects = self.state.start_new_session(user);
        self.spawn_all(effects);
    }

    // -----------------------------------------------------------------------
    // Composition
    // -----------------------------------------------------------------------

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.state.set_text(text);
    }

    /// Send the composition buffer.  Returns `false` when there was nothing
    /// to send.
    pub fn dispatch(&mut self) -> bool {
        match self.state.dispatch() {
            Some(effects) => {
                self.spawn_all(effects);
                true
            }
            None => false,
        }
    }

    /// Open the microphone and start recording.  Opening blocks on the
    /// device thread, so it runs on the blocking pool.
    pub async fn begin_capture(&mut self) -> Result<(), ControllerError> {
        let (source, sink) = self.state.audio_mut().prepare()?;
        let device_sink = Arc::clone(&sink);
        let opened = tokio::task::spawn_blocking(move || source.open(device_sink))
            .await
            .map_err(|e| ControllerError::DeviceUnavailable(format!("capture task failed: {e}")))?;
        let generation = self.state.generation();
        self.state.audio_mut().start(opened, sink, generation)
    }

    /// Stop recording and submit the clip for transcription.
    pub async fn end_capture(&mut self) -> Result<(), ControllerError> {
        let StoppedRecording {
            lease,
            sink,
            generation,
        } = self.state.audio_mut().stop()?;
        release_device(lease).await;
        let job = self.state.audio_mut().submit(&sink, generation)?;
        self.spawn(Effect::Transcribe(job.clip));
        Ok(())
    }

    pub async fn cancel_capture(&mut self) -> Result<(), ControllerError> {
        let stopped = self.state.audio_mut().cancel()?;
        release_device(stopped.lease).await;
        Ok(())
    }

    pub fn select_file(&mut self, file: Option<SelectedFile>) -> Result<(), ControllerError> {
        let effects = self.state.select_file(file)?;
        self.spawn_all(effects);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    /// Wait for the next completion and apply it.  Returns `None` when no
    /// backend call is outstanding.
    pub async fn process_next(&mut self) -> Option<Vec<Event>> {
        if self.in_flight == 0 {
            return None;
        }
        // The controller owns a sender, so the channel never closes here.
        let completion = self.completion_rx.recv().await?;
        self.in_flight -= 1;

        let applied = self.state.apply(completion);
        self.spawn_all(applied.effects);
        Some(applied.events)
    }

    /// Apply completions until nothing is outstanding, including follow-up
    /// calls those completions trigger.
    pub async fn settle(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(batch) = self.process_next().await {
            events.extend(batch);
        }
        events
    }

    fn spawn_all(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.spawn(effect);
        }
    }

    fn spawn(&mut self, effect: Effect) {
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();

        match effect {
            Effect::PushContext(context) => {
                self.in_flight += 1;
                tokio::spawn(async move {
                    let result = backend.push_context(&context).await;
                    let _ = tx.send(Completion::ContextPushed(result)).await;
                });
            }
            Effect::Chat { lane, prompt } => {
                self.in_flight += 1;
                tokio::spawn(async move {
                    let result = backend.chat(&prompt).await;
                    let _ = tx.send(Completion::Reply { lane, result }).await;
                });
            }
            Effect::Renew { generation, audit } => {
                // Two completions: the report, then the reset ack.
                self.in_flight += 2;
                tokio::spawn(async move {
                    let result = backend.latest_report(&audit.user_id).await;
                    let _ = tx.send(Completion::Report { generation, result }).await;
                    let result = backend.reset_memory(&audit).await;
                    let _ = tx.send(Completion::ResetAcked { generation, result }).await;
                });
            }
            Effect::Transcribe(clip) => {
                self.in_flight += 1;
                tokio::spawn(async move {
                    let result = backend.transcribe(&clip).await;
                    let _ = tx.send(Completion::Transcribed(result)).await;
                });
            }
            Effect::Classify(file) => {
                self.in_flight += 1;
                tokio::spawn(async move {
                    let result = backend.classify_image(&file).await;
                    let _ = tx.send(Completion::Classified(result)).await;
                });
            }
        }
    }
}

/// Release joins the device thread, so it runs on the blocking pool too.
async fn release_device(lease: DeviceLease) {
    if let Err(e) = tokio::task::spawn_blocking(move || lease.release()).await {
        log::warn!("capture: releasing the device failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::audio::AudioClip;
    use crate::backend::{BackendError, Prediction, Report, ResetRequest, Transcription};
    use crate::capture::audio::tests::MockMicrophone;
    use crate::capture::{AudioState, ImageState};
    use crate::compose::CompositionBuffer;
    use crate::session::{Context, Message, Thread};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Scripted backend that records what it was asked and keeps the
    /// context it would hold server-side.
    struct MockBackend {
        threads: Mutex<Result<Vec<Thread>, BackendError>>,
        held_context: Mutex<Context>,
        push_delay: Duration,
        report: Result<Option<Report>, BackendError>,
        chat_fails: bool,
        transcript: Result<String, BackendError>,
        pushed: Mutex<Vec<Context>>,
        prompts: Mutex<Vec<String>>,
        resets: Mutex<Vec<ResetRequest>>,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                threads: Mutex::new(Ok(roster())),
                held_context: Mutex::new(Context::empty()),
                push_delay: Duration::ZERO,
                report: Ok(None),
                chat_fails: false,
                transcript: Ok("spoken words".into()),
                pushed: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
                resets: Mutex::new(Vec::new()),
            }
        }

        fn pushed(&self) -> Vec<Context> {
            self.pushed.lock().unwrap().clone()
        }

        fn held_context(&self) -> Context {
            self.held_context.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn list_threads(&self, _user: &UserId) -> Result<Vec<Thread>, BackendError> {
            self.threads.lock().unwrap().clone()
        }

        async fn fetch_thread(&self, id: &ThreadId) -> Result<Thread, BackendError> {
            let threads = self.threads.lock().unwrap().clone()?;
            threads
                .into_iter()
                .find(|t| &t.id == id)
                .ok_or(BackendError::Status {
                    status: 404,
                    message: "Chat not found".into(),
                })
        }

        async fn push_context(&self, context: &Context) -> Result<(), BackendError> {
            self.pushed.lock().unwrap().push(context.clone());
            if !self.push_delay.is_zero() {
                tokio::time::sleep(self.push_delay).await;
            }
            *self.held_context.lock().unwrap() = context.clone();
            Ok(())
        }

        async fn latest_report(&self, _user: &UserId) -> Result<Option<Report>, BackendError> {
            self.report.clone()
        }

        async fn reset_memory(&self, request: &ResetRequest) -> Result<String, BackendError> {
            self.resets.lock().unwrap().push(request.clone());
            // Resetting reloads memory from the latest report.
            let reloaded = match &self.report {
                Ok(Some(report)) => report.context.clone(),
                _ => Context::empty(),
            };
            *self.held_context.lock().unwrap() = reloaded;
            Ok("Conversation reset successfully".into())
        }

        async fn classify_image(&self, _file: &SelectedFile) -> Result<Prediction, BackendError> {
            Ok(Prediction {
                label: "Wheat black rust".into(),
                details: String::new(),
            })
        }

        async fn transcribe(&self, _clip: &AudioClip) -> Result<Transcription, BackendError> {
            self.transcript.clone().map(|text| Transcription {
                text,
                detected_language: None,
                language_name: None,
            })
        }

        async fn chat(&self, prompt: &str) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.chat_fails {
                Err(BackendError::Request("connection refused".into()))
            } else {
                Ok(format!("re: {prompt}"))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn roster() -> Vec<Thread> {
        vec![
            Thread {
                id: ThreadId::from("a"),
                display_name: "Wheat".into(),
                messages: vec![],
                context: Context::from("C1"),
            },
            Thread {
                id: ThreadId::from("b"),
                display_name: "Rice".into(),
                messages: vec![Message::user("hi", None)],
                context: Context::from("C2"),
            },
        ]
    }

    fn controller_with(backend: MockBackend) -> (SessionController, Arc<MockBackend>, Arc<MockMicrophone>) {
        let backend = Arc::new(backend);
        let mic = Arc::new(MockMicrophone::with_secs(1.0));
        let controller = SessionController::new(
            &AppConfig::default(),
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&mic) as Arc<dyn AudioSource>,
        );
        (controller, backend, mic)
    }

    fn user() -> UserId {
        UserId::from("u1")
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn load_roster_activates_first_thread_and_pushes_context() {
        let (mut c, backend, _) = controller_with(MockBackend::new());

        let summaries = c.load_roster(&user()).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].message_count, 1);
        assert_eq!(c.state().active_thread(), Some(&ThreadId::from("a")));
        assert_eq!(c.state().context(), &Context::from("C1"));

        let events = c.settle().await;
        assert_eq!(events, vec![Event::ContextSynced]);
        assert_eq!(backend.pushed(), vec![Context::from("C1")]);
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn failed_roster_load_keeps_previous_roster() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.load_roster(&user()).await.unwrap();

        *backend.threads.lock().unwrap() = Err(BackendError::Timeout);
        let err = c.load_roster(&user()).await.unwrap_err();
        assert_eq!(err, ControllerError::RosterUnavailable(BackendError::Timeout));
        assert_eq!(c.state().roster().len(), 2);
        assert_eq!(c.state().active_thread(), Some(&ThreadId::from("a")));
    }

    #[tokio::test]
    async fn switch_scenario() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.load_roster(&user()).await.unwrap();

        c.switch_thread(&ThreadId::from("b")).unwrap();
        assert_eq!(c.state().history(), &[Message::user("hi", None)]);
        assert_eq!(c.state().context(), &Context::from("C2"));

        c.settle().await;
        // The backend ends up holding the displayed thread's context.
        assert_eq!(backend.pushed().last(), Some(&Context::from("C2")));
    }

    #[tokio::test]
    async fn switch_to_missing_thread_clears_history_without_panicking() {
        let (mut c, _, _) = controller_with(MockBackend::new());
        c.load_roster(&user()).await.unwrap();
        c.switch_thread(&ThreadId::from("b")).unwrap();

        let err = c.switch_thread(&ThreadId::from("gone")).unwrap_err();
        assert!(matches!(err, ControllerError::ThreadNotFound(_)));
        assert!(c.state().history().is_empty());
        c.settle().await;
    }

    #[tokio::test]
    async fn dispatch_round_trip() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.load_roster(&user()).await.unwrap();
        c.settle().await;

        c.set_text("rust on wheat?");
        assert!(c.dispatch());
        // The user message is visible before any reply arrives.
        assert_eq!(c.state().history(), &[Message::user("rust on wheat?", None)]);
        assert_eq!(c.state().buffer(), &CompositionBuffer::new());

        c.settle().await;
        assert_eq!(
            c.state().history(),
            &[
                Message::user("rust on wheat?", None),
                Message::assistant("re: rust on wheat?"),
            ]
        );
        assert_eq!(*backend.prompts.lock().unwrap(), vec!["rust on wheat?"]);
    }

    #[tokio::test]
    async fn empty_dispatch_is_noop() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.start_new_session(None);
        let before = c.state().history().to_vec();

        assert!(!c.dispatch());
        assert!(!c.is_busy());
        assert_eq!(c.state().history(), before.as_slice());
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn burst_of_dispatches_keeps_pairs_together() {
        let (mut c, _, _) = controller_with(MockBackend::new());
        c.start_new_session(None);

        for text in ["one", "two", "three"] {
            c.set_text(text);
            assert!(c.dispatch());
        }
        c.settle().await;

        let texts: Vec<_> = c.state().history().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            [
                "Hi, Annapoorna here! How may I help you?",
                "one",
                "re: one",
                "two",
                "re: two",
                "three",
                "re: three",
            ]
        );
    }

    #[tokio::test]
    async fn chat_failure_appends_apology() {
        let mut mock = MockBackend::new();
        mock.chat_fails = true;
        let (mut c, _, _) = controller_with(mock);
        c.start_new_session(None);
        let start = c.state().history().len();

        c.set_text("hello");
        c.dispatch();
        let events = c.settle().await;

        assert!(events.iter().any(|e| matches!(
            e,
            Event::Warning(ControllerError::Transport {
                capability: Capability::ChatReply,
                ..
            })
        )));
        assert_eq!(c.state().history().len(), start + 2);
        assert_eq!(
            c.state().history().last(),
            Some(&Message::assistant("Sorry, something went wrong."))
        );
    }

    #[tokio::test]
    async fn new_session_with_failing_report() {
        let mut mock = MockBackend::new();
        mock.report = Err(BackendError::Request("connection refused".into()));
        let (mut c, backend, _) = controller_with(mock);
        c.load_roster(&user()).await.unwrap();
        c.switch_thread(&ThreadId::from("b")).unwrap();
        c.set_text("half typed");

        c.start_new_session(Some(&user()));
        let events = c.settle().await;

        assert!(c.state().context().is_empty());
        assert_eq!(
            c.state().history(),
            &[Message::assistant("Hi, Annapoorna here! How may I help you?")]
        );
        assert_eq!(c.state().buffer(), &CompositionBuffer::new());
        assert!(events.contains(&Event::ContextAdopted { from_report: false }));

        // The reset still went out, carrying the conversation it replaced.
        let resets = backend.resets.lock().unwrap();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].messages, vec![Message::user("hi", None)]);
        assert_eq!(resets[0].context, Context::from("C2"));
    }

    #[tokio::test]
    async fn new_session_adopts_latest_report() {
        let mut mock = MockBackend::new();
        mock.report = Ok(Some(Report {
            context: Context::from("nitrogen low"),
            date: Some("2024-05-01".into()),
        }));
        let (mut c, _, _) = controller_with(mock);

        c.start_new_session(Some(&user()));
        let events = c.settle().await;
        assert_eq!(c.state().context(), &Context::from("nitrogen low"));
        assert!(events.contains(&Event::ContextAdopted { from_report: true }));
        assert!(events.contains(&Event::MemoryReset("Conversation reset successfully".into())));
    }

    #[tokio::test]
    async fn slow_push_cannot_overwrite_reset_context() {
        let mut mock = MockBackend::new();
        mock.push_delay = Duration::from_millis(80);
        mock.report = Ok(Some(Report {
            context: Context::from("REPORT"),
            date: None,
        }));
        let (mut c, backend, _) = controller_with(mock);
        c.load_roster(&user()).await.unwrap();
        c.switch_thread(&ThreadId::from("b")).unwrap();

        c.start_new_session(Some(&user()));
        c.settle().await;

        assert_eq!(c.state().context(), &Context::from("REPORT"));
        assert_eq!(backend.held_context(), Context::from("REPORT"));
        // The queued push of thread b never went out.
        assert!(!backend.pushed().contains(&Context::from("C2")));
    }

    #[tokio::test]
    async fn new_session_without_user_skips_backend() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.start_new_session(None);
        assert!(!c.is_busy());
        assert!(c.state().context().is_empty());
        assert!(backend.resets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn voice_capture_fills_buffer() {
        let (mut c, _, mic) = controller_with(MockBackend::new());
        c.set_text("typed");

        c.begin_capture().await.unwrap();
        assert_eq!(mic.live(), 1);
        c.end_capture().await.unwrap();
        assert_eq!(mic.live(), 0);
        assert_eq!(c.state().audio_state(), AudioState::Transcribing);

        let events = c.settle().await;
        assert_eq!(events, vec![Event::TranscriptApplied("spoken words".into())]);
        assert_eq!(c.state().buffer().text(), "spoken words");
        assert_eq!(c.state().audio_state(), AudioState::Idle);
    }

    #[tokio::test]
    async fn transcription_failure_is_not_fatal() {
        let mut mock = MockBackend::new();
        mock.transcript = Err(BackendError::Status {
            status: 500,
            message: "Transcription failed".into(),
        });
        let (mut c, _, _) = controller_with(mock);
        c.set_text("typed");

        c.begin_capture().await.unwrap();
        c.end_capture().await.unwrap();
        let events = c.settle().await;

        assert!(matches!(events.as_slice(), [Event::Warning(_)]));
        assert_eq!(c.state().buffer().text(), "typed");
        // A new capture can start right away.
        c.begin_capture().await.unwrap();
        c.cancel_capture().await.unwrap();
    }

    #[tokio::test]
    async fn device_open_and_release_stay_off_the_runtime_thread() {
        let (mut c, _, mic) = controller_with(MockBackend::new());
        let runtime_thread = std::thread::current().id();

        c.begin_capture().await.unwrap();
        c.end_capture().await.unwrap();
        c.settle().await;
        c.begin_capture().await.unwrap();
        c.cancel_capture().await.unwrap();

        let device_threads = mic.device_threads();
        assert_eq!(device_threads.len(), 4);
        assert!(device_threads.iter().all(|t| *t != runtime_thread));
        assert_eq!(mic.live(), 0);
    }

    #[tokio::test]
    async fn end_capture_while_idle_is_rejected() {
        let (mut c, _, mic) = controller_with(MockBackend::new());
        assert!(matches!(
            c.end_capture().await,
            Err(ControllerError::InvalidState { .. })
        ));
        assert!(!c.is_busy());
        assert_eq!(mic.live(), 0);
    }

    #[tokio::test]
    async fn image_upload_attaches_prediction() {
        let (mut c, _, _) = controller_with(MockBackend::new());
        let file = SelectedFile::from_bytes("leaf.png", "image/png", vec![1, 2, 3]);

        c.select_file(Some(file.clone())).unwrap();
        assert_eq!(c.state().image_state(), ImageState::Uploading);
        assert!(c.select_file(Some(file)).is_err());

        c.settle().await;
        assert_eq!(c.state().image_state(), ImageState::Idle);
        let attachment = c.state().buffer().attachment().unwrap();
        assert_eq!(attachment.image.as_str(), "upload://leaf.png");
        assert_eq!(
            attachment.prediction.as_ref().map(|p| p.label.as_str()),
            Some("Wheat black rust")
        );
    }

    #[tokio::test]
    async fn refresh_thread_replaces_roster_entry() {
        let (mut c, backend, _) = controller_with(MockBackend::new());
        c.load_roster(&user()).await.unwrap();

        let mut updated = roster();
        updated[1].messages.push(Message::assistant("hello"));
        *backend.threads.lock().unwrap() = Ok(updated);

        c.refresh_thread(&ThreadId::from("b")).await.unwrap();
        let thread = c.state().roster().get(&ThreadId::from("b")).unwrap();
        assert_eq!(thread.messages.len(), 2);

        let err = c.refresh_thread(&ThreadId::from("zzz")).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Transport {
                capability: Capability::FetchThread,
                ..
            }
        ));
    }
}
