//! The controller's owned state and its synchronous transitions.
//!
//! [`SessionState`] never performs I/O.  Every operation mutates the state
//! in place and returns the backend work it needs as [`Effect`]s; the
//! results come back as [`Completion`]s through [`SessionState::apply`],
//! which yields [`Event`]s for the front end.
//!
//! # Generations
//!
//! The session generation is bumped whenever the displayed conversation is
//! replaced (`switch_thread`, `start_new_session`).  Captures remember the
//! generation they started in; a transcript or prediction that resolves
//! after the generation moved on is discarded, while the pipeline itself
//! still returns to `Idle`.  Chat replies are not generation-checked: they
//! are routed to the conversation that produced them.

use std::sync::Arc;

use crate::audio::{AudioClip, AudioSource};
use crate::backend::{BackendError, Capability, Prediction, Report, ResetRequest, Transcription};
use crate::capture::{AudioPipeline, AudioState, ImagePipeline, ImageState, SelectedFile};
use crate::compose::{place_reply, Attachment, CompositionBuffer, DispatchLanes, LaneKey, Turn};
use crate::config::{AppConfig, ChatConfig};

use super::error::ControllerError;
use super::model::{Context, ImageRef, Message, Thread, ThreadId, ThreadSummary, UserId};
use super::store::SessionStore;

// ---------------------------------------------------------------------------
// Effects, completions, events
// ---------------------------------------------------------------------------

/// Backend work requested by a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PushContext(Context),
    Chat {
        lane: LaneKey,
        prompt: String,
    },
    /// Fetch the user's latest report, then reset the backend memory with
    /// the archived conversation.
    Renew {
        generation: u64,
        audit: ResetRequest,
    },
    Transcribe(AudioClip),
    Classify(SelectedFile),
}

/// Result of an [`Effect`], fed back through [`SessionState::apply`].
#[derive(Debug)]
pub enum Completion {
    ContextPushed(Result<(), BackendError>),
    Reply {
        lane: LaneKey,
        result: Result<String, BackendError>,
    },
    Report {
        generation: u64,
        result: Result<Option<Report>, BackendError>,
    },
    ResetAcked {
        generation: u64,
        result: Result<String, BackendError>,
    },
    Transcribed(Result<Transcription, BackendError>),
    Classified(Result<Prediction, BackendError>),
}

/// Something the front end may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The backend acknowledged a context push.
    ContextSynced,
    /// A reply (or the apology) was placed after its user message.
    ReplyPlaced { lane: LaneKey, visible: bool },
    /// The new session's context is settled.
    ContextAdopted { from_report: bool },
    /// The backend cleared its memory.
    MemoryReset(String),
    TranscriptApplied(String),
    AttachmentReady(Attachment),
    /// A capture result arrived after the session moved on.
    StaleDiscarded(&'static str),
    /// A non-fatal failure; prior state or a fallback is in place.
    Warning(ControllerError),
}

/// What [`SessionState::apply`] produced.
#[derive(Debug, Default)]
pub struct Applied {
    pub events: Vec<Event>,
    pub effects: Vec<Effect>,
}

// ---------------------------------------------------------------------------
// ContextSync
// ---------------------------------------------------------------------------

/// Keeps at most one context push in flight; the latest request wins.
#[derive(Debug, Default)]
struct ContextSync {
    in_flight: bool,
    pending: Option<Context>,
    /// Generation of the memory reset the backend has not acknowledged yet.
    reset: Option<u64>,
    /// A push was on the wire while that reset was outstanding, so it may
    /// land after the reset and replace the context the reset installed.
    overtaken: bool,
}

impl ContextSync {
    fn request(&mut self, context: Context) -> Option<Effect> {
        if self.in_flight {
            self.pending = Some(context);
            None
        } else {
            Some(self.push(context))
        }
    }

    fn settle(&mut self) -> Option<Effect> {
        self.in_flight = false;
        let next = self.pending.take()?;
        Some(self.push(next))
    }

    fn push(&mut self, context: Context) -> Effect {
        self.in_flight = true;
        self.overtaken |= self.reset.is_some();
        Effect::PushContext(context)
    }

    /// A reset for `generation` is about to reload the backend's context.
    /// Queued pushes belong to the previous session and are dropped.
    fn begin_reset(&mut self, generation: u64) {
        self.pending = None;
        self.reset = Some(generation);
        self.overtaken = self.in_flight;
    }

    /// The reset for `generation` was acknowledged.  Returns `true` when a
    /// push may have landed after it.
    fn reset_landed(&mut self, generation: u64) -> bool {
        if self.reset != Some(generation) {
            return false;
        }
        self.reset = None;
        std::mem::take(&mut self.overtaken)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

pub struct SessionState {
    chat: ChatConfig,
    roster: SessionStore,
    active: Option<ThreadId>,
    /// Conversation currently displayed.
    lane: LaneKey,
    history: Vec<Message>,
    context: Context,
    generation: u64,
    buffer: CompositionBuffer,
    lanes: DispatchLanes,
    sync: ContextSync,
    audio: AudioPipeline,
    image: ImagePipeline,
}

impl SessionState {
    pub fn new(config: &AppConfig, source: Arc<dyn AudioSource>) -> Self {
        Self {
            chat: config.chat.clone(),
            roster: SessionStore::new(),
            active: None,
            lane: LaneKey::Draft(0),
            history: Vec::new(),
            context: Context::empty(),
            generation: 0,
            buffer: CompositionBuffer::new(),
            lanes: DispatchLanes::new(),
            sync: ContextSync::default(),
            audio: AudioPipeline::new(
                source,
                config.audio.target_sample_rate,
                config.audio.min_recording_secs,
            ),
            image: ImagePipeline::new(),
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn roster(&self) -> &SessionStore {
        &self.roster
    }

    pub fn summaries(&self) -> Vec<ThreadSummary> {
        self.roster.summaries()
    }

    pub fn active_thread(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    pub fn lane(&self) -> &LaneKey {
        &self.lane
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer(&self) -> &CompositionBuffer {
        &self.buffer
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio.state()
    }

    pub fn image_state(&self) -> ImageState {
        self.image.state()
    }

    /// Local preview of the image being uploaded.
    pub fn upload_preview(&self) -> Option<&ImageRef> {
        self.image.preview()
    }

    /// Chat replies still outstanding for the displayed conversation.
    pub fn awaiting_replies(&self) -> usize {
        self.lanes.awaiting(&self.lane)
    }

    // -- roster ------------------------------------------------------------

    /// Replace the roster.  Returns the thread to switch to when none is
    /// active yet.
    pub fn replace_roster(&mut self, threads: Vec<Thread>) -> Option<ThreadId> {
        self.roster.replace(threads);
        match self.active {
            Some(_) => None,
            None => self.roster.first().map(|t| t.id.clone()),
        }
    }

    pub fn upsert_thread(&mut self, thread: Thread) {
        self.roster.upsert(thread);
    }

    // -- session -----------------------------------------------------------

    /// Display `id` and adopt its context.  An unknown id clears the visible
    /// history instead of leaving the previous thread on screen.
    pub fn switch_thread(&mut self, id: &ThreadId) -> Result<Vec<Effect>, ControllerError> {
        self.generation += 1;

        let Some(thread) = self.roster.get(id) else {
            self.history.clear();
            self.active = None;
            self.lane = LaneKey::Draft(self.generation);
            return Err(ControllerError::ThreadNotFound(id.clone()));
        };

        self.history = thread.messages.clone();
        self.context = thread.context.clone();
        self.active = Some(id.clone());
        self.lane = LaneKey::Thread(id.clone());
        log::info!(
            "session: switched to {id} ({} messages, {} bytes of context)",
            self.history.len(),
            self.context.len()
        );

        Ok(self.sync.request(self.context.clone()).into_iter().collect())
    }

    /// Show the greeting in a fresh unsaved conversation and clear the
    /// buffer.  With a user, the discarded conversation is archived and the
    /// latest report becomes the new context once it arrives.
    pub fn start_new_session(&mut self, user: Option<&UserId>) -> Vec<Effect> {
        let greeting = Message::assistant(self.chat.greeting.as_str());
        let messages = std::mem::replace(&mut self.history, vec![greeting]);
        let context = std::mem::take(&mut self.context);
        self.buffer.clear();
        self.active = None;
        self.generation += 1;
        self.lane = LaneKey::Draft(self.generation);
        log::info!("session: new session (generation {})", self.generation);

        match user {
            Some(user) => {
                self.sync.begin_reset(self.generation);
                vec![Effect::Renew {
                    generation: self.generation,
                    audit: ResetRequest {
                        user_id: user.clone(),
                        messages,
                        context,
                    },
                }]
            }
            None => Vec::new(),
        }
    }

    // -- composition & dispatch --------------------------------------------

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.buffer.set_text(text);
    }

    /// Send the buffer.  Returns `None` (and changes nothing) when the
    /// buffer holds nothing sendable.
    pub fn dispatch(&mut self) -> Option<Vec<Effect>> {
        let draft = self.buffer.take()?;
        let prompt = if draft.text.is_empty() {
            self.chat.attachment_prompt.clone()
        } else {
            draft.text.clone()
        };
        let user = Message::user(draft.text, draft.attachment.map(|a| a.image));

        self.history.push(user.clone());
        if let LaneKey::Thread(id) = &self.lane {
            if let Some(messages) = self.roster.messages_mut(id) {
                messages.push(user.clone());
            }
        }

        let lane = self.lane.clone();
        let send_now = self.lanes.enqueue(lane.clone(), Turn { prompt, user });
        Some(
            send_now
                .map(|turn| Effect::Chat {
                    lane,
                    prompt: turn.prompt,
                })
                .into_iter()
                .collect(),
        )
    }

    // -- capture -----------------------------------------------------------

    /// The voice pipeline.  Opening and releasing the device block, so the
    /// controller drives these transitions around the blocking pool.
    pub(crate) fn audio_mut(&mut self) -> &mut AudioPipeline {
        &mut self.audio
    }

    pub fn select_file(
        &mut self,
        file: Option<SelectedFile>,
    ) -> Result<Vec<Effect>, ControllerError> {
        let job = self.image.select(file, self.generation)?;
        Ok(job.map(|job| Effect::Classify(job.file)).into_iter().collect())
    }

    // -- completions -------------------------------------------------------

    pub fn apply(&mut self, completion: Completion) -> Applied {
        let mut out = Applied::default();
        match completion {
            Completion::ContextPushed(result) => {
                match result {
                    Ok(()) => out.events.push(Event::ContextSynced),
                    Err(e) => out.events.push(transport_warning(Capability::PushContext, e)),
                }
                out.effects.extend(self.sync.settle());
            }
            Completion::Reply { lane, result } => self.apply_reply(lane, result, &mut out),
            Completion::Report { generation, result } => {
                self.apply_report(generation, result, &mut out)
            }
            Completion::ResetAcked { generation, result } => {
                match result {
                    Ok(message) => out.events.push(Event::MemoryReset(message)),
                    Err(e) => out.events.push(transport_warning(Capability::ResetMemory, e)),
                }
                // The reset reloads the backend's context; bring it back in
                // line with what is displayed if the user has moved on or an
                // older push may have overwritten it.
                let overtaken = self.sync.reset_landed(generation);
                if generation != self.generation || overtaken {
                    out.effects.extend(self.sync.request(self.context.clone()));
                }
            }
            Completion::Transcribed(result) => self.apply_transcript(result, &mut out),
            Completion::Classified(result) => self.apply_prediction(result, &mut out),
        }
        out
    }

    fn apply_reply(
        &mut self,
        lane: LaneKey,
        result: Result<String, BackendError>,
        out: &mut Applied,
    ) {
        let text = match result {
            Ok(text) => text,
            Err(e) => {
                out.events.push(transport_warning(Capability::ChatReply, e));
                self.chat.apology.clone()
            }
        };
        let Some(resolved) = self.lanes.resolve(&lane) else {
            log::warn!("session: reply for {lane:?} with nothing in flight");
            return;
        };
        let reply = Message::assistant(text);

        if let LaneKey::Thread(id) = &lane {
            if let Some(messages) = self.roster.messages_mut(id) {
                if !place_reply(messages, &resolved, &reply) {
                    log::debug!("session: roster copy of {id} was replaced, reply not mirrored");
                }
            }
        }
        let visible = self.lane == lane && place_reply(&mut self.history, &resolved, &reply);
        if !visible && self.lane == lane {
            log::warn!("session: displayed history no longer holds the user message");
        }
        out.events.push(Event::ReplyPlaced {
            lane: lane.clone(),
            visible,
        });

        if let Some(next) = resolved.next {
            out.effects.push(Effect::Chat {
                lane,
                prompt: next.prompt,
            });
        }
    }

    fn apply_report(
        &mut self,
        generation: u64,
        result: Result<Option<Report>, BackendError>,
        out: &mut Applied,
    ) {
        if generation != self.generation {
            log::debug!("session: report for generation {generation} arrived late");
            out.events.push(Event::StaleDiscarded("report"));
            return;
        }
        let from_report = match result {
            Ok(Some(report)) => {
                log::info!(
                    "session: adopted report dated {}",
                    report.date.as_deref().unwrap_or("unknown")
                );
                self.context = report.context;
                true
            }
            Ok(None) => {
                self.context = Context::empty();
                false
            }
            Err(e) => {
                out.events.push(transport_warning(Capability::LatestReport, e));
                self.context = Context::empty();
                false
            }
        };
        out.events.push(Event::ContextAdopted { from_report });
    }

    fn apply_transcript(&mut self, result: Result<Transcription, BackendError>, out: &mut Applied) {
        let Some(generation) = self.audio.complete() else {
            log::warn!("session: transcription with no recording pending");
            return;
        };
        match result {
            Err(e) => out.events.push(transport_warning(Capability::Transcribe, e)),
            Ok(_) if generation != self.generation => {
                out.events.push(Event::StaleDiscarded("transcript"))
            }
            Ok(t) if t.text.is_empty() => log::info!("session: transcription was empty"),
            Ok(t) => {
                self.buffer.set_text(t.text.clone());
                out.events.push(Event::TranscriptApplied(t.text));
            }
        }
    }

    fn apply_prediction(&mut self, result: Result<Prediction, BackendError>, out: &mut Applied) {
        let Some(upload) = self.image.finish() else {
            log::warn!("session: prediction with no upload pending");
            return;
        };
        let prediction = match result {
            Ok(p) => Some(p),
            Err(e) => {
                out.events.push(transport_warning(Capability::ClassifyImage, e));
                None
            }
        };
        if upload.generation != self.generation {
            out.events.push(Event::StaleDiscarded("image"));
            return;
        }
        let attachment = Attachment::new(upload.preview, prediction);
        self.buffer.attach(attachment.clone());
        out.events.push(Event::AttachmentReady(attachment));
    }
}

fn transport_warning(capability: Capability, source: BackendError) -> Event {
    log::warn!("session: {capability} failed: {source}");
    Event::Warning(ControllerError::transport(capability, source))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
