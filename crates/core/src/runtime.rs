//! Contracts of the session runtime.
//!
//! The room transport and the speech pipeline (audio subscription,
//! endpointing, STT → LLM → TTS streaming) are provided by a runtime. The
//! orchestrator only drives them through these traits, which keeps sessions
//! testable with in-memory fakes and lets several runtimes coexist.

use crate::agent::Agent;
use crate::events::EventBus;
use crate::prewarm::{JobProcess, SharedVad};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Which remote tracks the agent subscribes to when it joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSubscribe {
    SubscribeAll,
    SubscribeNone,
    AudioOnly,
    VideoOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("room server unreachable: {0}")]
    Unreachable(String),
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("disconnected from room: {0}")]
    Disconnected(String),
    #[error("subscription mode {0:?} is not supported by this transport")]
    UnsupportedSubscription(AutoSubscribe),
}

impl TransportError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Disconnected(_)
        )
    }
}

/// The real-time room a job is bound to.
#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> String;

    /// Raw metadata attached to the room by its creator.
    fn metadata(&self) -> Option<String>;

    async fn connect(&self, subscribe: AutoSubscribe) -> Result<(), TransportError>;

    /// Resolves once a remote participant is present in the room.
    async fn wait_for_participant(&self) -> Result<Participant, TransportError>;
}

/// Turn-taking timing of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Wait before ending a turn when the turn detector thinks the user is done.
    pub min_endpointing_delay: Duration,
    /// Upper bound on the wait when the turn detector thinks the user is not done.
    pub max_endpointing_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            min_endpointing_delay: Duration::from_millis(500),
            max_endpointing_delay: Duration::from_secs(5),
        }
    }
}

/// How participant audio is fed into the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInputOptions {
    pub audio_enabled: bool,
    pub noise_cancellation: bool,
    /// Input device for runtimes that capture local audio. `None` means the
    /// runtime default.
    pub audio_input_device: Option<usize>,
    pub close_on_disconnect: bool,
}

impl Default for RoomInputOptions {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            noise_cancellation: false,
            audio_input_device: None,
            close_on_disconnect: true,
        }
    }
}

/// A request for the agent to say something.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRequest {
    /// Extra instructions for this reply only.
    pub instructions: Option<String>,
    /// User text to answer, when the reply is not driven by the transcript.
    pub user_input: Option<String>,
    pub allow_interruptions: bool,
}

impl ReplyRequest {
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            user_input: None,
            allow_interruptions: true,
        }
    }

    pub fn allow_interruptions(mut self, allow: bool) -> Self {
        self.allow_interruptions = allow;
        self
    }
}

/// Handle to one queued or playing utterance.
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    id: u64,
    allow_interruptions: bool,
    interrupted: Arc<AtomicBool>,
}

impl SpeechHandle {
    pub fn new(id: u64, allow_interruptions: bool) -> Self {
        Self {
            id,
            allow_interruptions,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn allows_interruptions(&self) -> bool {
        self.allow_interruptions
    }

    /// Barge-in: stops playback of this utterance.
    pub fn interrupt(&self) -> Result<(), SessionError> {
        if !self.allow_interruptions {
            return Err(SessionError::NotInterruptible(self.id));
        }
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session has not been started")]
    NotStarted,
    #[error("session was already started")]
    AlreadyStarted,
    #[error("speech {0} does not allow interruptions")]
    NotInterruptible(u64),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("reply generation failed")]
    Generation(#[source] anyhow::Error),
}

/// A running speech pipeline bound to one room and one agent.
#[async_trait]
pub trait AgentSession: Send + Sync {
    fn options(&self) -> SessionOptions;

    fn events(&self) -> &EventBus;

    /// Starts the pipeline. The runtime calls [`Agent::on_enter`] once setup
    /// completes.
    async fn start(
        &self,
        room: Arc<dyn Room>,
        agent: Arc<dyn Agent>,
        input: RoomInputOptions,
    ) -> Result<(), SessionError>;

    async fn generate_reply(&self, request: ReplyRequest) -> Result<SpeechHandle, SessionError>;
}

/// Builds sessions for a runtime.
pub trait SessionFactory: Send + Sync {
    fn create_session(&self, vad: SharedVad, options: SessionOptions) -> Arc<dyn AgentSession>;
}

/// Everything a job entrypoint gets from the hosting worker.
#[derive(Clone)]
pub struct JobContext {
    pub room: Arc<dyn Room>,
    pub proc: Arc<JobProcess>,
    pub sessions: Arc<dyn SessionFactory>,
}
