//! In-memory fakes shared by the unit tests.

use crate::agent::Agent;
use crate::events::EventBus;
use crate::prewarm::SharedVad;
use crate::runtime::{
    AgentSession, ReplyRequest, Room, RoomInputOptions, SessionError, SessionFactory,
    SessionOptions, SpeechHandle, TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Session that records what the orchestrator and the agent ask of it.
#[derive(Default)]
pub struct RecordingSession {
    pub options: SessionOptions,
    pub vad: Option<SharedVad>,
    events: EventBus,
    calls: Mutex<Vec<&'static str>>,
    requests: Mutex<Vec<ReplyRequest>>,
    handles: Mutex<Vec<SpeechHandle>>,
    input: Mutex<Option<RoomInputOptions>>,
    fail_start: bool,
    fail_replies: bool,
    next_id: AtomicU64,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_replies() -> Self {
        Self {
            fail_replies: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().clone()
    }

    pub fn handles(&self) -> Vec<SpeechHandle> {
        self.handles.lock().clone()
    }

    pub fn input(&self) -> Option<RoomInputOptions> {
        self.input.lock().clone()
    }
}

#[async_trait]
impl AgentSession for RecordingSession {
    fn options(&self) -> SessionOptions {
        self.options
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn start(
        &self,
        _room: Arc<dyn Room>,
        agent: Arc<dyn Agent>,
        input: RoomInputOptions,
    ) -> Result<(), SessionError> {
        if self.fail_start {
            return Err(TransportError::Disconnected("media track closed".into()).into());
        }
        self.calls.lock().push("start");
        *self.input.lock() = Some(input);

        self.calls.lock().push("on_enter");
        if let Err(e) = agent.on_enter(self).await {
            tracing::warn!(error = ?e, "on_enter failed");
        }
        Ok(())
    }

    async fn generate_reply(&self, request: ReplyRequest) -> Result<SpeechHandle, SessionError> {
        self.calls.lock().push("generate_reply");
        if self.fail_replies {
            return Err(SessionError::Generation(anyhow::anyhow!("llm offline")));
        }
        let handle = SpeechHandle::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            request.allow_interruptions,
        );
        self.requests.lock().push(request);
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }
}

/// Factory that hands out [`RecordingSession`]s and keeps them for inspection.
#[derive(Default)]
pub struct RecordingFactory {
    pub fail_start: bool,
    sessions: Mutex<Vec<Arc<RecordingSession>>>,
}

impl RecordingFactory {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn last(&self) -> Arc<RecordingSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session was created")
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl SessionFactory for RecordingFactory {
    fn create_session(&self, vad: SharedVad, options: SessionOptions) -> Arc<dyn AgentSession> {
        let session = Arc::new(RecordingSession {
            options,
            vad: Some(vad),
            fail_start: self.fail_start,
            ..RecordingSession::default()
        });
        self.sessions.lock().push(session.clone());
        session
    }
}

/// Layer that keeps every log record as `(level, rendered fields)`.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<(Level, String)>>>);

impl LogCapture {
    pub fn records(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

struct Render(String);

impl Visit for Render {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut render = Render(String::new());
        event.record(&mut render);
        self.0.lock().push((*event.metadata().level(), render.0));
    }
}
