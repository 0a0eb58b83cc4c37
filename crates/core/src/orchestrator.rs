//! Session Orchestrator
//!
//! Drives one interview session end to end: connect to the room, wait for
//! the candidate, assemble the agent and its speech pipeline, wire metrics
//! into the usage collector, and start the session. The greeting is issued by
//! the agent's `on_enter` hook once the runtime reports the session started.
//!
//! Only the setup stages are fatal. Everything that happens once the session
//! runs (metadata that does not parse, metrics that do not add up, a handler
//! that panics) is logged and the session carries on.

use crate::agent::{AgentConfiguration, InterviewAssistant};
use crate::context::parse_room_metadata;
use crate::events::{EventKind, SessionEvent};
use crate::metrics::{UsageCollector, UsageSummary, log_metrics};
use crate::prewarm::PrewarmError;
use crate::providers::ProviderSelection;
use crate::runtime::{
    AgentSession, AutoSubscribe, JobContext, Participant, Room, RoomInputOptions, SessionError,
    SessionOptions, TransportError,
};
use crate::session::{InvalidTransition, SessionState};
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Bounded exponential backoff around network-facing setup calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `failed_attempts + 1`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub session: SessionOptions,
    pub providers: ProviderSelection,
    pub room_input: RoomInputOptions,
    /// How long to wait for a candidate to join before giving up on the job.
    pub participant_timeout: Duration,
    /// How long a job may wait for prewarm to publish the shared resources.
    pub prewarm_wait: Duration,
    pub connect_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            providers: ProviderSelection::default(),
            room_input: RoomInputOptions::default(),
            participant_timeout: Duration::from_secs(120),
            prewarm_wait: Duration::from_secs(10),
            connect_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntrypointError {
    #[error("prewarmed resources are unavailable")]
    Prewarm(#[from] PrewarmError),
    #[error("failed to connect to room `{room}` after {attempts} attempt(s)")]
    Connection {
        room: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("no participant joined room `{room}` within {timeout:?}")]
    ParticipantTimeout { room: String, timeout: Duration },
    #[error("failed while waiting for a participant in room `{room}`")]
    Participant {
        room: String,
        #[source]
        source: TransportError,
    },
    #[error("the runtime refused to start the session")]
    Start(#[source] SessionError),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Drives a single session. Create one per job.
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    state: Arc<watch::Sender<SessionState>>,
}

impl SessionOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            state: Arc::new(watch::channel(SessionState::Created).0),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs the setup stages and starts the session.
    ///
    /// Returns once the session is active; the session itself keeps running in
    /// the runtime until it emits `Close`.
    #[instrument(name = "entrypoint", skip_all, fields(room = %ctx.room.name()))]
    pub async fn entrypoint(&self, ctx: &JobContext) -> Result<ActiveSession, EntrypointError> {
        let room_name = ctx.room.name();

        advance(&self.state, SessionState::Connecting)?;
        let vad = ctx
            .proc
            .vad(self.config.prewarm_wait)
            .await
            .map_err(|e| self.fail(e.into()))?;

        info!("Connecting to room {room_name}");
        self.connect(ctx.room.as_ref())
            .await
            .map_err(|e| self.fail(e))?;

        advance(&self.state, SessionState::AwaitingParticipant)?;
        let participant = self.wait_for_participant(ctx.room.as_ref()).await?;
        info!(
            participant = %participant.identity,
            "Starting voice assistant for participant"
        );

        advance(&self.state, SessionState::Configuring)?;
        let context = parse_room_metadata(ctx.room.metadata().as_deref());
        let agent = Arc::new(InterviewAssistant::new(AgentConfiguration::new(
            self.config.providers.clone(),
            context,
        )));

        let usage = Arc::new(Mutex::new(UsageCollector::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let session = ctx.sessions.create_session(vad, self.config.session);
        session
            .events()
            .subscribe(EventKind::MetricsCollected, metrics_handler(usage.clone()));
        session.events().subscribe(
            EventKind::Close,
            close_handler(self.state.clone(), closed.clone(), usage.clone()),
        );

        session
            .start(
                ctx.room.clone(),
                agent.clone(),
                self.config.room_input.clone(),
            )
            .await
            .map_err(|e| self.fail(EntrypointError::Start(e)))?;
        advance(&self.state, SessionState::Active)?;

        // The runtime may close the session while `start` is still running.
        if closed.load(Ordering::SeqCst) {
            mark_ended(&self.state, &usage);
        }

        Ok(ActiveSession {
            session,
            agent,
            participant,
            usage,
            state: self.state.subscribe(),
        })
    }

    async fn connect(&self, room: &dyn Room) -> Result<(), EntrypointError> {
        let policy = self.config.connect_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match room.connect(AutoSubscribe::AudioOnly).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(attempt, max_attempts, ?delay, error = %e, "Connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(EntrypointError::Connection {
                        room: room.name(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    async fn wait_for_participant(&self, room: &dyn Room) -> Result<Participant, EntrypointError> {
        let timeout = self.config.participant_timeout;
        match tokio::time::timeout(timeout, room.wait_for_participant()).await {
            Ok(Ok(participant)) => Ok(participant),
            Ok(Err(source)) => Err(self.fail(EntrypointError::Participant {
                room: room.name(),
                source,
            })),
            Err(_) => Err(self.fail(EntrypointError::ParticipantTimeout {
                room: room.name(),
                timeout,
            })),
        }
    }

    /// Logs a fatal setup error with its cause chain and marks the session failed.
    fn fail(&self, err: EntrypointError) -> EntrypointError {
        error!(error = %err, cause = %error_chain(&err), "Error during entrypoint setup");
        if let Err(e) = advance(&self.state, SessionState::Failed) {
            warn!(error = %e, "Could not mark session as failed");
        }
        err
    }
}

/// A started session, returned to the worker that owns the job.
pub struct ActiveSession {
    session: Arc<dyn AgentSession>,
    agent: Arc<InterviewAssistant>,
    participant: Participant,
    usage: Arc<Mutex<UsageCollector>>,
    state: watch::Receiver<SessionState>,
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("participant", &self.participant)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ActiveSession {
    pub fn session(&self) -> &Arc<dyn AgentSession> {
        &self.session
    }

    pub fn agent(&self) -> &InterviewAssistant {
        &self.agent
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn usage(&self) -> UsageSummary {
        self.usage.lock().summary()
    }

    /// Waits for the session to end and returns its usage totals.
    pub async fn closed(&mut self) -> UsageSummary {
        while !self.state.borrow_and_update().is_terminal() {
            if self.state.changed().await.is_err() {
                break;
            }
        }
        self.usage()
    }
}

fn advance(
    state: &watch::Sender<SessionState>,
    next: SessionState,
) -> Result<(), InvalidTransition> {
    let mut result = Ok(());
    state.send_if_modified(|current| match current.transition(next) {
        Ok(next) => {
            *current = next;
            true
        }
        Err(e) => {
            result = Err(e);
            false
        }
    });
    if result.is_ok() {
        info!(state = %next, "Session state changed");
    }
    result
}

fn mark_ended(state: &watch::Sender<SessionState>, usage: &Mutex<UsageCollector>) {
    if advance(state, SessionState::Ended).is_ok() {
        let summary = usage.lock().summary();
        info!(
            llm_prompt_tokens = summary.llm_prompt_tokens,
            llm_prompt_cached_tokens = summary.llm_prompt_cached_tokens,
            llm_completion_tokens = summary.llm_completion_tokens,
            tts_characters_count = summary.tts_characters_count,
            tts_audio_duration = ?summary.tts_audio_duration,
            stt_audio_duration = ?summary.stt_audio_duration,
            "Usage summary"
        );
    }
}

fn metrics_handler(
    usage: Arc<Mutex<UsageCollector>>,
) -> impl Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static {
    move |event: &SessionEvent| {
        if let SessionEvent::MetricsCollected(metrics) = event {
            log_metrics(metrics);
            usage.lock().collect(metrics)?;
        }
        Ok(())
    }
}

fn close_handler(
    state: Arc<watch::Sender<SessionState>>,
    closed: Arc<AtomicBool>,
    usage: Arc<Mutex<UsageCollector>>,
) -> impl Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static {
    move |event: &SessionEvent| {
        if let SessionEvent::Close(reason) = event {
            info!(?reason, "Session closed");
            closed.store(true, Ordering::SeqCst);
            if *state.borrow() == SessionState::Active {
                mark_ended(&state, &usage);
            }
        }
        Ok(())
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
