//! Console runtime
//!
//! A [`Room`] and [`AgentSession`] pair that runs an interview in the
//! terminal. Each line read from the input is treated as a final transcript
//! from the local participant, the agent's replies are written to the output,
//! and end of input closes the session. Metrics are reported the way a voice
//! pipeline would report them, with audio durations estimated from the text.
//!
//! Text is written in one piece, so there is no barge-in: interrupting a
//! [`SpeechHandle`] has no effect on console output.

use async_trait::async_trait;
use interviewer_core::agent::Agent;
use interviewer_core::events::{AgentActivity, CloseReason, EventBus, SessionEvent};
use interviewer_core::llm_client::{ChatMessage, LanguageModel};
use interviewer_core::metrics::{AgentMetrics, EouMetrics, LlmMetrics, SttMetrics, TtsMetrics};
use interviewer_core::prewarm::SharedVad;
use interviewer_core::runtime::{
    AgentSession, AutoSubscribe, Participant, ReplyRequest, Room, RoomInputOptions, SessionError,
    SessionFactory, SessionOptions, SpeechHandle, TransportError,
};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Speaker label given to the local participant.
pub const CONSOLE_SPEAKER: &str = "S1";

/// Average speaking rate used to estimate audio durations from text.
const WORDS_PER_SECOND: f64 = 2.5;

/// Lines typed by the participant. A closed channel is end of input.
pub type ConsoleInput = mpsc::Receiver<io::Result<String>>;
pub type ConsoleOutput = Box<dyn AsyncWrite + Send + Unpin>;

const INPUT_BUFFER: usize = 16;

/// Lines from stdin.
///
/// Reads happen on a detached thread, so a read still pending at shutdown
/// neither blocks the runtime nor keeps the process alive.
pub fn stdin_lines() -> ConsoleInput {
    thread_lines(io::stdin())
}

/// Lines from a blocking reader, read on a dedicated thread.
pub fn thread_lines<R: io::Read + Send + 'static>(reader: R) -> ConsoleInput {
    use std::io::BufRead as _;

    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in io::BufReader::new(reader).lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start console input thread");
    }
    rx
}

/// Lines from an async reader, read on a runtime task.
pub fn reader_lines<R: AsyncBufRead + Send + Unpin + 'static>(reader: R) -> ConsoleInput {
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);
    tokio::spawn(async move {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.transpose() {
            let failed = line.is_err();
            if tx.send(line).await.is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// The terminal seen as a room with exactly one remote participant.
pub struct ConsoleRoom {
    name: String,
    metadata: Option<String>,
    participant: Participant,
    connected: AtomicBool,
}

impl ConsoleRoom {
    pub fn new(name: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            participant: Participant {
                identity: participant.into(),
                name: None,
            },
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl Room for ConsoleRoom {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn metadata(&self) -> Option<String> {
        self.metadata.clone()
    }

    async fn connect(&self, subscribe: AutoSubscribe) -> Result<(), TransportError> {
        match subscribe {
            AutoSubscribe::AudioOnly | AutoSubscribe::SubscribeAll => {
                self.connected.store(true, Ordering::SeqCst);
                debug!(room = %self.name, ?subscribe, "Console room connected");
                Ok(())
            }
            other => Err(TransportError::UnsupportedSubscription(other)),
        }
    }

    async fn wait_for_participant(&self) -> Result<Participant, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected(
                "console room is not connected".to_string(),
            ));
        }
        Ok(self.participant.clone())
    }
}

/// Creates one [`ConsoleSession`] per job.
///
/// The first session gets the injected input and output, if any; later
/// sessions fall back to stdin and stdout.
pub struct ConsoleSessionFactory {
    llm: Arc<dyn LanguageModel>,
    io: Mutex<Option<(ConsoleInput, ConsoleOutput)>>,
}

impl ConsoleSessionFactory {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            io: Mutex::new(None),
        }
    }

    pub fn with_io(llm: Arc<dyn LanguageModel>, input: ConsoleInput, output: ConsoleOutput) -> Self {
        Self {
            llm,
            io: Mutex::new(Some((input, output))),
        }
    }
}

impl SessionFactory for ConsoleSessionFactory {
    fn create_session(&self, vad: SharedVad, options: SessionOptions) -> Arc<dyn AgentSession> {
        let (input, output) = self.io.lock().take().unwrap_or_else(|| {
            (
                stdin_lines(),
                Box::new(tokio::io::stdout()) as ConsoleOutput,
            )
        });
        Arc::new(ConsoleSession::new(
            self.llm.clone(),
            vad,
            options,
            input,
            output,
        ))
    }
}

pub struct ConsoleSession {
    inner: Arc<Inner>,
}

struct Inner {
    options: SessionOptions,
    vad: SharedVad,
    llm: Arc<dyn LanguageModel>,
    events: EventBus,
    agent: OnceLock<Arc<dyn Agent>>,
    input: Mutex<Option<ConsoleInput>>,
    output: tokio::sync::Mutex<ConsoleOutput>,
    history: Mutex<Vec<ChatMessage>>,
    next_id: AtomicU64,
}

impl ConsoleSession {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        vad: SharedVad,
        options: SessionOptions,
        input: ConsoleInput,
        output: ConsoleOutput,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                vad,
                llm,
                events: EventBus::new(),
                agent: OnceLock::new(),
                input: Mutex::new(Some(input)),
                output: tokio::sync::Mutex::new(output),
                history: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

#[async_trait]
impl AgentSession for ConsoleSession {
    fn options(&self) -> SessionOptions {
        self.inner.options
    }

    fn events(&self) -> &EventBus {
        &self.inner.events
    }

    async fn start(
        &self,
        room: Arc<dyn Room>,
        agent: Arc<dyn Agent>,
        input: RoomInputOptions,
    ) -> Result<(), SessionError> {
        if self.inner.agent.set(agent.clone()).is_err() {
            return Err(SessionError::AlreadyStarted);
        }
        let reader = self.inner.input.lock().take().ok_or(SessionError::AlreadyStarted)?;
        info!(
            room = %room.name(),
            vad = self.inner.vad.0.name(),
            audio_input_device = ?input.audio_input_device,
            "Console session started, type to talk and press Ctrl-D to end"
        );

        if let Err(e) = agent.on_enter(self).await {
            warn!(error = ?e, "Agent on_enter failed");
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.listen(reader).await });
        Ok(())
    }

    async fn generate_reply(&self, request: ReplyRequest) -> Result<SpeechHandle, SessionError> {
        self.inner.reply(request).await
    }
}

impl Inner {
    async fn listen(self: Arc<Self>, mut input: ConsoleInput) {
        let reason = loop {
            match input.recv().await {
                Some(Ok(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.on_transcript(text).await {
                        warn!(error = ?e, "Failed to reply to user input");
                    }
                }
                Some(Err(e)) => break CloseReason::Error(e.to_string()),
                None => break CloseReason::InputEnded,
            }
        };
        info!(?reason, "Console input closed");
        self.events.emit(&SessionEvent::Close(reason));
    }

    async fn on_transcript(&self, text: &str) -> Result<SpeechHandle, SessionError> {
        let started = Instant::now();
        let transcript = match self.agent.get() {
            Some(agent) => agent
                .configuration()
                .providers
                .stt
                .format_speaker(CONSOLE_SPEAKER, text, true),
            None => text.to_string(),
        };
        let request_id = format!("stt-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        self.events.emit(&SessionEvent::UserInputTranscribed {
            transcript: transcript.clone(),
            is_final: true,
        });
        self.emit_metrics(AgentMetrics::Stt(SttMetrics {
            request_id,
            duration: started.elapsed().as_secs_f64(),
            audio_duration: spoken_seconds(text),
            streamed: true,
        }));
        self.emit_metrics(AgentMetrics::Eou(EouMetrics {
            end_of_utterance_delay: self.options.min_endpointing_delay.as_secs_f64(),
            transcription_delay: started.elapsed().as_secs_f64(),
        }));

        self.reply(ReplyRequest {
            instructions: None,
            user_input: Some(transcript),
            allow_interruptions: true,
        })
        .await
    }

    async fn reply(&self, request: ReplyRequest) -> Result<SpeechHandle, SessionError> {
        let agent = self.agent.get().ok_or(SessionError::NotStarted)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut instructions = agent.configuration().instructions.clone();
        if let Some(extra) = &request.instructions {
            instructions.push_str(extra);
        }
        let history = {
            let mut history = self.history.lock();
            if let Some(user_input) = &request.user_input {
                history.push(ChatMessage::user(user_input.clone()));
            }
            history.clone()
        };

        self.events
            .emit(&SessionEvent::AgentStateChanged(AgentActivity::Thinking));
        let started = Instant::now();
        let reply = match self.llm.reply(&instructions, &history).await {
            Ok(reply) => reply,
            Err(e) => {
                self.events
                    .emit(&SessionEvent::AgentStateChanged(AgentActivity::Listening));
                return Err(SessionError::Generation(e));
            }
        };
        let elapsed = started.elapsed().as_secs_f64();
        let usage = reply.usage.unwrap_or_default();
        self.emit_metrics(AgentMetrics::Llm(LlmMetrics {
            request_id: format!("llm-{id}"),
            duration: elapsed,
            ttft: elapsed,
            prompt_tokens: usage.prompt_tokens,
            prompt_cached_tokens: usage.prompt_cached_tokens,
            completion_tokens: usage.completion_tokens,
        }));
        self.history
            .lock()
            .push(ChatMessage::assistant(reply.text.clone()));

        self.events
            .emit(&SessionEvent::AgentStateChanged(AgentActivity::Speaking));
        let started = Instant::now();
        self.speak(&reply.text).await?;
        self.emit_metrics(AgentMetrics::Tts(TtsMetrics {
            request_id: format!("tts-{id}"),
            ttfb: started.elapsed().as_secs_f64(),
            duration: started.elapsed().as_secs_f64(),
            audio_duration: spoken_seconds(&reply.text),
            characters_count: reply.text.chars().count() as u64,
            streamed: false,
        }));
        self.events
            .emit(&SessionEvent::AgentStateChanged(AgentActivity::Listening));

        Ok(SpeechHandle::new(id, request.allow_interruptions))
    }

    async fn speak(&self, text: &str) -> Result<(), SessionError> {
        let mut output = self.output.lock().await;
        let write = async {
            output.write_all(format!("agent> {text}\n").as_bytes()).await?;
            output.flush().await
        };
        write
            .await
            .map_err(|e| TransportError::Disconnected(format!("console output: {e}")).into())
    }

    fn emit_metrics(&self, metrics: AgentMetrics) {
        self.events.emit(&SessionEvent::MetricsCollected(metrics));
    }
}

fn spoken_seconds(text: &str) -> f64 {
    text.split_whitespace().count() as f64 / WORDS_PER_SECOND
}
