//! Core of the voice interview assistant.
//!
//! The crate holds everything that does not depend on a particular media
//! transport: the agent definition, the session orchestrator and the state it
//! moves through, the process-wide prewarm store, metrics accounting, and the
//! traits a runtime implements to host sessions.

pub mod agent;
pub mod context;
pub mod events;
pub mod llm_client;
pub mod metrics;
pub mod orchestrator;
pub mod prewarm;
pub mod providers;
pub mod runtime;
pub mod session;
pub mod vad;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfiguration, InterviewAssistant};
pub use context::{SessionContext, parse_room_metadata};
pub use events::{CloseReason, EventBus, EventKind, SessionEvent};
pub use metrics::{AgentMetrics, UsageCollector, UsageSummary};
pub use orchestrator::{
    ActiveSession, EntrypointError, OrchestratorConfig, RetryPolicy, SessionOrchestrator,
};
pub use prewarm::{JobProcess, prewarm};
pub use runtime::{AgentSession, JobContext, Room, SessionFactory};
pub use session::SessionState;
