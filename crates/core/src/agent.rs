//! Interview Assistant Agent
//!
//! Declares what the agent is (instructions and the provider selections of
//! its speech pipeline) and what it does when it enters a session: greet the
//! participant once, in a way the participant may talk over.

use crate::context::SessionContext;
use crate::providers::ProviderSelection;
use crate::runtime::{AgentSession, ReplyRequest};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const BASE_INSTRUCTIONS: &str = "You are a professional interview assistant conducting a voice interview. \
Your interface with users will be voice. \
You should use short and concise responses, avoiding usage of unpronounceable punctuation. ";

pub const GREETING_INSTRUCTIONS: &str =
    "Hello! I'm ready to start the interview. How are you doing today?";

/// Immutable, per-session description of the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfiguration {
    pub instructions: String,
    pub providers: ProviderSelection,
    /// Context decoded from room metadata. Kept available to the pipeline;
    /// the instruction text is not derived from it.
    pub context: SessionContext,
}

impl AgentConfiguration {
    pub fn new(providers: ProviderSelection, context: SessionContext) -> Self {
        Self {
            instructions: BASE_INSTRUCTIONS.to_string(),
            providers,
            context,
        }
    }
}

/// Lifecycle hooks the session runtime calls on an agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn configuration(&self) -> &AgentConfiguration;

    /// Called by the runtime once the session has finished starting.
    async fn on_enter(&self, session: &dyn AgentSession) -> anyhow::Result<()>;
}

pub struct InterviewAssistant {
    config: AgentConfiguration,
    greeted: AtomicBool,
}

impl InterviewAssistant {
    pub fn new(config: AgentConfiguration) -> Self {
        Self {
            config,
            greeted: AtomicBool::new(false),
        }
    }

    pub fn has_greeted(&self) -> bool {
        self.greeted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for InterviewAssistant {
    fn configuration(&self) -> &AgentConfiguration {
        &self.config
    }

    async fn on_enter(&self, session: &dyn AgentSession) -> anyhow::Result<()> {
        if self.greeted.swap(true, Ordering::SeqCst) {
            debug!("Greeting already issued for this session");
            return Ok(());
        }

        info!("Agent entered the session, greeting participant");
        let speech = session
            .generate_reply(
                ReplyRequest::with_instructions(GREETING_INSTRUCTIONS).allow_interruptions(true),
            )
            .await
            .context("Failed to issue greeting")?;
        debug!(speech_id = speech.id(), "Greeting queued");
        Ok(())
    }
}
