use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::judge::Evaluation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, content)
    }
}

/// Output of one `AgentAdapter::respond` call. `actions` stays empty for the
/// naive support agent but is part of the adapter contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub metadata: ReplyMetadata,
}

impl AgentReply {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            actions: Vec::new(),
            metadata: ReplyMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Output of one `UserDriver::next` call. `goal_met` and `giving_up` are
/// mutually exclusive by convention; when both fire the controller treats the
/// turn as goal met.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTurn {
    pub message: String,
    pub goal_met: bool,
    pub giving_up: bool,
}

/// Why a conversation run ended. Exactly one holds per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationState {
    GoalMet,
    GaveUp,
    TurnLimitReached,
}

/// One finished conversation run. Created once by the simulator and never
/// mutated afterwards; the aggregator is its only consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub scenario_id: String,
    pub persona_id: String,
    pub transcript: Vec<Message>,
    /// Number of agent replies issued, not total messages.
    pub turns: usize,
    pub termination: TerminationState,
    pub evaluation: Evaluation,
    pub timestamp: DateTime<Utc>,
}
