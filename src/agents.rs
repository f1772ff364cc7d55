use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time;

use crate::{
    catalog::{Persona, Scenario},
    error::ProviderError,
    providers::{CompletionRequest, LLMProvider},
    types::{AgentReply, Message, MessageRole, ReplyMetadata, UserTurn},
};

pub const GOAL_MET_SENTINEL: &str = "GOAL_MET";
pub const GIVING_UP_SENTINEL: &str = "GIVING_UP";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// The agent under test. Receives the transcript so far and produces one
/// reply; it must not mutate the history it is handed.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn respond(
        &self,
        history: &[Message],
        latest_user_message: &str,
        persona: Option<&Persona>,
    ) -> Result<AgentReply, DriverError>;
}

/// The simulated customer. Opens the conversation and, each turn, produces
/// the next user message together with the termination signals.
#[async_trait]
pub trait UserDriver: Send + Sync {
    async fn open(&self, persona: &Persona, scenario: &Scenario) -> Result<String, DriverError>;

    async fn next(
        &self,
        persona: &Persona,
        goal: &str,
        history: &[Message],
        latest_agent_text: &str,
    ) -> Result<UserTurn, DriverError>;
}

async fn complete_with_timeout(
    provider: &dyn LLMProvider,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<crate::providers::CompletionResponse, DriverError> {
    match time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DriverError::Timeout(timeout)),
    }
}

/// Naive e-commerce support agent backed by an `LLMProvider`.
pub struct SupportAgent {
    provider: Arc<dyn LLMProvider>,
    model: String,
    call_timeout: Duration,
}

impl SupportAgent {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    fn system_prompt() -> &'static str {
        "You are a customer support agent for an e-commerce company.\n\
         Your job is to help customers with their issues including:\n\
         - Order delays and tracking\n\
         - Refunds and returns\n\
         - Wrong items received\n\
         - Account issues\n\
         - Billing disputes\n\
         - Subscription cancellations\n\n\
         Be helpful and friendly. Keep responses concise."
    }
}

#[async_trait]
impl AgentAdapter for SupportAgent {
    async fn respond(
        &self,
        history: &[Message],
        latest_user_message: &str,
        _persona: Option<&Persona>,
    ) -> Result<AgentReply, DriverError> {
        let mut messages = history.to_vec();
        // The transcript already ends with the latest user message when the
        // simulator calls us; standalone callers may pass it separately.
        if messages.last().map_or(true, |m| {
            m.role != MessageRole::User || m.content != latest_user_message
        }) {
            messages.push(Message::user(latest_user_message));
        }

        let request = CompletionRequest::new(self.model.clone(), messages)
            .with_system(Self::system_prompt())
            .with_max_tokens(1024);

        let response = complete_with_timeout(self.provider.as_ref(), request, self.call_timeout).await?;

        Ok(AgentReply {
            response: response.text,
            actions: Vec::new(),
            metadata: ReplyMetadata {
                model: Some(self.model.clone()),
                tokens_used: response.usage.map(|u| u.total()),
            },
        })
    }
}

/// Simulated customer backed by an `LLMProvider`. Persona attributes shape
/// the system prompt; the generated text signals termination through the
/// `GOAL_MET` / `GIVING_UP` sentinels, which are stripped from the stored
/// message.
pub struct UserSimulator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    call_timeout: Duration,
}

impl UserSimulator {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    fn next_system_prompt(persona: &Persona, goal: &str) -> String {
        format!(
            "You are simulating a customer in a support conversation.\n\n\
             Your personality:\n\
             - Tone: {}\n\
             - Technical literacy: {}\n\
             - Formality: {}\n\
             - Trust level: {}\n\n\
             Your goal: {}\n\n\
             Respond naturally as this person would. Keep messages short (1-3 sentences) like a real chat.\n\
             If your goal has been met, say exactly \"{}\" at the end of your message.\n\
             If you're frustrated and want to give up, say exactly \"{}\" at the end.",
            persona.tone,
            persona.technical_literacy,
            persona.formality,
            persona.trust_level,
            goal,
            GOAL_MET_SENTINEL,
            GIVING_UP_SENTINEL,
        )
    }

    fn open_system_prompt(persona: &Persona, scenario: &Scenario) -> String {
        format!(
            "Generate a customer's opening message for a support chat.\n\n\
             Scenario: {}\n\
             Context: {}\n\
             Tone: {}\n\
             Formality: {}\n\n\
             Generate a realistic opening message (1-2 sentences). Do not include any labels or meta-commentary.",
            scenario.kind, scenario.context, persona.tone, persona.formality,
        )
    }
}

#[async_trait]
impl UserDriver for UserSimulator {
    async fn open(&self, persona: &Persona, scenario: &Scenario) -> Result<String, DriverError> {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::user("Generate the message:")],
        )
        .with_system(Self::open_system_prompt(persona, scenario))
        .with_max_tokens(128);

        let response = complete_with_timeout(self.provider.as_ref(), request, self.call_timeout).await?;
        Ok(response.text.trim().to_string())
    }

    async fn next(
        &self,
        persona: &Persona,
        goal: &str,
        history: &[Message],
        latest_agent_text: &str,
    ) -> Result<UserTurn, DriverError> {
        let mut messages = history.to_vec();
        messages.push(Message::user(format!(
            "The customer support agent just said: {}\n\nHow do you respond?",
            latest_agent_text
        )));

        let request = CompletionRequest::new(self.model.clone(), messages)
            .with_system(Self::next_system_prompt(persona, goal))
            .with_max_tokens(256);

        let response = complete_with_timeout(self.provider.as_ref(), request, self.call_timeout).await?;

        Ok(parse_user_turn(&response.text))
    }
}

/// Detect and strip the termination sentinels from a generated user message.
pub fn parse_user_turn(raw: &str) -> UserTurn {
    let goal_met = raw.contains(GOAL_MET_SENTINEL);
    let giving_up = raw.contains(GIVING_UP_SENTINEL);
    let message = raw
        .replace(GOAL_MET_SENTINEL, "")
        .replace(GIVING_UP_SENTINEL, "")
        .trim()
        .to_string();

    UserTurn {
        message,
        goal_met,
        giving_up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::providers::scripted::ScriptedProvider;
    use crate::providers::{CompletionResponse, LLMProvider};

    /// Records the last request so tests can inspect what the agent sent.
    #[derive(Default)]
    struct CapturingProvider {
        last_request: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl LLMProvider for CapturingProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, crate::error::ProviderError> {
            *self.last_request.lock().unwrap() = Some(request);
            Ok(CompletionResponse {
                text: "noted".to_string(),
                usage: None,
            })
        }

        fn name(&self) -> &'static str {
            "capturing"
        }
    }

    #[test]
    fn sentinels_are_stripped() {
        let turn = parse_user_turn("Thanks, that solves it! GOAL_MET");
        assert!(turn.goal_met);
        assert!(!turn.giving_up);
        assert_eq!(turn.message, "Thanks, that solves it!");

        let turn = parse_user_turn("Forget it. GIVING_UP");
        assert!(turn.giving_up);
        assert_eq!(turn.message, "Forget it.");

        let turn = parse_user_turn("Could you check again?");
        assert!(!turn.goal_met);
        assert!(!turn.giving_up);
    }

    #[test]
    fn both_sentinels_reported() {
        let turn = parse_user_turn("Fine, whatever. GOAL_MET GIVING_UP");
        assert!(turn.goal_met);
        assert!(turn.giving_up);
        assert_eq!(turn.message, "Fine, whatever.");
    }

    #[tokio::test]
    async fn support_agent_does_not_duplicate_latest_message() {
        let provider = Arc::new(ScriptedProvider::from_responses(["Happy to help."]));
        let agent = SupportAgent::new(provider, "scripted-model");

        let history = vec![Message::user("Where is my order?")];
        let reply = agent
            .respond(&history, "Where is my order?", None)
            .await
            .expect("scripted reply");

        assert_eq!(reply.response, "Happy to help.");
        assert!(reply.actions.is_empty());
        // Input history untouched.
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn latest_message_appended_when_history_ends_on_agent() {
        let provider = Arc::new(CapturingProvider::default());
        let agent = SupportAgent::new(provider.clone(), "scripted-model");

        // The agent's last reply happens to repeat the user's words; the
        // standalone respond path must still append the new user message.
        let history = vec![Message::user("Echo"), Message::agent("Echo")];
        agent
            .respond(&history, "Echo", None)
            .await
            .expect("capturing reply");

        let request = provider
            .last_request
            .lock()
            .unwrap()
            .clone()
            .expect("request captured");
        assert_eq!(request.messages.len(), 3);
        let last = request.messages.last().expect("non-empty");
        assert_eq!(last.role, MessageRole::User);
        assert_eq!(last.content, "Echo");
    }

    #[tokio::test]
    async fn driver_error_surfaces_provider_failure() {
        let provider = Arc::new(ScriptedProvider::new());
        let agent = SupportAgent::new(provider, "scripted-model");

        let result = agent.respond(&[], "hello", None).await;
        assert!(matches!(result, Err(DriverError::Provider(_))));
    }
}
