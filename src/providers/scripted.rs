use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    error::ProviderError,
    providers::{CompletionRequest, CompletionResponse, LLMProvider},
};

/// Deterministic provider that replays a fixed queue of responses. Used by
/// tests to drive whole simulations without any network call.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted provider lock poisoned")
            .push_back(response.into());
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .expect("scripted provider lock poisoned")
            .len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let next = self
            .responses
            .lock()
            .expect("scripted provider lock poisoned")
            .pop_front();

        match next {
            Some(text) => Ok(CompletionResponse { text, usage: None }),
            None => Err(ProviderError::Provider(
                "no more scripted responses".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Provider that fails every call. Lets tests exercise driver-failure
/// containment.
#[derive(Debug, Default)]
pub struct FailingProvider;

#[async_trait]
impl LLMProvider for FailingProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::Provider("injected failure".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
