use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use crate::{
    agents::{AgentAdapter, DriverError, UserDriver},
    catalog::{Catalog, CatalogError, Persona, Scenario},
    judge::{ErrorReport, EvaluationReport, Judge},
    transcript::Transcript,
    types::{RunResult, TerminationState},
};

pub const DEFAULT_MAX_TURNS: usize = 10;

/// Drives one conversation at a time between the simulated user and the
/// agent under test, then hands the finished transcript to the judge.
///
/// State machine per run: the user driver opens, then agent and user turns
/// alternate. The turn budget caps agent replies; the counter increments
/// after each reply and the budget check runs before soliciting another user
/// turn, so a limit-terminated run always ends on an agent message and a
/// budget of 0 yields just the opening user message.
pub struct Simulator {
    agent: Arc<dyn AgentAdapter>,
    user: Arc<dyn UserDriver>,
    judge: Judge,
    max_turns: usize,
}

impl Simulator {
    pub fn new(agent: Arc<dyn AgentAdapter>, user: Arc<dyn UserDriver>, judge: Judge) -> Self {
        Self {
            agent,
            user,
            judge,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// The judge used for every run, for callers that also want to score
    /// ad hoc transcripts.
    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    /// Run one conversation to termination and judge it. Total: driver and
    /// judge failures are folded into the returned `RunResult` instead of
    /// propagating, so a batch is never aborted by one bad conversation.
    pub async fn run_single(
        &self,
        scenario: &Scenario,
        persona: &Persona,
        max_turns: Option<usize>,
    ) -> RunResult {
        let budget = max_turns.unwrap_or(self.max_turns);
        let mut transcript = Transcript::new();

        let opening = match self.user.open(persona, scenario).await {
            Ok(message) => message,
            Err(error) => {
                return failed_result(scenario, persona, transcript, 0, &error);
            }
        };
        transcript.push_user(opening);

        let mut turns = 0;
        let mut termination = TerminationState::TurnLimitReached;

        while turns < budget {
            let latest_user = transcript
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();

            let reply = match self
                .agent
                .respond(transcript.messages(), &latest_user, Some(persona))
                .await
            {
                Ok(reply) => reply,
                Err(error) => {
                    return failed_result(scenario, persona, transcript, turns, &error);
                }
            };

            let agent_text = reply.response.clone();
            transcript.push_agent(reply.response);
            turns += 1;

            if turns >= budget {
                termination = TerminationState::TurnLimitReached;
                break;
            }

            let user_turn = match self
                .user
                .next(persona, &scenario.goal, transcript.messages(), &agent_text)
                .await
            {
                Ok(turn) => turn,
                Err(error) => {
                    return failed_result(scenario, persona, transcript, turns, &error);
                }
            };
            transcript.push_user(user_turn.message);

            // Goal takes precedence when both signals fire.
            if user_turn.goal_met {
                termination = TerminationState::GoalMet;
                break;
            }
            if user_turn.giving_up {
                termination = TerminationState::GaveUp;
                break;
            }
        }

        let evaluation = self.judge.evaluate(&transcript, Some(&scenario.goal)).await;

        RunResult {
            scenario_id: scenario.id.clone(),
            persona_id: persona.id.clone(),
            transcript: transcript.into_messages(),
            turns,
            termination,
            evaluation,
            timestamp: Utc::now(),
        }
    }

    /// Run `num` conversations over pairs sampled uniformly with replacement.
    /// Always yields exactly `num` results; per-run failures surface as
    /// error evaluations inside the results.
    pub async fn run_batch<R: Rng>(
        &self,
        catalog: &Catalog,
        num: usize,
        rng: &mut R,
    ) -> Result<Vec<RunResult>, CatalogError> {
        let mut results = Vec::with_capacity(num);

        for index in 0..num {
            let (scenario, persona) = catalog.sample_pair(rng)?;
            tracing::info!(
                run = index + 1,
                total = num,
                scenario = %scenario.id,
                persona = %persona.id,
                "running simulation"
            );
            results.push(self.run_single(scenario, persona, None).await);
        }

        Ok(results)
    }

    /// Run one scenario against a specific persona, or the first builtin one
    /// when none is named.
    pub async fn run_targeted(
        &self,
        catalog: &Catalog,
        scenario_id: &str,
        persona_id: Option<&str>,
    ) -> Result<Vec<RunResult>, CatalogError> {
        let scenario = catalog
            .scenario(scenario_id)
            .ok_or_else(|| CatalogError::UnknownScenario(scenario_id.to_string()))?;

        let persona = match persona_id {
            Some(id) => catalog
                .persona(id)
                .ok_or_else(|| CatalogError::UnknownPersona(id.to_string()))?,
            None => catalog.personas().first().ok_or(CatalogError::Empty)?,
        };

        Ok(vec![self.run_single(scenario, persona, None).await])
    }

    /// Run one scenario against every persona in the catalog.
    pub async fn run_all_personas(
        &self,
        catalog: &Catalog,
        scenario_id: &str,
    ) -> Result<Vec<RunResult>, CatalogError> {
        let scenario = catalog
            .scenario(scenario_id)
            .ok_or_else(|| CatalogError::UnknownScenario(scenario_id.to_string()))?;

        let mut results = Vec::with_capacity(catalog.personas().len());
        for persona in catalog.personas() {
            tracing::info!(scenario = %scenario.id, persona = %persona.id, "running targeted simulation");
            results.push(self.run_single(scenario, persona, None).await);
        }
        Ok(results)
    }
}

/// A run cut short by a driver failure keeps the partial transcript, is
/// classified as the user having given up, and carries the error as data.
fn failed_result(
    scenario: &Scenario,
    persona: &Persona,
    transcript: Transcript,
    turns: usize,
    error: &DriverError,
) -> RunResult {
    tracing::warn!(
        scenario = %scenario.id,
        persona = %persona.id,
        error = %error,
        "driver failure, containing run"
    );
    RunResult {
        scenario_id: scenario.id.clone(),
        persona_id: persona.id.clone(),
        transcript: transcript.into_messages(),
        turns,
        termination: TerminationState::GaveUp,
        evaluation: crate::judge::Evaluation::Error(ErrorReport {
            error: error.to_string(),
            report: EvaluationReport::fallback(&error.to_string()),
        }),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{
        judge::FAILURE_CATEGORIES,
        providers::scripted::ScriptedProvider,
        types::{AgentReply, Message, MessageRole, UserTurn},
    };

    struct StubAgent;

    #[async_trait]
    impl AgentAdapter for StubAgent {
        async fn respond(
            &self,
            _history: &[Message],
            _latest_user_message: &str,
            _persona: Option<&Persona>,
        ) -> Result<AgentReply, DriverError> {
            Ok(AgentReply::new("Let me check that for you."))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentAdapter for FailingAgent {
        async fn respond(
            &self,
            _history: &[Message],
            _latest_user_message: &str,
            _persona: Option<&Persona>,
        ) -> Result<AgentReply, DriverError> {
            Err(DriverError::Provider(
                crate::error::ProviderError::Provider("injected failure".to_string()),
            ))
        }
    }

    /// Keeps asking until `resolve_after` exchanges, then reports the flags.
    struct StubUser {
        resolve_after: usize,
        goal_met: bool,
        giving_up: bool,
        calls: AtomicUsize,
    }

    impl StubUser {
        fn persistent() -> Self {
            Self {
                resolve_after: usize::MAX,
                goal_met: false,
                giving_up: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn resolving(after: usize, goal_met: bool, giving_up: bool) -> Self {
            Self {
                resolve_after: after,
                goal_met,
                giving_up,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UserDriver for StubUser {
        async fn open(&self, _persona: &Persona, scenario: &Scenario) -> Result<String, DriverError> {
            Ok(format!("Hi, I need help with {}.", scenario.kind))
        }

        async fn next(
            &self,
            _persona: &Persona,
            _goal: &str,
            _history: &[Message],
            _latest_agent_text: &str,
        ) -> Result<UserTurn, DriverError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let done = call >= self.resolve_after;
            Ok(UserTurn {
                message: "Any update?".to_string(),
                goal_met: done && self.goal_met,
                giving_up: done && self.giving_up,
            })
        }
    }

    fn scripted_judge() -> Judge {
        let mut categories = serde_json::Map::new();
        for name in FAILURE_CATEGORIES {
            categories.insert(
                name.to_string(),
                serde_json::json!({"score": 1, "justification": "ok", "confidence": 0.8}),
            );
        }
        categories.insert("overall_summary".to_string(), "fine".into());
        categories.insert("primary_failure_mode".to_string(), "None".into());
        categories.insert("suggestion".to_string(), "none".into());
        let body = serde_json::Value::Object(categories).to_string();

        let provider = Arc::new(ScriptedProvider::from_responses(vec![body; 16]));
        Judge::new(provider, "scripted-model")
    }

    fn fixtures() -> (Scenario, Persona) {
        let catalog = Catalog::builtin();
        (
            catalog.scenario("order_delay").expect("builtin").clone(),
            catalog.persona("frustrated_impatient").expect("builtin").clone(),
        )
    }

    #[tokio::test]
    async fn turn_limit_run_ends_on_agent_message() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(Arc::new(StubAgent), Arc::new(StubUser::persistent()), scripted_judge());

        let result = simulator.run_single(&scenario, &persona, Some(5)).await;
        assert_eq!(result.termination, TerminationState::TurnLimitReached);
        assert_eq!(result.turns, 5);
        // Opening user message + per exchange: agent reply (+ user reply,
        // except after the final agent turn).
        assert_eq!(result.transcript.len(), 2 * 5);
        assert_eq!(
            result.transcript.last().map(|m| m.role),
            Some(MessageRole::Agent)
        );
        assert!(result.evaluation.is_report());
    }

    #[tokio::test]
    async fn zero_budget_yields_opening_message_only() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(Arc::new(StubAgent), Arc::new(StubUser::persistent()), scripted_judge());

        let result = simulator.run_single(&scenario, &persona, Some(0)).await;
        assert_eq!(result.termination, TerminationState::TurnLimitReached);
        assert_eq!(result.turns, 0);
        assert_eq!(result.transcript.len(), 1);
        assert_eq!(result.transcript[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn budget_one_yields_single_reply() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(Arc::new(StubAgent), Arc::new(StubUser::persistent()), scripted_judge());

        let result = simulator.run_single(&scenario, &persona, Some(1)).await;
        assert_eq!(result.turns, 1);
        assert_eq!(result.transcript.len(), 2);
        assert_eq!(
            result.transcript.last().map(|m| m.role),
            Some(MessageRole::Agent)
        );
    }

    #[tokio::test]
    async fn goal_met_ends_on_user_message() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(
            Arc::new(StubAgent),
            Arc::new(StubUser::resolving(2, true, false)),
            scripted_judge(),
        );

        let result = simulator.run_single(&scenario, &persona, Some(10)).await;
        assert_eq!(result.termination, TerminationState::GoalMet);
        assert_eq!(result.turns, 2);
        assert_eq!(
            result.transcript.last().map(|m| m.role),
            Some(MessageRole::User)
        );
    }

    #[tokio::test]
    async fn goal_beats_giving_up_when_both_fire() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(
            Arc::new(StubAgent),
            Arc::new(StubUser::resolving(1, true, true)),
            scripted_judge(),
        );

        let result = simulator.run_single(&scenario, &persona, Some(10)).await;
        assert_eq!(result.termination, TerminationState::GoalMet);
    }

    #[tokio::test]
    async fn giving_up_is_recorded() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(
            Arc::new(StubAgent),
            Arc::new(StubUser::resolving(3, false, true)),
            scripted_judge(),
        );

        let result = simulator.run_single(&scenario, &persona, Some(10)).await;
        assert_eq!(result.termination, TerminationState::GaveUp);
        assert_eq!(result.turns, 3);
    }

    #[tokio::test]
    async fn agent_failure_is_contained() {
        let (scenario, persona) = fixtures();
        let simulator = Simulator::new(
            Arc::new(FailingAgent),
            Arc::new(StubUser::persistent()),
            scripted_judge(),
        );

        let result = simulator.run_single(&scenario, &persona, Some(5)).await;
        assert!(!result.evaluation.is_report());
        assert_eq!(result.turns, 0);
        // Transcript keeps everything produced before the failure.
        assert_eq!(result.transcript.len(), 1);
        // The fallback still carries all twelve categories.
        assert_eq!(result.evaluation.report().categories().len(), 12);
    }

    #[tokio::test]
    async fn targeted_run_rejects_unknown_ids() {
        let catalog = Catalog::builtin();
        let simulator = Simulator::new(Arc::new(StubAgent), Arc::new(StubUser::persistent()), scripted_judge());

        let missing = simulator
            .run_targeted(&catalog, "not-a-real-id", None)
            .await;
        assert!(matches!(missing, Err(CatalogError::UnknownScenario(_))));

        let missing_persona = simulator
            .run_targeted(&catalog, "order_delay", Some("nobody"))
            .await;
        assert!(matches!(missing_persona, Err(CatalogError::UnknownPersona(_))));
    }
}
