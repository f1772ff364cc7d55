//! End-to-end simulation runs over scripted providers: no network, fully
//! deterministic.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use pruefwerk::providers::scripted::{FailingProvider, ScriptedProvider};
use pruefwerk::{
    aggregate, Catalog, CatalogError, Judge, MessageRole, Persona, Scenario, Simulator,
    SupportAgent, TerminationState, UserSimulator, FAILURE_CATEGORIES,
};

fn judge_json(primary: &str) -> String {
    let mut map = serde_json::Map::new();
    for name in FAILURE_CATEGORIES {
        map.insert(
            name.to_string(),
            serde_json::json!({"score": 1, "justification": "fine", "confidence": 0.9}),
        );
    }
    map.insert("overall_summary".to_string(), "went well".into());
    map.insert("primary_failure_mode".to_string(), primary.into());
    map.insert("suggestion".to_string(), "keep it up".into());
    serde_json::Value::Object(map).to_string()
}

fn fixtures() -> (Scenario, Persona) {
    let catalog = Catalog::builtin();
    (
        catalog.scenario("order_delay").expect("builtin").clone(),
        catalog
            .persona("frustrated_impatient")
            .expect("builtin")
            .clone(),
    )
}

fn scripted_simulator(
    agent_script: Vec<&str>,
    user_script: Vec<&str>,
    judge_script: Vec<String>,
) -> Simulator {
    let agent = Arc::new(SupportAgent::new(
        Arc::new(ScriptedProvider::from_responses(agent_script)),
        "agent-model",
    ));
    let user = Arc::new(UserSimulator::new(
        Arc::new(ScriptedProvider::from_responses(user_script)),
        "user-model",
    ));
    let judge = Judge::new(
        Arc::new(ScriptedProvider::from_responses(judge_script)),
        "judge-model",
    );
    Simulator::new(agent, user, judge)
}

#[tokio::test]
async fn goal_met_conversation_end_to_end() {
    let (scenario, persona) = fixtures();

    // User script: opening message, one follow-up, then goal met.
    let simulator = scripted_simulator(
        vec![
            "I can see your order is delayed in transit.",
            "It will arrive Thursday, tracking number TRK-1.",
        ],
        vec![
            "Hey, my order is two weeks late. What's going on?",
            "Okay, when will it actually arrive?",
            "Thursday works, thanks. GOAL_MET",
        ],
        vec![format!("```json\n{}\n```", judge_json("None"))],
    );

    let result = simulator.run_single(&scenario, &persona, Some(5)).await;

    assert_eq!(result.termination, TerminationState::GoalMet);
    assert_eq!(result.turns, 2);
    // Odd message count, ends on the user's closing message, sentinel
    // stripped from the stored text.
    assert_eq!(result.transcript.len(), 5);
    assert!(result.transcript.len() <= 2 * 5 - 1);
    let last = result.transcript.last().expect("non-empty transcript");
    assert_eq!(last.role, MessageRole::User);
    assert_eq!(last.content, "Thursday works, thanks.");

    assert!(result.evaluation.is_report());
    assert_eq!(result.evaluation.report().primary_failure_mode, "None");

    // Alternation: starts with USER, no two consecutive same-role messages.
    assert_eq!(result.transcript[0].role, MessageRole::User);
    for pair in result.transcript.windows(2) {
        assert_ne!(pair[0].role, pair[1].role);
    }
}

#[tokio::test]
async fn turn_limit_conversation_ends_on_agent_message() {
    let (scenario, persona) = fixtures();

    let simulator = scripted_simulator(
        vec!["Checking.", "Still checking."],
        vec!["Where is my order?", "And now?"],
        vec![judge_json("Stalling")],
    );

    let result = simulator.run_single(&scenario, &persona, Some(2)).await;

    assert_eq!(result.termination, TerminationState::TurnLimitReached);
    assert_eq!(result.turns, 2);
    assert_eq!(
        result.transcript.last().map(|m| m.role),
        Some(MessageRole::Agent)
    );
}

#[tokio::test]
async fn giving_up_conversation() {
    let (scenario, persona) = fixtures();

    let simulator = scripted_simulator(
        vec!["Please hold."],
        vec!["My order is late.", "This is useless. GIVING_UP"],
        vec![judge_json("User experience - frustration amplification")],
    );

    let result = simulator.run_single(&scenario, &persona, Some(5)).await;

    assert_eq!(result.termination, TerminationState::GaveUp);
    assert_eq!(
        result.transcript.last().map(|m| m.content.clone()),
        Some("This is useless.".to_string())
    );
}

#[tokio::test]
async fn batch_with_one_failing_agent_still_aggregates() {
    let (scenario, persona) = fixtures();

    let mut results = Vec::new();
    for run in 0..3 {
        let simulator = if run == 1 {
            // Run #2: the agent under test always fails.
            let agent = Arc::new(SupportAgent::new(Arc::new(FailingProvider), "agent-model"));
            let user = Arc::new(UserSimulator::new(
                Arc::new(ScriptedProvider::from_responses(["Hi, my order is late."])),
                "user-model",
            ));
            let judge = Judge::new(Arc::new(FailingProvider), "judge-model");
            Simulator::new(agent, user, judge)
        } else {
            scripted_simulator(
                vec!["Here is your tracking link."],
                vec!["Where is my order?", "Great, thanks! GOAL_MET"],
                vec![judge_json("None")],
            )
        };

        results.push(simulator.run_single(&scenario, &persona, Some(5)).await);
    }

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.iter().filter(|r| !r.evaluation.is_report()).count(),
        1
    );
    // The contained failure still carries a fully keyed fallback report.
    assert_eq!(results[1].evaluation.report().categories().len(), 12);

    let report = aggregate(&results).expect("two valid results remain");
    assert_eq!(report.summary.total_simulations, 3);
    assert_eq!(report.summary.successful_simulations, 2);
    assert_eq!(report.summary.failed_simulations, 1);
    assert_eq!(report.summary.goal_met_rate, 1.0);
}

#[tokio::test]
async fn run_batch_yields_exactly_n_results_from_sampled_pairs() {
    let catalog = Catalog::builtin().filtered(
        Some(&["order_delay".to_string()]),
        Some(&["calm_polite".to_string()]),
    );

    let simulator = scripted_simulator(
        vec!["On it."; 3],
        vec!["Hi, my order is two weeks late."; 3],
        vec![judge_json("None"); 3],
    )
    .with_max_turns(1);

    let mut rng = StdRng::seed_from_u64(42);
    let results = simulator
        .run_batch(&catalog, 3, &mut rng)
        .await
        .expect("non-empty catalog selection");

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.scenario_id, "order_delay");
        assert_eq!(result.persona_id, "calm_polite");
        assert_eq!(result.termination, TerminationState::TurnLimitReached);
        assert!(result.evaluation.is_report());
    }
}

#[tokio::test]
async fn run_batch_rejects_empty_catalog_selection() {
    let catalog = Catalog::builtin().filtered(Some(&[]), None);
    let simulator = scripted_simulator(vec![], vec![], vec![]);

    let mut rng = StdRng::seed_from_u64(42);
    let result = simulator.run_batch(&catalog, 3, &mut rng).await;
    assert!(matches!(result, Err(CatalogError::Empty)));
}

#[tokio::test]
async fn run_all_personas_covers_every_persona_in_order() {
    let catalog = Catalog::builtin();
    let n = catalog.personas().len();

    let simulator = scripted_simulator(
        vec!["Let me check that for you."; n],
        vec!["Hello, I need help with my order."; n],
        vec![judge_json("None"); n],
    )
    .with_max_turns(1);

    let results = simulator
        .run_all_personas(&catalog, "order_delay")
        .await
        .expect("known scenario");

    assert_eq!(results.len(), n);
    let ids: Vec<&str> = results.iter().map(|r| r.persona_id.as_str()).collect();
    let expected: Vec<&str> = catalog.personas().iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, expected);
    assert!(results.iter().all(|r| r.scenario_id == "order_delay"));

    let missing = simulator.run_all_personas(&catalog, "not-a-real-id").await;
    assert!(matches!(missing, Err(CatalogError::UnknownScenario(_))));
}

#[tokio::test]
async fn judge_parse_failure_keeps_run_valid_shaped() {
    let (scenario, persona) = fixtures();

    let simulator = scripted_simulator(
        vec!["All sorted."],
        vec!["Fix my order.", "Done, thanks. GOAL_MET"],
        vec!["Sorry, I cannot produce JSON today.".to_string()],
    );

    let result = simulator.run_single(&scenario, &persona, Some(5)).await;

    // Natural termination is preserved even though judging failed.
    assert_eq!(result.termination, TerminationState::GoalMet);
    assert!(!result.evaluation.is_report());
    for (_, category) in result.evaluation.report().categories() {
        assert_eq!(category.score, 5);
        assert_eq!(category.confidence, 0.0);
    }
}
