use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use pruefwerk::{
    aggregate, render, Catalog, CatalogError, Judge, Message, Persona, Simulator, SupportAgent,
    UserSimulator,
};
use pruefwerk::agents::AgentAdapter;
use pruefwerk::providers::anthropic::Anthropic;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SUPPORT_MODEL: &str = "claude-3-5-sonnet-20241022";
const SIMULATOR_MODEL: &str = "claude-3-5-haiku-20241022";
const JUDGE_MODEL: &str = "claude-3-5-sonnet-20241022";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match Anthropic::from_env() {
        Ok(provider) => {
            let provider = Arc::new(provider);
            Some(Runtime::new(provider))
        }
        Err(error) => {
            tracing::warn!(%error, "no provider configured, simulation endpoints disabled");
            None
        }
    };

    let app_state = Arc::new(AppState {
        catalog: Catalog::builtin(),
        runtime,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/scenarios", get(list_scenarios))
        .route("/personalities", get(list_personalities))
        .route("/respond", post(respond))
        .route("/evaluate", post(evaluate))
        .route("/simulate", post(simulate_single))
        .route("/batch_simulate", post(simulate_batch))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8000));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

struct Runtime {
    agent: Arc<SupportAgent>,
    simulator: Simulator,
}

impl Runtime {
    fn new(provider: Arc<Anthropic>) -> Self {
        let agent = Arc::new(SupportAgent::new(provider.clone(), SUPPORT_MODEL));
        let user = Arc::new(UserSimulator::new(provider.clone(), SIMULATOR_MODEL));
        let judge = Judge::new(provider, JUDGE_MODEL);
        let simulator = Simulator::new(agent.clone(), user, judge);
        Self { agent, simulator }
    }
}

struct AppState {
    catalog: Catalog,
    runtime: Option<Runtime>,
}

impl AppState {
    fn runtime(&self) -> Result<&Runtime, Response> {
        self.runtime.as_ref().ok_or_else(|| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: (),
                    message: Some("ANTHROPIC_API_KEY is not configured".into()),
                    success: false,
                }),
            )
                .into_response()
        })
    }
}

#[derive(Deserialize)]
struct RespondRequest {
    conversation_history: Vec<Message>,
    user_message: String,
    #[serde(default)]
    user_profile: Option<Persona>,
}

#[derive(Deserialize)]
struct SingleSimulationRequest {
    scenario_id: String,
    personality_id: String,
    #[serde(default)]
    max_turns: Option<usize>,
}

fn default_num_simulations() -> usize {
    100
}

#[derive(Deserialize)]
struct BatchSimulationRequest {
    #[serde(default = "default_num_simulations")]
    num_simulations: usize,
    #[serde(default)]
    scenario_ids: Option<Vec<String>>,
    #[serde(default)]
    personality_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct EvaluateRequest {
    conversation_history: Vec<Message>,
    #[serde(default)]
    user_goal: Option<String>,
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "AI Customer Support Evaluation Platform",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "scenarios": "/scenarios",
            "personalities": "/personalities",
            "simulate": "/simulate",
            "batch_simulate": "/batch_simulate",
            "evaluate": "/evaluate",
            "respond": "/respond"
        }
    }))
}

async fn list_scenarios(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse {
        data: serde_json::json!({
            "count": state.catalog.scenarios().len(),
            "scenarios": state.catalog.scenarios(),
        }),
        message: None,
        success: true,
    })
}

async fn list_personalities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse {
        data: serde_json::json!({
            "count": state.catalog.personas().len(),
            "personalities": state.catalog.personas(),
        }),
        message: None,
        success: true,
    })
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RespondRequest>,
) -> Response {
    let runtime = match state.runtime() {
        Ok(runtime) => runtime,
        Err(response) => return response,
    };

    match runtime
        .agent
        .respond(
            &request.conversation_history,
            &request.user_message,
            request.user_profile.as_ref(),
        )
        .await
    {
        Ok(reply) => Json(ApiResponse {
            data: reply,
            message: None,
            success: true,
        })
        .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                data: (),
                message: Some(format!("Agent call failed: {error}")),
                success: false,
            }),
        )
            .into_response(),
    }
}

async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> Response {
    let runtime = match state.runtime() {
        Ok(runtime) => runtime,
        Err(response) => return response,
    };

    let transcript = pruefwerk::Transcript::with_messages(request.conversation_history);
    let evaluation = runtime
        .simulator
        .judge()
        .evaluate(&transcript, request.user_goal.as_deref())
        .await;

    Json(ApiResponse {
        data: evaluation,
        message: None,
        success: true,
    })
    .into_response()
}

async fn simulate_single(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SingleSimulationRequest>,
) -> Response {
    let runtime = match state.runtime() {
        Ok(runtime) => runtime,
        Err(response) => return response,
    };

    let Some(scenario) = state.catalog.scenario(&request.scenario_id) else {
        return not_found(format!("Scenario {} not found", request.scenario_id));
    };
    let Some(persona) = state.catalog.persona(&request.personality_id) else {
        return not_found(format!("Personality {} not found", request.personality_id));
    };

    let result = runtime
        .simulator
        .run_single(scenario, persona, request.max_turns)
        .await;

    Json(ApiResponse {
        data: result,
        message: None,
        success: true,
    })
    .into_response()
}

async fn simulate_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchSimulationRequest>,
) -> Response {
    let runtime = match state.runtime() {
        Ok(runtime) => runtime,
        Err(response) => return response,
    };

    let catalog = state.catalog.filtered(
        request.scenario_ids.as_deref(),
        request.personality_ids.as_deref(),
    );

    let mut rng = StdRng::from_entropy();
    let results = match runtime
        .simulator
        .run_batch(&catalog, request.num_simulations, &mut rng)
        .await
    {
        Ok(results) => results,
        Err(CatalogError::Empty) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse {
                    data: (),
                    message: Some("Requested ids match no scenarios or personalities".into()),
                    success: false,
                }),
            )
                .into_response();
        }
        Err(error) => return not_found(error.to_string()),
    };

    let (aggregated, report_text) = match aggregate(&results) {
        Ok(report) => {
            let text = render(&report);
            let value = serde_json::to_value(&report)
                .unwrap_or_else(|error| serde_json::json!({ "error": error.to_string() }));
            (value, text)
        }
        Err(error) => (
            serde_json::json!({ "error": error.to_string() }),
            String::new(),
        ),
    };

    Json(ApiResponse {
        data: serde_json::json!({
            "results": results,
            "aggregated": aggregated,
            "report": report_text,
        }),
        message: None,
        success: true,
    })
    .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "api_key_configured": state.runtime.is_some(),
    }))
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse {
            data: (),
            message: Some(message),
            success: false,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct ApiResponse<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    success: bool,
}
