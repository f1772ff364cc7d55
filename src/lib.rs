pub mod agents;
pub mod catalog;
pub mod error;
pub mod judge;
pub mod providers;
pub mod report;
pub mod simulator;
pub mod transcript;
pub mod types;

pub use agents::{AgentAdapter, DriverError, SupportAgent, UserDriver, UserSimulator};
pub use catalog::{Catalog, CatalogError, Persona, Scenario};
pub use error::ProviderError;
pub use judge::{
    CategoryScore, ErrorReport, Evaluation, EvaluationReport, Judge, JudgeError,
    FAILURE_CATEGORIES,
};
pub use providers::LLMProvider;
pub use report::{aggregate, render, AggregateReport, AggregationError};
pub use simulator::{Simulator, DEFAULT_MAX_TURNS};
pub use transcript::Transcript;
pub use types::{
    AgentReply, Message, MessageRole, ReplyMetadata, RunResult, TerminationState, UserTurn,
};
