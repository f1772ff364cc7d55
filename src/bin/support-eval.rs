use std::{fs, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pruefwerk::{
    aggregate, render, Catalog, Judge, RunResult, Simulator, SupportAgent, UserSimulator,
};
use pruefwerk::providers::anthropic::Anthropic;

const SUPPORT_MODEL: &str = "claude-3-5-sonnet-20241022";
const SIMULATOR_MODEL: &str = "claude-3-5-haiku-20241022";
const JUDGE_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Parser)]
#[command(name = "support-eval")]
#[command(about = "Run AI customer support evaluations")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available scenarios
    ListScenarios,
    /// List available personalities
    ListPersonalities,
    /// Run a single simulation
    Single {
        /// Scenario ID
        #[arg(long)]
        scenario: String,
        /// Personality ID
        #[arg(long)]
        personality: String,
        /// Maximum conversation turns
        #[arg(long, default_value_t = 10)]
        max_turns: usize,
        /// Output file for results (JSON)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run batch simulations
    Batch {
        /// Number of simulations
        #[arg(long, default_value_t = 100)]
        num: usize,
        /// Seed for scenario/personality sampling
        #[arg(long)]
        seed: Option<u64>,
        /// Output file for results (JSON)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output file for report (TXT)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run a targeted test on a specific scenario
    Targeted {
        /// Scenario ID
        #[arg(long)]
        scenario: String,
        /// Personality ID (defaults to the first builtin)
        #[arg(long)]
        personality: Option<String>,
        /// Test with every personality
        #[arg(long)]
        all_personalities: bool,
        /// Output file for results (JSON)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();

    let args = Args::parse();
    let catalog = Catalog::builtin();

    match args.command {
        Command::ListScenarios => {
            for scenario in catalog.scenarios() {
                println!("{}: {}", scenario.id, scenario.goal);
            }
        }
        Command::ListPersonalities => {
            for persona in catalog.personas() {
                println!(
                    "{}: tone={}, literacy={}, formality={}, trust={}",
                    persona.id,
                    persona.tone,
                    persona.technical_literacy,
                    persona.formality,
                    persona.trust_level
                );
            }
        }
        Command::Single {
            scenario,
            personality,
            max_turns,
            output,
        } => {
            let simulator = build_simulator()?;
            let scenario = catalog
                .scenario(&scenario)
                .ok_or_else(|| format!("scenario not found: {scenario}"))?;
            let persona = catalog
                .persona(&personality)
                .ok_or_else(|| format!("personality not found: {personality}"))?;

            let result = simulator
                .run_single(scenario, persona, Some(max_turns))
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            write_results(output, std::slice::from_ref(&result))?;
        }
        Command::Batch {
            num,
            seed,
            output,
            report,
        } => {
            let simulator = build_simulator()?;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            let results = simulator.run_batch(&catalog, num, &mut rng).await?;
            write_results(output, &results)?;

            match aggregate(&results) {
                Ok(aggregated) => {
                    let text = render(&aggregated);
                    println!("{text}");
                    if let Some(path) = report {
                        fs::write(path, text)?;
                    }
                }
                Err(error) => eprintln!("could not aggregate results: {error}"),
            }
        }
        Command::Targeted {
            scenario,
            personality,
            all_personalities,
            output,
        } => {
            let simulator = build_simulator()?;
            let results = if all_personalities {
                simulator.run_all_personas(&catalog, &scenario).await?
            } else {
                simulator
                    .run_targeted(&catalog, &scenario, personality.as_deref())
                    .await?
            };

            println!("{}", serde_json::to_string_pretty(&results)?);
            write_results(output, &results)?;
        }
    }

    Ok(())
}

fn build_simulator() -> Result<Simulator, Box<dyn std::error::Error>> {
    let provider = Arc::new(Anthropic::from_env()?);

    let agent = Arc::new(SupportAgent::new(provider.clone(), SUPPORT_MODEL));
    let user = Arc::new(UserSimulator::new(provider.clone(), SIMULATOR_MODEL));
    let judge = Judge::new(provider, JUDGE_MODEL);

    Ok(Simulator::new(agent, user, judge))
}

fn write_results(path: Option<PathBuf>, results: &[RunResult]) -> Result<(), std::io::Error> {
    if let Some(path) = path {
        fs::write(path, serde_json::to_string_pretty(results)?)?;
    }
    Ok(())
}
