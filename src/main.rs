//! embodied-eval: run a vision-language model through EmbodiedBench
//!
//! Evaluates one environment, or all four in turn, over a range of episodes.
//! Each episode directory receives the frames, the step log and a video:
//!
//! ```text
//! <output-dir>/EB-ALFRED/episode_1/{frame_0000.png, episode_log.json, video.mp4}
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use embodied_eval::agent::EmbodiedAgent;
use embodied_eval::config::HarnessConfig;
use embodied_eval::env::mock::MockLauncher;
use embodied_eval::env::remote::RemoteLauncher;
use embodied_eval::env::{AnyLauncher, EnvKind};
use embodied_eval::episode::{episode_count, EpisodeRunner, RunSummary};
use embodied_eval::model::{ModelError, ScriptedModel, VlmClient};

const TOKEN_URL: &str = "https://huggingface.co/settings/tokens";
const LICENSE_URL: &str = "https://huggingface.co/nvidia/Cosmos-Reason2-8B";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Evaluate a vision-language model on the EmbodiedBench environments.
#[derive(Parser)]
#[command(name = "embodied-eval", version, about)]
struct Cli {
    /// Which environment to evaluate.
    #[arg(long, value_enum, default_value = "all")]
    env: EnvChoice,

    /// Episodes per environment; -1 runs until the dataset is exhausted.
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    num_episodes: i64,

    /// Index of the first episode to run.
    #[arg(long, default_value_t = 0)]
    start_episode: usize,

    /// Root directory for frames, logs and videos.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Model id served by the chat completions endpoint.
    #[arg(long)]
    model: Option<String>,

    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use scripted environments and a scripted model instead of live servers.
    #[arg(long)]
    mock: bool,

    /// Base URL of the simulator server.
    #[arg(long)]
    sim_url: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum EnvChoice {
    Alfred,
    Habitat,
    Navigation,
    Manipulation,
    All,
}

impl EnvChoice {
    fn kinds(self) -> Vec<EnvKind> {
        match self {
            Self::Alfred => vec![EnvKind::Alfred],
            Self::Habitat => vec![EnvKind::Habitat],
            Self::Navigation => vec![EnvKind::Navigation],
            Self::Manipulation => vec![EnvKind::Manipulation],
            Self::All => EnvKind::ALL.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let output_root = config.run.output_dir.clone();
    std::fs::create_dir_all(&output_root)
        .with_context(|| format!("Failed to create {}", output_root.display()))?;

    let count = episode_count(cli.num_episodes, config.run.unbounded_episode_cap);
    let kinds = cli.env.kinds();
    info!(
        envs = ?kinds.iter().map(EnvKind::name).collect::<Vec<_>>(),
        start = cli.start_episode,
        count,
        mock = cli.mock,
        output = %output_root.display(),
        "Starting evaluation"
    );

    let (launcher, agent) = if cli.mock {
        info!("Using scripted environments and model");
        (AnyLauncher::Mock(MockLauncher::new()), None)
    } else {
        let launcher = RemoteLauncher::new(&config.simulator)
            .context("Failed to build simulator client")?;
        let client = connect_model(&config).await?;
        (AnyLauncher::Remote(launcher), Some(EmbodiedAgent::new(client)))
    };

    let mut summaries = Vec::new();
    for kind in kinds {
        let result = match &agent {
            Some(agent) => {
                let model_id = agent.model().model_id().to_string();
                EpisodeRunner::new(agent, &launcher, &config, &model_id)
                    .run_env(kind, cli.start_episode, count, &output_root)
                    .await
            }
            None => {
                let agent = EmbodiedAgent::new(ScriptedModel::demo(kind));
                EpisodeRunner::new(&agent, &launcher, &config, "scripted")
                    .run_env(kind, cli.start_episode, count, &output_root)
                    .await
            }
        };

        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!(env = %kind, error = %format!("{e:#}"), "Environment run failed"),
        }
    }

    report(&summaries, &output_root);
    Ok(())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Read the config file if one was given, then apply CLI overrides.
fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<HarnessConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => HarnessConfig::default(),
    };

    if let Some(dir) = &cli.output_dir {
        config.run.output_dir = dir.clone();
    }
    if let Some(model) = &cli.model {
        config.model.model_id = model.clone();
    }
    if let Some(url) = &cli.sim_url {
        config.simulator.base_url = url.clone();
    }
    Ok(config)
}

/// Connect to the model endpoint. Rejected credentials end the process with
/// instructions for obtaining access.
async fn connect_model(config: &HarnessConfig) -> Result<VlmClient> {
    info!(model = %config.model.model_id, api_base = %config.model.api_base, "Connecting to model");
    match VlmClient::connect(&config.model).await {
        Ok(client) => Ok(client),
        Err(ModelError::Unauthorized { status }) => {
            error!(status, "Model endpoint refused access");
            eprintln!("{}", auth_remediation(&config.model.model_id));
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Failed to load the model"),
    }
}

fn auth_remediation(model_id: &str) -> String {
    format!(
        "Access to {model_id} was denied.\n\n\
         1. Create a token at {TOKEN_URL}\n\
         2. Accept the model license at {LICENSE_URL}\n\
         3. Export the token before running:\n\n    \
         export HF_TOKEN=hf_xxx\n"
    )
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

fn report(summaries: &[RunSummary], output_root: &Path) {
    for summary in summaries {
        info!(
            env = %summary.env,
            episodes = summary.episodes.len(),
            successes = summary.successes(),
            mean_reward = format!("{:.3}", summary.mean_reward()),
            halted = summary.halted.as_deref().unwrap_or(""),
            "Environment summary"
        );
    }
    info!(output = %output_root.display(), "Evaluation complete");
}
