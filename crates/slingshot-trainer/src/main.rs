// Slingshot training CLI
// Train, serve a learner, inspect checkpoints and check the network

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slingshot_rl_agent::{
    create_policy_network, ActionSource, Learner, LocalLearner, PolicyNetwork, RemoteLearner,
};
use slingshot_rl_core::{Environment, FeatureExtractor, StateEncoder};
use slingshot_rl_env::ProjectileSim;
use slingshot_trainer::server::serve;
use slingshot_trainer::{
    FileStore, LearnerKind, Mode, Orchestrator, Persistence, TrainingConfig,
};

#[derive(Parser)]
#[command(name = "slingshot")]
#[command(about = "Slingshot reinforcement learning trainer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run training (or evaluation) episodes against the simulator
    Train {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override maxEpisodes
        #[arg(short, long)]
        episodes: Option<u64>,

        /// Continue from a checkpoint file
        #[arg(short, long)]
        resume: Option<PathBuf>,

        /// Run mode (training, deployment, testing)
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Use the aimed heuristic shot
        #[arg(long)]
        heuristic: bool,

        /// Use uniformly random shots
        #[arg(long, conflicts_with = "heuristic")]
        random: bool,

        /// Seed action selection and generated levels
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Host a learner for remote trainers
    Serve {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Start from saved network parameters
        #[arg(long)]
        parameters: Option<PathBuf>,
    },

    /// Print a checkpoint
    Inspect {
        /// Checkpoint file
        path: PathBuf,
    },

    /// Build the configured network and run one prediction
    CheckNetwork {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            episodes,
            resume,
            mode,
            heuristic,
            random,
            seed,
        } => {
            let mut config = load_config(config.as_deref()).await?;
            if let Some(episodes) = episodes {
                config.max_episodes = episodes;
            }
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if heuristic || random {
                config.action_source = ActionSource::from_flags(heuristic, random);
            }
            if seed.is_some() {
                config.seed = seed;
                config.simulator.seed = seed;
                config.network.seed = seed;
            }
            config.validate().context("invalid configuration")?;
            train(config, resume.as_deref()).await?;
        }
        Commands::Serve {
            config,
            port,
            parameters,
        } => {
            let mut config = load_config(config.as_deref()).await?;
            if let Some(port) = port {
                config.learner.remote.port = port;
            }
            run_server(&config, parameters.as_deref()).await?;
        }
        Commands::Inspect { path } => inspect(&path).await?,
        Commands::CheckNetwork { config } => {
            let config = load_config(config.as_deref()).await?;
            check_network(&config).await?;
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<TrainingConfig> {
    match path {
        Some(path) => TrainingConfig::from_file(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(TrainingConfig::default()),
    }
}

fn build_learner(config: &TrainingConfig) -> Result<Box<dyn Learner>> {
    let learner: Box<dyn Learner> = match config.learner.kind {
        LearnerKind::Remote => Box::new(RemoteLearner::new(config.learner.remote.clone())),
        LearnerKind::Local => {
            let network =
                create_policy_network(&config.network).context("failed to build network")?;
            let mut replay = config.learner.replay;
            replay.seed = replay.seed.or(config.seed);
            Box::new(LocalLearner::new(network, replay, config.mode.is_learning()))
        }
    };
    Ok(learner)
}

async fn train(config: TrainingConfig, resume: Option<&Path>) -> Result<()> {
    let sim = ProjectileSim::new(config.simulator.clone());
    let learner = build_learner(&config)?;
    let mut orchestrator = Orchestrator::new(config, sim, Some(learner), Arc::new(FileStore))?;

    if let Some(path) = resume {
        let resumed = orchestrator
            .resume(path)
            .await
            .with_context(|| format!("failed to resume from {}", path.display()))?;
        if !resumed {
            warn!("checkpoint not used, training from scratch");
        }
    }

    let finished = tokio::select! {
        result = orchestrator.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(result) => {
            let summary = result.context("training aborted")?;
            println!("{}", summary.render_text());
        }
        None => {
            warn!(episode = orchestrator.episode(), "interrupted, saving checkpoint");
            orchestrator.save_checkpoint("interrupted").await;
            orchestrator.shutdown().await;
        }
    }
    Ok(())
}

async fn run_server(config: &TrainingConfig, parameters: Option<&Path>) -> Result<()> {
    let network = create_policy_network(&config.network).context("failed to build network")?;
    let mut learner = LocalLearner::new(network, config.learner.replay, true);

    if let Some(path) = parameters {
        let params = FileStore
            .read_parameters(path)
            .await
            .with_context(|| format!("failed to read parameters from {}", path.display()))?;
        learner
            .load_parameters(&params)
            .context("parameters do not match the configured network")?;
        info!(path = %path.display(), "parameters loaded");
    }

    let address = config.learner.remote.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let shared = serve(listener, learner, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    let params = shared.lock().await.parameters();
    if let Some(params) = params {
        let path = config.output.checkpoint_dir.join("learner.params.bin.gz");
        FileStore
            .write_parameters(&path, &params)
            .await
            .with_context(|| format!("failed to save parameters to {}", path.display()))?;
        info!(path = %path.display(), "learner parameters saved");
    }
    Ok(())
}

async fn inspect(path: &Path) -> Result<()> {
    let record = FileStore
        .read_checkpoint(path)
        .await
        .with_context(|| format!("failed to read checkpoint {}", path.display()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.episode > 0 {
        println!(
            "success rate: {:.1}%",
            record.successful_episodes as f64 / record.episode as f64 * 100.0
        );
    }

    if let Some(file) = &record.parameters_file {
        let params_path = path.parent().unwrap_or_else(|| Path::new(".")).join(file);
        match FileStore.read_parameters(&params_path).await {
            Ok(params) => println!("parameters: {} values in {}", params.len(), params_path.display()),
            Err(e) => println!("parameters: unreadable ({e})"),
        }
    }
    Ok(())
}

async fn check_network(config: &TrainingConfig) -> Result<()> {
    let network: Box<dyn PolicyNetwork> =
        create_policy_network(&config.network).context("failed to build network")?;
    println!("input dim:    {}", config.network.input_dim);
    println!("hidden dims:  {:?}", config.network.hidden_dims);
    println!("parameters:   {}", network.parameter_count());

    // Encode the simulator's opening position as a realistic sample state
    let mut sim = ProjectileSim::new(config.simulator.clone());
    sim.reset().await?;
    let snapshot = sim.snapshot().await?;
    let features = FeatureExtractor::default().extract(&snapshot);
    let state = StateEncoder::new(config.encoder).encode_features(&features, &snapshot);
    if state.len() != config.network.input_dim {
        bail!(
            "encoder produces {} values but the network expects {}",
            state.len(),
            config.network.input_dim
        );
    }

    let output = network.forward(&state)?;
    let (action, value) = network.act_deterministic(&state)?;
    println!("mean action:  angle {:.2}°, force {:.3}", action.angle, action.force);
    println!("log std:      {:?}", output.log_std);
    println!("value:        {value:.4}");
    println!("entropy:      {:.4}", output.entropy());
    Ok(())
}
