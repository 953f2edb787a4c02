use anyhow::{Context, Result};
use bigearth_select::config::Config;
use bigearth_select::logging::init_logging;
use bigearth_select::telemetry::{JsonlTelemetry, Telemetry, TelemetryHub, TracingTelemetry};
use bigearth_select::training::{FitSummary, MetricsBundle};
use bigearth_select::{
    Classifier, ConfiguredOptimizer, DataSource, SyntheticDataSource, TrainingController,
    TrainingEvent,
};
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "bigearth-select")]
#[command(about = "Multi-label training with epoch metrics and best-model tracking", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true, env = "BIGEARTH_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on synthetic multi-label data, then evaluate on the test split
    Train {
        /// Configuration file (JSON or YAML); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for JSONL telemetry and figures
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Override trainer.max_epochs
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Validate configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,

        /// Write the default configuration to `file` instead
        #[arg(long)]
        init: bool,
    },

    /// Show system information
    Info,
}

#[derive(Serialize)]
struct RunSummary {
    fit: FitSummary,
    test: MetricsBundle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            output_dir,
            epochs,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
                None => Config::default(),
            };
            if let Some(dir) = output_dir {
                config.logging.output_dir = Some(dir);
            }
            if let Some(epochs) = epochs {
                config.trainer.max_epochs = epochs;
            }
            init_logging(cli.verbose, cli.quiet, cli.json || config.logging.json, &config.logging.level)?;
            train(config).await?;
        }

        Commands::Config { file, init } => {
            init_logging(cli.verbose, cli.quiet, cli.json, "info")?;
            if init {
                write_default_config(file)?;
            } else {
                validate_config(file)?;
            }
        }

        Commands::Info => {
            show_system_info();
        }
    }

    Ok(())
}

async fn train(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    info!("Starting training for {} epochs", config.trainer.max_epochs);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                TrainingEvent::BestUpdated { epoch, monitor, value } => {
                    info!("Best {} so far: {:.4} (epoch {})", monitor, value, epoch);
                }
                TrainingEvent::PhaseCompleted { split, epoch, f1_score, loss, .. } => {
                    info!("{} epoch {}: f1 {:.4}, loss {:.4}", split, epoch, f1_score, loss);
                }
                other => debug!(?other, "training event"),
            }
        }
    });

    // candle models are not Send; build and run everything on one blocking thread
    let summary = tokio::task::spawn_blocking(move || run_training(config, tx))
        .await
        .context("Training task panicked")?
        .context("Training failed")?;
    listener.await.context("Event listener panicked")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_training(
    config: Config,
    tx: mpsc::UnboundedSender<TrainingEvent>,
) -> bigearth_select::Result<RunSummary> {
    let device = config.trainer.device.device()?;
    let mut source = SyntheticDataSource::new(&config.data, config.trainer.seed, device.clone())?;

    let var_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
    let model = Classifier::new(&config.model, config.data.num_classes, vb)?;
    let optimizer = ConfiguredOptimizer::from_config(&config.optimizer, &var_map)?;
    info!(
        "Model: {} linear layers, optimizer {} (lr {})",
        model.num_layers(),
        optimizer.name(),
        optimizer.learning_rate()
    );

    let mut controller =
        TrainingController::new(&config, source.class_names(), Box::new(model), build_telemetry(&config)?)?
            .with_optimizer(optimizer)
            .with_event_monitoring(tx);

    let fit = controller.fit(&mut source)?;
    let test = controller.test(&mut source)?;
    Ok(RunSummary { fit, test })
}

fn build_telemetry(config: &Config) -> bigearth_select::Result<Box<dyn Telemetry>> {
    let mut hub = TelemetryHub::new().with_sink(Box::new(TracingTelemetry));
    if let Some(dir) = &config.logging.output_dir {
        hub = hub.with_sink(Box::new(JsonlTelemetry::new(dir)?));
    }
    Ok(Box::new(hub))
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", config_path.display());

    let config = Config::from_file(&config_path).context("Failed to load configuration file")?;

    info!("Configuration is valid");
    info!("Configuration summary:");
    info!("  - Monitor: {:?} {}", config.monitor.mode, config.monitor.name);
    info!("  - Optimizer: {:?}", config.optimizer);
    info!("  - Model: {:?}", config.model);
    info!(
        "  - Classes: {} ({} epochs, batch size {})",
        config.data.num_classes, config.trainer.max_epochs, config.data.batch_size
    );

    Ok(())
}

fn write_default_config(config_path: PathBuf) -> Result<()> {
    Config::default()
        .to_file(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    info!("Default configuration written to {}", config_path.display());
    Ok(())
}

fn show_system_info() {
    println!("BigEarth Select - multi-label epoch metrics and model selection");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Monitors: loss (min), precision, recall, f1_score (max)");
    println!("Optimizers: adam, sgd");
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  + NVIDIA CUDA");
    #[cfg(not(feature = "cuda"))]
    println!("  - CUDA support (not compiled)");

    #[cfg(feature = "metal")]
    println!("  + Apple Metal");
    #[cfg(not(feature = "metal"))]
    println!("  - Metal support (not compiled)");

    #[cfg(feature = "accelerate")]
    println!("  + Apple Accelerate");
    #[cfg(not(feature = "accelerate"))]
    println!("  - Accelerate support (not compiled)");

    println!("  + CPU");
    println!();
    println!("Usage:");
    println!("  bigearth-select train -c config.yaml -o runs/exp1");
    println!("  bigearth-select config -f config.yaml          # Validate configuration");
    println!("  bigearth-select config -f config.yaml --init   # Write defaults");
    println!("  bigearth-select info                           # Show this information");
}
