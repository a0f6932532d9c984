use clap::Parser;
use huntbot_vision::{DetectionConfig, DetectionEngine, Frame, VisionError};
use std::path::PathBuf;
use tower::{Service, ServiceExt};
use tracing::{info, Level};

/// Runs one detection cycle per screenshot and prints each snapshot as JSON.
#[derive(Parser, Debug)]
#[command(name = "huntbot-vision", version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the reach used to pick the best target
    #[arg(long)]
    max_reach: Option<f64>,

    /// Log every stage of every cycle
    #[arg(short, long)]
    verbose: bool,

    /// Screenshots, processed in order so bar calibration carries across them
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), VisionError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut configuration = match &cli.config {
        Some(path) => DetectionConfig::load(path)?,
        None => DetectionConfig::default(),
    };
    if let Some(max_reach) = cli.max_reach {
        configuration = configuration.with_max_reach(max_reach);
    }

    let mut engine = DetectionEngine::new(configuration)?;
    for path in &cli.images {
        let frame = Frame::from_dynamic(image::open(path)?);
        info!(path = %path.display(), frame_id = %frame.id(), "Processing screenshot");
        let snapshot = engine.ready().await?.call(frame).await?;
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    }
    Ok(())
}
