use aura_reflect::{
    engine::{DiffusionRunner, EngineRouter, ImageEngine},
    logger::{self, LogLevel, LoggerConfig},
    models::{ensure_data_uri, CallOptions, DataUri, EngineConfig, EngineMode, GenerationRequest, RefineRequest},
    EngineSettings, RunnerConfig,
};
use clap::{Parser, Subcommand};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "aura-reflect", version, about = "Moodboard image generation across local and cloud engines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe both engines and print their status.
    Health,
    Generate(GenerateArgs),
    Refine(RefineArgs),
    /// Run the Hugging Face glue service.
    #[cfg(feature = "server")]
    Serve,
}

#[derive(Debug, Parser)]
struct EngineArgs {
    #[arg(long, default_value = "auto")]
    mode: EngineMode,
    /// Use the spawned diffusion runner instead of the HTTP engines.
    #[arg(long)]
    runner: bool,
    #[arg(long)]
    model_path: Option<String>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    guidance_scale: Option<f32>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

impl EngineArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model_path: self.model_path.clone(),
            steps: self.steps,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect: String,
    #[arg(long, default_value_t = 0.8)]
    temperature: f32,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    prompt: String,
    /// Source images to refine.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_loaded = dotenv::dotenv().is_ok();

    let level = LogLevel::from_name(&env::var("RUST_LOG").unwrap_or_default());
    logger::init_with_config(LoggerConfig::default().with_level(level))?;
    if !env_loaded {
        log::debug!("No .env file found, using system environment variables");
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Health => run_health().await,
        Command::Generate(args) => run_generate(args).await,
        Command::Refine(args) => run_refine(args).await,
        #[cfg(feature = "server")]
        Command::Serve => {
            let config = aura_reflect::ServerConfig::from_env()?;
            aura_reflect::server::http::run(config).await?;
            Ok(())
        }
    }
}

async fn build_router() -> Result<EngineRouter, Box<dyn std::error::Error>> {
    let settings = EngineSettings::from_env()?;
    logger::log_settings_info(&settings);
    Ok(EngineRouter::connect(&settings).await?)
}

async fn run_health() -> Result<(), Box<dyn std::error::Error>> {
    let board = build_router().await?.health_board().await;

    for (name, snapshot) in [("local", &board.local), ("cloud", &board.cloud)] {
        match snapshot {
            None => log::warn!("{} engine was not probed", name),
            Some(snapshot) => match &snapshot.error {
                Some(error) => log::warn!("{} engine {}: {}", name, snapshot.status_label(), error),
                None => log::info!(
                    "{} engine {} (device: {})",
                    name,
                    snapshot.status_label(),
                    snapshot.device().unwrap_or("unknown")
                ),
            },
        }
    }
    Ok(())
}

async fn run_generate(args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let _timer = logger::timer("generate");
    let request =
        GenerationRequest::new(&args.prompt, &args.aspect, args.temperature).with_config(args.engine.engine_config());

    let images = if args.engine.runner {
        let runner = DiffusionRunner::new(RunnerConfig::from_env());
        runner.generate(&request, CallOptions::fallback_enabled()).await?.images
    } else {
        let outcome = build_router().await?.generate(args.engine.mode, &request).await?;
        log_decision(&outcome.decision);
        outcome.images
    };

    write_images(&images, &args.engine.out)
}

async fn run_refine(args: RefineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let _timer = logger::timer("refine");
    let base_images = args
        .images
        .iter()
        .map(|path| read_image(path))
        .collect::<Result<Vec<_>, _>>()?;
    let request = RefineRequest::new(base_images, &args.prompt).with_config(args.engine.engine_config());

    let images = if args.engine.runner {
        let runner = DiffusionRunner::new(RunnerConfig::from_env());
        runner.refine(&request, CallOptions::fallback_enabled()).await?.images
    } else {
        let outcome = build_router().await?.refine(args.engine.mode, &request).await?;
        log_decision(&outcome.decision);
        outcome.images
    };

    write_images(&images, &args.engine.out)
}

fn log_decision(decision: &aura_reflect::RouteDecision) {
    log::info!(
        "Routed {} call, served by {} engine{}{}",
        decision.mode,
        decision.engine,
        decision.reason.map(|r| format!(" ({})", r)).unwrap_or_default(),
        if decision.fell_back { " after fallback" } else { "" }
    );
}

fn read_image(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let mime_type = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(DataUri::from_bytes(&bytes, mime_type).to_string())
}

fn write_images(images: &[String], out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(out)?;
    let stamp = chrono::Utc::now().timestamp_millis();
    for (index, image) in images.iter().enumerate() {
        let bytes = DataUri::parse(&ensure_data_uri(image))?.decode()?;
        let path = out.join(format!("aura-reflect-{}-{}.png", stamp, index));
        fs::write(&path, bytes)?;
        log::info!("Saved {}", path.display());
    }
    Ok(())
}
