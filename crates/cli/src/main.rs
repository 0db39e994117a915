#![deny(warnings)]

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use voice_emotion_core::config::{
    resolve_model_config, resolve_parsed_with_default, AnalysisConfig, ChunkDuration, Env,
    SampleRate, StdEnv, WorkerCount, DEFAULT_CHUNK_DURATION_SECS, DEFAULT_SAMPLE_RATE_HZ,
    DEFAULT_WORKERS, ENV_CHUNK_SECONDS, ENV_SAMPLE_RATE, ENV_WORKERS,
};
use voice_emotion_core::decode::{AudioSource, DecoderChain};
use voice_emotion_core::pipeline::EmotionPipeline;
use voice_emotion_core::synth::{generate_sequence, standard_samples, write_wav, SYNTH_SAMPLE_RATE_HZ};

#[derive(Parser, Debug)]
#[command(name = "voice-emotion")]
#[command(about = "Time-segmented emotion analysis of spoken audio")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a recording and print per-chunk emotions and a summary
    Analyze(AnalyzeArgs),
    /// Write synthetic sample recordings for manual testing
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Audio file (wav, flac, ogg, mp3, m4a, ...)
    file: PathBuf,

    /// Window length in seconds
    #[arg(long)]
    chunk_duration: Option<f64>,

    /// Analysis sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Chunks classified concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Base URL of the emotion model service
    #[arg(long)]
    model_url: Option<String>,

    #[arg(long)]
    model_api_key: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long, default_value = "sample_audio")]
    out_dir: PathBuf,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Command::Analyze(args) => run_analyze(args, &StdEnv).await,
        Command::Generate(args) => run_generate(args),
    }
}

async fn run_analyze(args: AnalyzeArgs, env: &impl Env) -> anyhow::Result<()> {
    let format = args.format;
    let file = args.file.clone();
    let cfg = build_config(args, env)?;

    tracing::info!(
        chunk_duration_s = cfg.chunk_duration.as_secs(),
        sample_rate_hz = cfg.target_sample_rate.hz(),
        workers = cfg.workers.get(),
        model = cfg.model.endpoint.as_ref().map(|u| u.as_str()).unwrap_or("none"),
        "config loaded"
    );

    let decoders = DecoderChain::with_defaults(cfg.target_sample_rate.hz());
    let pipeline = EmotionPipeline::from_config(&cfg).await;
    tracing::info!(classifier = pipeline.classifier_name(), "classifier ready");
    let report = pipeline
        .analyze_source(&decoders, AudioSource::from_path(&file))
        .await
        .with_context(|| format!("failed to analyze {}", file.display()))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    for sample in standard_samples() {
        let audio = generate_sequence(&mut rng, &sample.segments, SYNTH_SAMPLE_RATE_HZ);
        let path = args.out_dir.join(&sample.file_name);
        write_wav(&path, &audio, SYNTH_SAMPLE_RATE_HZ)
            .with_context(|| format!("failed to write {}", path.display()))?;
        let sequence: Vec<String> = sample.segments.iter().map(|(e, _)| e.to_string()).collect();
        tracing::info!(path = %path.display(), sequence = %sequence.join(" -> "), "generated");
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: AnalyzeArgs, env: &impl Env) -> anyhow::Result<AnalysisConfig> {
    let chunk_duration = ChunkDuration::new(resolve_parsed_with_default(
        args.chunk_duration,
        ENV_CHUNK_SECONDS,
        env,
        DEFAULT_CHUNK_DURATION_SECS,
    )?)?;
    let target_sample_rate = SampleRate::new(resolve_parsed_with_default(
        args.sample_rate,
        ENV_SAMPLE_RATE,
        env,
        DEFAULT_SAMPLE_RATE_HZ,
    )?)?;
    let workers = WorkerCount::new(resolve_parsed_with_default(
        args.workers,
        ENV_WORKERS,
        env,
        DEFAULT_WORKERS,
    )?)?;
    let model = resolve_model_config(args.model_url, args.model_api_key, env)?;

    Ok(AnalysisConfig {
        chunk_duration,
        target_sample_rate,
        workers,
        model,
    })
}
