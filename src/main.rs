//! framesift CLI: batch mode processes a directory of frames and writes the
//! result file; serve mode exposes the on-demand single-image service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use framesift::config::{self, PipelineConfig};
use framesift::output;
use framesift::pipeline::correction::{ChatCorrectionClient, CorrectionClient};
use framesift::pipeline::ocr::{OcrEngine, OcrError, RemoteOcrEngine};
use framesift::pipeline::{run_pipeline, PipelineError};
use framesift::server::{serve, ServerState};

#[derive(Debug, Default, PartialEq)]
struct RunArgs {
    frames_dir: PathBuf,
    gpu: Option<bool>,
    max_images: Option<usize>,
    scale_percent: Option<u32>,
    threshold: Option<f64>,
    no_correct: bool,
    no_enhance: bool,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(RunArgs),
    Serve { host: String, port: u16 },
    Help,
}

fn print_usage() {
    println!("framesift v{}", config::APP_VERSION);
    println!();
    println!("Usage:");
    println!("  framesift <frames_dir> [options]    Process a directory of frames");
    println!("  framesift serve [options]           Run the single-image service");
    println!();
    println!("Batch options:");
    println!("  --gpu <true|false>      Accelerated execution mode");
    println!("  --max-images <n>        Cap processed frames (even-stride subsampling)");
    println!("  --scale <percent>       Resize frames before detection (default 30)");
    println!("  --threshold <ratio>     Clustering similarity threshold (default 0.7)");
    println!("  --no-correct            Skip the correction capability");
    println!("  --no-enhance            Skip grayscale + contrast enhancement");
    println!();
    println!("Serve options:");
    println!("  --host <addr>           Listen address (default 127.0.0.1)");
    println!("  --port <port>           Listen port (default 5001)");
}

fn next_value(
    flag: &str,
    iter: &mut std::slice::Iter<'_, String>,
) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("Missing value for {flag}"))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut iter = args.iter();
    let Some(first) = iter.next() else {
        return Ok(Command::Help);
    };
    if first == "--help" || first == "-h" || first == "help" {
        return Ok(Command::Help);
    }
    if first.starts_with('-') {
        return Err(format!("Unknown option: {first}"));
    }

    if first == "serve" {
        let mut host = "127.0.0.1".to_string();
        let mut port = 5001u16;
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "--host" => host = next_value("--host", &mut iter)?,
                "--port" => {
                    port = next_value("--port", &mut iter)?
                        .parse()
                        .map_err(|_| "Invalid value for --port".to_string())?;
                }
                other => return Err(format!("Unknown serve option: {other}")),
            }
        }
        return Ok(Command::Serve { host, port });
    }

    let mut run = RunArgs {
        frames_dir: PathBuf::from(first),
        ..RunArgs::default()
    };
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--gpu" => {
                let raw = next_value("--gpu", &mut iter)?;
                run.gpu = Some(raw.to_lowercase().parse::<bool>().map_err(|_| {
                    format!("Invalid value for --gpu: {raw} (expected true or false)")
                })?);
            }
            "--max-images" => {
                run.max_images = Some(
                    next_value("--max-images", &mut iter)?
                        .parse()
                        .map_err(|_| "Invalid value for --max-images".to_string())?,
                );
            }
            "--scale" => {
                run.scale_percent = Some(
                    next_value("--scale", &mut iter)?
                        .parse()
                        .map_err(|_| "Invalid value for --scale".to_string())?,
                );
            }
            "--threshold" => {
                run.threshold = Some(
                    next_value("--threshold", &mut iter)?
                        .parse()
                        .map_err(|_| "Invalid value for --threshold".to_string())?,
                );
            }
            "--no-correct" => run.no_correct = true,
            "--no-enhance" => run.no_enhance = true,
            other => return Err(format!("Unknown option: {other}")),
        }
    }
    Ok(Command::Run(run))
}

fn apply_overrides(mut config: PipelineConfig, run: &RunArgs) -> PipelineConfig {
    if let Some(gpu) = run.gpu {
        config = config.with_accelerated(gpu);
    }
    if let Some(max_images) = run.max_images {
        config.max_images = Some(max_images);
    }
    if let Some(scale) = run.scale_percent {
        config.scale_percent = scale;
    }
    if let Some(threshold) = run.threshold {
        config.similarity_threshold = threshold;
    }
    if run.no_correct {
        config.correction_enabled = false;
    }
    if run.no_enhance {
        config.enhance_contrast = false;
    }
    config
}

fn run_batch(run: RunArgs) -> Result<(), PipelineError> {
    let config = apply_overrides(PipelineConfig::from_env(), &run);
    tracing::info!(
        accelerated = config.accelerated_mode,
        workers = config.worker_count(),
        scale_percent = config.scale_percent,
        "framesift v{} starting",
        config::APP_VERSION
    );

    let accelerated = config.accelerated_mode;
    let factory = move || -> Result<Box<dyn OcrEngine>, OcrError> {
        Ok(Box::new(RemoteOcrEngine::from_env(accelerated)))
    };

    let correction = if config.correction_enabled {
        let client = ChatCorrectionClient::from_env();
        if client.is_none() {
            tracing::warn!(
                "CORRECTION_API_KEY is not set, multi-member clusters will keep their seed text"
            );
        }
        client
    } else {
        None
    };
    let correction_ref = correction.as_ref().map(|c| c as &dyn CorrectionClient);

    let report = run_pipeline(&run.frames_dir, &config, &factory, correction_ref)?;
    let path = output::write_results(&run.frames_dir, &report.records)?;

    let stats = &report.stats;
    println!(
        "Processed {} frames ({} distinct, {} unreadable) into {} text segments in {} ms",
        stats.frames_selected,
        stats.frames_unique,
        stats.frames_unreadable,
        report.records.len(),
        stats.elapsed_ms,
    );
    println!("Results written to {}", path.display());
    Ok(())
}

fn run_server(host: &str, port: u16) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let state = Arc::new(ServerState::from_env(PipelineConfig::from_env()));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(addr, state))
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args) {
        Ok(Command::Help) => print_usage(),
        Ok(Command::Run(run)) => {
            if let Err(e) = run_batch(run) {
                tracing::error!(error = %e, "Pipeline run failed");
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        Ok(Command::Serve { host, port }) => {
            if let Err(e) = run_server(&host, port) {
                tracing::error!(error = %e, "Service failed");
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    }
}
