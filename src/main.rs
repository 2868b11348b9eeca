use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod common;
mod config;
mod infrastructure;
mod modules;
mod pipeline;
mod state;
#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use config::env::ProcessEnv;
use config::{AppConfig, LogFormat};
use pipeline::ShutdownReport;
use state::AppState;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vodflow=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run_worker(state: AppState) -> Result<ShutdownReport> {
    let grace = state.config.worker.shutdown_grace;
    info!(
        workers = state.config.worker.count,
        queue = %state.config.queue.name,
        "🎥 Starting pipeline workers"
    );

    let handle = app::create_runner(&state).start(CancellationToken::new());

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
    Ok(handle.shutdown(grace).await)
}

async fn print_status(state: &AppState, video_id: &str) -> Result<()> {
    let video = state.videos.get_video(video_id).await?;

    println!("id:         {}", video.id);
    println!("filename:   {}", video.filename);
    println!("status:     {}", video.status);
    println!("original:   {}", video.original_object_key);
    if let Some(duration) = video.duration_seconds {
        println!("duration:   {}s", duration);
    }
    if let (Some(width), Some(height)) = (video.width, video.height) {
        println!("resolution: {}x{}", width, height);
    }
    if !video.available_qualities.is_empty() {
        println!("qualities:  {}", video.available_qualities.join(", "));
    }
    if let Some(manifest) = &video.manifest_path {
        println!("manifest:   {}", manifest);
    }
    if let Some(thumbnail) = &video.thumbnail_key {
        println!("thumbnail:  {}", thumbnail);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    init_tracing(LogFormat::resolve(&ProcessEnv));
    let config = AppConfig::new()?;

    let state = AppState::connect(config).await?;

    match cli.command.unwrap_or(Commands::Worker) {
        Commands::Worker => {
            let report = run_worker(state).await?;
            if report.panics > 0 {
                warn!(panics = report.panics, "Workers panicked during this run");
            }
        }
        Commands::Submit { file } => {
            let submitted = state.videos.submit(&file).await?;
            println!("{}", submitted.id);
            info!(key = %submitted.object_key, sha256 = %submitted.sha256, "Uploaded");
        }
        Commands::Enqueue { video_id, step, reset } => {
            state.videos.requeue(&video_id, step, reset).await?;
        }
        Commands::Status { video_id } => print_status(&state, &video_id).await?,
    }

    Ok(())
}
