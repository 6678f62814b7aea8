//! classcall CLI Application

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classcall_core::prelude::*;
use classcall_core::DeviceAccess;
use demo::{DemoOptions, DemoOutcome};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod demo;
#[cfg(test)]
mod demo_tests;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "CLASSCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Participant id (e.g., "teacher-42")
    #[arg(short, long, env = "CLASSCALL_IDENTITY")]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a two-party call in this process
    Demo {
        /// Participant to call
        #[arg(long, default_value = "student-1")]
        callee: String,

        /// Caller has no camera
        #[arg(long)]
        caller_no_video: bool,

        /// Callee has no camera
        #[arg(long)]
        callee_no_video: bool,

        /// Caller's camera is held by another application
        #[arg(long)]
        camera_busy: bool,

        /// Callee declines the call
        #[arg(long)]
        decline: bool,

        /// Milliseconds to stay connected before hanging up
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,
    },

    /// List simulated devices and check capture
    Devices {
        /// Simulate a busy camera
        #[arg(long)]
        camera_busy: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("classcall=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let identity = cli.identity.unwrap_or_else(generate_random_identity);

    match cli.command {
        Commands::Demo {
            callee,
            caller_no_video,
            callee_no_video,
            camera_busy,
            decline,
            hold_ms,
        } => {
            println!("🔗 Using identity: {}", identity);
            let options = DemoOptions {
                caller: identity,
                callee,
                caller_video: !caller_no_video,
                callee_video: !callee_no_video,
                camera_busy,
                decline,
                hold: Duration::from_millis(hold_ms),
            };
            let outcome = demo::run_demo(&config, &options).await?;
            print_outcome(&outcome);
        }
        Commands::Devices { camera_busy } => {
            handle_devices(&config, camera_busy).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<CallConfig> {
    match path {
        Some(path) => CallConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(CallConfig::default()),
    }
}

async fn handle_devices(config: &CallConfig, camera_busy: bool) -> Result<()> {
    let access = DeviceAccess::new(
        Arc::new(demo::devices_for(true, camera_busy)),
        config.audio.clone(),
        config.video.clone(),
    );

    println!("📊 Devices");
    println!("==========");
    for kind in [DeviceKind::VideoInput, DeviceKind::AudioInput, DeviceKind::AudioOutput] {
        for device in access.list_devices(kind).await? {
            let label = if device.label.is_empty() {
                "(label hidden until permission)"
            } else {
                device.label.as_str()
            };
            println!("  {:?}: {} {}", kind, device.device_id, label);
        }
    }

    let acquisition = access.acquire_stream(true, true).await;
    println!();
    println!(
        "Capture check: audio={} video={}",
        acquisition.stream.audio_track().is_some(),
        acquisition.stream.video_track().is_some()
    );
    for notice in &acquisition.notices {
        println!("⚠️  {}", notice.message());
    }
    acquisition.stream.stop_all();
    Ok(())
}

fn print_outcome(outcome: &DemoOutcome) {
    println!();
    println!("📊 Demo summary");
    println!("===============");
    println!("Connected: {}", outcome.connected);
    if outcome.connected {
        println!("Caller audio-only: {}", outcome.caller_audio_only);
        println!("Callee audio-only: {}", outcome.callee_audio_only);
    }
    for notice in &outcome.caller_notices {
        println!("Caller notice: {}", notice.code());
    }
    if let (Some(caller), Some(callee)) = (outcome.caller_state, outcome.callee_state) {
        println!("Final states: caller={caller:?} callee={callee:?}");
    }
}

fn generate_random_identity() -> String {
    const ROLES: &[&str] = &["teacher", "student", "tutor", "guest"];

    let mut rng = rand::thread_rng();
    let role = ROLES[rng.gen_range(0..ROLES.len())];
    format!("{}-{}", role, rng.gen_range(100..1000))
}
