use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use phase_watch::events::{self, Event};
use phase_watch::{Detector, DetectorConfig, Phase, ProbeScript, ScriptedBackend};

#[derive(Parser)]
#[command(name = "phase-watch")]
#[command(about = "Replay a probe script through the phase detector and log transitions")]
#[command(version)]
struct Cli {
    /// JSON probe script to replay, one snapshot per poll cycle
    #[arg(long, value_name = "PATH")]
    script: PathBuf,

    /// Detector configuration file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DetectorConfig::load_default().context("Failed to load default config")?,
    };
    let script = ProbeScript::load(&cli.script)
        .with_context(|| format!("Failed to load probe script {}", cli.script.display()))?;
    tracing::info!(
        steps = script.steps.len(),
        repeat = script.repeat,
        "Loaded probe script"
    );

    let backend = Arc::new(ScriptedBackend::from_script(script));
    let detector = Arc::new(
        Detector::with_config(backend, config).context("Invalid detector configuration")?,
    );

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    events::forward_transitions(&detector, tx.clone());

    // Spawn shutdown handlers
    let quit_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(Event::Quit);
        }
    });
    if let Some(secs) = cli.duration {
        let quit_tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = quit_tx.send(Event::Quit);
        });
    }
    drop(tx);

    if !detector.start() {
        anyhow::bail!("Failed to start detector");
    }

    let mut transitions = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            Event::Transition { old, new } => {
                transitions += 1;
                tracing::info!("{} -> {}", old, new);
            }
            Event::SessionJoined { name, id } => {
                tracing::info!("Joined '{}' ({})", name, id);
            }
            Event::Quit => break,
        }
    }

    // Stop blocks until the polling thread exits
    let stopper = Arc::clone(&detector);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("Detector stop task failed")?;

    let phase = detector.state();
    if phase == Phase::InSession {
        tracing::info!(
            "Final phase: {} ('{}', {}s)",
            phase,
            detector.session_name(),
            detector.time_in_session()
        );
    } else {
        tracing::info!("Final phase: {}", phase);
    }
    tracing::info!("Observed {} transitions", transitions);

    Ok(())
}
