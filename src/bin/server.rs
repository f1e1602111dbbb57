//! Huddle Server
//!
//! Serves chat, file and video on one TCP port and voice on a UDP port.
//!
//! ```text
//! huddle-server [--pcm-out FILE] [--frame-out FILE]
//! ```
//!
//! Voice is appended to `--pcm-out` as raw PCM16 (dropped if not given). The
//! newest video frame is kept in `--frame-out` (default `latest_frame.jpg`).

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_huddle::{
    config::ServerConfig,
    server::Server,
    video::{spawn_display, LatestFrameSink},
    voice::{AudioDevice, NullDevice, RawFileDevice},
};

struct Args {
    pcm_out: Option<PathBuf>,
    frame_out: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        pcm_out: None,
        frame_out: PathBuf::from("latest_frame.jpg"),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--pcm-out" => args.pcm_out = Some(it.next().context("--pcm-out needs a path")?.into()),
            "--frame-out" => args.frame_out = it.next().context("--frame-out needs a path")?.into(),
            "-h" | "--help" => {
                println!("usage: huddle-server [--pcm-out FILE] [--frame-out FILE]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huddle Server");

    let args = parse_args()?;
    let config = ServerConfig::load().context("loading configuration")?;
    let poll = config.video.poll_interval();

    let audio: Box<dyn AudioDevice> = match &args.pcm_out {
        Some(path) => Box::new(RawFileDevice::create(path).context("opening PCM output")?),
        None => Box::new(NullDevice),
    };

    let server = Server::bind(config).await.context("binding sockets")?;
    tracing::info!(
        "Chat/file/video on {}, voice on {}",
        server.local_tcp_addr(),
        server.local_udp_addr()
    );
    let handle = server.run(audio)?;

    let display = spawn_display(
        handle.frame_queue(),
        Box::new(LatestFrameSink::new(&args.frame_out)),
        poll,
    )
    .context("starting display thread")?;
    tracing::info!("Latest video frame written to {}", args.frame_out.display());

    shutdown_signal().await?;
    tracing::info!("Shutting down...");
    handle.shutdown().await;

    // the queue is closed by now, so the display loop returns
    let stats = tokio::task::spawn_blocking(move || display.join())
        .await?
        .map_err(|_| anyhow::anyhow!("display thread panicked"))?;
    tracing::info!(
        "Displayed {} frames over {} sessions",
        stats.frames_shown,
        stats.sessions
    );

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
