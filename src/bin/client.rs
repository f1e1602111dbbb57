//! Huddle Client
//!
//! ```text
//! huddle-client [--server IP] chat
//! huddle-client [--server IP] file <PATH>
//! huddle-client [--server IP] video <DIR>      # sends every .jpg in DIR at ~30 fps
//! huddle-client [--server IP] voice [SECONDS]  # 440 Hz test tone
//! ```
//!
//! Ports and the voice stream format come from the same configuration the
//! server loads (`HUDDLE_CONFIG` or the platform config file), with
//! `HUDDLE_TCP_PORT` and `HUDDLE_UDP_PORT` applied on top.

use anyhow::{bail, Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_huddle::{
    client::{self, ToneGenerator, VideoPublisher, VoiceSender},
    config::{ServerConfig, VoiceConfig},
    constants::CHAT_RECV_BUFFER,
    protocol::Mode,
};

/// Pause between video frames
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

enum Command {
    Chat,
    File(PathBuf),
    Video(PathBuf),
    Voice(u64),
}

fn usage() -> ! {
    eprintln!("usage: huddle-client [--server IP] <chat | file PATH | video DIR | voice [SECONDS]>");
    std::process::exit(2);
}

fn parse_args() -> Result<(IpAddr, Command)> {
    let mut server = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--server") {
        if args.len() < 2 {
            usage();
        }
        server = args[1].parse().context("invalid server IP address")?;
        args.drain(..2);
    }

    let command = match args.first().map(String::as_str) {
        Some("chat") => Command::Chat,
        Some("file") => Command::File(args.get(1).map(PathBuf::from).unwrap_or_else(|| usage())),
        Some("video") => Command::Video(args.get(1).map(PathBuf::from).unwrap_or_else(|| usage())),
        Some("voice") => {
            let seconds = match args.get(1) {
                Some(s) => s.parse().context("invalid duration")?,
                None => 5,
            };
            Command::Voice(seconds)
        }
        _ => usage(),
    };
    Ok((server, command))
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

    let (server, command) = parse_args()?;
    let config = ServerConfig::load().context("loading configuration")?;
    let tcp = SocketAddr::new(server, config.network.tcp_port);
    let udp = SocketAddr::new(server, config.network.udp_port);

    match command {
        Command::Chat => run_chat(tcp).await,
        Command::File(path) => run_file(tcp, &path).await,
        Command::Video(dir) => run_video(tcp, &dir).await,
        Command::Voice(seconds) => run_voice(udp, &config.voice, seconds).await,
    }
}

/// Lines from stdin out, everything received to stdout
async fn run_chat(addr: SocketAddr) -> Result<()> {
    let stream = client::connect(addr, Mode::Chat).await?;
    tracing::info!("Connected to chat at {}. Type 'exit' to leave.", addr);
    let (mut reader, mut writer) = stream.into_split();

    let receiver = tokio::spawn(async move {
        let mut buf = vec![0u8; CHAT_RECV_BUFFER];
        let mut stdout = tokio::io::stdout();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdout.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
            }
        }
        tracing::info!("Chat connection closed by server");
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line == "exit" {
            break;
        }
        let mut message = line.into_bytes();
        message.push(b'\n');
        if let Err(e) = writer.write_all(&message).await {
            tracing::error!("Failed to send message, connection lost: {}", e);
            break;
        }
    }

    writer.shutdown().await.ok();
    drop(writer);
    receiver.abort();
    tracing::info!("Chat mode ended");
    Ok(())
}

async fn run_file(addr: SocketAddr, path: &Path) -> Result<()> {
    let sent = client::send_file_path(addr, path)
        .await
        .with_context(|| format!("sending {}", path.display()))?;
    tracing::info!("File sent: {} ({} bytes)", path.display(), sent);
    Ok(())
}

async fn run_video(addr: SocketAddr, dir: &Path) -> Result<()> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
        if is_jpeg {
            frames.push(path);
        }
    }
    frames.sort();
    if frames.is_empty() {
        bail!("no .jpg files in {}", dir.display());
    }

    let mut publisher = VideoPublisher::connect(addr).await?;
    tracing::info!("Streaming {} frames to {}", frames.len(), addr);
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    for path in &frames {
        ticker.tick().await;
        let payload = tokio::fs::read(path).await?;
        if payload.is_empty() {
            tracing::warn!("Skipping empty frame {}", path.display());
            continue;
        }
        if let Err(e) = publisher.send_frame(&payload).await {
            // most likely taken over by another producer
            tracing::warn!("Video stream ended early: {}", e);
            return Ok(());
        }
    }
    let sent = publisher.frames_sent();
    publisher.finish().await?;
    tracing::info!("Video stream finished ({} frames)", sent);
    Ok(())
}

async fn run_voice(addr: SocketAddr, voice: &VoiceConfig, seconds: u64) -> Result<()> {
    let mut sender = VoiceSender::connect(addr).await?;
    let mut tone = ToneGenerator::from_config(440.0, voice);
    let block_time = tone.block_duration();
    let blocks = (seconds as f64 / block_time.as_secs_f64()).ceil() as u64;
    tracing::info!(
        "Voice streaming started to {} ({} Hz, {} samples per block). Press Ctrl+C to stop.",
        addr,
        tone.sample_rate(),
        tone.frames_per_block()
    );

    let mut ticker = tokio::time::interval(block_time);
    for _ in 0..blocks {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = sender.send_block(&tone.next_block()).await {
            tracing::error!("Failed to send audio data: {}", e);
            break;
        }
    }

    let sent = sender.blocks_sent();
    sender.stop().await?;
    tracing::info!("Voice streaming ended ({} blocks)", sent);
    Ok(())
}
