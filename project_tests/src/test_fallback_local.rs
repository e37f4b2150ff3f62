//! # Preferred Host Fallback Walkthrough
//!
//! Runs two local TCP feeds. The standby feed is up from the start; the
//! preferred feed comes up late. The channel starts on the standby, detects
//! the preferred feed on its next check and moves over to it. Every channel
//! notification is printed until the fallback completes.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lib_channel::configs::config_sys::load_channel_config;
use lib_channel::loggers::setup_logging;
use lib_channel::{ChannelBuilder, ChannelConfig, ChannelEvent, Endpoint, FallbackPolicy};
use static_init::dynamic;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

// load .env files before anything else
#[dynamic]
static DOTENV_INIT: () = {
    dotenvy::dotenv().ok();
};

/// Command-line arguments for the fallback walkthrough.
#[derive(Parser, Debug)]
#[command(author, version, about = "Walks a channel through a preferred host fallback", long_about = None)]
pub struct Args {
    /// Seconds before the preferred feed starts listening.
    #[arg(short, long, default_value_t = 5)]
    pub preferred_delay: u64,

    /// Preferred host detection interval in seconds.
    #[arg(short, long, default_value_t = 3)]
    pub interval: u64,

    /// Overall deadline for the walkthrough in seconds.
    #[arg(short, long, default_value_t = 60)]
    pub deadline: u64,
}

/// Accepts connections and writes a tagged tick to each one every second.
async fn serve_feed(listener: TcpListener, tag: &'static str) {
    loop {
        let Ok((mut socket, peer)) = listener.accept().await else {
            return;
        };
        info!(feed = tag, %peer, "Feed accepted connection");
        tokio::spawn(async move {
            let mut seq = 0_u64;
            loop {
                seq += 1;
                let tick = format!("{tag}:{seq}\n");
                if socket.write_all(tick.as_bytes()).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }
}

/// Reserves a free local port for the late feed.
async fn free_port() -> Result<u16> {
    let reserved = TcpListener::bind("127.0.0.1:0").await?;
    Ok(reserved.local_addr()?.port())
}

/// Settings from the runtime config when available, the local feeds always.
fn channel_config(preferred: u16, standby: u16, interval: u64) -> ChannelConfig {
    let base = match load_channel_config() {
        Ok(config) => config,
        Err(e) => {
            warn!("Using built-in channel settings: {}", e);
            ChannelConfig::default().with_reconnect_delays(
                Duration::from_millis(250),
                Duration::from_secs(2),
            )
        }
    };
    ChannelConfig {
        name: "fallback-walkthrough".to_string(),
        endpoints: vec![
            Endpoint::new("127.0.0.1", preferred),
            Endpoint::new("127.0.0.1", standby),
        ],
        preferred_host: FallbackPolicy {
            enabled: true,
            connection_list_index: 0,
            detection_interval: interval,
            detection_schedule: String::new(),
        },
        ..base
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging("test_fallback_local").context("Failed to set up logging")?;

    let standby = TcpListener::bind("127.0.0.1:0").await?;
    let standby_port = standby.local_addr()?.port();
    tokio::spawn(serve_feed(standby, "standby"));

    let preferred_port = free_port().await?;
    let preferred_delay = Duration::from_secs(args.preferred_delay);
    tokio::spawn(async move {
        tokio::time::sleep(preferred_delay).await;
        match TcpListener::bind(("127.0.0.1", preferred_port)).await {
            Ok(listener) => serve_feed(listener, "preferred").await,
            Err(e) => warn!("Preferred feed could not bind {}: {}", preferred_port, e),
        }
    });

    let config = channel_config(preferred_port, standby_port, args.interval);
    println!("[*] Starting channel: {}", endpoint_chain(&config));
    let (channel, mut events) = ChannelBuilder::new(config).start()?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.deadline));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                eprintln!("[ERROR] No successful fallback before the deadline");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ChannelEvent::Message { payload } => {
                        println!("[MSG]  {}", String::from_utf8_lossy(payload).trim_end());
                    }
                    ChannelEvent::FallbackComplete { endpoint } if endpoint.port == preferred_port => {
                        println!("[EVT]  {}", event.kind());
                        println!("[SUCCESS] Traffic moved to the preferred feed {}", endpoint);
                        break;
                    }
                    other => println!("[EVT]  {} {:?}", other.kind(), other),
                }
            }
        }
    }

    let snapshot = channel.info().await?;
    println!("-----------------------------------------------");
    println!("{:#?}", snapshot);
    println!("-----------------------------------------------");
    channel.close().await?;
    Ok(())
}

fn endpoint_chain(config: &ChannelConfig) -> String {
    config
        .endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
