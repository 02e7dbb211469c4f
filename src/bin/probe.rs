//! Headless scopecast client.
//!
//! Connects to a running server, plays the client half of the configured
//! flow-control policy, checks every frame's size and logs the observed
//! frame rate once per reporting period.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use scopecast::frame;
use scopecast::{AdaptiveRequester, PolicyKind};
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scopecast-probe")]
#[command(version = "0.1.0")]
#[command(about = "Consumes a scopecast stream and reports frame rate", long_about = None)]
struct Args {
    /// WebSocket endpoint of the server
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Flow-control policy the server runs
    #[arg(short, long, value_enum, default_value_t = PolicyKind::Demand)]
    policy: PolicyKind,

    /// Group count of the first request
    #[arg(short, long, default_value_t = 1000)]
    groups: usize,

    /// Samples per group, as configured on the server
    #[arg(long, default_value_t = 5)]
    group_width: usize,

    /// Adaptive policy: halve the request below this frame rate
    #[arg(long, default_value_t = 10.0)]
    threshold_fps: f64,

    /// Adaptive policy: rate measurement window in seconds
    #[arg(long, default_value_t = 5)]
    window_secs: u64,

    /// Stop after this many frames
    #[arg(short, long)]
    frames: Option<u64>,

    /// Seconds between rate reports
    #[arg(long, default_value_t = 1)]
    report_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(url = %args.url, policy = %args.policy, groups = args.groups, "Connecting");
    let (mut ws, _) = connect_async(args.url.as_str()).await?;

    let mut requester = AdaptiveRequester::new(
        args.groups,
        args.threshold_fps,
        Duration::from_secs(args.window_secs.max(1)),
        Instant::now(),
    );
    // Group count of the request the next frame answers
    let mut pending = None;
    if args.policy != PolicyKind::Interval {
        ws.send(Message::text(requester.signal())).await?;
        pending = Some(requester.groups());
    }

    let mut report = tokio::time::interval(Duration::from_secs(args.report_secs.max(1)));
    report.tick().await;
    let mut period_start = Instant::now();
    let mut period_frames = 0u64;
    let mut period_bytes = 0usize;
    let mut total_frames = 0u64;
    let mut mismatched = 0u64;

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let samples = frame::decode(&data)?;
                    if let Some(groups) = pending {
                        let expected = expected_samples(groups, args.group_width);
                        if samples.len() != expected {
                            warn!(expected, actual = samples.len(), "Unexpected frame size");
                            mismatched += 1;
                        }
                    }

                    let now = Instant::now();
                    requester.record_frame(now);
                    period_frames += 1;
                    period_bytes += data.len();
                    total_frames += 1;
                    debug!(samples = samples.len(), "Frame");

                    if args.frames.is_some_and(|limit| total_frames >= limit) {
                        break;
                    }

                    let next = match args.policy {
                        PolicyKind::Interval => None,
                        PolicyKind::Demand => Some(requester.groups()),
                        PolicyKind::Adaptive => Some(requester.next_request(now)),
                    };
                    if let Some(groups) = next {
                        ws.send(Message::text(scopecast::protocol::format_request(groups))).await?;
                        pending = Some(groups);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Server closed the stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = report.tick() => {
                let secs = period_start.elapsed().as_secs_f64();
                info!(
                    fps = (period_frames as f64 / secs) as u64,
                    kib_per_sec = (period_bytes as f64 / secs / 1024.0) as u64,
                    groups = requester.groups(),
                    "Rate"
                );
                period_start = Instant::now();
                period_frames = 0;
                period_bytes = 0;
            }
        }
    }

    let _ = ws.close(None).await;
    info!(frames = total_frames, mismatched, "Probe finished");
    if mismatched > 0 {
        return Err(format!("{mismatched} frames had an unexpected size").into());
    }
    Ok(())
}

/// Samples a frame answering a request for `groups` should carry.
fn expected_samples(groups: usize, group_width: usize) -> usize {
    groups.saturating_mul(group_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_samples() {
        assert_eq!(expected_samples(1000, 5), 5000);
        assert_eq!(expected_samples(0, 5), 0);
        assert_eq!(expected_samples(usize::MAX, 5), usize::MAX);
    }
}
