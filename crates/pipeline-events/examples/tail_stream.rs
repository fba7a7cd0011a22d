//! Tail Stream Example
//!
//! Mounts a client for one pipeline run, optionally sends a message, and
//! prints every event until the stream closes or fails.
//!
//! Run with:
//! `PIPELINE_URL=http://localhost:6789 STREAM_ID=run-42 cargo run -p pipeline-events --example tail_stream -- run`

use std::time::Duration;

use pipeline_events::{ConnectionState, EventStreamClient, StreamConfig, StreamIdentifier};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base_url =
        std::env::var("PIPELINE_URL").unwrap_or_else(|_| "http://localhost:6789".to_string());
    let stream = StreamIdentifier::new(std::env::var("STREAM_ID").unwrap_or_default())?;

    let mut config = StreamConfig::new(base_url)
        .max_connection_attempts(5)
        .reconnect_base_delay(Duration::from_secs(1));
    if let Ok(token) = std::env::var("PIPELINE_TOKEN") {
        config = config.bearer_token(token);
    }

    let client = EventStreamClient::mount(config, stream).await?;

    if let Some(message) = std::env::args().nth(1) {
        let request_id = client.send_message(message);
        println!("sent message {request_id}");
    }

    let mut updates = client.updates();
    let mut printed = 0;
    let mut acked = 0;
    while updates.changed().await.is_ok() {
        let snapshot = client.snapshot();

        for event in snapshot.events.iter().skip(printed).flatten() {
            println!("[{}] {} {}", event.timestamp, event.r#type, event.result);
        }
        printed = snapshot.events.len();

        for ack in snapshot.messages.iter().skip(acked) {
            println!("ack {} (pid {})", ack.message_request_uuid, ack.pid);
        }
        acked = snapshot.messages.len();

        if snapshot.status == ConnectionState::Failed {
            for error in &snapshot.errors {
                eprintln!("{}: {}", error.kind, error.message);
            }
            break;
        }
    }

    client.unmount();
    Ok(())
}
