use std::time::Duration;

use ph803w::{discover, DiscoveryConfig, DiscoveryEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

const LISTEN_FOR: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (discovery, mut events) = match discover(DiscoveryConfig::default()).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Can not start discovery: {}", e);
            return;
        }
    };

    println!("Listening for PH803-W devices for {:?}...", LISTEN_FOR);
    let _ = timeout(LISTEN_FOR, async {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("Skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                DiscoveryEvent::Device(device) => match serde_json::to_string(&device) {
                    Ok(json) => println!("Device: {}", json),
                    Err(e) => eprintln!("Can not serialize device: {}", e),
                },
                DiscoveryEvent::Error(e) => eprintln!("Error: {}", e),
            }
        }
    })
    .await;

    discovery.stop();
}
