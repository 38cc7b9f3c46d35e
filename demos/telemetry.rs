use ph803w::{Device, DeviceConfig, DeviceEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // RUST_LOG=ph803w=debug shows the protocol traffic
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(host) = std::env::args().nth(1) else {
        println!("Usage: telemetry 192.168.1.50");
        return;
    };

    let device = match Device::spawn(DeviceConfig::new(host)) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };
    let mut events = device.subscribe();

    if let Err(e) = device.connect().await {
        // auto reconnect keeps trying
        eprintln!("Connect failed: {}", e);
    }

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
            DeviceEvent::Connected => {
                println!("Connected");
                let device = device.clone();
                tokio::spawn(async move {
                    if let Err(e) = device.authenticate(None).await {
                        eprintln!("Login failed: {}", e);
                        return;
                    }
                    if let Err(e) = device.retrieve_data().await {
                        eprintln!("Retrieving data failed: {}", e);
                    }
                });
            }
            DeviceEvent::Disconnected => println!("Disconnected"),
            DeviceEvent::Data(reading) => match serde_json::to_string(&reading) {
                Ok(json) => println!("Data: {}", json),
                Err(e) => eprintln!("Can not serialize reading: {}", e),
            },
            DeviceEvent::Error(e) => eprintln!("Error: {}", e),
        }
    }
}
