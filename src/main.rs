use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use guntamatic_to_mqtt::biostar::client::{BiostarClient, HttpTransport};
use guntamatic_to_mqtt::{biostar, config, mqtt};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting guntamatic-to-mqtt bridge (boiler={}, mqtt={}:{}, interval={}s, timeout={}s)",
        config.biostar.host,
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.biostar.poll_interval_secs,
        config.biostar.timeout_secs,
    );

    let transport = match HttpTransport::new(&config.biostar.host, &config.biostar.api_key) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let (outcome_tx, outcome_rx) = mpsc::channel::<biostar::PollOutcome>(8);

    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(outcome_rx).await;
    });

    let client = BiostarClient::new(transport, Duration::from_secs(config.biostar.timeout_secs));
    let poll_interval = Duration::from_secs(config.biostar.poll_interval_secs);
    let poll_handle = tokio::spawn(async move {
        client.run(outcome_tx, poll_interval).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = async {
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate()
            ).expect("Failed to register SIGTERM handler");
            sigterm.recv().await;
        } => {
            info!("Received SIGTERM, shutting down");
        }
    }

    poll_handle.abort();
    mqtt_handle.abort();
    info!("guntamatic-to-mqtt bridge stopped");
}
