//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p gateway-client
//! ```
//!
//! Configuration is loaded from environment variables. Every event is logged
//! until Ctrl-C.

use anyhow::Context;
use gateway_client::{GatewayConnection, GatewayEvent};
use gateway_common::{try_init_tracing, try_init_tracing_with_config, ClientConfig, TracingConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = ClientConfig::from_env();

    // Initialize tracing
    let tracing = match &config {
        Ok(config) => try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)),
        Err(_) => try_init_tracing(),
    };
    if let Err(e) = tracing {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e).context("Failed to load configuration"),
    };
    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    info!(
        env = ?config.app.env,
        intents = config.gateway.intents,
        url = ?config.gateway.url,
        "Starting gateway client"
    );

    let gateway = GatewayConnection::from_config(&config);
    let mut events = gateway.subscribe();

    gateway.connect().await.context("Failed to connect")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
            result = gateway.closed() => {
                return result.context("Gateway connection stopped");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    gateway.close().await;
    Ok(())
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Dispatch(dispatch) => {
            info!(event = %dispatch.name, seq = ?dispatch.sequence, "Dispatch");
        }
        GatewayEvent::Ack { latency } => {
            info!(latency_ms = ?latency.map(|l| l.as_millis()), "Heartbeat acknowledged");
        }
        GatewayEvent::Warn(message) => warn!(message = %message, "Gateway warning"),
        GatewayEvent::Error(message) => error!(message = %message, "Gateway error"),
        GatewayEvent::Closed { code, reconnecting } => {
            info!(code = ?code, reconnecting, "Connection closed");
        }
        GatewayEvent::Fatal { code, reason } => {
            error!(code = ?code, reason = %reason, "Connection stopped");
        }
    }
}
