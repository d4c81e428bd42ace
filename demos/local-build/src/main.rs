//! Drive a full build lifecycle against an in-process Pulse server.
//!
//! Run with: cargo run -p local-build-demo
//!
//! Set `RUST_LOG=debug` to see every remote call and poll.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use pulse_core::{ClientConfig, Credentials, PollConfig};
use pulse_session::{PulseClient, WatchOutcome};
use pulse_transport::MemoryGateway;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = Arc::new(
        MemoryGateway::new()
            .with_user("admin", "admin")
            .with_project("backend", ["compile", "unit-tests", "package"])
            .with_project("frontend", ["lint", "bundle"])
            .with_agent("master", json!({"location": "localhost", "status": "idle"}))
            .with_agent("linux-1", json!({"location": "10.0.0.11", "status": "idle"}))
            .with_progression(),
    );

    let config = ClientConfig::default()
        .with_activation_wait(Duration::from_secs(2))
        .with_poll(PollConfig::default().with_poll_interval(Duration::from_millis(100)));
    let client = PulseClient::open_with_config(
        Arc::clone(&server),
        &Credentials::new("admin", "admin"),
        config,
    )
    .await?;

    for agent in client.agents().await? {
        tracing::info!(
            name = %agent.name,
            location = agent.location.as_deref().unwrap_or("-"),
            "agent"
        );
    }

    let mut watches = Vec::new();
    for project in client.projects().await? {
        client.clear(&project).await?;
        let handles = client.trigger(&project).await?;
        for handle in handles {
            let id = client.build_id(&handle).await?;
            tracing::info!(%project, build_id = id, "watching build");
            watches.push(client.wait_build(&project, id));
        }
    }

    let outcomes = join_all(watches.into_iter().map(|w| async move {
        let label = format!("{}#{}", w.project(), w.build_id());
        (label, w.wait().await)
    }))
    .await;

    for (label, outcome) in outcomes {
        match outcome? {
            WatchOutcome::Completed { attempts, .. } => {
                tracing::info!(build = %label, attempts, "finished");
            }
            WatchOutcome::GaveUp {
                last_error,
                attempts,
            } => {
                tracing::warn!(build = %label, attempts, "stopped polling: {last_error}");
            }
            WatchOutcome::Cancelled { .. } => {
                tracing::warn!(build = %label, "cancelled");
            }
        }
    }

    for project in client.projects().await? {
        let stages = client.stages(&project).await?;
        tracing::info!(%project, ?stages, "stages");
    }

    client.close().await?;
    Ok(())
}
