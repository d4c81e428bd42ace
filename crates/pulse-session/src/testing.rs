//! Test fixtures.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use pulse_core::{Gateway, GatewayError, Sleeper};
use pulse_transport::MemoryGateway;
use serde_json::{Value, json};

/// Server with one user, one two-stage project and three agents.
pub fn server() -> MemoryGateway {
    MemoryGateway::new()
        .with_user("admin", "secret")
        .with_project("web", ["build", "test"])
        .with_agent("a", json!({"name": "stale-a", "location": "rack-1"}))
        .with_agent("b", json!({"location": "rack-2"}))
        .with_agent("c", json!({"location": "rack-3", "status": "idle"}))
}

/// Accepts any login, then never answers.
pub struct StallingGateway;

#[async_trait]
impl Gateway for StallingGateway {
    async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, GatewayError> {
        if method == "RemoteApi.login" {
            return Ok(json!("token"));
        }
        std::future::pending().await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }
}
