//! Seam traits: the remote call gateway and the poller's clock.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

/// Procedure-call gateway to a Pulse server.
///
/// Implementations own the wire protocol. Arguments are positional and
/// replies are returned undecoded; the session layer turns them into
/// typed records.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Invoke a named remote method.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GatewayError>;

    /// Release the underlying transport.
    async fn close(&self) -> Result<(), GatewayError>;
}

#[async_trait]
impl<G: Gateway + ?Sized> Gateway for std::sync::Arc<G> {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GatewayError> {
        (**self).call(method, args).await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        (**self).close().await
    }
}

/// Time source used between polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<S: Sleeper + ?Sized> Sleeper for std::sync::Arc<S> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
