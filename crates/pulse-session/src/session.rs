//! Authenticated session over a gateway.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use pulse_core::{ClientError, Credentials, Gateway, GatewayError};
use pulse_transport::{RemoteCall, RemoteMethod};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// An authenticated session.
///
/// Holds the token obtained by a single login. The token is immutable for
/// the lifetime of the session and is attached to every call, so a session
/// can be shared freely between concurrent callers.
pub struct Session<G: Gateway> {
    gateway: G,
    token: String,
    call_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl<G: Gateway> fmt::Debug for Session<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("call_timeout", &self.call_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn raw_call<G: Gateway + ?Sized>(
    gateway: &G,
    method: RemoteMethod,
    args: Vec<Value>,
    call_timeout: Option<Duration>,
) -> Result<Value, GatewayError> {
    tracing::debug!(method = method.name(), "remote call");
    match call_timeout {
        Some(limit) => tokio::time::timeout(limit, gateway.call(method.name(), args))
            .await
            .map_err(|_| GatewayError::TimedOut(limit))?,
        None => gateway.call(method.name(), args).await,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

impl<G: Gateway> Session<G> {
    /// Authenticate once against the gateway.
    ///
    /// There is no retry: credentials are either valid or not. On failure
    /// the gateway is released before returning.
    ///
    /// # Errors
    /// Returns `ClientError::Auth` if the login call fails or its reply is
    /// not a token.
    pub async fn open(
        gateway: G,
        credentials: &Credentials,
        call_timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let call = RemoteCall::login(&credentials.user, &credentials.password);
        let method = call.method;
        let login = raw_call(&gateway, method, call.into_args(""), call_timeout)
            .await
            .and_then(decode::<String>);

        match login {
            Ok(token) => {
                tracing::info!(user = %credentials.user, "session opened");
                Ok(Self {
                    gateway,
                    token,
                    call_timeout,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                tracing::warn!(user = %credentials.user, "login failed: {e}");
                if let Err(release) = gateway.close().await {
                    tracing::debug!("releasing gateway after failed login: {release}");
                }
                Err(ClientError::Auth(e))
            }
        }
    }

    /// The session token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issue a remote call with the session token and decode the reply.
    ///
    /// # Errors
    /// Returns `ClientError::SessionClosed` after `close`, otherwise
    /// `ClientError::Transport` wrapping the gateway failure.
    pub async fn invoke<T: DeserializeOwned>(&self, call: RemoteCall) -> Result<T, ClientError> {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        let method = call.method;
        raw_call(
            &self.gateway,
            method,
            call.into_args(&self.token),
            self.call_timeout,
        )
        .await
        .and_then(decode)
        .map_err(|e| ClientError::transport(method.name(), e))
    }

    /// Log out and release the gateway.
    ///
    /// The gateway is released even when logout fails; the logout failure
    /// is reported in preference to a release failure.
    ///
    /// # Errors
    /// Returns `ClientError::SessionClosed` if already closed, otherwise the
    /// first failure of logout or release.
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::SessionClosed);
        }

        let call = RemoteCall::logout();
        let method = call.method;
        let logout = raw_call(
            &self.gateway,
            method,
            call.into_args(&self.token),
            self.call_timeout,
        )
        .await
        .map(drop)
        .map_err(|e| ClientError::transport(method.name(), e));
        if let Err(e) = &logout {
            tracing::warn!("logout failed, releasing gateway anyway: {e}");
        }

        let release = self
            .gateway
            .close()
            .await
            .map_err(|e| ClientError::transport("close", e));
        tracing::info!("session closed");

        logout.and(release)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pulse_transport::MemoryGateway;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::testing::{StallingGateway, server};

    fn creds() -> Credentials {
        Credentials::new("admin", "secret")
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let gw = Arc::new(server());
        let session = assert_ok!(Session::open(Arc::clone(&gw), &creds(), None).await);
        assert!(!session.token().is_empty());
        assert_eq!(gw.active_sessions(), 1);

        assert_ok!(session.close().await);
        assert!(gw.is_closed());
        assert_eq!(gw.call_count(RemoteMethod::Logout), 1);
    }

    #[tokio::test]
    async fn test_debug_hides_token() {
        let gw = Arc::new(server());
        let session = assert_ok!(Session::open(Arc::clone(&gw), &creds(), None).await);
        let shown = format!("{session:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains(session.token()));
        assert!(shown.contains("closed: false"));
    }

    #[tokio::test]
    async fn test_bad_credentials_never_produce_a_session() {
        let gw = Arc::new(server());
        let err = assert_err!(
            Session::open(Arc::clone(&gw), &Credentials::new("admin", "wrong"), None).await
        );
        assert!(matches!(err, ClientError::Auth(GatewayError::Fault { .. })));
        assert_eq!(gw.call_count(RemoteMethod::Login), 1);
        assert!(gw.is_closed());
    }

    #[tokio::test]
    async fn test_non_string_token_is_an_auth_error() {
        let gw = Arc::new(server());
        gw.script(RemoteMethod::Login, Ok(json!(17)));
        let err = assert_err!(Session::open(Arc::clone(&gw), &creds(), None).await);
        assert!(matches!(err, ClientError::Auth(GatewayError::Decode(_))));
    }

    #[tokio::test]
    async fn test_close_releases_gateway_when_logout_fails() {
        let gw = Arc::new(server());
        let session = assert_ok!(Session::open(Arc::clone(&gw), &creds(), None).await);
        gw.script(
            RemoteMethod::Logout,
            Err(GatewayError::Transport("connection reset".into())),
        );

        let err = assert_err!(session.close().await);
        assert!(matches!(
            err,
            ClientError::Transport {
                method: "RemoteApi.logout",
                ..
            }
        ));
        assert!(gw.is_closed());
    }

    #[tokio::test]
    async fn test_calls_after_close_fail_fast() {
        let gw = Arc::new(server());
        let session = assert_ok!(Session::open(Arc::clone(&gw), &creds(), None).await);
        assert_ok!(session.close().await);

        let calls_before = gw.calls().len();
        let err = assert_err!(
            session
                .invoke::<Vec<String>>(RemoteCall::all_project_names())
                .await
        );
        assert_eq!(err, ClientError::SessionClosed);
        assert_eq!(gw.calls().len(), calls_before);
        assert_eq!(assert_err!(session.close().await), ClientError::SessionClosed);
    }

    #[tokio::test]
    async fn test_token_is_attached_to_calls() {
        let gw: Arc<MemoryGateway> = Arc::new(server());
        let session = assert_ok!(Session::open(Arc::clone(&gw), &creds(), None).await);
        let names: Vec<String> =
            assert_ok!(session.invoke(RemoteCall::all_project_names()).await);
        assert_eq!(names, vec!["web".to_string()]);

        // A raw call without the token is rejected by the server.
        assert_err!(gw.call(RemoteMethod::GetAllProjectNames.name(), vec![]).await);
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let session = assert_ok!(
            Session::open(
                StallingGateway,
                &creds(),
                Some(Duration::from_millis(10))
            )
            .await
        );
        let err = assert_err!(
            session
                .invoke::<Vec<String>>(RemoteCall::all_project_names())
                .await
        );
        assert!(matches!(
            err,
            ClientError::Transport {
                source: GatewayError::TimedOut(_),
                ..
            }
        ));
    }
}
