//! Pulse remote API client.

use std::{sync::Arc, time::Duration};

use pulse_core::{
    Agent, BuildRequestStatus, BuildResult, ClientConfig, ClientError, Credentials, Gateway,
    Sleeper, TokioSleeper, TriggerOptions, duration_millis,
};
use pulse_transport::RemoteCall;

use crate::{session::Session, watch::BuildWatch};

/// Client bound to one authenticated session.
pub struct PulseClient<G: Gateway> {
    session: Arc<Session<G>>,
    config: ClientConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl<G> PulseClient<G>
where
    G: Gateway + 'static,
{
    /// Log in with the default configuration.
    ///
    /// # Errors
    /// Returns `ClientError::Auth` if authentication fails.
    pub async fn open(gateway: G, credentials: &Credentials) -> Result<Self, ClientError> {
        Self::open_with_config(gateway, credentials, ClientConfig::default()).await
    }

    /// Log in with an explicit configuration.
    ///
    /// # Errors
    /// Returns `ClientError::Auth` if authentication fails.
    pub async fn open_with_config(
        gateway: G,
        credentials: &Credentials,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let session = Session::open(gateway, credentials, config.call_timeout).await?;
        Ok(Self {
            session: Arc::new(session),
            config,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the timer used by build watches started from now on.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &Session<G> {
        &self.session
    }

    /// Log out and release the gateway.
    ///
    /// Watches still running will fail their next poll and give up.
    ///
    /// # Errors
    /// See [`Session::close`].
    pub async fn close(&self) -> Result<(), ClientError> {
        self.session.close().await
    }

    /// Initialise a project. Returns whether initialisation was started.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn init_project(&self, project: &str) -> Result<bool, ClientError> {
        self.session
            .invoke(RemoteCall::initialise_project(project))
            .await
    }

    /// Request a rebuild of a project. Returns the request handles.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn trigger(&self, project: &str) -> Result<Vec<String>, ClientError> {
        self.trigger_with(project, &TriggerOptions::default()).await
    }

    /// Request a build with explicit options.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn trigger_with(
        &self,
        project: &str,
        options: &TriggerOptions,
    ) -> Result<Vec<String>, ClientError> {
        let handles: Vec<String> = self
            .session
            .invoke(RemoteCall::trigger_build(project, options))
            .await?;
        tracing::info!(project, ?handles, "build triggered");
        Ok(handles)
    }

    /// Exchange a request handle for a build number, letting the server
    /// block for the configured activation wait.
    ///
    /// # Errors
    /// See [`PulseClient::resolve_build_id`].
    pub async fn build_id(&self, request: &str) -> Result<i64, ClientError> {
        self.resolve_build_id(request, self.config.activation_wait)
            .await
    }

    /// Exchange a request handle for a build number.
    ///
    /// One call is made; the server itself blocks up to `wait`. A request
    /// still unhandled or queued afterwards is a timeout, whatever id it
    /// carries.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure,
    /// `ClientError::Timeout` if the request was not activated in time and
    /// `ClientError::Parse` if the server sent a non-numeric id.
    pub async fn resolve_build_id(&self, request: &str, wait: Duration) -> Result<i64, ClientError> {
        let wait_ms = duration_millis(wait);
        let status: BuildRequestStatus = self
            .session
            .invoke(RemoteCall::wait_for_activation(request, wait_ms))
            .await?;

        if status.status.is_pending() {
            tracing::debug!(request, status = %status.status, "build request not activated");
            return Err(ClientError::Timeout {
                status: status.status,
                waited: wait,
            });
        }

        let id = status
            .id
            .parse::<i64>()
            .map_err(|source| ClientError::Parse {
                id: status.id.clone(),
                source,
            })?;
        tracing::debug!(request, build_id = id, "build request activated");
        Ok(id)
    }

    /// Fetch a specific build.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn build_result(
        &self,
        project: &str,
        id: i64,
    ) -> Result<Vec<BuildResult>, ClientError> {
        self.session.invoke(RemoteCall::get_build(project, id)).await
    }

    /// Fetch the latest completed build of a project, if any.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn latest_build_result(&self, project: &str) -> Result<Vec<BuildResult>, ClientError> {
        self.session
            .invoke(RemoteCall::get_latest_build(project))
            .await
    }

    /// Stage names of a project, derived from its latest build.
    ///
    /// This is a best-effort view: stages added since the last build are
    /// not reported.
    ///
    /// # Errors
    /// Returns `ClientError::NotFound` if the project has no latest build
    /// and `ClientError::Empty` if that build has no stages.
    pub async fn stages(&self, project: &str) -> Result<Vec<String>, ClientError> {
        let builds = self.latest_build_result(project).await?;
        let latest = builds.first().ok_or_else(|| ClientError::NotFound {
            project: project.to_string(),
        })?;
        if latest.stages.is_empty() {
            return Err(ClientError::Empty {
                project: project.to_string(),
            });
        }
        Ok(latest.stage_names())
    }

    /// Names of all projects.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn projects(&self) -> Result<Vec<String>, ClientError> {
        self.session
            .invoke(RemoteCall::all_project_names())
            .await
    }

    /// Clean a project's working copies.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` on call failure.
    pub async fn clear(&self, project: &str) -> Result<(), ClientError> {
        self.session
            .invoke::<serde_json::Value>(RemoteCall::clean_project(project))
            .await?;
        tracing::info!(project, "project cleaned");
        Ok(())
    }

    /// All agents with their details, in server listing order.
    ///
    /// Details are fetched one agent at a time. The listed name replaces
    /// any name in the detail record. Nothing is returned if any fetch
    /// fails.
    ///
    /// # Errors
    /// Returns the first `ClientError::Transport` encountered.
    pub async fn agents(&self) -> Result<Vec<Agent>, ClientError> {
        let names: Vec<String> = self
            .session
            .invoke(RemoteCall::all_agent_names())
            .await?;

        let mut agents = Vec::with_capacity(names.len());
        for name in names {
            let mut agent: Agent = self
                .session
                .invoke(RemoteCall::agent_details(&name))
                .await?;
            agent.name = name;
            agents.push(agent);
        }
        Ok(agents)
    }

    /// Start watching a build for completion. Returns immediately.
    #[must_use]
    pub fn wait_build(&self, project: &str, id: i64) -> BuildWatch {
        BuildWatch::spawn(
            Arc::clone(&self.session),
            project,
            id,
            self.config.poll,
            Arc::clone(&self.sleeper),
        )
    }
}
