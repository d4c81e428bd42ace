//! Remote method catalogue.
//!
//! Every remote operation takes positional arguments. All methods except
//! `login` expect the session token as their first argument; the token is
//! not part of a [`RemoteCall`] and is prepended by the session.

use std::fmt;

use pulse_core::TriggerOptions;
use serde_json::{Value, json};

/// Named remote method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    Login,
    Logout,
    InitialiseProject,
    TriggerBuild,
    WaitForActivation,
    GetBuild,
    GetLatestBuild,
    DoConfigAction,
    GetAllProjectNames,
    GetAllAgentNames,
    GetAgentDetails,
}

impl RemoteMethod {
    /// All known methods.
    pub const ALL: [Self; 11] = [
        Self::Login,
        Self::Logout,
        Self::InitialiseProject,
        Self::TriggerBuild,
        Self::WaitForActivation,
        Self::GetBuild,
        Self::GetLatestBuild,
        Self::DoConfigAction,
        Self::GetAllProjectNames,
        Self::GetAllAgentNames,
        Self::GetAgentDetails,
    ];

    /// Fully qualified method name on the server.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Login => "RemoteApi.login",
            Self::Logout => "RemoteApi.logout",
            Self::InitialiseProject => "RemoteApi.initialiseProject",
            Self::TriggerBuild => "RemoteApi.triggerBuild",
            Self::WaitForActivation => "RemoteApi.waitForBuildRequestToBeActivated",
            Self::GetBuild => "RemoteApi.getBuild",
            Self::GetLatestBuild => "RemoteApi.getLatestBuildForProject",
            Self::DoConfigAction => "RemoteApi.doConfigAction",
            Self::GetAllProjectNames => "RemoteApi.getAllProjectNames",
            Self::GetAllAgentNames => "RemoteApi.getAllAgentNames",
            Self::GetAgentDetails => "RemoteApi.getAgentDetails",
        }
    }

    /// Look a method up by its server name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether the session token is the first argument.
    #[must_use]
    pub const fn needs_token(self) -> bool {
        !matches!(self, Self::Login)
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A remote method together with its arguments, minus the token.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: RemoteMethod,
    pub args: Vec<Value>,
}

impl RemoteCall {
    fn new(method: RemoteMethod, args: Vec<Value>) -> Self {
        Self { method, args }
    }

    #[must_use]
    pub fn login(user: &str, password: &str) -> Self {
        Self::new(RemoteMethod::Login, vec![json!(user), json!(password)])
    }

    #[must_use]
    pub fn logout() -> Self {
        Self::new(RemoteMethod::Logout, Vec::new())
    }

    #[must_use]
    pub fn initialise_project(project: &str) -> Self {
        Self::new(RemoteMethod::InitialiseProject, vec![json!(project)])
    }

    #[must_use]
    pub fn trigger_build(project: &str, options: &TriggerOptions) -> Self {
        let mut opts = serde_json::Map::new();
        opts.insert("rebuild".into(), json!(options.rebuild));
        if options.force {
            opts.insert("force".into(), json!(true));
        }
        if let Some(revision) = &options.revision {
            opts.insert("revision".into(), json!(revision));
        }
        Self::new(
            RemoteMethod::TriggerBuild,
            vec![json!(project), Value::Object(opts)],
        )
    }

    /// The server blocks up to `timeout_ms` waiting for activation.
    #[must_use]
    pub fn wait_for_activation(request: &str, timeout_ms: u64) -> Self {
        Self::new(
            RemoteMethod::WaitForActivation,
            vec![json!(request), json!(timeout_ms)],
        )
    }

    #[must_use]
    pub fn get_build(project: &str, id: i64) -> Self {
        Self::new(RemoteMethod::GetBuild, vec![json!(project), json!(id)])
    }

    /// Latest build for a project, restricted to completed builds.
    #[must_use]
    pub fn get_latest_build(project: &str) -> Self {
        Self::new(
            RemoteMethod::GetLatestBuild,
            vec![json!(project), json!(true)],
        )
    }

    /// Clean a project's working copies.
    #[must_use]
    pub fn clean_project(project: &str) -> Self {
        Self::new(
            RemoteMethod::DoConfigAction,
            vec![json!(format!("projects/{project}")), json!("clean")],
        )
    }

    #[must_use]
    pub fn all_project_names() -> Self {
        Self::new(RemoteMethod::GetAllProjectNames, Vec::new())
    }

    #[must_use]
    pub fn all_agent_names() -> Self {
        Self::new(RemoteMethod::GetAllAgentNames, Vec::new())
    }

    #[must_use]
    pub fn agent_details(name: &str) -> Self {
        Self::new(RemoteMethod::GetAgentDetails, vec![json!(name)])
    }

    /// Full positional argument list, token first when the method needs one.
    #[must_use]
    pub fn into_args(self, token: &str) -> Vec<Value> {
        if !self.method.needs_token() {
            return self.args;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(json!(token));
        args.extend(self.args);
        args
    }
}
