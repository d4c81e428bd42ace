//! In-process gateway emulating a Pulse server.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use pulse_core::{
    BuildRequestStatus, BuildResult, BuildStatus, Gateway, GatewayError, Stage,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::methods::RemoteMethod;

/// Fault code for rejected credentials or tokens.
pub const FAULT_AUTH: i32 = 1;
/// Fault code for unknown projects, builds, requests or agents.
pub const FAULT_NOT_FOUND: i32 = 2;
/// Fault code for malformed arguments.
pub const FAULT_BAD_REQUEST: i32 = 3;
/// Fault code for unknown methods.
pub const FAULT_NO_METHOD: i32 = 4;

type Reply = Result<Value, GatewayError>;

#[derive(Default)]
struct ProjectState {
    stages: Vec<String>,
    builds: Vec<BuildResult>,
    initialised: bool,
    cleanups: usize,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, String>,
    tokens: HashSet<String>,
    projects: BTreeMap<String, ProjectState>,
    agents: Vec<(String, Value)>,
    requests: HashMap<String, BuildRequestStatus>,
    next_request: u64,
    scripts: HashMap<RemoteMethod, VecDeque<Reply>>,
    calls: Vec<RemoteMethod>,
    progression: bool,
    closed: bool,
}

/// In-memory gateway.
///
/// Useful for tests and demos. Scripted replies queued with
/// [`MemoryGateway::script`] take precedence over the emulation and are
/// consumed in order. Every call is recorded.
#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

fn fault(code: i32, message: impl Into<String>) -> GatewayError {
    GatewayError::Fault {
        code,
        message: message.into(),
    }
}

fn arg_str(args: &[Value], idx: usize) -> Result<&str, GatewayError> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| fault(FAULT_BAD_REQUEST, format!("argument {idx} must be a string")))
}

fn arg_i64(args: &[Value], idx: usize) -> Result<i64, GatewayError> {
    args.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| fault(FAULT_BAD_REQUEST, format!("argument {idx} must be an integer")))
}

fn to_value<T: serde::Serialize>(v: &T) -> Reply {
    serde_json::to_value(v).map_err(|e| GatewayError::Decode(e.to_string()))
}

impl MemoryGateway {
    /// Create an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner_mut(&mut self) -> &mut Inner {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.inner_mut().users.insert(user.into(), password.into());
        self
    }

    /// Register a project with its stage names.
    #[must_use]
    pub fn with_project<I>(mut self, name: impl Into<String>, stages: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let state = ProjectState {
            stages: stages.into_iter().map(Into::into).collect(),
            ..ProjectState::default()
        };
        self.inner_mut().projects.insert(name.into(), state);
        self
    }

    /// Register an agent. Agents are listed in registration order.
    #[must_use]
    pub fn with_agent(mut self, name: impl Into<String>, details: Value) -> Self {
        self.inner_mut().agents.push((name.into(), details));
        self
    }

    /// Complete one more stage of a build every time it is fetched.
    #[must_use]
    pub fn with_progression(mut self) -> Self {
        self.inner_mut().progression = true;
        self
    }

    /// Queue a reply for the next call of `method`.
    pub fn script(&self, method: RemoteMethod, reply: Reply) {
        self.lock().scripts.entry(method).or_default().push_back(reply);
    }

    /// Store a build result, replacing one with the same id.
    pub fn insert_build(&self, project: &str, build: BuildResult) {
        let mut inner = self.lock();
        let state = inner.projects.entry(project.to_string()).or_default();
        state.builds.retain(|b| b.id != build.id);
        state.builds.push(build);
        state.builds.sort_by_key(|b| b.id);
    }

    /// Override the status reported for a build request.
    pub fn set_request_status(&self, request: &str, status: BuildRequestStatus) {
        self.lock().requests.insert(request.to_string(), status);
    }

    /// Mark a stage of a build complete. Returns false if it does not exist.
    pub fn complete_stage(&self, project: &str, id: i64, stage: &str) -> bool {
        let mut inner = self.lock();
        let Some(build) = inner
            .projects
            .get_mut(project)
            .and_then(|p| p.builds.iter_mut().find(|b| b.id == id))
        else {
            return false;
        };
        let Some(s) = build.stages.iter_mut().find(|s| s.name == stage) else {
            return false;
        };
        s.complete = true;
        build.complete = build.is_complete();
        true
    }

    /// Methods called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteMethod> {
        self.lock().calls.clone()
    }

    /// Number of calls made to `method`.
    #[must_use]
    pub fn call_count(&self, method: RemoteMethod) -> usize {
        self.lock().calls.iter().filter(|m| **m == method).count()
    }

    /// Number of tokens currently logged in.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.lock().tokens.len()
    }

    /// How many times a project has been cleaned.
    #[must_use]
    pub fn cleanups(&self, project: &str) -> usize {
        self.lock().projects.get(project).map_or(0, |p| p.cleanups)
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Inner {
    fn dispatch(&mut self, method: RemoteMethod, args: &[Value]) -> Reply {
        if method.needs_token() {
            let token = arg_str(args, 0)?;
            if !self.tokens.contains(token) {
                return Err(fault(FAULT_AUTH, "invalid or expired token"));
            }
        }

        match method {
            RemoteMethod::Login => self.login(args),
            RemoteMethod::Logout => {
                let token = arg_str(args, 0)?.to_string();
                self.tokens.remove(&token);
                Ok(json!(true))
            }
            RemoteMethod::InitialiseProject => {
                let project = self.project_mut(arg_str(args, 1)?)?;
                let fresh = !project.initialised;
                project.initialised = true;
                Ok(json!(fresh))
            }
            RemoteMethod::TriggerBuild => self.trigger(args),
            RemoteMethod::WaitForActivation => {
                let request = arg_str(args, 1)?;
                let _timeout_ms = arg_i64(args, 2)?;
                let status = self
                    .requests
                    .get(request)
                    .ok_or_else(|| fault(FAULT_NOT_FOUND, format!("unknown request {request}")))?;
                to_value(status)
            }
            RemoteMethod::GetBuild => self.get_build(args),
            RemoteMethod::GetLatestBuild => {
                let project = self.project_mut(arg_str(args, 1)?)?;
                let completed_only = args.get(2).and_then(Value::as_bool).unwrap_or(false);
                let latest: Vec<&BuildResult> = project
                    .builds
                    .iter()
                    .rev()
                    .filter(|b| !completed_only || b.is_complete())
                    .take(1)
                    .collect();
                to_value(&latest)
            }
            RemoteMethod::DoConfigAction => {
                let path = arg_str(args, 1)?;
                let action = arg_str(args, 2)?;
                if action != "clean" {
                    return Err(fault(FAULT_BAD_REQUEST, format!("unsupported action {action}")));
                }
                let name = path
                    .strip_prefix("projects/")
                    .ok_or_else(|| fault(FAULT_NOT_FOUND, format!("no such path {path}")))?;
                self.project_mut(name)?.cleanups += 1;
                Ok(Value::Null)
            }
            RemoteMethod::GetAllProjectNames => Ok(json!(self.projects.keys().collect::<Vec<_>>())),
            RemoteMethod::GetAllAgentNames => Ok(json!(
                self.agents.iter().map(|(name, _)| name).collect::<Vec<_>>()
            )),
            RemoteMethod::GetAgentDetails => {
                let name = arg_str(args, 1)?;
                self.agents
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, details)| details.clone())
                    .ok_or_else(|| fault(FAULT_NOT_FOUND, format!("unknown agent {name}")))
            }
        }
    }

    fn login(&mut self, args: &[Value]) -> Reply {
        let user = arg_str(args, 0)?;
        let password = arg_str(args, 1)?;
        if self.users.get(user).map(String::as_str) != Some(password) {
            return Err(fault(FAULT_AUTH, "invalid username or password"));
        }
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone());
        Ok(json!(token))
    }

    fn trigger(&mut self, args: &[Value]) -> Reply {
        let project = self.project_mut(arg_str(args, 1)?)?;
        let id = project.builds.last().map_or(1, |b| b.id + 1);
        project.builds.push(BuildResult {
            id,
            complete: false,
            stages: project
                .stages
                .iter()
                .map(|s| Stage::new(s.clone(), false))
                .collect(),
        });

        self.next_request += 1;
        let handle = self.next_request.to_string();
        self.requests.insert(
            handle.clone(),
            BuildRequestStatus {
                id: id.to_string(),
                status: BuildStatus::Activated,
            },
        );
        Ok(json!([handle]))
    }

    fn get_build(&mut self, args: &[Value]) -> Reply {
        let progression = self.progression;
        let id = arg_i64(args, 2)?;
        let project = self.project_mut(arg_str(args, 1)?)?;
        let build = project
            .builds
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| fault(FAULT_NOT_FOUND, format!("unknown build {id}")))?;
        let reply = to_value(&[&*build])?;
        if progression {
            if let Some(stage) = build.stages.iter_mut().find(|s| !s.complete) {
                stage.complete = true;
            }
            build.complete = build.is_complete();
        }
        Ok(reply)
    }

    fn project_mut(&mut self, name: &str) -> Result<&mut ProjectState, GatewayError> {
        self.projects
            .get_mut(name)
            .ok_or_else(|| fault(FAULT_NOT_FOUND, format!("unknown project {name}")))
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GatewayError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(GatewayError::Closed);
        }
        let Some(known) = RemoteMethod::from_name(method) else {
            return Err(fault(FAULT_NO_METHOD, format!("no such method {method}")));
        };
        inner.calls.push(known);

        if let Some(reply) = inner.scripts.get_mut(&known).and_then(VecDeque::pop_front) {
            tracing::debug!(method, "memory gateway: scripted reply");
            return reply;
        }
        inner.dispatch(known, &args)
    }

    async fn close(&self) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(GatewayError::Closed);
        }
        inner.closed = true;
        inner.tokens.clear();
        Ok(())
    }
}
