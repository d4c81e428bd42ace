//! Build completion poller.
//!
//! The remote API has no push notification for finished builds, so a
//! [`BuildWatch`] reconstructs one by repeatedly fetching the build and
//! checking its stages. The loop runs on its own task; the handle exposes
//! the current state, a cancellation input and the final outcome.

use std::sync::Arc;

use pulse_core::{BuildResult, ClientError, Gateway, PollConfig, Sleeper};
use pulse_transport::RemoteCall;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};

use crate::session::Session;

/// Observable state of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// A fetch is in flight or the poller is sleeping before the next one.
    Polling { attempts: u32, retries_left: u32 },
    /// Terminal. See [`WatchOutcome`] for how it ended.
    Done,
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Every stage of every fetched build reported complete.
    Completed {
        results: Vec<BuildResult>,
        attempts: u32,
    },
    /// The client stopped trying. The build may still be running.
    GaveUp {
        last_error: ClientError,
        attempts: u32,
    },
    /// Cancelled by the caller.
    Cancelled { attempts: u32 },
}

impl WatchOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Number of fetches issued.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::GaveUp { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Handle to a running build completion poller.
pub struct BuildWatch {
    project: String,
    build_id: i64,
    state_rx: watch::Receiver<WatchState>,
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<WatchOutcome>,
}

impl BuildWatch {
    /// Start polling `build_id` of `project` on a new task.
    #[must_use]
    pub fn spawn<G>(
        session: Arc<Session<G>>,
        project: impl Into<String>,
        build_id: i64,
        config: PollConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self
    where
        G: Gateway + 'static,
    {
        let project = project.into();
        let (state_tx, state_rx) = watch::channel(WatchState::Polling {
            attempts: 0,
            retries_left: config.retry_budget,
        });
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let poller = Poller {
            session,
            project: project.clone(),
            build_id,
            config,
            sleeper,
            state_tx,
            cancel_rx: Some(cancel_rx),
        };
        let handle = tokio::spawn(poller.run());

        Self {
            project,
            build_id,
            state_rx,
            cancel_tx: Some(cancel_tx),
            handle,
        }
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub const fn build_id(&self) -> i64 {
        self.build_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state() == WatchState::Done
    }

    /// Resolves once the poller reaches `Done`, however it got there.
    pub async fn finished(&mut self) {
        // An error means the poller task is gone, which is also terminal.
        let _ = self
            .state_rx
            .wait_for(|s| matches!(s, WatchState::Done))
            .await;
    }

    /// Ask the poller to stop. Interrupts a fetch in flight or the sleep
    /// between polls. Further calls do nothing.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    /// Returns `ClientError::Aborted` if the poller task panicked or was
    /// torn down with its runtime.
    pub async fn wait(self) -> Result<WatchOutcome, ClientError> {
        self.handle
            .await
            .map_err(|e| ClientError::Aborted(e.to_string()))
    }
}

struct Poller<G: Gateway> {
    session: Arc<Session<G>>,
    project: String,
    build_id: i64,
    config: PollConfig,
    sleeper: Arc<dyn Sleeper>,
    state_tx: watch::Sender<WatchState>,
    cancel_rx: Option<oneshot::Receiver<()>>,
}

impl<G: Gateway> Poller<G> {
    async fn run(mut self) -> WatchOutcome {
        let outcome = self.poll().await;
        self.state_tx.send_replace(WatchState::Done);
        outcome
    }

    async fn poll(&mut self) -> WatchOutcome {
        let mut retries_left = self.config.retry_budget;
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.state_tx.send_replace(WatchState::Polling {
                attempts,
                retries_left,
            });

            let call = RemoteCall::get_build(&self.project, self.build_id);
            let fetched = tokio::select! {
                biased;
                res = self.session.invoke::<Vec<BuildResult>>(call) => Some(res),
                () = cancelled(&mut self.cancel_rx) => None,
            };
            let Some(fetched) = fetched else {
                tracing::debug!(
                    project = %self.project,
                    build_id = self.build_id,
                    "watch cancelled mid-fetch"
                );
                return WatchOutcome::Cancelled { attempts };
            };

            match fetched {
                Ok(results) if results.iter().all(BuildResult::is_complete) => {
                    tracing::info!(
                        project = %self.project,
                        build_id = self.build_id,
                        attempts,
                        "build complete"
                    );
                    return WatchOutcome::Completed { results, attempts };
                }
                Ok(_) => {
                    tracing::debug!(
                        project = %self.project,
                        build_id = self.build_id,
                        attempts,
                        "build still running"
                    );
                }
                Err(e) if e.is_transport() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(
                        project = %self.project,
                        build_id = self.build_id,
                        attempts,
                        retries_left,
                        "poll failed: {e}"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        project = %self.project,
                        build_id = self.build_id,
                        attempts,
                        "giving up on build: {e}"
                    );
                    return WatchOutcome::GaveUp {
                        last_error: e,
                        attempts,
                    };
                }
            }

            let interrupted = tokio::select! {
                biased;
                () = cancelled(&mut self.cancel_rx) => true,
                () = self.sleeper.sleep(self.config.poll_interval) => false,
            };
            if interrupted {
                tracing::debug!(project = %self.project, build_id = self.build_id, "watch cancelled");
                return WatchOutcome::Cancelled { attempts };
            }
        }
    }
}

/// Resolves when cancellation is requested. A dropped handle never cancels.
async fn cancelled(rx: &mut Option<oneshot::Receiver<()>>) {
    if let Some(inner) = rx {
        if inner.await.is_ok() {
            return;
        }
        *rx = None;
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::{Credentials, GatewayError, Stage, TokioSleeper};
    use pulse_transport::{MemoryGateway, RemoteMethod};
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::testing::{RecordingSleeper, StallingGateway, server};

    struct Fixture {
        gw: Arc<MemoryGateway>,
        session: Arc<Session<Arc<MemoryGateway>>>,
        sleeper: Arc<RecordingSleeper>,
    }

    impl Fixture {
        async fn new(gw: MemoryGateway) -> Self {
            let gw = Arc::new(gw);
            let session = assert_ok!(
                Session::open(Arc::clone(&gw), &Credentials::new("admin", "secret"), None).await
            );
            Self {
                gw,
                session: Arc::new(session),
                sleeper: Arc::new(RecordingSleeper::default()),
            }
        }

        fn watch(&self, build_id: i64) -> BuildWatch {
            BuildWatch::spawn(
                Arc::clone(&self.session),
                "web",
                build_id,
                PollConfig::default(),
                Arc::clone(&self.sleeper) as Arc<dyn Sleeper>,
            )
        }

        fn fail_fetches(&self, n: usize) {
            for _ in 0..n {
                self.gw.script(
                    RemoteMethod::GetBuild,
                    Err(GatewayError::Transport("connection refused".into())),
                );
            }
        }

        fn fetch_incomplete(&self) {
            self.gw.script(
                RemoteMethod::GetBuild,
                Ok(json!([{"id": 1, "complete": false, "stages": [
                    {"name": "build", "complete": true},
                    {"name": "test", "complete": false}
                ]}])),
            );
        }
    }

    fn build(id: i64, stages: &[(&str, bool)]) -> BuildResult {
        BuildResult {
            id,
            complete: false,
            stages: stages.iter().map(|(n, c)| Stage::new(*n, *c)).collect(),
        }
    }

    #[tokio::test]
    async fn test_completes_after_one_poll() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", true), ("test", true)]));

        let mut watch = fx.watch(1);
        watch.finished().await;
        assert!(watch.is_done());

        let outcome = assert_ok!(watch.wait().await);
        assert!(outcome.is_completed());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(fx.gw.call_count(RemoteMethod::GetBuild), 1);
        assert!(fx.sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_four_failures() {
        let fx = Fixture::new(server()).await;
        fx.fail_fetches(10);

        let outcome = assert_ok!(fx.watch(1).wait().await);
        let WatchOutcome::GaveUp {
            last_error,
            attempts,
        } = outcome
        else {
            panic!("expected give-up");
        };
        assert_eq!(attempts, 4);
        assert!(last_error.is_transport());
        assert_eq!(fx.gw.call_count(RemoteMethod::GetBuild), 4);
        assert_eq!(fx.sleeper.slept().len(), 3);
    }

    #[tokio::test]
    async fn test_incomplete_poll_does_not_spend_budget() {
        let fx = Fixture::new(server()).await;
        fx.fetch_incomplete();
        fx.fail_fetches(10);

        let outcome = assert_ok!(fx.watch(1).wait().await);
        assert!(matches!(outcome, WatchOutcome::GaveUp { attempts: 5, .. }));
        assert_eq!(fx.gw.call_count(RemoteMethod::GetBuild), 5);
    }

    #[tokio::test]
    async fn test_budget_is_not_replenished_by_success() {
        let fx = Fixture::new(server()).await;
        fx.fail_fetches(1);
        fx.fetch_incomplete();
        fx.fail_fetches(10);

        let outcome = assert_ok!(fx.watch(1).wait().await);
        // fail, incomplete, fail, fail, fail(give up)
        assert!(matches!(outcome, WatchOutcome::GaveUp { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", true)]));
        fx.fail_fetches(3);

        let outcome = assert_ok!(fx.watch(1).wait().await);
        assert!(outcome.is_completed());
        assert_eq!(outcome.attempts(), 4);
    }

    #[tokio::test]
    async fn test_waits_for_every_stage() {
        let fx = Fixture::new(server().with_progression()).await;
        fx.gw.insert_build("web", build(1, &[("build", false), ("test", false)]));

        let outcome = assert_ok!(fx.watch(1).wait().await);
        let WatchOutcome::Completed { results, attempts } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(attempts, 3);
        assert!(results[0].stages.iter().all(|s| s.complete));
        assert_eq!(
            fx.sleeper.slept(),
            vec![Duration::from_millis(250), Duration::from_millis(250)]
        );
    }

    #[tokio::test]
    async fn test_session_closed_is_not_retried() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", false)]));
        assert_ok!(fx.session.close().await);

        let outcome = assert_ok!(fx.watch(1).wait().await);
        assert_eq!(
            outcome,
            WatchOutcome::GaveUp {
                last_error: ClientError::SessionClosed,
                attempts: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_an_endless_build() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", false)]));

        let mut watch = fx.watch(1);
        watch.cancel();
        watch.cancel();
        let outcome = assert_ok!(watch.wait().await);
        assert!(matches!(outcome, WatchOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_stalled_fetch() {
        let session = assert_ok!(
            Session::open(StallingGateway, &Credentials::new("admin", "secret"), None).await
        );
        let mut watch = BuildWatch::spawn(
            Arc::new(session),
            "web",
            1,
            PollConfig::default(),
            Arc::new(RecordingSleeper::default()),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!watch.is_done());
        watch.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(2), watch.wait()).await;
        let outcome = assert_ok!(assert_ok!(joined));
        assert_eq!(outcome, WatchOutcome::Cancelled { attempts: 1 });
    }

    #[tokio::test]
    async fn test_cancel_during_sleep_issues_no_more_fetches() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", false)]));

        let mut watch = BuildWatch::spawn(
            Arc::clone(&fx.session),
            "web",
            1,
            PollConfig::default().with_poll_interval(Duration::from_secs(60)),
            Arc::new(TokioSleeper),
        );
        while fx.gw.call_count(RemoteMethod::GetBuild) == 0 {
            tokio::task::yield_now().await;
        }
        watch.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(2), watch.wait()).await;
        let outcome = assert_ok!(assert_ok!(joined));
        assert_eq!(outcome, WatchOutcome::Cancelled { attempts: 1 });
        assert_eq!(fx.gw.call_count(RemoteMethod::GetBuild), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let fx = Fixture::new(server().with_progression()).await;
        fx.gw.insert_build("web", build(1, &[("build", false)]));

        let mut watch = fx.watch(1);
        drop(watch.cancel_tx.take());
        let outcome = assert_ok!(watch.wait().await);
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_state_reports_progress() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", false)]));

        let mut watch = fx.watch(1);
        assert_eq!(watch.project(), "web");
        assert_eq!(watch.build_id(), 1);
        assert!(matches!(watch.state(), WatchState::Polling { retries_left: 3, .. }));

        fx.gw.complete_stage("web", 1, "build");
        watch.finished().await;
        assert_eq!(watch.state(), WatchState::Done);
    }

    #[tokio::test]
    async fn test_real_timer() {
        let fx = Fixture::new(server()).await;
        fx.gw.insert_build("web", build(1, &[("build", true)]));
        fx.fail_fetches(1);

        let watch = BuildWatch::spawn(
            Arc::clone(&fx.session),
            "web",
            1,
            PollConfig::default().with_poll_interval(Duration::from_millis(5)),
            Arc::new(TokioSleeper),
        );
        let outcome = assert_ok!(watch.wait().await);
        assert_eq!(outcome.attempts(), 2);
    }
}
