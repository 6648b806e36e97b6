use super::*;
use crate::config::RetryConfig;
use crate::db::UpsertSubscriptionParams;
use crate::dispatcher::{DispatchRequest, SubmitOutcome, TransferState};
use crate::error::DispatchError;
use crate::source::StaticSource;
use crate::types::{Release, SubscriptionStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tempfile::NamedTempFile;


/// Dispatcher whose answers are scripted per locator
#[derive(Default)]
pub(super) struct MockDispatcher {
    state: std::sync::Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    rejecting: HashSet<String>,
    unreachable: bool,
    submissions: Vec<DispatchRequest>,
    transfers: HashMap<String, TransferState>,
    next_handle: u64,
}

impl MockDispatcher {
    pub(super) fn reject(&self, locator: &str) {
        self.state.lock().unwrap().rejecting.insert(locator.to_string());
    }

    pub(super) fn accept(&self, locator: &str) {
        self.state.lock().unwrap().rejecting.remove(locator);
    }

    pub(super) fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub(super) fn submissions_for(&self, locator: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .filter(|r| r.locator == locator)
            .count()
    }

    pub(super) fn total_submissions(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    pub(super) fn finish(&self, handle: &str, state: TransferState) {
        self.state
            .lock()
            .unwrap()
            .transfers
            .insert(handle.to_string(), state);
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, requests: &[DispatchRequest]) -> Result<Vec<SubmitOutcome>> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(DispatchError::Unreachable {
                dispatcher: "mock".to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            state.submissions.push(request.clone());
            if state.rejecting.contains(&request.locator) {
                outcomes.push(SubmitOutcome::Rejected {
                    reason: "tracker unreachable".to_string(),
                });
            } else {
                state.next_handle += 1;
                let handle = format!("gid-{}", state.next_handle);
                state
                    .transfers
                    .insert(handle.clone(), TransferState::Active);
                outcomes.push(SubmitOutcome::Accepted { handle });
            }
        }
        Ok(outcomes)
    }

    async fn poll(&self, handle: &str) -> Result<TransferState> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transfers
            .get(handle)
            .cloned()
            .unwrap_or(TransferState::Failed {
                reason: "unknown handle".to_string(),
            }))
    }
}

pub(super) struct Harness {
    pub engine: ReconcileEngine,
    pub source: Arc<StaticSource>,
    pub dispatcher: Arc<MockDispatcher>,
    _temp: NamedTempFile,
}

pub(super) fn test_config() -> Config {
    let mut config = Config::default();
    config.reconcile.fetch_timeout = Duration::from_secs(5);
    config.reconcile.dispatch_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

pub(super) async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub(super) async fn harness_with(config: Config) -> Harness {
    let temp = NamedTempFile::new().unwrap();
    let db = Database::new(temp.path()).await.unwrap();
    let source = Arc::new(StaticSource::new("static"));
    let dispatcher = Arc::new(MockDispatcher::default());

    let engine = ReconcileEngine::with_components(
        config,
        db,
        vec![source.clone() as Arc<dyn Source>],
        Some(dispatcher.clone() as Arc<dyn Dispatcher>),
    )
    .unwrap();

    Harness {
        engine,
        source,
        dispatcher,
        _temp: temp,
    }
}

/// Follow `name` directly in the database, served by the static source
pub(super) async fn follow(engine: &ReconcileEngine, name: &str, episode: u32) {
    engine
        .db
        .upsert_subscription(UpsertSubscriptionParams {
            name,
            status: SubscriptionStatus::Following,
            episode,
            source: "static",
        })
        .await
        .unwrap();
}

pub(super) fn release(group: &str, name: &str, episode: u32) -> Release {
    Release::new(
        format!("[{}] {} - {:02} [1080p]", group, name, episode),
        episode,
        locator(group, name, episode),
    )
    .with_group(group)
}

pub(super) fn locator(group: &str, name: &str, episode: u32) -> String {
    format!("magnet:?xt=urn:btih:{}-{}-{}", group, name, episode).replace(' ', "")
}

/// Reconcile and persist, but leave the dispatcher alone
pub(super) const NO_DISPATCH: CycleOptions = CycleOptions {
    enqueue: true,
    dispatch: false,
};
