//! Throttle handling: one fallback attempt, then requeue and back off.

use std::time::Duration;

use crate::error::FetchFailure;
use crate::fetch::FetchClient;
use crate::pipeline::{Route, ShutdownSignal};
use crate::types::{PipelineOptions, WorkItem};

/// Decides what happens to an item after its primary lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    sleep: Duration,
    max_requeues: Option<u32>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(sleep: Duration, max_requeues: Option<u32>) -> Self {
        Self {
            sleep,
            max_requeues,
        }
    }

    #[must_use]
    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    /// Fetch `item` and route the outcome.
    ///
    /// - success → `Write`
    /// - throttled → fallback once; fallback success → `Write`, fallback
    ///   throttled or unreachable → `Requeue`, fallback definitive error → `Drop`
    /// - any other primary failure → `Drop`
    pub fn resolve(&self, client: &FetchClient, item: WorkItem) -> Route {
        match client.fetch(&item.identifier) {
            Ok(record) => Route::Write(record),
            Err(FetchFailure::RateLimited) => self.after_throttle(client, item),
            Err(failure) => drop_item(&item, failure),
        }
    }

    fn after_throttle(&self, client: &FetchClient, item: WorkItem) -> Route {
        if !client.has_fallback() {
            tracing::warn!(
                line = item.line_number,
                id = %item.identifier,
                "rate limited; no fallback configured"
            );
            return self.requeue(item, FetchFailure::RateLimited);
        }
        tracing::warn!(
            line = item.line_number,
            id = %item.identifier,
            "rate limited on primary url; trying fallback"
        );
        match client.fetch_fallback(&item.identifier) {
            Ok(record) => {
                tracing::info!(line = item.line_number, id = %item.identifier, "fallback resolved");
                Route::Write(record)
            }
            Err(failure @ (FetchFailure::RateLimited | FetchFailure::Transport { .. })) => {
                self.requeue(item, failure)
            }
            Err(failure) => drop_item(&item, failure),
        }
    }

    fn requeue(&self, item: WorkItem, cause: FetchFailure) -> Route {
        if let Some(limit) = self.max_requeues {
            if item.attempts >= limit {
                tracing::error!(
                    line = item.line_number,
                    id = %item.identifier,
                    attempts = item.attempts,
                    reason = %cause,
                    "requeue limit reached; dropping"
                );
                return Route::Drop(cause);
            }
        }
        let item = item.requeued();
        tracing::warn!(
            line = item.line_number,
            id = %item.identifier,
            attempts = item.attempts,
            reason = %cause,
            "requeued"
        );
        Route::Requeue(item)
    }

    /// Back off after a requeue. Logs the pause before it starts and returns
    /// early when shutdown is requested.
    pub fn stall(&self, shutdown: &ShutdownSignal) {
        tracing::warn!(sleep_secs = self.sleep.as_secs_f64(), "sleep {}s", self.sleep.as_secs());
        shutdown.sleep(self.sleep);
    }
}

impl From<&PipelineOptions> for RetryPolicy {
    fn from(options: &PipelineOptions) -> Self {
        Self::new(options.sleep_duration(), options.max_requeues)
    }
}

fn drop_item(item: &WorkItem, failure: FetchFailure) -> Route {
    tracing::error!(
        line = item.line_number,
        id = %item.identifier,
        kind = failure.kind(),
        reason = %failure,
        "dropped"
    );
    Route::Drop(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::{HttpResponse, Transport};
    use crate::types::{CellIdentifier, FetchConfig};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Pops scripted replies in order; records which host was asked.
    struct Script {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        hosts: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                hosts: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Script {
        fn get(&self, url: &str, _user_agent: &str) -> Result<HttpResponse, TransportError> {
            let host = url.split('/').nth(2).unwrap_or_default().to_string();
            self.hosts.lock().expect("hosts").push(host);
            self.replies
                .lock()
                .expect("replies")
                .pop_front()
                .expect("script exhausted")
        }
    }

    const OK: &str = r#"{"errcode":0,"lat":"31.23","lon":"121.47","radius":"500","address":"Shanghai"}"#;

    fn client(script: &Arc<Script>) -> FetchClient {
        let config = FetchConfig::default()
            .primary_url("http://primary/{mcc}/{mnc}/{lac}/{cid}")
            .fallback_url(Some("http://fallback/{mcc}/{mnc}/{lac}/{cid}".into()));
        FetchClient::new(&config, Arc::clone(script) as Arc<dyn Transport>)
    }

    fn item() -> WorkItem {
        WorkItem::new(1, CellIdentifier::new(460, 0, 2, 5465))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::ZERO, None)
    }

    #[test]
    fn throttled_primary_resolves_through_fallback() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(403, "")),
            Ok(HttpResponse::new(200, OK)),
        ]);
        let route = policy().resolve(&client(&script), item());
        assert!(matches!(route, Route::Write(_)));
        assert_eq!(*script.hosts.lock().expect("hosts"), ["primary", "fallback"]);
    }

    #[test]
    fn throttled_twice_requeues_with_attempt_count() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(403, "")),
            Ok(HttpResponse::new(403, "")),
        ]);
        match policy().resolve(&client(&script), item()) {
            Route::Requeue(item) => assert_eq!(item.attempts, 1),
            other => panic!("expected requeue, got {other:?}"),
        }
    }

    #[test]
    fn fallback_network_error_requeues_but_domain_error_drops() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(403, "")),
            Err(TransportError::Timeout("10s".into())),
        ]);
        assert!(matches!(
            policy().resolve(&client(&script), item()),
            Route::Requeue(_)
        ));

        let script = Script::new(vec![
            Ok(HttpResponse::new(403, "")),
            Ok(HttpResponse::new(200, r#"{"errcode":10001}"#)),
        ]);
        assert!(matches!(
            policy().resolve(&client(&script), item()),
            Route::Drop(FetchFailure::Domain { code: 10001, .. })
        ));
    }

    #[test]
    fn primary_transport_error_is_dropped_without_fallback() {
        let script = Script::new(vec![Ok(HttpResponse::new(500, "oops"))]);
        assert!(matches!(
            policy().resolve(&client(&script), item()),
            Route::Drop(FetchFailure::Transport { .. })
        ));
        assert_eq!(script.hosts.lock().expect("hosts").len(), 1);
    }

    #[test]
    fn requeue_limit_drops_item() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(403, "")),
            Ok(HttpResponse::new(403, "")),
        ]);
        let mut tired = item();
        tired.attempts = 3;
        let route = RetryPolicy::new(Duration::ZERO, Some(3)).resolve(&client(&script), tired);
        assert_eq!(route, Route::Drop(FetchFailure::RateLimited));
    }
}
