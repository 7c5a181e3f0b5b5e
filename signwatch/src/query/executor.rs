//! Fan-out-with-failover query execution.
//!
//! One logical query is tried against an ordered pool of equivalent
//! endpoints. The pool is shuffled once per call so load spreads across
//! nominally identical nodes; endpoints are then tried strictly in that
//! order. Each attempt performs the request, decodes the body into the
//! caller's response type, and runs the caller's predicate on it. The
//! first attempt that passes all three steps wins. If none does, the
//! caller gets one error that lists every endpoint's host and failure in
//! the order they were tried.
//!
//! There is no retry or backoff here. Callers decide when to try again.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::transport::{Transport, TransportError, endpoint_host, join_url};

/// Outcome of a single endpoint attempt, reported to a [`QueryObserver`].
#[derive(Clone, Debug)]
pub struct QueryAttempt<'a> {
    pub chain: &'a str,
    pub host: &'a str,
    /// Query type tag, e.g. `"validators"` or `"block"`.
    pub query: &'a str,
    pub duration: Duration,
    pub success: bool,
}

/// Observes every endpoint attempt without taking part in failover.
pub trait QueryObserver: Send + Sync {
    fn on_attempt(&self, attempt: &QueryAttempt<'_>);
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn on_attempt(&self, _attempt: &QueryAttempt<'_>) {}
}

/// Why one endpoint attempt failed.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid response: {0}")]
    Predicate(String),
}

/// One endpoint's failure inside a query.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EndpointFailure {
    pub host: String,
    pub error: AttemptError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.error)
    }
}

fn join_failures(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("no endpoints configured for {query} query on {chain}")]
    NoEndpoints { chain: String, query: String },

    #[error(
        "all {} endpoints failed for {query} query on {chain}: {}",
        .failures.len(),
        join_failures(.failures)
    )]
    AllFailed {
        chain: String,
        query: String,
        failures: Vec<EndpointFailure>,
    },
}

impl QueryError {
    /// Per-endpoint failures, in the order the endpoints were tried.
    pub fn failures(&self) -> &[EndpointFailure] {
        match self {
            QueryError::NoEndpoints { .. } => &[],
            QueryError::AllFailed { failures, .. } => failures,
        }
    }
}

/// A successful query together with the endpoints that failed before it.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub value: T,
    /// Host that produced `value`.
    pub host: String,
    pub failures: Vec<EndpointFailure>,
}

/// Order in which a call walks the endpoint pool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EndpointOrder {
    /// Fresh uniform permutation on every call.
    #[default]
    Shuffled,
    /// Configured order; used where determinism matters more than spread.
    Sequential,
}

/// Executes queries against one pool of equivalent endpoints.
#[derive(Clone)]
pub struct QueryExecutor {
    chain: String,
    endpoints: Vec<String>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn QueryObserver>,
    order: EndpointOrder,
}

impl QueryExecutor {
    pub fn new(
        chain: impl Into<String>,
        endpoints: Vec<String>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn QueryObserver>,
    ) -> Self {
        Self {
            chain: chain.into(),
            endpoints,
            transport,
            observer,
            order: EndpointOrder::Shuffled,
        }
    }

    pub fn with_order(mut self, order: EndpointOrder) -> Self {
        self.order = order;
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn attempt_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.endpoints.len()).collect();
        if self.order == EndpointOrder::Shuffled {
            indices.shuffle(&mut rand::thread_rng());
        }
        indices
    }

    /// Runs `GET path` against the pool, decoding the body as `T` and
    /// accepting it only if `predicate` returns `Ok`.
    pub async fn get<T, P>(
        &self,
        query: &str,
        path: &str,
        predicate: P,
    ) -> Result<QueryResult<T>, QueryError>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> Result<(), String>,
    {
        if self.endpoints.is_empty() {
            return Err(QueryError::NoEndpoints {
                chain: self.chain.clone(),
                query: query.to_string(),
            });
        }

        let mut failures = Vec::new();

        for index in self.attempt_order() {
            let endpoint = &self.endpoints[index];
            let host = endpoint_host(endpoint);
            let url = join_url(endpoint, path);

            let started = Instant::now();
            let outcome = self.attempt(&url, &predicate).await;

            self.observer.on_attempt(&QueryAttempt {
                chain: &self.chain,
                host: &host,
                query,
                duration: started.elapsed(),
                success: outcome.is_ok(),
            });

            match outcome {
                Ok(value) => {
                    debug!(chain = %self.chain, %host, query, "query succeeded");
                    return Ok(QueryResult {
                        value,
                        host,
                        failures,
                    });
                }
                Err(error) => {
                    warn!(chain = %self.chain, %host, query, %error, "query attempt failed");
                    failures.push(EndpointFailure { host, error });
                }
            }
        }

        Err(QueryError::AllFailed {
            chain: self.chain.clone(),
            query: query.to_string(),
            failures,
        })
    }

    async fn attempt<T, P>(&self, url: &str, predicate: &P) -> Result<T, AttemptError>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> Result<(), String>,
    {
        let body = self.transport.get(url).await?;
        let value: T =
            serde_json::from_str(&body).map_err(|e| AttemptError::Decode(e.to_string()))?;
        predicate(&value).map_err(AttemptError::Predicate)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fake::FakeTransport;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        attempts: Mutex<Vec<(String, String, bool)>>,
    }

    impl QueryObserver for RecordingObserver {
        fn on_attempt(&self, attempt: &QueryAttempt<'_>) {
            self.attempts.lock().unwrap().push((
                attempt.host.to_string(),
                attempt.query.to_string(),
                attempt.success,
            ));
        }
    }

    #[derive(Debug, Deserialize)]
    struct Validators {
        validators: Vec<String>,
    }

    fn non_empty(v: &Validators) -> Result<(), String> {
        if v.validators.is_empty() {
            Err("no validators returned".to_string())
        } else {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fails_over_to_the_first_healthy_endpoint() {
        let transport = Arc::new(
            FakeTransport::new()
                .fail("http://node-a")
                .route("http://node-b", r#"{"validators": []}"#)
                .route("http://node-c", r#"{"validators": ["v1"]}"#),
        );
        let observer = Arc::new(RecordingObserver::default());

        let executor = QueryExecutor::new(
            "cosmos",
            vec![
                "http://node-a".to_string(),
                "http://node-b".to_string(),
                "http://node-c".to_string(),
            ],
            transport.clone(),
            observer.clone(),
        )
        .with_order(EndpointOrder::Sequential);

        let result = executor
            .get::<Validators, _>("validators", "/validators", non_empty)
            .await
            .expect("third endpoint succeeds");

        assert_eq!(result.value.validators, vec!["v1".to_string()]);
        assert_eq!(result.host, "node-c");

        let hosts: Vec<&str> = result.failures.iter().map(|f| f.host.as_str()).collect();
        assert_eq!(hosts, vec!["node-a", "node-b"]);
        assert!(matches!(result.failures[0].error, AttemptError::Transport(_)));
        assert!(matches!(result.failures[1].error, AttemptError::Predicate(_)));

        let attempts = observer.attempts.lock().unwrap().clone();
        assert_eq!(
            attempts,
            vec![
                ("node-a".to_string(), "validators".to_string(), false),
                ("node-b".to_string(), "validators".to_string(), false),
                ("node-c".to_string(), "validators".to_string(), true),
            ]
        );
        assert_eq!(transport.calls()[2], "http://node-c/validators");
    }

    #[tokio::test]
    async fn total_failure_lists_every_host() {
        let transport = Arc::new(
            FakeTransport::new()
                .fail("http://node-a")
                .route("http://node-b", "not json")
                .route("http://node-c", r#"{"validators": []}"#)
                .fail_with(
                    "http://node-d",
                    TransportError::Status {
                        url: "http://node-d/validators".to_string(),
                        status: 502,
                    },
                ),
        );

        let executor = QueryExecutor::new(
            "cosmos",
            vec![
                "http://node-a".to_string(),
                "http://node-b".to_string(),
                "http://node-c".to_string(),
                "http://node-d".to_string(),
            ],
            transport,
            Arc::new(NoopObserver),
        );

        let err = executor
            .get::<Validators, _>("validators", "/validators", non_empty)
            .await
            .expect_err("every endpoint fails");

        assert_eq!(err.failures().len(), 4);
        let text = err.to_string();
        for host in ["node-a", "node-b", "node-c", "node-d"] {
            assert!(text.contains(host), "{text} should mention {host}");
        }
        assert!(text.starts_with("all 4 endpoints failed for validators query on cosmos"));
    }

    #[tokio::test]
    async fn shuffled_order_still_tries_each_endpoint_once() {
        let transport = Arc::new(FakeTransport::new());
        let endpoints: Vec<String> = (0..8).map(|i| format!("http://node-{i}")).collect();

        let executor = QueryExecutor::new(
            "cosmos",
            endpoints.clone(),
            transport.clone(),
            Arc::new(NoopObserver),
        );

        let err = executor
            .get::<Validators, _>("validators", "/validators", non_empty)
            .await
            .expect_err("unknown hosts fail");
        assert_eq!(err.failures().len(), 8);

        let mut called = transport.calls();
        called.sort();
        let mut expected: Vec<String> = endpoints.iter().map(|e| format!("{e}/validators")).collect();
        expected.sort();
        assert_eq!(called, expected);
    }

    #[tokio::test]
    async fn empty_pool_is_reported() {
        let executor = QueryExecutor::new(
            "cosmos",
            Vec::new(),
            Arc::new(FakeTransport::new()),
            Arc::new(NoopObserver),
        );

        let err = executor
            .get::<Validators, _>("validators", "/validators", non_empty)
            .await
            .expect_err("no endpoints");
        assert!(matches!(err, QueryError::NoEndpoints { .. }));
    }
}
