//! Resilient multi-endpoint queries.
//!
//! Every remote call the monitor makes goes through a [`QueryExecutor`],
//! which tries a pool of equivalent endpoints in random order and returns
//! the first response that decodes and passes a typed predicate. The HTTP
//! layer itself sits behind the [`Transport`] trait so the failover logic
//! can be exercised without a network.

pub mod executor;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use executor::{
    AttemptError, EndpointFailure, EndpointOrder, NoopObserver, QueryAttempt, QueryError,
    QueryExecutor, QueryObserver, QueryResult,
};
pub use transport::{HttpTransport, Transport, TransportError};
