//! Scripted [`Transport`] for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::transport::{Transport, TransportError};

/// Answers requests from a list of `(url fragment, response)` routes.
///
/// The first route whose fragment occurs in the requested URL wins.
/// Unmatched URLs fail like an unreachable host.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<(String, Result<String, TransportError>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, fragment: &str, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((fragment.to_string(), Ok(body.to_string())));
        self
    }

    pub fn fail(self, fragment: &str) -> Self {
        self.fail_with(
            fragment,
            TransportError::Request {
                url: fragment.to_string(),
                message: "connection refused".to_string(),
            },
        )
    }

    pub fn fail_with(self, fragment: &str, error: TransportError) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((fragment.to_string(), Err(error)));
        self
    }

    /// Swaps the response of an existing route, or adds it.
    pub fn replace(&self, fragment: &str, body: &str) {
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|(f, _)| f.as_str() == fragment) {
            Some(route) => route.1 = Ok(body.to_string()),
            None => routes.push((fragment.to_string(), Ok(body.to_string()))),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| {
                Err(TransportError::Request {
                    url: url.to_string(),
                    message: "no route".to_string(),
                })
            })
    }
}
