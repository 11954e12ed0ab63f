//! In-memory [`Fetch`] implementation with scripted replies.
//!
//! ```
//! use mrs_sdk::mock::MockFetcher;
//! use mrs_sdk::HttpResponse;
//!
//! let mock = MockFetcher::new();
//! mock.push(HttpResponse::json(&serde_json::json!({ "items": [] })));
//! assert_eq!(mock.pending(), 1);
//! ```

use crate::error::{MrsError, MrsResult};
use crate::http::{Fetch, HttpRequest, HttpResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Response(HttpResponse),
    Error(MrsError),
}

#[derive(Debug, Clone)]
struct Scripted {
    delay: Option<Duration>,
    reply: Reply,
}

/// Replays queued responses in order and records every request.
#[derive(Debug, Default)]
pub struct MockFetcher {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push(&self, response: HttpResponse) -> &Self {
        self.enqueue(None, Reply::Response(response))
    }

    /// Queues a 200 response with a JSON body.
    pub fn push_json(&self, body: serde_json::Value) -> &Self {
        self.push(HttpResponse::json(&body))
    }

    /// Queues a response that arrives after `delay`.
    pub fn push_delayed(&self, delay: Duration, response: HttpResponse) -> &Self {
        self.enqueue(Some(delay), Reply::Response(response))
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: MrsError) -> &Self {
        self.enqueue(None, Reply::Error(error))
    }

    /// Response used once the queue is empty.
    pub fn set_fallback(&self, response: HttpResponse) {
        *self.fallback.lock() = Some(Scripted {
            delay: None,
            reply: Reply::Response(response),
        });
    }

    fn enqueue(&self, delay: Option<Duration>, reply: Reply) -> &Self {
        self.queue.lock().push_back(Scripted { delay, reply });
        self
    }

    /// Number of queued replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Fetch for MockFetcher {
    async fn fetch(&self, request: HttpRequest) -> MrsResult<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        let scripted = self
            .queue
            .lock()
            .pop_front()
            .or_else(|| self.fallback.lock().clone());
        let Some(scripted) = scripted else {
            return Err(MrsError::network(format!("No scripted response for {}", url)));
        };

        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }

        match scripted.reply {
            Reply::Response(response) => Ok(response),
            Reply::Error(error) => Err(error),
        }
    }
}
