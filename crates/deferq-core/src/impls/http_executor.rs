//! HTTP executor: performs a task by calling its target URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use crate::domain::HttpMethod;
use crate::ports::Executor;

/// Calls `target` with the task's method; only `200 OK` counts as success.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, target: &str, method: HttpMethod) -> bool {
        match self
            .client
            .request(to_reqwest(method), target)
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status();
                debug!(%target, %method, %status, "task request finished");
                status == StatusCode::OK
            }
            Err(e) => {
                warn!(%target, %method, error = %e, "task request failed");
                false
            }
        }
    }
}
