//! Built-in readiness checks for sensors.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::sensor::ReadinessCheck;
use crate::core::task::TaskError;

/// Ready when a GET request succeeds and the body contains an expected substring.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    url: String,
    contains: Option<String>,
    client: reqwest::Client,
}

impl HttpCheck {
    /// Check `url` with a 10 second request timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(url, Duration::from_secs(10))
    }

    /// Check `url` with a custom request timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            contains: None,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Builder: require the response body to contain `needle`.
    pub fn expect_body_contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReadinessCheck for HttpCheck {
    async fn check(&self) -> Result<bool, TaskError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TaskError::Transient(format!("GET {}: {e}", self.url)))?;

        if !resp.status().is_success() {
            return Ok(false);
        }

        match &self.contains {
            Some(needle) => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| TaskError::Transient(format!("reading body of {}: {e}", self.url)))?;
                Ok(body.contains(needle.as_str()))
            }
            None => Ok(true),
        }
    }

    fn description(&self) -> Option<String> {
        Some(format!("GET {}", self.url))
    }
}

/// Ready when a path exists.
#[derive(Debug, Clone)]
pub struct FileCheck {
    path: PathBuf,
}

impl FileCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl ReadinessCheck for FileCheck {
    async fn check(&self) -> Result<bool, TaskError> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| TaskError::Transient(format!("{}: {e}", self.path.display())))
    }

    fn description(&self) -> Option<String> {
        Some(format!("file {}", self.path.display()))
    }
}
