//! Application health checks
//!
//! A deploy only counts as running once every readiness probe of its
//! configuration passes.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::Client;
use tokio::net::TcpStream;
use tracing::debug;
use trainer_api::models::{AppCheck, CheckKind, VersionConfig};

use crate::errors::AgentError;

/// Health verdict for a deployed application
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// `true` iff every check passes; stops at the first failing probe
    async fn evaluate(&self, config: &VersionConfig) -> bool;
}

/// Probes http and tcp targets over the network
pub struct ProbeHealthChecker {
    client: Client,
    probe_timeout: Duration,
}

impl ProbeHealthChecker {
    pub fn new(probe_timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(probe_timeout).build()?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    async fn probe(&self, check: &AppCheck) -> bool {
        match check.kind {
            CheckKind::Http => self.probe_http(&check.target).await,
            CheckKind::Tcp => self.probe_tcp(&check.target).await,
        }
    }

    async fn probe_http(&self, target: &str) -> bool {
        match self.client.get(target).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                debug!("http check {} returned {}", target, response.status());
                false
            }
            Err(e) => {
                debug!("http check {} failed: {}", target, e);
                false
            }
        }
    }

    async fn probe_tcp(&self, target: &str) -> bool {
        match tokio::time::timeout(self.probe_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("tcp check {} failed: {}", target, e);
                false
            }
            Err(_) => {
                debug!("tcp check {} timed out", target);
                false
            }
        }
    }
}

#[async_trait]
impl HealthChecker for ProbeHealthChecker {
    async fn evaluate(&self, config: &VersionConfig) -> bool {
        for check in &config.checks {
            if !self.probe(check).await {
                return false;
            }
        }
        true
    }
}
