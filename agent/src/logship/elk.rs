//! ELK log sink
//!
//! Every line becomes its own document, PUT to the configured endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};
use trainer_api::models::AppLogs;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logship::LogSink;
use crate::storage::settings::ElkSinkSettings;

/// One indexed log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElkDocument<'a> {
    pub app: &'a str,
    pub message: &'a str,
    #[serde(rename = "logLevel")]
    pub log_level: &'static str,
}

/// Documents for a payload: per application stderr before stdout, newest
/// line first. Blank lines are dropped.
pub fn documents(logs: &HashMap<String, AppLogs>) -> Vec<ElkDocument<'_>> {
    let mut apps: Vec<_> = logs.iter().collect();
    apps.sort_by(|a, b| a.0.cmp(b.0));

    let mut docs = Vec::new();
    for (app, app_logs) in apps {
        for (stream, blob) in [("stderr", &app_logs.stderr), ("stdout", &app_logs.stdout)] {
            docs.extend(
                blob.lines()
                    .rev()
                    .filter(|line| !line.trim().is_empty())
                    .map(|message| ElkDocument {
                        app: app.as_str(),
                        message,
                        log_level: stream,
                    }),
            );
        }
    }
    docs
}

pub struct ElkLogSink {
    client: Client,
    uri: String,
    user: String,
    password: Option<SecretString>,
}

impl ElkLogSink {
    pub async fn from_settings(settings: &ElkSinkSettings) -> Result<Self, AgentError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(settings.insecure_skip_verify);

        if let Some(path) = &settings.ca_cert_path {
            match File::new(path).read_bytes().await {
                Ok(pem) => {
                    let cert = Certificate::from_pem(&pem).map_err(|e| {
                        AgentError::ConfigError(format!("invalid ELK CA certificate {}: {}", path, e))
                    })?;
                    builder = builder.add_root_certificate(cert);
                }
                Err(e) => warn!("Could not read ELK CA certificate {}: {}", path, e),
            }
        }

        Ok(Self {
            client: builder.build()?,
            uri: settings.uri.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    async fn put(&self, doc: &ElkDocument<'_>) -> Result<(), AgentError> {
        let response = self
            .client
            .put(&self.uri)
            .basic_auth(
                &self.user,
                self.password.as_ref().map(|p| p.expose_secret()),
            )
            .json(doc)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::ChannelFailure(format!(
                "{} returned {}",
                self.uri,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSink for ElkLogSink {
    fn name(&self) -> &str {
        &self.uri
    }

    async fn send(&self, logs: &HashMap<String, AppLogs>) -> Result<(), AgentError> {
        let docs = documents(logs);
        let mut failed = 0;
        for doc in &docs {
            if let Err(e) = self.put(doc).await {
                debug!("Could not index line of {}: {}", doc.app, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(AgentError::ChannelFailure(format!(
                "{} of {} lines not indexed",
                failed,
                docs.len()
            )));
        }
        Ok(())
    }
}
