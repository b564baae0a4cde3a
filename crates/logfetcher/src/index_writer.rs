// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistence of normalized records into dated, per-device indices.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::errors::IndexError;
use crate::types::{NormalizedRecord, SubscriptionKey};

/// Characters Elasticsearch refuses in index names, plus `.` and whitespace.
const FORBIDDEN_INDEX_CHARS: [char; 12] = [
    '\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ':', '.',
];

/// Index names may not start with any of these.
const FORBIDDEN_INDEX_PREFIXES: [char; 3] = ['-', '_', '+'];

/// Stands in for a key with nothing usable left after sanitizing.
const FALLBACK_INDEX_PREFIX: &str = "unknown";

/// `{sanitized key}-{DD-MM-YYYY}`: one index per device per calendar day.
#[must_use]
pub fn index_name(key: &SubscriptionKey, date: NaiveDate) -> String {
    let sanitized: String = key
        .as_str()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_whitespace() || FORBIDDEN_INDEX_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = sanitized.trim_start_matches(FORBIDDEN_INDEX_PREFIXES);
    let prefix = if trimmed.is_empty() {
        FALLBACK_INDEX_PREFIX
    } else {
        trimmed
    };
    format!("{prefix}-{}", date.format("%d-%m-%Y"))
}

/// Writes one record into the named index. No retry happens at this layer.
#[async_trait]
pub trait IndexWriter: Send + Sync {
    async fn write(&self, record: &NormalizedRecord, index: &str) -> Result<(), IndexError>;
}

/// Basic-auth credentials for the search engine.
#[derive(Clone)]
pub struct ElasticCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ElasticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// [`IndexWriter`] backed by the Elasticsearch document API.
#[derive(Debug, Clone)]
pub struct ElasticsearchWriter {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<ElasticCredentials>,
}

impl ElasticsearchWriter {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Option<ElasticCredentials>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => builder.basic_auth(&c.username, Some(&c.password)),
            None => builder,
        }
    }

    /// Verifies the cluster answers `GET /` with a success status.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let response = self
            .authorize(self.client.get(format!("{}/", self.base_url)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(
            "Connected to Elasticsearch at {} (auth: {})",
            self.base_url,
            self.credentials.is_some()
        );
        Ok(())
    }
}

#[async_trait]
impl IndexWriter for ElasticsearchWriter {
    async fn write(&self, record: &NormalizedRecord, index: &str) -> Result<(), IndexError> {
        let body = serde_json::to_vec(record)?;
        let url = format!("{}/{index}/_doc", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Indexed document into {index} ({status})");
        Ok(())
    }
}
