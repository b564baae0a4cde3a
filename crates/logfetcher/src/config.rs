// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::auth::Credentials;
use crate::errors::ConfigError;
use crate::index_writer::ElasticCredentials;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Process configuration, resolved once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub rabbitmq_url: String,
    pub api_base_url: String,
    pub api_credentials: Credentials,
    pub elastic_url: String,
    /// basic auth is only used when both user and password are set
    pub elastic_credentials: Option<ElasticCredentials>,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub log_level: String,
    pub https_proxy: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let rabbitmq_url = required("RABBITMQ_URL")?;
        let api_base_url = trim_base(required("API_BASE_URL")?);
        let elastic_url = trim_base(required("ELASTIC_URL")?);

        let api_credentials = Credentials {
            username: optional("API_USERNAME").unwrap_or_default(),
            password: optional("API_PASSWORD").unwrap_or_default(),
        };
        let elastic_credentials = match (optional("ELASTIC_USER"), optional("ELASTIC_PASS")) {
            (Some(username), Some(password)) => Some(ElasticCredentials { username, password }),
            _ => None,
        };

        let poll_interval = Duration::from_secs(seconds(
            "LOGFETCHER_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let http_timeout = Duration::from_secs(seconds(
            "LOGFETCHER_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);
        let log_level = optional("LOGFETCHER_LOG_LEVEL")
            .map_or_else(|| DEFAULT_LOG_LEVEL.to_string(), |level| level.to_lowercase());

        Ok(Config {
            rabbitmq_url,
            api_base_url,
            api_credentials,
            elastic_url,
            elastic_credentials,
            poll_interval,
            http_timeout,
            log_level,
            https_proxy: optional("HTTPS_PROXY"),
        })
    }
}

// Empty values count as unset.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
