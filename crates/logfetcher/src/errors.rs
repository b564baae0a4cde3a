// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the ingestion pipeline.

/// Failures talking to the backend API (login, device directory, destinations).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Login exchange failed: transport error, non-2xx status or an error envelope.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The backend answered 401 again after a fresh login.
    #[error("unauthorized after re-login")]
    Unauthorized,
    /// Any other non-success status.
    #[error("request failed, status: {status}, body: {body}")]
    Status { status: u16, body: String },
    /// The envelope reported `error: true`.
    #[error("API error: {0}")]
    Backend(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures writing a record into the search index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("search engine transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search engine rejected the request, status: {status}, body: {body}")]
    Rejected { status: u16, body: String },
}

/// Failures on the broker connection or channel.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("subscription to {0} was closed by the broker")]
    Closed(String),
    #[error("broker error: {0}")]
    Other(String),
}

/// Reason a consumer left its run loop other than cancellation.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer for queue {queue} failed: {source}")]
    Broker {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

/// Invalid or missing process configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
