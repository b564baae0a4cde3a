// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the backend device directory.
//!
//! Every call carries the session's bearer token. A 401 invalidates the
//! session, triggers one fresh login and one retry; a second 401 is returned
//! as [`ApiError::Unauthorized`] without a third attempt.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::AuthSession;
use crate::errors::ApiError;
use crate::types::{ApiResponse, Destination, Device};

const DEVICES_ENDPOINT: &str = "/nas/get_all";
const DESTINATIONS_ENDPOINT: &str = "/log-destinations/get-all";

/// Source of the desired device set, polled by the manager.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    session: Arc<AuthSession>,
}

impl DirectoryClient {
    #[must_use]
    pub fn new(client: reqwest::Client, session: Arc<AuthSession>) -> Self {
        Self { client, session }
    }

    /// Every registered device (`GET /nas/get_all`).
    pub async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError> {
        self.get(DEVICES_ENDPOINT).await
    }

    /// Export destinations (`GET /log-destinations/get-all`).
    pub async fn fetch_destinations(&self) -> Result<Vec<Destination>, ApiError> {
        self.get(DESTINATIONS_ENDPOINT).await
    }

    async fn get<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Default,
    {
        let url = format!("{}{path}", self.session.base_url());
        let mut relogged = false;
        loop {
            let token = self.session.token().await?;
            let request = self.client.get(&url).bearer_auth(&token).build()?;
            debug!(
                url = %url,
                headers = ?crate::http::redact_headers(request.headers()),
                "backend API request"
            );
            let response = self.client.execute(request).await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if relogged {
                    return Err(ApiError::Unauthorized);
                }
                warn!("Got 401 Unauthorized from {path}. Attempting to re-login...");
                self.session.invalidate().await;
                self.session.login().await?;
                relogged = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let bytes = response.bytes().await?;
            let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
            return envelope.into_data();
        }
    }
}

#[async_trait]
impl DeviceDirectory for DirectoryClient {
    async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError> {
        DirectoryClient::fetch_devices(self).await
    }
}
