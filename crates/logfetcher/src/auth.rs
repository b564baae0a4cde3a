// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bearer-token session shared by every backend API call.
//!
//! The token is acquired lazily on first use and cached behind a read-mostly
//! lock. Callers that observe an authorization failure call
//! [`AuthSession::invalidate`] so the next [`AuthSession::token`] logs in again.
//! Concurrent callers racing on an empty cache may each log in; the last
//! successful login wins, which is fine since any valid token is accepted.

use std::fmt::Debug;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::ApiError;
use crate::types::{ApiResponse, LoginData};

const LOGIN_ENDPOINT: &str = "/auth/login";

/// Username/password pair exchanged for a bearer token.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub struct AuthSession {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    // empty means "log in before the next call"
    token: RwLock<String>,
}

impl AuthSession {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            token: RwLock::new(String::new()),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the cached token, logging in first when the cache is empty.
    pub async fn token(&self) -> Result<String, ApiError> {
        {
            let token = self.token.read().await;
            if !token.is_empty() {
                return Ok(token.clone());
            }
        }
        self.login().await
    }

    /// Drops the cached token, e.g. after the backend answered 401.
    pub async fn invalidate(&self) {
        self.token.write().await.clear();
        debug!("API token invalidated");
    }

    /// Performs the credentials-for-token exchange and caches the result.
    ///
    /// The lock is only taken to store the token, never across the request.
    pub async fn login(&self) -> Result<String, ApiError> {
        let url = format!("{}{LOGIN_ENDPOINT}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.credentials)
            .send()
            .await
            .map_err(|e| ApiError::Authentication(format!("login request error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Authentication(format!(
                "login failed, status: {}, body: {body}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Authentication(format!("login response error: {e}")))?;
        let envelope: ApiResponse<LoginData> = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Authentication(format!("failed to parse login response: {e}")))?;
        let data = envelope.into_data().map_err(|e| match e {
            ApiError::Backend(message) => {
                ApiError::Authentication(format!("login error from API: {message}"))
            }
            other => other,
        })?;
        if data.token.is_empty() {
            return Err(ApiError::Authentication(
                "login response carried no token".to_string(),
            ));
        }

        *self.token.write().await = data.token.clone();
        info!("API login successful. Token acquired.");
        Ok(data.token)
    }
}

impl Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
