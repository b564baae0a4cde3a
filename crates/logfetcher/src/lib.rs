// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logfetcher
//!
//! Ingests network-device logs from a message broker into Elasticsearch.
//!
//! - [`manager`]: keeps one [`consumer`] per device listed by the backend
//!   [`directory`], reconciling on a fixed interval
//! - [`consumer`]: drains one device queue through the [`classifier`] into the
//!   [`index_writer`]
//! - [`auth`]: bearer-token session shared by every backend call

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]

pub mod auth;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod consumer;
pub mod directory;
pub mod errors;
pub mod http;
pub mod index_writer;
pub mod logger;
pub mod manager;
pub mod types;
