// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use logfetcher::{
    auth::AuthSession,
    broker::AmqpBroker,
    classifier::Classifier,
    config::Config,
    consumer::Pipeline,
    directory::DirectoryClient,
    http::build_client,
    index_writer::ElasticsearchWriter,
    logger::Formatter,
    manager::Manager,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // no subscriber yet
            eprintln!("LOGFETCHER | ERROR | {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,lapin=warn,{}",
        config.log_level
    );
    let filter = match EnvFilter::try_new(&env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("LOGFETCHER | ERROR | could not parse log level {env_filter}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .finish();
    // try_init also bridges `log` records, which lapin emits
    if let Err(e) = subscriber.try_init() {
        eprintln!("LOGFETCHER | ERROR | setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let client = match build_client(config.https_proxy.as_deref(), config.http_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let writer = ElasticsearchWriter::new(
        client.clone(),
        config.elastic_url.clone(),
        config.elastic_credentials.clone(),
    );
    if let Err(e) = writer.ping().await {
        error!("Elasticsearch at {} is unreachable: {e}", config.elastic_url);
        return ExitCode::FAILURE;
    }

    let session = Arc::new(AuthSession::new(
        client.clone(),
        config.api_base_url.clone(),
        config.api_credentials.clone(),
    ));
    let manager = Arc::new(Manager::new(
        Arc::new(DirectoryClient::new(client, session)),
        Pipeline {
            broker: Arc::new(AmqpBroker::new(config.rabbitmq_url.clone())),
            writer: Arc::new(writer),
            classifier: Arc::new(Classifier::default()),
        },
        config.poll_interval,
    ));

    let cancel_token = CancellationToken::new();
    let reconciler = tokio::spawn({
        let manager = Arc::clone(&manager);
        let cancel_token = cancel_token.clone();
        async move { manager.run(cancel_token).await }
    });
    info!("Log ingestion started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    cancel_token.cancel();
    if let Err(e) = reconciler.await {
        error!("Reconciler task failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
