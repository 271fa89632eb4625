// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relational_mailvault::api::router;
use relational_mailvault::blockchain::{
    parse_address, ChainClient, EvmCreditLedger, EvmSettlementSubmitter,
};
use relational_mailvault::config::{LogFormat, Settings};
use relational_mailvault::orchestrator::{ExpirySweeper, Orchestrator};
use relational_mailvault::state::AppState;
use relational_mailvault::storage::request_db::RequestDatabase;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    let settings = Settings::from_env().expect("Invalid configuration");
    init_tracing(settings.log_format);

    std::fs::create_dir_all(&settings.data_dir).expect("Failed to create data directory");
    let db = Arc::new(
        RequestDatabase::open(&settings.data_dir.join("requests.redb"))
            .expect("Failed to open request store"),
    );

    let client = ChainClient::connect(
        settings.network.clone(),
        &settings.rpc_url,
        &settings.operator_key,
    )
    .expect("Failed to connect chain client");
    let ledger_address =
        parse_address(&settings.ledger_address).expect("Invalid credit ledger address");
    let registry_address =
        parse_address(&settings.registry_address).expect("Invalid registry address");
    let ledger = Arc::new(
        EvmCreditLedger::new(&client, ledger_address, settings.confirm_timeout)
            .expect("Failed to bind credit ledger"),
    );
    let registry = Arc::new(
        EvmSettlementSubmitter::new(
            &client,
            registry_address,
            settings.registry_deploy_block,
            settings.confirm_timeout,
        )
        .expect("Failed to bind registry"),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        ledger,
        registry,
        settings.fees,
        settings.authorization_window,
        settings.public_base_url.clone(),
    ));
    let state = AppState::new(orchestrator, db.clone(), &settings.network);
    let app = router(state);

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(db)
        .with_interval(settings.sweep_interval)
        .with_retention(settings.prune_retention);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    info!(
        %addr,
        network = settings.network.name,
        operator = %client.operator(),
        "Relational Mailvault listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    // The HTTP side is down; stop the sweeper before exiting.
    shutdown.cancel();
    let _ = sweeper_task.await;
    info!("Shutdown complete");
}
