use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use spotbot::config::AppConfig;
use spotbot::engine::TradingEngine;
use spotbot::events::EventBus;
use spotbot::gateway::BinanceGateway;
use spotbot::logger::{self, LogTag};
use spotbot::webserver;

const DB_PATH: &str = "data/spotbot.db";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logger::init();

    let config = AppConfig::load();
    logger::info(
        LogTag::System,
        &format!("starting spotbot: {:?}", config.redacted()),
    );

    let bus = Arc::new(EventBus::new());
    let gateway = Arc::new(
        BinanceGateway::new(&config).map_err(|e| anyhow::anyhow!("gateway setup: {e}"))?,
    );
    let engine = TradingEngine::new(
        config.clone(),
        gateway,
        bus.clone(),
        PathBuf::from(DB_PATH),
    );

    // A failed init leaves the engine in ERROR; the server still comes up
    // so subscribers can see the status and the logs.
    if let Err(reason) = engine.initialize().await {
        logger::error(
            LogTag::System,
            &format!("engine initialization failed: {reason}"),
        );
    }

    let server = {
        let engine = engine.clone();
        let bus = bus.clone();
        tokio::spawn(async move { webserver::start_server(config.port, engine, bus).await })
    };

    tokio::select! {
        result = server => {
            match result {
                Ok(Err(reason)) => logger::error(LogTag::System, &format!("server exited: {reason}")),
                Err(e) => logger::error(LogTag::System, &format!("server task failed: {e}")),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            logger::info(LogTag::System, "shutdown signal received");
        }
    }

    engine.stop(true).await;
    logger::flush();
    Ok(())
}
