use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use linkvault::channels::{ChannelManager, MessageDispatcher, SourceList};
use linkvault::config::{self, Config};
use linkvault::controllers;
use linkvault::db::Database;
use linkvault::maintenance;
use linkvault::parser::{HttpRedirectResolver, MessageParser};
use linkvault::providers::ProviderCatalog;
use linkvault::refresh::{read_paused, RefreshSignals, RefreshWatcher};
use linkvault::rules::RuleCache;
use linkvault::store::LinkStore;
use linkvault::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    config::init_logger();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Using config directory: {:?}", config.config_dir);
    let catalog = Arc::new(ProviderCatalog::load(&config.config_dir));
    log::info!("Loaded {} providers", catalog.len());

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::with_busy_timeout(&config.database_url, config.db_busy_timeout)
        .map_err(|e| std::io::Error::other(format!("Failed to initialize database: {}", e)))?;
    let db = Arc::new(db);

    let rules = Arc::new(RuleCache::new());
    if let Err(e) = rules.reload(&db) {
        log::error!("Failed to load channel rules: {}", e);
    }

    let sources = Arc::new(SourceList::new(
        config.default_channels.clone(),
        Some(config.channels_file.clone()),
    ));
    let source_count = sources.reload(&db);
    if source_count == 0 {
        log::info!("No source channels configured, accepting posts from every channel");
    } else {
        log::info!("Monitoring {} channels", source_count);
    }

    let paused = Arc::new(AtomicBool::new(read_paused(&config.control_file)));
    let parser = Arc::new(MessageParser::new(catalog.clone()));

    log::info!("Initializing message dispatcher");
    let mut dispatcher = MessageDispatcher::new(
        parser,
        LinkStore::new(db.clone()),
        rules.clone(),
        sources.clone(),
        paused.clone(),
    );
    if config.resolve_redirects {
        match HttpRedirectResolver::new(catalog.clone(), config.redirect_timeout) {
            Ok(resolver) => dispatcher = dispatcher.with_resolver(Arc::new(resolver)),
            Err(e) => log::warn!("Redirect resolution disabled, client setup failed: {}", e),
        }
    }
    let dispatcher = Arc::new(dispatcher);

    let channel_manager = Arc::new(ChannelManager::new(dispatcher.clone()));
    match config.telegram_bot_token.clone() {
        Some(token) => {
            if let Err(e) = channel_manager.start_telegram(token) {
                log::error!("Failed to start telegram listener: {}", e);
            }
        }
        None => log::warn!("TELEGRAM_BOT_TOKEN not set, live ingestion disabled"),
    }

    let cancel = CancellationToken::new();
    let signals = Arc::new(RefreshSignals::default());
    let watcher = RefreshWatcher::new(
        db.clone(),
        rules.clone(),
        sources.clone(),
        paused,
        signals.clone(),
        config.channels_refresh_flag.clone(),
        config.rules_refresh_flag.clone(),
        config.control_file.clone(),
        config.refresh_poll,
    );
    tokio::spawn(watcher.run(cancel.clone()));

    if let Some(interval) = config.dedup_interval {
        maintenance::spawn_dedup_task(db.clone(), interval, cancel.clone());
    }

    let result = if config.disable_api {
        log::info!("HTTP API disabled via DISABLE_API, waiting for ctrl-c");
        tokio::signal::ctrl_c().await
    } else {
        log::info!("Starting linkvault API on port {}", port);
        let state = web::Data::new(AppState {
            db,
            config,
            rules,
            sources,
            signals,
            dispatcher,
        });
        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(Logger::default())
                .configure(controllers::health::config)
                .configure(controllers::messages::config)
                .configure(controllers::rules::config)
                .configure(controllers::channels::config)
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    };

    log::info!("Shutting down");
    cancel.cancel();
    channel_manager.stop_all();
    result
}
