//! HABoard sync daemon
//!
//! Usage: `haboard-sync <data-dir>`. Reads `sync_config.json` from the data
//! directory, keeps `haboard.db` there in sync with the server, and logs to
//! `<data-dir>/logs`.

use std::path::PathBuf;
use std::sync::Arc;

use haboard_sync::config::{db_path, get_sync_config};
use haboard_sync::{LocalStore, ManualConnectivity, SyncEngine};

#[tokio::main]
async fn main() {
    let data_dir = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => {
            eprintln!("usage: haboard-sync <data-dir>");
            std::process::exit(2);
        }
    };

    if let Err(e) = rolling_logger::init_logger(data_dir.join("logs"), "HABoardSync") {
        eprintln!("failed to init rolling logger: {}", e);
    }

    let Some(config) = get_sync_config(&data_dir) else {
        let _ = rolling_logger::error("No sync configuration found");
        eprintln!("no sync_config.json in {}", data_dir.display());
        std::process::exit(1);
    };
    let _ = rolling_logger::info(&format!("Syncing with {}", config.base_url));

    let connectivity = Arc::new(ManualConnectivity::new(true));
    let store = LocalStore::new(db_path(&data_dir));
    let engine = SyncEngine::builder(config, store)
        .connectivity(connectivity)
        .build();

    engine.start().await;

    let state = engine.state();
    match state.sync_error() {
        Some(e) => eprintln!("initial sync failed: {}", e),
        None => eprintln!(
            "{} open, {} completed, {} pending",
            state.incomplete_tasks().len(),
            state.completed_tasks().len(),
            engine.pending_mutations().await.map(|p| p.len()).unwrap_or(0)
        ),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        let _ = rolling_logger::error(&format!("Signal handler failed: {}", e));
    }
    engine.shutdown().await;
    let _ = rolling_logger::info("Sync daemon stopped");
}
