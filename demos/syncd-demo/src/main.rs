//! Thin example binary wiring `config`, `remote`, `revindex`, and
//! `sync-daemon` together into one running daemon.
//!
//! Intentionally not a CLI: no argument grammar, subcommands, or RPC
//! surface. Those live outside this workspace's scope (see the crate-level
//! docs on `sync-daemon`). This binary exists so the sync core can be run
//! end to end against the deterministic `FakeRemote`, the same way a
//! teacher's minimal daemon entry point would be run against a loopback
//! server during development.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{JsonStateStore, StateStore, SyncConfig};
use remote::FakeRemote;
use revindex::RevisionIndex;
use sync_daemon::Monitor;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let sync_root = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("dropsync-demo"));
    std::fs::create_dir_all(&sync_root).expect("create sync root");

    let config = SyncConfig::new(&sync_root);

    let state_store = Arc::new(JsonStateStore::new(sync_root.join("state.json")));
    state_store.load().ok();
    let state: Arc<dyn StateStore> = Arc::clone(&state_store) as Arc<dyn StateStore>;

    let index = RevisionIndex::new(sync_root.join("index.rix"));
    index.load().ok();

    let remote = Arc::new(FakeRemote::new());

    let monitor = Arc::new(Monitor::new(Arc::clone(&remote), config, state, index));

    monitor.start().expect("start sync monitor");
    note_started(&sync_root);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = async {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if !monitor.flags().running() {
                    break;
                }
            }
        } => {}
    }

    monitor.stop().await;
    state_store.save().expect("persist demo state on shutdown");
}

fn note_started(root: &std::path::Path) {
    tracing::info!(root = %root.display(), "dropsync demo started");
}
