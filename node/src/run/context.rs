//! Wiring shared by the dashboard, headless mode and the one-shot commands.

use crate::cli::MonitorConfig;
use crate::connection::{ConfigUpdate, ConnectionSupervisor};
use crate::history::SessionLedger;
use crate::mode::{spawn_mode_follower, ModeDetector};
use crate::poll::{ObserverFeed, SyncPage};
use crate::reference::{HttpReference, ReferenceSource};
use crate::rpc::{NodeApi, RpcTransport};
use crate::storage::Storage;
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Open storage under `data_dir`, falling back to memory so the monitor
/// still runs on a read-only home.
pub fn open_storage(data_dir: &Path) -> Arc<Storage> {
    match Storage::open(data_dir) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            warn!(
                data_dir = %data_dir.display(),
                error = %err,
                "state will not survive a restart"
            );
            Arc::new(Storage::in_memory())
        }
    }
}

pub fn build_reference(config: &MonitorConfig) -> Option<Arc<dyn ReferenceSource>> {
    if config.no_reference {
        debug!("reference api disabled");
        return None;
    }
    match HttpReference::new(&config.reference_url) {
        Ok(reference) => Some(Arc::new(reference)),
        Err(err) => {
            warn!(url = %config.reference_url, error = %err, "reference api unavailable");
            None
        }
    }
}

/// Everything a long-running session needs. Dropping it stops the mode
/// follower; the supervisor stops with [`AppContext::shutdown`].
pub struct AppContext {
    pub data_dir: PathBuf,
    pub storage: Arc<Storage>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub detector: Arc<ModeDetector>,
    pub ledger: Arc<Mutex<SessionLedger>>,
    pub sync_page: Arc<SyncPage>,
    pub observer_feed: Arc<ObserverFeed>,
    mode_follower: JoinHandle<()>,
}

impl AppContext {
    /// Must run inside the tokio runtime.
    pub fn build(config: &MonitorConfig) -> Result<Self> {
        let data_dir = config.resolved_data_dir();
        let storage = open_storage(&data_dir);
        let api: Arc<dyn NodeApi> =
            Arc::new(RpcTransport::new().wrap_err("failed to build rpc client")?);
        Self::with_api(config, data_dir, storage, api)
    }

    pub fn with_api(
        config: &MonitorConfig,
        data_dir: PathBuf,
        storage: Arc<Storage>,
        api: Arc<dyn NodeApi>,
    ) -> Result<Self> {
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&api), build_reference(config), Arc::clone(&storage));
        if config.endpoint.is_some() || config.timeout_ms.is_some() {
            supervisor.set_config(ConfigUpdate {
                endpoint: config.endpoint.clone(),
                timeout_ms: config.timeout_ms,
            })?;
        }

        let detector = ModeDetector::new();
        let mode_follower = spawn_mode_follower(Arc::clone(&detector), supervisor.subscribe());
        let ledger = Arc::new(Mutex::new(SessionLedger::load(Arc::clone(&storage))));
        let sync_page = SyncPage::new(
            Arc::clone(&api),
            Arc::clone(&supervisor),
            Arc::clone(&detector),
            Arc::clone(&ledger),
        );
        let observer_feed = ObserverFeed::new(api, Arc::clone(&supervisor));

        let rpc = supervisor.config();
        info!(
            endpoint = %rpc.endpoint,
            timeout_ms = rpc.timeout_ms,
            data_dir = %data_dir.display(),
            persistent = storage.is_persistent(),
            "monitor starting"
        );

        Ok(Self {
            data_dir,
            storage,
            supervisor,
            detector,
            ledger,
            sync_page,
            observer_feed,
            mode_follower,
        })
    }

    pub fn shutdown(&self) {
        self.supervisor.disconnect();
        self.mode_follower.abort();
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.mode_follower.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RpcConfig, DEFAULT_ENDPOINT};
    use crate::storage::KEY_CONNECTION_CONFIG;
    use crate::test_utils::{temp_dir, ScriptedNode};
    use clap::Parser;

    #[tokio::test]
    async fn cli_overrides_are_persisted() {
        let config = MonitorConfig::parse_from([
            "node-monitor",
            "--no-reference",
            "--endpoint",
            "http://10.0.0.2:8332",
        ]);
        let storage = Arc::new(Storage::in_memory());
        let ctx = AppContext::with_api(
            &config,
            PathBuf::from("/unused"),
            Arc::clone(&storage),
            Arc::new(ScriptedNode::default()),
        )
        .expect("context");
        assert_eq!(ctx.supervisor.config().endpoint, "http://10.0.0.2:8332");
        let stored: RpcConfig = storage.get(KEY_CONNECTION_CONFIG).expect("stored");
        assert_eq!(stored.endpoint, "http://10.0.0.2:8332");
        ctx.shutdown();
    }

    #[tokio::test]
    async fn invalid_override_is_an_error() {
        let config = MonitorConfig::parse_from(["node-monitor", "--endpoint", "ftp://node"]);
        let result = AppContext::with_api(
            &config,
            PathBuf::from("/unused"),
            Arc::new(Storage::in_memory()),
            Arc::new(ScriptedNode::default()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn defaults_without_overrides() {
        let config = MonitorConfig::parse_from(["node-monitor", "--no-reference"]);
        let ctx = AppContext::with_api(
            &config,
            PathBuf::from("/unused"),
            Arc::new(Storage::in_memory()),
            Arc::new(ScriptedNode::default()),
        )
        .expect("context");
        assert_eq!(ctx.supervisor.config().endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn unusable_data_dir_falls_back_to_memory() {
        let dir = temp_dir("ctx-storage");
        std::fs::create_dir_all(&dir).expect("create dir");
        let blocker = dir.join("file");
        std::fs::write(&blocker, b"x").expect("write");
        assert!(!open_storage(&blocker).is_persistent());
        assert!(open_storage(&dir).is_persistent());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
