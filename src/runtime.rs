//! Lifecycle and execution bridge to the embedded Polars runtime.
//!
//! The runtime is slow to bring up, so [`RuntimeBridge::initialize`] starts
//! it on a background task and returns at once. Callers check
//! [`RuntimeBridge::is_ready`] per operation and use the in-memory path
//! until it flips.
//!
//! ```text
//! Idle -> Loading -> Installing -> Ready
//!            \
//!             -> Failed(reason)
//! ```

pub mod engine;
pub mod frame;
pub mod loader;
pub mod script;

pub use engine::PolarsRuntime;
pub use loader::{PolarsLoader, RuntimeLoader};
pub use script::{Script, ScriptOutput};

use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};
use crate::table::{DatasetStore, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum RuntimeState {
    Idle,
    Loading,
    Installing,
    Ready,
    Failed(String),
}

impl RuntimeState {
    /// Ready and Failed are terminal.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Installing => write!(f, "installing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

type SharedEngine = Arc<tokio::sync::Mutex<Option<PolarsRuntime>>>;

#[derive(Debug)]
pub struct RuntimeBridge {
    config: RuntimeConfig,
    state: Arc<watch::Sender<RuntimeState>>,
    engine: SharedEngine,
    /// Store generation the `df` binding currently mirrors.
    mirrored: Mutex<Option<u64>>,
}

impl RuntimeBridge {
    pub fn new(config: RuntimeConfig) -> Self {
        let (state, _) = watch::channel(RuntimeState::Idle);
        Self {
            config,
            state: Arc::new(state),
            engine: Arc::new(tokio::sync::Mutex::new(None)),
            mirrored: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), RuntimeState::Ready)
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    /// Starts loading with the configured components. Must be called from
    /// within a tokio runtime.
    pub fn initialize(&self) {
        let loader = if self.config.components.is_empty() {
            PolarsLoader::default()
        } else {
            PolarsLoader::new(self.config.components.clone())
        };
        self.initialize_with(loader);
    }

    /// Idempotent: only the first call on an idle bridge starts a load.
    pub fn initialize_with<L: RuntimeLoader>(&self, loader: L) {
        if !self.config.enabled {
            info!("Runtime disabled by configuration; using in-memory path only");
            return;
        }
        let started = self.state.send_if_modified(|state| {
            if matches!(state, RuntimeState::Idle) {
                *state = RuntimeState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = %self.state(), "Runtime initialization already started");
            return;
        }

        info!("Loading runtime");
        let state = Arc::clone(&self.state);
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut runtime = match loader.load().await {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Runtime failed to load");
                    state.send_replace(RuntimeState::Failed(format!("{e:#}")));
                    return;
                }
            };

            state.send_replace(RuntimeState::Installing);
            for component in loader.components() {
                match loader.install(&mut runtime, &component).await {
                    Ok(()) => debug!(component = %component, "Installed runtime component"),
                    Err(e) => {
                        warn!(component = %component, error = %format!("{e:#}"), "Component install failed; skipping");
                    }
                }
            }

            *engine.lock().await = Some(runtime);
            state.send_replace(RuntimeState::Ready);
            info!("Runtime ready");
        });
    }

    /// Waits until the bridge is Ready or Failed. Returns the current state
    /// immediately when no load was ever started.
    pub async fn wait_settled(&self) -> RuntimeState {
        let mut rx = self.state.subscribe();
        if matches!(*rx.borrow(), RuntimeState::Idle) {
            return RuntimeState::Idle;
        }
        match rx.wait_for(RuntimeState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Runs `script` against the `df` binding on a blocking thread.
    pub async fn execute(&self, script: Script) -> Result<ScriptOutput> {
        if !self.is_ready() {
            return Err(EngineError::RuntimeUnavailable(format!(
                "runtime is {}",
                self.state()
            )));
        }
        let name = script.name();
        let rebinds = script.mutates() && !matches!(script, Script::Load { .. });
        let mut engine = Arc::clone(&self.engine).lock_owned().await;
        let output = tokio::task::spawn_blocking(move || {
            let runtime = engine.as_mut().ok_or_else(|| {
                EngineError::RuntimeUnavailable("runtime engine not loaded".to_owned())
            })?;
            runtime.run(script)
        })
        .await?;

        match &output {
            Ok(out) => debug!(script = name, output = out.kind(), "Script finished"),
            Err(e) => warn!(script = name, error = %e, "Script failed"),
        }
        // `df` is ahead of the store until the caller commits and marks it
        if rebinds && output.is_ok() {
            self.invalidate_mirror();
        }
        output
    }

    pub fn mirrored_generation(&self) -> Option<u64> {
        self.mirrored.lock().ok().and_then(|g| *g)
    }

    pub fn mark_mirrored(&self, generation: u64) {
        if let Ok(mut g) = self.mirrored.lock() {
            *g = Some(generation);
        }
    }

    pub fn invalidate_mirror(&self) {
        if let Ok(mut g) = self.mirrored.lock() {
            *g = None;
        }
    }

    /// Loads `table` into `df` unless the binding already mirrors
    /// `generation`.
    pub async fn sync_table(&self, table: &Table, generation: u64) -> Result<()> {
        if self.mirrored_generation() == Some(generation) {
            return Ok(());
        }
        self.execute(Script::Load {
            table: table.clone(),
        })
        .await?;
        self.mark_mirrored(generation);
        debug!(generation, "Runtime mirror synced");
        Ok(())
    }

    pub async fn sync(&self, store: &DatasetStore) -> Result<()> {
        self.sync_table(store.table(), store.generation()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    struct BrokenLoader;

    impl RuntimeLoader for BrokenLoader {
        async fn load(&self) -> anyhow::Result<PolarsRuntime> {
            anyhow::bail!("download interrupted")
        }

        async fn install(&self, _: &mut PolarsRuntime, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn components(&self) -> Vec<String> {
            Vec::new()
        }
    }

    struct FlakyInstall;

    impl RuntimeLoader for FlakyInstall {
        async fn load(&self) -> anyhow::Result<PolarsRuntime> {
            Ok(PolarsRuntime::new())
        }

        async fn install(&self, _: &mut PolarsRuntime, component: &str) -> anyhow::Result<()> {
            anyhow::bail!("no wheel for {component}")
        }

        fn components(&self) -> Vec<String> {
            vec!["scikit".to_owned()]
        }
    }

    fn enabled() -> RuntimeConfig {
        RuntimeConfig {
            enabled: true,
            components: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_reaches_ready() -> Result<()> {
        let bridge = RuntimeBridge::new(enabled());
        assert_eq!(bridge.state(), RuntimeState::Idle);
        bridge.initialize();
        bridge.initialize();
        assert_eq!(bridge.wait_settled().await, RuntimeState::Ready);
        let out = bridge.execute(Script::Describe).await?;
        assert_eq!(out.kind(), "summary");
        Ok(())
    }

    #[tokio::test]
    async fn test_load_failure_is_terminal() {
        let bridge = RuntimeBridge::new(enabled());
        bridge.initialize_with(BrokenLoader);
        let state = bridge.wait_settled().await;
        assert!(matches!(state, RuntimeState::Failed(ref r) if r.contains("download interrupted")));
        bridge.initialize();
        assert!(!bridge.is_ready());
        let err = bridge.execute(Script::Describe).await;
        assert!(matches!(err, Err(EngineError::RuntimeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_install_failure_still_ready() {
        let bridge = RuntimeBridge::new(enabled());
        bridge.initialize_with(FlakyInstall);
        assert_eq!(bridge.wait_settled().await, RuntimeState::Ready);
    }

    #[tokio::test]
    async fn test_disabled_stays_idle() {
        let bridge = RuntimeBridge::new(RuntimeConfig {
            enabled: false,
            components: Vec::new(),
        });
        bridge.initialize();
        assert_eq!(bridge.wait_settled().await, RuntimeState::Idle);
    }

    #[tokio::test]
    async fn test_sync_tracks_generation() -> Result<()> {
        let bridge = RuntimeBridge::new(enabled());
        bridge.initialize();
        bridge.wait_settled().await;

        let mut store = DatasetStore::new();
        store.replace(Table::from_rows(
            vec!["a".to_owned()],
            vec![vec![Value::from(1.0)]],
        )?);
        bridge.sync(&store).await?;
        assert_eq!(bridge.mirrored_generation(), Some(store.generation()));

        bridge.invalidate_mirror();
        assert_eq!(bridge.mirrored_generation(), None);
        Ok(())
    }
}
