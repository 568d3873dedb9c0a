//! The session: one dataset, its statistics, snapshots and history.
//!
//! Every operation picks a backend per call. When the runtime is ready the
//! work goes through [`RuntimeBackend`], otherwise through
//! [`FallbackBackend`]. Read-only operations retry on the in-memory path
//! when the runtime path fails; mutations report the failure and leave the
//! table as it was.
//!
//! Mutations hold the write lock for their whole duration. Tokio's lock is
//! fair, so racing writers apply one after another in arrival order.

use crate::backend::{FallbackBackend, RuntimeBackend, TableBackend as _};
use crate::config::{AuditEntry, AuditLog, EngineConfig};
use crate::describe::Summary;
use crate::error::{EngineError, ErrorKind, Result};
use crate::persistence::{BlobStore, FsBlobStore, MemoryBlobStore, PersistenceGateway};
use crate::runtime::frame::csv_to_table;
use crate::runtime::{RuntimeBridge, RuntimeLoader, RuntimeState, Script};
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::table::{DatasetStore, Record, Table, Value};
use crate::transform::{CoercionPreview, Encoding, ImputeMethod, ImputePreview, MissingRows};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The most recent failure, kept until cleared or replaced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// `{success, result, error}` shape for callers that want a value rather
/// than a `Result`.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self {
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug)]
struct SessionState {
    store: DatasetStore,
    summary: Option<Summary>,
    snapshots: SnapshotManager,
    audit: AuditLog,
}

pub struct Session<S = MemoryBlobStore> {
    config: EngineConfig,
    bridge: RuntimeBridge,
    persistence: PersistenceGateway<S>,
    state: RwLock<SessionState>,
    last_error: Mutex<Option<LastError>>,
}

/// Runs a read-only call on the current backend, retrying on the
/// in-memory path when the runtime path fails.
macro_rules! read_path {
    ($session:ident, $state:expr, $op:expr, |$b:ident| $call:expr) => {{
        let state = $state;
        let fallback = FallbackBackend::new(state.store.table(), $session.config.numeric_threshold);
        if $session.bridge.is_ready() {
            let $b = RuntimeBackend::new(&$session.bridge, &state.store);
            match $call.await {
                Err(err) if err.is_runtime() => {
                    warn!(operation = $op, error = %err, "Runtime path failed; using in-memory path");
                    $session.record_error(&err);
                    let $b = fallback;
                    $call.await
                }
                other => other,
            }
        } else {
            let $b = fallback;
            $call.await
        }
    }};
}

/// Runs a mutating call on the current backend. Yields the result and the
/// label of the backend that produced it.
macro_rules! write_path {
    ($session:ident, $state:expr, |$b:ident| $call:expr) => {{
        let state = $state;
        if $session.bridge.is_ready() {
            let $b = RuntimeBackend::new(&$session.bridge, &state.store);
            $call.await.map(|out| (out, $b.label()))
        } else {
            let $b = FallbackBackend::new(state.store.table(), $session.config.numeric_threshold);
            $call.await.map(|out| (out, $b.label()))
        }
    }};
}

impl Session<MemoryBlobStore> {
    /// A session that persists into memory.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, MemoryBlobStore::new())
    }
}

impl Session<FsBlobStore> {
    /// A session that persists under the configured data directory.
    pub fn with_fs_store(config: EngineConfig) -> Self {
        let store = FsBlobStore::from_config(&config.persistence);
        Self::with_store(config, store)
    }
}

impl<S: BlobStore> Session<S> {
    pub fn with_store(config: EngineConfig, store: S) -> Self {
        let bridge = RuntimeBridge::new(config.runtime.clone());
        let state = SessionState {
            store: DatasetStore::new(),
            summary: None,
            snapshots: SnapshotManager::new(config.snapshot.capacity),
            audit: AuditLog::new(),
        };
        Self {
            config,
            bridge,
            persistence: PersistenceGateway::new(store),
            state: RwLock::new(state),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeBridge {
        &self.bridge
    }

    pub fn runtime_state(&self) -> RuntimeState {
        self.bridge.state()
    }

    pub fn persistence(&self) -> &PersistenceGateway<S> {
        &self.persistence
    }

    /// Starts bringing the runtime up in the background.
    pub fn start_runtime(&self) {
        self.bridge.initialize();
    }

    pub fn start_runtime_with<L: RuntimeLoader>(&self, loader: L) {
        self.bridge.initialize_with(loader);
    }

    // ---- errors --------------------------------------------------------

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    pub fn clear_error(&self) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = None;
        }
    }

    fn record_error(&self, err: &EngineError) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(LastError {
                kind: err.kind(),
                message: err.to_string(),
                at: Utc::now(),
            });
        }
    }

    fn fail(&self, op: &str, err: EngineError) -> EngineError {
        warn!(operation = op, error = %err, "Operation failed");
        self.record_error(&err);
        err
    }

    // ---- loading -------------------------------------------------------

    /// Replaces the current dataset. Snapshots of the previous dataset are
    /// discarded. Returns the new generation.
    pub async fn load_table(&self, table: Table) -> u64 {
        let mut state = self.state.write().await;
        let details = format!("{} rows x {} columns", table.row_count(), table.column_count());
        let generation = state.store.replace(table);
        state.snapshots.clear();
        if self.bridge.is_ready()
            && let Err(e) = self.bridge.sync(&state.store).await
        {
            warn!(error = %e, "Could not mirror loaded table into runtime");
            self.record_error(&e);
        }
        state.audit.push("load_table", "memory", details);
        self.refresh_locked(&mut state).await;
        info!(generation, "Dataset loaded");
        generation
    }

    /// Parses CSV text (header row required), trims text cells and loads
    /// the result.
    pub async fn load_csv_text(&self, text: &str) -> Result<u64> {
        let table = csv_to_table(text).map_err(|e| self.fail("load_csv_text", e))?;
        Ok(self.load_table(table).await)
    }

    // ---- reads ---------------------------------------------------------

    pub async fn table(&self) -> Table {
        self.state.read().await.store.table().clone()
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.store.generation()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.store.is_loaded()
    }

    /// The statistics computed after the last load or mutation.
    pub async fn summary(&self) -> Option<Summary> {
        self.state.read().await.summary.clone()
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.entries().to_vec()
    }

    pub async fn describe(&self) -> Result<Summary> {
        let state = self.state.read().await;
        read_path!(self, &*state, "describe", |b| b.describe())
            .map_err(|e| self.fail("describe", e))
    }

    /// Recomputes and caches the statistics.
    pub async fn refresh_summary(&self) -> Result<Summary> {
        let mut state = self.state.write().await;
        let summary = read_path!(self, &*state, "refresh_summary", |b| b.describe())
            .map_err(|e| self.fail("refresh_summary", e))?;
        state.summary = Some(summary.clone());
        Ok(summary)
    }

    pub async fn head(&self, n: usize) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        read_path!(self, &*state, "head", |b| b.head(n)).map_err(|e| self.fail("head", e))
    }

    pub async fn preview_imputation(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<Value>,
    ) -> Result<ImputePreview> {
        let limit = self.config.preview.impute_rows;
        let state = self.state.read().await;
        read_path!(self, &*state, "preview_imputation", |b| b
            .preview_imputation(column, method, value.as_ref(), limit))
        .map_err(|e| self.fail("preview_imputation", e))
    }

    pub async fn preview_coerce_numeric(&self, column: &str) -> Result<CoercionPreview> {
        let samples = self.config.preview.coercion_samples;
        let state = self.state.read().await;
        read_path!(self, &*state, "preview_coerce_numeric", |b| b
            .preview_coerce_numeric(column, samples))
        .map_err(|e| self.fail("preview_coerce_numeric", e))
    }

    pub async fn missing_rows(&self, column: &str) -> Result<MissingRows> {
        let limit = self.config.preview.missing_rows;
        let state = self.state.read().await;
        read_path!(self, &*state, "missing_rows", |b| b.missing_rows(column, limit))
            .map_err(|e| self.fail("missing_rows", e))
    }

    // ---- mutations -----------------------------------------------------

    /// Removes `column`. Returns `false` when no such column exists.
    pub async fn drop_column(&self, column: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.store.table().column_index(column).is_none() {
            debug!(column, "Drop of unknown column ignored");
            return Ok(false);
        }
        let before = self.capture_before(&state, "drop_column");
        let (table, path) = write_path!(self, &*state, |b| b.drop_column(column))
            .map_err(|e| self.fail("drop_column", e))?;
        self.commit(&mut state, before, table, "drop_column", path, column.to_owned())
            .await;
        Ok(true)
    }

    pub async fn impute_column(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<Value>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let before = self.capture_before(&state, "impute_column");
        let (table, path) = write_path!(self, &*state, |b| b
            .impute_column(column, method, value.as_ref()))
        .map_err(|e| self.fail("impute_column", e))?;
        let details = match &value {
            Some(v) => format!("{column} ({method}: {v})"),
            None => format!("{column} ({method})"),
        };
        self.commit(&mut state, before, table, "impute_column", path, details)
            .await;
        Ok(())
    }

    pub async fn normalize_column(&self, column: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = self.capture_before(&state, "normalize_column");
        let (table, path) = write_path!(self, &*state, |b| b.normalize_column(column))
            .map_err(|e| self.fail("normalize_column", e))?;
        self.commit(&mut state, before, table, "normalize_column", path, column.to_owned())
            .await;
        Ok(())
    }

    pub async fn encode_column(&self, column: &str) -> Result<Encoding> {
        let mut state = self.state.write().await;
        let before = self.capture_before(&state, "encode_column");
        let ((table, encoding), path) = write_path!(self, &*state, |b| b.encode_column(column))
            .map_err(|e| self.fail("encode_column", e))?;
        let details = format!("{column} ({} categories)", encoding.categories.len());
        self.commit(&mut state, before, table, "encode_column", path, details)
            .await;
        Ok(encoding)
    }

    /// Encodes every non-numeric column.
    pub async fn encode_categoricals(&self) -> Result<Vec<Encoding>> {
        let mut state = self.state.write().await;
        let before = self.capture_before(&state, "encode_categoricals");
        let ((table, encodings), path) = write_path!(self, &*state, |b| b.encode_categoricals())
            .map_err(|e| self.fail("encode_categoricals", e))?;
        let details = encodings
            .iter()
            .map(|e| e.column.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.commit(&mut state, before, table, "encode_categoricals", path, details)
            .await;
        Ok(encodings)
    }

    pub async fn coerce_column_to_numeric(&self, column: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = self.capture_before(&state, "coerce_column_to_numeric");
        let (table, path) = write_path!(self, &*state, |b| b.coerce_column_to_numeric(column))
            .map_err(|e| self.fail("coerce_column_to_numeric", e))?;
        self.commit(
            &mut state,
            before,
            table,
            "coerce_column_to_numeric",
            path,
            column.to_owned(),
        )
        .await;
        Ok(())
    }

    fn capture_before(&self, state: &SessionState, op: &str) -> Option<Snapshot> {
        (self.config.snapshot.auto_capture && state.store.is_loaded())
            .then(|| Snapshot::capture(state.store.table(), format!("before {op}")))
    }

    async fn commit(
        &self,
        state: &mut SessionState,
        before: Option<Snapshot>,
        table: Table,
        op: &str,
        path: &str,
        details: String,
    ) {
        if let Some(snapshot) = before {
            state.snapshots.push(snapshot);
        }
        let generation = state.store.replace(table);
        if path == "runtime" {
            self.bridge.mark_mirrored(generation);
        }
        state.audit.push(op, path, details);
        debug!(operation = op, path, generation, "Committed");
        if self.config.refresh_summary_after_mutation {
            self.refresh_locked(state).await;
        }
    }

    async fn refresh_locked(&self, state: &mut SessionState) {
        let summary = read_path!(self, &*state, "describe", |b| b.describe());
        state.summary = match summary {
            Ok(summary) => Some(summary),
            Err(e) => {
                self.fail("refresh_summary", e);
                None
            }
        };
    }

    // ---- snapshots -----------------------------------------------------

    pub async fn create_snapshot(&self, label: &str) -> Snapshot {
        let mut state = self.state.write().await;
        let snapshot = Snapshot::capture(state.store.table(), label);
        state.snapshots.push(snapshot.clone());
        info!(id = %snapshot.id, label, "Snapshot created");
        snapshot
    }

    pub async fn latest_snapshot(&self) -> Option<Snapshot> {
        self.state.read().await.snapshots.latest().cloned()
    }

    /// Replaces the table with `snapshot`. Returns `false` when the runtime
    /// could not take the snapshot, in which case nothing changes.
    pub async fn restore_snapshot(&self, snapshot: &Snapshot) -> bool {
        let mut state = self.state.write().await;
        self.restore_locked(&mut state, snapshot).await
    }

    /// Restores and drops the most recent snapshot.
    pub async fn undo(&self) -> bool {
        let mut state = self.state.write().await;
        let Some(snapshot) = state.snapshots.pop_latest() else {
            debug!("Nothing to undo");
            return false;
        };
        if self.restore_locked(&mut state, &snapshot).await {
            true
        } else {
            state.snapshots.push(snapshot);
            false
        }
    }

    async fn restore_locked(&self, state: &mut SessionState, snapshot: &Snapshot) -> bool {
        let mirrored = if self.bridge.is_ready() {
            let load = Script::Load {
                table: snapshot.table().clone(),
            };
            if let Err(e) = self.bridge.execute(load).await {
                self.fail("restore_snapshot", e);
                return false;
            }
            true
        } else {
            false
        };
        let generation = state.store.replace(snapshot.table().clone());
        if mirrored {
            self.bridge.mark_mirrored(generation);
        } else {
            self.bridge.invalidate_mirror();
        }
        let path = if mirrored { "runtime" } else { "memory" };
        state
            .audit
            .push("restore_snapshot", path, snapshot.label.clone());
        info!(id = %snapshot.id, generation, "Snapshot restored");
        self.refresh_locked(state).await;
        true
    }

    // ---- persistence ---------------------------------------------------

    /// Serialises the current table, through the runtime when it is ready,
    /// and stores it under `key`.
    pub async fn save(&self, key: &str) -> Result<()> {
        let state = self.state.read().await;
        let bytes = read_path!(self, &*state, "save", |b| b.to_delimited())
            .map_err(|e| self.fail("save", e))?;
        drop(state);
        self.persistence
            .save_bytes(key, bytes)
            .await
            .map_err(|e| self.fail("save", e))?;
        info!(key, "Dataset saved");
        Ok(())
    }

    pub async fn load_saved(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.persistence
            .load(key)
            .await
            .map_err(|e| self.fail("load_saved", e))
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("runtime", &self.bridge.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used, reason = "tests")]
    use super::*;
    use crate::config::RuntimeConfig;

    fn fallback_only() -> EngineConfig {
        EngineConfig {
            runtime: RuntimeConfig {
                enabled: false,
                components: Vec::new(),
            },
            ..EngineConfig::default()
        }
    }

    fn ages() -> Table {
        Table::from_rows(
            vec!["age".to_owned()],
            [Some(25.0), None, Some(30.0), None, Some(35.0)]
                .into_iter()
                .map(|v| vec![Value::from(v)])
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_mutation_refreshes_summary() -> Result<()> {
        let session = Session::new(fallback_only());
        session.load_table(ages()).await;
        assert_eq!(session.summary().await.unwrap().get("age").unwrap().missing, 2);

        session.impute_column("age", ImputeMethod::Mean, None).await?;
        let summary = session.summary().await.unwrap();
        assert_eq!(summary.get("age").unwrap().missing, 0);
        assert_eq!(session.audit_log().await.last().unwrap().path, "memory");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_mutation_records_error_and_keeps_table() {
        let session = Session::new(fallback_only());
        session.load_table(ages()).await;
        let generation = session.generation().await;

        let err = session
            .impute_column("age", ImputeMethod::Constant, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert_eq!(session.generation().await, generation);
        assert_eq!(session.last_error().unwrap().kind, ErrorKind::InvalidArgument);

        session.clear_error();
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_drop_unknown_column_is_false() -> Result<()> {
        let session = Session::new(fallback_only());
        session.load_table(ages()).await;
        assert!(!session.drop_column("height").await?);
        assert!(session.drop_column("age").await?);
        assert!(session.table().await.columns().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_undo_restores_previous_table() -> Result<()> {
        let session = Session::new(fallback_only());
        session.load_table(ages()).await;
        session.normalize_column("age").await?;
        assert_ne!(session.table().await, ages());
        assert!(session.undo().await);
        assert_eq!(session.table().await, ages());
        assert!(!session.undo().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_outcome_shape() {
        let ok: Outcome<u8> = Outcome::from(Ok(1));
        assert!(ok.success);
        let failed: Outcome<u8> =
            Outcome::from(Err(EngineError::ColumnNotFound("x".to_owned())));
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains('x'));
    }
}
