//! Durable storage of serialised tables.
//!
//! Tables are written as comma-delimited text with a header row. Where they
//! go is a [`BlobStore`]: an in-memory map for tests and embedding, or a
//! directory of files keyed by the hex-encoded blob key. Keys too long to
//! hex-encode within a file name are stored under their SHA-256 digest.

use crate::config::PersistenceConfig;
use crate::error::{EngineError, Result, ResultExt as _};
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

pub const DEFAULT_DELIMITER: u8 = b',';
const SCHEMA_FILE: &str = "schema.json";
/// Longest hex stem kept verbatim; leaves room for the extension and the
/// `.tmp` sibling under a 255-byte file name limit.
const MAX_HEX_STEM: usize = 240;

/// Keyed byte storage.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, blob: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        self.blobs.write().await.insert(key.to_owned(), blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaMarker {
    version: u32,
}

/// One directory per namespace under `root`, opened on first use.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    namespace: String,
    schema_version: u32,
    dir: OnceCell<PathBuf>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>, schema_version: u32) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            schema_version,
            dir: OnceCell::new(),
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(
            config.data_dir(),
            config.namespace.clone(),
            config.schema_version,
        )
    }

    /// Namespace directory; created with a schema marker on first open.
    async fn open(&self) -> Result<&Path> {
        let dir = self
            .dir
            .get_or_try_init(|| async {
                let dir = self.root.join(&self.namespace);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("creating store directory {}", dir.display()))?;
                let marker = dir.join(SCHEMA_FILE);
                match tokio::fs::read(&marker).await {
                    Ok(bytes) => {
                        let found: SchemaMarker = serde_json::from_slice(&bytes).map_err(|e| {
                            EngineError::Persistence(format!("unreadable schema marker: {e}"))
                        })?;
                        if found.version != self.schema_version {
                            return Err(EngineError::Persistence(format!(
                                "store schema version {} does not match expected {}",
                                found.version, self.schema_version
                            )));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        let marker_json = serde_json::to_vec(&SchemaMarker {
                            version: self.schema_version,
                        })?;
                        tokio::fs::write(&marker, marker_json)
                            .await
                            .context("writing schema marker")?;
                    }
                    Err(e) => return Err(e).context("reading schema marker"),
                }
                info!(dir = %dir.display(), version = self.schema_version, "Opened blob store");
                Ok::<_, EngineError>(dir)
            })
            .await?;
        Ok(dir.as_path())
    }

    fn blob_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.blob", file_stem(key)))
    }
}

impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        let dir = self.open().await?;
        let path = Self::blob_path(dir, key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &blob)
            .await
            .with_context(|| format!("writing blob '{key}'"))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("committing blob '{key}'"))?;
        debug!(key, bytes = blob.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let dir = self.open().await?;
        match tokio::fs::read(Self::blob_path(dir, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading blob '{key}'")),
        }
    }
}

fn hex_key(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Hex of the key, or `sha256-<digest>` when that would be too long. The
/// prefix is not hex, so the two forms never collide.
fn file_stem(key: &str) -> String {
    let hex = hex_key(key);
    if hex.len() <= MAX_HEX_STEM {
        return hex;
    }
    let digest = Sha256::digest(key.as_bytes());
    format!("sha256-{digest:x}")
}

fn push_field(out: &mut String, field: &str, delimiter: char) {
    if field.contains([delimiter, '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Delimited text with a header row. Null renders as an empty field.
pub fn to_delimited(table: &Table, delimiter: u8) -> Vec<u8> {
    let delimiter = char::from(delimiter);
    let mut out = String::new();
    let mut push_row = |fields: &mut dyn Iterator<Item = String>| {
        for (i, field) in fields.enumerate() {
            if i > 0 {
                out.push(delimiter);
            }
            push_field(&mut out, &field, delimiter);
        }
        out.push('\n');
    };
    push_row(&mut table.columns().iter().cloned());
    for row in table.rows() {
        push_row(&mut row.iter().map(Value::to_string));
    }
    out.into_bytes()
}

pub struct PersistenceGateway<S> {
    store: S,
    delimiter: u8,
}

impl<S: BlobStore> PersistenceGateway<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            delimiter: DEFAULT_DELIMITER,
        }
    }

    /// Serialises with the in-crate writer and stores under `key`.
    pub async fn save(&self, key: &str, table: &Table) -> Result<()> {
        self.save_bytes(key, to_delimited(table, self.delimiter))
            .await
    }

    /// Stores already-serialised table text.
    pub async fn save_bytes(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument(
                "persistence key must not be empty".to_owned(),
            ));
        }
        self.store.put(key, bytes).await
    }

    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }
}

impl<S> std::fmt::Debug for PersistenceGateway<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("delimiter", &char::from(self.delimiter))
            .finish_non_exhaustive()
    }
}
