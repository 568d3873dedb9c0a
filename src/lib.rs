//! # Tabwright - dual-path column cleaning for tabular data
//!
//! Tabwright holds one table per [`Session`] and applies column-level
//! cleaning to it: imputation, min-max normalisation, categorical encoding,
//! numeric coercion and column drops, with descriptive statistics refreshed
//! after every change.
//!
//! Each operation runs on one of two paths. The Polars runtime
//! ([`runtime`]) is slow to bring up and loads in the background; until it
//! is ready, and whenever it fails a read, the same operation runs on the
//! in-memory table instead.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tabwright::{EngineConfig, ImputeMethod, Session};
//!
//! # async fn example() -> tabwright::Result<()> {
//! let session = Session::new(EngineConfig::default());
//! session.start_runtime();
//! session.load_csv_text("age,city\n25,Oslo\n,Rome\n35,\n").await?;
//!
//! session.impute_column("age", ImputeMethod::Mean, None).await?;
//! session.normalize_column("age").await?;
//!
//! for column in session.describe().await?.iter() {
//!     println!("{}: {} missing", column.name, column.missing);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`table`]: values, tables and the generation-counted store
//! - [`describe`]: per-column statistics
//! - [`transform`]: in-memory column transformations and previews
//! - [`runtime`]: the Polars runtime and its lifecycle
//! - [`backend`]: the capability trait both paths implement
//! - [`snapshot`]: bounded snapshots for restore and undo
//! - [`persistence`]: delimited serialisation and blob stores
//! - [`session`]: orchestration, locking and error reporting
//! - [`config`], [`logging`], [`error`]: ambient plumbing

#![warn(clippy::all, rust_2018_idioms)]

pub mod backend;
pub mod config;
pub mod describe;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod table;
pub mod transform;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use session::{LastError, Outcome, Session};
pub use table::{Table, Value};
pub use transform::ImputeMethod;
