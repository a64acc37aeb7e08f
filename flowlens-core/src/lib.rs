//! flowlens-core: attribution pipeline library
//!
//! This crate provides the stages of a flowlens run:
//!
//! - **Configuration** - [`Config`] resolved once from the environment and [`ConfigLoader`] TOML layers
//! - **Attribution** - [`AttributionClient`] with lazy, restartable [`RecordPages`]
//! - **Enrichment** - [`Summarizer`] turning records into a model-written digest
//! - **Warehouse** - the [`Warehouse`] trait with BigQuery, SQLite and in-memory backends
//! - **Notification** - the [`Notifier`] trait and [`TelegramNotifier`]
//! - **Orchestration** - [`Pipeline`] and its [`RunReport`]
//!
//! # Quick Start
//!
//! ```no_run
//! use flowlens_core::{Config, ConfigLoader, Pipeline, RunRequest};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConfigLoader::load()?;
//!     let config = Config::from_env(&settings)?;
//!
//!     let pipeline = Pipeline::from_config(&config, false)?;
//!     let report = pipeline.run(RunRequest::default()).await?;
//!     println!("wrote {} rows", report.rows_written);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │   fetch   │──▶│  enrich  │──▶│  persist  │──▶│  notify  │
//! │ (fatal)   │   │ (best    │   │ (fatal)   │   │ (best    │
//! │           │   │  effort) │   │           │   │  effort) │
//! └───────────┘   └──────────┘   └───────────┘   └──────────┘
//!                                                      │
//!                                          RunState advanced
//! ```

pub mod attribution;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod record;
pub mod state;
pub mod warehouse;
pub mod window;

// Re-export key types for convenience
pub use attribution::{AttributionClient, AttributionSource, RecordPage, RecordPages, RetryPolicy};
pub use config::{Config, ConfigLoader, EnvSource, ProcessEnv, Settings, WindowPolicy};
pub use enrichment::Summarizer;
pub use error::{
    ConfigError, EnrichmentError, FetchError, InvalidWindow, NotificationError, PipelineError,
    StorageError,
};
pub use notify::{ConsoleNotifier, NotificationMessage, Notifier, TelegramNotifier};
pub use pipeline::{Pipeline, PipelineState, RunReport, RunRequest, Stage, StageOutcome};
pub use record::{AddressAttribution, AttributionRecord, OfacStatus};
pub use state::{FileStateStore, MemoryStateStore, RunState, StateStore};
pub use warehouse::{MemoryWarehouse, Warehouse, WarehouseTarget};
pub use window::QueryWindow;
