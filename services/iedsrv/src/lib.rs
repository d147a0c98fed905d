//! IEC 61850 Data-Model Server (`iedsrv`)
//!
//! Serves a frozen IEC 61850 data model to concurrent client sessions:
//! FC-aware reads and writes under per-FC access policies, data-set
//! subscriptions with change, update, integrity and interrogation reports,
//! and a scoped model lock for batched application updates.
//!
//! # Example
//!
//! ```no_run
//! use iedsrv::{battery, IedServer, ServerConfig};
//!
//! # async fn run() -> errors::IedResult<()> {
//! let server = IedServer::new(battery::build_model()?, ServerConfig::default())?;
//! server.start(102).await?;
//!
//! {
//!     let mut model = server.lock_model();
//!     model.update_value(battery::VOLTAGE_VALUE, 12.5_f32)?;
//! }
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod battery;
pub mod client;
pub mod config;
pub mod protocol;
pub mod report;
pub mod server;
pub mod session;

pub use access::AccessController;
pub use client::IedConnection;
pub use config::{AccessPolicy, ServerConfig, DEFAULT_PORT};
pub use report::{
    DataSet, DataSetMember, ReasonCode, Report, ReportEntry, ReportTriggers, SubscriptionHandle,
};
pub use server::{AttributeHandle, AttributeLookup, IedServer, ModelGuard, SessionInfo};
pub use session::{Session, SessionState};
