//! `mstoolkit` - Offline-capable Microsoft application management toolkit
//!
//! Three subsystems do the real work:
//!
//! - **Store delivery pipeline** (`store`): the DisplayCatalog and
//!   PackageManifests REST catalogs plus the FE3 SOAP delivery service,
//!   resolved into a unified per-product view with real package file
//!   names, dependency enumeration, architecture/locale filtering, and a
//!   minimal deduplicated install set.
//! - **WinGet offline catalog** (`winget`): downloads the public source
//!   archive (a ZIP-renamed MSIX containing a SQLite index), queries it
//!   without the WinGet CLI, and resolves manifests through the chunked
//!   MSZIP `versionData.mszyml` stream.
//! - **MSI database editor** (`msi`): transactional read/update access to
//!   Windows Installer Property/Binary/`_Streams` tables and the Summary
//!   Information stream.
//!
//! Supporting services: a Microsoft Correlation Vector and the
//! header-injecting HTTP client (`http`), MSA device-token acquisition
//! (`auth`), architecture/locale policies (`platform`), and the installed-
//! program inventory (`installed`). Shared mutable state lives in one
//! [`AppContext`] so the CV ordering guarantee holds process-wide.
//!
//! # Example
//!
//! ```no_run
//! use mstoolkit::context::AppContext;
//! use mstoolkit::store::{PipelineOptions, StorePipeline};
//!
//! # fn main() -> mstoolkit::error::Result<()> {
//! let context = AppContext::new()?;
//! let pipeline = StorePipeline::new(
//!     context.http(),
//!     context.tokens(),
//!     context.installed_programs(),
//! );
//! let app = pipeline.get_unified_store_app_info("9NKSQGP7F2NH", &PipelineOptions::default())?;
//! println!("{} ({})", app.display_name, app.app_type);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod context;
pub mod error;
pub mod http;
pub mod installed;
pub mod msi;
pub mod platform;
pub mod store;
pub mod utils;
pub mod winget;

pub use context::AppContext;
pub use error::{Result, ToolkitError};
