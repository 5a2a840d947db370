//! Microsoft Store delivery pipeline
//!
//! Two REST catalogs (DisplayCatalog for MSIX/AppX, PackageManifests for
//! Win32 Store apps) and the FE3 SOAP delivery service, orchestrated into a
//! unified per-product view with resolved download file names.

pub mod display_catalog;
pub mod fe3;
pub mod models;
pub mod package_manifests;
pub mod pipeline;

pub use display_catalog::{DisplayCatalogClient, DisplayCatalogEndpoint, DisplayCatalogResult};
pub use fe3::{parse_update_ids, Fe3Client, FileUrl, SyncUpdatesResponse};
pub use models::{
    AppKind, PackageMoniker, ProductId, ResolvedPackage, StoreDownloadInfo, UnifiedStoreApp,
    UpdateRecord, Win32InstallerInfo,
};
pub use package_manifests::{PackageManifestResult, PackageManifestsClient};
pub use pipeline::{PipelineOptions, StorePipeline};
