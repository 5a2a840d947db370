//! WinGet offline catalog and manifest pipeline
//!
//! Independent of the Store pipeline: downloads the public source archive,
//! opens the SQLite index it contains, and resolves package manifests
//! through the content-addressed `versionData.mszyml` stream, all without
//! the WinGet CLI.

pub mod catalog;
pub mod manifest;
pub mod mszip;

pub use catalog::{
    CatalogOptions, ColumnInfo, PackageFilter, PackageRow, WingetCatalog, DEFAULT_SOURCE_URL,
};
pub use manifest::{
    default_silent_switches, select_package_installer, InstallerScope, SelectedInstaller,
    WingetManifestFetcher,
};
pub use mszip::decode_mszyml;
