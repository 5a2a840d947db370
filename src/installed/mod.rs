//! Installed-program inventory (registry + AppX)
//!
//! Scans the four uninstall registry views (machine/user × native/32-bit)
//! and, optionally, the AppX package inventory. The Store pipeline uses the
//! result to label already-installed dependencies; the scan is memoized per
//! process by the application context.

mod appx;
mod registry;

pub use appx::scan_appx_packages;
pub use registry::scan_registry_programs;

use serde::Serialize;

/// Where a program is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallScope {
    Machine,
    User,
}

/// How a program was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgramKind {
    Win32,
    Appx,
}

/// One installed program, from either inventory source
#[derive(Debug, Clone, Serialize)]
pub struct InstalledProgram {
    /// Display name (Win32) or package display name (AppX)
    pub name: String,
    pub kind: ProgramKind,
    pub publisher: String,
    pub version: String,
    /// AppX only: package architecture
    pub architecture: Option<String>,
    /// AppX only: package identity name used for dependency matching
    pub package_name: Option<String>,
    /// Uninstall key name (GUID-shaped for MSI products) or family name
    pub product_code: String,
    pub scope: InstallScope,
}

/// Scan everything: registry programs plus (optionally) AppX packages
pub fn scan_installed_programs(include_appx: bool) -> Vec<InstalledProgram> {
    let mut programs = scan_registry_programs();
    if include_appx {
        programs.extend(scan_appx_packages());
    }
    programs
}
