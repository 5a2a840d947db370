//! AppX package inventory via the WinRT `PackageManager`

#[cfg(windows)]
use super::{InstallScope, InstalledProgram, ProgramKind};
#[cfg(windows)]
use tracing::warn;

/// Enumerate installed AppX packages for the current user
///
/// Packages that fail metadata extraction are skipped with a warning so a
/// single broken registration cannot sink the whole inventory.
#[cfg(windows)]
pub fn scan_appx_packages() -> Vec<InstalledProgram> {
    use windows::Management::Deployment::PackageManager;

    let manager = match PackageManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            warn!("PackageManager unavailable: {e}");
            return Vec::new();
        }
    };
    let packages = match manager.FindPackages() {
        Ok(packages) => packages,
        Err(e) => {
            warn!("FindPackages failed: {e}");
            return Vec::new();
        }
    };

    let mut programs = Vec::new();
    for package in packages {
        match extract_package(&package) {
            Ok(program) => programs.push(program),
            Err(e) => warn!("skipping AppX package: {e}"),
        }
    }
    programs
}

#[cfg(windows)]
fn extract_package(
    package: &windows::ApplicationModel::Package,
) -> windows::core::Result<InstalledProgram> {
    use windows::System::ProcessorArchitecture;

    let id = package.Id()?;
    let version = id.Version()?;
    let raw_architecture = id.Architecture()?;
    let architecture = if raw_architecture == ProcessorArchitecture::X64 {
        "x64"
    } else if raw_architecture == ProcessorArchitecture::X86 {
        "x86"
    } else if raw_architecture == ProcessorArchitecture::Arm64 {
        "arm64"
    } else if raw_architecture == ProcessorArchitecture::Arm {
        "arm"
    } else if raw_architecture == ProcessorArchitecture::Neutral {
        "neutral"
    } else {
        "unknown"
    }
    .to_string();

    Ok(InstalledProgram {
        name: package
            .DisplayName()
            .map(|n| n.to_string())
            .unwrap_or_default(),
        kind: ProgramKind::Appx,
        publisher: package
            .PublisherDisplayName()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        version: format!(
            "{}.{}.{}.{}",
            version.Major, version.Minor, version.Build, version.Revision
        ),
        architecture: Some(architecture),
        package_name: Some(id.Name()?.to_string()),
        product_code: id.FamilyName()?.to_string(),
        scope: InstallScope::User,
    })
}

#[cfg(not(windows))]
pub fn scan_appx_packages() -> Vec<super::InstalledProgram> {
    Vec::new()
}
