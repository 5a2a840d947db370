//! Win32 program scan over the uninstall registry keys
//!
//! Four views are walked: HKLM and HKCU, each through the native and the
//! 32-bit registry view. Entries without a display name are skipped, as are
//! system components. Duplicate product codes keep the first-seen entry
//! (user scope is scanned first and wins).

#[cfg(windows)]
use super::{InstallScope, InstalledProgram, ProgramKind};
#[cfg(windows)]
use std::collections::HashSet;
#[cfg(windows)]
use tracing::{debug, warn};

#[cfg(windows)]
const UNINSTALL_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

/// Scan all four uninstall views
#[cfg(windows)]
pub fn scan_registry_programs() -> Vec<InstalledProgram> {
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY};
    use winreg::RegKey;

    let mut programs = Vec::new();
    let mut seen = HashSet::new();

    let views = [
        (HKEY_CURRENT_USER, KEY_WOW64_64KEY, InstallScope::User),
        (HKEY_CURRENT_USER, KEY_WOW64_32KEY, InstallScope::User),
        (HKEY_LOCAL_MACHINE, KEY_WOW64_64KEY, InstallScope::Machine),
        (HKEY_LOCAL_MACHINE, KEY_WOW64_32KEY, InstallScope::Machine),
    ];

    for (hive, view_flag, scope) in views {
        let root = RegKey::predef(hive);
        let key = match root.open_subkey_with_flags(UNINSTALL_KEY, KEY_READ | view_flag) {
            Ok(key) => key,
            Err(e) => {
                debug!("uninstall view not readable: {e}");
                continue;
            }
        };
        if let Err(e) = scan_uninstall_key(&key, scope, &mut programs, &mut seen) {
            warn!("failed to scan uninstall view: {e}");
        }
    }

    programs
}

#[cfg(windows)]
fn scan_uninstall_key(
    key: &winreg::RegKey,
    scope: InstallScope,
    programs: &mut Vec<InstalledProgram>,
    seen: &mut HashSet<String>,
) -> std::io::Result<()> {
    for subkey_name in key.enum_keys().filter_map(|k| k.ok()) {
        let Ok(subkey) = key.open_subkey(&subkey_name) else {
            continue;
        };

        let Ok(display_name) = subkey.get_value::<String, _>("DisplayName") else {
            continue;
        };
        if display_name.trim().is_empty() {
            continue;
        }
        // System components are not user-facing programs.
        if subkey
            .get_value::<u32, _>("SystemComponent")
            .map(|v| v == 1)
            .unwrap_or(false)
        {
            continue;
        }
        if !seen.insert(subkey_name.clone()) {
            continue;
        }

        programs.push(InstalledProgram {
            name: display_name,
            kind: ProgramKind::Win32,
            publisher: subkey.get_value("Publisher").unwrap_or_default(),
            version: subkey.get_value("DisplayVersion").unwrap_or_default(),
            architecture: None,
            package_name: None,
            product_code: subkey_name,
            scope,
        });
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn scan_registry_programs() -> Vec<super::InstalledProgram> {
    Vec::new()
}
