//! Data model for the Store delivery pipeline
//!
//! Package monikers follow the grammar
//! `<Name>_<Version>_<Arch>(__|_~_)<PublisherId>` with a 3- or 4-part
//! dotted numeric version. The parser accepts exactly the same strings as
//! the three historical patterns, tried in order: 4-part `__`, 3-part
//! `__`, 4-part `_~_`.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Extensions tried, in order, when resolving a download GUID to a name
pub const APPX_EXTENSIONS: [&str; 6] = [
    ".msixbundle",
    ".appxbundle",
    ".msix",
    ".appx",
    ".emsix",
    ".eappx",
];

/// File extensions a SyncUpdates `<File>` node may carry
pub const FE3_FILE_EXTENSIONS: [&str; 7] = [
    "appx",
    "msix",
    "msixbundle",
    "appxbundle",
    "eappx",
    "emsix",
    "cab",
];

/// Store product classification derived from the product-id length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AppKind {
    /// Modern packaged app served through DisplayCatalog + FE3
    MsixAppx,
    /// Win32 Store app served through PackageManifests
    Win32,
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppKind::MsixAppx => write!(f, "MSIX/AppX"),
            AppKind::Win32 => write!(f, "Win32"),
        }
    }
}

/// A validated, upper-cased Store product identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductId {
    id: String,
    kind: AppKind,
}

impl ProductId {
    /// Validate and classify: 12 alphanumerics → MSIX/AppX, 14+ → Win32
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() < 12 || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(crate::error::ToolkitError::NotFound(format!(
                "not a Store product id: {trimmed}"
            )));
        }
        let id = trimmed.to_ascii_uppercase();
        let kind = match id.len() {
            12 => AppKind::MsixAppx,
            n if n >= 14 => AppKind::Win32,
            _ => {
                return Err(crate::error::ToolkitError::NotFound(format!(
                    "no Store id class has length {}: {id}",
                    id.len()
                )))
            }
        };
        Ok(Self { id, kind })
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AppKind {
        self.kind
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// One update entry assembled from a SyncUpdates response
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateRecord {
    pub update_id: String,
    pub revision_id: i32,
    pub is_framework: bool,
    pub package_rank: i32,
    pub package_moniker: Option<String>,
    pub file_guid_with_ext: Option<String>,
    pub installer_specific_identifier: Option<String>,
    pub size: Option<i64>,
}

impl UpdateRecord {
    /// Default rank when the response omits `PackageRank`
    pub const DEFAULT_PACKAGE_RANK: i32 = 100;
}

/// Parsed `<Name>_<Version>_<Arch>(__|_~_)<PublisherId>` moniker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMoniker {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub publisher_id: String,
}

impl PackageMoniker {
    /// Parse a moniker, trying the three grammar regimes in order
    pub fn parse(moniker: &str) -> Option<Self> {
        parse_moniker_form(moniker, 4, "__")
            .or_else(|| parse_moniker_form(moniker, 3, "__"))
            .or_else(|| parse_moniker_form(moniker, 4, "_~_"))
    }
}

/// Match one grammar regime with leftmost (lazy) name boundary
fn parse_moniker_form(moniker: &str, version_parts: usize, separator: &str) -> Option<PackageMoniker> {
    for (idx, ch) in moniker.char_indices() {
        if ch != '_' || idx == 0 {
            continue;
        }
        let rest = &moniker[idx + 1..];
        let Some(version_end) = rest.find('_') else {
            continue;
        };
        let version = &rest[..version_end];
        if !is_dotted_numeric(version, version_parts) {
            continue;
        }
        let after_version = &rest[version_end + 1..];
        let Some(arch_end) = after_version.find('_') else {
            continue;
        };
        let architecture = &after_version[..arch_end];
        if architecture.is_empty() {
            continue;
        }
        // after_version[arch_end] is the first '_' of the separator.
        let tail = &after_version[arch_end..];
        let Some(publisher) = tail.strip_prefix(separator) else {
            continue;
        };
        if publisher.is_empty() {
            continue;
        }
        return Some(PackageMoniker {
            name: moniker[..idx].to_string(),
            version: version.to_string(),
            architecture: architecture.to_string(),
            publisher_id: publisher.to_string(),
        });
    }
    None
}

/// `\d+(\.\d+){parts-1}` with an exact part count
fn is_dotted_numeric(value: &str, parts: usize) -> bool {
    let segments: Vec<&str> = value.split('.').collect();
    segments.len() == parts
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
}

/// A download URL resolved to a concrete installable package
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPackage {
    pub update_id: String,
    pub package_moniker: Option<String>,
    pub package_name: String,
    pub version: String,
    pub architecture: String,
    pub publisher_id: String,
    pub file_name: String,
    pub size: Option<i64>,
    pub url: String,
    pub is_main_package: bool,
    pub package_rank: i32,
    pub installed: bool,
}

/// MSIX/AppX download set
#[derive(Debug, Clone, Serialize)]
pub struct StoreDownloadInfo {
    pub packages: Vec<ResolvedPackage>,
    /// Sum of known package sizes (unknown sizes count as zero)
    pub total_size: i64,
}

/// Selected Win32 Store installer
#[derive(Debug, Clone, Serialize)]
pub struct Win32InstallerInfo {
    pub url: String,
    pub sha256: String,
    pub silent_switches: String,
    pub installer_type: String,
    pub architecture: String,
    pub locale: String,
    pub scope: String,
}

/// Unified view of one Store product
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedStoreApp {
    pub product_id: String,
    pub app_type: AppKind,
    pub display_name: String,
    pub publisher: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub release_date: String,
    pub is_free: bool,
    pub price: String,
    pub download: Option<StoreDownloadInfo>,
    pub installer: Option<Win32InstallerInfo>,
    /// Raw PackageManifests document for callers that need the full record
    pub manifest: Option<serde_json::Value>,
}

/// Compare two versions as dotted numerics
///
/// Both must be fully numeric; missing trailing components count as zero.
/// Returns `None` when either side is not dotted numeric, letting callers
/// fall back to string ordering.
pub fn compare_dotted_versions(a: &str, b: &str) -> Option<Ordering> {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.split('.').map(|part| part.parse::<u64>().ok()).collect()
    };
    let left = parse(a)?;
    let right = parse(b)?;
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

/// `installed >= required` under dotted-numeric comparison
pub fn version_at_least(installed: &str, required: &str) -> bool {
    match compare_dotted_versions(installed, required) {
        Some(Ordering::Less) => false,
        Some(_) => true,
        None => installed == required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_classification() {
        let msix = ProductId::parse("9nksqgp7f2nh").unwrap();
        assert_eq!(msix.kind(), AppKind::MsixAppx);
        assert_eq!(msix.as_str(), "9NKSQGP7F2NH");

        let win32 = ProductId::parse("XPFM306TS4PHH5").unwrap();
        assert_eq!(win32.kind(), AppKind::Win32);

        assert!(ProductId::parse("short").is_err());
        assert!(ProductId::parse("exactly13chr0").is_err());
        assert!(ProductId::parse("has-punctuation!").is_err());
    }

    #[test]
    fn test_moniker_four_part() {
        let parsed =
            PackageMoniker::parse("Microsoft.WindowsCalculator_10.2103.8.0_x64__8wekyb3d8bbwe")
                .unwrap();
        assert_eq!(parsed.name, "Microsoft.WindowsCalculator");
        assert_eq!(parsed.version, "10.2103.8.0");
        assert_eq!(parsed.architecture, "x64");
        assert_eq!(parsed.publisher_id, "8wekyb3d8bbwe");
    }

    #[test]
    fn test_moniker_three_part() {
        let parsed = PackageMoniker::parse("Contoso.App_1.2.3_neutral__abcdefghijklm").unwrap();
        assert_eq!(parsed.version, "1.2.3");
        assert_eq!(parsed.architecture, "neutral");
    }

    #[test]
    fn test_moniker_tilde_separator() {
        let parsed =
            PackageMoniker::parse("Contoso.App_1.2.3.4_arm64_~_abcdefghijklm").unwrap();
        assert_eq!(parsed.architecture, "arm64");
        assert_eq!(parsed.publisher_id, "abcdefghijklm");
    }

    #[test]
    fn test_moniker_name_may_contain_underscores() {
        let parsed = PackageMoniker::parse("Weird_Name_2.0.0.1_x86__publisher").unwrap();
        assert_eq!(parsed.name, "Weird_Name");
        assert_eq!(parsed.version, "2.0.0.1");
    }

    #[test]
    fn test_moniker_rejects_malformed() {
        assert!(PackageMoniker::parse("NoVersionHere__x64__pub").is_none());
        assert!(PackageMoniker::parse("App_1.2_x64__pub").is_none());
        assert!(PackageMoniker::parse("App_1.2.3.4_x64_pub").is_none());
        assert!(PackageMoniker::parse("").is_none());
    }

    #[test]
    fn test_four_part_preferred_over_three_part() {
        // 1.2.3.4 parses under the 4-part regime, so the name boundary sits
        // before the full version rather than the 3-part prefix.
        let parsed = PackageMoniker::parse("App_1.2.3.4_x64__pub").unwrap();
        assert_eq!(parsed.version, "1.2.3.4");
    }

    #[test]
    fn test_compare_dotted_versions() {
        assert_eq!(
            compare_dotted_versions("1.2.3.4", "1.2.3.5"),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_dotted_versions("10.0.0.0", "9.9.9.9"),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_dotted_versions("1.2", "1.2.0.0"),
            Some(Ordering::Equal)
        );
        assert_eq!(compare_dotted_versions("1.2.beta", "1.2"), None);
    }

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("2.0.0.0", "1.9.9.9"));
        assert!(version_at_least("1.0", "1.0.0.0"));
        assert!(!version_at_least("1.0.0.0", "1.0.0.1"));
    }
}
