//! WinGet manifest fetcher and installer selection
//!
//! Version resolution is content-addressed: the catalog row's hash names
//! the CDN directory (`packages/<id>/<hash8>/versionData.mszyml`), the
//! decompressed version data maps a version to a relative manifest path,
//! and the manifest itself is plain YAML.
//!
//! Installer selection evaluates a fixed predicate chain over the
//! installer records: scope, then architecture, then installer type (MSI
//! and WiX outrank the rest for the same architecture), then locale.

use crate::error::{Result, ToolkitError};
use crate::http::{expect_success, MsHttpClient};
use crate::platform::{detect_locale, prefer_locale};
use crate::winget::catalog::WingetCatalog;
use crate::winget::mszip::decode_mszyml;
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Requested installation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallerScope {
    #[default]
    Machine,
    User,
}

impl InstallerScope {
    fn as_str(self) -> &'static str {
        match self {
            InstallerScope::Machine => "machine",
            InstallerScope::User => "user",
        }
    }
}

impl FromStr for InstallerScope {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "machine" => Ok(InstallerScope::Machine),
            "user" => Ok(InstallerScope::User),
            other => Err(ToolkitError::Decode(format!("unknown scope: {other}"))),
        }
    }
}

impl fmt::Display for InstallerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default silent switches per installer type
pub fn default_silent_switches(installer_type: &str) -> &'static str {
    match installer_type.to_ascii_lowercase().as_str() {
        "msi" | "wix" => "/quiet /norestart",
        "inno" => "/SP- /VERYSILENT /NORESTART",
        "nullsoft" => "/S",
        _ => "",
    }
}

/// Result of installer selection over a manifest
#[derive(Debug, Clone)]
pub struct SelectedInstaller {
    /// Candidate set that survived the predicate chain
    pub installers: Vec<Value>,
    pub installer_type: String,
    pub nested_installer_type: Option<String>,
    pub nested_installer_files: Option<Value>,
    pub silent: String,
    pub url: String,
    pub scope: InstallerScope,
    /// Full manifest the selection was made from
    pub manifest: Value,
}

/// Fetches manifests through the catalog's content-addressed CDN layout
pub struct WingetManifestFetcher<'a> {
    http: &'a MsHttpClient,
    catalog: &'a WingetCatalog,
}

impl<'a> WingetManifestFetcher<'a> {
    pub fn new(http: &'a MsHttpClient, catalog: &'a WingetCatalog) -> Self {
        Self { http, catalog }
    }

    /// Fetch the manifest for a package version (latest when omitted)
    ///
    /// The returned document carries the decoded version data under the
    /// extra `VersionData` key.
    pub fn get_manifest(&self, package_id: &str, version: Option<&str>) -> Result<Value> {
        let row = self.catalog.package_by_id(package_id)?;
        let hash = row.hash.as_deref().ok_or_else(|| {
            ToolkitError::Decode(format!("catalog row for {package_id} has no hash"))
        })?;
        if hash.len() < 4 {
            return Err(ToolkitError::Decode(format!(
                "catalog hash for {package_id} is shorter than 4 bytes"
            )));
        }
        let hash8: String = hash[..4].iter().map(|b| format!("{b:02x}")).collect();
        let wanted_version = version
            .map(str::to_string)
            .or_else(|| {
                if row.latest_version.is_empty() {
                    None
                } else {
                    Some(row.latest_version.clone())
                }
            })
            .ok_or_else(|| {
                ToolkitError::NotFound(format!("{package_id} has no latest_version"))
            })?;

        let version_data_url = format!(
            "{}/packages/{}/{hash8}/versionData.mszyml",
            self.catalog.source_url(),
            row.id
        );
        debug!(%version_data_url, "fetching version data");
        let response = expect_success(self.http.get_json(&version_data_url)?)?;
        let compressed = response.bytes().map_err(ToolkitError::from)?;
        let version_data_text = decode_mszyml(&compressed)?;
        let version_data: Value = serde_yaml::from_str(&version_data_text)?;

        let relative_path = resolve_relative_path(&version_data, &wanted_version)
            .ok_or_else(|| {
                ToolkitError::NotFound(format!(
                    "version {wanted_version} of {package_id} not in version data"
                ))
            })?;

        let manifest_url = format!("{}/{relative_path}", self.catalog.source_url());
        info!(%manifest_url, "fetching manifest");
        let response = expect_success(self.http.get_json(&manifest_url)?)?;
        let manifest_text = response.text().map_err(ToolkitError::from)?;
        let mut manifest: Value = serde_yaml::from_str(&manifest_text)?;

        if let Value::Mapping(map) = &mut manifest {
            map.insert(Value::String("VersionData".to_string()), version_data);
        }
        Ok(manifest)
    }

    /// Fetch the manifest and select one installer for the given policy
    pub fn get_package_installer(
        &self,
        package_id: &str,
        architecture: &str,
        backup_architecture: Option<&str>,
        scope: InstallerScope,
    ) -> Result<SelectedInstaller> {
        let manifest = self.get_manifest(package_id, None)?;
        select_package_installer(&manifest, architecture, backup_architecture, scope)
    }
}

/// Find `vD[*].rP` where `vD[*].v == version`
fn resolve_relative_path(version_data: &Value, version: &str) -> Option<String> {
    version_data
        .get("vD")?
        .as_sequence()?
        .iter()
        .find(|entry| entry.get("v").and_then(Value::as_str) == Some(version))?
        .get("rP")?
        .as_str()
        .map(str::to_string)
}

/// Evaluate the scope → architecture → type → locale predicate chain
pub fn select_package_installer(
    manifest: &Value,
    architecture: &str,
    backup_architecture: Option<&str>,
    scope: InstallerScope,
) -> Result<SelectedInstaller> {
    let installers = manifest
        .get("Installers")
        .and_then(Value::as_sequence)
        .ok_or_else(|| ToolkitError::Decode("manifest has no Installers list".to_string()))?;

    // Scope: exact matches first, undeclared scope second, never the
    // opposite scope when a declared alternative exists.
    let scoped: Vec<&Value> = {
        let exact: Vec<&Value> = installers
            .iter()
            .filter(|i| installer_field(i, manifest, "Scope").eq_ignore_ascii_case(scope.as_str()))
            .collect();
        if !exact.is_empty() {
            exact
        } else {
            let undeclared: Vec<&Value> = installers
                .iter()
                .filter(|i| installer_field(i, manifest, "Scope").is_empty())
                .collect();
            if undeclared.is_empty() {
                installers.iter().collect()
            } else {
                undeclared
            }
        }
    };

    // Architecture: requested, then neutral, then the backup.
    let mut arch_candidates: Vec<String> = vec![architecture.to_string(), "neutral".to_string()];
    if let Some(backup) = backup_architecture {
        arch_candidates.push(backup.to_string());
    }
    let by_arch: Vec<&Value> = arch_candidates
        .iter()
        .map(|candidate| {
            scoped
                .iter()
                .copied()
                .filter(|i| {
                    installer_field(i, manifest, "Architecture").eq_ignore_ascii_case(candidate)
                })
                .collect::<Vec<&Value>>()
        })
        .find(|matches| !matches.is_empty())
        .ok_or_else(|| {
            ToolkitError::NotFound(format!("no installer for architecture {architecture}"))
        })?;

    // Type: an MSI-family installer wins over the alternatives.
    let typed: Vec<&Value> = {
        let msi_family: Vec<&Value> = by_arch
            .iter()
            .copied()
            .filter(|i| {
                let t = effective_type(i, manifest).to_ascii_lowercase();
                t == "msi" || t == "wix"
            })
            .collect();
        if msi_family.is_empty() {
            by_arch
        } else {
            msi_family
        }
    };

    // Locale: first preferred match, else the first candidate.
    let locale = detect_locale();
    let chosen = prefer_locale(
        &typed,
        |i| {
            i.get("InstallerLocale")
                .and_then(Value::as_str)
                .unwrap_or("")
        },
        &locale,
        true,
    )
    .copied()
    .or_else(|| typed.first().copied())
    .ok_or_else(|| ToolkitError::NotFound("empty installer candidate set".to_string()))?;

    let installer_type = effective_type(chosen, manifest);
    let nested_installer_type = non_empty(installer_field(chosen, manifest, "NestedInstallerType"));
    let nested_installer_files = chosen
        .get("NestedInstallerFiles")
        .or_else(|| manifest.get("NestedInstallerFiles"))
        .cloned();

    // Silent switches: explicit Silent, explicit Custom, type defaults.
    // For archives the nested type decides the defaults.
    let switch_type = if installer_type.eq_ignore_ascii_case("zip") {
        nested_installer_type
            .clone()
            .unwrap_or_else(|| installer_type.clone())
    } else {
        installer_type.clone()
    };
    let mut silent = switches_field(chosen, manifest, "Silent")
        .or_else(|| switches_field(chosen, manifest, "Custom"))
        .unwrap_or_else(|| default_silent_switches(&switch_type).to_string());

    // A machine-scope install passes /allusers unless the switches already
    // carry an allusers form.
    if scope == InstallerScope::Machine && !silent.to_ascii_lowercase().contains("allusers") {
        if silent.is_empty() {
            silent = "/allusers".to_string();
        } else {
            silent.push_str(" /allusers");
        }
    }

    Ok(SelectedInstaller {
        installers: typed.into_iter().cloned().collect(),
        installer_type,
        nested_installer_type,
        nested_installer_files,
        silent,
        url: chosen
            .get("InstallerUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        scope,
        manifest: manifest.clone(),
    })
}

/// Per-installer field with a manifest-level default
fn installer_field(installer: &Value, manifest: &Value, field: &str) -> String {
    installer
        .get(field)
        .or_else(|| manifest.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn effective_type(installer: &Value, manifest: &Value) -> String {
    installer_field(installer, manifest, "InstallerType")
}

fn switches_field(installer: &Value, manifest: &Value, key: &str) -> Option<String> {
    installer
        .get("InstallerSwitches")
        .or_else(|| manifest.get("InstallerSwitches"))
        .and_then(|switches| switches.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_default_switch_table() {
        assert_eq!(default_silent_switches("msi"), "/quiet /norestart");
        assert_eq!(default_silent_switches("WIX"), "/quiet /norestart");
        assert_eq!(default_silent_switches("inno"), "/SP- /VERYSILENT /NORESTART");
        assert_eq!(default_silent_switches("nullsoft"), "/S");
        assert_eq!(default_silent_switches("exe"), "");
        assert_eq!(default_silent_switches("portable"), "");
    }

    #[test]
    fn test_resolve_relative_path() {
        let version_data = manifest(
            "sV: 2\nvD:\n- v: 1.85.0\n  rP: packages/M/one.yaml\n- v: 1.84.2\n  rP: packages/M/two.yaml\n",
        );
        assert_eq!(
            resolve_relative_path(&version_data, "1.84.2").as_deref(),
            Some("packages/M/two.yaml")
        );
        assert!(resolve_relative_path(&version_data, "9.9.9").is_none());
    }

    #[test]
    fn test_msi_preferred_over_exe() {
        let doc = manifest(
            r#"
PackageIdentifier: Contoso.App
Installers:
- Architecture: x64
  InstallerType: exe
  InstallerUrl: http://example.com/a.exe
- Architecture: x64
  InstallerType: msi
  InstallerUrl: http://example.com/a.msi
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::User).unwrap();
        assert_eq!(selected.installer_type, "msi");
        assert_eq!(selected.url, "http://example.com/a.msi");
        assert_eq!(selected.silent, "/quiet /norestart");
    }

    #[test]
    fn test_neutral_architecture_fallback() {
        let doc = manifest(
            r#"
Installers:
- Architecture: neutral
  InstallerType: exe
  InstallerUrl: http://example.com/n.exe
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::User).unwrap();
        assert_eq!(selected.url, "http://example.com/n.exe");
    }

    #[test]
    fn test_backup_architecture_used_last() {
        let doc = manifest(
            r#"
Installers:
- Architecture: x86
  InstallerType: exe
  InstallerUrl: http://example.com/32.exe
"#,
        );
        assert!(select_package_installer(&doc, "x64", None, InstallerScope::User).is_err());
        let selected =
            select_package_installer(&doc, "x64", Some("x86"), InstallerScope::User).unwrap();
        assert_eq!(selected.url, "http://example.com/32.exe");
    }

    #[test]
    fn test_machine_scope_appends_allusers() {
        let doc = manifest(
            r#"
Installers:
- Architecture: x64
  InstallerType: inno
  Scope: machine
  InstallerUrl: http://example.com/setup.exe
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::Machine).unwrap();
        assert_eq!(selected.silent, "/SP- /VERYSILENT /NORESTART /allusers");
    }

    #[test]
    fn test_allusers_not_duplicated() {
        let doc = manifest(
            r#"
Installers:
- Architecture: x64
  InstallerType: msi
  Scope: machine
  InstallerSwitches:
    Silent: /quiet ALLUSERS=1
  InstallerUrl: http://example.com/setup.msi
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::Machine).unwrap();
        assert_eq!(selected.silent, "/quiet ALLUSERS=1");
    }

    #[test]
    fn test_scope_prefers_declared_match() {
        let doc = manifest(
            r#"
Installers:
- Architecture: x64
  InstallerType: exe
  Scope: user
  InstallerUrl: http://example.com/user.exe
- Architecture: x64
  InstallerType: exe
  Scope: machine
  InstallerUrl: http://example.com/machine.exe
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::User).unwrap();
        assert_eq!(selected.url, "http://example.com/user.exe");
    }

    #[test]
    fn test_zip_uses_nested_type_for_switches() {
        let doc = manifest(
            r#"
Installers:
- Architecture: x64
  InstallerType: zip
  NestedInstallerType: nullsoft
  NestedInstallerFiles:
  - RelativeFilePath: setup.exe
  InstallerUrl: http://example.com/a.zip
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::User).unwrap();
        assert_eq!(selected.installer_type, "zip");
        assert_eq!(selected.nested_installer_type.as_deref(), Some("nullsoft"));
        assert_eq!(selected.silent, "/S");
        assert!(selected.nested_installer_files.is_some());
    }

    #[test]
    fn test_manifest_level_installer_type_default() {
        let doc = manifest(
            r#"
InstallerType: inno
Installers:
- Architecture: x64
  InstallerUrl: http://example.com/setup.exe
"#,
        );
        let selected =
            select_package_installer(&doc, "x64", None, InstallerScope::User).unwrap();
        assert_eq!(selected.installer_type, "inno");
        assert_eq!(selected.silent, "/SP- /VERYSILENT /NORESTART");
    }
}
