//! Store pipeline: unified app view over DisplayCatalog, PackageManifests,
//! and the FE3 delivery service
//!
//! One invocation is a linear sequence of HTTP calls; the pure resolution
//! steps (GUID joining, moniker parsing, dedup, architecture and version
//! filtering, installed labeling) are free functions so they can be driven
//! without a network.

use crate::auth::{DeviceTokenProvider, TokenOptions};
use crate::error::{Result, ToolkitError};
use crate::http::MsHttpClient;
use crate::installed::{InstalledProgram, ProgramKind};
use crate::platform::{
    detect_architecture, detect_locale, prefer_architecture, prefer_locale, ArchSelection,
    ArchitecturePreference,
};
use crate::store::display_catalog::{DisplayCatalogClient, DisplayCatalogEndpoint};
use crate::store::fe3::{parse_update_ids, Fe3Client, FileUrl, SyncUpdatesResponse};
use crate::store::models::{
    compare_dotted_versions, version_at_least, AppKind, PackageMoniker, ProductId,
    ResolvedPackage, StoreDownloadInfo, UnifiedStoreApp, UpdateRecord, Win32InstallerInfo,
    APPX_EXTENSIONS,
};
use crate::store::package_manifests::{PackageManifestResult, PackageManifestsClient};
use crate::winget::manifest::default_silent_switches;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for one pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub market: String,
    pub language: String,
    pub architecture: ArchSelection,
    pub latest_versions_only: bool,
    pub endpoint: DisplayCatalogEndpoint,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            market: "US".to_string(),
            language: "en".to_string(),
            architecture: ArchSelection::Autodetect,
            latest_versions_only: true,
            endpoint: DisplayCatalogEndpoint::Production,
        }
    }
}

/// Orchestrates the Store clients into a unified app view
pub struct StorePipeline<'a> {
    http: &'a MsHttpClient,
    tokens: &'a DeviceTokenProvider,
    inventory: &'a [InstalledProgram],
}

impl<'a> StorePipeline<'a> {
    pub fn new(
        http: &'a MsHttpClient,
        tokens: &'a DeviceTokenProvider,
        inventory: &'a [InstalledProgram],
    ) -> Self {
        Self {
            http,
            tokens,
            inventory,
        }
    }

    /// Resolve a product id into the unified view
    ///
    /// Either a complete [`UnifiedStoreApp`] is returned or a single named
    /// error; partial views are never emitted.
    pub fn get_unified_store_app_info(
        &self,
        raw_product_id: &str,
        options: &PipelineOptions,
    ) -> Result<UnifiedStoreApp> {
        let product_id = ProductId::parse(raw_product_id)?;
        info!(product_id = %product_id, kind = %product_id.kind(), "resolving Store product");

        match product_id.kind() {
            AppKind::MsixAppx => self.resolve_msix(product_id.as_str(), None, options),
            AppKind::Win32 => self.resolve_big_id(&product_id, options),
        }
    }

    /// BigId path: fetch the package manifest, then branch on installer type
    fn resolve_big_id(
        &self,
        product_id: &ProductId,
        options: &PipelineOptions,
    ) -> Result<UnifiedStoreApp> {
        let manifests = PackageManifestsClient::new(self.http);
        let manifest = manifests.query(product_id.as_str(), Some(&options.market))?;
        if !manifest.is_found {
            return Err(ToolkitError::NotFound(format!(
                "product {product_id} has no package manifest"
            )));
        }

        let installers: Vec<Value> = manifest.installers().into_iter().cloned().collect();
        let is_msstore = installers.iter().any(|installer| {
            installer
                .get("InstallerType")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("msstore"))
        });

        if is_msstore {
            // The manifest names the 12-character Store identifier the
            // delivery pipeline needs.
            let store_id = installers
                .iter()
                .find_map(|installer| {
                    installer
                        .get("MSStoreProductIdentifier")
                        .and_then(Value::as_str)
                })
                .ok_or_else(|| {
                    ToolkitError::Decode(
                        "msstore installer without MSStoreProductIdentifier".to_string(),
                    )
                })?
                .to_string();
            return self.resolve_msix(&store_id, Some(&manifest), options);
        }

        self.resolve_win32(product_id, &manifest, &installers, options)
    }

    /// Win32 path: pick one installer by architecture, then locale
    fn resolve_win32(
        &self,
        product_id: &ProductId,
        manifest: &PackageManifestResult,
        installers: &[Value],
        options: &PipelineOptions,
    ) -> Result<UnifiedStoreApp> {
        let chosen = select_installer(installers, &options.architecture)
            .ok_or_else(|| {
                ToolkitError::NotFound(format!(
                    "no installer matches architecture {}",
                    options.architecture
                ))
            })?;

        let installer_type = text_field(chosen, "InstallerType");
        let silent = chosen
            .get("InstallerSwitches")
            .and_then(|s| s.get("Silent"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                chosen
                    .get("InstallerSwitches")
                    .and_then(|s| s.get("Custom"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| default_silent_switches(&installer_type).to_string());

        let installer = Win32InstallerInfo {
            url: text_field(chosen, "InstallerUrl"),
            sha256: text_field(chosen, "InstallerSha256"),
            silent_switches: silent,
            installer_type,
            architecture: text_field(chosen, "Architecture"),
            locale: text_field(chosen, "InstallerLocale"),
            scope: text_field(chosen, "Scope"),
        };

        Ok(UnifiedStoreApp {
            product_id: product_id.as_str().to_string(),
            app_type: AppKind::Win32,
            display_name: manifest.default_locale("PackageName").unwrap_or_default(),
            publisher: manifest.default_locale("Publisher").unwrap_or_default(),
            description: manifest
                .default_locale("ShortDescription")
                .or_else(|| manifest.default_locale("Description"))
                .unwrap_or_default(),
            category: String::new(),
            version: manifest.package_version().unwrap_or_default(),
            release_date: String::new(),
            is_free: true,
            price: String::new(),
            download: None,
            installer: Some(installer),
            manifest: Some(manifest.document.clone()),
        })
    }

    /// MSIX path: DisplayCatalog → FE3 three-step flow → resolution
    fn resolve_msix(
        &self,
        store_id: &str,
        big_id_manifest: Option<&PackageManifestResult>,
        options: &PipelineOptions,
    ) -> Result<UnifiedStoreApp> {
        let catalog = DisplayCatalogClient::new(self.http, options.endpoint);
        let listing = catalog.query(store_id, &options.market, &options.language)?;
        if !listing.is_found {
            return Err(ToolkitError::NotFound(format!(
                "product {store_id} not in DisplayCatalog"
            )));
        }
        let wu_category_id = listing.wu_category_id().ok_or_else(|| {
            ToolkitError::Decode("listing carries no WuCategoryId".to_string())
        })?;
        debug!(%wu_category_id, "resolved update stream");

        let token = self.tokens.get(TokenOptions::default());
        let fe3 = Fe3Client::new(self.http);
        let sync_xml = fe3.sync_updates(&wu_category_id, &token)?;
        let sync = parse_update_ids(&sync_xml)?;
        if sync.update_ids.is_empty() {
            return Err(ToolkitError::NotFound(format!(
                "no updates offered for {store_id}"
            )));
        }

        let urls = fe3.get_file_urls(&sync.update_ids, &sync.revision_ids, &token)?;
        let packages = resolve_packages(&urls, &sync);
        let packages = dedup_packages(packages);
        let packages = filter_packages_by_architecture(
            packages,
            &options.architecture,
            &detect_architecture(),
        );
        let packages = if options.latest_versions_only {
            keep_latest_versions(packages)
        } else {
            packages
        };
        let packages = label_installed(packages, self.inventory);
        let total_size = packages.iter().filter_map(|p| p.size).sum();

        let price = listing.price_msrp();
        Ok(UnifiedStoreApp {
            product_id: store_id.to_string(),
            app_type: AppKind::MsixAppx,
            display_name: listing.localized("ProductTitle").unwrap_or_default(),
            publisher: listing.localized("PublisherName").unwrap_or_default(),
            description: listing.localized("ProductDescription").unwrap_or_default(),
            category: listing.category().unwrap_or_default(),
            version: packages
                .iter()
                .find(|p| p.is_main_package)
                .map(|p| p.version.clone())
                .unwrap_or_default(),
            release_date: listing.release_date().unwrap_or_default(),
            is_free: price.map_or(true, |msrp| msrp == 0.0),
            price: price
                .filter(|msrp| *msrp > 0.0)
                .map(|msrp| format!("{msrp:.2}"))
                .unwrap_or_default(),
            download: Some(StoreDownloadInfo {
                packages,
                total_size,
            }),
            installer: None,
            manifest: big_id_manifest.map(|m| m.document.clone()),
        })
    }

    /// Stream each resolved package to `target_dir` under its file name
    pub fn download_packages(
        &self,
        packages: &[ResolvedPackage],
        target_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(target_dir)?;
        let mut paths = Vec::new();
        for package in packages {
            let target = target_dir.join(&package.file_name);
            info!(file = %package.file_name, "downloading package");
            self.http.download_to_file(&package.url, &target)?;
            paths.push(target);
        }
        Ok(paths)
    }
}

/// Select a Win32 installer by architecture policy, then locale preference
fn select_installer<'v>(installers: &'v [Value], selection: &ArchSelection) -> Option<&'v Value> {
    let by_arch: Vec<&Value> = match selection {
        ArchSelection::All => installers.iter().collect(),
        ArchSelection::Autodetect => {
            let preference = detect_architecture();
            prefer_architecture(
                installers,
                |installer| {
                    installer
                        .get("Architecture")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                },
                &preference,
            )
        }
        ArchSelection::Exact(arch) => installers
            .iter()
            .filter(|installer| {
                installer
                    .get("Architecture")
                    .and_then(Value::as_str)
                    .is_some_and(|a| a.eq_ignore_ascii_case(arch))
            })
            .collect(),
    };
    if by_arch.is_empty() {
        return None;
    }

    let locale = detect_locale();
    prefer_locale(
        &by_arch,
        |installer| {
            installer
                .get("InstallerLocale")
                .and_then(Value::as_str)
                .unwrap_or("")
        },
        &locale,
        true,
    )
    .copied()
    .or_else(|| by_arch.first().copied())
}

fn text_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// GUID from a download URL: last path segment, extension dropped
fn url_basename_guid(url: &str) -> String {
    let no_query = url.split(['?', '#']).next().unwrap_or(url);
    let base = no_query.rsplit('/').next().unwrap_or(no_query);
    base.split('.').next().unwrap_or(base).to_string()
}

/// Join download URLs against the FE3 side-tables
pub fn resolve_packages(urls: &[FileUrl], sync: &SyncUpdatesResponse) -> Vec<ResolvedPackage> {
    let mut packages = Vec::new();
    for file_url in urls {
        let guid = url_basename_guid(&file_url.url);
        let record = sync.updates.get(&file_url.update_id);

        // Try the map with each AppX extension in order; an unmapped GUID
        // keeps its own name with the plain .appx extension.
        let mut file_name = None;
        let mut moniker_name = None;
        for ext in APPX_EXTENSIONS {
            if let Some(name) = sync.file_names.get(&format!("{guid}{ext}")) {
                file_name = Some(format!("{name}{ext}"));
                moniker_name = Some(name.clone());
                break;
            }
        }
        let file_name = file_name.unwrap_or_else(|| format!("{guid}.appx"));

        let package_moniker = moniker_name
            .or_else(|| record.and_then(|r| r.package_moniker.clone()));
        let parsed = package_moniker.as_deref().and_then(PackageMoniker::parse);

        let (package_rank, is_framework, size) = record
            .map(|r| (r.package_rank, r.is_framework, r.size))
            .unwrap_or((UpdateRecord::DEFAULT_PACKAGE_RANK, false, None));

        packages.push(ResolvedPackage {
            update_id: file_url.update_id.clone(),
            package_name: parsed
                .as_ref()
                .map(|m| m.name.clone())
                .or_else(|| package_moniker.clone())
                .unwrap_or_else(|| guid.clone()),
            version: parsed.as_ref().map(|m| m.version.clone()).unwrap_or_default(),
            architecture: parsed
                .as_ref()
                .map(|m| m.architecture.clone())
                .unwrap_or_else(|| "neutral".to_string()),
            publisher_id: parsed
                .as_ref()
                .map(|m| m.publisher_id.clone())
                .unwrap_or_default(),
            package_moniker,
            file_name,
            size,
            url: file_url.url.clone(),
            is_main_package: !is_framework && package_rank > 100,
            package_rank,
            installed: false,
        });
    }
    packages
}

/// Keep the first package per unique file name
pub fn dedup_packages(packages: Vec<ResolvedPackage>) -> Vec<ResolvedPackage> {
    let mut seen = std::collections::HashSet::new();
    packages
        .into_iter()
        .filter(|package| seen.insert(package.file_name.clone()))
        .collect()
}

/// Group by package name preserving first-seen order
fn group_by_name(packages: Vec<ResolvedPackage>) -> Vec<(String, Vec<ResolvedPackage>)> {
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<ResolvedPackage>> = HashMap::new();
    for package in packages {
        let key = package.package_name.clone();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(package);
    }
    order
        .into_iter()
        .map(|key| {
            let group = groups.remove(&key).unwrap_or_default();
            (key, group)
        })
        .collect()
}

/// Architecture filter applied independently per package name
pub fn filter_packages_by_architecture(
    packages: Vec<ResolvedPackage>,
    selection: &ArchSelection,
    preference: &ArchitecturePreference,
) -> Vec<ResolvedPackage> {
    let mut kept = Vec::new();
    for (_, group) in group_by_name(packages) {
        match selection {
            ArchSelection::All => kept.extend(group),
            ArchSelection::Autodetect => {
                let chosen: Vec<ResolvedPackage> =
                    prefer_architecture(&group, |p| p.architecture.as_str(), preference)
                        .into_iter()
                        .cloned()
                        .collect();
                kept.extend(chosen);
            }
            ArchSelection::Exact(arch) => {
                kept.extend(
                    group
                        .into_iter()
                        .filter(|p| p.architecture.eq_ignore_ascii_case(arch)),
                );
            }
        }
    }
    kept
}

/// Keep the greatest version per package name
///
/// Dotted-numeric comparison first, string order when either side is not
/// numeric, first-seen when everything ties.
pub fn keep_latest_versions(packages: Vec<ResolvedPackage>) -> Vec<ResolvedPackage> {
    let mut kept = Vec::new();
    for (_, group) in group_by_name(packages) {
        let mut best: Option<ResolvedPackage> = None;
        for candidate in group {
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    let newer = match compare_dotted_versions(&candidate.version, &current.version)
                    {
                        Some(ordering) => ordering == std::cmp::Ordering::Greater,
                        None => candidate.version > current.version,
                    };
                    if newer {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        kept.extend(best);
    }
    kept
}

/// Mark packages already present in the AppX inventory
///
/// A package counts as installed when an inventory entry shares its package
/// name and architecture and carries an equal or newer version.
pub fn label_installed(
    mut packages: Vec<ResolvedPackage>,
    inventory: &[InstalledProgram],
) -> Vec<ResolvedPackage> {
    for package in &mut packages {
        package.installed = inventory.iter().any(|entry| {
            entry.kind == ProgramKind::Appx
                && entry
                    .package_name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(&package.package_name))
                && entry
                    .architecture
                    .as_deref()
                    .is_some_and(|arch| arch.eq_ignore_ascii_case(&package.architecture))
                && version_at_least(&entry.version, &package.version)
        });
    }
    packages
}
