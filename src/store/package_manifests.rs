//! PackageManifests REST client (Win32 Store apps)
//!
//! The StoreEdgeFD endpoint serves a WinGet-shaped manifest for Win32 Store
//! products keyed by their "BigId". A 404 means the product does not exist
//! and is reported as a not-found result, not a transport error.

use crate::error::{Result, ToolkitError};
use crate::http::MsHttpClient;
use serde_json::Value;
use tracing::debug;

const PACKAGE_MANIFESTS_BASE: &str = "https://storeedgefd.dsx.mp.microsoft.com/v9.0/packageManifests";

/// Result of a PackageManifests query
#[derive(Debug, Clone)]
pub struct PackageManifestResult {
    pub document: Value,
    pub is_found: bool,
}

impl PackageManifestResult {
    /// `Data` payload of the response
    pub fn data(&self) -> Option<&Value> {
        self.document.get("Data")
    }

    /// The newest version entry (last of `Versions`)
    pub fn latest_version(&self) -> Option<&Value> {
        self.data()?.get("Versions")?.as_array()?.last()
    }

    /// All installer entries of the newest version
    pub fn installers(&self) -> Vec<&Value> {
        self.latest_version()
            .and_then(|version| version.get("Installers"))
            .and_then(Value::as_array)
            .map(|installers| installers.iter().collect())
            .unwrap_or_default()
    }

    /// A default-locale field of the newest version
    pub fn default_locale(&self, field: &str) -> Option<String> {
        self.latest_version()?
            .get("DefaultLocale")?
            .get(field)?
            .as_str()
            .map(str::to_string)
    }

    /// `PackageVersion` of the newest version entry
    pub fn package_version(&self) -> Option<String> {
        self.latest_version()?
            .get("PackageVersion")?
            .as_str()
            .map(str::to_string)
    }
}

/// Client for the PackageManifests endpoint
pub struct PackageManifestsClient<'a> {
    http: &'a MsHttpClient,
}

impl<'a> PackageManifestsClient<'a> {
    pub fn new(http: &'a MsHttpClient) -> Self {
        Self { http }
    }

    /// Query the manifest for a BigId, optionally scoped to a market
    pub fn query(&self, big_id: &str, market: Option<&str>) -> Result<PackageManifestResult> {
        let big_id = big_id.to_ascii_uppercase();
        let mut url = format!("{PACKAGE_MANIFESTS_BASE}/{big_id}");
        if let Some(market) = market {
            url.push_str(&format!("?Market={market}"));
        }
        debug!(%url, "querying PackageManifests");

        let response = self.http.get_json(&url)?;
        if response.status().as_u16() == 404 {
            return Ok(PackageManifestResult {
                document: Value::Null,
                is_found: false,
            });
        }
        if !response.status().is_success() {
            return Err(ToolkitError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let document: Value = response.json().map_err(ToolkitError::from)?;
        let is_found = document.get("Data").is_some_and(|data| !data.is_null());
        Ok(PackageManifestResult { document, is_found })
    }
}
