//! Application context: the process-wide shared services
//!
//! Every piece of shared mutable state lives behind this handle: the
//! correlation vector (mutex-guarded so header values stay strictly
//! monotonic), the HTTP client bound to it, the device-token provider, an
//! optional default WinGet catalog, and the memoized installed-programs
//! inventory. Hosts create one context and thread it through; a second
//! context would fork the CV sequence.

use crate::auth::DeviceTokenProvider;
use crate::error::Result;
use crate::http::{CorrelationVector, MsHttpClient};
use crate::installed::{scan_installed_programs, InstalledProgram};
use crate::winget::WingetCatalog;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, OnceLock};

/// Shared service container
pub struct AppContext {
    cv: Arc<Mutex<CorrelationVector>>,
    http: MsHttpClient,
    tokens: DeviceTokenProvider,
    winget_catalog: RwLock<Option<Arc<WingetCatalog>>>,
    installed: OnceLock<Vec<InstalledProgram>>,
}

impl AppContext {
    /// Create the context with a fresh correlation vector
    pub fn new() -> Result<Self> {
        let cv = Arc::new(Mutex::new(CorrelationVector::new()));
        let http = MsHttpClient::new(Arc::clone(&cv))?;
        Ok(Self {
            cv,
            http,
            tokens: DeviceTokenProvider::new(),
            winget_catalog: RwLock::new(None),
            installed: OnceLock::new(),
        })
    }

    /// The shared HTTP client
    pub fn http(&self) -> &MsHttpClient {
        &self.http
    }

    /// The device-token provider
    pub fn tokens(&self) -> &DeviceTokenProvider {
        &self.tokens
    }

    /// Current correlation vector value (diagnostics only)
    pub fn current_cv(&self) -> String {
        self.cv.lock().value()
    }

    /// Install a catalog as the process-wide default
    pub fn set_winget_catalog(&self, catalog: Arc<WingetCatalog>) {
        *self.winget_catalog.write() = Some(catalog);
    }

    /// The default catalog, when one has been opened
    pub fn winget_catalog(&self) -> Option<Arc<WingetCatalog>> {
        self.winget_catalog.read().clone()
    }

    /// Installed programs, scanned once per process
    pub fn installed_programs(&self) -> &[InstalledProgram] {
        self.installed
            .get_or_init(|| scan_installed_programs(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cv_sequence_is_shared() {
        let context = AppContext::new().unwrap();
        let first = context.current_cv();
        // The client advances the same vector the context reports.
        let second = context.current_cv();
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_catalog_round_trip() {
        let context = AppContext::new().unwrap();
        assert!(context.winget_catalog().is_none());

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE manifest (x INT);")
            .unwrap();
        let catalog =
            WingetCatalog::open_existing(&db_path, crate::winget::DEFAULT_SOURCE_URL).unwrap();
        context.set_winget_catalog(Arc::new(catalog));
        assert!(context.winget_catalog().is_some());
    }
}
