//! WinGet source catalog: download, extract, and query `index.db`
//!
//! The public source is a ZIP archive renamed `source2.msix` with a SQLite
//! database inside. After extraction the database is opened read-only;
//! multiple readers are safe and nothing writes to it afterwards.

use crate::error::{Result, ToolkitError};
use crate::http::MsHttpClient;
use crate::utils::paths;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Public WinGet CDN source base used when the CLI is not around to ask
pub const DEFAULT_SOURCE_URL: &str = "https://cdn.winget.microsoft.com/cache";

/// Archive name appended to a source base URL
const SOURCE_ARCHIVE_NAME: &str = "source2.msix";

/// Options for opening a catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Source base URL; resolved from the WinGet CLI, then the default
    pub source_url: Option<String>,
    /// Extraction directory; a fresh scratch directory when omitted
    pub output_dir: Option<PathBuf>,
    /// Keep the downloaded archive next to the extracted database
    pub keep_archive: bool,
}

/// One row of the `packages` table
#[derive(Debug, Clone, Serialize)]
pub struct PackageRow {
    pub rowid: i64,
    pub id: String,
    pub name: String,
    pub moniker: String,
    pub latest_version: String,
    /// Content hash; the first four bytes name the manifest CDN directory
    #[serde(skip)]
    pub hash: Option<Vec<u8>>,
}

/// Column description from `PRAGMA table_info`
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub column_type: String,
    pub notnull: bool,
    pub primary_key: bool,
}

/// Lookup selector for [`WingetCatalog::get_packages`]
#[derive(Debug, Clone)]
pub enum PackageFilter {
    Name(String),
    Id(String),
    Publisher(String),
    RowId(i64),
}

/// An opened, extracted WinGet catalog
pub struct WingetCatalog {
    connection: Mutex<Connection>,
    database_path: PathBuf,
    extract_path: PathBuf,
    source_url: String,
    download_date: SystemTime,
    database_size_mb: f64,
}

impl WingetCatalog {
    /// Download and open the catalog
    pub fn open(http: &MsHttpClient, options: &CatalogOptions) -> Result<Self> {
        let source_url = options
            .source_url
            .clone()
            .or_else(winget_cli_source_url)
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

        let archive_url = if source_url.ends_with("msix") {
            source_url.clone()
        } else {
            format!("{}/{SOURCE_ARCHIVE_NAME}", source_url.trim_end_matches('/'))
        };

        let extract_path = options
            .output_dir
            .clone()
            .unwrap_or_else(|| paths::scratch_dir("winget"));
        std::fs::create_dir_all(&extract_path)?;

        let archive_path = extract_path.join(SOURCE_ARCHIVE_NAME);
        info!(%archive_url, "downloading WinGet source archive");
        http.download_to_file(&archive_url, &archive_path)?;

        extract_archive(&archive_path, &extract_path)?;
        if !options.keep_archive {
            std::fs::remove_file(&archive_path).ok();
        }

        let database_path = locate_database(&extract_path)?;
        let base_url = source_url
            .trim_end_matches(SOURCE_ARCHIVE_NAME)
            .trim_end_matches('/')
            .to_string();
        Self::open_database(database_path, extract_path, base_url)
    }

    /// Open an already-extracted database directly
    pub fn open_existing(database_path: impl Into<PathBuf>, source_url: &str) -> Result<Self> {
        let database_path = database_path.into();
        let extract_path = database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::open_database(database_path, extract_path, source_url.to_string())
    }

    fn open_database(
        database_path: PathBuf,
        extract_path: PathBuf,
        source_url: String,
    ) -> Result<Self> {
        let size_bytes = std::fs::metadata(&database_path).map(|m| m.len()).unwrap_or(0);
        let connection = Connection::open_with_flags(
            &database_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(db = %database_path.display(), "WinGet catalog opened");
        Ok(Self {
            connection: Mutex::new(connection),
            database_path,
            extract_path,
            source_url,
            download_date: SystemTime::now(),
            database_size_mb: size_bytes as f64 / (1024.0 * 1024.0),
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn extract_path(&self) -> &Path {
        &self.extract_path
    }

    /// Source base URL, without the archive name
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn download_date(&self) -> SystemTime {
        self.download_date
    }

    pub fn database_size_mb(&self) -> f64 {
        self.database_size_mb
    }

    /// Select package rows by name, id, publisher, or rowid
    ///
    /// Matching is `LIKE`, so a bare value is a case-insensitive exact
    /// match and the caller adds `%` wildcards for substring searches.
    pub fn get_packages(&self, filter: &PackageFilter, limit: u32) -> Result<Vec<PackageRow>> {
        let connection = self.connection.lock();

        let (sql, key): (&str, &dyn rusqlite::ToSql) = match filter {
            PackageFilter::Name(name) => (
                "SELECT rowid, id, name, moniker, latest_version, hash \
                 FROM packages WHERE name LIKE ?1 LIMIT ?2",
                name,
            ),
            PackageFilter::Id(id) => (
                "SELECT rowid, id, name, moniker, latest_version, hash \
                 FROM packages WHERE id LIKE ?1 LIMIT ?2",
                id,
            ),
            PackageFilter::Publisher(publisher) => (
                "SELECT p.rowid, p.id, p.name, p.moniker, p.latest_version, p.hash \
                 FROM packages p JOIN norm_publishers2 n ON n.package = p.rowid \
                 WHERE n.norm_publisher LIKE ?1 LIMIT ?2",
                publisher,
            ),
            PackageFilter::RowId(rowid) => (
                "SELECT rowid, id, name, moniker, latest_version, hash \
                 FROM packages WHERE rowid = ?1 LIMIT ?2",
                rowid,
            ),
        };

        let mut statement = connection.prepare(sql)?;
        let rows = statement
            .query_map(params![key, limit], row_to_package)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = rows.len(), "package lookup");
        Ok(rows)
    }

    /// Substring search across name, id, and moniker
    pub fn search_packages(
        &self,
        term: &str,
        include_publisher: bool,
        limit: u32,
    ) -> Result<Vec<PackageRow>> {
        let pattern = format!("%{term}%");
        let connection = self.connection.lock();
        let mut statement = if include_publisher {
            connection.prepare(
                "SELECT DISTINCT p.rowid, p.id, p.name, p.moniker, p.latest_version, p.hash \
                 FROM packages p LEFT JOIN norm_publishers2 n ON n.package = p.rowid \
                 WHERE p.name LIKE ?1 OR p.id LIKE ?1 OR p.moniker LIKE ?1 \
                    OR n.norm_publisher LIKE ?1 \
                 LIMIT ?2",
            )?
        } else {
            connection.prepare(
                "SELECT rowid, id, name, moniker, latest_version, hash \
                 FROM packages \
                 WHERE name LIKE ?1 OR id LIKE ?1 OR moniker LIKE ?1 \
                 LIMIT ?2",
            )?
        };
        let rows = statement
            .query_map(params![pattern, limit], row_to_package)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Exact (case-insensitive) package lookup by identifier
    pub fn package_by_id(&self, package_id: &str) -> Result<PackageRow> {
        self.get_packages(&PackageFilter::Id(package_id.to_string()), 1)?
            .into_iter()
            .next()
            .ok_or_else(|| ToolkitError::NotFound(format!("package {package_id} not in catalog")))
    }

    /// MSI product codes registered for a package
    pub fn get_product_codes(&self, package_id: &str) -> Result<Vec<String>> {
        let package = self.package_by_id(package_id)?;
        let connection = self.connection.lock();
        let mut statement =
            connection.prepare("SELECT productcode FROM productcodes2 WHERE package = ?1")?;
        let codes = statement
            .query_map(params![package.rowid], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(codes)
    }

    /// Number of manifests in the catalog
    pub fn count(&self) -> Result<i64> {
        let connection = self.connection.lock();
        let count = connection.query_row("SELECT COUNT(*) FROM manifest", params![], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// All table names
    pub fn tables(&self) -> Result<Vec<String>> {
        let connection = self.connection.lock();
        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = statement
            .query_map(params![], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Column metadata for one table
    pub fn schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ToolkitError::Schema(format!(
                "invalid table name: {table}"
            )));
        }
        let connection = self.connection.lock();
        let mut statement = connection.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = statement
            .query_map(params![], |row| {
                Ok(ColumnInfo {
                    cid: row.get(0)?,
                    name: row.get(1)?,
                    column_type: row.get(2)?,
                    notnull: row.get::<_, i64>(3)? != 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(ToolkitError::Schema(format!("no such table: {table}")));
        }
        Ok(columns)
    }

    /// `latest_version` value for one package, used as the manifest default
    pub fn latest_version(&self, package_id: &str) -> Result<Option<String>> {
        let connection = self.connection.lock();
        let version = connection
            .query_row(
                "SELECT latest_version FROM packages WHERE id LIKE ?1",
                params![package_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(version.flatten())
    }
}

fn row_to_package(row: &rusqlite::Row<'_>) -> rusqlite::Result<PackageRow> {
    Ok(PackageRow {
        rowid: row.get(0)?,
        id: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        moniker: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        latest_version: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        hash: row.get(5)?,
    })
}

/// Ask the installed WinGet CLI for the URL of the source named `winget`
fn winget_cli_source_url() -> Option<String> {
    let output = std::process::Command::new("winget")
        .args(["source", "export"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        let Ok(source) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        if source.get("Name").and_then(|n| n.as_str()) == Some("winget") {
            if let Some(arg) = source.get("Arg").and_then(|a| a.as_str()) {
                debug!(url = %arg, "resolved source from WinGet CLI");
                return Some(arg.to_string());
            }
        }
    }
    None
}

/// Extract the archive (a ZIP renamed `.msix`) into the target directory
fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let target = target_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

/// Find `index.db` (preferred) or any `.db` file under the extraction root
fn locate_database(root: &Path) -> Result<PathBuf> {
    let mut any_db = None;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|n| n == "index.db") {
                return Ok(path);
            } else if path.extension().is_some_and(|e| e == "db") && any_db.is_none() {
                any_db = Some(path);
            }
        }
    }
    any_db.ok_or_else(|| {
        ToolkitError::NotFound("no database file inside the source archive".to_string())
    })
}
