//! Transactional Windows Installer database editor
//!
//! One open database owns one package handle; the open mode decides which
//! operations are legal. Changing modes commits the outgoing handle first
//! and reopens the file, so edits are never silently discarded. All edit
//! operations require a writable mode; violating that is a mode conflict,
//! not an IO error.

use crate::error::{Result, ToolkitError};
use crate::msi::query::{parse_query, ParsedQuery, QueryLiteral};
use crate::msi::summary::{read_summary, MsiSummary};
use serde_json::{Map, Value as JsonValue};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Database open modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsiOpenMode {
    ReadOnly,
    Transact,
    Direct,
    Create,
    CreateDirect,
    PatchFile,
}

impl MsiOpenMode {
    /// Whether edits are legal in this mode
    pub fn is_writable(self) -> bool {
        !matches!(self, MsiOpenMode::ReadOnly)
    }

    /// Whether opening truncates / creates the file
    fn creates(self) -> bool {
        matches!(self, MsiOpenMode::Create | MsiOpenMode::CreateDirect)
    }
}

/// Column description resolved from the database column catalog
#[derive(Debug, Clone, serde::Serialize)]
pub struct MsiColumnDesc {
    pub table: String,
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// An open MSI database with its mode state
pub struct MsiDatabase {
    path: PathBuf,
    mode: Option<MsiOpenMode>,
    package: Option<msi::Package<File>>,
}

impl MsiDatabase {
    /// Bind to a database file without opening it yet
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: None,
            package: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Option<MsiOpenMode> {
        self.mode
    }

    /// Open (or reopen) the database in the given mode
    ///
    /// An existing handle is committed first; a commit failure releases the
    /// handle and surfaces as a mode conflict.
    pub fn open_database(&mut self, mode: MsiOpenMode) -> Result<()> {
        if self.package.is_some() {
            if let Err(e) = self.commit() {
                self.package = None;
                self.mode = None;
                return Err(ToolkitError::ModeConflict(format!(
                    "cannot leave mode {:?} uncommitted: {e}",
                    self.mode
                )));
            }
            self.package = None;
        }

        let package = if mode.creates() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;
            msi::Package::create(msi::PackageType::Installer, file)?
        } else if mode.is_writable() {
            msi::open_rw(&self.path)?
        } else {
            msi::open(&self.path)?
        };

        debug!(path = %self.path.display(), ?mode, "database opened");
        self.package = Some(package);
        self.mode = Some(mode);
        Ok(())
    }

    /// Flush pending edits to disk
    pub fn commit(&mut self) -> Result<()> {
        if let (Some(package), Some(mode)) = (self.package.as_mut(), self.mode) {
            if mode.is_writable() {
                package.flush()?;
                debug!("database committed");
            }
        }
        Ok(())
    }

    /// Release the handle, committing writable modes first
    pub fn close(&mut self) -> Result<()> {
        let result = self.commit();
        self.package = None;
        self.mode = None;
        result
    }

    fn package(&self) -> Result<&msi::Package<File>> {
        self.package
            .as_ref()
            .ok_or_else(|| ToolkitError::ModeConflict("database is not open".to_string()))
    }

    fn package_mut(&mut self) -> Result<&mut msi::Package<File>> {
        self.package
            .as_mut()
            .ok_or_else(|| ToolkitError::ModeConflict("database is not open".to_string()))
    }

    fn writable_package(&mut self) -> Result<&mut msi::Package<File>> {
        match self.mode {
            Some(mode) if mode.is_writable() => {}
            Some(mode) => {
                return Err(ToolkitError::ModeConflict(format!(
                    "edit attempted in {mode:?} mode"
                )))
            }
            None => {
                return Err(ToolkitError::ModeConflict(
                    "database is not open".to_string(),
                ))
            }
        }
        self.package_mut()
    }

    /// Read one property, or all of them when `name` is `None`
    pub fn get_property(&mut self, name: Option<&str>) -> Result<Vec<(String, String)>> {
        let package = self.package_mut()?;
        if !package.has_table("Property") {
            return Err(ToolkitError::Schema("no Property table".to_string()));
        }
        let mut query = msi::Select::table("Property");
        if let Some(name) = name {
            query = query.with(msi::Expr::col("Property").eq(msi::Expr::string(name)));
        }
        let rows = package.select_rows(query)?;
        let mut properties = Vec::new();
        for row in rows {
            let key = value_to_string(&row[0]);
            let value = value_to_string(&row[1]);
            properties.push((key, value));
        }
        Ok(properties)
    }

    /// Set a property: UPDATE when present, INSERT otherwise
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let exists = self
            .get_property(Some(name))
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);

        let package = self.writable_package()?;
        if !package.has_table("Property") {
            package.create_table(
                "Property",
                vec![
                    msi::Column::build("Property").primary_key().string(72),
                    msi::Column::build("Value").string(0),
                ],
            )?;
        }

        if exists {
            package.update_rows(
                msi::Update::table("Property")
                    .set("Value", msi::Value::Str(value.to_string()))
                    .with(msi::Expr::col("Property").eq(msi::Expr::string(name))),
            )?;
            info!(property = name, "property updated");
        } else {
            package.insert_rows(msi::Insert::into("Property").row(vec![
                msi::Value::Str(name.to_string()),
                msi::Value::Str(value.to_string()),
            ]))?;
            info!(property = name, "property inserted");
        }
        Ok(())
    }

    /// Summary information stream, decoded with the fixed index mapping
    pub fn get_summary(&mut self) -> Result<MsiSummary> {
        // The property set is read from the last committed on-disk state.
        self.commit()?;
        read_summary(&self.path)
    }

    /// Extract a Binary table payload to a file
    pub fn get_binary(&mut self, name: &str, out_path: &Path) -> Result<()> {
        let stream_name = format!("Binary.{name}");
        let package = self.package_mut()?;
        if !package.has_stream(&stream_name) {
            return Err(ToolkitError::NotFound(format!(
                "no binary stream named {name}"
            )));
        }
        let mut reader = package.read_stream(&stream_name)?;
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        std::fs::write(out_path, payload)?;
        Ok(())
    }

    /// Replace or insert a Binary table payload from a file
    pub fn set_binary(&mut self, name: &str, in_path: &Path) -> Result<()> {
        let payload = std::fs::read(in_path)?;
        let stream_name = format!("Binary.{name}");
        let package = self.writable_package()?;

        {
            let mut writer = package.write_stream(&stream_name)?;
            writer.write_all(&payload)?;
        }

        // Keep the Binary table row in step with the stream. The cell of a
        // binary column is a stream reference, so a failed row write leaves
        // the payload readable and is reported, not fatal.
        if package.has_table("Binary") {
            let existing = package.select_rows(
                msi::Select::table("Binary")
                    .with(msi::Expr::col("Name").eq(msi::Expr::string(name))),
            )?;
            let already_listed = existing.count() > 0;
            if !already_listed {
                if let Err(e) = package.insert_rows(msi::Insert::into("Binary").row(vec![
                    msi::Value::Str(name.to_string()),
                    msi::Value::Str(name.to_string()),
                ])) {
                    warn!("binary stream written but row insert failed: {e}");
                }
            }
        }
        info!(binary = name, bytes = payload.len(), "binary payload stored");
        Ok(())
    }

    /// Names in the `_Streams` table, minus table-storage internals
    pub fn get_streams(&mut self) -> Result<Vec<String>> {
        let package = self.package()?;
        Ok(package.streams().collect())
    }

    /// Replace or create an arbitrary stream from a file
    pub fn update_stream(&mut self, name: &str, in_path: &Path) -> Result<()> {
        let payload = std::fs::read(in_path)?;
        let package = self.writable_package()?;
        let mut writer = package.write_stream(name)?;
        writer.write_all(&payload)?;
        info!(stream = name, bytes = payload.len(), "stream updated");
        Ok(())
    }

    /// Read an arbitrary stream into memory
    pub fn read_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        let package = self.package_mut()?;
        if !package.has_stream(name) {
            return Err(ToolkitError::NotFound(format!("no stream named {name}")));
        }
        let mut reader = package.read_stream(name)?;
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        Ok(payload)
    }

    /// Run a `SELECT` (or bare table name) and shape rows by column name
    ///
    /// Column headers come from the database column catalog; asking for a
    /// table or column the catalog does not list is a schema error.
    pub fn execute_sql(&mut self, query: &str) -> Result<Vec<Map<String, JsonValue>>> {
        let parsed = parse_query(query)?;
        self.execute_parsed(&parsed)
    }

    fn execute_parsed(&mut self, parsed: &ParsedQuery) -> Result<Vec<Map<String, JsonValue>>> {
        let package = self.package_mut()?;
        let table = package.get_table(&parsed.table).ok_or_else(|| {
            ToolkitError::Schema(format!("table {} not in _Columns", parsed.table))
        })?;

        let table_columns: Vec<String> =
            table.columns().iter().map(|c| c.name().to_string()).collect();
        let selected: Vec<String> = match &parsed.columns {
            None => table_columns.clone(),
            Some(columns) => {
                for column in columns {
                    if !table_columns.iter().any(|c| c == column) {
                        return Err(ToolkitError::Schema(format!(
                            "column {column} not in table {}",
                            parsed.table
                        )));
                    }
                }
                columns.clone()
            }
        };
        for (column, _) in &parsed.conditions {
            if !table_columns.iter().any(|c| c == column) {
                return Err(ToolkitError::Schema(format!(
                    "condition column {column} not in table {}",
                    parsed.table
                )));
            }
        }

        let mut query = msi::Select::table(parsed.table.as_str());
        let mut condition: Option<msi::Expr> = None;
        for (column, literal) in &parsed.conditions {
            let rhs = match literal {
                QueryLiteral::Str(s) => msi::Expr::string(s.as_str()),
                QueryLiteral::Int(i) => msi::Expr::integer(*i),
            };
            let this = msi::Expr::col(column.as_str()).eq(rhs);
            condition = Some(match condition {
                None => this,
                Some(existing) => existing.and(this),
            });
        }
        if let Some(condition) = condition {
            query = query.with(condition);
        }

        let rows = package.select_rows(query)?;
        let mut shaped = Vec::new();
        for row in rows {
            let mut object = Map::new();
            for (index, column) in table_columns.iter().enumerate() {
                if !selected.contains(column) {
                    continue;
                }
                object.insert(column.clone(), value_to_json(&row[index]));
            }
            shaped.push(object);
        }
        Ok(shaped)
    }

    /// Column catalog for one table, or for every table
    pub fn get_table_columns(&mut self, table: Option<&str>) -> Result<Vec<MsiColumnDesc>> {
        let package = self.package()?;
        let mut described = Vec::new();
        match table {
            Some(name) => {
                let table = package.get_table(name).ok_or_else(|| {
                    ToolkitError::Schema(format!("table {name} not in _Columns"))
                })?;
                describe_table(table, &mut described);
            }
            None => {
                for table in package.tables() {
                    describe_table(table, &mut described);
                }
            }
        }
        Ok(described)
    }
}

impl Drop for MsiDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("database dropped with uncommitted edits: {e}");
        }
    }
}

fn describe_table(table: &msi::Table, described: &mut Vec<MsiColumnDesc>) {
    for column in table.columns() {
        described.push(MsiColumnDesc {
            table: table.name().to_string(),
            name: column.name().to_string(),
            column_type: column.coltype().to_string(),
            nullable: column.is_nullable(),
            primary_key: column.is_primary_key(),
        });
    }
}

fn value_to_string(value: &msi::Value) -> String {
    match value {
        msi::Value::Null => String::new(),
        msi::Value::Int(i) => i.to_string(),
        msi::Value::Str(s) => s.clone(),
    }
}

fn value_to_json(value: &msi::Value) -> JsonValue {
    match value {
        msi::Value::Null => JsonValue::Null,
        msi::Value::Int(i) => JsonValue::from(*i),
        msi::Value::Str(s) => JsonValue::from(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_database(dir: &Path) -> MsiDatabase {
        let path = dir.join("test.msi");
        let mut database = MsiDatabase::open(&path);
        database.open_database(MsiOpenMode::Create).unwrap();
        database.set_property("ALLUSERS", "1").unwrap();
        database.set_property("ProductName", "Test Product").unwrap();
        database.commit().unwrap();
        database
    }

    #[test]
    fn test_property_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());

        database.open_database(MsiOpenMode::Transact).unwrap();
        database.set_property("ALLUSERS", "2").unwrap();
        database.commit().unwrap();

        let value = database.get_property(Some("ALLUSERS")).unwrap();
        assert_eq!(value, vec![("ALLUSERS".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_property_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path;
        {
            let database = create_database(dir.path());
            path = database.path().to_path_buf();
        }
        let mut database = MsiDatabase::open(path);
        database.open_database(MsiOpenMode::ReadOnly).unwrap();
        let all = database.get_property(None).unwrap();
        assert!(all.contains(&("ProductName".to_string(), "Test Product".to_string())));
    }

    #[test]
    fn test_readonly_mode_rejects_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());
        database.open_database(MsiOpenMode::ReadOnly).unwrap();
        let err = database.set_property("X", "Y").unwrap_err();
        assert!(matches!(err, ToolkitError::ModeConflict(_)));
    }

    #[test]
    fn test_mode_transition_commits_outgoing_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());
        database.open_database(MsiOpenMode::Transact).unwrap();
        database.set_property("STAGED", "yes").unwrap();
        // No explicit commit: the transition must flush first.
        database.open_database(MsiOpenMode::ReadOnly).unwrap();
        let value = database.get_property(Some("STAGED")).unwrap();
        assert_eq!(value, vec![("STAGED".to_string(), "yes".to_string())]);
    }

    #[test]
    fn test_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());
        database.open_database(MsiOpenMode::Transact).unwrap();

        let payload = b"stream payload \x00\x01\x02 with binary bytes";
        let input = dir.path().join("payload.bin");
        std::fs::write(&input, payload).unwrap();

        database.update_stream("CustomData", &input).unwrap();
        database.commit().unwrap();

        let streams = database.get_streams().unwrap();
        assert!(streams.iter().any(|s| s == "CustomData"));
        assert_eq!(database.read_stream("CustomData").unwrap(), payload);
    }

    #[test]
    fn test_binary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());
        database.open_database(MsiOpenMode::Transact).unwrap();

        let payload = b"\x89PNG fake image data";
        let input = dir.path().join("banner.png");
        std::fs::write(&input, payload).unwrap();
        database.set_binary("Banner", &input).unwrap();
        database.commit().unwrap();

        let output = dir.path().join("extracted.png");
        database.get_binary("Banner", &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), payload);
    }

    #[test]
    fn test_execute_sql_shapes_rows_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());

        let rows = database
            .execute_sql("SELECT Property, Value FROM Property WHERE Property = 'ALLUSERS'")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Property"], JsonValue::from("ALLUSERS"));
        assert_eq!(rows[0]["Value"], JsonValue::from("1"));

        // Bare table name expands to SELECT *.
        let all = database.execute_sql("Property").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_unknown_table_and_column_are_schema_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());

        assert!(matches!(
            database.execute_sql("Nonexistent").unwrap_err(),
            ToolkitError::Schema(_)
        ));
        assert!(matches!(
            database
                .execute_sql("SELECT Nope FROM Property")
                .unwrap_err(),
            ToolkitError::Schema(_)
        ));
    }

    #[test]
    fn test_table_columns_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut database = create_database(dir.path());
        let columns = database.get_table_columns(Some("Property")).unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Property", "Value"]);
        assert!(columns[0].primary_key);
    }
}
