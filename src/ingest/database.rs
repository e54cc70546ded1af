//! SQLite image database
//!
//! Tables:
//! - image_info  (format and sector size of each recorded image)
//! - image_names (segment file names, in order)
//! - files       (derived file records)

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{DerivedFileRecord, ImageDb, NewDerivedFile, ROOT_PARENT_ID};
use crate::error::{EngineError, EngineResult};

/// Status of a freshly created record
pub const STATUS_READY: &str = "ready";

/// Row of the image_info table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfoRecord {
    pub format: String,
    pub sector_size: u32,
    pub recorded_at: String,
}

/// Database connection wrapper for shared access during a walk
pub struct SqliteImageDb {
    conn: Mutex<Connection>,
}

impl SqliteImageDb {
    /// Open (or create) a database file, creating tables if needed
    pub fn open(db_path: &Path) -> EngineResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening image database at: {:?}", db_path);
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> EngineResult<Self> {
        let db = SqliteImageDb {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Persistence("image database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> EngineResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS image_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                format TEXT NOT NULL,
                sector_size INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_names (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            -- parent_id is 0 or the file_id of an earlier row
            CREATE TABLE IF NOT EXISTS files (
                file_id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                full_path TEXT NOT NULL,
                is_directory INTEGER NOT NULL,
                size INTEGER NOT NULL,
                ctime INTEGER NOT NULL DEFAULT 0,
                crtime INTEGER NOT NULL DEFAULT 0,
                atime INTEGER NOT NULL DEFAULT 0,
                mtime INTEGER NOT NULL DEFAULT 0,
                details TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);
        "#,
        )?;
        Ok(())
    }

    pub fn image_info(&self) -> EngineResult<Vec<ImageInfoRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT format, sector_size, recorded_at FROM image_info ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ImageInfoRecord {
                format: row.get(0)?,
                sector_size: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn image_names(&self) -> EngineResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM image_names ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    /// All derived files in creation order
    pub fn derived_files(&self) -> EngineResult<Vec<DerivedFileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, parent_id, name, full_path, is_directory, size, ctime, crtime, atime, mtime, details, status
             FROM files ORDER BY file_id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_derived_file(&self, file_id: u64) -> EngineResult<Option<DerivedFileRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT file_id, parent_id, name, full_path, is_directory, size, ctime, crtime, atime, mtime, details, status
                 FROM files WHERE file_id = ?1",
                params![sql_int("file id", file_id)?],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Direct children of a record (or of the root sentinel)
    pub fn children_of(&self, parent_id: u64) -> EngineResult<Vec<DerivedFileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, parent_id, name, full_path, is_directory, size, ctime, crtime, atime, mtime, details, status
             FROM files WHERE parent_id = ?1 ORDER BY file_id",
        )?;
        let rows = stmt.query_map(params![sql_int("parent id", parent_id)?], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// SQLite integers are signed; ids and sizes past i64::MAX are rejected
fn sql_int(what: &str, value: u64) -> EngineResult<i64> {
    i64::try_from(value)
        .map_err(|_| EngineError::Persistence(format!("{} {} exceeds the SQLite integer range", what, value)))
}

fn column_u64(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(index)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, value))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DerivedFileRecord> {
    Ok(DerivedFileRecord {
        file_id: column_u64(row, 0)?,
        parent_id: column_u64(row, 1)?,
        name: row.get(2)?,
        full_path: row.get(3)?,
        is_directory: row.get(4)?,
        size: column_u64(row, 5)?,
        ctime: row.get(6)?,
        crtime: row.get(7)?,
        atime: row.get(8)?,
        mtime: row.get(9)?,
        details: row.get(10)?,
        status: row.get(11)?,
    })
}

impl ImageDb for SqliteImageDb {
    fn add_image_info(&self, format: &str, sector_size: u32) -> EngineResult<()> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO image_info (format, sector_size, recorded_at) VALUES (?1, ?2, ?3)",
            params![format, sector_size, now],
        )?;
        Ok(())
    }

    fn add_image_name(&self, name: &str) -> EngineResult<()> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO image_names (name) VALUES (?1)", params![name])?;
        Ok(())
    }

    fn add_derived_file(&self, file: &NewDerivedFile) -> EngineResult<u64> {
        let parent_id = sql_int("parent id", file.parent_id)?;
        let size = sql_int("size", file.size)?;
        let conn = self.lock()?;

        if file.parent_id != ROOT_PARENT_ID {
            let parent_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM files WHERE file_id = ?1)",
                params![parent_id],
                |row| row.get(0),
            )?;
            if !parent_exists {
                return Err(EngineError::Persistence(format!(
                    "'{}' references unknown parent {}",
                    file.full_path, file.parent_id
                )));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO files (parent_id, name, full_path, is_directory, size, ctime, crtime, atime, mtime, details, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                parent_id,
                file.name,
                file.full_path,
                file.is_directory,
                size,
                file.ctime,
                file.crtime,
                file.atime,
                file.mtime,
                file.details,
                STATUS_READY,
                now
            ],
        )?;
        let file_id = u64::try_from(conn.last_insert_rowid())
            .map_err(|_| EngineError::Persistence("negative file id assigned".to_string()))?;
        debug!(file_id, parent_id = file.parent_id, path = %file.full_path, "Derived file recorded");
        Ok(file_id)
    }
}
