//! Rewinder - Image Store
//!
//! Timestamp-addressed capture storage. Record metadata lives in a SQLite
//! index, image and thumbnail bytes in one file each under the data
//! directory.
//!
//! ```text
//! <data_dir>/
//!   captures.db
//!   images/<ts>.jpg      plaintext capture
//!   images/<ts>.jpg.enc  sealed capture
//!   thumbs/<ts>.jpg[.enc]
//!   view/<ts>.jpg        decrypted copies handed out by path lookups
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::encryption::BlobKind;
use crate::error::StorageError;
use crate::secure_fs::SecureFs;

/// Index database file name
pub const DB_FILE: &str = "captures.db";

const IMAGES_DIR: &str = "images";
const THUMBS_DIR: &str = "thumbs";
const VIEW_DIR: &str = "view";
const TRASH_PREFIX: &str = ".trash-";

/// Directories moved aside as one unit by `clear`
const STAGED_DIRS: [&str; 3] = [IMAGES_DIR, THUMBS_DIR, VIEW_DIR];

/// Stored encoding of capture blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
        }
    }

    fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(StorageError::Database(format!("unknown image format '{other}'"))),
        }
    }
}

/// One capture as written by the pipeline and read back by queries
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub timestamp: i64,
    pub payload: Vec<u8>,
    pub thumbnail: Option<Vec<u8>>,
    pub encrypted: bool,
    pub format: ImageFormat,
    /// Fingerprint of the sealing key, set on encrypted records
    pub key_id: Option<String>,
}

/// Index row for a capture, without blob bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMeta {
    pub timestamp: i64,
    pub encrypted: bool,
    pub format: ImageFormat,
    pub key_id: Option<String>,
    pub size: u64,
    pub has_thumbnail: bool,
    pub created_at: DateTime<Utc>,
}

/// A single stored blob with what is needed to open it
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub timestamp: i64,
    pub bytes: Vec<u8>,
    pub encrypted: bool,
    pub key_id: Option<String>,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub records: usize,
    pub encrypted_records: usize,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub disk_bytes: u64,
}

/// Durable timestamp → capture mapping
pub struct ImageStore {
    /// Index connection. Holding this lock is the store lock.
    conn: Mutex<Connection>,
    fs: SecureFs,
}

impl ImageStore {
    /// Open the store under `root`, creating it if needed. Leftovers of an
    /// interrupted clear and blobs without an index row are removed.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(root)?;
        for dir in STAGED_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }

        let conn = Connection::open(root.join(DB_FILE))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                timestamp INTEGER PRIMARY KEY,
                encrypted INTEGER NOT NULL,
                format TEXT NOT NULL,
                key_id TEXT,
                size INTEGER NOT NULL,
                has_thumbnail INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            fs: SecureFs::new(root),
        };
        store.sweep()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // WRITE
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist a capture. Blobs are written first, the index row last, so a
    /// record is only visible once all of its bytes are on disk.
    pub fn put(&self, record: &ImageRecord) -> Result<(), StorageError> {
        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM images WHERE timestamp = ?1)",
            params![record.timestamp],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::DuplicateTimestamp(record.timestamp));
        }

        let image_rel = blob_rel(BlobKind::Image, record.timestamp, record.format, record.encrypted);
        let thumb_rel = blob_rel(BlobKind::Thumbnail, record.timestamp, record.format, record.encrypted);

        self.fs.write_file(&image_rel, &record.payload)?;
        if let Some(thumbnail) = &record.thumbnail {
            if let Err(e) = self.fs.write_file(&thumb_rel, thumbnail) {
                self.discard_blobs(&[&image_rel, &thumb_rel]);
                return Err(e.into());
            }
        }

        let inserted = conn.execute(
            "INSERT INTO images (timestamp, encrypted, format, key_id, size, has_thumbnail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.timestamp,
                record.encrypted,
                record.format.as_str(),
                record.key_id,
                record.payload.len() as i64,
                record.thumbnail.is_some(),
                Utc::now().to_rfc3339(),
            ],
        );

        if let Err(e) = inserted {
            self.discard_blobs(&[&image_rel, &thumb_rel]);
            return Err(e.into());
        }

        Ok(())
    }

    fn discard_blobs(&self, rels: &[&str]) {
        for rel in rels {
            if let Err(e) = self.fs.delete_file(rel) {
                log::warn!("Failed to remove blob {rel}: {e}");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // READ
    // ═══════════════════════════════════════════════════════════════════════

    /// Index row for `timestamp`, `None` if nothing was captured then
    pub fn meta(&self, timestamp: i64) -> Result<Option<RecordMeta>, StorageError> {
        let conn = self.conn.lock();
        query_meta(&conn, timestamp)
    }

    /// Full record including its thumbnail
    pub fn get(&self, timestamp: i64) -> Result<Option<ImageRecord>, StorageError> {
        let conn = self.conn.lock();

        let Some(meta) = query_meta(&conn, timestamp)? else {
            return Ok(None);
        };

        let payload = self.read_blob(&meta, BlobKind::Image)?;
        let thumbnail = if meta.has_thumbnail {
            Some(self.read_blob(&meta, BlobKind::Thumbnail)?)
        } else {
            None
        };

        Ok(Some(ImageRecord {
            timestamp: meta.timestamp,
            payload,
            thumbnail,
            encrypted: meta.encrypted,
            format: meta.format,
            key_id: meta.key_id,
        }))
    }

    /// One blob of a capture. A record stored without a thumbnail answers
    /// `None` for `BlobKind::Thumbnail`.
    pub fn get_blob(&self, timestamp: i64, kind: BlobKind) -> Result<Option<StoredBlob>, StorageError> {
        let conn = self.conn.lock();

        let Some(meta) = query_meta(&conn, timestamp)? else {
            return Ok(None);
        };
        if kind == BlobKind::Thumbnail && !meta.has_thumbnail {
            return Ok(None);
        }

        let bytes = self.read_blob(&meta, kind)?;
        Ok(Some(StoredBlob {
            timestamp: meta.timestamp,
            bytes,
            encrypted: meta.encrypted,
            key_id: meta.key_id,
        }))
    }

    /// Absolute path of the stored image blob
    pub fn image_path(&self, meta: &RecordMeta) -> PathBuf {
        self.fs
            .path_of(&blob_rel(BlobKind::Image, meta.timestamp, meta.format, meta.encrypted))
    }

    fn read_blob(&self, meta: &RecordMeta, kind: BlobKind) -> Result<Vec<u8>, StorageError> {
        let rel = blob_rel(kind, meta.timestamp, meta.format, meta.encrypted);
        self.fs.read_file(&rel).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::MissingBlob {
                timestamp: meta.timestamp,
                path: self.fs.path_of(&rel).display().to_string(),
            },
            _ => StorageError::Io(e),
        })
    }

    /// Newest timestamp in the store
    pub fn latest_timestamp(&self) -> Result<Option<i64>, StorageError> {
        let conn = self.conn.lock();
        let latest: Option<i64> = conn.query_row("SELECT MAX(timestamp) FROM images", [], |row| row.get(0))?;
        Ok(latest)
    }

    /// Up to `limit` timestamps, newest first
    pub fn timestamps(&self, limit: usize) -> Result<Vec<i64>, StorageError> {
        let conn = self.conn.lock();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare("SELECT timestamp FROM images ORDER BY timestamp DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |row| row.get(0))?;

        let mut timestamps = Vec::new();
        for row in rows {
            timestamps.push(row?);
        }
        Ok(timestamps)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        count_rows(&conn)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let conn = self.conn.lock();

        let (records, encrypted_records, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(encrypted), 0), MIN(timestamp), MAX(timestamp) FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        Ok(StoreStats {
            records: records as usize,
            encrypted_records: encrypted_records as usize,
            oldest,
            newest,
            disk_bytes: self.fs.total_size()?,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // VIEW CACHE
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a decrypted copy of a capture for consumers that need a file path
    pub fn write_view(&self, timestamp: i64, format: ImageFormat, plaintext: &[u8]) -> Result<PathBuf, StorageError> {
        let _guard = self.conn.lock();

        let rel = format!("{VIEW_DIR}/{timestamp}.{}", format.extension());
        self.fs.write_file(&rel, plaintext)?;
        Ok(self.fs.path_of(&rel))
    }

    /// Shred every decrypted copy. Returns how many were removed.
    pub fn purge_views(&self) -> Result<usize, StorageError> {
        let _guard = self.conn.lock();
        Ok(self.fs.wipe_dir(VIEW_DIR)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLEAR
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove every record and blob. Either everything is gone afterwards or
    /// nothing changed.
    ///
    /// Blob directories are first renamed into a trash directory, then the
    /// rows are deleted in one transaction. Any failure before the commit
    /// moves the directories back.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let trash = self.fs.path_of(&format!("{TRASH_PREFIX}{nanos}"));
        fs::create_dir_all(&trash)
            .map_err(|e| StorageError::ClearFailed(format!("cannot stage {}: {e}", trash.display())))?;

        let mut staged = Vec::new();
        for dir in STAGED_DIRS {
            let source = self.fs.path_of(dir);
            if !source.exists() {
                continue;
            }
            if let Err(e) = fs::rename(&source, trash.join(dir)) {
                self.unstage(&trash, &staged);
                return Err(StorageError::ClearFailed(format!("cannot stage {dir}: {e}")));
            }
            staged.push(dir);
        }

        let removed = match delete_all_rows(&mut conn) {
            Ok(removed) => removed,
            Err(e) => {
                self.unstage(&trash, &staged);
                return Err(StorageError::ClearFailed(format!("index not cleared: {e}")));
            }
        };

        for dir in STAGED_DIRS {
            if let Err(e) = fs::create_dir_all(self.fs.path_of(dir)) {
                log::warn!("Failed to recreate {dir}/ after clear: {e}");
            }
        }
        remove_trash(&trash);

        log::info!("Cleared {removed} captures");
        Ok(removed)
    }

    /// Move staged directories back into place
    fn unstage(&self, trash: &Path, staged: &[&str]) {
        for dir in staged {
            if let Err(e) = fs::rename(trash.join(dir), self.fs.path_of(dir)) {
                log::error!("Failed to restore {dir}/ from {}: {e}", trash.display());
            }
        }
        if let Err(e) = fs::remove_dir(trash) {
            log::warn!("Failed to remove {}: {e}", trash.display());
        }
    }

    /// Finish or undo a clear that stopped between staging and the index
    /// commit.
    ///
    /// With rows still indexed the clear never committed, so each staged
    /// directory goes back in place. A staged directory whose live
    /// counterpart already holds files is left over from a committed clear
    /// and is shredded.
    fn recover_trash(&self, name: &str) -> Result<(), StorageError> {
        let trash = self.fs.path_of(name);
        let rows = {
            let conn = self.conn.lock();
            count_rows(&conn)?
        };

        if rows == 0 {
            log::warn!("Removing leftover {name} from a committed clear");
            remove_trash(&trash);
            return Ok(());
        }

        log::warn!("Restoring {name}: clear was interrupted before the index was emptied");
        for dir in STAGED_DIRS {
            let staged = trash.join(dir);
            if !staged.exists() {
                continue;
            }
            let live = self.fs.path_of(dir);
            if !self.fs.list_dir(dir)?.is_empty() {
                log::warn!("Keeping live {dir}/, shredding the staged copy");
                remove_trash(&staged);
                continue;
            }
            fs::remove_dir(&live).or_else(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })?;
            fs::rename(&staged, &live).map_err(|e| {
                StorageError::ClearFailed(format!("cannot restore {dir} from {}: {e}", trash.display()))
            })?;
        }

        if let Err(e) = fs::remove_dir(&trash) {
            log::warn!("Failed to remove {}: {e}", trash.display());
        }
        Ok(())
    }

    /// Settle trash left by an interrupted clear, then drop stale view
    /// copies and blobs that never got an index row
    fn sweep(&self) -> Result<(), StorageError> {
        for name in self.fs.list_dir("")? {
            if name.starts_with(TRASH_PREFIX) {
                self.recover_trash(&name)?;
            }
        }

        let stale = self.fs.wipe_dir(VIEW_DIR)?;
        if stale > 0 {
            log::debug!("Removed {stale} stale view copies");
        }

        let conn = self.conn.lock();
        let mut orphans = 0;
        for dir in [IMAGES_DIR, THUMBS_DIR] {
            for name in self.fs.list_dir(dir)? {
                let known = match parse_blob_name(&name) {
                    Some(ts) => query_meta(&conn, ts)?.is_some(),
                    None => false,
                };
                if !known {
                    self.fs.delete_file(&format!("{dir}/{name}"))?;
                    orphans += 1;
                }
            }
        }
        if orphans > 0 {
            log::warn!("Removed {orphans} orphaned blob files");
        }

        Ok(())
    }
}

fn blob_rel(kind: BlobKind, timestamp: i64, format: ImageFormat, encrypted: bool) -> String {
    let dir = match kind {
        BlobKind::Image => IMAGES_DIR,
        BlobKind::Thumbnail => THUMBS_DIR,
    };
    let suffix = if encrypted { ".enc" } else { "" };
    format!("{dir}/{timestamp}.{}{suffix}", format.extension())
}

/// Timestamp of a finished blob file name (`<ts>.jpg` or `<ts>.jpg.enc`)
fn parse_blob_name(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".enc").unwrap_or(name);
    let ts = stem.strip_suffix(&format!(".{}", ImageFormat::Jpeg.extension()))?;
    ts.parse().ok()
}

fn query_meta(conn: &Connection, timestamp: i64) -> Result<Option<RecordMeta>, StorageError> {
    let row = conn
        .query_row(
            "SELECT timestamp, encrypted, format, key_id, size, has_thumbnail, created_at
             FROM images WHERE timestamp = ?1",
            params![timestamp],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((timestamp, encrypted, format, key_id, size, has_thumbnail, created_at)) = row else {
        return Ok(None);
    };

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StorageError::Database(format!("bad created_at for {timestamp}: {e}")))?
        .with_timezone(&Utc);

    Ok(Some(RecordMeta {
        timestamp,
        encrypted,
        format: ImageFormat::parse(&format)?,
        key_id,
        size: size as u64,
        has_thumbnail,
        created_at,
    }))
}

fn count_rows(conn: &Connection) -> Result<usize, StorageError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn delete_all_rows(conn: &mut Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM images", [])?;
    tx.commit()?;
    Ok(removed)
}

fn remove_trash(trash: &Path) {
    let staged = SecureFs::new(trash);
    let result = staged.wipe_dir("").and_then(|_| fs::remove_dir(trash));
    if let Err(e) = result {
        log::warn!("Failed to remove {}: {e}", trash.display());
    }
}
