use crate::codec::{self, CodecError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use warden_core::store::{ClusterRepo, GalleryStore, IdentityRepo, RecordKind, StoreError};
use warden_core::{
    ClusterId, Identity, IdentityDetails, IdentityId, NewCluster, NewIdentity, UnknownCluster,
};

#[derive(Error, Debug)]
pub enum SqliteError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: i64 },
}

impl From<SqliteError> for StoreError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::NotFound { kind, id } => StoreError::NotFound { kind, id },
            SqliteError::Sqlite(rusqlite::Error::FromSqlConversionFailure(col, _, source)) => {
                StoreError::Corrupt(format!("column {col}: {source}"))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, SqliteError>;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS known_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    contact TEXT,
    age TEXT,
    gender TEXT,
    address TEXT,
    occupation TEXT,
    image_path TEXT,
    encoding BLOB NOT NULL,
    date_added TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unknown_faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_path TEXT NOT NULL,
    encoding BLOB NOT NULL,
    date_detected TEXT NOT NULL
);
";

const IDENTITY_COLUMNS: &str =
    "id, name, contact, age, gender, address, occupation, image_path, encoding, date_added";

const CLUSTER_COLUMNS: &str = "id, image_path, encoding, date_detected";

/// SQLite-backed [`GalleryStore`].
///
/// One connection behind a mutex; every trait call is a short statement or
/// transaction, so contention between the frame worker and management calls
/// stays low.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "face database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fetch_identity(conn: &Connection, id: IdentityId) -> Result<Option<Identity>> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM known_faces WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], decode_identity_row).optional()?)
    }

    fn fetch_cluster(conn: &Connection, id: ClusterId) -> Result<Option<UnknownCluster>> {
        let sql = format!("SELECT {CLUSTER_COLUMNS} FROM unknown_faces WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], decode_cluster_row).optional()?)
    }

    fn insert_identity_row(conn: &Connection, identity: &NewIdentity) -> Result<IdentityId> {
        let d = &identity.details;
        conn.execute(
            "INSERT INTO known_faces (
                name, contact, age, gender, address, occupation, image_path, encoding, date_added
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.name,
                d.contact,
                d.age,
                d.gender,
                d.address,
                d.occupation,
                identity.image_path.to_string_lossy().into_owned(),
                codec::encode_embedding(&identity.embedding),
                codec::encode_timestamp(&identity.date_added),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_identities_inner(&self) -> Result<Vec<Identity>> {
        let conn = self.conn();
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM known_faces ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], decode_identity_row)?;
        collect_decodable(rows, "known_faces")
    }

    fn insert_identity_inner(&self, identity: NewIdentity) -> Result<Identity> {
        let conn = self.conn();
        let id = Self::insert_identity_row(&conn, &identity)?;
        Ok(Identity {
            id,
            details: identity.details,
            image_path: identity.image_path,
            embedding: identity.embedding,
            date_added: identity.date_added,
        })
    }

    fn update_identity_inner(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE known_faces
             SET name = ?2, contact = ?3, age = ?4, gender = ?5, address = ?6, occupation = ?7
             WHERE id = ?1",
            params![
                id,
                details.name,
                details.contact,
                details.age,
                details.gender,
                details.address,
                details.occupation,
            ],
        )?;
        if updated == 0 {
            return Err(SqliteError::NotFound {
                kind: RecordKind::Identity,
                id,
            });
        }
        Self::fetch_identity(&conn, id)?.ok_or(SqliteError::NotFound {
            kind: RecordKind::Identity,
            id,
        })
    }

    fn delete_identity_inner(&self, id: IdentityId) -> Result<Identity> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let identity = Self::fetch_identity(&tx, id)?.ok_or(SqliteError::NotFound {
            kind: RecordKind::Identity,
            id,
        })?;
        tx.execute("DELETE FROM known_faces WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(identity)
    }

    fn list_clusters_inner(&self) -> Result<Vec<UnknownCluster>> {
        let conn = self.conn();
        let sql = format!("SELECT {CLUSTER_COLUMNS} FROM unknown_faces ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], decode_cluster_row)?;
        collect_decodable(rows, "unknown_faces")
    }

    fn insert_cluster_inner(&self, cluster: NewCluster) -> Result<UnknownCluster> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO unknown_faces (image_path, encoding, date_detected) VALUES (?1, ?2, ?3)",
            params![
                cluster.image_path.to_string_lossy().into_owned(),
                codec::encode_embedding(&cluster.embedding),
                codec::encode_timestamp(&cluster.date_detected),
            ],
        )?;
        Ok(UnknownCluster {
            id: conn.last_insert_rowid(),
            image_path: cluster.image_path,
            embedding: cluster.embedding,
            date_detected: cluster.date_detected,
        })
    }

    fn delete_cluster_inner(&self, id: ClusterId) -> Result<UnknownCluster> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let cluster = Self::fetch_cluster(&tx, id)?.ok_or(SqliteError::NotFound {
            kind: RecordKind::Cluster,
            id,
        })?;
        tx.execute("DELETE FROM unknown_faces WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(cluster)
    }

    fn promote_inner(&self, cluster_id: ClusterId, identity: NewIdentity) -> Result<Identity> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let deleted = tx.execute("DELETE FROM unknown_faces WHERE id = ?1", params![cluster_id])?;
        if deleted != 1 {
            // Dropping the transaction rolls it back.
            return Err(SqliteError::NotFound {
                kind: RecordKind::Cluster,
                id: cluster_id,
            });
        }
        let id = Self::insert_identity_row(&tx, &identity)?;
        tx.commit()?;

        Ok(Identity {
            id,
            details: identity.details,
            image_path: identity.image_path,
            embedding: identity.embedding,
            date_added: identity.date_added,
        })
    }
}

/// Collect query rows, skipping any whose columns fail to decode.
///
/// One unreadable record must not hide the rest of the table; query-level
/// errors still fail the listing.
fn collect_decodable<T>(rows: impl Iterator<Item = rusqlite::Result<T>>, table: &str) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(record) => records.push(record),
            Err(rusqlite::Error::FromSqlConversionFailure(col, _, source)) => {
                tracing::warn!(table, column = col, error = %source, "skipping corrupt row");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(records)
}

fn conversion_failure(col: usize, ty: rusqlite::types::Type, err: CodecError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, ty, Box::new(err))
}

fn decode_identity_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    use rusqlite::types::Type;

    let blob: Vec<u8> = row.get(8)?;
    let embedding = codec::decode_embedding(&blob).map_err(|e| conversion_failure(8, Type::Blob, e))?;
    let raw_date: String = row.get(9)?;
    let date_added = codec::decode_timestamp(&raw_date).map_err(|e| conversion_failure(9, Type::Text, e))?;
    let image_path: Option<String> = row.get(7)?;

    Ok(Identity {
        id: row.get(0)?,
        details: IdentityDetails {
            name: row.get(1)?,
            contact: row.get(2)?,
            age: row.get(3)?,
            gender: row.get(4)?,
            address: row.get(5)?,
            occupation: row.get(6)?,
        },
        image_path: image_path.unwrap_or_default().into(),
        embedding,
        date_added,
    })
}

fn decode_cluster_row(row: &Row<'_>) -> rusqlite::Result<UnknownCluster> {
    use rusqlite::types::Type;

    let image_path: String = row.get(1)?;
    let blob: Vec<u8> = row.get(2)?;
    let embedding = codec::decode_embedding(&blob).map_err(|e| conversion_failure(2, Type::Blob, e))?;
    let raw_date: String = row.get(3)?;
    let date_detected = codec::decode_timestamp(&raw_date).map_err(|e| conversion_failure(3, Type::Text, e))?;

    Ok(UnknownCluster {
        id: row.get(0)?,
        image_path: image_path.into(),
        embedding,
        date_detected,
    })
}

impl IdentityRepo for SqliteStore {
    fn list_identities(&self) -> std::result::Result<Vec<Identity>, StoreError> {
        Ok(self.list_identities_inner()?)
    }

    fn get_identity(&self, id: IdentityId) -> std::result::Result<Option<Identity>, StoreError> {
        Ok(Self::fetch_identity(&self.conn(), id)?)
    }

    fn insert_identity(&self, identity: NewIdentity) -> std::result::Result<Identity, StoreError> {
        Ok(self.insert_identity_inner(identity)?)
    }

    fn update_identity(
        &self,
        id: IdentityId,
        details: IdentityDetails,
    ) -> std::result::Result<Identity, StoreError> {
        Ok(self.update_identity_inner(id, details)?)
    }

    fn delete_identity(&self, id: IdentityId) -> std::result::Result<Identity, StoreError> {
        Ok(self.delete_identity_inner(id)?)
    }
}

impl ClusterRepo for SqliteStore {
    fn list_clusters(&self) -> std::result::Result<Vec<UnknownCluster>, StoreError> {
        Ok(self.list_clusters_inner()?)
    }

    fn get_cluster(&self, id: ClusterId) -> std::result::Result<Option<UnknownCluster>, StoreError> {
        Ok(Self::fetch_cluster(&self.conn(), id)?)
    }

    fn insert_cluster(&self, cluster: NewCluster) -> std::result::Result<UnknownCluster, StoreError> {
        Ok(self.insert_cluster_inner(cluster)?)
    }

    fn delete_cluster(&self, id: ClusterId) -> std::result::Result<UnknownCluster, StoreError> {
        Ok(self.delete_cluster_inner(id)?)
    }
}

impl GalleryStore for SqliteStore {
    fn promote_cluster(
        &self,
        cluster_id: ClusterId,
        identity: NewIdentity,
    ) -> std::result::Result<Identity, StoreError> {
        let promoted = self.promote_inner(cluster_id, identity)?;
        tracing::debug!(cluster = cluster_id, identity = promoted.id, "promotion committed");
        Ok(promoted)
    }
}
