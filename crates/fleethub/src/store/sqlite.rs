use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::document::{
    apply_updates, ArrayUnionMode, ChangeNotice, CollectionPath, CollectionSnapshot, Document,
    DocumentRef, FieldUpdate, UserId,
};
use super::migrations::{self, REVISION_KEY};
use super::DocumentStore;
use crate::error::{Error, Result};

/// Capacity of the change feed. Lagging listeners re-read the collection,
/// so dropped notices only coalesce snapshots.
const CHANGE_FEED_CAPACITY: usize = 64;

/// How often the commit watcher checks the database for writes made through
/// other connections.
pub const COMMIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Length of generated document ids, in hex characters.
const DOCUMENT_ID_LEN: usize = 20;

/// Length of generated user ids, in hex characters.
const USER_ID_LEN: usize = 28;

/// Longest custom token accepted.
const MAX_TOKEN_LEN: usize = 4096;

/// `SQLite`-backed document store.
///
/// Documents are stored as JSON text keyed by (collection, id). Every
/// committed write bumps a persistent revision counter and publishes a
/// [`ChangeNotice`] to all listeners.
///
/// For file-backed stores the first [`listen`](DocumentStore::listen) also
/// starts a commit watcher, so writes made by other processes or other
/// handles on the same file reach this store's listeners too.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
    /// Change feed.
    changes: broadcast::Sender<ChangeNotice>,
    /// Highest revision announced on the change feed.
    published: Arc<AtomicU64>,
    /// Set once the commit watcher has been spawned.
    watching: AtomicBool,
    /// Stops the commit watcher.
    watcher: CancellationToken,
    /// Duplicate handling for array-union updates.
    array_union: ArrayUnionMode,
    /// Disambiguates ids generated within the same clock tick.
    id_seq: AtomicU64,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>, array_union: ArrayUnionMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening document store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;
        let revision = read_revision(&conn)?;

        info!("Document store opened at {}", path.display());
        Ok(Self::from_connection(path, conn, array_union, revision))
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(array_union: ArrayUnionMode) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self::from_connection(
            PathBuf::from(":memory:"),
            conn,
            array_union,
            0,
        ))
    }

    fn from_connection(
        path: PathBuf,
        conn: Connection,
        array_union: ArrayUnionMode,
        revision: u64,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            path,
            conn: Mutex::new(conn),
            changes,
            published: Arc::new(AtomicU64::new(revision)),
            watching: AtomicBool::new(false),
            watcher: CancellationToken::new(),
            array_union,
            id_seq: AtomicU64::new(0),
        }
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duplicate handling applied to array-union updates.
    #[must_use]
    pub fn array_union_mode(&self) -> ArrayUnionMode {
        self.array_union
    }

    /// Current store revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn revision(&self) -> Result<u64> {
        let conn = self.lock()?;
        read_revision(&conn)
    }

    /// Get store statistics for a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self, collection: &CollectionPath) -> Result<StoreStats> {
        let conn = self.lock()?;
        let documents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection.as_str()],
            |row| row.get(0),
        )?;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let last_write: Option<String> = conn
            .query_row(
                "SELECT MAX(updated_at) FROM documents WHERE collection = ?1",
                [collection.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let revision = read_revision(&conn)?;
        drop(conn);

        let db_size_bytes = if self.is_in_memory() {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            documents,
            users,
            revision,
            last_write,
            db_size_bytes,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("document store connection lock poisoned"))
    }

    /// Derive an opaque hex id that is unique within this process.
    fn generate_id(&self, domain: &str, len: usize) -> String {
        let seq = self.id_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        let hex = hasher.finalize().to_hex();
        hex[..len].to_string()
    }

    fn record_sign_in(&self, uid: &str, provider: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO users (uid, provider) VALUES (?1, ?2)
            ON CONFLICT(uid) DO UPDATE SET last_sign_in = datetime('now')
            ",
            params![uid, provider],
        )?;
        Ok(())
    }

    fn publish(&self, collection: &CollectionPath, revision: u64) {
        self.published.fetch_max(revision, Ordering::SeqCst);
        let notice = ChangeNotice {
            collection: collection.as_str().to_string(),
            revision,
        };
        // No receivers is not an error
        let delivered = self.changes.send(notice).unwrap_or(0);
        trace!(collection = %collection, revision, delivered, "Published change notice");
    }

    /// Spawn the commit watcher unless it is already running.
    fn start_watcher(&self) -> Result<()> {
        if self.is_in_memory() || self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let conn = Connection::open(&self.path).map_err(|source| Error::DatabaseOpen {
            path: self.path.clone(),
            source,
        })?;
        let watcher = CommitWatcher {
            conn,
            changes: self.changes.clone(),
            published: Arc::clone(&self.published),
        };
        let stop = self.watcher.clone();

        debug!(path = %self.path.display(), "Starting commit watcher");
        tokio::spawn(async move { watcher.run(stop).await });
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

/// Announces commits made through other connections to the same file.
///
/// Every write stamps the documents it touches with its revision, so the
/// watcher can tell which collections changed since the last announced
/// revision.
#[derive(Debug)]
struct CommitWatcher {
    conn: Connection,
    changes: broadcast::Sender<ChangeNotice>,
    published: Arc<AtomicU64>,
}

impl CommitWatcher {
    async fn run(self, stop: CancellationToken) {
        let mut ticker = interval(COMMIT_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.external_commits() {
                Ok(notices) => {
                    for notice in notices {
                        let collection = notice.collection.clone();
                        let revision = notice.revision;
                        let delivered = self.changes.send(notice).unwrap_or(0);
                        trace!(%collection, revision, delivered, "Announced external commit");
                    }
                }
                Err(e) => warn!(error = %e, "Commit watcher poll failed"),
            }
        }
        debug!("Commit watcher stopped");
    }

    /// Notices for collections written after the last announced revision,
    /// oldest first.
    fn external_commits(&self) -> Result<Vec<ChangeNotice>> {
        let seen = self.published.load(Ordering::SeqCst);
        // One read transaction so the revision and the rows agree
        let tx = self.conn.unchecked_transaction()?;
        let revision = read_revision(&tx)?;
        if revision <= seen {
            return Ok(Vec::new());
        }

        let mut stmt = tx.prepare(
            r"
            SELECT collection, MAX(revision) FROM documents
            WHERE revision > ?1
            GROUP BY collection
            ORDER BY MAX(revision)
            ",
        )?;
        let notices = stmt
            .query_map([revision_param(seen)], |row| {
                Ok(ChangeNotice {
                    collection: row.get(0)?,
                    revision: row.get::<_, i64>(1)?.try_into().unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(tx);

        self.published.fetch_max(revision, Ordering::SeqCst);
        Ok(notices)
    }
}


#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn sign_in_with_token(&self, token: &str) -> Result<UserId> {
        let token = token.trim();
        if token.is_empty()
            || token.len() > MAX_TOKEN_LEN
            || token.chars().any(char::is_whitespace)
        {
            return Err(Error::auth("malformed custom token"));
        }

        // The same token always maps to the same user
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"custom-token:");
        hasher.update(token.as_bytes());
        let uid = hasher.finalize().to_hex()[..USER_ID_LEN].to_string();

        self.record_sign_in(&uid, "custom")?;
        debug!(uid = %uid, "Signed in with custom token");
        Ok(UserId(uid))
    }

    async fn sign_in_anonymously(&self) -> Result<UserId> {
        let uid = self.generate_id("anonymous", USER_ID_LEN);
        self.record_sign_in(&uid, "anonymous")?;
        debug!(uid = %uid, "Signed in anonymously");
        Ok(UserId(uid))
    }

    async fn has_documents(&self, collection: &CollectionPath) -> Result<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = ?1)",
            [collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn write_batch(
        &self,
        collection: &CollectionPath,
        documents: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(documents.len());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let revision = bump_revision(&tx)?;
        for fields in documents {
            let id = self.generate_id(collection.as_str(), DOCUMENT_ID_LEN);
            let data = serde_json::to_string(&Value::Object(fields))?;
            tx.execute(
                "INSERT INTO documents (collection, id, data, revision) VALUES (?1, ?2, ?3, ?4)",
                params![collection.as_str(), id, data, revision_param(revision)],
            )?;
            ids.push(id);
        }
        tx.commit()?;
        drop(conn);

        info!(collection = %collection, count = ids.len(), revision, "Committed batch write");
        self.publish(collection, revision);
        Ok(ids)
    }

    async fn update_fields(&self, document: &DocumentRef, updates: &[FieldUpdate]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![document.collection.as_str(), document.id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Err(Error::DocumentNotFound {
                path: document.path(),
            });
        };

        let mut fields = match serde_json::from_str::<Value>(&data)? {
            Value::Object(fields) => fields,
            _ => {
                return Err(Error::internal(format!(
                    "stored document {document} is not an object"
                )))
            }
        };
        apply_updates(&mut fields, updates, self.array_union);

        let revision = bump_revision(&tx)?;
        tx.execute(
            r"
            UPDATE documents SET data = ?1, revision = ?2, updated_at = datetime('now')
            WHERE collection = ?3 AND id = ?4
            ",
            params![
                serde_json::to_string(&Value::Object(fields))?,
                revision_param(revision),
                document.collection.as_str(),
                document.id
            ],
        )?;
        tx.commit()?;
        drop(conn);

        debug!(
            document = %document,
            fields = ?updates.iter().map(FieldUpdate::field).collect::<Vec<_>>(),
            revision,
            "Merged field update"
        );
        self.publish(&document.collection, revision);
        Ok(())
    }

    async fn query(&self, collection: &CollectionPath) -> Result<CollectionSnapshot> {
        let conn = self.lock()?;
        let revision = read_revision(&conn)?;
        let mut stmt =
            conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map([collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let mut documents = Vec::with_capacity(rows.len());
        for (id, data) in rows {
            match serde_json::from_str::<Value>(&data)? {
                Value::Object(fields) => documents.push(Document { id, fields }),
                _ => {
                    return Err(Error::internal(format!(
                        "stored document {collection}/{id} is not an object"
                    )))
                }
            }
        }

        Ok(CollectionSnapshot {
            revision,
            documents,
        })
    }

    async fn listen(&self) -> Result<broadcast::Receiver<ChangeNotice>> {
        let feed = self.changes.subscribe();
        self.start_watcher()?;
        Ok(feed)
    }
}

fn read_revision(conn: &Connection) -> Result<u64> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [REVISION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid store revision: {value}"),
        }),
    }
}

fn revision_param(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn bump_revision(tx: &Transaction<'_>) -> Result<u64> {
    let next = read_revision(tx)? + 1;
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![REVISION_KEY, next.to_string()],
    )?;
    Ok(next)
}

/// Statistics about one collection of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Documents in the collection.
    pub documents: i64,
    /// Identities that have signed in.
    pub users: i64,
    /// Current store revision.
    pub revision: u64,
    /// Most recent write to the collection (UTC, `SQLite` datetime format).
    pub last_write: Option<String>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
