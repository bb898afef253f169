//! `SQLite` schema definitions for the document store.

/// SQL statement to create the documents table.
///
/// `seq` preserves insertion order across the whole store; `data` holds the
/// document's top-level fields as a JSON object. `revision` is the store
/// revision of the last write that touched the document.
pub const CREATE_DOCUMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (collection, id)
)
";

/// SQL statement to create an index for collection scans in insertion order.
pub const CREATE_COLLECTION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, seq)
";

/// SQL statement to create an index for finding documents written after a
/// given revision. Created by migration, since older databases lack the column.
pub const CREATE_REVISION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_documents_revision ON documents(revision)
";

/// SQL statement to create the users table.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    uid TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_sign_in TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_DOCUMENTS_TABLE,
    CREATE_COLLECTION_INDEX,
    CREATE_USERS_TABLE,
    CREATE_METADATA_TABLE,
];
