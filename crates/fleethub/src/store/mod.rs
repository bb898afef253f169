//! Document store layer for fleethub.
//!
//! [`DocumentStore`] is the seam between the fleet logic and the realtime
//! document database: identity (custom-token and anonymous sign-in),
//! collection reads, atomic batch writes, field-merge updates, and a change
//! feed that drives live subscriptions. [`SqliteStore`] is the bundled
//! implementation.

pub mod document;
pub mod migrations;
pub mod schema;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::Result;

pub use document::{
    apply_updates, json_number, ArrayUnionMode, ChangeNotice, CollectionPath, CollectionSnapshot,
    Document, DocumentRef, FieldUpdate, UserId,
};
pub use sqlite::{SqliteStore, StoreStats};

/// A realtime document database.
///
/// Implementations must apply each write atomically and publish a
/// [`ChangeNotice`] after every committed write, in commit order.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Sign in with a pre-issued custom token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected.
    async fn sign_in_with_token(&self, token: &str) -> Result<UserId>;

    /// Create a fresh anonymous identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be created.
    async fn sign_in_anonymously(&self) -> Result<UserId>;

    /// Check whether the collection holds at least one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn has_documents(&self, collection: &CollectionPath) -> Result<bool>;

    /// Insert documents as one atomic batch, returning their assigned ids.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is written in that case.
    async fn write_batch(
        &self,
        collection: &CollectionPath,
        documents: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>>;

    /// Merge the given field updates into an existing document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not exist or the write fails.
    async fn update_fields(&self, document: &DocumentRef, updates: &[FieldUpdate]) -> Result<()>;

    /// Read the full collection in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn query(&self, collection: &CollectionPath) -> Result<CollectionSnapshot>;

    /// Open a change feed. Notices for every collection are delivered;
    /// receivers filter by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be opened.
    async fn listen(&self) -> Result<broadcast::Receiver<ChangeNotice>>;
}
