//! Failure-injecting store for exercising error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, Notify};

use super::{
    ArrayUnionMode, ChangeNotice, CollectionPath, CollectionSnapshot, DocumentRef, DocumentStore,
    FieldUpdate, SqliteStore, UserId,
};
use crate::error::{Error, Result};

/// Wraps an in-memory [`SqliteStore`], failing whichever calls are switched on.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_token: AtomicBool,
    pub fail_anonymous: AtomicBool,
    pub fail_has_documents: AtomicBool,
    pub fail_write_batch: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_query: AtomicBool,
    pub fail_listen: AtomicBool,
    /// When set, `listen` parks until the gate is notified.
    pub listen_gate: Option<Arc<Notify>>,
    pub token_attempts: AtomicUsize,
    pub anonymous_attempts: AtomicUsize,
    pub batch_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory(ArrayUnionMode::ValueEquality)
                .expect("failed to create in-memory store"),
            fail_token: AtomicBool::new(false),
            fail_anonymous: AtomicBool::new(false),
            fail_has_documents: AtomicBool::new(false),
            fail_write_batch: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            fail_listen: AtomicBool::new(false),
            listen_gate: None,
            token_attempts: AtomicUsize::new(0),
            anonymous_attempts: AtomicUsize::new(0),
            batch_writes: AtomicUsize::new(0),
        }
    }

    pub fn with_listen_gate(gate: Arc<Notify>) -> Self {
        Self {
            listen_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::internal(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyStore {
    async fn sign_in_with_token(&self, token: &str) -> Result<UserId> {
        self.token_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(Error::auth("injected token rejection"));
        }
        self.inner.sign_in_with_token(token).await
    }

    async fn sign_in_anonymously(&self) -> Result<UserId> {
        self.anonymous_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_anonymous.load(Ordering::SeqCst) {
            return Err(Error::auth("injected anonymous sign-in failure"));
        }
        self.inner.sign_in_anonymously().await
    }

    async fn has_documents(&self, collection: &CollectionPath) -> Result<bool> {
        Self::check(&self.fail_has_documents, "empty-check")?;
        self.inner.has_documents(collection).await
    }

    async fn write_batch(
        &self,
        collection: &CollectionPath,
        documents: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>> {
        Self::check(&self.fail_write_batch, "batch write")?;
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_batch(collection, documents).await
    }

    async fn update_fields(&self, document: &DocumentRef, updates: &[FieldUpdate]) -> Result<()> {
        Self::check(&self.fail_update, "update")?;
        self.inner.update_fields(document, updates).await
    }

    async fn query(&self, collection: &CollectionPath) -> Result<CollectionSnapshot> {
        Self::check(&self.fail_query, "query")?;
        self.inner.query(collection).await
    }

    async fn listen(&self) -> Result<broadcast::Receiver<ChangeNotice>> {
        if let Some(gate) = &self.listen_gate {
            gate.notified().await;
        }
        Self::check(&self.fail_listen, "listen")?;
        self.inner.listen().await
    }
}
