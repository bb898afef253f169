//! Remote store client.
//!
//! [`StoreClient`] binds a [`DocumentStore`] to one tenant's vehicle
//! collection and exposes the session operations the synchronizer drives:
//! connect, authenticate, seed-if-empty, subscribe and field-merge updates.
//! Store errors are mapped into the session error taxonomy here.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Vehicle;
use crate::store::{
    CollectionPath, CollectionSnapshot, DocumentStore, FieldUpdate, SqliteStore, UserId,
};

/// Decoded contents of the vehicle collection.
#[derive(Debug, Clone, PartialEq)]
pub struct InventorySnapshot {
    /// Store revision the snapshot was read at.
    pub revision: u64,
    /// Vehicles in insertion order.
    pub vehicles: Vec<Vehicle>,
    /// Documents skipped because they did not decode as a vehicle.
    pub rejected: usize,
}

impl InventorySnapshot {
    /// Decode raw documents, skipping malformed ones.
    #[must_use]
    pub fn decode(snapshot: CollectionSnapshot) -> Self {
        let mut vehicles = Vec::with_capacity(snapshot.documents.len());
        let mut rejected = 0;

        for document in snapshot.documents {
            match serde_json::from_value::<Vehicle>(Value::Object(document.fields)) {
                Ok(mut vehicle) => {
                    vehicle.id = document.id;
                    vehicles.push(vehicle);
                }
                Err(e) => {
                    warn!(id = %document.id, error = %e, "Rejected malformed vehicle document");
                    rejected += 1;
                }
            }
        }

        Self {
            revision: snapshot.revision,
            vehicles,
            rejected,
        }
    }
}

/// Result of a write whose failure is logged rather than propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The store accepted the update.
    Saved,
    /// The store rejected the update; the failure was logged.
    Failed,
}

/// Handle to a live subscription.
///
/// Unsubscribing is idempotent and safe at any point, including before the
/// listener has attached. Once unsubscribed no further callback fires.
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    /// A handle with no listener behind it.
    #[must_use]
    pub fn detached() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }

    /// Stop the listener.
    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            debug!("Unsubscribing from vehicle collection");
            self.token.cancel();
        }
    }

    /// Whether the listener may still deliver callbacks.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Client for one tenant's vehicle collection.
#[derive(Debug, Clone)]
pub struct StoreClient {
    store: Arc<dyn DocumentStore>,
    collection: CollectionPath,
}

impl StoreClient {
    /// Connect to the store described by the injected backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the backend configuration is
    /// missing or malformed, or a storage error if the database cannot be opened.
    pub fn connect(config: &Config) -> Result<Self> {
        let store = open_store(config)?;
        info!(
            tenant = %config.tenant.app_id,
            path = %store.path().display(),
            "Connected to document store"
        );
        Ok(Self::with_store(Arc::new(store), &config.tenant.app_id))
    }

    /// Build a client over an existing store.
    #[must_use]
    pub fn with_store(store: Arc<dyn DocumentStore>, tenant_id: &str) -> Self {
        Self {
            store,
            collection: CollectionPath::cars_for_tenant(tenant_id),
        }
    }

    /// The vehicle collection this client addresses.
    #[must_use]
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Establish an identity.
    ///
    /// Uses the token if one is given, falling back to an anonymous identity
    /// if the token is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailure`] only if both paths fail.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserId> {
        if let Some(token) = token {
            match self.store.sign_in_with_token(token).await {
                Ok(uid) => {
                    info!(uid = %uid, "Authenticated with custom token");
                    return Ok(uid);
                }
                Err(e) => warn!(error = %e, "Custom token rejected, falling back to anonymous sign-in"),
            }
        }

        match self.store.sign_in_anonymously().await {
            Ok(uid) => {
                info!(uid = %uid, "Authenticated anonymously");
                Ok(uid)
            }
            Err(e @ Error::AuthFailure { .. }) => Err(e),
            Err(e) => Err(Error::auth(e.to_string())),
        }
    }

    /// Write the fixture fleet as one batch if the collection is empty.
    ///
    /// Returns whether seeding happened. Concurrent seeders are not guarded
    /// against.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataSetup`] if the empty-check or the batch write fails.
    pub async fn ensure_seeded(&self, fleet: &[Vehicle]) -> Result<bool> {
        let populated = self
            .store
            .has_documents(&self.collection)
            .await
            .map_err(|e| Error::data_setup(e.to_string()))?;
        if populated {
            debug!(collection = %self.collection, "Collection already populated, skipping seed");
            return Ok(false);
        }

        let documents = fleet
            .iter()
            .map(vehicle_document)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::data_setup(e.to_string()))?;
        let ids = self
            .store
            .write_batch(&self.collection, documents)
            .await
            .map_err(|e| Error::data_setup(e.to_string()))?;

        info!(collection = %self.collection, count = ids.len(), "Seeded empty collection");
        Ok(!ids.is_empty())
    }

    /// Register a live listener on the vehicle collection.
    ///
    /// `on_snapshot` receives the full collection once the listener attaches
    /// and again after every change. `on_error` receives at most one
    /// [`Error::Fetch`], after which the listener stops. The listener also
    /// stops when `parent` is cancelled.
    pub fn subscribe<S, E>(
        &self,
        parent: &CancellationToken,
        on_snapshot: S,
        on_error: E,
    ) -> Subscription
    where
        S: FnMut(InventorySnapshot) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let token = parent.child_token();
        let listener = Listener {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
            token: token.clone(),
        };

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = listener.token.cancelled() => {
                    debug!(collection = %listener.collection, "Listener cancelled");
                }
                result = listener.run(on_snapshot) => {
                    if let Err(e) = result {
                        if listener.token.is_cancelled() {
                            debug!(error = %e, "Listener failed after cancellation");
                        } else {
                            warn!(error = %e, "Vehicle listener failed");
                            on_error(into_fetch(e));
                        }
                    }
                }
            }
        });

        Subscription { token }
    }

    /// Merge field updates into one vehicle document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the store rejects the update.
    pub async fn update_fields(&self, vehicle_id: &str, updates: &[FieldUpdate]) -> Result<()> {
        let document = self.collection.doc(vehicle_id);
        self.store
            .update_fields(&document, updates)
            .await
            .map_err(|e| Error::write(document.path(), e.to_string()))?;
        debug!(document = %document, updates = updates.len(), "Vehicle updated");
        Ok(())
    }

    /// Merge field updates, logging and swallowing a write failure.
    pub async fn merge(&self, vehicle_id: &str, updates: &[FieldUpdate]) -> WriteOutcome {
        match self.update_fields(vehicle_id, updates).await {
            Ok(()) => WriteOutcome::Saved,
            Err(e) => {
                warn!(error = %e, "Vehicle update failed");
                WriteOutcome::Failed
            }
        }
    }
}

/// Open the `SQLite` store named by the backend configuration.
///
/// # Errors
///
/// Returns [`Error::ConfigInvalid`] if the backend configuration is missing
/// or malformed, or a storage error if the database cannot be opened.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    let backend = config.backend_config()?;
    debug!(project = %backend.project_id, in_memory = backend.in_memory, "Opening backend");
    if backend.in_memory {
        SqliteStore::open_in_memory(config.store.array_union)
    } else {
        SqliteStore::open(backend.database_path(), config.store.array_union)
    }
}

#[derive(Debug)]
struct Listener {
    store: Arc<dyn DocumentStore>,
    collection: CollectionPath,
    token: CancellationToken,
}

impl Listener {
    async fn run<S>(&self, mut on_snapshot: S) -> Result<()>
    where
        S: FnMut(InventorySnapshot),
    {
        // Attach before the first read so no change between the two is missed
        let mut feed = self.store.listen().await?;
        let mut delivered = None;
        self.deliver(&mut on_snapshot, &mut delivered).await?;

        loop {
            match feed.recv().await {
                Ok(notice) if notice.collection == self.collection.as_str() => {
                    trace!(revision = notice.revision, "Change notice received");
                    self.deliver(&mut on_snapshot, &mut delivered).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Change feed lagged, re-reading collection");
                    self.deliver(&mut on_snapshot, &mut delivered).await?;
                }
                Err(RecvError::Closed) => return Err(Error::fetch("change feed closed")),
            }
        }
    }

    async fn deliver<S>(&self, on_snapshot: &mut S, delivered: &mut Option<u64>) -> Result<()>
    where
        S: FnMut(InventorySnapshot),
    {
        let snapshot = self.store.query(&self.collection).await?;
        if self.token.is_cancelled() {
            return Ok(());
        }
        // Several notices may be answered by one read
        if *delivered == Some(snapshot.revision) {
            return Ok(());
        }
        *delivered = Some(snapshot.revision);

        let inventory = InventorySnapshot::decode(snapshot);
        debug!(
            revision = inventory.revision,
            vehicles = inventory.vehicles.len(),
            rejected = inventory.rejected,
            "Delivering snapshot"
        );
        on_snapshot(inventory);
        Ok(())
    }
}

fn vehicle_document(vehicle: &Vehicle) -> Result<Map<String, Value>> {
    match serde_json::to_value(vehicle)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(Error::internal("vehicle did not serialize to an object")),
    }
}

fn into_fetch(error: Error) -> Error {
    match error {
        e @ Error::Fetch { .. } => e,
        other => Error::fetch(other.to_string()),
    }
}
