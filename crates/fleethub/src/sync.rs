//! Inventory synchronizer.
//!
//! [`InventorySync`] owns one authenticated session and one live
//! subscription to the vehicle collection. It walks the session through
//! Initializing → Authenticating → Seeding → Subscribed and reconciles every
//! inbound snapshot into an [`InventoryState`] published on a `watch`
//! channel. Any unrecoverable failure moves it to Error, after which the
//! state no longer changes.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{InventorySnapshot, StoreClient, Subscription, WriteOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Vehicle, VehicleStatus};
use crate::store::{FieldUpdate, UserId};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SyncPhase {
    /// Connected, nothing started yet.
    #[default]
    Initializing,
    /// Establishing an identity.
    Authenticating,
    /// Checking for and writing the fixture fleet.
    Seeding,
    /// Receiving live snapshots.
    Subscribed,
    /// Halted on an unrecoverable failure.
    Error,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Seeding => write!(f, "seeding"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Local view state, replaced wholesale from each snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventoryState {
    /// Current lifecycle phase.
    pub phase: SyncPhase,
    /// Authentication has completed, successfully or not.
    pub auth_ready: bool,
    /// Identity, if authentication succeeded.
    pub user: Option<UserId>,
    /// Vehicles from the latest snapshot.
    pub vehicles: Vec<Vehicle>,
    /// The vehicle open in the detail view.
    pub selected: Option<Vehicle>,
    /// Revision of the latest snapshot; `None` until the first arrives.
    pub revision: Option<u64>,
    /// Documents skipped from the latest snapshot.
    pub rejected: usize,
    /// User-facing message once in [`SyncPhase::Error`].
    pub error: Option<String>,
}

impl InventoryState {
    /// Whether the first snapshot is still outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.revision.is_none() && self.phase != SyncPhase::Error
    }

    /// Look up a vehicle by id in the latest snapshot.
    #[must_use]
    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    /// Replace the vehicle list and refresh the open detail view by id.
    ///
    /// A selection whose id is absent from the snapshot is left as it was.
    pub fn apply_snapshot(&mut self, snapshot: InventorySnapshot) {
        if self.phase == SyncPhase::Error {
            return;
        }

        self.vehicles = snapshot.vehicles;
        self.revision = Some(snapshot.revision);
        self.rejected = snapshot.rejected;

        if let Some(selected) = &self.selected {
            if let Some(fresh) = self.vehicles.iter().find(|v| v.id == selected.id) {
                self.selected = Some(fresh.clone());
            }
        }
    }

    fn transition(&mut self, phase: SyncPhase) {
        if self.phase == SyncPhase::Error {
            return;
        }
        debug!(from = %self.phase, to = %phase, "Sync phase transition");
        self.phase = phase;
    }

    fn fail(&mut self, error: &Error) {
        if self.phase == SyncPhase::Error {
            return;
        }
        self.phase = SyncPhase::Error;
        self.error = Some(error.to_string());
    }
}

/// Owns the session and live subscription for one tenant's fleet.
#[derive(Debug)]
pub struct InventorySync {
    client: StoreClient,
    auth_token: Option<String>,
    session: CancellationToken,
    state: Arc<watch::Sender<InventoryState>>,
    subscription: Mutex<Subscription>,
}

impl InventorySync {
    /// Connect to the configured store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the backend configuration is
    /// missing or malformed, or a storage error if the store cannot be opened.
    pub fn connect(config: &Config) -> Result<Self> {
        let client = StoreClient::connect(config)?;
        Ok(Self::from_client(
            client,
            config.auth_token().map(str::to_string),
        ))
    }

    /// Build a synchronizer over an existing client.
    #[must_use]
    pub fn from_client(client: StoreClient, auth_token: Option<String>) -> Self {
        let (state, _) = watch::channel(InventoryState::default());
        Self {
            client,
            auth_token,
            session: CancellationToken::new(),
            state: Arc::new(state),
            subscription: Mutex::new(Subscription::detached()),
        }
    }

    /// Authenticate, seed if empty, then subscribe.
    ///
    /// `fixtures` is the fleet written to an empty collection; `None`
    /// disables seeding. If the session is shut down while starting, no
    /// subscription is created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataSetup`] if seeding fails. The synchronizer is
    /// left in [`SyncPhase::Error`]. Authentication failures are logged and
    /// do not stop the session.
    pub async fn start(&self, fixtures: Option<&[Vehicle]>) -> Result<()> {
        if self.halted() {
            debug!("Session closed before start");
            return Ok(());
        }

        self.state
            .send_modify(|s| s.transition(SyncPhase::Authenticating));
        let user = match self.client.authenticate(self.auth_token.as_deref()).await {
            Ok(uid) => Some(uid),
            Err(e) => {
                warn!(error = %e, "Continuing without an identity");
                None
            }
        };
        self.state.send_modify(|s| {
            s.auth_ready = true;
            s.user = user;
        });
        if self.halted() {
            debug!("Session closed during authentication");
            return Ok(());
        }

        self.state.send_modify(|s| s.transition(SyncPhase::Seeding));
        if let Some(fleet) = fixtures {
            if let Err(e) = self.client.ensure_seeded(fleet).await {
                warn!(error = %e, "Fleet setup failed");
                self.state.send_modify(|s| s.fail(&e));
                return Err(e);
            }
        }
        if self.halted() {
            debug!("Session closed during seeding");
            return Ok(());
        }

        let snapshot_state = Arc::clone(&self.state);
        let error_state = Arc::clone(&self.state);
        let subscription = self.client.subscribe(
            &self.session,
            move |snapshot| snapshot_state.send_modify(|s| s.apply_snapshot(snapshot)),
            move |error| error_state.send_modify(|s| s.fail(&error)),
        );
        *self
            .subscription
            .lock()
            .map_err(|_| Error::internal("subscription lock poisoned"))? = subscription;

        self.state.send_modify(|s| s.transition(SyncPhase::Subscribed));
        info!(collection = %self.client.collection(), "Inventory subscription started");
        Ok(())
    }

    /// Flip a vehicle between Available and Rented.
    ///
    /// The new status is computed from the local copy; the change shows up
    /// when the next snapshot arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DocumentNotFound`] if the vehicle is not in the
    /// current snapshot. Write failures are logged and reported as
    /// [`WriteOutcome::Failed`].
    pub async fn toggle_status(&self, vehicle_id: &str) -> Result<WriteOutcome> {
        let current = self
            .state
            .borrow()
            .vehicle(vehicle_id)
            .map(|v| v.status)
            .ok_or_else(|| Error::DocumentNotFound {
                path: self.client.collection().doc(vehicle_id).path(),
            })?;
        let next: VehicleStatus = current.toggled();

        debug!(vehicle = vehicle_id, from = %current, to = %next, "Toggling status");
        Ok(self
            .client
            .merge(vehicle_id, &[FieldUpdate::set("status", next.as_str())])
            .await)
    }

    /// Open the detail view for a vehicle in the current snapshot.
    pub fn open_detail(&self, vehicle_id: &str) -> Option<Vehicle> {
        let mut opened = None;
        self.state.send_modify(|s| {
            if let Some(vehicle) = s.vehicle(vehicle_id).cloned() {
                s.selected = Some(vehicle.clone());
                opened = Some(vehicle);
            }
        });
        opened
    }

    /// Close the detail view.
    pub fn close_detail(&self) {
        self.state.send_if_modified(|s| s.selected.take().is_some());
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InventoryState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<InventoryState> {
        self.state.subscribe()
    }

    /// The underlying store client.
    #[must_use]
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    /// Wait for the first snapshot, an error, or shutdown.
    pub async fn wait_until_loaded(&self) -> InventoryState {
        self.wait_for(|s| !s.is_loading()).await
    }

    /// Wait for a snapshot newer than `revision`, an error, or shutdown.
    pub async fn wait_for_revision_after(&self, revision: Option<u64>) -> InventoryState {
        self.wait_for(|s| s.phase == SyncPhase::Error || s.revision > revision)
            .await
    }

    async fn wait_for(&self, ready: impl FnMut(&InventoryState) -> bool) -> InventoryState {
        let mut rx = self.state.subscribe();
        tokio::select! {
            result = rx.wait_for(ready) => match result {
                Ok(state) => state.clone(),
                Err(_) => self.state(),
            },
            () = self.session.cancelled() => self.state(),
        }
    }

    /// End the session and its subscription.
    ///
    /// Idempotent, and safe before the subscription exists.
    pub fn shutdown(&self) {
        if self.session.is_cancelled() {
            return;
        }
        info!("Shutting down inventory session");
        self.session.cancel();
        if let Ok(subscription) = self.subscription.lock() {
            subscription.unsubscribe();
        }
    }

    /// Whether the session has ended or failed.
    fn halted(&self) -> bool {
        self.session.is_cancelled() || self.state.borrow().phase == SyncPhase::Error
    }
}

impl Drop for InventorySync {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::default_fleet;
    use crate::model::tests::sample_vehicle;
    use crate::store::testing::FlakyStore;
    use crate::store::{ArrayUnionMode, DocumentStore, SqliteStore};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn flaky_sync(token: Option<&str>) -> (Arc<FlakyStore>, InventorySync) {
        crate::logging::init_test_logging();
        let store = Arc::new(FlakyStore::new());
        let client = StoreClient::with_store(store.clone(), "test-tenant");
        let sync = InventorySync::from_client(client, token.map(str::to_string));
        (store, sync)
    }

    async fn loaded(sync: &InventorySync) -> InventoryState {
        tokio::time::timeout(WAIT, sync.wait_until_loaded())
            .await
            .expect("timed out waiting for first snapshot")
    }

    async fn next_revision(sync: &InventorySync, after: Option<u64>) -> InventoryState {
        tokio::time::timeout(WAIT, sync.wait_for_revision_after(after))
            .await
            .expect("timed out waiting for snapshot")
    }

    fn snapshot(revision: u64, vehicles: Vec<Vehicle>) -> InventorySnapshot {
        InventorySnapshot {
            revision,
            vehicles,
            rejected: 0,
        }
    }

    fn vehicle(id: &str, mileage: u64) -> Vehicle {
        let mut v = sample_vehicle();
        v.id = id.to_string();
        v.current_mileage = mileage;
        v
    }

    #[test]
    fn test_initial_state() {
        let state = InventoryState::default();
        assert_eq!(state.phase, SyncPhase::Initializing);
        assert!(!state.auth_ready);
        assert!(state.is_loading());
        assert!(state.vehicles.is_empty());
    }

    #[test]
    fn test_apply_snapshot_refreshes_selection_by_id() {
        let mut state = InventoryState {
            selected: Some(vehicle("a", 100)),
            ..InventoryState::default()
        };
        state.apply_snapshot(snapshot(1, vec![vehicle("a", 250), vehicle("b", 5)]));

        assert_eq!(state.vehicles.len(), 2);
        assert_eq!(state.selected.as_ref().unwrap().current_mileage, 250);
        assert_eq!(state.revision, Some(1));
        assert!(!state.is_loading());
    }

    #[test]
    fn test_apply_snapshot_keeps_stale_selection() {
        let mut state = InventoryState {
            selected: Some(vehicle("gone", 100)),
            ..InventoryState::default()
        };
        state.apply_snapshot(snapshot(3, vec![vehicle("b", 5)]));

        let selected = state.selected.unwrap();
        assert_eq!(selected.id, "gone");
        assert_eq!(selected.current_mileage, 100);
        assert_eq!(state.vehicles.len(), 1);
    }

    #[test]
    fn test_error_state_is_terminal() {
        let mut state = InventoryState::default();
        state.fail(&Error::fetch("listener dropped"));
        state.transition(SyncPhase::Subscribed);
        state.apply_snapshot(snapshot(1, vec![vehicle("a", 1)]));
        state.fail(&Error::data_setup("second"));

        assert_eq!(state.phase, SyncPhase::Error);
        assert!(state.vehicles.is_empty());
        assert!(!state.is_loading());
        assert!(state.error.unwrap().contains("listener dropped"));
    }

    #[tokio::test]
    async fn test_start_seeds_and_loads() {
        let (store, sync) = flaky_sync(Some("bootstrap"));
        let fleet = default_fleet().unwrap();
        sync.start(Some(&fleet)).await.unwrap();

        let state = loaded(&sync).await;
        assert_eq!(state.phase, SyncPhase::Subscribed);
        assert!(state.auth_ready);
        assert!(state.user.is_some());
        assert_eq!(state.vehicles.len(), 6);
        assert!(state.error.is_none());
        assert_eq!(store.batch_writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_session_does_not_reseed() {
        let store = Arc::new(FlakyStore::new());
        let fleet = default_fleet().unwrap();

        for _ in 0..2 {
            let client = StoreClient::with_store(store.clone(), "test-tenant");
            let sync = InventorySync::from_client(client, None);
            sync.start(Some(&fleet)).await.unwrap();
            assert_eq!(loaded(&sync).await.vehicles.len(), 6);
            sync.shutdown();
        }
        assert_eq!(store.batch_writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seeding_disabled() {
        let (store, sync) = flaky_sync(None);
        sync.start(None).await.unwrap();

        let state = loaded(&sync).await;
        assert_eq!(state.phase, SyncPhase::Subscribed);
        assert!(state.vehicles.is_empty());
        assert_eq!(store.batch_writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_fatal() {
        let (store, sync) = flaky_sync(Some("bad"));
        FlakyStore::set(&store.fail_token, true);
        FlakyStore::set(&store.fail_anonymous, true);

        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        assert!(state.auth_ready);
        assert!(state.user.is_none());
        assert_eq!(state.phase, SyncPhase::Subscribed);
        assert_eq!(state.vehicles.len(), 6);
    }

    #[tokio::test]
    async fn test_seed_failure_halts_in_error() {
        let (store, sync) = flaky_sync(None);
        FlakyStore::set(&store.fail_write_batch, true);

        let err = sync.start(Some(&default_fleet().unwrap())).await.unwrap_err();
        assert!(matches!(err, Error::DataSetup { .. }));

        let state = loaded(&sync).await;
        assert_eq!(state.phase, SyncPhase::Error);
        assert!(state.auth_ready);
        assert!(state.error.unwrap().contains("set up fleet data"));
    }

    #[tokio::test]
    async fn test_fetch_failure_halts_in_error() {
        let (store, sync) = flaky_sync(None);
        FlakyStore::set(&store.fail_query, true);

        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        assert_eq!(state.phase, SyncPhase::Error);
        assert!(state.vehicles.is_empty());
        assert!(state.error.unwrap().contains("fetch"));
    }

    #[tokio::test]
    async fn test_toggle_status_round_trip() {
        let (_store, sync) = flaky_sync(None);
        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;

        let target = state
            .vehicles
            .iter()
            .find(|v| v.status == VehicleStatus::Available)
            .unwrap()
            .clone();
        let outcome = sync.toggle_status(&target.id).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Saved);

        let state = next_revision(&sync, state.revision).await;
        assert_eq!(state.vehicle(&target.id).unwrap().status, VehicleStatus::Rented);

        sync.toggle_status(&target.id).await.unwrap();
        let state = next_revision(&sync, state.revision).await;
        assert_eq!(
            state.vehicle(&target.id).unwrap().status,
            VehicleStatus::Available
        );
    }

    #[tokio::test]
    async fn test_toggle_unknown_vehicle() {
        let (_store, sync) = flaky_sync(None);
        sync.start(None).await.unwrap();
        loaded(&sync).await;

        let err = sync.toggle_status("missing").await.unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_toggle_write_failure_is_swallowed() {
        let (store, sync) = flaky_sync(None);
        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        let target = state.vehicles[0].clone();

        FlakyStore::set(&store.fail_update, true);
        let outcome = sync.toggle_status(&target.id).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Failed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = sync.state();
        assert_eq!(state.vehicle(&target.id).unwrap().status, target.status);
        assert_eq!(state.phase, SyncPhase::Subscribed);
    }

    #[tokio::test]
    async fn test_open_detail_reflects_background_update() {
        let (store, sync) = flaky_sync(None);
        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        let id = state.vehicles[2].id.clone();

        let opened = sync.open_detail(&id).unwrap();
        assert_eq!(opened.id, id);

        // Another client writes while the detail view is open
        store
            .update_fields(
                &sync.client().collection().doc(&id),
                &[FieldUpdate::set("currentMileage", 31_337)],
            )
            .await
            .unwrap();

        let state = next_revision(&sync, state.revision).await;
        let selected = state.selected.unwrap();
        assert_eq!(selected.id, id);
        assert_eq!(selected.current_mileage, 31_337);

        sync.close_detail();
        assert!(sync.state().selected.is_none());
        let reopened = sync.open_detail(&id).unwrap();
        assert_eq!(reopened.current_mileage, 31_337);
    }

    #[tokio::test]
    async fn test_open_detail_reflects_write_from_other_client() {
        crate::logging::init_test_logging();
        let dir = std::env::temp_dir().join(format!(
            "fleethub_sync_test_{}_other_client",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let db_path = dir.join("fleet.db");

        let ours = Arc::new(SqliteStore::open(&db_path, ArrayUnionMode::ValueEquality).unwrap());
        let sync = InventorySync::from_client(StoreClient::with_store(ours, "test-tenant"), None);
        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        let target = state.vehicles[0].clone();
        sync.open_detail(&target.id).unwrap();

        // A second handle on the same file stands in for another process
        let theirs = Arc::new(SqliteStore::open(&db_path, ArrayUnionMode::ValueEquality).unwrap());
        let other = StoreClient::with_store(theirs, "test-tenant");
        other
            .update_fields(
                &target.id,
                &[
                    FieldUpdate::set("status", target.status.toggled().as_str()),
                    FieldUpdate::set("currentMileage", 42_000),
                ],
            )
            .await
            .unwrap();

        let state = next_revision(&sync, state.revision).await;
        let selected = state.selected.unwrap();
        assert_eq!(selected.id, target.id);
        assert_eq!(selected.status, target.status.toggled());
        assert_eq!(selected.current_mileage, 42_000);

        sync.shutdown();
        drop(sync);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_open_detail_unknown_vehicle() {
        let (_store, sync) = flaky_sync(None);
        sync.start(None).await.unwrap();
        loaded(&sync).await;
        assert!(sync.open_detail("missing").is_none());
        assert!(sync.state().selected.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let (store, sync) = flaky_sync(None);
        sync.shutdown();
        sync.shutdown();

        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = sync.state();
        assert_eq!(state.phase, SyncPhase::Initializing);
        assert!(!state.auth_ready);
        assert_eq!(store.batch_writes.load(std::sync::atomic::Ordering::SeqCst), 0);

        // Resolves immediately instead of waiting for a snapshot
        let state = loaded(&sync).await;
        assert!(state.revision.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_snapshots() {
        let (store, sync) = flaky_sync(None);
        sync.start(Some(&default_fleet().unwrap())).await.unwrap();
        let state = loaded(&sync).await;
        let id = state.vehicles[0].id.clone();

        sync.shutdown();
        store
            .update_fields(
                &sync.client().collection().doc(&id),
                &[FieldUpdate::set("currentMileage", 1)],
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sync.state().revision, state.revision);
    }

    #[tokio::test]
    async fn test_watch_observes_phase_changes() {
        let (_store, sync) = flaky_sync(None);
        let rx = sync.watch();
        assert_eq!(rx.borrow().phase, SyncPhase::Initializing);

        sync.start(None).await.unwrap();
        assert_eq!(rx.borrow().phase, SyncPhase::Subscribed);
        assert!(rx.borrow().auth_ready);
    }
}
