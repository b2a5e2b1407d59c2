//! The sync cycle.
//!
//! A cycle runs a push phase and then a pull phase:
//!
//! 1. **Push** lists the remote catalog once, retries pending remote
//!    deletes (tombstones), then saves every conversation with unsynced
//!    changes to the blob store and records it in the metadata registry.
//!    A conversation whose remote copy is strictly newer is left for the
//!    pull phase instead of being overwritten.
//! 2. **Pull** lists the remote catalog and downloads every blob whose
//!    `modified_time` is strictly newer than the local `updated_at`, or that
//!    has no local copy at all.
//!
//! Conflicts resolve by timestamp: the newer side overwrites the other and
//! nothing is merged.  Failures of individual conversations are logged,
//! counted in the [`SyncReport`] and retried next cycle; only an
//! authorization failure stops the rest of the cycle.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use convsync_shared::protocol::{ConversationUpsert, RemoteFileEntry};
use convsync_shared::{Conversation, ConversationId, FileId};
use convsync_store::{LocalStore, SqliteLocalStore, StoreError, Tombstone};

use crate::config::{ClientConfig, SyncConfig};
use crate::error::{EngineError, RemoteError, SyncError};
use crate::http::HttpSyncClient;
use crate::remote::{RegistryClient, RemoteBlobStore};
use crate::status::{SyncPhase, SyncReport, SyncStatus};

/// Reconciles a device's [`LocalStore`] with the remote blob store.
pub struct SyncEngine {
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) remote: Arc<dyn RemoteBlobStore>,
    pub(crate) registry: Arc<dyn RegistryClient>,
    config: SyncConfig,
    /// Held for the duration of a cycle.
    cycle: Mutex<()>,
    status: watch::Sender<SyncStatus>,
}

enum PushOutcome {
    Pushed,
    /// The remote copy is newer; the pull phase takes it.
    Deferred,
}

enum PullOutcome {
    Updated,
    UpToDate,
    Ignored,
}

/// One remote listing, indexed by blob name.
pub(crate) struct RemoteCatalog {
    by_name: HashMap<String, RemoteFileEntry>,
}

impl RemoteCatalog {
    pub(crate) fn new(entries: Vec<RemoteFileEntry>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        for entry in entries {
            match by_name.entry(entry.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => {
                    if entry.modified_time > slot.get().modified_time {
                        slot.insert(entry);
                    }
                }
            }
        }
        Self { by_name }
    }

    pub(crate) fn get(&self, id: &ConversationId) -> Option<&RemoteFileEntry> {
        self.by_name.get(&id.blob_name())
    }
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteBlobStore>,
        registry: Arc<dyn RegistryClient>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            local,
            remote,
            registry,
            config,
            cycle: Mutex::new(()),
            status,
        }
    }

    /// Wire an engine to the device database and the HTTP server described
    /// by `config`.
    pub fn connect(config: &ClientConfig) -> Result<Self, EngineError> {
        let local = match &config.db_path {
            Some(path) => SqliteLocalStore::open_at(path)?,
            None => SqliteLocalStore::open_default()?,
        };
        let client = Arc::new(HttpSyncClient::new(
            &config.server_url,
            config.auth_token.clone(),
            config.request_timeout,
        )?);

        info!(
            server = %config.server_url,
            owner = %config.owner_id,
            "sync engine connected"
        );

        Ok(Self::new(
            Arc::new(local),
            client.clone(),
            client,
            config.sync_config(),
        ))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Run one push + pull cycle.
    ///
    /// Never fails: per-conversation errors are logged and reported in the
    /// returned [`SyncReport`] and in [`SyncEngine::status`].  If a cycle is
    /// already running the call returns immediately with a skipped report.
    pub async fn sync_now(&self) -> SyncReport {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("sync cycle already in progress, skipping");
            return SyncReport::skipped();
        };

        let mut report = SyncReport::default();

        self.set_phase(SyncPhase::Pushing);
        self.push_phase(&mut report).await;

        if report.halted_unauthorized {
            warn!("not authorized, skipping pull phase");
        } else {
            self.set_phase(SyncPhase::Pulling);
            self.pull_phase(&mut report).await;
        }

        let unsynced = match self.local.count_unsynced().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "failed to count unsynced conversations");
                None
            }
        };

        self.status.send_modify(|status| {
            status.phase = SyncPhase::Idle;
            status.last_error = report.errors.last().cloned();
            if let Some(count) = unsynced {
                status.unsynced_count = count;
            }
            status.last_completed_at = Some(Utc::now());
            status.last_report = Some(report.clone());
        });

        info!(
            pushed = report.pushed,
            push_failures = report.push_failures,
            deferred = report.deferred,
            remote_deletes = report.remote_deletes,
            pulled = report.pulled,
            pull_failures = report.pull_failures,
            up_to_date = report.up_to_date,
            halted = report.halted_unauthorized,
            "sync cycle finished"
        );

        report
    }

    /// Start background cycles every `auto_sync_interval`.  Returns `None`
    /// when the engine is configured to sync only on demand.
    pub fn start_auto_sync(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.config.auto_sync_interval.filter(|p| !p.is_zero())?;
        info!(period_secs = period.as_secs(), "automatic sync enabled");
        Some(self.spawn_auto_sync(period))
    }

    /// Run [`sync_now`](Self::sync_now) every `period` until the returned
    /// task is aborted.  The first cycle starts immediately.  `period` must
    /// be non-zero.
    pub fn spawn_auto_sync(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.sync_now().await;
            }
        })
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    async fn push_phase(&self, report: &mut SyncReport) {
        let tombstones = match self.local.list_tombstones().await {
            Ok(tombstones) => tombstones,
            Err(e) => {
                record_store_failure(report, "listing tombstones", e);
                Vec::new()
            }
        };
        let pending = match self.local.list_unsynced().await {
            Ok(pending) => pending,
            Err(e) => {
                record_store_failure(report, "listing unsynced conversations", e);
                Vec::new()
            }
        };
        if tombstones.is_empty() && pending.is_empty() {
            return;
        }

        let catalog = match self.remote_call(self.remote.list(&self.config.owner)).await {
            Ok(entries) => RemoteCatalog::new(entries),
            Err(e) => {
                if e == RemoteError::Unauthorized {
                    report.halted_unauthorized = true;
                }
                warn!(error = %e, "failed to list remote conversations, nothing pushed");
                report.push_failures += pending.len();
                report.errors.push(format!("list: {e}"));
                return;
            }
        };

        for tombstone in tombstones {
            if report.halted_unauthorized {
                return;
            }
            match self.push_tombstone(&tombstone, Some(&catalog)).await {
                Ok(()) => report.remote_deletes += 1,
                Err(e) => self.record_failure(report, "delete", &tombstone.conversation_id, e),
            }
        }

        debug!(count = pending.len(), "pushing unsynced conversations");

        for conversation in pending {
            if report.halted_unauthorized {
                return;
            }
            let id = conversation.id.clone();
            match self.push_conversation(conversation, &catalog).await {
                Ok(PushOutcome::Pushed) => report.pushed += 1,
                Ok(PushOutcome::Deferred) => report.deferred += 1,
                Err(e) => {
                    report.push_failures += 1;
                    self.record_failure(report, "push", &id, e);
                }
            }
        }
    }

    /// Save one conversation remotely and mark it synced, unless the remote
    /// copy is newer.
    async fn push_conversation(
        &self,
        conversation: Conversation,
        catalog: &RemoteCatalog,
    ) -> Result<PushOutcome, SyncError> {
        let owner = &self.config.owner;
        let id = conversation.id.clone();
        let pushed_version = conversation.local_version;

        if let Some(entry) = catalog.get(&id) {
            if entry.modified_time > conversation.updated_at {
                debug!(conversation_id = %id, "remote copy is newer, not pushing");
                return Ok(PushOutcome::Deferred);
            }
        }

        if conversation.drive_file_id.is_none() {
            self.local.mark_push_attempted(&id).await?;
        }

        let file_id = match self.remote_call(self.remote.save(owner, &conversation)).await {
            Ok(file_id) => file_id,
            Err(RemoteError::Conflict(_)) => {
                debug!(conversation_id = %id, "remote copy became newer, not pushing");
                return Ok(PushOutcome::Deferred);
            }
            Err(e) => return Err(e.into()),
        };

        // Remember where the blob lives before touching the registry, so a
        // retry after a registry failure overwrites the same blob.
        if conversation.drive_file_id.as_ref() != Some(&file_id) {
            let still_local = self
                .update_local(&id, |c| c.drive_file_id = Some(file_id.clone()))
                .await?;
            if !still_local {
                self.discard_orphan(&id, &file_id).await;
                return Ok(PushOutcome::Pushed);
            }
        }

        let upsert = ConversationUpsert {
            conversation_id: id.clone(),
            title: conversation.title.clone(),
            drive_file_id: Some(file_id.clone()),
            drive_version: pushed_version,
        };
        self.remote_call(self.registry.upsert(owner, &upsert))
            .await?;

        // Re-read so edits made while the push was in flight stay pending.
        let still_local = self
            .update_local(&id, |c| {
                c.drive_file_id = Some(file_id.clone());
                c.synced_version = c.synced_version.max(pushed_version).min(c.local_version);
                c.synced_to_drive = c.synced_version == c.local_version;
            })
            .await?;
        if !still_local {
            self.discard_orphan(&id, &file_id).await;
            return Ok(PushOutcome::Pushed);
        }

        debug!(
            conversation_id = %id,
            file_id = %file_id,
            version = pushed_version,
            "conversation pushed"
        );
        Ok(PushOutcome::Pushed)
    }

    /// Remove the remote copies of a conversation deleted while its push was
    /// in flight.
    async fn discard_orphan(&self, id: &ConversationId, file_id: &FileId) {
        let owner = &self.config.owner;
        debug!(conversation_id = %id, "conversation deleted during push, removing remote copy");
        match self.remote_call(self.remote.delete(owner, file_id)).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => warn!(conversation_id = %id, error = %e, "failed to remove orphaned blob"),
        }
        match self.remote_call(self.registry.delete(owner, id)).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => warn!(conversation_id = %id, error = %e, "failed to remove orphaned metadata"),
        }
    }

    /// Delete the remote blob and metadata behind a tombstone, then drop the
    /// tombstone.  A tombstone without a file id is resolved by blob name
    /// through `catalog`, or through a fresh listing when none is given.
    pub(crate) async fn push_tombstone(
        &self,
        tombstone: &Tombstone,
        catalog: Option<&RemoteCatalog>,
    ) -> Result<(), SyncError> {
        let owner = &self.config.owner;
        let id = &tombstone.conversation_id;

        let file_id = match (&tombstone.drive_file_id, catalog) {
            (Some(file_id), _) => Some(file_id.clone()),
            (None, Some(catalog)) => catalog.get(id).map(|e| e.file_id.clone()),
            (None, None) => {
                let entries = self.remote_call(self.remote.list(owner)).await?;
                RemoteCatalog::new(entries).get(id).map(|e| e.file_id.clone())
            }
        };

        if let Some(file_id) = &file_id {
            match self.remote_call(self.remote.delete(owner, file_id)).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.remote_call(self.registry.delete(owner, id)).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.local.remove_tombstone(id).await?;

        debug!(conversation_id = %id, file_id = ?file_id, "remote copy deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    async fn pull_phase(&self, report: &mut SyncReport) {
        let entries = match self.remote_call(self.remote.list(&self.config.owner)).await {
            Ok(entries) => entries,
            Err(e) => {
                if e == RemoteError::Unauthorized {
                    report.halted_unauthorized = true;
                }
                warn!(error = %e, "failed to list remote conversations");
                report.errors.push(format!("list: {e}"));
                return;
            }
        };

        debug!(count = entries.len(), "remote catalog listed");

        for entry in entries {
            if report.halted_unauthorized {
                return;
            }
            match self.pull_entry(&entry).await {
                Ok(PullOutcome::Updated) => report.pulled += 1,
                Ok(PullOutcome::UpToDate) => report.up_to_date += 1,
                Ok(PullOutcome::Ignored) => {}
                Err(e) => {
                    report.pull_failures += 1;
                    let id = ConversationId::from_blob_name(&entry.name)
                        .unwrap_or_else(|| ConversationId(entry.name.clone()));
                    self.record_failure(report, "pull", &id, e);
                }
            }
        }
    }

    async fn pull_entry(&self, entry: &RemoteFileEntry) -> Result<PullOutcome, SyncError> {
        let Some(id) = ConversationId::from_blob_name(&entry.name) else {
            debug!(name = %entry.name, "ignoring remote entry with unusable name");
            return Ok(PullOutcome::Ignored);
        };

        if self.local.is_tombstoned(&id).await? {
            debug!(conversation_id = %id, "ignoring remote copy of deleted conversation");
            return Ok(PullOutcome::Ignored);
        }

        let local = self.local.get(&id).await?;
        if let Some(local) = &local {
            if entry.modified_time <= local.updated_at {
                return Ok(PullOutcome::UpToDate);
            }
        }

        let mut remote = match self
            .remote_call(self.remote.get(&self.config.owner, &entry.file_id))
            .await
        {
            Ok(conversation) => conversation,
            Err(RemoteError::NotFound(_)) => {
                debug!(conversation_id = %id, "remote blob vanished after listing");
                return Ok(PullOutcome::Ignored);
            }
            Err(e) => return Err(e.into()),
        };

        if remote.id != id {
            return Err(SyncError::IdMismatch {
                name: entry.name.clone(),
                found: remote.id,
            });
        }

        // Last writer wins: the remote copy replaces the local one wholesale,
        // but the local version counter never goes backwards.
        let expected_version = local.as_ref().map(|l| l.local_version);
        let local_version = expected_version
            .map_or(remote.local_version, |v| v.max(remote.local_version));
        remote.local_version = local_version.max(1);
        remote.synced_version = remote.local_version;
        remote.synced_to_drive = true;
        remote.drive_file_id = Some(entry.file_id.clone());

        // An edit or delete that landed during the download is newer than
        // what was fetched.
        if !self.local.put_if_version(&remote, expected_version).await? {
            debug!(conversation_id = %id, "changed locally during download, keeping local copy");
            return Ok(PullOutcome::Ignored);
        }

        debug!(
            conversation_id = %id,
            messages = remote.messages.len(),
            "pulled newer remote copy"
        );
        Ok(PullOutcome::Updated)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Apply `mutate` to the stored record.  Returns `false` if the record no
    /// longer exists.
    async fn update_local(
        &self,
        id: &ConversationId,
        mutate: impl FnOnce(&mut Conversation),
    ) -> Result<bool, StoreError> {
        let Some(mut current) = self.local.get(id).await? else {
            return Ok(false);
        };
        mutate(&mut current);
        self.local.put(&current).await?;
        Ok(true)
    }

    /// Bound a remote call by the configured timeout.
    pub(crate) async fn remote_call<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        let limit = self.config.remote_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(limit)))
    }

    fn record_failure(
        &self,
        report: &mut SyncReport,
        stage: &str,
        id: &ConversationId,
        error: SyncError,
    ) {
        if error.is_unauthorized() {
            report.halted_unauthorized = true;
        }
        warn!(
            stage,
            conversation_id = %id,
            transient = error.is_transient(),
            error = %error,
            "sync step failed"
        );
        report.errors.push(format!("{stage} {id}: {error}"));
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    /// Refresh the published unsynced count after a local write.
    pub(crate) async fn refresh_unsynced_count(&self) {
        match self.local.count_unsynced().await {
            Ok(count) => self
                .status
                .send_modify(|status| status.unsynced_count = count),
            Err(e) => debug!(error = %e, "failed to refresh unsynced count"),
        }
    }
}

fn record_store_failure(report: &mut SyncReport, context: &str, error: StoreError) {
    warn!(error = %error, transient = error.is_transient(), "{context} failed");
    report.errors.push(format!("{context}: {error}"));
}
#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use convsync_shared::{FileId, Message, OwnerId, Role};
    use convsync_store::SqliteLocalStore;
    use tempfile::TempDir;

    use super::*;
    use crate::testing::MemoryRemote;

    struct Device {
        engine: Arc<SyncEngine>,
        local: Arc<SqliteLocalStore>,
        _dir: TempDir,
    }

    fn device(remote: &Arc<MemoryRemote>) -> Device {
        device_with_timeout(remote, Duration::from_secs(5))
    }

    fn device_with_timeout(remote: &Arc<MemoryRemote>, timeout: Duration) -> Device {
        device_configured(remote, |config| config.remote_timeout = timeout)
    }

    fn device_configured(
        remote: &Arc<MemoryRemote>,
        configure: impl FnOnce(&mut SyncConfig),
    ) -> Device {
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(SqliteLocalStore::open_at(&dir.path().join("device.db")).unwrap());
        let mut config = SyncConfig::new(OwnerId::from("alice"));
        configure(&mut config);
        let engine = Arc::new(SyncEngine::new(
            local.clone(),
            remote.clone(),
            remote.clone(),
            config,
        ));
        Device {
            engine,
            local,
            _dir: dir,
        }
    }

    fn chat(id: &str) -> Conversation {
        Conversation::new(ConversationId::from(id), format!("chat {id}")).with_messages(vec![
            Message::text(Role::User, "hello"),
            Message::text(Role::Assistant, "hi, how can I help?"),
        ])
    }

    #[tokio::test]
    async fn first_sync_pushes_new_conversation() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("X");
        d.local.put(&c).await.unwrap();

        let report = d.engine.sync_now().await;
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 0);

        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert!(stored.synced_to_drive);
        assert_eq!(stored.synced_version, stored.local_version);
        assert_eq!(stored.local_version, 1);
        let file_id = stored.drive_file_id.clone().unwrap();

        let blob = remote.blob(&file_id).unwrap();
        assert_eq!(blob.messages, c.messages);

        let meta = remote.metadata(&c.id).unwrap();
        assert_eq!(meta.synced_version, 1);
        assert_eq!(meta.drive_file_id, Some(file_id));

        // Our own push is not newer than our copy.
        let again = d.engine.sync_now().await;
        assert_eq!(again.pushed, 0);
        assert_eq!(again.pulled, 0);
        assert_eq!(again.up_to_date, 1);
        assert_eq!(d.engine.status().unsynced_count, 0);
    }

    #[tokio::test]
    async fn retried_push_overwrites_the_same_blob() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("P1");
        d.local.put(&c).await.unwrap();

        // Registry rejects the first attempt after the blob is saved.
        remote.fail_next_upserts(1);
        let first = d.engine.sync_now().await;
        assert_eq!(first.push_failures, 1);
        let after_first = d.local.get(&c.id).await.unwrap().unwrap();
        assert!(!after_first.synced_to_drive);
        assert!(after_first.drive_file_id.is_some());

        let second = d.engine.sync_now().await;
        assert_eq!(second.pushed, 1);
        assert_eq!(remote.blob_count(), 1);
        assert_eq!(remote.saves(), 2);
    }

    #[tokio::test]
    async fn lost_save_response_does_not_duplicate_blob() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("lost");
        d.local.put(&c).await.unwrap();

        // The save lands remotely but the response never reaches us.
        remote.lose_next_save_responses(1);
        let first = d.engine.sync_now().await;
        assert_eq!(first.push_failures, 1);
        assert!(d.local.get(&c.id).await.unwrap().unwrap().drive_file_id.is_none());

        let second = d.engine.sync_now().await;
        assert_eq!(second.pushed, 1);
        assert_eq!(remote.blob_count(), 1);
    }

    #[tokio::test]
    async fn failed_save_is_retried_next_cycle() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("C");
        d.local.put(&c).await.unwrap();

        remote.fail_next_saves(1);
        let failed = d.engine.sync_now().await;
        assert_eq!(failed.push_failures, 1);
        assert_eq!(failed.pushed, 0);
        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert!(!stored.synced_to_drive);
        assert_eq!(stored.synced_version, 0);

        let status = d.engine.status();
        assert_eq!(status.unsynced_count, 1);
        assert!(status.last_error.is_some());

        let ok = d.engine.sync_now().await;
        assert_eq!(ok.pushed, 1);
        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert!(stored.synced_to_drive);
        assert_eq!(d.engine.status().unsynced_count, 0);
        assert_eq!(d.engine.status().last_error, None);
    }

    #[tokio::test]
    async fn one_failing_conversation_does_not_block_others() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        d.local.put(&chat("a")).await.unwrap();
        d.local.put(&chat("b")).await.unwrap();

        remote.fail_next_saves(1);
        let report = d.engine.sync_now().await;
        assert_eq!(report.push_failures, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(d.local.count_unsynced().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_remote_times_out_without_losing_data() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device_with_timeout(&remote, Duration::from_millis(50));
        let c = chat("slow");
        d.local.put(&c).await.unwrap();

        remote.set_save_delay(Some(Duration::from_secs(5)));
        let report = d.engine.sync_now().await;
        assert_eq!(report.push_failures, 1);
        assert!(report.errors[0].contains("timed out"));

        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.messages, c.messages);
        assert!(!stored.synced_to_drive);
    }

    #[tokio::test]
    async fn pull_downloads_newer_remote_copy() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);

        let mut local = chat("fresh");
        local.synced_to_drive = true;
        local.synced_version = 1;
        d.local.put(&local).await.unwrap();

        let mut newer = local.clone();
        newer.append_message(Message::text(Role::User, "from the other device"));
        newer.updated_at = local.updated_at + ChronoDuration::seconds(30);
        let file_id = remote.insert_blob(&OwnerId::from("alice"), &newer);

        let report = d.engine.sync_now().await;
        assert_eq!(report.pulled, 1);

        let stored = d.local.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.messages, newer.messages);
        assert_eq!(stored.drive_file_id, Some(file_id));
        assert!(stored.synced_to_drive);
        assert_eq!(stored.synced_version, stored.local_version);
    }

    #[tokio::test]
    async fn pull_creates_missing_local_record() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("elsewhere");
        remote.insert_blob(&OwnerId::from("alice"), &c);

        let report = d.engine.sync_now().await;
        assert_eq!(report.pulled, 1);
        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.messages, c.messages);
        assert!(!stored.has_pending_changes());
    }

    #[tokio::test]
    async fn pull_never_overwrites_newer_or_equal_local_copy() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);

        let mut local = chat("stale");
        local.synced_to_drive = true;
        local.synced_version = 1;
        d.local.put(&local).await.unwrap();

        let mut older = local.clone();
        older.messages.truncate(1);
        older.updated_at = local.updated_at - ChronoDuration::seconds(10);
        remote.insert_blob(&OwnerId::from("alice"), &older);

        let report = d.engine.sync_now().await;
        assert_eq!(report.pulled, 0);
        assert_eq!(report.up_to_date, 1);
        assert_eq!(remote.gets(), 0);
        assert_eq!(
            d.local.get(&local.id).await.unwrap().unwrap().messages,
            local.messages
        );

        // Equal timestamps are not newer either.
        remote.clear_blobs();
        let mut same_time = local.clone();
        same_time.messages.truncate(1);
        remote.insert_blob(&OwnerId::from("alice"), &same_time);
        let report = d.engine.sync_now().await;
        assert_eq!(report.pulled, 0);
        assert_eq!(
            d.local.get(&local.id).await.unwrap().unwrap().messages.len(),
            2
        );
    }

    #[tokio::test]
    async fn pull_keeps_local_version_monotonic() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);

        let mut local = chat("versions");
        local.local_version = 9;
        local.synced_version = 9;
        local.synced_to_drive = true;
        d.local.put(&local).await.unwrap();

        let mut remote_copy = chat("versions");
        remote_copy.local_version = 3;
        remote_copy.updated_at = local.updated_at + ChronoDuration::seconds(1);
        remote.insert_blob(&OwnerId::from("alice"), &remote_copy);

        d.engine.sync_now().await;
        let stored = d.local.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.local_version, 9);
        assert_eq!(stored.synced_version, 9);
    }

    #[tokio::test]
    async fn last_writer_wins_across_devices() {
        let remote = Arc::new(MemoryRemote::new());
        let d1 = device(&remote);
        let d2 = device(&remote);

        let c = chat("Y");
        let t0 = c.updated_at;
        d1.local.put(&c).await.unwrap();
        d1.engine.sync_now().await;
        let pulled = d2.engine.sync_now().await;
        assert_eq!(pulled.pulled, 1);

        let mut on_d1 = d1.local.get(&c.id).await.unwrap().unwrap();
        on_d1.append_message(Message::text(Role::User, "edit from device 1"));
        on_d1.updated_at = t0 + ChronoDuration::seconds(1);
        d1.local.put(&on_d1).await.unwrap();

        let mut on_d2 = d2.local.get(&c.id).await.unwrap().unwrap();
        on_d2.append_message(Message::text(Role::User, "edit from device 2"));
        on_d2.updated_at = t0 + ChronoDuration::seconds(2);
        d2.local.put(&on_d2).await.unwrap();

        d1.engine.sync_now().await;
        d2.engine.sync_now().await;
        d1.engine.sync_now().await;

        let final_d1 = d1.local.get(&c.id).await.unwrap().unwrap();
        let final_d2 = d2.local.get(&c.id).await.unwrap().unwrap();
        let file_id = final_d2.drive_file_id.clone().unwrap();
        let final_remote = remote.blob(&file_id).unwrap();

        assert_eq!(final_d2.messages, on_d2.messages);
        assert_eq!(final_d1.messages, on_d2.messages);
        assert_eq!(final_remote.messages, on_d2.messages);
        assert!(!final_d1
            .messages
            .iter()
            .any(|m| m.plain_text() == "edit from device 1"));
        assert_eq!(remote.blob_count(), 1);
    }

    #[tokio::test]
    async fn older_edit_never_overwrites_newer_remote_copy() {
        let remote = Arc::new(MemoryRemote::new());
        let d1 = device(&remote);
        let d2 = device(&remote);

        let c = chat("Z");
        let t0 = c.updated_at;
        d1.local.put(&c).await.unwrap();
        d1.engine.sync_now().await;
        d2.engine.sync_now().await;

        let mut on_d1 = d1.local.get(&c.id).await.unwrap().unwrap();
        on_d1.append_message(Message::text(Role::User, "older edit from device 1"));
        on_d1.updated_at = t0 + ChronoDuration::seconds(1);
        d1.local.put(&on_d1).await.unwrap();

        let mut on_d2 = d2.local.get(&c.id).await.unwrap().unwrap();
        on_d2.append_message(Message::text(Role::User, "newer edit from device 2"));
        on_d2.updated_at = t0 + ChronoDuration::seconds(2);
        d2.local.put(&on_d2).await.unwrap();

        // The newer writer syncs first.
        d2.engine.sync_now().await;
        let report = d1.engine.sync_now().await;
        assert_eq!(report.deferred, 1);
        assert_eq!(report.pushed, 0);
        assert_eq!(report.pulled, 1);
        d2.engine.sync_now().await;
        d1.engine.sync_now().await;

        let final_d1 = d1.local.get(&c.id).await.unwrap().unwrap();
        let final_d2 = d2.local.get(&c.id).await.unwrap().unwrap();
        let final_remote = remote.blob(final_d2.drive_file_id.as_ref().unwrap()).unwrap();
        assert_eq!(final_d1.messages, on_d2.messages);
        assert_eq!(final_d2.messages, on_d2.messages);
        assert_eq!(final_remote.messages, on_d2.messages);
        assert!(!final_d1.has_pending_changes());
        assert_eq!(remote.blob_count(), 1);
    }

    #[tokio::test]
    async fn save_rejected_as_stale_defers_to_pull() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("raced");
        d.local.put(&c).await.unwrap();

        // Another device saves a newer copy right after the push listing.
        let mut newer = c.clone();
        newer.append_message(Message::text(Role::User, "written elsewhere"));
        newer.updated_at = c.updated_at + ChronoDuration::seconds(30);
        remote.insert_blob_after_next_list(&OwnerId::from("alice"), &newer);

        let report = d.engine.sync_now().await;
        assert_eq!(report.deferred, 1);
        assert_eq!(report.pushed, 0);
        assert_eq!(report.push_failures, 0);
        assert_eq!(report.pulled, 1);

        let stored = d.local.get(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.messages, newer.messages);
        assert!(!stored.has_pending_changes());
        assert_eq!(remote.blob_count(), 1);
    }

    #[tokio::test]
    async fn edit_during_download_is_not_overwritten() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);

        let mut local = chat("busy");
        local.synced_to_drive = true;
        local.synced_version = 1;
        d.local.put(&local).await.unwrap();

        let mut newer = local.clone();
        newer.append_message(Message::text(Role::User, "from the other device"));
        newer.updated_at = local.updated_at + ChronoDuration::seconds(30);
        remote.insert_blob(&OwnerId::from("alice"), &newer);
        remote.set_get_delay(Some(Duration::from_millis(300)));

        let engine = Arc::clone(&d.engine);
        let cycle = tokio::spawn(async move { engine.sync_now().await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.gets() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        d.engine
            .append_message(&local.id, Message::text(Role::User, "typed meanwhile"))
            .await
            .unwrap();
        let report = cycle.await.unwrap();
        assert_eq!(report.pulled, 0);

        let stored = d.local.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 3);
        assert_eq!(stored.messages[2].plain_text(), "typed meanwhile");
        assert!(stored.has_pending_changes());
    }

    #[tokio::test]
    async fn auto_sync_runs_on_configured_period() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device_configured(&remote, |config| {
            config.auto_sync_interval = Some(Duration::from_millis(50));
        });
        let c = chat("background");
        d.local.put(&c).await.unwrap();

        let handle = d.engine.start_auto_sync().unwrap();
        // The first cycle lists twice, every later one once.
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.lists() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();

        assert!(d.local.get(&c.id).await.unwrap().unwrap().synced_to_drive);
        assert_eq!(remote.saves(), 1);
    }

    #[tokio::test]
    async fn auto_sync_needs_an_interval() {
        let remote = Arc::new(MemoryRemote::new());
        assert!(device(&remote).engine.start_auto_sync().is_none());

        let zero = device_configured(&remote, |config| {
            config.auto_sync_interval = Some(Duration::ZERO);
        });
        assert!(zero.engine.start_auto_sync().is_none());
    }

    #[tokio::test]
    async fn unauthorized_halts_remote_work() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        d.local.put(&chat("a")).await.unwrap();
        d.local.put(&chat("b")).await.unwrap();

        remote.set_unauthorized(true);
        let report = d.engine.sync_now().await;
        assert!(report.halted_unauthorized);
        assert_eq!(remote.lists(), 1);
        assert_eq!(remote.saves(), 0);
        assert_eq!(d.local.count_unsynced().await.unwrap(), 2);
        assert!(d
            .engine
            .status()
            .last_error
            .unwrap()
            .contains("Unauthorized"));

        remote.set_unauthorized(false);
        let report = d.engine.sync_now().await;
        assert_eq!(report.pushed, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn overlapping_cycles_are_skipped() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);

        let _held = d.engine.cycle.lock().await;
        let report = d.engine.sync_now().await;
        assert!(report.skipped);
        assert_eq!(remote.lists(), 0);
    }

    #[tokio::test]
    async fn status_channel_reports_completion() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        d.local.put(&chat("s")).await.unwrap();
        let mut rx = d.engine.subscribe();

        d.engine.sync_now().await;

        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert!(status.last_completed_at.is_some());
        assert_eq!(status.last_report.unwrap().pushed, 1);
    }

    #[tokio::test]
    async fn connect_opens_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            server_url: "http://127.0.0.1:9".into(),
            db_path: Some(dir.path().join("device.db")),
            ..ClientConfig::default()
        };

        let engine = SyncEngine::connect(&config).unwrap();
        let c = engine.create_conversation("offline").await.unwrap();
        assert_eq!(engine.list_conversations().await.unwrap()[0].id, c.id);

        // Nothing listens on the discard port; the edit stays pending.
        let report = engine.sync_now().await;
        assert_eq!(report.push_failures, 1);
        assert_eq!(engine.status().unsynced_count, 1);

        let bad = ClientConfig {
            server_url: "not a url".into(),
            db_path: Some(dir.path().join("other.db")),
            ..ClientConfig::default()
        };
        assert!(matches!(
            SyncEngine::connect(&bad),
            Err(EngineError::Remote(RemoteError::Network(_)))
        ));
    }

    #[tokio::test]
    async fn mismatched_blob_is_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let d = device(&remote);
        let c = chat("real-id");
        let file_id: FileId = remote.insert_blob(&OwnerId::from("alice"), &c);
        remote.rename_blob(&file_id, "other-id.json");

        let report = d.engine.sync_now().await;
        assert_eq!(report.pull_failures, 1);
        assert!(d
            .local
            .get(&ConversationId::from("other-id"))
            .await
            .unwrap()
            .is_none());
    }
}
