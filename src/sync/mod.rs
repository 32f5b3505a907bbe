//! Cloud backup: sign-in state, snapshot export/import, debounced uploads and
//! first-login reconciliation against the remote backup file.

use std::{
    sync::Arc,
    time::Duration,
};

use serde_json::Value;
use tokio::{
    sync::{
        broadcast::error::RecvError,
        watch,
        Mutex,
    },
    task::JoinHandle,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    config::AppConfig,
    core::{
        utils::{
            display_datetime,
            now_ms,
        },
        TutorError,
    },
    store::{
        keys,
        LocalStore,
    },
};

pub mod auth;
pub mod conflict;
pub mod debounce;
pub mod snapshot;
pub mod transport;

pub use auth::{
    AccountProfile,
    GrantedToken,
    TokenProvider,
};
pub use conflict::{
    detect_conflict,
    ConflictChoice,
    ConflictPrompt,
    SyncConflict,
};
pub use debounce::Debouncer;
pub use snapshot::{
    apply_to_store,
    export_store,
    Snapshot,
    SNAPSHOT_VERSION,
};
pub use transport::{
    DriveTransport,
    RemoteTransport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    LoggedOut,
    Idle { last_sync: Option<String> },
    Syncing,
    Error(String),
}

/// Result of reconciling after a fresh sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    PushedLocal,
    AlreadyInSync,
    RestoredRemote,
    Skipped,
}

/// A downloaded backup waiting for the user to confirm the restore.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePreview {
    pub exported_at: Option<i64>,
    pub history_count: usize,
    pub saved_word_count: usize,
    snapshot: Snapshot,
}

impl RestorePreview {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            exported_at: snapshot.exported_at,
            history_count: snapshot.history_count(),
            saved_word_count: snapshot.saved_word_count(),
            snapshot,
        }
    }

    pub fn exported_label(&self) -> String {
        self.exported_at.map(display_datetime).unwrap_or_else(|| "unknown".to_string())
    }
}

struct SyncInner {
    store: LocalStore,
    transport: Arc<dyn RemoteTransport>,
    tokens: Arc<dyn TokenProvider>,
    backup_filename: String,
    token: Mutex<Option<String>>,
    file_id: Mutex<Option<String>>,
    /// Held from export through put so two uploads never race to create the backup file.
    upload_lock: Mutex<()>,
    debouncer: Debouncer,
    status: watch::Sender<SyncStatus>,
}

#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn RemoteTransport>,
        tokens: Arc<dyn TokenProvider>,
        backup_filename: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::LoggedOut);
        Self {
            inner: Arc::new(SyncInner {
                store,
                transport,
                tokens,
                backup_filename: backup_filename.into(),
                token: Mutex::new(None),
                file_id: Mutex::new(None),
                upload_lock: Mutex::new(()),
                debouncer: Debouncer::new(debounce),
                status,
            }),
        }
    }

    pub fn from_config(
        store: LocalStore,
        transport: Arc<dyn RemoteTransport>,
        tokens: Arc<dyn TokenProvider>,
        config: &AppConfig,
    ) -> Self {
        Self::new(store, transport, tokens, config.backup_filename.clone(), config.sync_debounce())
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    fn set_status(&self, status: SyncStatus) {
        self.inner.status.send_replace(status);
    }

    async fn publish_idle(&self) {
        let last_sync = match self.inner.store.get_setting_as::<String>(keys::LAST_SYNC).await {
            Ok(last) => last,
            Err(e) => {
                warn!(error = %e, "cannot read last sync time");
                None
            }
        };
        self.set_status(SyncStatus::Idle { last_sync });
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.token.lock().await.is_some()
    }

    async fn current_token(&self) -> Result<String, TutorError> {
        self.inner.token.lock().await.clone().ok_or(TutorError::NotAuthenticated)
    }

    // Sign-in

    /// Interactive sign-in. `Ok(false)` when the user declined.
    pub async fn login(&self) -> Result<bool, TutorError> {
        let Some(granted) = self.inner.tokens.request_token(true).await? else {
            info!("sign-in was not completed");
            return Ok(false);
        };
        self.accept_token(granted).await?;
        Ok(true)
    }

    /// Restores a session without user interaction: a cached unexpired token
    /// first, then a non-interactive renewal. Never fails; `false` means signed out.
    pub async fn silent_login(&self) -> bool {
        match self.cached_token().await {
            Ok(Some(token)) => {
                *self.inner.token.lock().await = Some(token);
                self.publish_idle().await;
                debug!("reusing cached access token");
                return true;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cannot read cached access token"),
        }

        match self.inner.tokens.request_token(false).await {
            Ok(Some(granted)) => match self.accept_token(granted).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "failed to store renewed token");
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "silent token renewal failed");
                false
            }
        }
    }

    async fn cached_token(&self) -> Result<Option<String>, TutorError> {
        let store = &self.inner.store;
        let token = store.get_setting_as::<String>(keys::ACCESS_TOKEN).await?;
        let expires_at = store.get_setting_as::<i64>(keys::TOKEN_EXPIRES_AT).await?;
        Ok(match (token, expires_at) {
            (Some(token), Some(expires_at)) if !token.is_empty() && now_ms() < expires_at => Some(token),
            _ => None,
        })
    }

    async fn accept_token(&self, granted: GrantedToken) -> Result<(), TutorError> {
        let store = &self.inner.store;
        store.set_setting(keys::ACCESS_TOKEN, &granted.access_token).await?;
        store.set_setting(keys::TOKEN_EXPIRES_AT, granted.expires_at(now_ms())).await?;
        *self.inner.token.lock().await = Some(granted.access_token.clone());

        match self.inner.tokens.fetch_profile(&granted.access_token).await {
            Ok(profile) => {
                store.set_setting(keys::ACCOUNT_EMAIL, &profile.email).await?;
                store.set_setting(keys::ACCOUNT_NAME, profile.display_name()).await?;
                store.set_setting(keys::SYNC_ENABLED, true).await?;
                info!(email = %profile.email, "signed in to cloud sync");
            }
            Err(e) => warn!(error = %e, "failed to fetch account profile"),
        }
        self.publish_idle().await;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), TutorError> {
        self.inner.debouncer.cancel();
        let token = self.inner.token.lock().await.take();
        *self.inner.file_id.lock().await = None;
        if let Some(token) = token {
            if let Err(e) = self.inner.tokens.revoke(&token).await {
                warn!(error = %e, "token revocation failed");
            }
        }

        let store = &self.inner.store;
        store.set_setting(keys::SYNC_ENABLED, false).await?;
        for key in [keys::ACCOUNT_EMAIL, keys::ACCOUNT_NAME, keys::ACCESS_TOKEN, keys::TOKEN_EXPIRES_AT] {
            store.set_setting(key, Value::Null).await?;
        }
        self.set_status(SyncStatus::LoggedOut);
        info!("signed out of cloud sync");
        Ok(())
    }

    /// Drops the credential after the remote rejected it. Sync stays enabled so
    /// the next start can sign in again.
    async fn invalidate_credential(&self) {
        *self.inner.token.lock().await = None;
        for key in [keys::ACCESS_TOKEN, keys::TOKEN_EXPIRES_AT] {
            if let Err(e) = self.inner.store.set_setting(key, Value::Null).await {
                error!(key, error = %e, "failed to clear rejected token");
            }
        }
        self.set_status(SyncStatus::LoggedOut);
    }

    async fn guard<T>(&self, result: Result<T, TutorError>) -> Result<T, TutorError> {
        if let Err(TutorError::RemoteAuth(reason)) = &result {
            warn!(reason = %reason, "access token rejected, signing out");
            self.invalidate_credential().await;
        }
        result
    }

    // Snapshots

    pub async fn export_snapshot(&self) -> Result<Snapshot, TutorError> {
        export_store(&self.inner.store).await
    }

    /// Imports a backup given as a JSON object or a string holding one.
    pub async fn import_snapshot(&self, blob: Value) -> Result<(), TutorError> {
        apply_to_store(&self.inner.store, Snapshot::decode(blob)?).await
    }

    // Transport

    async fn resolve_file(&self, token: &str) -> Result<Option<String>, TutorError> {
        if let Some(id) = self.inner.file_id.lock().await.clone() {
            return Ok(Some(id));
        }
        let found = self
            .guard(self.inner.transport.find_by_name(token, &self.inner.backup_filename).await)
            .await?;
        if let Some(id) = &found {
            *self.inner.file_id.lock().await = Some(id.clone());
        }
        Ok(found)
    }

    pub async fn upload(&self, snapshot: &Snapshot) -> Result<(), TutorError> {
        let _uploading = self.inner.upload_lock.lock().await;
        self.upload_locked(snapshot).await
    }

    async fn upload_locked(&self, snapshot: &Snapshot) -> Result<(), TutorError> {
        let token = self.current_token().await?;
        self.set_status(SyncStatus::Syncing);
        match self.upload_with(&token, snapshot).await {
            Ok(last_sync) => {
                self.set_status(SyncStatus::Idle { last_sync: Some(last_sync) });
                Ok(())
            }
            Err(e) => {
                if !e.is_auth_failure() {
                    self.set_status(SyncStatus::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn upload_with(&self, token: &str, snapshot: &Snapshot) -> Result<String, TutorError> {
        let body = snapshot.to_bytes()?;
        let size = body.len();
        let handle = self.resolve_file(token).await?;
        let id = self
            .guard(
                self.inner
                    .transport
                    .put(token, handle.as_deref(), &self.inner.backup_filename, body)
                    .await,
            )
            .await?;
        *self.inner.file_id.lock().await = Some(id);

        let last_sync = display_datetime(now_ms());
        self.inner.store.set_setting(keys::LAST_SYNC, &last_sync).await?;
        info!(bytes = size, "uploaded backup");
        Ok(last_sync)
    }

    pub async fn download(&self) -> Result<Option<Snapshot>, TutorError> {
        let token = self.current_token().await?;
        let Some(handle) = self.resolve_file(&token).await? else {
            return Ok(None);
        };
        let bytes = self.guard(self.inner.transport.get(&token, &handle).await).await?;
        Snapshot::from_bytes(&bytes).map(Some)
    }

    // Scheduled sync

    /// Uploads a fresh snapshot once triggers stop arriving for the debounce delay.
    pub fn schedule_sync(&self) {
        let coordinator = self.clone();
        self.inner.debouncer.trigger(move || async move { coordinator.sync_in_background().await });
    }

    async fn sync_in_background(&self) {
        if !self.is_logged_in().await {
            debug!("scheduled sync skipped, not signed in");
            return;
        }
        if let Err(e) = self.push_local().await {
            error!(error = %e, "background sync failed");
        }
    }

    /// Schedules a sync after every store change made while signed in, except
    /// changes to sync's own bookkeeping settings.
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut changes = self.inner.store.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if change.triggers_sync() && coordinator.is_logged_in().await {
                            coordinator.schedule_sync();
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "store change listener lagged");
                        if coordinator.is_logged_in().await {
                            coordinator.schedule_sync();
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // Reconciliation and explicit backup

    /// Run after a fresh sign-in. A missing remote backup (or one without a
    /// timestamp) is overwritten with local data; differing record counts are
    /// put to the user.
    pub async fn compare_and_prompt_sync(
        &self,
        prompt: &dyn ConflictPrompt,
    ) -> Result<SyncOutcome, TutorError> {
        let remote = self.download().await?.and_then(|snapshot| {
            let exported_at = snapshot.exported_at?;
            Some((snapshot, exported_at))
        });
        let Some((remote, exported_at)) = remote else {
            info!("no usable remote backup, uploading local data");
            self.push_local().await?;
            return Ok(SyncOutcome::PushedLocal);
        };

        let local_history = self.inner.store.history_count().await?;
        let local_words = self.inner.store.saved_word_count().await?;
        let Some(conflict) = detect_conflict(local_history, local_words, &remote, exported_at) else {
            debug!(local_history, local_words, "remote backup matches local counts");
            return Ok(SyncOutcome::AlreadyInSync);
        };

        match prompt.choose(&conflict).await {
            ConflictChoice::KeepRemote => {
                apply_to_store(&self.inner.store, remote).await?;
                Ok(SyncOutcome::RestoredRemote)
            }
            ConflictChoice::KeepLocal => {
                self.push_local().await?;
                Ok(SyncOutcome::PushedLocal)
            }
            ConflictChoice::Skip => Ok(SyncOutcome::Skipped),
        }
    }

    /// Exports and uploads under the upload lock, so the snapshot taken is the
    /// newest one once any earlier upload has finished.
    async fn push_local(&self) -> Result<(), TutorError> {
        let _uploading = self.inner.upload_lock.lock().await;
        let snapshot = self.export_snapshot().await?;
        self.upload_locked(&snapshot).await
    }

    pub async fn backup_now(&self) -> Result<(), TutorError> {
        if !self.is_logged_in().await {
            return Err(TutorError::NotAuthenticated);
        }
        self.push_local().await
    }

    /// Downloads the backup for confirmation. `Ok(None)` when there is none.
    pub async fn restore(&self) -> Result<Option<RestorePreview>, TutorError> {
        if !self.is_logged_in().await {
            return Err(TutorError::NotAuthenticated);
        }
        Ok(self.download().await?.map(RestorePreview::new))
    }

    pub async fn apply_restore(&self, preview: RestorePreview) -> Result<(), TutorError> {
        apply_to_store(&self.inner.store, preview.snapshot).await
    }
}
