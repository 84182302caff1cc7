use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use super::autolock::AutoLockTimer;
use super::biometric::{BiometricAuthenticator, BiometricError};
use super::pin::is_pin_hash;
use super::unlock::{Clock, PinUnlock, UnlockOutcome};
use crate::db::Store;
use crate::profile::{self, IdentityProfile, UserProfile, PROFILE_ID};
use crate::repo::{self, Table, BUSINESS_TABLES};
use crate::settings::{self, change, LockPolicy, SettingKey, SettingsStore, SECURITY_KEYS};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unauthenticated,
    Unlocked,
    Locked,
}

/// Access token from the identity provider. Lives only in memory and never
/// prints.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInOutcome {
    Unlocked,
    Locked,
    /// Same identity as a soft-logged-out session with data still on disk.
    /// Finish with [`SecurityGate::resume_sign_in`].
    PendingRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BiometricOutcome {
    Unlocked,
    /// Assertion failed or was cancelled. PIN attempts are unaffected.
    Failed,
    /// No credential registered or no platform support.
    Unavailable,
    LockedOut { retry_after_ms: u64 },
}

struct PendingSignIn {
    identity: IdentityProfile,
    token: BearerToken,
}

struct Inner {
    store: Store,
    settings: SettingsStore,
    biometrics: Arc<dyn BiometricAuthenticator>,
    state: Arc<watch::Sender<GateState>>,
    unlock: Mutex<PinUnlock>,
    timer: Mutex<AutoLockTimer>,
    token: Mutex<Option<BearerToken>>,
    pending: Mutex<Option<PendingSignIn>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_if_unlocked(state: &watch::Sender<GateState>, reason: &'static str) -> bool {
    let changed = state.send_if_modified(|s| {
        if *s == GateState::Unlocked {
            *s = GateState::Locked;
            true
        } else {
            false
        }
    });
    if changed {
        info!(target: "minet", event = "gate_locked", reason);
    }
    changed
}

fn require_unlocked(state: GateState) -> AppResult<()> {
    match state {
        GateState::Unlocked => Ok(()),
        GateState::Locked => Err(AppError::security("LOCKED", "Unlock first")),
        GateState::Unauthenticated => Err(AppError::security("NOT_SIGNED_IN", "Sign in first")),
    }
}

/// Session state machine: who is signed in, and whether the PIN screen is up.
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SecurityGate {
    inner: Arc<Inner>,
}

impl SecurityGate {
    /// Restores the session a previous run left behind: a stored profile means
    /// signed in, and an active PIN means starting locked.
    pub async fn boot(
        store: &Store,
        settings: &SettingsStore,
        biometrics: Arc<dyn BiometricAuthenticator>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let stored = profile::get_profile(store).await?;
        let current = settings.get();
        let initial = match stored {
            Some(_) if !current.pending_login => {
                if current.pin_active() {
                    GateState::Locked
                } else {
                    GateState::Unlocked
                }
            }
            _ => GateState::Unauthenticated,
        };
        let (tx, _rx) = watch::channel(initial);
        let gate = Self {
            inner: Arc::new(Inner {
                store: store.clone(),
                settings: settings.clone(),
                biometrics,
                state: Arc::new(tx),
                unlock: Mutex::new(PinUnlock::new(clock)),
                timer: Mutex::new(AutoLockTimer::new()),
                token: Mutex::new(None),
                pending: Mutex::new(None),
            }),
        };
        info!(target: "minet", event = "gate_boot", state = ?initial);
        gate.rearm();
        Ok(gate)
    }

    pub fn state(&self) -> GateState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.inner.state.subscribe()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    /// Bearer token for remote calls, if this session signed in with one.
    pub fn token(&self) -> Option<BearerToken> {
        guard(&self.inner.token).clone()
    }

    /// Whether the store may be read or changed right now. A locked session
    /// is refused, and so is a signed-out one whose data a PIN still guards.
    /// With no PIN in force there is nothing to check.
    pub fn authorize(&self) -> AppResult<()> {
        match self.state() {
            GateState::Unauthenticated if !self.inner.settings.get().pin_active() => Ok(()),
            state => require_unlocked(state),
        }
    }

    pub fn auto_lock_armed(&self) -> bool {
        guard(&self.inner.timer).is_armed()
    }

    fn transition(&self, to: GateState) {
        let from = self.inner.state.send_replace(to);
        if from != to {
            info!(target: "minet", event = "gate_transition", from = ?from, to = ?to);
        }
        self.rearm();
    }

    /// Arms the inactivity countdown when unlocked with a timed policy, and
    /// cancels it otherwise.
    fn rearm(&self) {
        let mut timer = guard(&self.inner.timer);
        let current = self.inner.settings.get();
        let policy = current.lock_policy();
        match (self.state(), current.pin_active(), policy) {
            (GateState::Unlocked, true, LockPolicy::After(after)) => {
                let state = self.inner.state.clone();
                timer.arm(after, move || {
                    lock_if_unlocked(&state, "inactivity");
                });
            }
            _ => timer.cancel(),
        }
    }

    /// User input while unlocked restarts the countdown.
    pub fn record_activity(&self) {
        if self.state() == GateState::Unlocked {
            self.rearm();
        }
    }

    /// Applies the lock-on-background policy. Returns whether it locked.
    pub fn app_backgrounded(&self) -> bool {
        let current = self.inner.settings.get();
        if current.pin_active() && current.lock_policy() == LockPolicy::OnBackground {
            let locked = lock_if_unlocked(&self.inner.state, "background");
            self.rearm();
            locked
        } else {
            false
        }
    }

    /// Locks now if a PIN is set. Without one there is nothing to unlock with.
    pub fn lock(&self) -> bool {
        if !self.inner.settings.get().pin_active() {
            return false;
        }
        let locked = lock_if_unlocked(&self.inner.state, "manual");
        self.rearm();
        locked
    }

    /// Persists a confirmed PIN hash from [`super::PinSetup`] and turns the
    /// PIN on.
    pub async fn enable_pin(&self, pin_hash: &str) -> AppResult<()> {
        require_unlocked(self.state())?;
        if !is_pin_hash(pin_hash) {
            return Err(AppError::validation("PIN_HASH", "Not a PIN hash"));
        }
        self.inner
            .settings
            .update(&[
                change(SettingKey::PinEnabled, true)?,
                change(SettingKey::PinHash, pin_hash)?,
            ])
            .await?;
        guard(&self.inner.unlock).clear();
        info!(target: "minet", event = "pin_enabled");
        self.rearm();
        Ok(())
    }

    /// Turns the PIN off and forgets every security setting with it.
    pub async fn disable_pin(&self) -> AppResult<()> {
        require_unlocked(self.state())?;
        let cleared: Vec<_> = SECURITY_KEYS.iter().map(|k| (*k, Value::Null)).collect();
        self.inner.settings.update(&cleared).await?;
        guard(&self.inner.unlock).clear();
        info!(target: "minet", event = "pin_disabled");
        self.rearm();
        Ok(())
    }

    /// Registers a platform credential. `Ok(false)` when the platform has
    /// none to offer.
    pub async fn enable_biometric(&self) -> AppResult<bool> {
        require_unlocked(self.state())?;
        if !self.inner.settings.get().pin_active() {
            return Err(AppError::security(
                "PIN_REQUIRED",
                "Set a PIN before enabling biometrics",
            ));
        }
        if !self.inner.biometrics.is_available().await {
            return Ok(false);
        }
        let subject = profile::get_profile(&self.inner.store)
            .await?
            .and_then(|p| p.google_id)
            .unwrap_or_else(|| PROFILE_ID.to_string());
        let credential = match self.inner.biometrics.register(&subject).await {
            Ok(id) => id,
            Err(BiometricError::Unavailable) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        self.inner
            .settings
            .update(&[
                change(SettingKey::BiometricEnabled, true)?,
                change(SettingKey::BiometricCredentialId, credential)?,
            ])
            .await?;
        info!(target: "minet", event = "biometric_enabled");
        Ok(true)
    }

    pub async fn disable_biometric(&self) -> AppResult<()> {
        self.inner
            .settings
            .update(&[
                (SettingKey::BiometricEnabled, Value::Null),
                (SettingKey::BiometricCredentialId, Value::Null),
            ])
            .await?;
        Ok(())
    }

    /// Whether the lock screen should lead with the biometric prompt.
    pub async fn biometric_offered(&self) -> bool {
        let current = self.inner.settings.get();
        current.biometric_enabled
            && current.biometric_credential_id.is_some()
            && self.inner.biometrics.is_available().await
    }

    fn after_pin(&self, outcome: UnlockOutcome) -> UnlockOutcome {
        if outcome == UnlockOutcome::Unlocked {
            self.transition(GateState::Unlocked);
        }
        outcome
    }

    /// Checks a full PIN against the stored hash. Failures and lockout read
    /// the same whether or not anyone is signed in.
    pub fn unlock_with_pin(&self, pin: &str) -> AppResult<UnlockOutcome> {
        if self.state() == GateState::Unlocked {
            return Ok(UnlockOutcome::Unlocked);
        }
        let hash = self.stored_hash();
        let outcome = guard(&self.inner.unlock).submit(pin, hash.as_deref())?;
        Ok(self.after_pin(outcome))
    }

    /// Keypad entry. The sixth digit triggers the check.
    pub fn push_pin_digit(&self, digit: char) -> AppResult<UnlockOutcome> {
        if self.state() == GateState::Unlocked {
            return Ok(UnlockOutcome::Unlocked);
        }
        let hash = self.stored_hash();
        let outcome = guard(&self.inner.unlock).push_digit(digit, hash.as_deref())?;
        Ok(self.after_pin(outcome))
    }

    pub fn pin_backspace(&self) {
        guard(&self.inner.unlock).backspace();
    }

    fn stored_hash(&self) -> Option<String> {
        if self.state() == GateState::Unauthenticated {
            return None;
        }
        self.inner.settings.get().pin_hash
    }

    /// Unlocks through the platform credential. Never consumes a PIN attempt
    /// and never lifts a lockout.
    pub async fn unlock_with_biometric(&self) -> AppResult<BiometricOutcome> {
        match self.state() {
            GateState::Unlocked => return Ok(BiometricOutcome::Unlocked),
            GateState::Unauthenticated => return Ok(BiometricOutcome::Failed),
            GateState::Locked => {}
        }
        if let Some(left) = guard(&self.inner.unlock).lockout_remaining() {
            return Ok(BiometricOutcome::LockedOut {
                retry_after_ms: left.as_millis() as u64,
            });
        }
        let current = self.inner.settings.get();
        let credential = match current.biometric_credential_id {
            Some(id) if current.biometric_enabled => id,
            _ => return Ok(BiometricOutcome::Unavailable),
        };
        if !self.inner.biometrics.is_available().await {
            return Ok(BiometricOutcome::Unavailable);
        }
        match self.inner.biometrics.assert(&credential).await {
            Ok(()) => {
                self.transition(GateState::Unlocked);
                Ok(BiometricOutcome::Unlocked)
            }
            Err(err) => {
                warn!(target: "minet", event = "biometric_rejected", error = %err);
                Ok(BiometricOutcome::Failed)
            }
        }
    }

    /// Completes an identity-provider sign-in.
    pub async fn sign_in(
        &self,
        identity: IdentityProfile,
        token: BearerToken,
    ) -> AppResult<SignInOutcome> {
        let current = self.inner.settings.get();
        let same_subject = current.pending_subject_id.as_deref() == Some(identity.subject_id.as_str());
        if current.pending_login && same_subject && profile::has_crm_data(&self.inner.store).await? {
            *guard(&self.inner.pending) = Some(PendingSignIn { identity, token });
            info!(target: "minet", event = "sign_in_pending_restore");
            return Ok(SignInOutcome::PendingRestore);
        }
        self.complete_sign_in(identity, token, true).await
    }

    /// Finishes a [`SignInOutcome::PendingRestore`] sign-in, either keeping the
    /// data left on disk or starting fresh.
    pub async fn resume_sign_in(&self, keep_data: bool) -> AppResult<SignInOutcome> {
        let pending = guard(&self.inner.pending)
            .take()
            .ok_or_else(|| AppError::security("NO_PENDING_SIGN_IN", "No sign-in to resume"))?;
        self.complete_sign_in(pending.identity, pending.token, keep_data)
            .await
    }

    async fn complete_sign_in(
        &self,
        identity: IdentityProfile,
        token: BearerToken,
        keep_data: bool,
    ) -> AppResult<SignInOutcome> {
        let user = UserProfile::from_identity(&identity)?;
        let mut tx = self.inner.store.begin("sign_in").await?;
        let result: AppResult<_> = async {
            if !keep_data {
                for table in BUSINESS_TABLES {
                    repo::clear(tx.conn(), *table).await?;
                    tx.touch(*table);
                }
            }
            settings::write_in(
                &mut tx,
                &[
                    (SettingKey::PendingLogin, Value::Null),
                    (SettingKey::PendingSubjectId, Value::Null),
                ],
            )
            .await?;
            profile::put_in(&mut tx, &user).await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;
        let current = self.inner.settings.reload().await?;
        *guard(&self.inner.token) = Some(token);
        guard(&self.inner.unlock).clear();
        info!(target: "minet", event = "signed_in", kept_data = keep_data);
        if current.pin_active() {
            self.transition(GateState::Locked);
            Ok(SignInOutcome::Locked)
        } else {
            self.transition(GateState::Unlocked);
            Ok(SignInOutcome::Unlocked)
        }
    }

    fn end_session(&self) {
        *guard(&self.inner.token) = None;
        *guard(&self.inner.pending) = None;
        guard(&self.inner.unlock).clear();
        self.transition(GateState::Unauthenticated);
    }

    /// Signs out but keeps business data and security settings, remembering
    /// who left so the same identity can pick up where it stopped.
    pub async fn soft_logout(&self) -> AppResult<()> {
        let mut tx = self.inner.store.begin("soft_logout").await?;
        let result: AppResult<_> = async {
            let subject = profile::fetch(tx.conn()).await?.and_then(|p| p.google_id);
            repo::delete_by_id(tx.conn(), Table::UserProfile, PROFILE_ID).await?;
            tx.touch(Table::UserProfile);
            settings::write_in(
                &mut tx,
                &[
                    change(SettingKey::PendingLogin, true)?,
                    change(SettingKey::PendingSubjectId, subject)?,
                ],
            )
            .await?;
            Ok(())
        }
        .await;
        tx.finish(result).await?;
        self.inner.settings.reload().await?;
        self.end_session();
        info!(target: "minet", event = "soft_logout");
        Ok(())
    }

    /// Erases every table, settings included, and signs out.
    pub async fn sign_out_and_wipe(&self) -> AppResult<u64> {
        self.authorize()?;
        let removed = wipe_everything(&self.inner.store).await?;
        self.inner.settings.reload().await?;
        self.end_session();
        warn!(target: "minet", event = "wiped", rows = removed);
        Ok(removed)
    }
}

/// Deletes all rows from every table in one transaction.
pub async fn wipe_everything(store: &Store) -> AppResult<u64> {
    let mut tx = store.begin("wipe_everything").await?;
    let result: AppResult<_> = async {
        let mut removed = 0;
        for table in Table::ALL {
            removed += repo::clear(tx.conn(), *table).await?;
            tx.touch(*table);
        }
        Ok(removed)
    }
    .await;
    tx.finish(result).await
}
