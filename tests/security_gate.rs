#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use minet_lib::backup::schedule::AutoBackupOutcome;
use minet_lib::backup::RestoreMode;
use minet_lib::config::AppConfig;
use minet_lib::contacts;
use minet_lib::model::Tier;
use minet_lib::profile::{self, IdentityProfile};
use minet_lib::repo::{self, Table};
use minet_lib::security::{
    hash_pin, BearerToken, BiometricAuthenticator, BiometricError, BiometricOutcome, GateState,
    ManualClock, SignInOutcome, UnlockOutcome, LOCKOUT, MAX_ATTEMPTS,
};
use minet_lib::settings::{change, SettingKey};
use minet_lib::AppState;
use util::{seed_contact, temp_state, temp_store};

const PIN: &str = "246810";

fn identity(subject: &str) -> IdentityProfile {
    IdentityProfile {
        subject_id: subject.into(),
        display_name: "Linh Pham".into(),
        email: Some("linh@example.com".into()),
        avatar_url: None,
    }
}

async fn signed_in_with_pin() -> (AppState, ManualClock) {
    let (state, clock) = temp_state().await;
    let outcome = state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    assert_eq!(outcome, SignInOutcome::Unlocked);
    state.gate.enable_pin(&hash_pin(PIN)).await.unwrap();
    assert!(state.gate.lock());
    (state, clock)
}

#[tokio::test]
async fn fresh_install_boots_unauthenticated() {
    let (state, _clock) = temp_state().await;
    assert_eq!(state.gate.state(), GateState::Unauthenticated);
    assert!(state.gate.token().is_none());
}

#[tokio::test]
async fn correct_pin_unlocks() {
    let (state, _clock) = signed_in_with_pin().await;
    assert_eq!(state.gate.state(), GateState::Locked);
    let outcome = state.gate.unlock_with_pin(PIN).unwrap();
    assert_eq!(outcome, UnlockOutcome::Unlocked);
    assert_eq!(state.gate.state(), GateState::Unlocked);
}

#[tokio::test]
async fn five_failures_lock_out_for_thirty_seconds() {
    let (state, clock) = signed_in_with_pin().await;
    for attempt in 1..MAX_ATTEMPTS {
        let outcome = state.gate.unlock_with_pin("000000").unwrap();
        assert_eq!(
            outcome,
            UnlockOutcome::Incorrect {
                remaining_attempts: MAX_ATTEMPTS - attempt
            }
        );
    }
    let outcome = state.gate.unlock_with_pin("000000").unwrap();
    assert!(matches!(outcome, UnlockOutcome::LockedOut { .. }));

    // Even the right PIN is refused while locked out.
    let outcome = state.gate.unlock_with_pin(PIN).unwrap();
    assert!(matches!(outcome, UnlockOutcome::LockedOut { .. }));
    assert_eq!(state.gate.state(), GateState::Locked);

    clock.advance(LOCKOUT + Duration::from_millis(1));
    let outcome = state.gate.unlock_with_pin(PIN).unwrap();
    assert_eq!(outcome, UnlockOutcome::Unlocked);
}

#[tokio::test]
async fn keypad_entry_checks_on_sixth_digit() {
    let (state, _clock) = signed_in_with_pin().await;
    let digits: Vec<char> = PIN.chars().collect();
    for d in &digits[..5] {
        let outcome = state.gate.push_pin_digit(*d).unwrap();
        assert!(matches!(outcome, UnlockOutcome::Collecting { .. }));
    }
    state.gate.pin_backspace();
    state.gate.push_pin_digit(digits[4]).unwrap();
    let outcome = state.gate.push_pin_digit(digits[5]).unwrap();
    assert_eq!(outcome, UnlockOutcome::Unlocked);
}

#[tokio::test]
async fn boot_with_active_pin_starts_locked() {
    let store = temp_store().await;
    {
        let state = AppState::with_store(
            AppConfig::at(std::env::temp_dir().join("minet-tests")),
            store.clone(),
            Arc::new(minet_lib::security::NoBiometrics),
            Arc::new(ManualClock::new()),
        )
        .await
        .unwrap();
        state
            .gate
            .sign_in(identity("sub-1"), BearerToken::new("tok"))
            .await
            .unwrap();
        state.gate.enable_pin(&hash_pin(PIN)).await.unwrap();
    }

    let rebooted = AppState::with_store(
        AppConfig::at(std::env::temp_dir().join("minet-tests")),
        store,
        Arc::new(minet_lib::security::NoBiometrics),
        Arc::new(ManualClock::new()),
    )
    .await
    .unwrap();
    assert_eq!(rebooted.gate.state(), GateState::Locked);
}

#[tokio::test]
async fn disabling_pin_clears_security_settings() {
    let (state, _clock) = signed_in_with_pin().await;
    state.gate.unlock_with_pin(PIN).unwrap();
    state.gate.disable_pin().await.unwrap();
    let settings = state.settings.get();
    assert!(!settings.pin_enabled);
    assert!(settings.pin_hash.is_none());
    assert!(!settings.biometric_enabled);
    assert!(!state.gate.lock(), "nothing to lock with");
}

#[tokio::test]
async fn locked_gate_refuses_security_changes() {
    let (state, _clock) = signed_in_with_pin().await;
    let err = state.gate.disable_pin().await.unwrap_err();
    assert_eq!(err.code(), "SECURITY/LOCKED");
}

#[tokio::test]
async fn soft_logout_keeps_data_for_same_subject() {
    let (state, _clock) = temp_state().await;
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    seed_contact(&state.store, "Quan", Tier::A).await;

    state.gate.soft_logout().await.unwrap();
    assert_eq!(state.gate.state(), GateState::Unauthenticated);
    assert!(profile::get_profile(&state.store).await.unwrap().is_none());
    let settings = state.settings.get();
    assert!(settings.pending_login);
    assert_eq!(settings.pending_subject_id.as_deref(), Some("sub-1"));

    let outcome = state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok-2"))
        .await
        .unwrap();
    assert_eq!(outcome, SignInOutcome::PendingRestore);
    assert_eq!(state.gate.state(), GateState::Unauthenticated);

    let outcome = state.gate.resume_sign_in(true).await.unwrap();
    assert_eq!(outcome, SignInOutcome::Unlocked);
    assert_eq!(repo::count(state.store.pool(), Table::Contacts).await.unwrap(), 1);
    assert!(!state.settings.get().pending_login);
}

#[tokio::test]
async fn resume_fresh_discards_previous_data() {
    let (state, _clock) = temp_state().await;
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    seed_contact(&state.store, "Quan", Tier::A).await;
    state.gate.soft_logout().await.unwrap();
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();

    state.gate.resume_sign_in(false).await.unwrap();
    assert_eq!(repo::count(state.store.pool(), Table::Contacts).await.unwrap(), 0);
    assert!(profile::get_profile(&state.store).await.unwrap().is_some());
}

#[tokio::test]
async fn wipe_erases_everything_and_signs_out() {
    let (state, _clock) = signed_in_with_pin().await;
    state.gate.unlock_with_pin(PIN).unwrap();
    seed_contact(&state.store, "Vy", Tier::B).await;

    let removed = state.wipe().await.unwrap();
    assert!(removed >= 3);
    assert_eq!(state.gate.state(), GateState::Unauthenticated);
    for table in Table::ALL {
        assert_eq!(repo::count(state.store.pool(), *table).await.unwrap(), 0);
    }
    assert!(!state.settings.get().pin_enabled);
    assert!(contacts::list_contacts(&state.store, &Default::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn locked_gate_refuses_store_access() {
    let (state, _clock) = signed_in_with_pin().await;
    seed_contact(&state.store, "Xuan", Tier::A).await;
    let dir = tempfile::tempdir().unwrap();

    let err = state.export_local(Some(dir.path())).await.unwrap_err();
    assert_eq!(err.code(), "SECURITY/LOCKED");
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

    let snapshot = dir.path().join("snapshot.json");
    std::fs::write(&snapshot, "{}").unwrap();
    let err = state
        .restore_file(&snapshot, RestoreMode::Overwrite)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SECURITY/LOCKED");

    assert_eq!(state.wipe().await.unwrap_err().code(), "SECURITY/LOCKED");
    assert_eq!(
        state.gate.sign_out_and_wipe().await.unwrap_err().code(),
        "SECURITY/LOCKED"
    );
    assert_eq!(repo::count(state.store.pool(), Table::Contacts).await.unwrap(), 1);

    state
        .settings
        .update(&[change(SettingKey::AutoBackupEnabled, true).unwrap()])
        .await
        .unwrap();
    assert_eq!(state.run_auto_backup(Utc::now()).await, AutoBackupOutcome::Locked);

    state.gate.unlock_with_pin(PIN).unwrap();
    let path = state.export_local(Some(dir.path())).await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn signed_out_store_stays_guarded_by_its_pin() {
    let (state, _clock) = signed_in_with_pin().await;
    state.gate.unlock_with_pin(PIN).unwrap();
    state.gate.soft_logout().await.unwrap();
    assert_eq!(state.gate.state(), GateState::Unauthenticated);

    let err = state.export_local(None).await.unwrap_err();
    assert_eq!(err.code(), "SECURITY/NOT_SIGNED_IN");
    // A PIN alone cannot stand in for signing in again.
    let outcome = state.gate.unlock_with_pin(PIN).unwrap();
    assert!(matches!(outcome, UnlockOutcome::Incorrect { .. }));
}

#[tokio::test]
async fn out_of_range_lock_timeout_is_rejected() {
    let (state, _clock) = temp_state().await;
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    let err = state
        .settings
        .set(SettingKey::LockAfterMinutes, 1e300)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION/SETTING");
    let err = state
        .settings
        .set(SettingKey::ReminderLeadDays, u32::MAX)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION/SETTING");
    assert_eq!(state.settings.get().lock_after_minutes, 5.0);

    state.gate.enable_pin(&hash_pin(PIN)).await.unwrap();
    assert!(state.gate.auto_lock_armed());
}

/// Signed in and unlocked with a PIN and the given `lockAfterMinutes`.
async fn unlocked_with_timeout(minutes: f64) -> AppState {
    let (state, _clock) = temp_state().await;
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    state
        .settings
        .set(SettingKey::LockAfterMinutes, minutes)
        .await
        .unwrap();
    state.gate.enable_pin(&hash_pin(PIN)).await.unwrap();
    assert_eq!(state.gate.state(), GateState::Unlocked);
    state
}

async fn idle(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn inactivity_locks_and_activity_restarts_countdown() {
    let state = unlocked_with_timeout(1.0).await;
    // The store is set up on real time; the countdown runs on paused time.
    tokio::time::pause();
    state.gate.record_activity();
    assert!(state.gate.auto_lock_armed());

    idle(50).await;
    assert_eq!(state.gate.state(), GateState::Unlocked);
    state.gate.record_activity();
    idle(50).await;
    assert_eq!(state.gate.state(), GateState::Unlocked);

    idle(15).await;
    assert_eq!(state.gate.state(), GateState::Locked);
    assert!(!state.gate.auto_lock_armed());
    assert!(!state.gate.app_backgrounded(), "timed policy ignores background");
}

#[tokio::test]
async fn zero_timeout_locks_on_background_only() {
    let state = unlocked_with_timeout(0.0).await;
    tokio::time::pause();
    state.gate.record_activity();
    assert!(!state.gate.auto_lock_armed());

    idle(24 * 60 * 60).await;
    assert_eq!(state.gate.state(), GateState::Unlocked);

    assert!(state.gate.app_backgrounded());
    assert_eq!(state.gate.state(), GateState::Locked);
}

#[tokio::test]
async fn negative_timeout_never_locks() {
    let state = unlocked_with_timeout(-1.0).await;
    tokio::time::pause();
    state.gate.record_activity();
    assert!(!state.gate.auto_lock_armed());

    idle(7 * 24 * 60 * 60).await;
    assert!(!state.gate.app_backgrounded());
    assert_eq!(state.gate.state(), GateState::Unlocked);
}

#[tokio::test]
async fn ending_the_session_cancels_the_countdown() {
    let state = unlocked_with_timeout(1.0).await;
    assert!(state.gate.auto_lock_armed());
    state.gate.soft_logout().await.unwrap();
    assert!(!state.gate.auto_lock_armed());

    let state = unlocked_with_timeout(1.0).await;
    assert!(state.gate.auto_lock_armed());
    state.wipe().await.unwrap();
    assert!(!state.gate.auto_lock_armed());
    assert_eq!(state.gate.state(), GateState::Unauthenticated);
}

struct FakeBiometrics {
    accept: bool,
}

#[async_trait]
impl BiometricAuthenticator for FakeBiometrics {
    async fn is_available(&self) -> bool {
        true
    }

    async fn register(&self, _subject: &str) -> Result<String, BiometricError> {
        Ok("cred-1".into())
    }

    async fn assert(&self, _credential_id: &str) -> Result<(), BiometricError> {
        if self.accept {
            Ok(())
        } else {
            Err(BiometricError::Cancelled)
        }
    }
}

async fn biometric_state(accept: bool) -> (AppState, ManualClock) {
    let clock = ManualClock::new();
    let state = AppState::with_store(
        AppConfig::at(std::env::temp_dir().join("minet-tests")),
        temp_store().await,
        Arc::new(FakeBiometrics { accept }),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    state
        .gate
        .sign_in(identity("sub-1"), BearerToken::new("tok"))
        .await
        .unwrap();
    state.gate.enable_pin(&hash_pin(PIN)).await.unwrap();
    assert!(state.gate.enable_biometric().await.unwrap());
    assert!(state.gate.lock());
    (state, clock)
}

#[tokio::test]
async fn biometric_unlocks_without_touching_attempts() {
    let (state, _clock) = biometric_state(true).await;
    assert_eq!(
        state.settings.get().biometric_credential_id.as_deref(),
        Some("cred-1")
    );
    let outcome = state.gate.unlock_with_biometric().await.unwrap();
    assert_eq!(outcome, BiometricOutcome::Unlocked);
    assert_eq!(state.gate.state(), GateState::Unlocked);
}

#[tokio::test]
async fn biometric_is_refused_during_lockout() {
    let (state, _clock) = biometric_state(true).await;
    for _ in 0..MAX_ATTEMPTS {
        state.gate.unlock_with_pin("999999").unwrap();
    }
    let outcome = state.gate.unlock_with_biometric().await.unwrap();
    assert!(matches!(outcome, BiometricOutcome::LockedOut { .. }));
    assert_eq!(state.gate.state(), GateState::Locked);
}

#[tokio::test]
async fn cancelled_biometric_stays_locked() {
    let (state, _clock) = biometric_state(false).await;
    let outcome = state.gate.unlock_with_biometric().await.unwrap();
    assert_eq!(outcome, BiometricOutcome::Failed);
    assert_eq!(state.gate.state(), GateState::Locked);
    assert!(state
        .settings
        .set(SettingKey::LockAfterMinutes, -1.0)
        .await
        .is_ok());
}
