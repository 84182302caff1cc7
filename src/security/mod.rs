//! Access control: PIN hashing and entry, lockout, biometrics, auto-lock and
//! the session state machine that ties them together.

pub mod autolock;
pub mod biometric;
pub mod gate;
pub mod pin;
pub mod unlock;

pub use autolock::AutoLockTimer;
pub use biometric::{BiometricAuthenticator, BiometricError, NoBiometrics};
pub use gate::{wipe_everything, BearerToken, BiometricOutcome, GateState, SecurityGate, SignInOutcome};
pub use pin::{hash_pin, verify_pin, PinSetup, SetupProgress, SetupStep, PIN_LENGTH, PIN_SALT};
pub use unlock::{
    Clock, ManualClock, PinUnlock, SystemClock, UnlockOutcome, INCORRECT_PIN, LOCKOUT, MAX_ATTEMPTS,
};
