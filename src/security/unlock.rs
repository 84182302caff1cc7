use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::pin::{check_digit, check_pin, verify_pin, PIN_LENGTH};
use crate::AppResult;

pub const MAX_ATTEMPTS: u32 = 5;
pub const LOCKOUT: Duration = Duration::from_secs(30);

/// Outward wording for every failed PIN check.
pub const INCORRECT_PIN: &str = "Incorrect PIN";

/// Monotonic time source for lockouts.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.start + offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnlockOutcome {
    Collecting { filled: usize },
    Unlocked,
    Incorrect { remaining_attempts: u32 },
    /// Input is ignored until the lockout runs out.
    LockedOut { retry_after_ms: u64 },
}

impl UnlockOutcome {
    pub fn message(&self) -> Option<String> {
        match self {
            UnlockOutcome::Incorrect { remaining_attempts } => Some(format!(
                "{INCORRECT_PIN}. {remaining_attempts} attempts remaining."
            )),
            UnlockOutcome::LockedOut { retry_after_ms } => Some(format!(
                "Too many attempts. Try again in {} seconds.",
                retry_after_ms.div_ceil(1000)
            )),
            _ => None,
        }
    }
}

/// PIN entry with a failure counter and a timed lockout. The counter lives in
/// memory only and clears itself once the lockout has elapsed.
pub struct PinUnlock {
    clock: Arc<dyn Clock>,
    failures: u32,
    locked_until: Option<Instant>,
    buffer: String,
}

impl PinUnlock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            failures: 0,
            locked_until: None,
            buffer: String::new(),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn filled(&self) -> usize {
        self.buffer.len()
    }

    /// Time left on an active lockout. Expiry is applied here, so reading it
    /// is enough to resume normal entry.
    pub fn lockout_remaining(&mut self) -> Option<Duration> {
        let until = self.locked_until?;
        let now = self.clock.now();
        if now >= until {
            self.locked_until = None;
            self.failures = 0;
            tracing::info!(target: "minet", event = "pin_lockout_expired");
            None
        } else {
            Some(until - now)
        }
    }

    fn locked_out(&mut self) -> Option<UnlockOutcome> {
        self.lockout_remaining().map(|left| UnlockOutcome::LockedOut {
            retry_after_ms: left.as_millis() as u64,
        })
    }

    pub fn push_digit(&mut self, digit: char, stored_hash: Option<&str>) -> AppResult<UnlockOutcome> {
        if let Some(out) = self.locked_out() {
            return Ok(out);
        }
        check_digit(digit)?;
        self.buffer.push(digit);
        if self.buffer.len() < PIN_LENGTH {
            return Ok(UnlockOutcome::Collecting {
                filled: self.buffer.len(),
            });
        }
        let entered = std::mem::take(&mut self.buffer);
        Ok(self.check(&entered, stored_hash))
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    pub fn submit(&mut self, pin: &str, stored_hash: Option<&str>) -> AppResult<UnlockOutcome> {
        if let Some(out) = self.locked_out() {
            return Ok(out);
        }
        check_pin(pin)?;
        self.buffer.clear();
        Ok(self.check(pin, stored_hash))
    }

    /// Clears the typed digits and any failures. Never lifts a lockout.
    pub(crate) fn reset_after_success(&mut self) {
        self.buffer.clear();
        self.failures = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
        self.failures = 0;
        self.locked_until = None;
    }

    fn check(&mut self, pin: &str, stored_hash: Option<&str>) -> UnlockOutcome {
        // A missing hash fails the same way a wrong PIN does.
        let ok = stored_hash.is_some_and(|hash| verify_pin(pin, hash));
        if ok {
            self.reset_after_success();
            return UnlockOutcome::Unlocked;
        }
        self.failures += 1;
        tracing::warn!(target: "minet", event = "pin_rejected", failures = self.failures);
        if self.failures >= MAX_ATTEMPTS {
            self.locked_until = Some(self.clock.now() + LOCKOUT);
            tracing::warn!(target: "minet", event = "pin_lockout", seconds = LOCKOUT.as_secs());
            UnlockOutcome::LockedOut {
                retry_after_ms: LOCKOUT.as_millis() as u64,
            }
        } else {
            UnlockOutcome::Incorrect {
                remaining_attempts: MAX_ATTEMPTS - self.failures,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::pin::hash_pin;

    fn unlock() -> (PinUnlock, ManualClock) {
        let clock = ManualClock::new();
        (PinUnlock::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn counts_down_remaining_attempts() {
        let (mut u, _) = unlock();
        let hash = hash_pin("123456");
        assert_eq!(
            u.submit("000000", Some(&hash)).unwrap(),
            UnlockOutcome::Incorrect { remaining_attempts: 4 }
        );
        let msg = u.submit("000000", Some(&hash)).unwrap().message().unwrap();
        assert!(msg.starts_with("Incorrect PIN"));
        assert!(msg.contains("3 attempts remaining"));
    }

    #[test]
    fn success_resets_counter() {
        let (mut u, _) = unlock();
        let hash = hash_pin("123456");
        u.submit("000000", Some(&hash)).unwrap();
        assert_eq!(u.submit("123456", Some(&hash)).unwrap(), UnlockOutcome::Unlocked);
        assert_eq!(u.failures(), 0);
    }

    #[test]
    fn lockout_rejects_digits_then_expires() {
        let (mut u, clock) = unlock();
        let hash = hash_pin("123456");
        for _ in 0..4 {
            u.submit("999999", Some(&hash)).unwrap();
        }
        assert!(matches!(
            u.submit("999999", Some(&hash)).unwrap(),
            UnlockOutcome::LockedOut { .. }
        ));
        assert!(matches!(
            u.submit("123456", Some(&hash)).unwrap(),
            UnlockOutcome::LockedOut { .. }
        ));
        assert!(matches!(u.push_digit('1', Some(&hash)).unwrap(), UnlockOutcome::LockedOut { .. }));
        assert_eq!(u.filled(), 0);

        clock.advance(Duration::from_secs(29));
        assert!(u.lockout_remaining().is_some());
        clock.advance(Duration::from_secs(1));
        assert_eq!(u.lockout_remaining(), None);
        assert_eq!(u.failures(), 0);
        assert_eq!(u.submit("123456", Some(&hash)).unwrap(), UnlockOutcome::Unlocked);
    }

    #[test]
    fn missing_hash_reads_as_incorrect() {
        let (mut u, _) = unlock();
        assert_eq!(
            u.submit("123456", None).unwrap(),
            UnlockOutcome::Incorrect { remaining_attempts: 4 }
        );
    }

    #[test]
    fn digit_entry_checks_on_sixth_digit() {
        let (mut u, _) = unlock();
        let hash = hash_pin("246810");
        for d in "24681".chars() {
            assert!(matches!(u.push_digit(d, Some(&hash)).unwrap(), UnlockOutcome::Collecting { .. }));
        }
        assert_eq!(u.push_digit('0', Some(&hash)).unwrap(), UnlockOutcome::Unlocked);
    }
}
