use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{AppError, AppResult};

/// Application-wide salt appended to every PIN before hashing.
pub const PIN_SALT: &str = "MiNet-CRM-v1-salt";
pub const PIN_LENGTH: usize = 6;

/// Lowercase hex SHA-256 of `pin` followed by [`PIN_SALT`].
pub fn hash_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(PIN_SALT.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_pin(pin: &str, stored_hash: &str) -> bool {
    hash_pin(pin) == stored_hash
}

pub fn is_pin_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub(crate) fn check_digit(digit: char) -> AppResult<()> {
    if digit.is_ascii_digit() {
        Ok(())
    } else {
        Err(AppError::validation("PIN_DIGIT", "PIN digits must be 0-9"))
    }
}

pub(crate) fn check_pin(pin: &str) -> AppResult<()> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::validation("PIN_FORMAT", "PIN must be 6 digits"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    Enter,
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupProgress {
    /// Still filling the current step.
    Collecting { step: SetupStep, filled: usize },
    /// First entry complete; the same PIN must be entered again.
    ConfirmNeeded,
    /// Second entry differed. Both entries were discarded.
    Mismatch,
    /// Both entries agreed. Only the hash leaves the state machine.
    Matched { hash: String },
}

/// Two-step PIN entry: type it, then type it again.
#[derive(Debug, Default)]
pub struct PinSetup {
    first: Option<String>,
    buffer: String,
}

impl PinSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> SetupStep {
        if self.first.is_some() {
            SetupStep::Confirm
        } else {
            SetupStep::Enter
        }
    }

    pub fn filled(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_digit(&mut self, digit: char) -> AppResult<SetupProgress> {
        check_digit(digit)?;
        self.buffer.push(digit);
        if self.buffer.len() < PIN_LENGTH {
            return Ok(SetupProgress::Collecting {
                step: self.step(),
                filled: self.buffer.len(),
            });
        }
        let entered = std::mem::take(&mut self.buffer);
        Ok(self.complete(entered))
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    /// Feeds a whole PIN at once, replacing anything typed in this step.
    pub fn submit(&mut self, pin: &str) -> AppResult<SetupProgress> {
        check_pin(pin)?;
        self.buffer.clear();
        Ok(self.complete(pin.to_string()))
    }

    /// Back to the first step with nothing retained.
    pub fn reset(&mut self) {
        self.first = None;
        self.buffer.clear();
    }

    fn complete(&mut self, entered: String) -> SetupProgress {
        match self.first.take() {
            None => {
                self.first = Some(entered);
                SetupProgress::ConfirmNeeded
            }
            Some(first) if first == entered => SetupProgress::Matched {
                hash: hash_pin(&entered),
            },
            Some(_) => {
                self.reset();
                SetupProgress::Mismatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_hex() {
        let hash = hash_pin("123456");
        assert!(is_pin_hash(&hash));
        assert_eq!(hash, hash_pin("123456"));
        assert_ne!(hash, hash_pin("123457"));
        let unsalted = hex::encode(Sha256::digest(b"123456"));
        assert_ne!(hash, unsalted);
    }

    #[test]
    fn setup_matches_on_identical_entries() {
        let mut setup = PinSetup::new();
        for d in "12345".chars() {
            assert!(matches!(
                setup.push_digit(d).unwrap(),
                SetupProgress::Collecting { step: SetupStep::Enter, .. }
            ));
        }
        assert_eq!(setup.push_digit('6').unwrap(), SetupProgress::ConfirmNeeded);
        assert_eq!(setup.step(), SetupStep::Confirm);
        assert_eq!(
            setup.submit("123456").unwrap(),
            SetupProgress::Matched { hash: hash_pin("123456") }
        );
    }

    #[test]
    fn mismatch_resets_to_enter() {
        let mut setup = PinSetup::new();
        setup.submit("111111").unwrap();
        setup.push_digit('2').unwrap();
        assert_eq!(setup.submit("222222").unwrap(), SetupProgress::Mismatch);
        assert_eq!(setup.step(), SetupStep::Enter);
        assert_eq!(setup.filled(), 0);
        assert_eq!(setup.submit("222222").unwrap(), SetupProgress::ConfirmNeeded);
    }

    #[test]
    fn rejects_non_digits() {
        let mut setup = PinSetup::new();
        assert!(setup.push_digit('x').is_err());
        assert!(setup.submit("12345").is_err());
        assert!(setup.submit("12345a").is_err());
    }
}
