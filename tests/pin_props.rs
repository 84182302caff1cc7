use minet_lib::security::{hash_pin, verify_pin, PinSetup, SetupProgress};
use proptest::prelude::*;

proptest! {
    #[test]
    fn hash_is_stable_hex_and_verifies(pin in "[0-9]{6}") {
        let hash = hash_pin(&pin);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        prop_assert_eq!(&hash, &hash_pin(&pin));
        prop_assert!(verify_pin(&pin, &hash));
    }

    #[test]
    fn different_pins_do_not_verify(a in "[0-9]{6}", b in "[0-9]{6}") {
        prop_assume!(a != b);
        prop_assert!(!verify_pin(&b, &hash_pin(&a)));
    }

    #[test]
    fn setup_matches_only_identical_entries(a in "[0-9]{6}", b in "[0-9]{6}") {
        let mut setup = PinSetup::new();
        prop_assert_eq!(setup.submit(&a).unwrap(), SetupProgress::ConfirmNeeded);
        match setup.submit(&b).unwrap() {
            SetupProgress::Matched { hash } => {
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(hash, hash_pin(&a));
            }
            SetupProgress::Mismatch => prop_assert_ne!(&a, &b),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}
