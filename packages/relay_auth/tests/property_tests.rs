use proptest::prelude::*;

use relay_auth::capability::{Capability, Trust};
use relay_auth::trust::{BackendSecret, classify};

fn arb_secret() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..128)
}

fn arb_capability() -> impl Strategy<Value = Capability> {
    prop_oneof![
        Just(Capability::JoinRoom),
        Just(Capability::JoinShadowRoom),
        Just(Capability::Relay),
        Just(Capability::CompleteMessage),
        Just(Capability::CrossTeamAccess),
    ]
}

// --- Classifier ---

proptest! {
    #[test]
    fn exact_secret_always_grants(secret in arb_secret()) {
        let configured = BackendSecret::new(secret.clone());
        prop_assert!(classify(Some(&secret), &configured).is_some());
    }

    #[test]
    fn any_single_byte_flip_denies(secret in arb_secret(), idx in any::<prop::sample::Index>(), flip in 1u8..=255) {
        let configured = BackendSecret::new(secret.clone());
        let mut presented = secret.clone();
        let i = idx.index(presented.len());
        presented[i] ^= flip;
        prop_assert!(classify(Some(&presented), &configured).is_none());
    }

    #[test]
    fn length_mismatch_denies(secret in arb_secret(), extra in prop::collection::vec(any::<u8>(), 1..16)) {
        let configured = BackendSecret::new(secret.clone());

        let mut longer = secret.clone();
        longer.extend_from_slice(&extra);
        prop_assert!(classify(Some(&longer), &configured).is_none());

        let shorter = &secret[..secret.len() - 1];
        prop_assert!(classify(Some(shorter), &configured).is_none());
    }

    #[test]
    fn disabled_secret_denies_everything(presented in prop::collection::vec(any::<u8>(), 0..64)) {
        let configured = BackendSecret::new(Vec::new());
        prop_assert!(classify(Some(&presented), &configured).is_none());
    }
}

// --- Trust levels ---

proptest! {
    #[test]
    fn user_capabilities_are_subset_of_backend(cap in arb_capability()) {
        let configured = BackendSecret::new("k");
        let backend = Trust::Backend(classify(Some(b"k"), &configured).unwrap());
        if Trust::User.allows(cap) {
            prop_assert!(backend.allows(cap));
        }
    }

    #[test]
    fn anonymous_never_allowed(cap in arb_capability()) {
        prop_assert!(!Trust::Anonymous.allows(cap));
    }
}
