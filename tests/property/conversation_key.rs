//! Property tests for conversation keys and identity resolution.
//!
//! Uses proptest to verify:
//! 1. The key of `(a, b)` equals the key of `(b, a)`, hashes equally, and
//!    matches messages in either direction.
//! 2. Whichever identifier field a participant record uses, resolution
//!    produces the same key.
//! 3. Resolution never panics and fails only when both fields are blank.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use carechat_proto::conversation::ConversationKey;
use carechat_proto::participant::{
    IdentityError, Participant, ParticipantId, RawParticipant, Role, resolve,
};
use proptest::prelude::*;

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,24}"
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::Client),
        Just(Role::Counselor),
        Just(Role::Assistant),
        Just(Role::AdminObserver),
    ]
}

/// A record carrying `id` under the primary field, the legacy field, or both.
fn arb_raw_for(id: String) -> impl Strategy<Value = RawParticipant> {
    (0u8..3, arb_role()).prop_map(move |(shape, role)| RawParticipant {
        id: (shape != 1).then(|| id.clone()),
        legacy_id: (shape != 0).then(|| id.clone()),
        role,
        name: None,
    })
}

fn hash_of(key: &ConversationKey) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

proptest! {
    #[test]
    fn key_is_symmetric(a in arb_id(), b in arb_id()) {
        let ab = ConversationKey::new(ParticipantId::new(&a), ParticipantId::new(&b));
        let ba = ConversationKey::new(ParticipantId::new(&b), ParticipantId::new(&a));
        prop_assert_eq!(&ab, &ba);
        prop_assert_eq!(hash_of(&ab), hash_of(&ba));
        prop_assert!(ab.matches(&ParticipantId::new(&a), &ParticipantId::new(&b)));
        prop_assert!(ab.matches(&ParticipantId::new(&b), &ParticipantId::new(&a)));
    }

    #[test]
    fn key_is_independent_of_identifier_field(
        (a, raw_a1, raw_a2) in arb_id().prop_flat_map(|id| (Just(id.clone()), arb_raw_for(id.clone()), arb_raw_for(id))),
        (b, raw_b1, raw_b2) in arb_id().prop_flat_map(|id| (Just(id.clone()), arb_raw_for(id.clone()), arb_raw_for(id))),
    ) {
        let k1 = ConversationKey::between(
            &Participant::try_from(&raw_a1).unwrap(),
            &Participant::try_from(&raw_b1).unwrap(),
        );
        let k2 = ConversationKey::between(
            &Participant::try_from(&raw_b2).unwrap(),
            &Participant::try_from(&raw_a2).unwrap(),
        );
        prop_assert_eq!(&k1, &k2);
        prop_assert_eq!(k1, ConversationKey::new(ParticipantId::new(a), ParticipantId::new(b)));
    }

    #[test]
    fn resolve_fails_only_without_any_identifier(
        id in proptest::option::of("[ a-z]{0,6}"),
        legacy in proptest::option::of("[ a-z]{0,6}"),
    ) {
        let raw = RawParticipant { id: id.clone(), legacy_id: legacy.clone(), role: Role::Client, name: None };
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        match resolve(&raw) {
            Ok(resolved) => {
                prop_assert!(!resolved.as_str().is_empty());
                prop_assert!(!(blank(&id) && blank(&legacy)));
            }
            Err(e) => {
                prop_assert_eq!(e, IdentityError::MissingIdentifier);
                prop_assert!(blank(&id) && blank(&legacy));
            }
        }
    }
}
