use proptest::prelude::*;
use regsynth_oracle::{StoreError, ValidatingStore};
use regsynth_registers::{FunctionClass, ValidAddressSet};
use std::collections::BTreeSet;

fn class_strategy() -> impl Strategy<Value = FunctionClass> {
    prop_oneof![Just(FunctionClass::ReadHolding), Just(FunctionClass::ReadInput)]
}

proptest! {
    #[test]
    fn prop_read_succeeds_iff_range_is_allowed(
        allowed in prop::collection::btree_set(0u16..200, 0..120),
        class in class_strategy(),
        start in 0u16..200,
        count in 1u16..20,
    ) {
        let store = ValidatingStore::new(
            ValidAddressSet::from_sets(BTreeSet::new(), BTreeSet::new()).with_class(class, allowed.clone()),
        );
        let inside = (u32::from(start)..u32::from(start) + u32::from(count))
            .all(|a| u16::try_from(a).is_ok_and(|a| allowed.contains(&a)));

        match store.read(class, start, count) {
            Ok(values) => {
                prop_assert!(inside);
                prop_assert_eq!(values.len(), usize::from(count));
            }
            Err(StoreError::IllegalAddress { address, .. }) => {
                prop_assert!(!inside);
                prop_assert!(!allowed.contains(&address));
                prop_assert!(address >= start);
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }

    #[test]
    fn prop_configure_is_idempotent(
        allowed in prop::collection::btree_set(0u16..100, 1..50),
        probe in 0u16..100,
    ) {
        let store = ValidatingStore::new(ValidAddressSet::uniform(0..0));
        store.configure(FunctionClass::ReadHolding, allowed.clone());
        let once = store.read(FunctionClass::ReadHolding, probe, 1).is_ok();
        let first_epoch = store.epoch();

        store.configure(FunctionClass::ReadHolding, allowed.clone());
        let twice = store.read(FunctionClass::ReadHolding, probe, 1).is_ok();

        prop_assert_eq!(once, twice);
        prop_assert_eq!(once, allowed.contains(&probe));
        prop_assert!(store.epoch() > first_epoch);
    }
}

#[test]
fn other_class_is_unaffected_by_configure() {
    let store = ValidatingStore::new(ValidAddressSet::uniform(30000..30100));
    store.configure(FunctionClass::ReadInput, BTreeSet::new());
    assert!(store.read(FunctionClass::ReadInput, 30000, 1).is_err());
    assert_eq!(store.read(FunctionClass::ReadHolding, 30000, 1).unwrap(), vec![1]);
}
