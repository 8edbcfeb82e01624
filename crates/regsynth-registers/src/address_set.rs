//! Per-class address allow-lists
//!
//! The oracle accepts the register map's plausible addresses plus a fixed
//! safety superset, so it can still answer "what would have worked" when the
//! map itself is wrong.

use crate::kind::FunctionClass;
use crate::map::RegisterMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Map addresses below this are treated as documentation offsets, not registers
pub const DEFAULT_PLAUSIBILITY_FLOOR: u16 = 1000;

/// Half-open address range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    /// First address
    pub start: u16,
    /// One past the last address
    pub end: u16,
}

impl AddressRange {
    /// Create range
    #[inline]
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Addresses in the range
    #[inline]
    pub fn iter(self) -> impl Iterator<Item = u16> {
        self.start..self.end
    }
}

/// Addresses the oracle always serves, per class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSuperset {
    /// Holding register ranges
    pub holding: Vec<AddressRange>,
    /// Input register ranges
    pub input: Vec<AddressRange>,
}

impl AddressSuperset {
    /// Superset that admits nothing extra
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            holding: Vec::new(),
            input: Vec::new(),
        }
    }

    /// Add a range for one class
    #[must_use]
    pub fn with_range(mut self, class: FunctionClass, range: AddressRange) -> Self {
        match class {
            FunctionClass::ReadHolding => self.holding.push(range),
            FunctionClass::ReadInput => self.input.push(range),
        }
        self
    }

    /// Ranges for one class
    #[inline]
    #[must_use]
    pub fn ranges(&self, class: FunctionClass) -> &[AddressRange] {
        match class {
            FunctionClass::ReadHolding => &self.holding,
            FunctionClass::ReadInput => &self.input,
        }
    }

    /// Whether one class admits no address
    #[must_use]
    pub fn is_class_empty(&self, class: FunctionClass) -> bool {
        self.ranges(class).iter().all(|r| r.start >= r.end)
    }

    /// Whether no class has any range
    #[must_use]
    pub fn is_empty(&self) -> bool {
        FunctionClass::ALL.iter().all(|c| self.is_class_empty(*c))
    }

    /// First class that admits no address
    #[must_use]
    pub fn empty_class(&self) -> Option<FunctionClass> {
        FunctionClass::ALL.into_iter().find(|c| self.is_class_empty(*c))
    }
}

impl Default for AddressSuperset {
    /// Status/measurement block at 30000 and configuration block at 40000
    fn default() -> Self {
        let ranges = vec![AddressRange::new(30000, 30100), AddressRange::new(40000, 40050)];
        Self {
            holding: ranges.clone(),
            input: ranges,
        }
    }
}

/// Addresses the oracle will accept, per function class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidAddressSet {
    holding: BTreeSet<u16>,
    input: BTreeSet<u16>,
}

impl ValidAddressSet {
    /// Derive from a register map and the safety superset
    ///
    /// Map addresses below `plausibility_floor` are not admitted.
    #[must_use]
    pub fn derive(map: &RegisterMap, superset: &AddressSuperset, plausibility_floor: u16) -> Self {
        let mut set = Self::default();
        for class in FunctionClass::ALL {
            let target = set.class_mut(class);
            target.extend(superset.ranges(class).iter().flat_map(|r| r.iter()));
            for spec in map.iter().filter(|s| s.function_class == class) {
                if spec.address < plausibility_floor {
                    continue;
                }
                if let Ok(span) = spec.span() {
                    target.extend(span);
                }
            }
        }
        set
    }

    /// Explicit per-class sets
    #[inline]
    #[must_use]
    pub fn from_sets(holding: BTreeSet<u16>, input: BTreeSet<u16>) -> Self {
        Self { holding, input }
    }

    /// Same addresses for every class
    #[must_use]
    pub fn uniform(addresses: impl IntoIterator<Item = u16>) -> Self {
        let holding: BTreeSet<u16> = addresses.into_iter().collect();
        Self {
            input: holding.clone(),
            holding,
        }
    }

    /// Replace one class's addresses
    #[must_use]
    pub fn with_class(mut self, class: FunctionClass, addresses: impl IntoIterator<Item = u16>) -> Self {
        *self.class_mut(class) = addresses.into_iter().collect();
        self
    }

    /// Addresses of one class
    #[inline]
    #[must_use]
    pub fn addresses(&self, class: FunctionClass) -> &BTreeSet<u16> {
        match class {
            FunctionClass::ReadHolding => &self.holding,
            FunctionClass::ReadInput => &self.input,
        }
    }

    fn class_mut(&mut self, class: FunctionClass) -> &mut BTreeSet<u16> {
        match class {
            FunctionClass::ReadHolding => &mut self.holding,
            FunctionClass::ReadInput => &mut self.input,
        }
    }

    /// Whether one address is allowed
    #[inline]
    #[must_use]
    pub fn contains(&self, class: FunctionClass, address: u16) -> bool {
        self.addresses(class).contains(&address)
    }

    /// Check `[start, start+count)`; returns the first address outside the set
    ///
    /// # Errors
    /// The first offending address (a span past `u16::MAX` fails at the first
    /// address that does not exist)
    pub fn check_range(&self, class: FunctionClass, start: u16, count: u16) -> Result<(), u16> {
        let set = self.addresses(class);
        for offset in 0..count {
            let Some(address) = start.checked_add(offset) else {
                return Err(start.saturating_add(offset));
            };
            if !set.contains(&address) {
                return Err(address);
            }
        }
        Ok(())
    }

    /// Whether a class admits nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self, class: FunctionClass) -> bool {
        self.addresses(class).is_empty()
    }

    /// Total addresses across classes (an address in both counts twice)
    #[must_use]
    pub fn len(&self) -> usize {
        self.holding.len() + self.input.len()
    }

    /// Lowest `limit` addresses, ascending
    ///
    /// With no class given the classes are unioned.
    #[must_use]
    pub fn suggestions(&self, class: Option<FunctionClass>, limit: usize) -> Vec<u16> {
        match class {
            Some(class) => self.addresses(class).iter().copied().take(limit).collect(),
            None => self
                .holding
                .union(&self.input)
                .copied()
                .take(limit)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::RegisterKind;
    use crate::spec::RegisterSpec;
    use proptest::prelude::*;

    #[test]
    fn derive_adds_plausible_map_addresses() {
        let map = RegisterMap::from_specs([
            RegisterSpec::new(5, RegisterKind::Uint16, FunctionClass::ReadHolding, "low"),
            RegisterSpec::new(45000, RegisterKind::Uint32, FunctionClass::ReadInput, "wide"),
        ])
        .unwrap();

        let set = ValidAddressSet::derive(&map, &AddressSuperset::default(), DEFAULT_PLAUSIBILITY_FLOOR);

        assert!(!set.contains(FunctionClass::ReadHolding, 5));
        assert!(set.contains(FunctionClass::ReadInput, 45000));
        assert!(set.contains(FunctionClass::ReadInput, 45001));
        assert!(!set.contains(FunctionClass::ReadHolding, 45000));
        assert!(set.contains(FunctionClass::ReadHolding, 30099));
        assert!(!set.contains(FunctionClass::ReadHolding, 30100));
    }

    #[test]
    fn check_range_reports_first_offender() {
        let set = ValidAddressSet::uniform(30000..30100);
        assert!(set.check_range(FunctionClass::ReadHolding, 30000, 100).is_ok());
        assert_eq!(set.check_range(FunctionClass::ReadHolding, 30098, 4), Err(30100));
        assert_eq!(set.check_range(FunctionClass::ReadInput, 5, 1), Err(5));
    }

    #[test]
    fn suggestions_ascending_and_bounded() {
        let set = ValidAddressSet::default()
            .with_class(FunctionClass::ReadHolding, [40001, 30005, 30000])
            .with_class(FunctionClass::ReadInput, [30002]);

        assert_eq!(set.suggestions(Some(FunctionClass::ReadHolding), 2), vec![30000, 30005]);
        assert_eq!(set.suggestions(None, 10), vec![30000, 30002, 30005, 40001]);
    }

    #[test]
    fn empty_superset() {
        assert!(AddressSuperset::empty().is_empty());
        assert!(!AddressSuperset::default().is_empty());
        assert_eq!(AddressSuperset::default().empty_class(), None);
    }

    #[test]
    fn holding_only_superset_has_empty_input_class() {
        let superset = AddressSuperset::empty()
            .with_range(FunctionClass::ReadHolding, AddressRange::new(40000, 40050))
            .with_range(FunctionClass::ReadInput, AddressRange::new(30000, 30000));
        assert!(!superset.is_empty());
        assert!(superset.is_class_empty(FunctionClass::ReadInput));
        assert_eq!(superset.empty_class(), Some(FunctionClass::ReadInput));
    }

    #[test]
    fn allow_list_serde_round_trip() {
        let set = ValidAddressSet::default()
            .with_class(FunctionClass::ReadHolding, [40000, 40001])
            .with_class(FunctionClass::ReadInput, [30000]);
        let json = serde_json::to_string(&set).unwrap();
        let back: ValidAddressSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    proptest! {
        #[test]
        fn check_range_accepts_exactly_covered_spans(
            allowed in prop::collection::btree_set(65_500_u16..=u16::MAX, 0..36),
            start in 65_490_u16..=u16::MAX,
            count in 0_u16..20,
        ) {
            let set = ValidAddressSet::default().with_class(FunctionClass::ReadInput, allowed.clone());
            let covered = (0..count).all(|offset| {
                start.checked_add(offset).is_some_and(|a| allowed.contains(&a))
            });
            let result = set.check_range(FunctionClass::ReadInput, start, count);
            prop_assert_eq!(result.is_ok(), covered);
            if let Err(offender) = result {
                prop_assert!(!allowed.contains(&offender) || offender == u16::MAX);
            }
            // Other class is untouched
            prop_assert_eq!(set.check_range(FunctionClass::ReadHolding, start, count).is_ok(), count == 0);
        }

        #[test]
        fn derive_never_admits_implausible_map_addresses(address in 0_u16..1000) {
            let map = RegisterMap::from_specs([RegisterSpec::new(
                address,
                RegisterKind::Uint16,
                FunctionClass::ReadHolding,
                "low",
            )])
            .unwrap();
            let set = ValidAddressSet::derive(&map, &AddressSuperset::default(), DEFAULT_PLAUSIBILITY_FLOOR);
            prop_assert!(!set.contains(FunctionClass::ReadHolding, address));
        }
    }
}
