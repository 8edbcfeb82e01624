//! Validating register store
//!
//! The allow-list is an immutable snapshot swapped in one write, so a read
//! validates against exactly one configuration. A request succeeds only if
//! every address in `[start, start+count)` is allowed; one bad address fails
//! the whole request, reads and writes alike.

use crate::error::StoreError;
use dashmap::DashMap;
use parking_lot::RwLock;
use regsynth_registers::{synthetic_value, FunctionClass, ValidAddressSet};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One allow-list configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListSnapshot {
    /// Monotonic configuration counter (0 = initial)
    pub epoch: u64,
    /// Allowed addresses
    pub addresses: ValidAddressSet,
}

/// Register store enforcing a per-class allow-list
#[derive(Debug)]
pub struct ValidatingStore {
    allow: RwLock<Arc<AllowListSnapshot>>,
    seeded: DashMap<(FunctionClass, u16), u16>,
}

impl ValidatingStore {
    /// Create store with an initial allow-list
    #[must_use]
    pub fn new(addresses: ValidAddressSet) -> Self {
        tracing::info!(
            holding = addresses.addresses(FunctionClass::ReadHolding).len(),
            input = addresses.addresses(FunctionClass::ReadInput).len(),
            "validating store created"
        );
        Self {
            allow: RwLock::new(Arc::new(AllowListSnapshot {
                epoch: 0,
                addresses,
            })),
            seeded: DashMap::new(),
        }
    }

    /// Current allow-list snapshot
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<AllowListSnapshot> {
        Arc::clone(&self.allow.read())
    }

    /// Current configuration epoch
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.allow.read().epoch
    }

    /// Replace the allow-list of every class at once
    ///
    /// Returns the new epoch; any request validated after this returns sees it.
    pub fn configure_all(&self, addresses: ValidAddressSet) -> u64 {
        let mut guard = self.allow.write();
        let epoch = guard.epoch + 1;
        tracing::info!(
            epoch,
            holding = addresses.addresses(FunctionClass::ReadHolding).len(),
            input = addresses.addresses(FunctionClass::ReadInput).len(),
            sample = ?addresses.suggestions(None, 10),
            "allow-list reconfigured"
        );
        *guard = Arc::new(AllowListSnapshot { epoch, addresses });
        epoch
    }

    /// Replace the allow-list of one class
    pub fn configure(&self, class: FunctionClass, addresses: BTreeSet<u16>) -> u64 {
        let mut guard = self.allow.write();
        let epoch = guard.epoch + 1;
        let next = guard.addresses.clone().with_class(class, addresses);
        tracing::info!(epoch, %class, count = next.addresses(class).len(), "allow-list reconfigured");
        *guard = Arc::new(AllowListSnapshot {
            epoch,
            addresses: next,
        });
        epoch
    }

    /// Read `count` consecutive registers
    ///
    /// # Errors
    /// - `StoreError::IllegalQuantity` for a zero count
    /// - `StoreError::IllegalAddress` if any address is outside the allow-list
    pub fn read(&self, class: FunctionClass, start: u16, count: u16) -> Result<Vec<u16>, StoreError> {
        let snapshot = self.snapshot();
        self.validate(&snapshot, class, start, count)?;

        let values: Vec<u16> = (0..count)
            .map(|offset| self.value_at(class, start + offset))
            .collect();

        tracing::debug!(%class, start, count, values = ?&values[..values.len().min(5)], "registers read");
        Ok(values)
    }

    /// Write consecutive holding registers
    ///
    /// # Errors
    /// Same rules as [`read`](Self::read) against the holding allow-list
    pub fn write(&self, start: u16, values: &[u16]) -> Result<(), StoreError> {
        let count = u16::try_from(values.len()).map_err(|_| StoreError::IllegalQuantity { count: u16::MAX })?;
        let snapshot = self.snapshot();
        self.validate(&snapshot, FunctionClass::ReadHolding, start, count)?;

        for (offset, value) in (0u16..).zip(values) {
            self.seeded
                .insert((FunctionClass::ReadHolding, start + offset), *value);
        }
        Ok(())
    }

    /// Pin a register to a fixed value
    #[inline]
    pub fn seed(&self, class: FunctionClass, address: u16, value: u16) {
        self.seeded.insert((class, address), value);
    }

    /// Forget every seeded and written value
    #[inline]
    pub fn reseed(&self) {
        self.seeded.clear();
    }

    fn value_at(&self, class: FunctionClass, address: u16) -> u16 {
        self.seeded
            .get(&(class, address))
            .map_or_else(|| synthetic_value(address), |v| *v)
    }

    fn validate(
        &self,
        snapshot: &AllowListSnapshot,
        class: FunctionClass,
        start: u16,
        count: u16,
    ) -> Result<(), StoreError> {
        if count == 0 {
            return Err(StoreError::IllegalQuantity { count });
        }
        snapshot
            .addresses
            .check_range(class, start, count)
            .map_err(|address| {
                let sample = snapshot.addresses.suggestions(Some(class), 5);
                tracing::warn!(
                    requested = format!("0x{address:04X} ({address})"),
                    %class,
                    start,
                    count,
                    valid_sample = ?sample,
                    "ILLEGAL ADDRESS ACCESS"
                );
                StoreError::IllegalAddress {
                    class,
                    address,
                    start,
                    count,
                    epoch: snapshot.epoch,
                }
            })
    }
}
