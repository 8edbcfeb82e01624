//! Deterministic values for addresses nobody seeded
//!
//! Bands follow a typical solar inverter layout so reads look plausible.

/// Value served for an unseeded register
#[must_use]
pub fn synthetic_value(address: u16) -> u16 {
    match address {
        30000..=30099 => 1,
        30100..=30199 => 2500 + address % 100,
        30200..=30299 => 230 + address % 10,
        30300..=30399 => 10 + address % 10,
        30400..=30499 => 25 + address % 20,
        30500..=30599 => 1000 + address % 500,
        40000..=49999 => address % 1000,
        _ => address,
    }
}
