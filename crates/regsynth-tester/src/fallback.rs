//! Built-in connectivity test for candidates without a self-test
//!
//! Reads every expected register with its own class and width, in order, and
//! stops at the first failure. With nothing expected it probes sentinel
//! holding addresses that no real map uses, which drives an empty parse
//! straight into the illegal-address path.

use crate::diagnosis::Execution;
use crate::runtime::{CandidateFault, ObservedMismatch, TestTarget};
use regsynth_oracle::ModbusClient;
use regsynth_registers::{RegisterSpec, RegisterValue};
use serde::{Deserialize, Serialize};

/// Probed when no expected registers are given
pub const SENTINEL_ADDRESSES: [u16; 3] = [0x0000, 0x0001, 0x0002];

/// A register to read, optionally with the value it must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRegister {
    pub spec: RegisterSpec,
    pub value: Option<RegisterValue>,
}

impl ExpectedRegister {
    /// Read only, no value check
    #[must_use]
    pub fn unchecked(spec: RegisterSpec) -> Self {
        Self { spec, value: None }
    }

    /// Read and compare
    #[must_use]
    pub fn with_value(spec: RegisterSpec, value: RegisterValue) -> Self {
        Self {
            spec,
            value: Some(value),
        }
    }
}

/// Run the connectivity test
pub async fn connectivity_test(target: TestTarget, expected: &[ExpectedRegister]) -> Execution {
    let mut execution = Execution::default();

    let sentinels: Vec<ExpectedRegister>;
    let probes = if expected.is_empty() {
        tracing::warn!(addresses = ?SENTINEL_ADDRESSES, "no expected registers, probing sentinel addresses");
        sentinels = SENTINEL_ADDRESSES
            .iter()
            .map(|a| ExpectedRegister::unchecked(RegisterSpec::synthetic(*a)))
            .collect();
        &sentinels[..]
    } else {
        tracing::info!(
            addresses = ?expected.iter().take(10).map(|e| e.spec.address).collect::<Vec<_>>(),
            "connectivity test"
        );
        expected
    };

    let mut client = match ModbusClient::connect(target.endpoint).await {
        Ok(client) => client,
        Err(e) => {
            execution.verdict = Some(false);
            execution.fault = Some(e.into());
            return execution;
        }
    };

    for probe in probes {
        let spec = &probe.spec;
        let words = match client
            .read_registers(spec.function_class, spec.address, spec.register_count())
            .await
        {
            Ok(words) => words,
            Err(e) => {
                execution.verdict = Some(false);
                execution.fault = Some(e.into());
                return execution;
            }
        };

        let actual = match RegisterValue::decode(spec.kind, &words) {
            Ok(value) => value,
            Err(e) => {
                execution.verdict = Some(false);
                execution.fault = Some(CandidateFault::Runtime(e.to_string()));
                return execution;
            }
        };
        execution
            .tested_registers
            .push(format!("{}={actual}", spec.address_hex()));

        if let Some(expected_value) = &probe.value {
            let expected_bytes = expected_value.to_be_bytes();
            let actual_bytes = actual.to_be_bytes();
            if expected_bytes != actual_bytes {
                let detail = format!(
                    "Register {} mismatch: expected {expected_value}, got {actual}",
                    spec.address_hex()
                );
                execution.verdict = Some(false);
                execution.message = Some(detail.clone());
                execution.mismatch = Some(ObservedMismatch {
                    register: spec.name.clone(),
                    address: Some(spec.address),
                    expected_bytes,
                    actual_bytes,
                    detail,
                });
                return execution;
            }
        }
    }

    execution.verdict = Some(true);
    execution
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsynth_oracle::{ExceptionCode, Oracle};
    use regsynth_registers::{FunctionClass, RegisterKind, ValidAddressSet};

    async fn oracle() -> Oracle {
        Oracle::ephemeral(ValidAddressSet::uniform(30000..30100)).await.unwrap()
    }

    fn target(oracle: &Oracle) -> TestTarget {
        TestTarget {
            endpoint: oracle.endpoint(),
        }
    }

    #[tokio::test]
    async fn sentinels_hit_illegal_address() {
        let oracle = oracle().await;
        let execution = connectivity_test(target(&oracle), &[]).await;
        assert!(matches!(
            execution.fault,
            Some(CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                address: Some(0),
                ..
            })
        ));
        // stops at the first failure
        assert_eq!(oracle.server().stats().requests_served, 1);
    }

    #[tokio::test]
    async fn expected_registers_pass() {
        let oracle = oracle().await;
        let expected = vec![
            ExpectedRegister::unchecked(RegisterSpec::new(30000, RegisterKind::Uint16, FunctionClass::ReadInput, "a")),
            ExpectedRegister::with_value(
                RegisterSpec::new(30001, RegisterKind::Uint32, FunctionClass::ReadHolding, "b"),
                RegisterValue::U32(0x0001_0001),
            ),
        ];
        let execution = connectivity_test(target(&oracle), &expected).await;
        assert_eq!(execution.verdict, Some(true));
        assert_eq!(execution.tested_registers.len(), 2);
        assert!(execution.tested_registers[0].starts_with("0x7530="));
    }

    #[tokio::test]
    async fn value_mismatch_stops() {
        let oracle = oracle().await;
        oracle.server().store().seed(FunctionClass::ReadHolding, 30005, 200);
        let expected = vec![ExpectedRegister::with_value(
            RegisterSpec::new(30005, RegisterKind::Uint16, FunctionClass::ReadHolding, "v"),
            RegisterValue::U16(100),
        )];
        let execution = connectivity_test(target(&oracle), &expected).await;
        let mismatch = execution.mismatch.unwrap();
        assert_eq!(mismatch.expected_bytes, vec![0x00, 0x64]);
        assert_eq!(mismatch.actual_bytes, vec![0x00, 0xC8]);
    }

    #[tokio::test]
    async fn unreachable_server_is_transport() {
        let oracle = oracle().await;
        let endpoint = oracle.endpoint();
        drop(oracle);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let execution = connectivity_test(TestTarget { endpoint }, &[]).await;
        assert!(matches!(execution.fault, Some(CandidateFault::Transport(_))));
    }
}
