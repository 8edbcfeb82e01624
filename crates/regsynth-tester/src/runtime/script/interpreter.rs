use super::{ScriptCandidate, Step};
use crate::runtime::{
    CandidateFault, ObservedMismatch, SelfTest, SelfTestReport, SelfTestValue, TestTarget,
};
use regsynth_oracle::ModbusClient;
use regsynth_registers::RegisterValue;
use std::time::Duration;

#[async_trait::async_trait]
impl SelfTest for ScriptCandidate {
    async fn run(&self, target: TestTarget) -> Result<SelfTestValue, CandidateFault> {
        let steps = self.script.self_test.as_deref().unwrap_or_default();
        let mut client = ModbusClient::connect(target.endpoint).await?;

        let mut tested = Vec::new();
        let mut checked_any = false;

        for step in steps {
            match step {
                Step::Read {
                    register,
                    expect,
                    line,
                } => {
                    let words = client
                        .read_registers(register.function_class, register.address, register.register_count())
                        .await?;
                    let actual = RegisterValue::decode(register.kind, &words)
                        .map_err(|e| CandidateFault::Runtime(format!("line {line}: {e}")))?;
                    tested.push(format!("{}={actual}", register.name));

                    let Some(expected) = expect else { continue };
                    checked_any = true;
                    let expected_bytes = expected.to_be_bytes();
                    let actual_bytes = actual.to_be_bytes();
                    if expected_bytes != actual_bytes {
                        let detail = format!(
                            "Register {} ({}) mismatch: expected {expected}, got {actual}",
                            register.name,
                            register.address_hex()
                        );
                        tracing::debug!(line, %detail, "script expectation failed");
                        return Ok(SelfTestValue::Report(SelfTestReport {
                            success: false,
                            message: Some(detail.clone()),
                            tested_registers: tested,
                            mismatch: Some(ObservedMismatch {
                                register: register.name.clone(),
                                address: Some(register.address),
                                expected_bytes,
                                actual_bytes,
                                detail,
                            }),
                        }));
                    }
                }
                Step::Write {
                    register, value, ..
                } => {
                    client
                        .write_registers(register.address, &value.to_registers())
                        .await?;
                }
                Step::Wait { millis } => tokio::time::sleep(Duration::from_millis(*millis)).await,
                Step::Return(verdict) => return Ok(SelfTestValue::Verdict(*verdict)),
            }
        }

        Ok(if checked_any {
            SelfTestValue::Report(SelfTestReport {
                success: true,
                message: None,
                tested_registers: tested,
                mismatch: None,
            })
        } else {
            SelfTestValue::Opaque
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{CandidateFault, CandidateRuntime, ScriptRuntime, SelfTestValue, TestTarget};
    use regsynth_oracle::{ExceptionCode, Oracle};
    use regsynth_registers::{FunctionClass, ValidAddressSet};

    async fn run(oracle: &Oracle, source: &str) -> Result<SelfTestValue, CandidateFault> {
        let candidate = ScriptRuntime.load(source).unwrap();
        let test = candidate.self_test().unwrap();
        test.run(TestTarget {
            endpoint: oracle.endpoint(),
        })
        .await
    }

    async fn oracle() -> Oracle {
        Oracle::ephemeral(ValidAddressSet::uniform(30000..30100)).await.unwrap()
    }

    #[tokio::test]
    async fn passing_expectations_produce_report() {
        let oracle = oracle().await;
        let value = run(
            &oracle,
            "register s holding 30000 uint16\nself_test:\nread s expect 1\n",
        )
        .await
        .unwrap();
        match value {
            SelfTestValue::Report(report) => {
                assert!(report.success);
                assert_eq!(report.tested_registers, vec!["s=1 (0x0001)".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatch_stops_and_localizes() {
        let oracle = oracle().await;
        oracle
            .server()
            .store()
            .seed(FunctionClass::ReadHolding, 30001, 200);
        let source = "register a holding 30001 uint16\nregister b holding 30002 uint16\n\
                      self_test:\nread a expect 100\nread b\n";
        let SelfTestValue::Report(report) = run(&oracle, source).await.unwrap() else {
            panic!("expected report");
        };
        assert!(!report.success);
        assert_eq!(report.tested_registers.len(), 1);
        let mismatch = report.mismatch.unwrap();
        assert_eq!(mismatch.expected_bytes, vec![0x00, 0x64]);
        assert_eq!(mismatch.actual_bytes, vec![0x00, 0xC8]);
    }

    #[tokio::test]
    async fn illegal_address_is_protocol_fault() {
        let oracle = oracle().await;
        let err = run(&oracle, "self_test:\nread holding 5 uint16\n")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                address: Some(5),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn explicit_verdict_wins() {
        let oracle = oracle().await;
        let value = run(&oracle, "self_test:\nread input 30000 uint16\nreturn false\n")
            .await
            .unwrap();
        assert_eq!(value, SelfTestValue::Verdict(false));
    }

    #[tokio::test]
    async fn reads_without_expectations_are_opaque() {
        let oracle = oracle().await;
        let value = run(&oracle, "self_test:\nread holding 30010 uint32\n")
            .await
            .unwrap();
        assert_eq!(value, SelfTestValue::Opaque);
    }
}
