//! Python subprocess runtime
//!
//! Source is syntax-checked with tree-sitter and never imported by the host.
//! A self-test runs `python3` in its own process with a cleared environment;
//! a small harness calls the candidate's `run_self_test` and prints one
//! marked JSON line describing the verdict, report or fault.
//!
//! The separate process keeps candidate crashes and hangs away from the
//! orchestrator. It is not a security boundary.

use super::{
    CandidateFault, CandidateRuntime, CompileDiagnostic, LoadedCandidate, ObservedMismatch,
    SelfTest, SelfTestReport, SelfTestValue, TestTarget,
};
use regsynth_oracle::ExceptionCode;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Top-level function a Python candidate defines to be testable
pub const SELF_TEST_ENTRY_POINT: &str = "run_self_test";

const RESULT_MARKER: &str = "__REGSYNTH_RESULT__";

const HARNESS: &str = r#"
import asyncio, inspect, json, sys

MARKER = "__REGSYNTH_RESULT__"

def emit(payload):
    sys.stdout.write("\n" + MARKER + json.dumps(payload) + "\n")
    sys.stdout.flush()

def classify(exc):
    text = str(exc)
    code = getattr(exc, "exception_code", None)
    if code is None and ("IllegalDataAddress" in text or "0x02" in text):
        code = 2
    if isinstance(code, int):
        address = getattr(exc, "address", None)
        return {"kind": "fault", "fault": "protocol", "code": code,
                "address": address if isinstance(address, int) else None,
                "message": text}
    if isinstance(exc, (ConnectionError, TimeoutError, OSError)):
        return {"kind": "fault", "fault": "transport", "message": text}
    return {"kind": "fault", "fault": "runtime", "message": type(exc).__name__ + ": " + text}

def hexstr(value):
    if isinstance(value, (bytes, bytearray)):
        return value.hex()
    return value if isinstance(value, str) else None

async def settle(awaitable):
    return await awaitable

def main():
    namespace = {"__name__": "candidate"}
    try:
        exec(compile(sys.stdin.read(), "<candidate>", "exec"), namespace)
        result = namespace["run_self_test"]()
        if inspect.isawaitable(result):
            result = asyncio.run(settle(result))
        if isinstance(result, bool):
            emit({"kind": "verdict", "value": result})
        elif isinstance(result, dict):
            message = result.get("error_message") or result.get("message")
            emit({"kind": "report",
                  "success": bool(result.get("success", False)),
                  "message": None if message is None else str(message),
                  "tested_registers": [str(r) for r in result.get("tested_registers", [])],
                  "expected_bytes": hexstr(result.get("expected_bytes")),
                  "actual_bytes": hexstr(result.get("actual_bytes"))})
        else:
            emit({"kind": "opaque"})
    except BaseException as exc:
        emit(classify(exc))

main()
"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum HarnessMessage {
    Verdict {
        value: bool,
    },
    Report {
        success: bool,
        message: Option<String>,
        #[serde(default)]
        tested_registers: Vec<String>,
        expected_bytes: Option<String>,
        actual_bytes: Option<String>,
    },
    Opaque,
    Fault {
        fault: FaultKind,
        message: String,
        code: Option<u8>,
        address: Option<u16>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FaultKind {
    Protocol,
    Transport,
    Runtime,
}

impl HarnessMessage {
    fn into_result(self) -> Result<SelfTestValue, CandidateFault> {
        match self {
            HarnessMessage::Verdict { value } => Ok(SelfTestValue::Verdict(value)),
            HarnessMessage::Opaque => Ok(SelfTestValue::Opaque),
            HarnessMessage::Report {
                success,
                message,
                tested_registers,
                expected_bytes,
                actual_bytes,
            } => {
                let mismatch = match (expected_bytes, actual_bytes) {
                    (Some(e), Some(a)) => match (hex::decode(&e), hex::decode(&a)) {
                        (Ok(expected_bytes), Ok(actual_bytes)) => Some(ObservedMismatch {
                            register: "candidate report".to_string(),
                            address: None,
                            expected_bytes,
                            actual_bytes,
                            detail: message.clone().unwrap_or_default(),
                        }),
                        _ => None,
                    },
                    _ => None,
                };
                Ok(SelfTestValue::Report(SelfTestReport {
                    success,
                    message,
                    tested_registers,
                    mismatch,
                }))
            }
            HarnessMessage::Fault {
                fault,
                message,
                code,
                address,
            } => Err(match fault {
                FaultKind::Protocol => CandidateFault::Protocol {
                    code: ExceptionCode::from_code(code.unwrap_or(0x02)),
                    class: None,
                    start: address.unwrap_or(0),
                    count: u16::from(address.is_some()),
                    address,
                },
                FaultKind::Transport => CandidateFault::Transport(message),
                FaultKind::Runtime => CandidateFault::Runtime(message),
            }),
        }
    }
}

/// Syntax check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModuleShape {
    has_entry_point: bool,
}

fn first_error_node(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find_map(first_error_node)
}

fn defines_entry_point(root: tree_sitter::Node<'_>, source: &str) -> bool {
    (0..root.child_count())
        .filter_map(|i| root.child(i))
        .filter_map(|node| match node.kind() {
            "function_definition" => Some(node),
            "decorated_definition" => node.child_by_field_name("definition"),
            _ => None,
        })
        .filter_map(|def| def.child_by_field_name("name"))
        .any(|name| name.utf8_text(source.as_bytes()) == Ok(SELF_TEST_ENTRY_POINT))
}

fn check_module(source: &str) -> Result<ModuleShape, CompileDiagnostic> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| CompileDiagnostic::general(format!("python grammar unavailable: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CompileDiagnostic::general("python parser gave up"))?;
    let root = tree.root_node();

    if let Some(node) = first_error_node(root) {
        let pos = node.start_position();
        let line = u32::try_from(pos.row + 1).unwrap_or(u32::MAX);
        let column = u32::try_from(pos.column + 1).unwrap_or(u32::MAX);
        let message = if node.is_missing() {
            format!("invalid syntax: missing `{}`", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Err(CompileDiagnostic::at(line, column, message));
    }

    Ok(ModuleShape {
        has_entry_point: defines_entry_point(root, source),
    })
}

/// Runtime for Python candidates
#[derive(Debug, Clone)]
pub struct PythonRuntime {
    interpreter: PathBuf,
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
        }
    }
}

impl PythonRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific interpreter binary
    #[inline]
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

impl CandidateRuntime for PythonRuntime {
    fn name(&self) -> &'static str {
        "python"
    }

    fn load(&self, source: &str) -> Result<Box<dyn LoadedCandidate>, CompileDiagnostic> {
        if source.trim().is_empty() {
            return Err(CompileDiagnostic::general("empty module"));
        }
        let shape = check_module(source)?;
        Ok(Box::new(PythonCandidate {
            source: Arc::from(source),
            interpreter: self.interpreter.clone(),
            has_entry_point: shape.has_entry_point,
        }))
    }
}

/// Syntax-checked Python module
#[derive(Debug, Clone)]
pub struct PythonCandidate {
    source: Arc<str>,
    interpreter: PathBuf,
    has_entry_point: bool,
}

impl LoadedCandidate for PythonCandidate {
    fn self_test(&self) -> Option<&dyn SelfTest> {
        self.has_entry_point.then_some(self as &dyn SelfTest)
    }

    fn describe(&self) -> String {
        format!("python module ({} bytes)", self.source.len())
    }
}

#[async_trait::async_trait]
impl SelfTest for PythonCandidate {
    async fn run(&self, target: TestTarget) -> Result<SelfTestValue, CandidateFault> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg("-I")
            .arg("-c")
            .arg(HARNESS)
            .env_clear()
            .env("REGSYNTH_HOST", target.endpoint.ip().to_string())
            .env("REGSYNTH_PORT", target.endpoint.port().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let mut child = command.spawn().map_err(|e| {
            CandidateFault::Runtime(format!(
                "failed to start {}: {e}",
                self.interpreter.display()
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.source.as_bytes())
                .await
                .map_err(|e| CandidateFault::Runtime(format!("failed to pass candidate source: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CandidateFault::Runtime(format!("candidate process failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = stdout
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(RESULT_MARKER));

        match message {
            Some(json) => serde_json::from_str::<HarnessMessage>(json)
                .map_err(|e| CandidateFault::Runtime(format!("unreadable harness output: {e}")))?
                .into_result(),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
                Err(CandidateFault::Runtime(format!(
                    "candidate exited with {} without a result: {tail}",
                    output.status
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_has_position() {
        let err = PythonRuntime::new()
            .load("def run_self_test(:\n    return True\n")
            .unwrap_err();
        assert_eq!(err.line, Some(1));
        assert!(err.column.is_some());
    }

    #[test]
    fn entry_point_is_detected() {
        let candidate = PythonRuntime::new()
            .load("import os\n\nasync def run_self_test():\n    return True\n")
            .unwrap();
        assert!(candidate.self_test().is_some());
    }

    #[test]
    fn module_without_entry_point_is_untestable() {
        let candidate = PythonRuntime::new()
            .load("def read_power(client):\n    return client.read(30775)\n")
            .unwrap();
        assert!(candidate.self_test().is_none());
    }

    #[test]
    fn nested_entry_point_does_not_count() {
        let candidate = PythonRuntime::new()
            .load("class Driver:\n    def run_self_test(self):\n        return True\n")
            .unwrap();
        assert!(candidate.self_test().is_none());
    }

    #[test]
    fn harness_fault_maps_to_protocol() {
        let msg: HarnessMessage = serde_json::from_str(
            r#"{"kind":"fault","fault":"protocol","code":2,"address":5,"message":"IllegalDataAddress"}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_result(),
            Err(CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                class: None,
                start: 5,
                count: 1,
                address: Some(5),
            })
        );
    }

    #[test]
    fn harness_report_with_bytes() {
        let msg: HarnessMessage = serde_json::from_str(
            r#"{"kind":"report","success":false,"message":"bad","tested_registers":["a"],"expected_bytes":"0064","actual_bytes":"00c8"}"#,
        )
        .unwrap();
        let Ok(SelfTestValue::Report(report)) = msg.into_result() else {
            panic!("expected report");
        };
        let mismatch = report.mismatch.unwrap();
        assert_eq!(mismatch.expected_bytes, vec![0x00, 0x64]);
        assert_eq!(mismatch.actual_bytes, vec![0x00, 0xC8]);
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn subprocess_verdict_and_environment() {
        if !python_available() {
            return;
        }
        let source = "import os\n\ndef run_self_test():\n    return os.environ.get('REGSYNTH_PORT') == '5020' and 'HOME' not in os.environ\n";
        let candidate = PythonRuntime::new().load(source).unwrap();
        let value = candidate
            .self_test()
            .unwrap()
            .run(TestTarget {
                endpoint: "127.0.0.1:5020".parse().unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(value, SelfTestValue::Verdict(true));
    }

    #[tokio::test]
    async fn subprocess_exception_is_classified() {
        if !python_available() {
            return;
        }
        let source = "def run_self_test():\n    raise RuntimeError('Modbus Error: IllegalDataAddress')\n";
        let candidate = PythonRuntime::new().load(source).unwrap();
        let err = candidate
            .self_test()
            .unwrap()
            .run(TestTarget {
                endpoint: "127.0.0.1:5020".parse().unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CandidateFault::Protocol {
                code: ExceptionCode::IllegalDataAddress,
                address: None,
                ..
            }
        ));
    }
}
