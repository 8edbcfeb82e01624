//! Register script compiler
//!
//! Line oriented; `#` starts a comment outside quotes. Everything is checked
//! here so the interpreter never meets an unknown register or a bad literal.

use super::{Script, Step};
use crate::runtime::CompileDiagnostic;
use regsynth_registers::{FunctionClass, RegisterKind, RegisterSpec, RegisterValue};
use std::collections::HashMap;

/// Statements allowed in one `self_test:` block
pub const STEP_LIMIT: usize = 1024;

/// Longest single `wait`
pub const MAX_WAIT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
struct Token {
    text: String,
    column: u32,
}

fn tokenize(line: &str, line_no: u32) -> Result<Vec<Token>, CompileDiagnostic> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(idx, ch)) = chars.peek() {
        let column = u32::try_from(line[..idx].chars().count() + 1).unwrap_or(u32::MAX);
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '#' {
            break;
        } else if ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                text.push(c);
            }
            if !closed {
                return Err(CompileDiagnostic::at(line_no, column, "unterminated string literal"));
            }
            tokens.push(Token { text, column });
        } else {
            let mut text = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_whitespace() || c == '#' {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token { text, column });
        }
    }
    Ok(tokens)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_address(token: &Token, line: u32) -> Result<u16, CompileDiagnostic> {
    let text = token.text.as_str();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|_| {
        CompileDiagnostic::at(
            line,
            token.column,
            format!("invalid register address `{text}` (expected 0..=65535, decimal or 0x hex)"),
        )
    })
}

fn parse_class(token: &Token, line: u32) -> Result<FunctionClass, CompileDiagnostic> {
    token.text.parse().map_err(|_| {
        CompileDiagnostic::at(
            line,
            token.column,
            format!("unknown register class `{}` (expected holding or input)", token.text),
        )
    })
}

fn parse_kind(token: &Token, line: u32) -> Result<RegisterKind, CompileDiagnostic> {
    token.text.parse().map_err(|_| {
        CompileDiagnostic::at(
            line,
            token.column,
            format!("unknown register kind `{}`", token.text),
        )
    })
}

fn parse_value(kind: RegisterKind, token: &Token, line: u32) -> Result<RegisterValue, CompileDiagnostic> {
    RegisterValue::parse(kind, &token.text)
        .map_err(|e| CompileDiagnostic::at(line, token.column, e.to_string()))
}

struct Compiler {
    script: Script,
    by_name: HashMap<String, RegisterSpec>,
    steps: Option<Vec<Step>>,
    returned: bool,
}

impl Compiler {
    fn line(&mut self, tokens: &[Token], line: u32) -> Result<(), CompileDiagnostic> {
        let head = &tokens[0];
        let arity = |n: usize, usage: &str| -> Result<(), CompileDiagnostic> {
            if tokens.len() == n {
                Ok(())
            } else {
                Err(CompileDiagnostic::at(line, head.column, format!("expected `{usage}`")))
            }
        };

        if self.steps.is_some() {
            return self.statement(tokens, line);
        }

        match head.text.as_str() {
            "driver" => {
                arity(2, "driver \"<name>\"")?;
                if self.script.driver.is_some() || !self.by_name.is_empty() {
                    return Err(CompileDiagnostic::at(
                        line,
                        head.column,
                        "`driver` must appear once, before any register",
                    ));
                }
                self.script.driver = Some(tokens[1].text.clone());
            }
            "register" => {
                arity(5, "register <name> <holding|input> <address> <kind>")?;
                let name = &tokens[1];
                if !is_identifier(&name.text) || name.text.parse::<FunctionClass>().is_ok() {
                    return Err(CompileDiagnostic::at(
                        line,
                        name.column,
                        format!("invalid register name `{}`", name.text),
                    ));
                }
                if self.by_name.contains_key(&name.text) {
                    return Err(CompileDiagnostic::at(
                        line,
                        name.column,
                        format!("register `{}` declared twice", name.text),
                    ));
                }
                let class = parse_class(&tokens[2], line)?;
                let address = parse_address(&tokens[3], line)?;
                let kind = parse_kind(&tokens[4], line)?;
                let spec = RegisterSpec::new(address, kind, class, name.text.clone());
                spec.span()
                    .map_err(|e| CompileDiagnostic::at(line, tokens[3].column, e.to_string()))?;
                self.by_name.insert(name.text.clone(), spec.clone());
                self.script.registers.push(spec);
            }
            "self_test:" => {
                arity(1, "self_test:")?;
                self.steps = Some(Vec::new());
            }
            "read" | "write" | "wait" | "return" => {
                return Err(CompileDiagnostic::at(
                    line,
                    head.column,
                    format!("`{}` is only allowed inside self_test:", head.text),
                ));
            }
            other => {
                return Err(CompileDiagnostic::at(
                    line,
                    head.column,
                    format!("unexpected `{other}`"),
                ));
            }
        }
        Ok(())
    }

    fn statement(&mut self, tokens: &[Token], line: u32) -> Result<(), CompileDiagnostic> {
        let head = &tokens[0];
        if self.returned {
            return Err(CompileDiagnostic::at(line, head.column, "statement after return"));
        }
        if self.steps.as_ref().is_some_and(|s| s.len() >= STEP_LIMIT) {
            return Err(CompileDiagnostic::at(
                line,
                head.column,
                format!("step limit of {STEP_LIMIT} statements exceeded"),
            ));
        }

        let step = match head.text.as_str() {
            "read" => self.read(tokens, line)?,
            "write" => {
                if tokens.len() != 3 {
                    return Err(CompileDiagnostic::at(line, head.column, "expected `write <name> <value>`"));
                }
                let register = self.lookup(&tokens[1], line)?;
                if register.function_class != FunctionClass::ReadHolding {
                    return Err(CompileDiagnostic::at(
                        line,
                        tokens[1].column,
                        format!("register `{}` is an input register and cannot be written", register.name),
                    ));
                }
                let value = parse_value(register.kind, &tokens[2], line)?;
                Step::Write { register, value, line }
            }
            "wait" => {
                let millis = match tokens {
                    [_, t] => t.text.parse::<u64>().ok().filter(|ms| *ms <= MAX_WAIT_MS),
                    _ => None,
                };
                let millis = millis.ok_or_else(|| {
                    CompileDiagnostic::at(
                        line,
                        head.column,
                        format!("expected `wait <millis>` with at most {MAX_WAIT_MS} ms"),
                    )
                })?;
                Step::Wait { millis }
            }
            "return" => {
                let verdict = match tokens {
                    [_, t] if t.text == "true" => true,
                    [_, t] if t.text == "false" => false,
                    _ => {
                        return Err(CompileDiagnostic::at(
                            line,
                            head.column,
                            "expected `return true` or `return false`",
                        ))
                    }
                };
                self.returned = true;
                Step::Return(verdict)
            }
            "self_test:" => {
                return Err(CompileDiagnostic::at(line, head.column, "self_test: opened twice"));
            }
            "register" | "driver" => {
                return Err(CompileDiagnostic::at(
                    line,
                    head.column,
                    format!("`{}` must come before self_test:", head.text),
                ));
            }
            other => {
                return Err(CompileDiagnostic::at(
                    line,
                    head.column,
                    format!("unknown statement `{other}`"),
                ));
            }
        };

        if let Some(steps) = self.steps.as_mut() {
            steps.push(step);
        }
        Ok(())
    }

    fn read(&self, tokens: &[Token], line: u32) -> Result<Step, CompileDiagnostic> {
        let usage = || {
            CompileDiagnostic::at(
                line,
                tokens[0].column,
                "expected `read <name> [expect <value>]` or `read <holding|input> <address> <kind> [expect <value>]`",
            )
        };

        let (register, rest) = match tokens.get(1) {
            Some(t) if self.by_name.contains_key(&t.text) => (self.lookup(t, line)?, &tokens[2..]),
            Some(t) if t.text.parse::<FunctionClass>().is_ok() => {
                if tokens.len() < 4 {
                    return Err(usage());
                }
                let class = parse_class(t, line)?;
                let address = parse_address(&tokens[2], line)?;
                let kind = parse_kind(&tokens[3], line)?;
                let spec = RegisterSpec::new(address, kind, class, format!("0x{address:04X}"));
                spec.span()
                    .map_err(|e| CompileDiagnostic::at(line, tokens[2].column, e.to_string()))?;
                (spec, &tokens[4..])
            }
            Some(t) => return Err(self.lookup(t, line).err().unwrap_or_else(usage)),
            None => return Err(usage()),
        };

        let expect = match rest {
            [] => None,
            [kw, value] if kw.text == "expect" => Some(parse_value(register.kind, value, line)?),
            _ => return Err(usage()),
        };

        Ok(Step::Read {
            register,
            expect,
            line,
        })
    }

    fn lookup(&self, token: &Token, line: u32) -> Result<RegisterSpec, CompileDiagnostic> {
        self.by_name.get(&token.text).cloned().ok_or_else(|| {
            CompileDiagnostic::at(
                line,
                token.column,
                format!("unknown register `{}`", token.text),
            )
        })
    }
}

/// Compile script source
///
/// # Errors
/// `CompileDiagnostic` with the 1-based line and column of the first problem
pub fn compile(source: &str) -> Result<Script, CompileDiagnostic> {
    if source.trim().is_empty() {
        return Err(CompileDiagnostic::general("empty script"));
    }

    let mut compiler = Compiler {
        script: Script::default(),
        by_name: HashMap::new(),
        steps: None,
        returned: false,
    };

    for (idx, raw) in source.lines().enumerate() {
        let line = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let tokens = tokenize(raw, line)?;
        if tokens.is_empty() {
            continue;
        }
        compiler.line(&tokens, line)?;
    }

    let mut script = compiler.script;
    script.self_test = compiler.steps;
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"
# inverter driver
driver "SMA Sunny Boy"
register status holding 30000 uint16
register power input 0x7594 uint32

self_test:
    read status expect 1
    read power
    read holding 40001 int16
    wait 5
    return true
"#;

    #[test]
    fn compiles_full_script() {
        let script = compile(SOURCE).unwrap();
        assert_eq!(script.driver.as_deref(), Some("SMA Sunny Boy"));
        assert_eq!(script.registers.len(), 2);
        assert_eq!(script.registers[1].address, 0x7594);
        assert_eq!(script.registers[1].function_class, FunctionClass::ReadInput);

        let steps = script.self_test.unwrap();
        assert_eq!(steps.len(), 5);
        assert!(matches!(
            &steps[0],
            Step::Read { register, expect: Some(RegisterValue::U16(1)), line: 8 } if register.name == "status"
        ));
        assert!(matches!(&steps[2], Step::Read { register, expect: None, .. } if register.address == 40001));
        assert_eq!(steps[4], Step::Return(true));
    }

    #[test]
    fn script_without_self_test() {
        let script = compile("register a holding 30000 uint16\n").unwrap();
        assert!(script.self_test.is_none());
    }

    #[test]
    fn unknown_register_reports_position() {
        let err = compile("self_test:\n  read missing\n").unwrap_err();
        assert_eq!(err.line, Some(2));
        assert_eq!(err.column, Some(8));
        assert!(err.message.contains("unknown register `missing`"));
    }

    #[test]
    fn bad_address_is_compile_error() {
        let err = compile("register a holding 70000 uint16").unwrap_err();
        assert_eq!((err.line, err.column), (Some(1), Some(20)));
    }

    #[test]
    fn input_registers_are_read_only() {
        let err = compile("register p input 30000 uint16\nself_test:\nwrite p 5\n").unwrap_err();
        assert_eq!(err.line, Some(3));
        assert!(err.message.contains("cannot be written"));
    }

    #[test]
    fn statement_after_return() {
        let err = compile("self_test:\nreturn true\nwait 1\n").unwrap_err();
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn unterminated_string() {
        let err = compile("driver \"abc\n").unwrap_err();
        assert_eq!((err.line, err.column), (Some(1), Some(8)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = compile("def run_self_test():\n    return True\n").unwrap_err();
        assert_eq!((err.line, err.column), (Some(1), Some(1)));
    }

    #[test]
    fn expect_literal_must_fit_kind() {
        let err = compile("register a holding 30000 int16\nself_test:\nread a expect 40000\n").unwrap_err();
        assert_eq!((err.line, err.column), (Some(3), Some(15)));
    }

    #[test]
    fn step_limit() {
        let mut source = String::from("self_test:\n");
        for _ in 0..=STEP_LIMIT {
            source.push_str("wait 0\n");
        }
        let err = compile(&source).unwrap_err();
        assert_eq!(err.line, Some(u32::try_from(STEP_LIMIT).unwrap() + 2));
    }
}
