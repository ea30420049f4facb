//! Interpreter-side harness and its JSON wire protocol.
//!
//! The host writes one [`HarnessRequest`] to the child's stdin and reads one
//! [`HarnessReply`] line from its stdout. Candidate prints are redirected away
//! from the reply channel inside the child.

use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionResult, Grid, Violation};

/// Python program run with `-c`. Reads the request from stdin, executes the
/// candidate in a namespace whose builtins are stripped and whose imports go
/// through the allow-list, then calls `transform(input)`.
///
/// Only code whose globals carry the stripped builtins reaches the guarded
/// `__import__`; allowed modules import their own dependencies freely.
pub const HARNESS_SOURCE: &str = r#"
import builtins, io, json, sys

STRIPPED = ("open", "exec", "eval", "compile", "input", "breakpoint")

class _Violation(BaseException):
    def __init__(self, kind, name):
        BaseException.__init__(self, name)
        self.kind = kind
        self.name = name

def _plain(value):
    if hasattr(value, "tolist"):
        return value.tolist()
    if isinstance(value, (list, tuple)):
        return [_plain(v) for v in value]
    return value

def main():
    request = json.loads(sys.stdin.read())
    allowed = set(request["allowed_modules"]) | {"__future__"}
    channel = sys.stdout
    seen = []

    def reply(payload):
        channel.write(json.dumps(payload) + "\n")
        channel.flush()

    real_import = builtins.__import__

    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level != 0 or name.split(".")[0] not in allowed:
            violation = _Violation("disallowed_import", "." * level + name)
            seen.append(violation)
            raise violation
        return real_import(name, globals, locals, fromlist, level)

    def stripped(op):
        def deny(*args, **kwargs):
            violation = _Violation("forbidden_operation", op)
            seen.append(violation)
            raise violation
        return deny

    sandbox_builtins = dict(vars(builtins))
    for op in STRIPPED:
        sandbox_builtins[op] = stripped(op)
    sandbox_builtins["__import__"] = guarded_import
    namespace = {"__name__": "__candidate__", "__builtins__": sandbox_builtins}

    try:
        code = compile(request["source"], "<candidate>", "exec")
    except SyntaxError as e:
        reply({"status": "malformed", "detail": "SyntaxError: %s (line %s)" % (e.msg, e.lineno)})
        return

    sys.stdout = io.StringIO()
    try:
        exec(code, namespace)
        transform = namespace.get("transform")
        if not callable(transform):
            reply({"status": "malformed", "detail": "no callable transform(grid) is defined"})
            return
        output = transform(request["input"])
        if seen:
            raise seen[0]
        output = _plain(output)
        try:
            encoded = json.dumps({"status": "ok", "output": output})
        except (TypeError, ValueError) as e:
            reply({"status": "invalid", "raw": repr(output)[:500], "detail": "not JSON-serializable: %s" % e})
            return
        channel.write(encoded + "\n")
        channel.flush()
    except _Violation as v:
        reply({"status": "violation", "kind": v.kind, "name": v.name})
    except BaseException as e:
        if seen:
            reply({"status": "violation", "kind": seen[0].kind, "name": seen[0].name})
        else:
            reply({"status": "error", "type": type(e).__name__, "message": str(e)[:2000]})

main()
"#;

/// Request document written to the harness stdin.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessRequest<'a> {
    pub source: &'a str,
    pub input: &'a Grid,
    pub allowed_modules: Vec<&'a str>,
}

/// Reply line printed by the harness.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarnessReply {
    Ok {
        output: serde_json::Value,
    },
    Invalid {
        raw: String,
        detail: String,
    },
    Error {
        #[serde(rename = "type")]
        kind: String,
        message: String,
    },
    Violation {
        kind: String,
        name: String,
    },
    Malformed {
        detail: String,
    },
}

impl HarnessReply {
    /// Parse the last non-empty stdout line.
    pub fn parse(stdout: &str) -> Option<Self> {
        let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
        serde_json::from_str(line).ok()
    }

    /// Map onto the host-side result, validating the output grid.
    pub fn into_result(self) -> ExecutionResult {
        match self {
            HarnessReply::Ok { output } => match Grid::from_value(&output) {
                Ok(grid) => ExecutionResult::Output { grid },
                Err(e) => ExecutionResult::InvalidOutput {
                    raw: truncate(&output.to_string(), 500),
                    detail: e.to_string(),
                },
            },
            HarnessReply::Invalid { raw, detail } => ExecutionResult::InvalidOutput { raw, detail },
            HarnessReply::Error { kind, message } => ExecutionResult::RuntimeError { kind, message },
            HarnessReply::Violation { kind, name } => {
                let violation = if kind == "disallowed_import" {
                    Violation::DisallowedImport { module: name }
                } else {
                    Violation::ForbiddenOperation { name }
                };
                ExecutionResult::SandboxViolation { violation }
            }
            HarnessReply::Malformed { detail } => ExecutionResult::MalformedCandidate { detail },
        }
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_grid() {
        let reply = HarnessReply::parse("noise\n{\"status\":\"ok\",\"output\":[[1,2],[3,4]]}\n").unwrap();
        let result = reply.into_result();
        assert_eq!(result.grid().unwrap().shape(), (2, 2));
    }

    #[test]
    fn test_ok_with_wrong_dimensionality_is_reported() {
        let reply = HarnessReply::parse("{\"status\":\"ok\",\"output\":[1,2,3]}").unwrap();
        match reply.into_result() {
            ExecutionResult::InvalidOutput { raw, detail } => {
                assert_eq!(raw, "[1,2,3]");
                assert!(detail.contains("not a grid"));
            }
            other => panic!("expected InvalidOutput, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_and_violation() {
        let err = HarnessReply::parse(
            "{\"status\":\"error\",\"type\":\"ZeroDivisionError\",\"message\":\"division by zero\"}",
        )
        .unwrap()
        .into_result();
        assert_eq!(
            err,
            ExecutionResult::RuntimeError {
                kind: "ZeroDivisionError".into(),
                message: "division by zero".into()
            }
        );

        let v = HarnessReply::parse(
            "{\"status\":\"violation\",\"kind\":\"disallowed_import\",\"name\":\"os\"}",
        )
        .unwrap()
        .into_result();
        assert_eq!(
            v,
            ExecutionResult::SandboxViolation {
                violation: Violation::DisallowedImport { module: "os".into() }
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(HarnessReply::parse("").is_none());
        assert!(HarnessReply::parse("Traceback (most recent call last):").is_none());
    }

    #[test]
    fn test_request_shape() {
        let grid = Grid::new(vec![vec![1]]).unwrap();
        let req = HarnessRequest {
            source: "def transform(g): return g",
            input: &grid,
            allowed_modules: vec!["math"],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["input"], serde_json::json!([[1]]));
        assert_eq!(json["allowed_modules"][0], "math");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        let t = truncate("ééééé", 3);
        assert!(t.starts_with('é'));
        assert!(t.ends_with("[truncated]"));
    }
}
