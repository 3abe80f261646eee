//! In-process evaluation for `inline` jobs.
//!
//! Inline jobs never spawn a process. Each evaluation starts from an empty
//! namespace and writes into a fresh [`Capture`]. Faults are rendered into the
//! captured stderr instead of being returned as errors.

use std::collections::HashMap;
use std::fmt;

use crate::core::types::InlineOutcome;

/// Output captured while evaluating one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub stdout: String,
    pub stderr: String,
}

/// Evaluates source text in-process.
pub trait InlineEvaluator: Send + Sync {
    fn evaluate(&self, source: &str, capture: &mut Capture) -> InlineOutcome;
}

/// Line-oriented evaluator for quick checks.
///
/// Understands comments, `import`/`from` lines (ignored), `name = expr`,
/// `print(...)` with `sep`/`end`/`file=sys.stderr`, the exit forms
/// (`exit()`, `quit()`, `sys.exit(...)`, `raise SystemExit`) and
/// `raise Name("message")`. Expressions are string and integer literals,
/// names, and `+`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineEvaluator;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Val {
    Str(String),
    Int(i64),
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => f.write_str(s),
            Val::Int(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug)]
struct Fault {
    kind: String,
    message: String,
}

impl Fault {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

enum Step {
    Continue,
    Stop,
}

type Namespace = HashMap<String, Val>;

impl InlineEvaluator for LineEvaluator {
    fn evaluate(&self, source: &str, capture: &mut Capture) -> InlineOutcome {
        let mut namespace = Namespace::new();
        for (index, line) in source.lines().enumerate() {
            match run_line(line, &mut namespace, capture) {
                Ok(Step::Continue) => {}
                Ok(Step::Stop) => return InlineOutcome::StopSignal,
                Err(fault) => {
                    let rendered = format!("{}: {}", fault.kind, fault.message);
                    capture.stderr.push_str(&format!(
                        "Traceback (most recent call last):\n  line {}\n{}\n",
                        index + 1,
                        rendered
                    ));
                    return InlineOutcome::Fault(rendered);
                }
            }
        }
        InlineOutcome::NormalCompletion
    }
}

fn run_line(line: &str, namespace: &mut Namespace, capture: &mut Capture) -> Result<Step, Fault> {
    let stmt = line.trim();
    if stmt.is_empty() || stmt.starts_with('#') {
        return Ok(Step::Continue);
    }
    if line.starts_with([' ', '\t']) {
        return Err(Fault::new("IndentationError", "unexpected indent"));
    }
    if stmt.starts_with("import ") || stmt.starts_with("from ") {
        return Ok(Step::Continue);
    }
    if is_exit(stmt) {
        return Ok(Step::Stop);
    }
    if let Some(rest) = stmt.strip_prefix("raise ") {
        return Err(raise(rest.trim(), namespace));
    }
    if let Some(args) = call_args(stmt, "print") {
        print(args, namespace, capture)?;
        return Ok(Step::Continue);
    }
    if let Some((name, expr)) = assignment(stmt) {
        let value = eval(expr, namespace)?;
        namespace.insert(name.to_string(), value);
        return Ok(Step::Continue);
    }
    Err(Fault::new(
        "SyntaxError",
        format!("unsupported statement: {stmt}"),
    ))
}

fn is_exit(stmt: &str) -> bool {
    ["exit", "quit", "sys.exit"]
        .iter()
        .any(|name| call_args(stmt, name).is_some())
        || stmt == "raise SystemExit"
        || call_args(stmt, "raise SystemExit").is_some()
}

fn raise(rest: &str, namespace: &Namespace) -> Fault {
    let (kind, args) = match rest.find('(') {
        Some(open) if rest.ends_with(')') => (&rest[..open], &rest[open + 1..rest.len() - 1]),
        _ => (rest, ""),
    };
    if !is_identifier(kind) {
        return Fault::new("SyntaxError", format!("invalid raise: {rest}"));
    }
    if args.trim().is_empty() {
        return Fault::new(kind, "");
    }
    match eval(args, namespace) {
        Ok(value) => Fault::new(kind, value.to_string()),
        Err(fault) => fault,
    }
}

/// Return the argument text of `name(...)` when `stmt` is exactly that call.
fn call_args<'a>(stmt: &'a str, name: &str) -> Option<&'a str> {
    let rest = stmt.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner)
}

fn assignment(stmt: &str) -> Option<(&str, &str)> {
    let (name, expr) = stmt.split_once('=')?;
    let name = name.trim();
    if !is_identifier(name) || expr.starts_with('=') {
        return None;
    }
    Some((name, expr.trim()))
}

fn print(args: &str, namespace: &Namespace, capture: &mut Capture) -> Result<(), Fault> {
    let mut values = Vec::new();
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    let mut to_stderr = false;
    for arg in split_top_level(args, ',') {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        match assignment(arg) {
            Some(("file", target)) => match target {
                "sys.stderr" => to_stderr = true,
                "sys.stdout" => to_stderr = false,
                other => return Err(Fault::new("TypeError", format!("unsupported file: {other}"))),
            },
            Some(("sep", expr)) => sep = eval(expr, namespace)?.to_string(),
            Some(("end", expr)) => end = eval(expr, namespace)?.to_string(),
            Some((other, _)) => {
                return Err(Fault::new(
                    "TypeError",
                    format!("'{other}' is an invalid keyword argument for print()"),
                ));
            }
            None => values.push(eval(arg, namespace)?.to_string()),
        }
    }
    let target = if to_stderr {
        &mut capture.stderr
    } else {
        &mut capture.stdout
    };
    target.push_str(&values.join(&sep));
    target.push_str(&end);
    Ok(())
}

fn eval(expr: &str, namespace: &Namespace) -> Result<Val, Fault> {
    let mut result: Option<Val> = None;
    for term in split_top_level(expr, '+') {
        let value = eval_term(term.trim(), namespace)?;
        result = Some(match result {
            None => value,
            Some(Val::Str(a)) => match value {
                Val::Str(b) => Val::Str(a + &b),
                Val::Int(_) => {
                    return Err(Fault::new(
                        "TypeError",
                        "can only concatenate str (not \"int\") to str",
                    ));
                }
            },
            Some(Val::Int(a)) => match value {
                Val::Int(b) => Val::Int(
                    a.checked_add(b)
                        .ok_or_else(|| Fault::new("OverflowError", "integer overflow"))?,
                ),
                Val::Str(_) => {
                    return Err(Fault::new(
                        "TypeError",
                        "unsupported operand type(s) for +: 'int' and 'str'",
                    ));
                }
            },
        });
    }
    result.ok_or_else(|| Fault::new("SyntaxError", "empty expression"))
}

fn eval_term(term: &str, namespace: &Namespace) -> Result<Val, Fault> {
    if let Some(literal) = string_literal(term) {
        return literal.map(Val::Str);
    }
    if let Ok(n) = term.parse::<i64>() {
        return Ok(Val::Int(n));
    }
    if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return eval(inner, namespace);
    }
    if let Some(inner) = call_args(term, "str") {
        return Ok(Val::Str(eval(inner, namespace)?.to_string()));
    }
    if is_identifier(term) {
        return namespace
            .get(term)
            .cloned()
            .ok_or_else(|| Fault::new("NameError", format!("name '{term}' is not defined")));
    }
    Err(Fault::new(
        "SyntaxError",
        format!("unsupported expression: {term}"),
    ))
}

fn string_literal(term: &str) -> Option<Result<String, Fault>> {
    let quote = term.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if term.len() < 2 || !term.ends_with(quote) {
        return Some(Err(Fault::new(
            "SyntaxError",
            "unterminated string literal",
        )));
    }
    let body = &term[1..term.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(Ok(out))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Split on `sep` outside of quotes and parentheses.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
