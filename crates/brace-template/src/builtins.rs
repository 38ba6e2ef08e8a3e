/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in functions available to host script code.
//!
//! Names are matched lowercased. `isset` and `empty` are not here: they are
//! special forms handled by the parser because their operands are looked up
//! quietly.

use crate::context::{Number, Value};
use crate::eval_context::EvalContext;
use crate::error::{TemplateError, TemplateResult};
use crate::literal::escape_html;
use std::cmp::Ordering;

/// Names of all built-in functions.
pub const BUILTINS: &[&str] = &[
    "htmlspecialchars",
    "print_r",
    "var_dump",
    "ob_start",
    "ob_get_clean",
    "count",
    "strlen",
    "strtoupper",
    "strtolower",
    "ucfirst",
    "trim",
    "implode",
    "explode",
    "in_array",
    "array_keys",
    "array_values",
    "is_array",
    "is_null",
    "str_repeat",
    "json_encode",
    "nl2br",
    "max",
    "min",
    "abs",
    "round",
    "intval",
    "range",
];

/// Largest list `range()` will build.
const MAX_RANGE_LEN: usize = 1_000_000;

const TRIM_CHARS: &str = " \t\n\r\0\x0B";

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Call a built-in function.
///
/// Returns `None` if `name` is not a built-in.
pub fn call_builtin(
    name: &str,
    args: &[Value],
    ctx: &mut EvalContext,
) -> Option<TemplateResult<Value>> {
    let result = match name {
        "htmlspecialchars" => {
            arg(name, args, 0).map(|v| Value::String(escape_html(&v.render())))
        }
        "print_r" => print_r(args, ctx),
        "var_dump" => var_dump(args, ctx),
        "ob_start" => {
            ctx.start_buffer();
            Ok(Value::Bool(true))
        }
        "ob_get_clean" => Ok(ctx
            .end_buffer()
            .map(Value::String)
            .unwrap_or(Value::Bool(false))),
        "count" => count(args),
        "strlen" => arg(name, args, 0).map(|v| Value::Int(v.render().len() as i64)),
        "strtoupper" => arg(name, args, 0).map(|v| Value::String(v.render().to_ascii_uppercase())),
        "strtolower" => arg(name, args, 0).map(|v| Value::String(v.render().to_ascii_lowercase())),
        "ucfirst" => arg(name, args, 0).map(|v| Value::String(ucfirst(&v.render()))),
        "trim" => trim(args),
        "implode" => implode(args),
        "explode" => explode(args),
        "in_array" => in_array(args),
        "array_keys" => collection(name, args).map(|entries| {
            Value::List(entries.into_iter().map(|(key, _)| key).collect())
        }),
        "array_values" => collection(name, args).map(|entries| {
            Value::List(entries.into_iter().map(|(_, value)| value.clone()).collect())
        }),
        "is_array" => arg(name, args, 0).map(|v| Value::Bool(v.is_collection())),
        "is_null" => arg(name, args, 0).map(|v| Value::Bool(matches!(v, Value::Null))),
        "str_repeat" => str_repeat(args),
        "json_encode" => json_encode(args),
        "nl2br" => arg(name, args, 0).map(|v| Value::String(nl2br(&v.render()))),
        "max" => extreme(name, args, Ordering::Greater),
        "min" => extreme(name, args, Ordering::Less),
        "abs" => abs(args),
        "round" => round(args),
        "intval" => arg(name, args, 0).map(|v| Value::Int(intval(v))),
        "range" => range(args),
        _ => return None,
    };
    Some(result)
}

fn arg<'a>(name: &str, args: &'a [Value], index: usize) -> TemplateResult<&'a Value> {
    args.get(index).ok_or_else(|| {
        TemplateError::type_mismatch(format!(
            "{}() expects at least {} argument(s), {} given",
            name,
            index + 1,
            args.len()
        ))
    })
}

fn to_int(value: &Value, name: &str) -> TemplateResult<i64> {
    Ok(match value.to_number(name)? {
        Number::Int(i) => i,
        Number::Float(f) => f as i64,
    })
}

fn collection<'a>(name: &str, args: &'a [Value]) -> TemplateResult<Vec<(Value, &'a Value)>> {
    let value = arg(name, args, 0)?;
    value.entries().ok_or_else(|| {
        TemplateError::type_mismatch(format!(
            "{}(): Argument #1 must be of type array, {} given",
            name,
            value.type_name()
        ))
    })
}

fn print_r(args: &[Value], ctx: &mut EvalContext) -> TemplateResult<Value> {
    let text = arg("print_r", args, 0)?.print_r();
    if args.get(1).is_some_and(Value::is_truthy) {
        return Ok(Value::String(text));
    }
    ctx.write(&text);
    Ok(Value::Bool(true))
}

fn var_dump(args: &[Value], ctx: &mut EvalContext) -> TemplateResult<Value> {
    arg("var_dump", args, 0)?;
    for value in args {
        ctx.write(&value.var_dump());
    }
    Ok(Value::Null)
}

fn count(args: &[Value]) -> TemplateResult<Value> {
    let value = arg("count", args, 0)?;
    match value.len() {
        Some(len) => Ok(Value::Int(len as i64)),
        None => Err(TemplateError::type_mismatch(format!(
            "count(): Argument #1 must be of type Countable|array, {} given",
            value.type_name()
        ))),
    }
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => {
            let mut out = first.to_ascii_uppercase().to_string();
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn trim(args: &[Value]) -> TemplateResult<Value> {
    let s = arg("trim", args, 0)?.render();
    let chars = args
        .get(1)
        .map(Value::render)
        .unwrap_or_else(|| TRIM_CHARS.to_string());
    Ok(Value::String(
        s.trim_matches(|c| chars.contains(c)).to_string(),
    ))
}

fn implode(args: &[Value]) -> TemplateResult<Value> {
    let (separator, pieces) = match args {
        [pieces] if pieces.is_collection() => (String::new(), pieces),
        [separator, pieces, ..] if pieces.is_collection() => (separator.render(), pieces),
        [pieces, separator, ..] if pieces.is_collection() => (separator.render(), pieces),
        _ => {
            return Err(TemplateError::type_mismatch(
                "implode(): Argument #2 must be of type array",
            ));
        }
    };
    let parts: Vec<String> = pieces
        .entries()
        .unwrap_or_default()
        .into_iter()
        .map(|(_, value)| value.render())
        .collect();
    Ok(Value::String(parts.join(&separator)))
}

fn explode(args: &[Value]) -> TemplateResult<Value> {
    let separator = arg("explode", args, 0)?.render();
    let s = arg("explode", args, 1)?.render();
    if separator.is_empty() {
        return Err(TemplateError::type_mismatch(
            "explode(): Argument #1 ($separator) cannot be empty",
        ));
    }
    let limit = args.get(2).map(|v| to_int(v, "explode")).transpose()?;

    let parts: Vec<&str> = match limit {
        None => s.split(separator.as_str()).collect(),
        Some(n) if n > 0 => s.splitn(n as usize, separator.as_str()).collect(),
        Some(0) => vec![s.as_str()],
        Some(n) => {
            let all: Vec<&str> = s.split(separator.as_str()).collect();
            let keep = all.len().saturating_sub(n.unsigned_abs() as usize);
            all[..keep].to_vec()
        }
    };
    Ok(Value::List(parts.into_iter().map(Value::from).collect()))
}

fn in_array(args: &[Value]) -> TemplateResult<Value> {
    let needle = arg("in_array", args, 0)?;
    let haystack = collection("in_array", &args[1..])?;
    let strict = args.get(2).is_some_and(Value::is_truthy);
    let found = haystack.iter().any(|(_, value)| {
        if strict {
            value.strict_eq(needle)
        } else {
            value.loose_eq(needle)
        }
    });
    Ok(Value::Bool(found))
}

fn str_repeat(args: &[Value]) -> TemplateResult<Value> {
    let s = arg("str_repeat", args, 0)?.render();
    let times = to_int(arg("str_repeat", args, 1)?, "str_repeat")?;
    let times = usize::try_from(times).map_err(|_| {
        TemplateError::type_mismatch(
            "str_repeat(): Argument #2 ($times) must be greater than or equal to 0",
        )
    })?;
    Ok(Value::String(s.repeat(times)))
}

fn json_encode(args: &[Value]) -> TemplateResult<Value> {
    let json = arg("json_encode", args, 0)?.to_json();
    serde_json::to_string(&json)
        .map(Value::String)
        .map_err(|e| TemplateError::type_mismatch(format!("json_encode(): {}", e)))
}

fn nl2br(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                out.push_str("<br />\r\n");
            }
            '\n' | '\r' => {
                out.push_str("<br />");
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn extreme(name: &str, args: &[Value], want: Ordering) -> TemplateResult<Value> {
    let candidates: Vec<&Value> = match args {
        [_] => collection(name, args)?
            .into_iter()
            .map(|(_, value)| value)
            .collect(),
        _ => args.iter().collect(),
    };
    let Some((first, rest)) = candidates.split_first() else {
        return Err(TemplateError::type_mismatch(format!(
            "{}(): Argument #1 ($value) must contain at least one element",
            name
        )));
    };
    let mut best = *first;
    for value in rest {
        if value.loose_cmp(best) == Some(want) {
            best = *value;
        }
    }
    Ok(best.clone())
}

fn abs(args: &[Value]) -> TemplateResult<Value> {
    Ok(match arg("abs", args, 0)?.to_number("abs")? {
        Number::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or(Value::Float((i as f64).abs())),
        Number::Float(f) => Value::Float(f.abs()),
    })
}

fn round(args: &[Value]) -> TemplateResult<Value> {
    let value = arg("round", args, 0)?.to_number("round")?.as_f64();
    let precision = args
        .get(1)
        .map(|v| to_int(v, "round"))
        .transpose()?
        .unwrap_or(0);
    let factor = 10f64.powi(precision.clamp(-308, 308) as i32);
    Ok(Value::Float((value * factor).round() / factor))
}

fn intval(value: &Value) -> i64 {
    match value {
        Value::List(_) | Value::Map(_) => i64::from(value.is_truthy()),
        Value::String(s) => match value.as_number() {
            Some(Number::Int(i)) => i,
            Some(Number::Float(f)) => f as i64,
            None => leading_int(s),
        },
        other => match other.as_number() {
            Some(Number::Int(i)) => i,
            Some(Number::Float(f)) => f as i64,
            None => 0,
        },
    }
}

/// Integer prefix of a string, `0` if there is none.
fn leading_int(s: &str) -> i64 {
    let trimmed = s.trim_start();
    let digits_start = usize::from(trimmed.starts_with(['-', '+']));
    let digits = trimmed[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len() - digits_start);
    trimmed[..digits_start + digits].parse().unwrap_or(0)
}

fn range(args: &[Value]) -> TemplateResult<Value> {
    let start = to_int(arg("range", args, 0)?, "range")?;
    let end = to_int(arg("range", args, 1)?, "range")?;
    let step = args
        .get(2)
        .map(|v| to_int(v, "range"))
        .transpose()?
        .unwrap_or(1)
        .unsigned_abs();
    if step == 0 {
        return Err(TemplateError::type_mismatch(
            "range(): Argument #3 ($step) cannot be 0",
        ));
    }

    let span = start.abs_diff(end);
    if (span / step) as usize >= MAX_RANGE_LEN {
        return Err(TemplateError::type_mismatch(
            "range(): the requested range is too large",
        ));
    }

    let count = span / step + 1;
    let items = (0..count)
        .map(|n| {
            let offset = (n * step) as i64;
            if start <= end {
                Value::Int(start + offset)
            } else {
                Value::Int(start - offset)
            }
        })
        .collect();
    Ok(Value::List(items))
}
