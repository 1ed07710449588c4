//! Built-in functions, operators and methods of built-in types.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinOp, UnaryOp};
use super::error::ScriptError;
use super::eval::{Host, Interpreter};
use super::value::*;

const STR_METHODS: &[&str] = &[
    "split", "rsplit", "strip", "lstrip", "rstrip", "startswith", "endswith", "replace", "join",
    "lower", "upper", "find", "rfind", "index", "count", "format", "splitlines", "isdigit",
    "partition", "rpartition",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "remove", "pop", "index", "count", "sort", "reverse", "copy",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "update", "setdefault", "pop", "copy", "has_key",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];

/// Whether `name` is a method of a built-in value.
pub fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(_) => DICT_METHODS.contains(&name),
        Value::Tuple(_) => TUPLE_METHODS.contains(&name),
        _ => false,
    }
}

// ----------------------------------------------------------------------
// Numbers and operators
// ----------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn operand_error(op: &str, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> ScriptError {
    ScriptError::raised("OverflowError", "integer overflow")
}

fn zero_division() -> ScriptError {
    ScriptError::raised("ZeroDivisionError", "division by zero")
}

fn arithmetic(
    op: BinOp,
    a: Num,
    b: Num,
) -> Result<Value, ScriptError> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return Ok(Value::Int(match op {
            BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
            BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
            BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
            BinOp::Div => {
                if y == 0 {
                    return Err(zero_division());
                }
                return Ok(Value::Float(x as f64 / y as f64));
            }
            BinOp::FloorDiv => {
                if y == 0 {
                    return Err(zero_division());
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                if r != 0 && ((r < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(zero_division());
                }
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                if r != 0 && ((r < 0) != (y < 0)) {
                    r + y
                } else {
                    r
                }
            }
            BinOp::Pow => {
                if y < 0 {
                    return Ok(Value::Float((x as f64).powf(y as f64)));
                }
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_pow(exp).ok_or_else(overflow)?
            }
            BinOp::BitOr => x | y,
            BinOp::BitAnd => x & y,
            BinOp::BitXor => x ^ y,
            BinOp::LShift => {
                let shift = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_shl(shift).ok_or_else(overflow)?
            }
            BinOp::RShift => {
                let shift = u32::try_from(y).map_err(|_| overflow())?;
                x.checked_shr(shift).unwrap_or(if x < 0 { -1 } else { 0 })
            }
        }));
    }
    let (x, y) = (a.float(), b.float());
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division());
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division());
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division());
            }
            x - y * (x / y).floor()
        }
        BinOp::Pow => x.powf(y),
        _ => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type(s) for {}: 'float'",
                op.symbol()
            )))
        }
    }))
}

fn repeat(items: &[Value], times: i64) -> Vec<Value> {
    let times = times.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

/// Evaluate a binary operator.
pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> Result<Value, ScriptError> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return arithmetic(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::Str(Rc::from(format!("{}{}", x, y)))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut out = x.borrow().clone();
            out.extend(y.borrow().iter().cloned());
            Ok(Value::list(out))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut out = x.to_vec();
            out.extend(y.iter().cloned());
            Ok(Value::tuple(out))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if as_int(n).is_some() => {
            let times = as_int(n).unwrap_or(0).max(0) as usize;
            Ok(Value::Str(Rc::from(s.repeat(times))))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if as_int(n).is_some() =>
        {
            Ok(Value::list(repeat(&items.borrow(), as_int(n).unwrap_or(0))))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if as_int(n).is_some() =>
        {
            Ok(Value::tuple(repeat(items, as_int(n).unwrap_or(0))))
        }
        (BinOp::Mod, Value::Str(fmt), args) => Ok(Value::Str(Rc::from(percent_format(fmt, args)?))),
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut out = x.borrow().clone();
            out.extend(y.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::dict(out))
        }
        _ => Err(operand_error(op.symbol(), a, b)),
    }
}

pub fn unary_op(op: UnaryOp, value: &Value) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match as_num(value) {
            Some(Num::Int(i)) => Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(ScriptError::type_error(format!(
                "bad operand type for unary -: '{}'",
                value.type_name()
            ))),
        },
        UnaryOp::Pos => match as_num(value) {
            Some(Num::Int(i)) => Ok(Value::Int(i)),
            Some(Num::Float(f)) => Ok(Value::Float(f)),
            None => Err(ScriptError::type_error(format!(
                "bad operand type for unary +: '{}'",
                value.type_name()
            ))),
        },
        UnaryOp::Invert => match as_int(value) {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(ScriptError::type_error(format!(
                "bad operand type for unary ~: '{}'",
                value.type_name()
            ))),
        },
    }
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn compare_order(a: &Value, b: &Value) -> Result<Ordering, ScriptError> {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x.cmp(&y),
            (x, y) => x.float().partial_cmp(&y.float()).unwrap_or(Ordering::Equal),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => compare_seq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => compare_seq(x, y),
        _ => Err(ScriptError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        if x.equals(y) {
            continue;
        }
        return compare_order(x, y);
    }
    Ok(a.len().cmp(&b.len()))
}

/// Sort values in place, stably, optionally by precomputed keys.
fn sort_values(values: &mut Vec<Value>, keys: Option<Vec<Value>>, reverse: bool) -> Result<(), ScriptError> {
    let keys = keys.unwrap_or_else(|| values.clone());
    let mut order: Vec<usize> = (0..values.len()).collect();
    let mut failure = None;
    order.sort_by(|&i, &j| {
        let ordering = compare_order(&keys[i], &keys[j]).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        });
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    let sorted: Vec<Value> = order.into_iter().map(|i| values[i].clone()).collect();
    *values = sorted;
    Ok(())
}

// ----------------------------------------------------------------------
// Indexing
// ----------------------------------------------------------------------

/// Resolve a possibly negative index against a length.
pub fn normalize_index(key: &Value, len: usize) -> Result<usize, ScriptError> {
    let index = as_int(key).ok_or_else(|| {
        ScriptError::type_error(format!(
            "indices must be integers, not {}",
            key.type_name()
        ))
    })?;
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::raised("IndexError", "index out of range"));
    }
    Ok(resolved as usize)
}

/// `obj[key]` for built-in values.
pub fn get_item(obj: &Value, key: &Value) -> Result<Value, ScriptError> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(key, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(key, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(key, chars.len())?;
            Ok(Value::Str(Rc::from(chars[idx].to_string())))
        }
        Value::Dict(entries) => entries
            .borrow()
            .get(&key.to_key()?)
            .cloned()
            .ok_or_else(|| ScriptError::key_error(key.repr())),
        Value::Namespace(ns) if ns.kind == NamespaceKind::Record => {
            let name = key.as_str().unwrap_or_default();
            ns.get(name)
                .ok_or_else(|| ScriptError::key_error(key.repr()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice_indices(
    len: usize,
    lower: Option<Value>,
    upper: Option<Value>,
    step: Option<Value>,
) -> Result<Vec<usize>, ScriptError> {
    let len = len as i64;
    let bound = |v: Option<Value>| -> Result<Option<i64>, ScriptError> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(v) => as_int(&v)
                .map(Some)
                .ok_or_else(|| ScriptError::type_error("slice indices must be integers")),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::raised("ValueError", "slice step cannot be zero"));
    }
    let clamp = |i: i64, low: i64, high: i64| i.max(low).min(high);
    let resolve = |i: i64| if i < 0 { i + len } else { i };
    let mut out = Vec::new();
    if step > 0 {
        let start = bound(lower)?.map(|i| clamp(resolve(i), 0, len)).unwrap_or(0);
        let stop = bound(upper)?.map(|i| clamp(resolve(i), 0, len)).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = bound(lower)?
            .map(|i| clamp(resolve(i), -1, len - 1))
            .unwrap_or(len - 1);
        let stop = bound(upper)?.map(|i| clamp(resolve(i), -1, len - 1)).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

/// `obj[lower:upper:step]`
pub fn slice(
    obj: &Value,
    lower: Option<Value>,
    upper: Option<Value>,
    step: Option<Value>,
) -> Result<Value, ScriptError> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), lower, upper, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lower, upper, step)?;
            Ok(Value::Str(Rc::from(
                picked.into_iter().map(|i| chars[i]).collect::<String>(),
            )))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ----------------------------------------------------------------------
// String formatting
// ----------------------------------------------------------------------

struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

fn pad(text: String, spec: &Spec) -> String {
    let len = text.chars().count();
    if len >= spec.width {
        return text;
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{}{}", text, " ".repeat(fill))
    } else if spec.zero {
        match text.strip_prefix('-') {
            Some(digits) => format!("-{}{}", "0".repeat(fill), digits),
            None => format!("{}{}", "0".repeat(fill), text),
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

fn format_one(conversion: char, value: &Value, spec: &Spec) -> Result<String, ScriptError> {
    let text = match conversion {
        's' => value.display(),
        'r' => value.repr(),
        'd' | 'i' | 'u' => {
            let n = match as_num(value) {
                Some(Num::Int(i)) => i,
                Some(Num::Float(f)) => f.trunc() as i64,
                None => {
                    return Err(ScriptError::type_error(format!(
                        "%d format: a number is required, not {}",
                        value.type_name()
                    )))
                }
            };
            if spec.plus && n >= 0 {
                format!("+{}", n)
            } else {
                n.to_string()
            }
        }
        'f' | 'F' | 'e' | 'g' => {
            let f = as_num(value).map(Num::float).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "float format requires a number, not {}",
                    value.type_name()
                ))
            })?;
            match conversion {
                'e' => format!("{:.*e}", spec.precision.unwrap_or(6), f),
                'g' => format_float(f),
                _ => format!("{:.*}", spec.precision.unwrap_or(6), f),
            }
        }
        'x' | 'X' | 'o' => {
            let n = as_int(value).ok_or_else(|| {
                ScriptError::type_error(format!(
                    "%{} format: an integer is required, not {}",
                    conversion,
                    value.type_name()
                ))
            })?;
            match conversion {
                'x' => format!("{:x}", n),
                'X' => format!("{:X}", n),
                _ => format!("{:o}", n),
            }
        }
        'c' => match value {
            Value::Str(s) => s.to_string(),
            other => as_int(other)
                .and_then(|i| u32::try_from(i).ok())
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .ok_or_else(|| ScriptError::type_error("%c requires int or char"))?,
        },
        other => {
            return Err(ScriptError::raised(
                "ValueError",
                format!("unsupported format character '{}'", other),
            ))
        }
    };
    Ok(pad(text, spec))
}

/// `fmt % args`
pub fn percent_format(fmt: &str, args: &Value) -> Result<String, ScriptError> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next = positional.iter();
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut mapping_key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut key = String::new();
            for k in chars.by_ref() {
                if k == ')' {
                    break;
                }
                key.push(k);
            }
            mapping_key = Some(key);
        }
        let mut spec = Spec {
            left: false,
            zero: false,
            plus: false,
            width: 0,
            precision: None,
        };
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + d as usize;
                chars.next();
            }
            spec.precision = Some(precision);
        }
        let conversion = chars.next().ok_or_else(|| {
            ScriptError::raised("ValueError", "incomplete format")
        })?;
        let value = match &mapping_key {
            Some(key) => get_item(args, &Value::str(key))?,
            None => next.next().cloned().ok_or_else(|| {
                ScriptError::type_error("not enough arguments for format string")
            })?,
        };
        out.push_str(&format_one(conversion, &value, &spec)?);
    }
    if mapping_key_free(fmt) && next.next().is_some() && matches!(args, Value::Tuple(_)) {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn mapping_key_free(fmt: &str) -> bool {
    !fmt.contains("%(")
}

/// `fmt.format(*args, **kwargs)`
pub fn str_format(fmt: &str, args: &CallArgs) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(fmt.len());
    let mut auto_index = 0;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for f in chars.by_ref() {
                    if f == '}' {
                        closed = true;
                        break;
                    }
                    field.push(f);
                }
                if !closed {
                    return Err(ScriptError::raised(
                        "ValueError",
                        "Single '{' encountered in format string",
                    ));
                }
                let (name, format_spec) = match field.split_once(':') {
                    Some((name, spec)) => (name.to_string(), spec.to_string()),
                    None => (field.clone(), String::new()),
                };
                let (name, conversion) = match name.split_once('!') {
                    Some((name, conv)) => (name.to_string(), conv.chars().next()),
                    None => (name, None),
                };
                let value = if name.is_empty() {
                    let value = args.positional.get(auto_index).cloned();
                    auto_index += 1;
                    value
                } else if let Ok(index) = name.parse::<usize>() {
                    args.positional.get(index).cloned()
                } else {
                    args.keywords
                        .iter()
                        .find(|(k, _)| &**k == name.as_str())
                        .map(|(_, v)| v.clone())
                };
                let value = value.ok_or_else(|| {
                    ScriptError::raised("IndexError", format!("format field '{}' not found", name))
                })?;
                let text = match conversion {
                    Some('r') => value.repr(),
                    _ => apply_format_spec(&value, &format_spec)?,
                };
                out.push_str(&text);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn apply_format_spec(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.display());
    }
    let mut rest = spec;
    let mut align = None;
    if let Some(first) = rest.chars().next() {
        if matches!(first, '<' | '>' | '^') {
            align = Some(first);
            rest = &rest[1..];
        }
    }
    let (width_part, precision_part) = match rest.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (rest, None),
    };
    let kind = precision_part
        .and_then(|p| p.chars().last())
        .filter(|c| c.is_alphabetic())
        .or_else(|| width_part.chars().last().filter(|c| c.is_alphabetic()));
    let width: usize = width_part
        .trim_end_matches(char::is_alphabetic)
        .parse()
        .unwrap_or(0);
    let precision = precision_part
        .map(|p| p.trim_end_matches(char::is_alphabetic))
        .and_then(|p| p.parse::<usize>().ok());
    let text = match kind {
        Some('f') => format!(
            "{:.*}",
            precision.unwrap_or(6),
            as_num(value).map(Num::float).unwrap_or(0.0)
        ),
        Some('d') => as_int(value).map(|i| i.to_string()).unwrap_or_else(|| value.display()),
        _ => value.display(),
    };
    let len = text.chars().count();
    if len >= width {
        return Ok(text);
    }
    let fill = width - len;
    Ok(match align {
        Some('>') => format!("{}{}", " ".repeat(fill), text),
        Some('^') => format!(
            "{}{}{}",
            " ".repeat(fill / 2),
            text,
            " ".repeat(fill - fill / 2)
        ),
        Some('<') => format!("{}{}", text, " ".repeat(fill)),
        _ if as_num(value).is_some() => format!("{}{}", " ".repeat(fill), text),
        _ => format!("{}{}", text, " ".repeat(fill)),
    })
}

// ----------------------------------------------------------------------
// Built-in functions
// ----------------------------------------------------------------------

fn arg_count_error(name: &str, expected: &str, got: usize) -> ScriptError {
    ScriptError::type_error(format!(
        "{}() takes {} arguments ({} given)",
        name, expected, got
    ))
}

fn is_instance(value: &Value, class: &Value) -> Result<bool, ScriptError> {
    Ok(match class {
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if is_instance(value, c)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Builtin(b) => match b {
            Builtin::Str => matches!(value, Value::Str(_)),
            Builtin::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
            Builtin::Float => matches!(value, Value::Float(_)),
            Builtin::Bool => matches!(value, Value::Bool(_)),
            Builtin::List => matches!(value, Value::List(_)),
            Builtin::Tuple => matches!(value, Value::Tuple(_)),
            Builtin::Dict => matches!(value, Value::Dict(_)),
            other => {
                return Err(ScriptError::type_error(format!(
                    "isinstance() arg 2 must be a type, not {}",
                    other.name()
                )))
            }
        },
        Value::ExceptionType(kind) => match value {
            Value::Exception(e) => exception_matches(&e.kind, kind),
            _ => false,
        },
        other => {
            return Err(ScriptError::type_error(format!(
                "isinstance() arg 2 must be a type, not {}",
                other.type_name()
            )))
        }
    })
}

/// Items for `min`/`max`: either one iterable or several arguments.
fn min_max_items(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    name: &str,
    args: &CallArgs,
) -> Result<Vec<Value>, ScriptError> {
    match args.positional.as_slice() {
        [] => Err(arg_count_error(name, "at least 1", 0)),
        [single] => interp.iterate(host, single),
        many => Ok(many.to_vec()),
    }
}

fn keyed(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    key: Option<&Value>,
    items: &[Value],
) -> Result<Option<Vec<Value>>, ScriptError> {
    match key {
        None | Some(Value::None) => Ok(None),
        Some(func) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                keys.push(interp.call_value(host, func, CallArgs::positional(vec![item.clone()]))?);
            }
            Ok(Some(keys))
        }
    }
}

pub fn call_builtin(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    builtin: Builtin,
    mut args: CallArgs,
) -> Result<Value, ScriptError> {
    let name = builtin.name();
    let nargs = args.positional.len();
    match builtin {
        Builtin::Len => {
            let [value] = args.positional.as_slice() else {
                return Err(arg_count_error(name, "exactly one", nargs));
            };
            let len = match value {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(entries) => entries.borrow().len(),
                Value::Host(_) => interp.iterate(host, value)?.len(),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(len as i64))
        }
        Builtin::Str => Ok(match args.positional.first() {
            Some(value) => Value::Str(Rc::from(value.display())),
            None => Value::str(""),
        }),
        Builtin::Repr => match args.positional.as_slice() {
            [value] => Ok(Value::Str(Rc::from(value.repr()))),
            _ => Err(arg_count_error(name, "exactly one", nargs)),
        },
        Builtin::Int => {
            let base = args.take(1, "base").and_then(|b| as_int(&b)).unwrap_or(10);
            match args.positional.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => i64::from_str_radix(s.trim(), base as u32)
                    .map(Value::Int)
                    .map_err(|_| {
                        ScriptError::raised(
                            "ValueError",
                            format!("invalid literal for int() with base {}: {}", base, repr_str(s)),
                        )
                    }),
                Some(value) => match as_num(value) {
                    Some(Num::Int(i)) => Ok(Value::Int(i)),
                    Some(Num::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                    None => Err(ScriptError::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        Builtin::Float => match args.positional.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                ScriptError::raised(
                    "ValueError",
                    format!("could not convert string to float: {}", repr_str(s)),
                )
            }),
            Some(value) => as_num(value)
                .map(|n| Value::Float(n.float()))
                .ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        value.type_name()
                    ))
                }),
        },
        Builtin::Bool => Ok(Value::Bool(
            args.positional.first().is_some_and(Value::truthy),
        )),
        Builtin::List => match args.positional.first() {
            None => Ok(Value::list(Vec::new())),
            Some(value) => Ok(Value::list(interp.iterate(host, value)?)),
        },
        Builtin::Tuple => match args.positional.first() {
            None => Ok(Value::tuple(Vec::new())),
            Some(value) => Ok(Value::tuple(interp.iterate(host, value)?)),
        },
        Builtin::Set => {
            let items = match args.positional.first() {
                None => Vec::new(),
                Some(value) => interp.iterate(host, value)?,
            };
            let mut unique: Vec<Value> = Vec::new();
            for item in items {
                if !unique.iter().any(|u| u.equals(&item)) {
                    unique.push(item);
                }
            }
            Ok(Value::list(unique))
        }
        Builtin::Dict => {
            let mut dict = Dict::new();
            if let Some(source) = args.positional.first() {
                match source {
                    Value::Dict(entries) => dict = entries.borrow().clone(),
                    other => {
                        for pair in interp.iterate(host, other)? {
                            let items = interp.iterate(host, &pair)?;
                            let [key, value] = items.as_slice() else {
                                return Err(ScriptError::raised(
                                    "ValueError",
                                    "dictionary update sequence element has wrong length",
                                ));
                            };
                            dict.insert(key.to_key()?, value.clone());
                        }
                    }
                }
            }
            for (key, value) in args.keywords {
                dict.insert(Key::Str(key), value);
            }
            Ok(Value::dict(dict))
        }
        Builtin::Range => {
            let ints: Vec<i64> = args
                .positional
                .iter()
                .map(|v| {
                    as_int(v).ok_or_else(|| {
                        ScriptError::type_error(format!(
                            "range() integer argument expected, got {}",
                            v.type_name()
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(arg_count_error(name, "1 to 3", nargs)),
            };
            if step == 0 {
                return Err(ScriptError::raised("ValueError", "range() arg 3 must not be zero"));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                out.push(Value::Int(i));
                i += step;
            }
            Ok(Value::list(out))
        }
        Builtin::Enumerate => {
            let start = args.take(1, "start").and_then(|s| as_int(&s)).unwrap_or(0);
            let iterable = args.require(0, "iterable", name)?;
            let items = interp.iterate(host, &iterable)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        Builtin::Zip => {
            let mut columns = Vec::new();
            for value in &args.positional {
                columns.push(interp.iterate(host, value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::Sorted => {
            let key = args.take_keyword("key");
            let reverse = args.take_keyword("reverse").is_some_and(|r| r.truthy());
            let iterable = args.require(0, "iterable", name)?;
            let mut items = interp.iterate(host, &iterable)?;
            let keys = keyed(interp, host, key.as_ref(), &items)?;
            sort_values(&mut items, keys, reverse)?;
            Ok(Value::list(items))
        }
        Builtin::Reversed => {
            let iterable = args.require(0, "sequence", name)?;
            let mut items = interp.iterate(host, &iterable)?;
            items.reverse();
            Ok(Value::list(items))
        }
        Builtin::IsInstance => match args.positional.as_slice() {
            [value, class] => Ok(Value::Bool(is_instance(value, class)?)),
            _ => Err(arg_count_error(name, "exactly 2", nargs)),
        },
        Builtin::HasAttr => {
            let [obj, Value::Str(attr)] = args.positional.as_slice() else {
                return Err(arg_count_error(name, "exactly 2", nargs));
            };
            match interp.get_attribute(host, obj, attr) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(err) if err.catchable_kind() == Some("AttributeError") => Ok(Value::Bool(false)),
                Err(err) => Err(err),
            }
        }
        Builtin::GetAttr => match args.positional.as_slice() {
            [obj, Value::Str(attr)] => interp.get_attribute(host, obj, attr),
            [obj, Value::Str(attr), default] => match interp.get_attribute(host, obj, attr) {
                Ok(value) => Ok(value),
                Err(err) if err.catchable_kind() == Some("AttributeError") => Ok(default.clone()),
                Err(err) => Err(err),
            },
            _ => Err(arg_count_error(name, "2 or 3", nargs)),
        },
        Builtin::SetAttr => match args.positional.as_slice() {
            [obj, Value::Str(attr), value] => {
                interp.set_attribute(host, obj, attr, value.clone())?;
                Ok(Value::None)
            }
            _ => Err(arg_count_error(name, "exactly 3", nargs)),
        },
        Builtin::Min | Builtin::Max => {
            let key = args.take_keyword("key");
            let items = min_max_items(interp, host, name, &args)?;
            if items.is_empty() {
                return Err(ScriptError::raised(
                    "ValueError",
                    format!("{}() arg is an empty sequence", name),
                ));
            }
            let keys = keyed(interp, host, key.as_ref(), &items)?.unwrap_or_else(|| items.clone());
            let mut best = 0;
            for i in 1..items.len() {
                let ordering = compare_order(&keys[i], &keys[best])?;
                let better = if builtin == Builtin::Min {
                    ordering.is_lt()
                } else {
                    ordering.is_gt()
                };
                if better {
                    best = i;
                }
            }
            Ok(items[best].clone())
        }
        Builtin::Sum => {
            let iterable = args.require(0, "iterable", name)?;
            let mut total = args.take(1, "start").unwrap_or(Value::Int(0));
            for item in interp.iterate(host, &iterable)? {
                total = binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Any | Builtin::All => {
            let iterable = args.require(0, "iterable", name)?;
            let items = interp.iterate(host, &iterable)?;
            Ok(Value::Bool(if builtin == Builtin::Any {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        Builtin::Abs => match args.positional.as_slice() {
            [Value::Host(obj)] => obj.abs().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    obj.type_name()
                ))
            }),
            [value] => match as_num(value) {
                Some(Num::Int(i)) => Ok(Value::Int(i.checked_abs().ok_or_else(overflow)?)),
                Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name()
                ))),
            },
            _ => Err(arg_count_error(name, "exactly one", nargs)),
        },
        Builtin::Print => {
            let sep = args
                .take_keyword("sep")
                .map(|s| s.display())
                .unwrap_or_else(|| " ".to_string());
            let line = args
                .positional
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(&sep);
            tracing::debug!("script output: {}", line);
            Ok(Value::None)
        }
        Builtin::Map => {
            let Some((func, iterables)) = args.positional.split_first() else {
                return Err(arg_count_error(name, "at least 2", nargs));
            };
            let mut columns = Vec::new();
            for value in iterables {
                columns.push(interp.iterate(host, value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let call_args = CallArgs::positional(columns.iter().map(|c| c[i].clone()).collect());
                out.push(interp.call_value(host, func, call_args)?);
            }
            Ok(Value::list(out))
        }
        Builtin::Filter => {
            let [func, iterable] = args.positional.as_slice() else {
                return Err(arg_count_error(name, "exactly 2", nargs));
            };
            let mut out = Vec::new();
            for item in interp.iterate(host, iterable)? {
                let keep = match func {
                    Value::None => item.truthy(),
                    func => interp
                        .call_value(host, func, CallArgs::positional(vec![item.clone()]))?
                        .truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
    }
}

// ----------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------

pub fn call_method(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> Result<Value, ScriptError> {
    match receiver {
        Value::Str(s) => str_method(interp, host, s, name, args),
        Value::List(items) => list_method(interp, host, items, name, args),
        Value::Dict(entries) => dict_method(interp, host, entries, name, args),
        Value::Tuple(items) => sequence_query(items, name, &args),
        other => Err(crate::script::eval::attribute_error(&other.type_name(), name)),
    }
}

fn str_arg(value: Option<Value>, method: &str) -> Result<Option<Rc<str>>, ScriptError> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s)),
        Some(other) => Err(ScriptError::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn string_result(s: impl Into<String>) -> Value {
    Value::Str(Rc::from(s.into()))
}

fn affix_matches(
    s: &str,
    affix: &Value,
    test: impl Fn(&str, &str) -> bool,
) -> Result<bool, ScriptError> {
    match affix {
        Value::Str(a) => Ok(test(s, a)),
        Value::Tuple(options) => Ok(options
            .iter()
            .any(|o| o.as_str().is_some_and(|a| test(s, a)))),
        other => Err(ScriptError::type_error(format!(
            "expected str or tuple of str, not {}",
            other.type_name()
        ))),
    }
}

fn str_method(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    s: &Rc<str>,
    name: &str,
    mut args: CallArgs,
) -> Result<Value, ScriptError> {
    match name {
        "split" | "rsplit" => {
            let sep = str_arg(args.take(0, "sep"), name)?;
            let maxsplit = args
                .take(1, "maxsplit")
                .and_then(|m| as_int(&m))
                .unwrap_or(-1);
            let parts: Vec<String> = match (sep, maxsplit) {
                (None, m) if m < 0 => s.split_whitespace().map(str::to_string).collect(),
                (None, m) => split_whitespace_n(s, m as usize, name == "rsplit"),
                (Some(sep), _) if sep.is_empty() => {
                    return Err(ScriptError::raised("ValueError", "empty separator"))
                }
                (Some(sep), m) if m < 0 => s.split(&*sep).map(str::to_string).collect(),
                (Some(sep), m) if name == "rsplit" => {
                    let mut parts: Vec<String> = s
                        .rsplitn(m as usize + 1, &*sep)
                        .map(str::to_string)
                        .collect();
                    parts.reverse();
                    parts
                }
                (Some(sep), m) => s
                    .splitn(m as usize + 1, &*sep)
                    .map(str::to_string)
                    .collect(),
            };
            Ok(Value::string_list(parts))
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = str_arg(args.take(0, "chars"), name)?;
            let result = match (name, chars) {
                ("strip", None) => s.trim(),
                ("lstrip", None) => s.trim_start(),
                ("rstrip", None) => s.trim_end(),
                ("strip", Some(c)) => s.trim_matches(|x: char| c.contains(x)),
                ("lstrip", Some(c)) => s.trim_start_matches(|x: char| c.contains(x)),
                (_, Some(c)) => s.trim_end_matches(|x: char| c.contains(x)),
                (_, None) => s.trim_end(),
            };
            Ok(string_result(result))
        }
        "startswith" => {
            let prefix = args.require(0, "prefix", name)?;
            Ok(Value::Bool(affix_matches(s, &prefix, |s, a| s.starts_with(a))?))
        }
        "endswith" => {
            let suffix = args.require(0, "suffix", name)?;
            Ok(Value::Bool(affix_matches(s, &suffix, |s, a| s.ends_with(a))?))
        }
        "replace" => {
            let (Some(old), Some(new)) = (
                str_arg(args.take(0, "old"), name)?,
                str_arg(args.take(1, "new"), name)?,
            ) else {
                return Err(arg_count_error(name, "at least 2", args.positional.len()));
            };
            let count = args.take(2, "count").and_then(|c| as_int(&c)).unwrap_or(-1);
            Ok(string_result(if count < 0 {
                s.replace(&*old, &new)
            } else {
                s.replacen(&*old, &new, count as usize)
            }))
        }
        "join" => {
            let iterable = args.require(0, "iterable", name)?;
            let mut parts = Vec::new();
            for item in interp.iterate(host, &iterable)? {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(string_result(parts.join(&**s)))
        }
        "lower" => Ok(string_result(s.to_lowercase())),
        "upper" => Ok(string_result(s.to_uppercase())),
        "find" | "rfind" | "index" => {
            let needle = str_arg(args.take(0, "sub"), name)?.unwrap_or_else(|| Rc::from(""));
            let found = if name == "rfind" {
                s.rfind(&*needle)
            } else {
                s.find(&*needle)
            };
            match found {
                Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                None if name == "index" => {
                    Err(ScriptError::raised("ValueError", "substring not found"))
                }
                None => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            let needle = str_arg(args.take(0, "sub"), name)?.unwrap_or_else(|| Rc::from(""));
            Ok(Value::Int(s.matches(&*needle).count() as i64))
        }
        "format" => Ok(string_result(str_format(s, &args)?)),
        "splitlines" => Ok(Value::string_list(s.lines())),
        "isdigit" => Ok(Value::Bool(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        )),
        "partition" | "rpartition" => {
            let sep = str_arg(args.take(0, "sep"), name)?
                .ok_or_else(|| arg_count_error(name, "exactly one", 0))?;
            let split = if name == "partition" {
                s.split_once(&*sep)
            } else {
                s.rsplit_once(&*sep)
            };
            let parts = match split {
                Some((head, tail)) => vec![head, &*sep, tail],
                None if name == "partition" => vec![&**s, "", ""],
                None => vec!["", "", &**s],
            };
            Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
        }
        _ => Err(crate::script::eval::attribute_error("str", name)),
    }
}

fn split_whitespace_n(s: &str, max: usize, from_right: bool) -> Vec<String> {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= max + 1 {
        return words.into_iter().map(str::to_string).collect();
    }
    if from_right {
        let cut = words.len() - max;
        let mut out = vec![words[..cut].join(" ")];
        out.extend(words[cut..].iter().map(|w| w.to_string()));
        out
    } else {
        let mut out: Vec<String> = words[..max].iter().map(|w| w.to_string()).collect();
        // The remainder keeps its original spacing
        let mut rest = s.trim_start();
        for word in &words[..max] {
            rest = rest[word.len()..].trim_start();
        }
        out.push(rest.to_string());
        out
    }
}

fn sequence_query(items: &[Value], name: &str, args: &CallArgs) -> Result<Value, ScriptError> {
    let Some(needle) = args.positional.first() else {
        return Err(arg_count_error(name, "exactly one", 0));
    };
    match name {
        "index" => items
            .iter()
            .position(|v| v.equals(needle))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| {
                ScriptError::raised("ValueError", format!("{} is not in list", needle.repr()))
            }),
        "count" => Ok(Value::Int(
            items.iter().filter(|v| v.equals(needle)).count() as i64,
        )),
        _ => Err(crate::script::eval::attribute_error("tuple", name)),
    }
}

fn list_method(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    mut args: CallArgs,
) -> Result<Value, ScriptError> {
    match name {
        "append" => {
            let value = args.require(0, "object", name)?;
            items.borrow_mut().push(value);
            Ok(Value::None)
        }
        "extend" => {
            let iterable = args.require(0, "iterable", name)?;
            let extra = interp.iterate(host, &iterable)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => match args.positional.as_slice() {
            [index, value] => {
                let len = items.borrow().len() as i64;
                let index = as_int(index)
                    .ok_or_else(|| ScriptError::type_error("list indices must be integers"))?;
                let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.borrow_mut().insert(index as usize, value.clone());
                Ok(Value::None)
            }
            _ => Err(arg_count_error(name, "exactly 2", args.positional.len())),
        },
        "remove" => {
            let value = args.require(0, "value", name)?;
            let position = items.borrow().iter().position(|v| v.equals(&value));
            match position {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(ScriptError::raised(
                    "ValueError",
                    "list.remove(x): x not in list",
                )),
            }
        }
        "pop" => {
            let len = items.borrow().len();
            if len == 0 {
                return Err(ScriptError::raised("IndexError", "pop from empty list"));
            }
            let index = match args.positional.first() {
                Some(i) => normalize_index(i, len)?,
                None => len - 1,
            };
            Ok(items.borrow_mut().remove(index))
        }
        "index" | "count" => {
            let snapshot = items.borrow().clone();
            sequence_query(&snapshot, name, &args)
        }
        "sort" => {
            let key = args.take_keyword("key");
            let reverse = args.take_keyword("reverse").is_some_and(|r| r.truthy());
            let mut values = items.borrow().clone();
            let keys = keyed(interp, host, key.as_ref(), &values)?;
            sort_values(&mut values, keys, reverse)?;
            *items.borrow_mut() = values;
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        _ => Err(crate::script::eval::attribute_error("list", name)),
    }
}

fn dict_method(
    interp: &mut Interpreter,
    host: &mut dyn Host,
    entries: &Rc<std::cell::RefCell<Dict>>,
    name: &str,
    mut args: CallArgs,
) -> Result<Value, ScriptError> {
    match name {
        "get" => {
            let key = args.require(0, "key", name)?.to_key()?;
            let default = args.take(1, "default").unwrap_or(Value::None);
            Ok(entries.borrow().get(&key).cloned().unwrap_or(default))
        }
        "has_key" => {
            let key = args.require(0, "key", name)?.to_key()?;
            Ok(Value::Bool(entries.borrow().contains_key(&key)))
        }
        "keys" => Ok(Value::list(entries.borrow().keys().map(Key::to_value).collect())),
        "values" => Ok(Value::list(entries.borrow().values().cloned().collect())),
        "items" => Ok(Value::list(
            entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        "update" => {
            if let Some(source) = args.positional.first().cloned() {
                let updated = call_builtin(
                    interp,
                    host,
                    Builtin::Dict,
                    CallArgs::positional(vec![source]),
                )?;
                if let Value::Dict(other) = updated {
                    let other = other.borrow().clone();
                    entries.borrow_mut().extend(other);
                }
            }
            for (key, value) in args.keywords {
                entries.borrow_mut().insert(Key::Str(key), value);
            }
            Ok(Value::None)
        }
        "setdefault" => {
            let key = args.require(0, "key", name)?.to_key()?;
            let default = args.take(1, "default").unwrap_or(Value::None);
            Ok(entries.borrow_mut().entry(key).or_insert(default).clone())
        }
        "pop" => {
            let key_value = args.require(0, "key", name)?;
            let key = key_value.to_key()?;
            let removed = entries.borrow_mut().shift_remove(&key);
            match (removed, args.take(1, "default")) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(ScriptError::key_error(key_value.repr())),
            }
        }
        "copy" => Ok(Value::dict(entries.borrow().clone())),
        _ => Err(crate::script::eval::attribute_error("dict", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_format_variants() {
        let args = Value::tuple(vec![Value::str("lib"), Value::Int(7), Value::Float(0.5)]);
        assert_eq!(
            percent_format("%s-%03d-%.2f%%", &args).unwrap(),
            "lib-007-0.50%"
        );
        assert_eq!(percent_format("%r", &Value::str("x")).unwrap(), "'x'");

        let mut entries = Dict::new();
        entries.insert(Key::Str(Rc::from("name")), Value::str("scitbx"));
        assert_eq!(
            percent_format("%(name)s_ext", &Value::dict(entries)).unwrap(),
            "scitbx_ext"
        );
    }

    #[test]
    fn test_str_format_fields() {
        let args = CallArgs {
            positional: vec![Value::str("a"), Value::Int(2)],
            keywords: vec![(Rc::from("k"), Value::str("v"))],
        };
        assert_eq!(str_format("{} {1} {k} {{x}}", &args).unwrap(), "a 2 v {x}");
    }

    #[test]
    fn test_python_style_integer_division() {
        assert!(binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2))
            .unwrap()
            .equals(&Value::Int(-4)));
        assert!(binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2))
            .unwrap()
            .equals(&Value::Int(1)));
        assert!(binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_integer_division_at_the_edges() {
        let min = Value::Int(i64::MIN);
        let err = binary_op(BinOp::FloorDiv, &min, &Value::Int(-1)).unwrap_err();
        assert_eq!(err.catchable_kind(), Some("OverflowError"));
        let err = binary_op(BinOp::Mod, &min, &Value::Int(-1)).unwrap_err();
        assert_eq!(err.catchable_kind(), Some("OverflowError"));

        assert!(binary_op(BinOp::Mod, &Value::Int(-1), &Value::Int(i64::MAX))
            .unwrap()
            .equals(&Value::Int(i64::MAX - 1)));
        assert!(binary_op(BinOp::Mod, &Value::Int(5), &Value::Int(-3))
            .unwrap()
            .equals(&Value::Int(-1)));
        assert!(binary_op(BinOp::FloorDiv, &Value::Int(7), &Value::Int(-2))
            .unwrap()
            .equals(&Value::Int(-4)));
    }

    #[test]
    fn test_slices() {
        let list = Value::list((0..5).map(Value::Int).collect());
        let sliced = slice(&list, Some(Value::Int(1)), Some(Value::Int(-1)), None).unwrap();
        assert_eq!(sliced.repr(), "[1, 2, 3]");
        let reversed = slice(&list, None, None, Some(Value::Int(-1))).unwrap();
        assert_eq!(reversed.repr(), "[4, 3, 2, 1, 0]");
        let s = slice(&Value::str("libfoo.so"), Some(Value::Int(3)), None, None).unwrap();
        assert_eq!(s.repr(), "'foo.so'");
    }

    #[test]
    fn test_split_with_maxsplit() {
        assert_eq!(split_whitespace_n("a  b c", 1, false), vec!["a", "b c"]);
        assert_eq!(split_whitespace_n("a b  c", 1, true), vec!["a b", "c"]);
    }

    #[test]
    fn test_sequence_ordering() {
        let a = Value::tuple(vec![Value::Int(1), Value::str("b")]);
        let b = Value::tuple(vec![Value::Int(1), Value::str("c")]);
        assert_eq!(compare_order(&a, &b).unwrap(), Ordering::Less);
        assert!(compare_order(&Value::Int(1), &Value::str("a")).is_err());
    }
}
