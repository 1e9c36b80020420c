// Query evaluator - pure, bounded, no host access

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::constants::limits;
use crate::core::errors::BridgeError;
use crate::filter::ast::{BinaryOp, Expr, UnaryOp};

/// Evaluation budgets. Exceeding either yields `FilterFailed`.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_depth: limits::FILTER_MAX_DEPTH,
            max_nodes: limits::FILTER_MAX_NODES,
        }
    }
}

struct Budget {
    depth: usize,
    nodes: usize,
    limits: EvalLimits,
}

fn fail(msg: impl Into<String>) -> BridgeError {
    BridgeError::FilterFailed(msg.into())
}

/// Evaluate an expression against a JSON document.
pub fn eval(expr: &Expr, input: &Value, limits: EvalLimits) -> Result<Value, BridgeError> {
    let mut budget = Budget {
        depth: 0,
        nodes: 0,
        limits,
    };
    eval_expr(expr, input, &mut budget)
}

fn eval_expr(expr: &Expr, input: &Value, b: &mut Budget) -> Result<Value, BridgeError> {
    b.nodes += 1;
    if b.nodes > b.limits.max_nodes {
        return Err(fail(format!(
            "evaluation exceeded the node budget of {}",
            b.limits.max_nodes
        )));
    }
    b.depth += 1;
    if b.depth > b.limits.max_depth {
        return Err(fail(format!(
            "evaluation exceeded the depth limit of {}",
            b.limits.max_depth
        )));
    }

    let result = match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Number(n) => Ok(json_number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Prop(path) => Ok(get_path(input, path)),
        Expr::Param(name) => Err(fail(format!("unbound parameter '{{{}}}'", name))),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, input, b)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(pairs) => {
            let mut out = Map::new();
            for (key, value) in pairs {
                out.insert(key.clone(), eval_expr(value, input, b)?);
            }
            Ok(Value::Object(out))
        }
        Expr::Unary(op, inner) => {
            let value = eval_expr(inner, input, b)?;
            match op {
                UnaryOp::Neg => {
                    let n = as_number(&value)?;
                    Ok(json_number(-n))
                }
                UnaryOp::Not => Ok(Value::Bool(!as_bool(&value)?)),
            }
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, input, b),
        Expr::Pipe(stages) => {
            let mut current = input.clone();
            for stage in stages {
                current = eval_expr(stage, &current, b)?;
            }
            Ok(current)
        }
        Expr::Call(name, args) => eval_call(name, args, input, b),
    };

    b.depth -= 1;
    result
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    input: &Value,
    b: &mut Budget,
) -> Result<Value, BridgeError> {
    // `and`/`or` short-circuit
    match op {
        BinaryOp::And => {
            let lhs = as_bool(&eval_expr(left, input, b)?)?;
            if !lhs {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(as_bool(&eval_expr(right, input, b)?)?));
        }
        BinaryOp::Or => {
            let lhs = as_bool(&eval_expr(left, input, b)?)?;
            if lhs {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(as_bool(&eval_expr(right, input, b)?)?));
        }
        _ => {}
    }

    let lhs = eval_expr(left, input, b)?;
    let rhs = eval_expr(right, input, b)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(deep_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!deep_eq(&lhs, &rhs))),
        BinaryOp::Gt => Ok(Value::Bool(order_compare(&lhs, &rhs) == Some(Ordering::Greater))),
        BinaryOp::Gte => Ok(Value::Bool(matches!(
            order_compare(&lhs, &rhs),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ))),
        BinaryOp::Lt => Ok(Value::Bool(order_compare(&lhs, &rhs) == Some(Ordering::Less))),
        BinaryOp::Lte => Ok(Value::Bool(matches!(
            order_compare(&lhs, &rhs),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ))),
        BinaryOp::In => Ok(Value::Bool(contains(&rhs, &lhs)?)),
        BinaryOp::NotIn => Ok(Value::Bool(!contains(&rhs, &lhs)?)),
        BinaryOp::Add => numeric_op(&lhs, &rhs, |a, b| a + b),
        BinaryOp::Sub => numeric_op(&lhs, &rhs, |a, b| a - b),
        BinaryOp::Mul => numeric_op(&lhs, &rhs, |a, b| a * b),
        BinaryOp::Div => numeric_op(&lhs, &rhs, |a, b| a / b),
        BinaryOp::Mod => numeric_op(&lhs, &rhs, |a, b| a % b),
        BinaryOp::Pow => numeric_op(&lhs, &rhs, f64::powf),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(
    name: &str,
    args: &[Expr],
    input: &Value,
    b: &mut Budget,
) -> Result<Value, BridgeError> {
    match name {
        "get" => {
            let mut path = Vec::new();
            for arg in args {
                match eval_expr(arg, input, b)? {
                    Value::String(s) => path.push(s),
                    other => return Err(fail(format!("get expects string keys, got {}", type_name(&other)))),
                }
            }
            Ok(get_path(input, &path))
        }
        "pipe" => {
            let mut current = input.clone();
            for arg in args {
                current = eval_expr(arg, &current, b)?;
            }
            Ok(current)
        }
        "object" => match args {
            [obj @ Expr::Object(_)] => eval_expr(obj, input, b),
            _ => Err(fail("object expects a single object constructor argument")),
        },
        "array" => {
            let mut out = Vec::with_capacity(args.len());
            for arg in args {
                out.push(eval_expr(arg, input, b)?);
            }
            Ok(Value::Array(out))
        }
        "filter" => {
            let cond = one_arg(name, args)?;
            let items = as_array(input, name)?;
            let mut out = Vec::new();
            for item in items {
                if as_bool(&eval_expr(cond, item, b)?)? {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "map" => {
            let mapper = one_arg(name, args)?;
            let items = as_array(input, name)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(mapper, item, b)?);
            }
            Ok(Value::Array(out))
        }
        "pick" => eval_pick(args, input),
        "sort" => eval_sort(args, input, b),
        "reverse" => match input {
            Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => Err(fail(format!("reverse expects an array or string, got {}", type_name(other)))),
        },
        "mapObject" => {
            let mapper = one_arg(name, args)?;
            let object = as_object(input, name)?;
            let mut out = Map::new();
            for (key, value) in object {
                let entry = serde_json::json!({"key": key, "value": value});
                let mapped = eval_expr(mapper, &entry, b)?;
                let mapped_obj = as_object(&mapped, "mapObject result")?;
                let new_key = match mapped_obj.get("key") {
                    Some(Value::String(s)) => s.clone(),
                    _ => return Err(fail("mapObject result must carry a string 'key'")),
                };
                let new_value = mapped_obj.get("value").cloned().unwrap_or(Value::Null);
                out.insert(new_key, new_value);
            }
            Ok(Value::Object(out))
        }
        "mapKeys" => {
            let mapper = one_arg(name, args)?;
            let object = as_object(input, name)?;
            let mut out = Map::new();
            for (key, value) in object {
                match eval_expr(mapper, &Value::String(key.clone()), b)? {
                    Value::String(new_key) => out.insert(new_key, value.clone()),
                    other => {
                        return Err(fail(format!(
                            "mapKeys must produce strings, got {}",
                            type_name(&other)
                        )))
                    }
                };
            }
            Ok(Value::Object(out))
        }
        "mapValues" => {
            let mapper = one_arg(name, args)?;
            let object = as_object(input, name)?;
            let mut out = Map::new();
            for (key, value) in object {
                out.insert(key.clone(), eval_expr(mapper, value, b)?);
            }
            Ok(Value::Object(out))
        }
        "groupBy" => {
            let keyer = one_arg(name, args)?;
            let items = as_array(input, name)?;
            // BTreeMap keeps group order deterministic
            let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for item in items {
                let key = key_string(&eval_expr(keyer, item, b)?);
                groups.entry(key).or_default().push(item.clone());
            }
            let mut out = Map::new();
            for (key, group) in groups {
                out.insert(key, Value::Array(group));
            }
            Ok(Value::Object(out))
        }
        "keyBy" => {
            let keyer = one_arg(name, args)?;
            let items = as_array(input, name)?;
            let mut out = Map::new();
            for item in items {
                let key = key_string(&eval_expr(keyer, item, b)?);
                out.entry(key).or_insert_with(|| item.clone());
            }
            Ok(Value::Object(out))
        }
        "keys" => Ok(Value::Array(
            as_object(input, name)?
                .keys()
                .map(|k| Value::String(k.clone()))
                .collect(),
        )),
        "values" => Ok(Value::Array(as_object(input, name)?.values().cloned().collect())),
        "flatten" => {
            let items = as_array(input, name)?;
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        "join" => {
            let sep = match args {
                [] => String::new(),
                [sep] => as_string(&eval_expr(sep, input, b)?, "join separator")?,
                _ => return Err(fail("join takes at most one argument")),
            };
            let items = as_array(input, name)?;
            let parts: Vec<String> = items.iter().map(display_string).collect();
            Ok(Value::String(parts.join(&sep)))
        }
        "split" => {
            let (text, sep) = match args {
                [text] => (as_string(&eval_expr(text, input, b)?, "split text")?, None),
                [text, sep] => (
                    as_string(&eval_expr(text, input, b)?, "split text")?,
                    Some(as_string(&eval_expr(sep, input, b)?, "split separator")?),
                ),
                _ => return Err(fail("split takes one or two arguments")),
            };
            let parts: Vec<Value> = match sep {
                Some(sep) if !sep.is_empty() => {
                    text.split(&sep).map(|s| Value::String(s.to_string())).collect()
                }
                _ => text
                    .split_whitespace()
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            };
            Ok(Value::Array(parts))
        }
        "substring" => {
            let (text, start, end) = match args {
                [text, start] => (
                    as_string(&eval_expr(text, input, b)?, "substring text")?,
                    as_number(&eval_expr(start, input, b)?)?,
                    None,
                ),
                [text, start, end] => (
                    as_string(&eval_expr(text, input, b)?, "substring text")?,
                    as_number(&eval_expr(start, input, b)?)?,
                    Some(as_number(&eval_expr(end, input, b)?)?),
                ),
                _ => return Err(fail("substring takes two or three arguments")),
            };
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len();
            let start = (start.max(0.0) as usize).min(len);
            let end = end.map(|e| (e.max(0.0) as usize).min(len)).unwrap_or(len);
            let end = end.max(start);
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "uniq" => {
            let items = as_array(input, name)?;
            let mut out: Vec<Value> = Vec::new();
            for item in items {
                if !out.iter().any(|seen| deep_eq(seen, item)) {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "uniqBy" => {
            let keyer = one_arg(name, args)?;
            let items = as_array(input, name)?;
            let mut seen: Vec<Value> = Vec::new();
            let mut out: Vec<Value> = Vec::new();
            for item in items {
                let key = eval_expr(keyer, item, b)?;
                if !seen.iter().any(|k| deep_eq(k, &key)) {
                    seen.push(key);
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        "limit" => {
            let n = as_number(&eval_expr(one_arg(name, args)?, input, b)?)?;
            if n < 0.0 {
                return Err(fail("limit must be non-negative"));
            }
            let items = as_array(input, name)?;
            Ok(Value::Array(items.iter().take(n as usize).cloned().collect()))
        }
        "size" => match input {
            Value::Array(items) => Ok(json_number(items.len() as f64)),
            Value::String(s) => Ok(json_number(s.chars().count() as f64)),
            Value::Object(map) => Ok(json_number(map.len() as f64)),
            other => Err(fail(format!("size expects an array, string, or object, got {}", type_name(other)))),
        },
        "sum" => fold_numbers(input, 0.0, |acc, n| acc + n).map(json_number),
        "prod" => fold_numbers(input, 1.0, |acc, n| acc * n).map(json_number),
        "min" => reduce_numbers(input, f64::min),
        "max" => reduce_numbers(input, f64::max),
        "average" => {
            let items = as_array(input, name)?;
            if items.is_empty() {
                return Ok(Value::Null);
            }
            let total = fold_numbers(input, 0.0, |acc, n| acc + n)?;
            Ok(json_number(total / items.len() as f64))
        }
        "eq" | "ne" | "gt" | "gte" | "lt" | "lte" | "in" | "add" | "sub" | "mul" | "div"
        | "pow" | "mod" => {
            let op = match name {
                "eq" => BinaryOp::Eq,
                "ne" => BinaryOp::Ne,
                "gt" => BinaryOp::Gt,
                "gte" => BinaryOp::Gte,
                "lt" => BinaryOp::Lt,
                "lte" => BinaryOp::Lte,
                "in" => BinaryOp::In,
                "add" => BinaryOp::Add,
                "sub" => BinaryOp::Sub,
                "mul" => BinaryOp::Mul,
                "div" => BinaryOp::Div,
                "pow" => BinaryOp::Pow,
                _ => BinaryOp::Mod,
            };
            match args {
                [left, right] => eval_binary(op, left, right, input, b),
                _ => Err(fail(format!("{} takes exactly two arguments", name))),
            }
        }
        "and" => {
            let mut acc = true;
            for arg in args {
                acc = acc && as_bool(&eval_expr(arg, input, b)?)?;
                if !acc {
                    break;
                }
            }
            Ok(Value::Bool(acc))
        }
        "or" => {
            let mut acc = false;
            for arg in args {
                acc = acc || as_bool(&eval_expr(arg, input, b)?)?;
                if acc {
                    break;
                }
            }
            Ok(Value::Bool(acc))
        }
        "not" => {
            let value = eval_expr(one_arg(name, args)?, input, b)?;
            Ok(Value::Bool(!as_bool(&value)?))
        }
        "exists" => match args {
            [Expr::Prop(path)] => Ok(Value::Bool(path_exists(input, path))),
            _ => Err(fail("exists expects a property path argument")),
        },
        "if" => match args {
            [cond, then_branch, else_branch] => {
                if as_bool(&eval_expr(cond, input, b)?)? {
                    eval_expr(then_branch, input, b)
                } else {
                    eval_expr(else_branch, input, b)
                }
            }
            _ => Err(fail("if takes exactly three arguments")),
        },
        "regex" => {
            let (text, pattern, flags) = match args {
                [text, pattern] => (
                    as_string(&eval_expr(text, input, b)?, "regex text")?,
                    as_string(&eval_expr(pattern, input, b)?, "regex pattern")?,
                    String::new(),
                ),
                [text, pattern, flags] => (
                    as_string(&eval_expr(text, input, b)?, "regex text")?,
                    as_string(&eval_expr(pattern, input, b)?, "regex pattern")?,
                    as_string(&eval_expr(flags, input, b)?, "regex flags")?,
                ),
                _ => return Err(fail("regex takes two or three arguments")),
            };
            let pattern = if flags.is_empty() {
                pattern
            } else {
                for flag in flags.chars() {
                    if !matches!(flag, 'i' | 'm' | 's') {
                        return Err(fail(format!("unsupported regex flag '{}'", flag)));
                    }
                }
                format!("(?{}){}", flags, pattern)
            };
            let re = regex::Regex::new(&pattern)
                .map_err(|e| fail(format!("invalid regex: {}", e)))?;
            Ok(Value::Bool(re.is_match(&text)))
        }
        "abs" => {
            let value = match args {
                [] => input.clone(),
                [arg] => eval_expr(arg, input, b)?,
                _ => return Err(fail("abs takes at most one argument")),
            };
            Ok(json_number(as_number(&value)?.abs()))
        }
        "round" => {
            let (value, digits) = match args {
                [value] => (as_number(&eval_expr(value, input, b)?)?, 0.0),
                [value, digits] => (
                    as_number(&eval_expr(value, input, b)?)?,
                    as_number(&eval_expr(digits, input, b)?)?,
                ),
                _ => return Err(fail("round takes one or two arguments")),
            };
            let factor = 10f64.powi(digits as i32);
            Ok(json_number((value * factor).round() / factor))
        }
        "number" => {
            let value = match args {
                [] => input.clone(),
                [arg] => eval_expr(arg, input, b)?,
                _ => return Err(fail("number takes at most one argument")),
            };
            match value {
                Value::Number(_) => Ok(value),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(n) => Ok(json_number(n)),
                    Err(_) => Ok(Value::Null),
                },
                Value::Bool(flag) => Ok(json_number(if flag { 1.0 } else { 0.0 })),
                _ => Ok(Value::Null),
            }
        }
        "string" => {
            let value = match args {
                [] => input.clone(),
                [arg] => eval_expr(arg, input, b)?,
                _ => return Err(fail("string takes at most one argument")),
            };
            Ok(Value::String(display_string(&value)))
        }
        other => Err(fail(format!("unknown function '{}'", other))),
    }
}

fn eval_pick(args: &[Expr], input: &Value) -> Result<Value, BridgeError> {
    let mut paths: Vec<&Vec<String>> = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Expr::Prop(path) if !path.is_empty() => paths.push(path),
            _ => return Err(fail("pick expects property path arguments")),
        }
    }

    let pick_one = |value: &Value| -> Value {
        let mut out = Map::new();
        for path in &paths {
            let name = path.last().cloned().unwrap_or_default();
            out.insert(name, get_path(value, path));
        }
        Value::Object(out)
    };

    match input {
        Value::Array(items) => Ok(Value::Array(items.iter().map(pick_one).collect())),
        Value::Object(_) => Ok(pick_one(input)),
        other => Err(fail(format!("pick expects an array or object, got {}", type_name(other)))),
    }
}

fn eval_sort(args: &[Expr], input: &Value, b: &mut Budget) -> Result<Value, BridgeError> {
    let (key_expr, descending) = match args {
        [] => (None, false),
        [key] => (Some(key), false),
        [key, dir] => {
            let dir = match eval_expr(dir, input, b)? {
                Value::String(s) if s == "asc" => false,
                Value::String(s) if s == "desc" => true,
                other => {
                    return Err(fail(format!(
                        "sort direction must be \"asc\" or \"desc\", got {}",
                        display_string(&other)
                    )))
                }
            };
            (Some(key), dir)
        }
        _ => return Err(fail("sort takes at most two arguments")),
    };

    let items = as_array(input, "sort")?;
    let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(items.len());
    for item in items {
        let key = match key_expr {
            Some(expr) => eval_expr(expr, item, b)?,
            None => item.clone(),
        };
        keyed.push((key, item.clone()));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        let rank_a = type_rank(a);
        let rank_b = type_rank(b);
        let ordering = if rank_a != rank_b {
            rank_a.cmp(&rank_b)
        } else {
            order_compare(a, b).unwrap_or(Ordering::Equal)
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });

    Ok(Value::Array(keyed.into_iter().map(|(_, item)| item).collect()))
}

// --- value helpers ---

fn one_arg<'a>(name: &str, args: &'a [Expr]) -> Result<&'a Expr, BridgeError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(fail(format!("{} takes exactly one argument", name))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Ordering classes for sort: booleans < numbers < strings < everything else.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        _ => 3,
    }
}

fn as_bool(value: &Value) -> Result<bool, BridgeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(fail(format!("expected a boolean, got {}", type_name(other)))),
    }
}

fn as_number(value: &Value) -> Result<f64, BridgeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| fail("number out of range".to_string())),
        other => Err(fail(format!("expected a number, got {}", type_name(other)))),
    }
}

fn as_string(value: &Value, what: &str) -> Result<String, BridgeError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(fail(format!("{} must be a string, got {}", what, type_name(other)))),
    }
}

fn as_array<'a>(value: &'a Value, func: &str) -> Result<&'a Vec<Value>, BridgeError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(fail(format!("{} expects an array, got {}", func, type_name(other)))),
    }
}

fn as_object<'a>(value: &'a Value, func: &str) -> Result<&'a Map<String, Value>, BridgeError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(fail(format!("{} expects an object, got {}", func, type_name(other)))),
    }
}

/// Prefer integral JSON numbers so arithmetic output stays readable.
fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn get_path(input: &Value, path: &[String]) -> Value {
    let mut current = input;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    current.clone()
}

fn path_exists(input: &Value, path: &[String]) -> bool {
    let mut current = input;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return false,
            },
            _ => return false,
        }
    }
    true
}

/// Deep structural equality with numeric coercion (1 == 1.0).
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| deep_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Order comparison: same-class numbers and strings (and booleans) compare;
/// any mismatch is unordered and the comparison operators yield `false`.
fn order_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, BridgeError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| deep_eq(item, needle))),
        other => Err(fail(format!("'in' expects an array, got {}", type_name(other)))),
    }
}

fn numeric_op(lhs: &Value, rhs: &Value, op: fn(f64, f64) -> f64) -> Result<Value, BridgeError> {
    let result = op(as_number(lhs)?, as_number(rhs)?);
    if result.is_finite() {
        Ok(json_number(result))
    } else {
        Err(fail("arithmetic produced a non-finite number"))
    }
}

fn fold_numbers(input: &Value, init: f64, op: fn(f64, f64) -> f64) -> Result<f64, BridgeError> {
    let items = as_array(input, "aggregate")?;
    let mut acc = init;
    for item in items {
        acc = op(acc, as_number(item)?);
    }
    Ok(acc)
}

fn reduce_numbers(input: &Value, op: fn(f64, f64) -> f64) -> Result<Value, BridgeError> {
    let items = as_array(input, "aggregate")?;
    if items.is_empty() {
        return Ok(Value::Null);
    }
    let mut acc = as_number(&items[0])?;
    for item in &items[1..] {
        acc = op(acc, as_number(item)?);
    }
    Ok(json_number(acc))
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => display_string(other),
    }
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parser::parse;
    use serde_json::json;

    fn run(query: &str, input: Value) -> Result<Value, BridgeError> {
        let expr = parse(query)?;
        eval(&expr, &input, EvalLimits::default())
    }

    #[test]
    fn filters_by_numeric_comparison() {
        let input = json!([{"x": 1}, {"x": 5}, {"x": 9}]);
        let out = run("filter(.x > 4)", input).unwrap();
        assert_eq!(out, json!([{"x": 5}, {"x": 9}]));
    }

    #[test]
    fn number_coerces_decimal_strings() {
        let input = json!([
            {"OrderItemId": "a", "ItemPrice": {"Amount": "75.00"}},
            {"OrderItemId": "b", "ItemPrice": {"Amount": "25.00"}}
        ]);
        let out = run("filter(number(.ItemPrice.Amount) >= 50)", input).unwrap();
        assert_eq!(
            out,
            json!([{"OrderItemId": "a", "ItemPrice": {"Amount": "75.00"}}])
        );
    }

    #[test]
    fn map_builds_summaries() {
        let input = json!([{
            "AmazonOrderId": "123-1234567-1234567",
            "OrderStatus": "Shipped",
            "OrderTotal": {"Amount": "89.99", "CurrencyCode": "GBP"},
            "PurchaseDate": "2025-01-30T10:00:00Z"
        }]);
        let out = run(
            "map({orderId: .AmazonOrderId, status: .OrderStatus, total: .OrderTotal.Amount, currency: .OrderTotal.CurrencyCode})",
            input,
        )
        .unwrap();
        assert_eq!(
            out,
            json!([{
                "orderId": "123-1234567-1234567",
                "status": "Shipped",
                "total": "89.99",
                "currency": "GBP"
            }])
        );
    }

    #[test]
    fn sort_orders_by_type_class() {
        let input = json!(["b", 2, true, "a", 1, null]);
        let out = run("sort()", input).unwrap();
        assert_eq!(out, json!([true, 1, 2, "a", "b", null]));
    }

    #[test]
    fn sort_desc_by_path() {
        let input = json!([{"q": 1}, {"q": 9}, {"q": 4}]);
        let out = run("sort(.q, \"desc\")", input).unwrap();
        assert_eq!(out, json!([{"q": 9}, {"q": 4}, {"q": 1}]));
    }

    #[test]
    fn string_comparison_is_case_sensitive() {
        assert_eq!(run("\"a\" < \"b\"", json!(null)).unwrap(), json!(true));
        assert_eq!(run("\"A\" < \"a\"", json!(null)).unwrap(), json!(true));
    }

    #[test]
    fn type_mismatch_comparison_is_false() {
        assert_eq!(run("\"10\" > 5", json!(null)).unwrap(), json!(false));
        assert_eq!(run("5 > \"1\"", json!(null)).unwrap(), json!(false));
    }

    #[test]
    fn deep_equality() {
        assert_eq!(
            run(".a == .b", json!({"a": {"x": [1, 2]}, "b": {"x": [1, 2]}})).unwrap(),
            json!(true)
        );
        assert_eq!(
            run(".a == .b", json!({"a": {"x": [1, 2]}, "b": {"x": [2, 1]}})).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn pipe_threads_values() {
        let input = json!([{"x": 3}, {"x": 1}, {"x": 2}]);
        let out = run("sort(.x) | map(.x) | limit(2)", input).unwrap();
        assert_eq!(out, json!([1, 2]));
    }

    #[test]
    fn pick_on_arrays_and_objects() {
        let input = json!([{"a": 1, "b": 2, "c": 3}]);
        assert_eq!(run("pick(.a, .c)", input).unwrap(), json!([{"a": 1, "c": 3}]));
        assert_eq!(
            run("pick(.b)", json!({"a": 1, "b": 2})).unwrap(),
            json!({"b": 2})
        );
    }

    #[test]
    fn group_and_key_by() {
        let input = json!([
            {"k": "x", "v": 1},
            {"k": "y", "v": 2},
            {"k": "x", "v": 3}
        ]);
        let grouped = run("groupBy(.k)", input.clone()).unwrap();
        assert_eq!(grouped["x"].as_array().unwrap().len(), 2);
        let keyed = run("keyBy(.k)", input).unwrap();
        assert_eq!(keyed["x"], json!({"k": "x", "v": 1}));
    }

    #[test]
    fn aggregates() {
        assert_eq!(run("sum()", json!([1, 2, 3])).unwrap(), json!(6));
        assert_eq!(run("average()", json!([2, 4])).unwrap(), json!(3));
        assert_eq!(run("min()", json!([5, 2, 9])).unwrap(), json!(2));
        assert_eq!(run("max()", json!([5, 2, 9])).unwrap(), json!(9));
        assert_eq!(run("prod()", json!([2, 3, 4])).unwrap(), json!(24));
        assert_eq!(run("sum()", json!([])).unwrap(), json!(0));
        assert_eq!(run("min()", json!([])).unwrap(), json!(null));
    }

    #[test]
    fn arithmetic_and_rounding() {
        assert_eq!(run("1 + 2 * 3", json!(null)).unwrap(), json!(7));
        assert_eq!(run("2 ^ 10", json!(null)).unwrap(), json!(1024));
        assert_eq!(run("round(2.567, 2)", json!(null)).unwrap(), json!(2.57));
        assert_eq!(run("abs(-4)", json!(null)).unwrap(), json!(4));
        assert!(run("1 / 0", json!(null)).is_err());
    }

    #[test]
    fn membership() {
        assert_eq!(
            run(r#".status in ["Shipped", "Pending"]"#, json!({"status": "Shipped"})).unwrap(),
            json!(true)
        );
        assert_eq!(
            run(r#".status not in ["Shipped"]"#, json!({"status": "Canceled"})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn exists_checks_presence_not_truthiness() {
        assert_eq!(run("exists(.a)", json!({"a": null})).unwrap(), json!(true));
        assert_eq!(run("exists(.a.b)", json!({"a": {}})).unwrap(), json!(false));
    }

    #[test]
    fn conditional() {
        assert_eq!(
            run("if(.x > 1, \"big\", \"small\")", json!({"x": 5})).unwrap(),
            json!("big")
        );
    }

    #[test]
    fn regex_matching() {
        assert_eq!(
            run(r#"regex(.sku, "^JL-")"#, json!({"sku": "JL-BC002"})).unwrap(),
            json!(true)
        );
        assert_eq!(
            run(r#"regex(.sku, "^jl-", "i")"#, json!({"sku": "JL-BC002"})).unwrap(),
            json!(true)
        );
        assert!(run(r#"regex(.sku, "[")"#, json!({"sku": "x"})).is_err());
    }

    #[test]
    fn string_helpers() {
        assert_eq!(
            run(r#"split(.csv, ",")"#, json!({"csv": "a,b,c"})).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(run("join(\"-\")", json!(["a", "b"])).unwrap(), json!("a-b"));
        assert_eq!(
            run("substring(.s, 0, 2)", json!({"s": "hello"})).unwrap(),
            json!("he")
        );
        assert_eq!(run("string(42)", json!(null)).unwrap(), json!("42"));
        assert_eq!(run("number(\"12.5\")", json!(null)).unwrap(), json!(12.5));
        assert_eq!(run("number(\"nope\")", json!(null)).unwrap(), json!(null));
    }

    #[test]
    fn uniq_variants() {
        assert_eq!(run("uniq()", json!([1, 2, 1, 3])).unwrap(), json!([1, 2, 3]));
        assert_eq!(
            run("uniqBy(.k)", json!([{"k": 1, "v": "a"}, {"k": 1, "v": "b"}])).unwrap(),
            json!([{"k": 1, "v": "a"}])
        );
    }

    #[test]
    fn missing_property_is_null() {
        assert_eq!(run(".a.b.c", json!({})).unwrap(), json!(null));
    }

    #[test]
    fn unbound_parameter_is_filter_failed() {
        let err = run("filter(.x > {threshold})", json!([])).unwrap_err();
        assert_eq!(err.code(), "filter_failed");
    }

    #[test]
    fn depth_limit_enforced() {
        let expr = parse(".a").unwrap();
        let mut nested = expr;
        for _ in 0..40 {
            nested = crate::filter::ast::Expr::Unary(
                crate::filter::ast::UnaryOp::Not,
                Box::new(nested),
            );
        }
        let err = eval(&nested, &json!({"a": true}), EvalLimits::default()).unwrap_err();
        assert_eq!(err.code(), "filter_failed");
    }

    #[test]
    fn node_budget_enforced() {
        let big: Vec<i64> = (0..5000).collect();
        let err = run("map(1 + 2 - 3 * 4)", serde_json::to_value(&big).unwrap()).unwrap_err();
        assert_eq!(err.code(), "filter_failed");
        assert!(err.to_string().contains("node budget"));
    }

    #[test]
    fn filter_on_non_array_fails() {
        assert!(run("filter(.x > 1)", json!({"x": 5})).is_err());
    }

    #[test]
    fn non_boolean_condition_fails() {
        assert!(run("filter(.x)", json!([{"x": 1}])).is_err());
    }
}
