//! Builtin natives
//!
//! Installed into every registry created with [`TypeRegistry::builder`]. All of
//! them are pure functions of their arguments: natives never see the heap and
//! never suspend.
//!
//! [`TypeRegistry::builder`]: crate::vm::types::TypeRegistry::builder

use once_cell::sync::Lazy;

use crate::vm::types::TypeRegistryBuilder;
use crate::vm::value::Value;

type Builtin = fn(&[Value]) -> Result<Value, String>;

static BUILTINS: Lazy<Vec<(&'static str, Builtin)>> = Lazy::new(|| {
    vec![
        ("len", len as Builtin),
        ("append", append),
        ("str", to_str),
        ("keys", keys),
        ("contains", contains),
        ("panic", panic),
        ("abs", abs),
        ("min", min),
        ("max", max),
    ]
});

/// Register every builtin on `builder`
pub fn install(builder: &mut TypeRegistryBuilder) {
    for (name, native) in BUILTINS.iter() {
        builder.register_native(*name, *native);
    }
}

fn expect_arity(name: &str, args: &[Value], count: usize) -> Result<(), String> {
    if args.len() != count {
        return Err(format!("{} expects {} arguments, got {}", name, count, args.len()));
    }
    Ok(())
}

fn len(args: &[Value]) -> Result<Value, String> {
    expect_arity("len", args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::Nil => 0,
        other => return Err(format!("len of {}", other.type_name())),
    };
    Ok(Value::Int(n as i64))
}

fn append(args: &[Value]) -> Result<Value, String> {
    let Some((first, rest)) = args.split_first() else {
        return Err("append expects a list".into());
    };
    let mut items = match first {
        Value::List(items) => items.clone(),
        Value::Nil => Vec::new(),
        other => return Err(format!("append to {}", other.type_name())),
    };
    items.extend_from_slice(rest);
    Ok(Value::List(items))
}

fn to_str(args: &[Value]) -> Result<Value, String> {
    expect_arity("str", args, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

fn keys(args: &[Value]) -> Result<Value, String> {
    expect_arity("keys", args, 1)?;
    match &args[0] {
        Value::Map(entries) => Ok(Value::List(entries.iter().map(|(k, _)| k.clone()).collect())),
        other => Err(format!("keys of {}", other.type_name())),
    }
}

fn contains(args: &[Value]) -> Result<Value, String> {
    expect_arity("contains", args, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::List(items), needle) => items.iter().any(|item| item == needle),
        (Value::Map(entries), needle) => entries.iter().any(|(k, _)| k == needle),
        (Value::Str(s), Value::Str(needle)) => s.contains(needle.as_str()),
        (container, _) => return Err(format!("contains on {}", container.type_name())),
    };
    Ok(Value::Bool(found))
}

fn panic(args: &[Value]) -> Result<Value, String> {
    let message = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    Err(message)
}

fn abs(args: &[Value]) -> Result<Value, String> {
    expect_arity("abs", args, 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        other => Err(format!("abs of {}", other.type_name())),
    }
}

fn min(args: &[Value]) -> Result<Value, String> {
    extremum("min", args, |a, b| a < b)
}

fn max(args: &[Value]) -> Result<Value, String> {
    extremum("max", args, |a, b| a > b)
}

fn extremum(name: &str, args: &[Value], better: fn(f64, f64) -> bool) -> Result<Value, String> {
    let Some((first, rest)) = args.split_first() else {
        return Err(format!("{} expects at least one argument", name));
    };
    let mut best = first;
    for candidate in rest {
        let (Some(a), Some(b)) = (as_number(candidate), as_number(best)) else {
            return Err(format!("{} of {} and {}", name, candidate.type_name(), best.type_name()));
        };
        if better(a, b) {
            best = candidate;
        }
    }
    if as_number(best).is_none() {
        return Err(format!("{} of {}", name, best.type_name()));
    }
    Ok(best.clone())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}
