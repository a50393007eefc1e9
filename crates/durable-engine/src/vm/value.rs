//! Runtime values
//!
//! `Value` is a closed union: every variant has exactly one encoding in the
//! snapshot format and one meaning in the interpreter. Anything shared or
//! mutable by reference lives in the coroutine's [`Heap`](super::heap::Heap) and
//! is reached through [`Value::Ref`].

use std::fmt;

use crate::vm::heap::ObjectId;
use crate::vm::types::FunctionKey;

/// A runtime value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable string
    Str(String),
    /// Sequence, copied on assignment
    List(Vec<Value>),
    /// Ordered key/value pairs, copied on assignment
    Map(Vec<(Value, Value)>),
    /// Named record with ordered fields
    Struct(StructValue),
    /// Reference to a shared heap object
    Ref(ObjectId),
    /// Function value: registry key plus captured values
    Func(FuncValue),
    /// Value stored behind a dynamic type (interface / any)
    Dyn(DynValue),
}

/// Named record
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    /// Declared type name, e.g. `main.Point`
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<(String, Value)>,
}

impl StructValue {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Mutable field lookup
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A function value
///
/// Plain function references have no captures. Closures carry their captured
/// variables in the order the compiler assigned; mutated captures are `Ref`s to
/// heap cells shared with the defining frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncValue {
    /// Registered function key
    pub key: FunctionKey,
    /// Captured values, in capture order
    pub captures: Vec<Value>,
}

impl FuncValue {
    /// A capture-free reference to `key`
    pub fn plain(key: FunctionKey) -> Self {
        Self {
            key,
            captures: Vec::new(),
        }
    }
}

/// A value boxed behind a dynamic type identifier
#[derive(Debug, Clone, PartialEq)]
pub struct DynValue {
    /// Registered dynamic type identifier, e.g. `main.Celsius`
    pub type_id: String,
    /// The concrete value
    pub payload: Box<Value>,
}

impl Value {
    /// Convenience constructor for strings
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Name of the variant, used in runtime error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Ref(_) => "ref",
            Value::Func(_) => "func",
            Value::Dyn(_) => "dyn",
        }
    }

    /// Truthiness used by conditional branches
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether the value (transitively, without following refs) holds a reference
    pub fn contains_refs(&self) -> bool {
        match self {
            Value::Ref(_) => true,
            Value::List(items) => items.iter().any(Value::contains_refs),
            Value::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.contains_refs() || v.contains_refs()),
            Value::Struct(s) => s.fields.iter().any(|(_, v)| v.contains_refs()),
            Value::Func(f) => f.captures.iter().any(Value::contains_refs),
            Value::Dyn(d) => d.payload.contains_refs(),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "map[")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "]")
            }
            Value::Struct(s) => {
                write!(f, "{}{{", s.name)?;
                for (i, (name, v)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:{}", name, v)?;
                }
                write!(f, "}}")
            }
            // Heap ids change across a snapshot round trip.
            Value::Ref(_) => write!(f, "&ref"),
            Value::Func(func) => write!(f, "func {}", func.key),
            Value::Dyn(d) => write!(f, "{}", d.payload),
        }
    }
}
