//! Source-level types and generic shapes
//!
//! Types only matter to the compiler where they become observable at run time:
//! dynamic boxing (`box`/`unbox`/`is`) and generic instantiation keys. Everything
//! else is dynamically checked by the interpreter.

use std::fmt;

use rustc_hash::FxHashMap;

/// A source type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Float,
    Str,
    /// The empty interface
    Any,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// Pointer to a heap cell
    Ref(Box<Type>),
    Func(Vec<Type>, Option<Box<Type>>),
    /// Declared named type, e.g. `main.Celsius` over `float`
    Named { name: String, underlying: Box<Type> },
    /// Reference to an enclosing type parameter
    Param(String),
}

impl Type {
    pub fn list(elem: Type) -> Self {
        Type::List(Box::new(elem))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn reference(elem: Type) -> Self {
        Type::Ref(Box::new(elem))
    }

    pub fn named(name: impl Into<String>, underlying: Type) -> Self {
        Type::Named {
            name: name.into(),
            underlying: Box::new(underlying),
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Type::Param(name.into())
    }

    /// Canonical spelling, unique per type
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Whether the type mentions any type parameter
    pub fn has_params(&self) -> bool {
        let mut found = false;
        self.visit_params(&mut |_| found = true);
        found
    }

    /// Call `f` on the name of every type parameter mentioned
    pub fn visit_params(&self, f: &mut impl FnMut(&str)) {
        match self {
            Type::Param(name) => f(name),
            Type::List(elem) | Type::Ref(elem) => elem.visit_params(f),
            Type::Map(k, v) => {
                k.visit_params(f);
                v.visit_params(f);
            }
            Type::Func(params, ret) => {
                for p in params {
                    p.visit_params(f);
                }
                if let Some(ret) = ret {
                    ret.visit_params(f);
                }
            }
            Type::Named { underlying, .. } => underlying.visit_params(f),
            Type::Bool | Type::Int | Type::Float | Type::Str | Type::Any => {}
        }
    }

    /// Replace type parameters with their bindings
    ///
    /// Unbound parameters are left in place.
    pub fn substitute(&self, subst: &FxHashMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::List(elem) => Type::List(Box::new(elem.substitute(subst))),
            Type::Ref(elem) => Type::Ref(Box::new(elem.substitute(subst))),
            Type::Map(k, v) => Type::Map(Box::new(k.substitute(subst)), Box::new(v.substitute(subst))),
            Type::Func(params, ret) => Type::Func(
                params.iter().map(|p| p.substitute(subst)).collect(),
                ret.as_ref().map(|r| Box::new(r.substitute(subst))),
            ),
            Type::Named { name, underlying } => Type::Named {
                name: name.clone(),
                underlying: Box::new(underlying.substitute(subst)),
            },
            Type::Bool | Type::Int | Type::Float | Type::Str | Type::Any => self.clone(),
        }
    }

    /// Representation type: what code that never inspects the type sees
    ///
    /// Named types collapse to their underlying representation and every
    /// reference collapses to one pointer shape.
    pub fn representation(&self) -> Type {
        match self {
            Type::Named { underlying, .. } => underlying.representation(),
            Type::Ref(_) => Type::Ref(Box::new(Type::Any)),
            Type::List(elem) => Type::List(Box::new(elem.representation())),
            Type::Map(k, v) => Type::Map(Box::new(k.representation()), Box::new(v.representation())),
            Type::Func(params, ret) => Type::Func(
                params.iter().map(Type::representation).collect(),
                ret.as_ref().map(|r| Box::new(r.representation())),
            ),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "string"),
            Type::Any => write!(f, "any"),
            Type::List(elem) => write!(f, "[]{}", elem),
            Type::Map(k, v) => write!(f, "map[{}]{}", k, v),
            Type::Ref(elem) => write!(f, "*{}", elem),
            Type::Func(params, ret) => {
                write!(f, "func(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")?;
                if let Some(ret) = ret {
                    write!(f, " {}", ret)?;
                }
                Ok(())
            }
            Type::Named { name, .. } => write!(f, "{}", name),
            Type::Param(name) => write!(f, "{}", name),
        }
    }
}

/// Canonical type-argument signature of one generic instantiation
///
/// Built with [`Shape::for_call`]: a parameter whose identity the generic body
/// observes keeps its full type, every other parameter is reduced to its
/// [representation](Type::representation), so instantiations that cannot be
/// told apart share one compiled body and one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    args: Vec<Type>,
}

impl Shape {
    /// Compute the shape of `type_args` for a generic with the given parameters
    pub fn for_call(
        type_params: &[String],
        type_args: &[Type],
        observed: &rustc_hash::FxHashSet<String>,
    ) -> Self {
        let args = type_params
            .iter()
            .zip(type_args)
            .map(|(param, arg)| {
                if observed.contains(param) {
                    arg.clone()
                } else {
                    arg.representation()
                }
            })
            .collect();
        Self { args }
    }

    /// The reduced type arguments, in parameter order
    pub fn args(&self) -> &[Type] {
        &self.args
    }

    /// Substitution from type parameter names to the shape's arguments
    pub fn substitution(&self, type_params: &[String]) -> FxHashMap<String, Type> {
        type_params
            .iter()
            .cloned()
            .zip(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}
