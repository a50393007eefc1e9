//! Stable function identifiers
//!
//! A key names a compiled function independently of where it was loaded, so a
//! snapshot taken in one process resolves in another that compiled the same
//! source.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a compiled function, instantiation, or closure body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionKey(String);

impl FunctionKey {
    /// Wrap an already-formatted key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key of a function from its qualified name and optional shape
    ///
    /// `pkg.F` for plain declarations, `pkg.F[int,*any]` for instantiations.
    pub fn derive(qualified_name: &str, shape: Option<&str>) -> Self {
        match shape {
            Some(shape) => Self(format!("{}[{}]", qualified_name, shape)),
            None => Self(qualified_name.to_string()),
        }
    }

    /// Key of the `index`-th closure literal (1-based) lexically inside `self`
    pub fn closure(&self, index: u32) -> Self {
        Self(format!("{}.func{}", self.0, index))
    }

    /// The textual key
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names a closure body
    pub fn is_closure(&self) -> bool {
        self.0
            .rsplit('.')
            .next()
            .and_then(|tail| tail.strip_prefix("func"))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_plain_and_generic() {
        assert_eq!(FunctionKey::derive("main.squares", None).as_str(), "main.squares");
        assert_eq!(
            FunctionKey::derive("main.Map", Some("int,string")).as_str(),
            "main.Map[int,string]"
        );
    }

    #[test]
    fn test_closure_keys() {
        let outer = FunctionKey::derive("main.counter", None);
        let first = outer.closure(1);
        assert_eq!(first.as_str(), "main.counter.func1");
        assert_eq!(first.closure(2).as_str(), "main.counter.func1.func2");
        assert!(first.is_closure());
        assert!(!outer.is_closure());
        assert!(!FunctionKey::new("main.funcy").is_closure());
    }
}
