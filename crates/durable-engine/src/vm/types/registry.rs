//! Function and dynamic type registry
//!
//! The registry maps stable keys to compiled functions, dynamic type ids to
//! their descriptions, and native names to host functions. The snapshot codec
//! and the interpreter both resolve through it, so a stream written in one
//! process decodes in any process whose registry was built from the same
//! source.
//!
//! Built once through [`TypeRegistryBuilder`] and frozen into an
//! `Arc<TypeRegistry>`; read-only and lock-free afterwards.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::compiler::ir::{FunctionKind, IrFunction};
use crate::vm::builtins;
use crate::vm::types::FunctionKey;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

/// Host function callable from compiled code
///
/// Natives run to completion and never suspend.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A captured variable of a closure body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDescriptor {
    /// Source name of the captured variable
    pub name: String,
    /// Whether the capture is a shared heap cell rather than a copied value
    pub boxed: bool,
}

/// Everything needed to rebuild an activation of a function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub key: FunctionKey,
    pub kind: FunctionKind,
    /// Ordered captures; empty for top-level functions
    pub captures: Vec<CaptureDescriptor>,
    pub function: Arc<IrFunction>,
}

impl FunctionDescriptor {
    pub fn new(function: IrFunction, captures: Vec<CaptureDescriptor>) -> Self {
        Self {
            key: function.key.clone(),
            kind: function.kind,
            captures,
            function: Arc::new(function),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.kind == FunctionKind::Durable
    }

    pub fn param_count(&self) -> u32 {
        self.function.param_count
    }
}

/// A dynamic (boxed) type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynTypeInfo {
    /// Canonical type id, e.g. `main.Celsius`
    pub type_id: String,
    /// Canonical spelling of the representation type, e.g. `float`
    pub underlying: String,
}

/// Registry construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} '{key}' is already registered with a different definition")]
    Duplicate { kind: &'static str, key: String },
}

/// Immutable registry shared by compiler output, codec and runtime
pub struct TypeRegistry {
    functions: FxHashMap<FunctionKey, FunctionDescriptor>,
    dyn_types: FxHashMap<String, DynTypeInfo>,
    natives: FxHashMap<String, NativeFn>,
}

impl TypeRegistry {
    /// Create a registry builder preloaded with the builtin natives
    pub fn builder() -> TypeRegistryBuilder {
        let mut builder = TypeRegistryBuilder::empty();
        builtins::install(&mut builder);
        builder
    }

    /// Look up a function by key
    pub fn resolve(&self, key: &FunctionKey) -> VmResult<&FunctionDescriptor> {
        self.functions
            .get(key)
            .ok_or_else(|| VmError::UnregisteredIdentifier {
                key: key.to_string(),
            })
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&FunctionDescriptor> {
        self.functions.get(key)
    }

    pub fn contains(&self, key: &FunctionKey) -> bool {
        self.functions.contains_key(key)
    }

    pub fn resolve_dyn_type(&self, type_id: &str) -> Option<&DynTypeInfo> {
        self.dyn_types.get(type_id)
    }

    pub fn native(&self, name: &str) -> Option<&NativeFn> {
        self.natives.get(name)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered function keys, sorted
    pub fn keys(&self) -> Vec<&FunctionKey> {
        let mut keys: Vec<&FunctionKey> = self.functions.keys().collect();
        keys.sort();
        keys
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.functions.values()
    }

    pub fn dyn_types(&self) -> impl Iterator<Item = &DynTypeInfo> {
        self.dyn_types.values()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut natives: Vec<&String> = self.natives.keys().collect();
        natives.sort();
        f.debug_struct("TypeRegistry")
            .field("functions", &self.keys())
            .field("dyn_types", &self.dyn_types.len())
            .field("natives", &natives)
            .finish()
    }
}

/// Builder for [`TypeRegistry`]
pub struct TypeRegistryBuilder {
    functions: FxHashMap<FunctionKey, FunctionDescriptor>,
    dyn_types: FxHashMap<String, DynTypeInfo>,
    natives: FxHashMap<String, NativeFn>,
}

impl TypeRegistryBuilder {
    /// A builder without builtins
    pub fn empty() -> Self {
        Self {
            functions: FxHashMap::default(),
            dyn_types: FxHashMap::default(),
            natives: FxHashMap::default(),
        }
    }

    /// Register a compiled function
    ///
    /// Registering the same key again with an identical descriptor is a no-op,
    /// so programs sharing a dependency can both install it.
    pub fn register_function(&mut self, descriptor: FunctionDescriptor) -> Result<(), RegistryError> {
        if let Some(existing) = self.functions.get(&descriptor.key) {
            if *existing == descriptor {
                return Ok(());
            }
            return Err(RegistryError::Duplicate {
                kind: "function",
                key: descriptor.key.to_string(),
            });
        }
        self.functions.insert(descriptor.key.clone(), descriptor);
        Ok(())
    }

    /// Register a dynamic type
    pub fn register_dyn_type(&mut self, info: DynTypeInfo) -> Result<(), RegistryError> {
        if let Some(existing) = self.dyn_types.get(&info.type_id) {
            if *existing == info {
                return Ok(());
            }
            return Err(RegistryError::Duplicate {
                kind: "dynamic type",
                key: info.type_id,
            });
        }
        self.dyn_types.insert(info.type_id.clone(), info);
        Ok(())
    }

    /// Register a host native; a later registration under the same name wins
    pub fn register_native(
        &mut self,
        name: impl Into<String>,
        native: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.natives.insert(name.into(), Arc::new(native));
        self
    }

    /// Freeze the registry
    pub fn build(self) -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry {
            functions: self.functions,
            dyn_types: self.dyn_types,
            natives: self.natives,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: &str, params: u32) -> FunctionDescriptor {
        FunctionDescriptor::new(
            IrFunction::new(FunctionKey::new(key), FunctionKind::Plain, params, 0),
            Vec::new(),
        )
    }

    #[test]
    fn test_register_and_resolve() {
        let mut builder = TypeRegistryBuilder::empty();
        builder.register_function(descriptor("main.f", 1)).unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(&"main.f".into()).unwrap().param_count(), 1);
        assert!(matches!(
            registry.resolve(&"main.g".into()),
            Err(VmError::UnregisteredIdentifier { ref key }) if key == "main.g"
        ));
    }

    #[test]
    fn test_identical_registration_is_idempotent() {
        let mut builder = TypeRegistryBuilder::empty();
        builder.register_function(descriptor("main.f", 1)).unwrap();
        builder.register_function(descriptor("main.f", 1)).unwrap();
        assert_eq!(
            builder.register_function(descriptor("main.f", 2)),
            Err(RegistryError::Duplicate {
                kind: "function",
                key: "main.f".into()
            })
        );
    }

    #[test]
    fn test_dyn_types() {
        let mut builder = TypeRegistryBuilder::empty();
        let info = DynTypeInfo {
            type_id: "main.Celsius".into(),
            underlying: "float".into(),
        };
        builder.register_dyn_type(info.clone()).unwrap();
        builder.register_dyn_type(info).unwrap();
        let registry = builder.build();
        assert!(registry.resolve_dyn_type("main.Celsius").is_some());
        assert!(registry.resolve_dyn_type("main.Kelvin").is_none());
    }

    #[test]
    fn test_builder_includes_builtins() {
        let registry = TypeRegistry::builder().build();
        assert!(registry.native("len").is_some());
        assert!(registry.is_empty());

        let mut builder = TypeRegistry::builder();
        builder.register_native("now", |_| Ok(Value::Int(42)));
        let registry = builder.build();
        let now = registry.native("now").unwrap();
        assert_eq!(now(&[]).unwrap(), Value::Int(42));
    }
}
