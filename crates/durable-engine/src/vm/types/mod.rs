//! Runtime identification of functions and dynamic types

pub mod key;
pub mod registry;

pub use key::FunctionKey;
pub use registry::{
    CaptureDescriptor, DynTypeInfo, FunctionDescriptor, NativeFn, RegistryError, TypeRegistry,
    TypeRegistryBuilder,
};
