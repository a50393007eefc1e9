//! Durable function compiler
//!
//! Turns a [`Program`](ast::Program) into registry entries:
//!
//! 1. Build the call graph and color the functions that can suspend
//! 2. Monomorphize generics reachable from the roots
//! 3. Lower each function, instantiation and closure body to block IR
//! 4. Rewrite durable functions into resumable state machines
//!
//! Resume point numbering and closure keys depend only on the source, so two
//! compilations of the same program produce identical registries.

pub mod ast;
pub mod callgraph;
pub mod captures;
pub mod ir;
pub mod liveness;
pub mod lower;
pub mod monomorphize;
pub mod statemachine;
pub mod types;

use std::sync::Arc;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::config::CompilerOptions;
use crate::vm::types::{
    DynTypeInfo, FunctionDescriptor, FunctionKey, RegistryError, TypeRegistry, TypeRegistryBuilder,
};

pub use ast::{Program, Span};
pub use callgraph::{CallGraph, Coloring};
pub use lower::LowerJob;
pub use monomorphize::{MonoKey, Monomorphizer};

/// Compilation errors
///
/// Every error names the function it was found in and the source location.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("{function} at {span}: {construct} is not supported in a suspending function")]
    Unsupported {
        function: String,
        construct: String,
        span: Span,
    },

    #[error("{function} at {span}: unknown function '{name}'")]
    UnknownFunction {
        function: String,
        name: String,
        span: Span,
    },

    #[error("{function} at {span}: unknown variable '{name}'")]
    UnknownVariable {
        function: String,
        name: String,
        span: Span,
    },

    #[error("{function} at {span}: {callee} expects {expected} arguments, got {found}")]
    ArityMismatch {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("{function} at {span}: {callee} expects {expected} type arguments, got {found}")]
    TypeArgumentMismatch {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("{function} at {span}: break outside of a loop")]
    BreakOutsideLoop { function: String, span: Span },

    #[error("{function} at {span}: continue outside of a loop")]
    ContinueOutsideLoop { function: String, span: Span },

    #[error("{function} at {span}: no enclosing loop labeled '{label}'")]
    UnknownLabel {
        function: String,
        label: String,
        span: Span,
    },

    #[error("{function} at {span}: generic instantiation exceeds depth {limit}")]
    InstantiationDepth {
        function: String,
        limit: u32,
        span: Span,
    },

    #[error("function '{name}' declared twice (second declaration at {span})")]
    DuplicateFunction { name: String, span: Span },
}

/// One entry the compiled program contributes to a registry
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Function(FunctionDescriptor),
    DynType(DynTypeInfo),
}

/// Output of [`Compiler::compile`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledProgram {
    /// Compiled functions, instantiations and closure bodies, sorted by key
    pub functions: Vec<FunctionDescriptor>,
    /// Dynamic types boxed anywhere in the program, sorted by id
    pub dyn_types: Vec<DynTypeInfo>,
}

impl CompiledProgram {
    pub fn function(&self, key: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.key.as_str() == key)
    }

    /// Resume point ids assigned to a function; empty for plain functions
    pub fn resume_points(&self, key: &str) -> Vec<u32> {
        self.function(key)
            .map(|f| f.function.resume_points())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<&FunctionKey> {
        self.functions.iter().map(|f| &f.key).collect()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.functions
            .iter()
            .cloned()
            .map(Registration::Function)
            .chain(self.dyn_types.iter().cloned().map(Registration::DynType))
            .collect()
    }

    /// Register every function and dynamic type
    pub fn install(&self, builder: &mut TypeRegistryBuilder) -> Result<(), RegistryError> {
        for registration in self.registrations() {
            match registration {
                Registration::Function(descriptor) => builder.register_function(descriptor)?,
                Registration::DynType(info) => builder.register_dyn_type(info)?,
            }
        }
        Ok(())
    }

    /// Build a registry holding the builtins and this program
    pub fn registry(&self) -> Result<Arc<TypeRegistry>, RegistryError> {
        let mut builder = TypeRegistry::builder();
        self.install(&mut builder)?;
        Ok(builder.build())
    }
}

/// Compiler driver
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a whole program
    pub fn compile(&self, program: &Program) -> Result<CompiledProgram, CompileError> {
        check_duplicates(program)?;

        let graph = CallGraph::build(program)?;
        let coloring = graph.color();

        let mut mono = Monomorphizer::new(program, self.options.max_instantiation_depth);
        for request in &self.options.instantiations {
            mono.request(
                &request.function,
                &request.function,
                &request.type_args,
                0,
                Span::default(),
            )?;
        }

        let mut functions = Vec::new();
        let mut dyn_types: Vec<DynTypeInfo> = Vec::new();
        let mut closures: Vec<LowerJob> = Vec::new();

        loop {
            let job = match closures.pop() {
                Some(job) => job,
                None => match mono.next() {
                    Some(instance) => LowerJob::for_instance(program, &instance),
                    None => break,
                },
            };

            let lowered = lower::lower_function(&job, &coloring, &mut mono)?;
            // Reversed so closures are compiled in source order.
            closures.extend(lowered.closures.into_iter().rev());
            for info in lowered.dyn_types {
                if !dyn_types.contains(&info) {
                    dyn_types.push(info);
                }
            }

            let mut function = lowered.function;
            if function.is_durable() {
                statemachine::transform(&mut function);
            }
            tracing::debug!(
                function = %function.key,
                durable = function.is_durable(),
                resume_points = function.suspension_points.len(),
                instructions = function.instruction_count(),
                "compiled function"
            );
            functions.push(FunctionDescriptor::new(function, lowered.captures));
        }

        functions.sort_by(|a, b| a.key.cmp(&b.key));
        dyn_types.sort_by(|a, b| a.type_id.cmp(&b.type_id));

        tracing::info!(
            package = %program.package,
            functions = functions.len(),
            durable = functions.iter().filter(|f| f.is_durable()).count(),
            dyn_types = dyn_types.len(),
            "compiled program"
        );
        Ok(CompiledProgram {
            functions,
            dyn_types,
        })
    }
}

fn check_duplicates(program: &Program) -> Result<(), CompileError> {
    let mut seen = FxHashSet::default();
    for decl in &program.functions {
        if !seen.insert(decl.name.as_str()) {
            return Err(CompileError::DuplicateFunction {
                name: decl.name.clone(),
                span: decl.span,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{Expr, FunctionDecl, Stmt};

    #[test]
    fn test_duplicate_function() {
        let program = Program::new("main")
            .with_function(FunctionDecl::new("f", vec![], vec![]))
            .with_function(FunctionDecl::new("f", vec![], vec![]).at(Span::new(4, 1)));
        assert_eq!(
            Compiler::default().compile(&program),
            Err(CompileError::DuplicateFunction {
                name: "f".into(),
                span: Span::new(4, 1)
            })
        );
    }

    #[test]
    fn test_compiled_program_registers() {
        let program = Program::new("main").with_function(FunctionDecl::new(
            "gen",
            vec![],
            vec![Stmt::expr(Expr::yield_(Expr::int(1)))],
        ));
        let compiled = Compiler::default().compile(&program).unwrap();
        assert_eq!(compiled.resume_points("main.gen"), vec![1]);
        assert_eq!(compiled.registrations().len(), 1);

        let registry = compiled.registry().unwrap();
        assert!(registry.contains(&FunctionKey::new("main.gen")));
        // Installing twice is idempotent.
        let mut builder = TypeRegistry::builder();
        compiled.install(&mut builder).unwrap();
        compiled.install(&mut builder).unwrap();
    }
}
