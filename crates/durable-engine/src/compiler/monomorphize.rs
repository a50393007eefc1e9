//! Generic instantiation
//!
//! A worklist over `(declaration, shape)` pairs. Roots are the non-generic
//! declarations; every call site or function reference with type arguments
//! requests another instantiation while the requesting body is lowered.
//! Requests whose shapes collapse to the same key compile once.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::ast::{walk_body, FunctionDecl, Program, Span, Visitor};
use crate::compiler::types::{Shape, Type};
use crate::compiler::CompileError;
use crate::vm::types::FunctionKey;

/// Identity of one instantiation before it is turned into a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonoKey {
    /// Qualified declaration name
    pub name: String,
    /// `None` for non-generic declarations
    pub shape: Option<Shape>,
}

impl MonoKey {
    pub fn function_key(&self) -> FunctionKey {
        let shape = self.shape.as_ref().map(Shape::to_string);
        FunctionKey::derive(&self.name, shape.as_deref())
    }
}

/// Type parameters whose identity a generic body can observe
///
/// A parameter is observed when it appears in a `box`/`unbox`/`is` type or is
/// passed on as a type argument, anywhere in the body including closures.
pub fn observed_type_params(decl: &FunctionDecl) -> FxHashSet<String> {
    struct Observer(FxHashSet<String>);

    impl Visitor for Observer {
        fn visit_type(&mut self, ty: &Type) {
            ty.visit_params(&mut |name| {
                self.0.insert(name.to_string());
            });
        }
    }

    let mut observer = Observer(FxHashSet::default());
    walk_body(&mut observer, &decl.body);
    observer.0
}

/// A queued instantiation
#[derive(Debug, Clone, PartialEq)]
pub struct Instantiation {
    /// Index into `Program::functions`
    pub decl_index: usize,
    pub key: FunctionKey,
    /// Type parameter bindings for the body
    pub subst: FxHashMap<String, Type>,
    /// Number of generic instantiations on the request chain
    pub depth: u32,
}

/// Instantiation worklist
pub struct Monomorphizer<'p> {
    program: &'p Program,
    decls: FxHashMap<&'p str, usize>,
    observed: Vec<FxHashSet<String>>,
    max_depth: u32,
    seen: FxHashSet<FunctionKey>,
    queue: VecDeque<Instantiation>,
}

impl<'p> Monomorphizer<'p> {
    /// Create the worklist, seeded with every non-generic declaration
    pub fn new(program: &'p Program, max_depth: u32) -> Self {
        let decls = program
            .functions
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.name.as_str(), i))
            .collect();
        let observed = program.functions.iter().map(observed_type_params).collect();

        let mut mono = Self {
            program,
            decls,
            observed,
            max_depth,
            seen: FxHashSet::default(),
            queue: VecDeque::new(),
        };
        for (decl_index, decl) in program.functions.iter().enumerate() {
            if decl.is_generic() {
                continue;
            }
            let key = FunctionKey::derive(&program.qualify(&decl.name), None);
            mono.seen.insert(key.clone());
            mono.queue.push_back(Instantiation {
                decl_index,
                key,
                subst: FxHashMap::default(),
                depth: 0,
            });
        }
        mono
    }

    /// Resolve a reference to `name` with concrete `type_args`
    ///
    /// Returns the key of the target, queueing a new instantiation the first
    /// time a shape is seen. `depth` is the depth of the requesting body.
    pub fn request(
        &mut self,
        caller: &str,
        name: &str,
        type_args: &[Type],
        depth: u32,
        span: Span,
    ) -> Result<FunctionKey, CompileError> {
        let decl_index = *self
            .decls
            .get(name)
            .ok_or_else(|| CompileError::UnknownFunction {
                function: caller.to_string(),
                name: name.to_string(),
                span,
            })?;
        let decl = &self.program.functions[decl_index];

        if decl.type_params.len() != type_args.len() {
            return Err(CompileError::TypeArgumentMismatch {
                function: caller.to_string(),
                callee: name.to_string(),
                expected: decl.type_params.len(),
                found: type_args.len(),
                span,
            });
        }

        let qualified = self.program.qualify(&decl.name);
        if !decl.is_generic() {
            return Ok(FunctionKey::derive(&qualified, None));
        }

        let shape = Shape::for_call(&decl.type_params, type_args, &self.observed[decl_index]);
        let mono_key = MonoKey {
            name: qualified,
            shape: Some(shape),
        };
        let key = mono_key.function_key();
        if self.seen.contains(&key) {
            return Ok(key);
        }

        let depth = depth + 1;
        if depth > self.max_depth {
            return Err(CompileError::InstantiationDepth {
                function: caller.to_string(),
                limit: self.max_depth,
                span,
            });
        }

        let subst = mono_key
            .shape
            .as_ref()
            .map(|shape| shape.substitution(&decl.type_params))
            .unwrap_or_default();
        tracing::trace!(key = %key, depth, "queued instantiation");
        self.seen.insert(key.clone());
        self.queue.push_back(Instantiation {
            decl_index,
            key: key.clone(),
            subst,
            depth,
        });
        Ok(key)
    }

    /// Next instantiation to compile, in request order
    pub fn next(&mut self) -> Option<Instantiation> {
        self.queue.pop_front()
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// Declaration with the given short name
    pub fn declaration(&self, name: &str) -> Option<&'p FunctionDecl> {
        self.decls.get(name).map(|&i| &self.program.functions[i])
    }

    /// Number of distinct keys requested so far
    pub fn instantiated(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{Expr, Param, Stmt};

    fn program() -> Program {
        Program::new("main")
            .with_function(
                FunctionDecl::new(
                    "id",
                    vec![Param::new("x", Type::param("T"))],
                    vec![Stmt::ret(Some(Expr::var("x")))],
                )
                .generic(&["T"]),
            )
            .with_function(
                FunctionDecl::new(
                    "wrap",
                    vec![Param::new("x", Type::param("T"))],
                    vec![Stmt::ret(Some(Expr::box_(Type::param("T"), Expr::var("x"))))],
                )
                .generic(&["T"]),
            )
            .with_function(FunctionDecl::new("main", vec![], vec![]))
    }

    fn celsius() -> Type {
        Type::named("main.Celsius", Type::Float)
    }

    #[test]
    fn test_roots_are_non_generic_declarations() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 8);
        let root = mono.next().unwrap();
        assert_eq!(root.key.as_str(), "main.main");
        assert!(mono.next().is_none());
    }

    #[test]
    fn test_unobserved_params_collapse() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 8);
        let a = mono.request("main", "id", &[celsius()], 0, Span::default()).unwrap();
        let b = mono.request("main", "id", &[Type::Float], 0, Span::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "main.id[float]");

        let r = mono
            .request("main", "id", &[Type::reference(Type::Int)], 0, Span::default())
            .unwrap();
        assert_eq!(r.as_str(), "main.id[*any]");
    }

    #[test]
    fn test_observed_params_keep_identity() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 8);
        let a = mono.request("main", "wrap", &[celsius()], 0, Span::default()).unwrap();
        let b = mono.request("main", "wrap", &[Type::Float], 0, Span::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "main.wrap[main.Celsius]");
    }

    #[test]
    fn test_each_shape_is_queued_once() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 8);
        mono.next();
        mono.request("main", "id", &[Type::Int], 0, Span::default()).unwrap();
        mono.request("main", "id", &[Type::Int], 0, Span::default()).unwrap();
        let instance = mono.next().unwrap();
        assert_eq!(instance.depth, 1);
        assert_eq!(instance.subst.get("T"), Some(&Type::Int));
        assert!(mono.next().is_none());
    }

    #[test]
    fn test_type_argument_mismatch() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 8);
        assert!(matches!(
            mono.request("main", "id", &[], 0, Span::default()),
            Err(CompileError::TypeArgumentMismatch { expected: 1, found: 0, .. })
        ));
        assert!(matches!(
            mono.request("main", "main", &[Type::Int], 0, Span::default()),
            Err(CompileError::TypeArgumentMismatch { expected: 0, found: 1, .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let program = program();
        let mut mono = Monomorphizer::new(&program, 2);
        assert!(mono.request("main", "id", &[Type::Int], 1, Span::default()).is_ok());
        assert!(matches!(
            mono.request("main", "id", &[Type::Str], 2, Span::default()),
            Err(CompileError::InstantiationDepth { limit: 2, .. })
        ));
    }
}
