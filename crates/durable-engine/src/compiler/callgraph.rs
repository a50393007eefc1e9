//! Call graph and durable coloring
//!
//! Nodes are declared functions (`pkg.F`) and the closure literals lifted out
//! of them (`pkg.F.func1`, numbered per enclosing function in evaluation order).
//! A generic declaration is one node; every instantiation shares its color.
//!
//! Coloring computes the least set of functions that can suspend:
//! direct yielders, their callers, and any function performing a dynamic call
//! once some suspending function escapes as a value.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::ast::{walk_expr, CallTarget, Expr, ExprKind, Program, Span, Visitor};
use crate::compiler::CompileError;

/// One function or closure literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNode {
    /// Qualified name: `pkg.F` or `pkg.F.funcN`
    pub name: String,
    pub is_closure: bool,
    /// Contains a `yield` expression
    pub yields: bool,
    /// Calls through a function value
    pub dynamic_calls: bool,
    /// Statically called functions, by qualified name
    pub calls: Vec<String>,
    /// Functions and closures used as values
    pub references: Vec<String>,
}

impl CallNode {
    fn new(name: String, is_closure: bool) -> Self {
        Self {
            name,
            is_closure,
            yields: false,
            dynamic_calls: false,
            calls: Vec::new(),
            references: Vec::new(),
        }
    }
}

/// Static call graph of a program
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: Vec<CallNode>,
    index: FxHashMap<String, usize>,
}

impl CallGraph {
    /// Build the call graph of every function and closure in `program`
    pub fn build(program: &Program) -> Result<Self, CompileError> {
        let declared: FxHashSet<&str> = program.functions.iter().map(|f| f.name.as_str()).collect();
        let mut nodes = Vec::new();

        for decl in &program.functions {
            let mut builder = NodeBuilder {
                program,
                declared: &declared,
                function: &decl.name,
                node: CallNode::new(program.qualify(&decl.name), false),
                closure_count: 0,
                out: &mut nodes,
                error: None,
            };
            crate::compiler::ast::walk_body(&mut builder, &decl.body);
            builder.finish()?;
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), i))
            .collect();
        Ok(Self { nodes, index })
    }

    pub fn node(&self, name: &str) -> Option<&CallNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compute the set of functions that must become state machines
    pub fn color(&self) -> Coloring {
        let mut callers: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        let mut escaping: FxHashSet<&str> = FxHashSet::default();
        let mut dynamic_callers: Vec<&str> = Vec::new();

        for node in &self.nodes {
            for callee in &node.calls {
                callers.entry(callee.as_str()).or_default().push(&node.name);
            }
            for referenced in &node.references {
                escaping.insert(referenced.as_str());
            }
            if node.is_closure {
                escaping.insert(&node.name);
            }
            if node.dynamic_calls {
                dynamic_callers.push(&node.name);
            }
        }

        let mut durable: FxHashSet<String> = FxHashSet::default();
        let mut worklist: Vec<&str> = Vec::new();
        for node in self.nodes.iter().filter(|n| n.yields) {
            durable.insert(node.name.clone());
            worklist.push(&node.name);
        }

        let mut dynamic_unlocked = false;
        while let Some(name) = worklist.pop() {
            if let Some(list) = callers.get(name) {
                for &caller in list {
                    if durable.insert(caller.to_string()) {
                        worklist.push(caller);
                    }
                }
            }
            // A suspending function used as a value can reach any dynamic call site.
            if !dynamic_unlocked && escaping.contains(name) {
                dynamic_unlocked = true;
                for &caller in &dynamic_callers {
                    if durable.insert(caller.to_string()) {
                        worklist.push(caller);
                    }
                }
            }
        }

        for name in &durable {
            tracing::debug!(function = %name, "colored durable");
        }
        Coloring { durable }
    }
}

/// Result of coloring: which nodes suspend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coloring {
    durable: FxHashSet<String>,
}

impl Coloring {
    /// Whether the declaration or closure named `name` is durable
    pub fn is_durable(&self, name: &str) -> bool {
        self.durable.contains(name)
    }

    pub fn len(&self) -> usize {
        self.durable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durable.is_empty()
    }

    /// Durable names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.durable.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

struct NodeBuilder<'a, 'o> {
    program: &'a Program,
    declared: &'a FxHashSet<&'a str>,
    /// Source name for diagnostics
    function: &'a str,
    node: CallNode,
    closure_count: u32,
    out: &'o mut Vec<CallNode>,
    error: Option<CompileError>,
}

impl NodeBuilder<'_, '_> {
    fn finish(self) -> Result<(), CompileError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.out.push(self.node);
        Ok(())
    }

    fn resolve(&mut self, name: &str, span: Span) -> Option<String> {
        if self.declared.contains(name) {
            Some(self.program.qualify(name))
        } else {
            if self.error.is_none() {
                self.error = Some(CompileError::UnknownFunction {
                    function: self.function.to_string(),
                    name: name.to_string(),
                    span,
                });
            }
            None
        }
    }
}

impl Visitor for NodeBuilder<'_, '_> {
    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Yield(_) => {
                self.node.yields = true;
                walk_expr(self, expr);
            }
            ExprKind::Call { target, .. } => {
                match target {
                    CallTarget::Function { name, .. } => {
                        if let Some(qualified) = self.resolve(name, expr.span) {
                            if !self.node.calls.contains(&qualified) {
                                self.node.calls.push(qualified);
                            }
                        }
                    }
                    CallTarget::Value(_) => self.node.dynamic_calls = true,
                    CallTarget::Native(_) => {}
                }
                walk_expr(self, expr);
            }
            ExprKind::FuncRef { name, .. } => {
                if let Some(qualified) = self.resolve(name, expr.span) {
                    if !self.node.references.contains(&qualified) {
                        self.node.references.push(qualified);
                    }
                }
            }
            ExprKind::Closure { body, .. } => {
                self.closure_count += 1;
                let name = format!("{}.func{}", self.node.name, self.closure_count);
                self.node.references.push(name.clone());

                let mut child = NodeBuilder {
                    program: self.program,
                    declared: self.declared,
                    function: self.function,
                    node: CallNode::new(name, true),
                    closure_count: 0,
                    out: &mut *self.out,
                    error: None,
                };
                crate::compiler::ast::walk_body(&mut child, body);
                if let Err(err) = child.finish() {
                    if self.error.is_none() {
                        self.error = Some(err);
                    }
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}
