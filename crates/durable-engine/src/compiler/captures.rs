//! Closure capture analysis
//!
//! Two questions are answered here:
//!
//! 1. Which variables does a closure literal capture, and in what order? Free
//!    variables are listed in first-reference order, which becomes the order of
//!    `FuncValue::captures` and of the closure's capture slots.
//! 2. Which local bindings of a function must live in a heap cell? A binding is
//!    boxed when some closure captures it and it is assigned after its
//!    declaration, either by the function itself or by any closure. Everything
//!    else is copied into the closure by value.
//!
//! Bindings are numbered in declaration order: parameters, then captures, then
//! `let` and `for` variables in evaluation order. The lowering pass declares
//! bindings in exactly that order and looks the decision up by number.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::ast::{walk_expr, walk_place, Expr, ExprKind, Param, Place, Stmt, StmtKind, Visitor};

/// Free variables of one closure literal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureCaptures {
    /// Free variables, in first-reference order
    pub free: Vec<String>,
    /// Free variables assigned somewhere in the closure (or closures nested in it)
    pub assigned: FxHashSet<String>,
}

/// Compute the free variables of a closure literal
pub fn closure_captures(params: &[Param], body: &[Stmt]) -> ClosureCaptures {
    let mut collector = FreeVariableCollector {
        scopes: vec![params.iter().map(|p| p.name.clone()).collect()],
        captures: ClosureCaptures::default(),
        seen: FxHashSet::default(),
    };
    collector.walk_scoped(body, &[]);
    collector.captures
}

/// Collects references to variables not bound inside the closure
struct FreeVariableCollector {
    scopes: Vec<FxHashSet<String>>,
    captures: ClosureCaptures,
    seen: FxHashSet<String>,
}

impl FreeVariableCollector {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn reference(&mut self, name: &str, assigned: bool) {
        if self.is_bound(name) {
            return;
        }
        if self.seen.insert(name.to_string()) {
            self.captures.free.push(name.to_string());
        }
        if assigned {
            self.captures.assigned.insert(name.to_string());
        }
    }

    fn walk_scoped(&mut self, body: &[Stmt], bindings: &[&str]) {
        self.scopes
            .push(bindings.iter().map(|b| b.to_string()).collect());
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }
}

impl Visitor for FreeVariableCollector {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                self.visit_expr(init);
                self.declare(name);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.visit_expr(cond);
                self.walk_scoped(then_body, &[]);
                self.walk_scoped(else_body, &[]);
            }
            StmtKind::While { cond, body, .. } => {
                self.visit_expr(cond);
                self.walk_scoped(body, &[]);
            }
            StmtKind::Loop { body, .. } | StmtKind::Block(body) => self.walk_scoped(body, &[]),
            StmtKind::ForRange {
                var,
                start,
                end,
                body,
                ..
            } => {
                self.visit_expr(start);
                self.visit_expr(end);
                self.walk_scoped(body, &[var.as_str()]);
            }
            _ => crate::compiler::ast::walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Var(name) => self.reference(name, false),
            ExprKind::Closure { params, body } => {
                let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                self.walk_scoped(body, &names);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_place(&mut self, place: &Place) {
        match place {
            // Field and index stores reach here through their base, so they
            // count as writes to the root variable too.
            Place::Var(name) => self.reference(name, true),
            _ => walk_place(self, place),
        }
    }
}

/// Root variable written by an assignment, if the write lands in a local
pub fn assigned_root(place: &Place) -> Option<&str> {
    match place {
        Place::Var(name) => Some(name),
        Place::Field { base, .. } | Place::Index { base, .. } => assigned_root(base),
        Place::Deref(_) => None,
    }
}

/// Which bindings of one function body live in heap cells
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxingPlan {
    boxed: Vec<bool>,
}

impl BoxingPlan {
    /// Whether binding number `ordinal` must be a heap cell
    pub fn is_boxed(&self, ordinal: usize) -> bool {
        self.boxed.get(ordinal).copied().unwrap_or(false)
    }

    /// Number of bindings the analysis saw
    pub fn binding_count(&self) -> usize {
        self.boxed.len()
    }

    /// Analyze a function body
    ///
    /// `params` and `captures` are the bindings in scope on entry, in slot order.
    pub fn analyze(params: &[Param], captures: &[String], body: &[Stmt]) -> Self {
        let mut analysis = BindingAnalysis::default();
        analysis.scopes.push(FxHashMap::default());
        for param in params {
            analysis.declare(&param.name);
        }
        for capture in captures {
            analysis.declare(capture);
        }
        for stmt in body {
            analysis.visit_stmt(stmt);
        }

        let boxed = analysis
            .bindings
            .iter()
            .map(|b| b.captured && (b.assigned || b.assigned_in_closure))
            .collect();
        BoxingPlan { boxed }
    }
}

#[derive(Debug, Default)]
struct BindingFacts {
    captured: bool,
    assigned: bool,
    assigned_in_closure: bool,
}

#[derive(Default)]
struct BindingAnalysis {
    scopes: Vec<FxHashMap<String, usize>>,
    bindings: Vec<BindingFacts>,
}

impl BindingAnalysis {
    fn declare(&mut self, name: &str) {
        let ordinal = self.bindings.len();
        self.bindings.push(BindingFacts::default());
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ordinal);
        }
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn scoped(&mut self, body: &[Stmt], binding: Option<&str>) {
        self.scopes.push(FxHashMap::default());
        if let Some(name) = binding {
            self.declare(name);
        }
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.scopes.pop();
    }
}

impl Visitor for BindingAnalysis {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                self.visit_expr(init);
                self.declare(name);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.visit_expr(cond);
                self.scoped(then_body, None);
                self.scoped(else_body, None);
            }
            StmtKind::While { cond, body, .. } => {
                self.visit_expr(cond);
                self.scoped(body, None);
            }
            StmtKind::Loop { body, .. } | StmtKind::Block(body) => self.scoped(body, None),
            StmtKind::ForRange {
                var,
                start,
                end,
                body,
                ..
            } => {
                self.visit_expr(start);
                self.visit_expr(end);
                self.scoped(body, Some(var));
            }
            StmtKind::Assign { target, value } => {
                self.visit_expr(value);
                self.visit_place(target);
                if let Some(ordinal) = assigned_root(target).and_then(|name| self.resolve(name)) {
                    self.bindings[ordinal].assigned = true;
                }
            }
            _ => crate::compiler::ast::walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Closure { params, body } => {
                // The closure body is a separate function; only its free
                // variables matter here.
                let captures = closure_captures(params, body);
                for name in &captures.free {
                    if let Some(ordinal) = self.resolve(name) {
                        let facts = &mut self.bindings[ordinal];
                        facts.captured = true;
                        if captures.assigned.contains(name) {
                            facts.assigned_in_closure = true;
                        }
                    }
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}
