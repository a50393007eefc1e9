//! Compiler input
//!
//! Normalized function bodies handed over by a front end. The tree is already
//! name-resolved at package level: calls name functions of the same package by
//! their short name, and every node carries a [`Span`] for diagnostics.
//!
//! Child nodes are always visited in evaluation order (see [`walk_stmt`] and
//! [`walk_expr`]). Closure keys and resume point ids are derived from that
//! order, so every pass that numbers things must walk the tree through it.

use std::fmt;

use crate::compiler::types::Type;

/// Source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A compilation unit: one package worth of functions
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub package: String,
    pub functions: Vec<FunctionDecl>,
}

impl Program {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            functions: Vec::new(),
        }
    }

    /// Builder-style append
    pub fn with_function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    /// Package-qualified name of a declaration
    pub fn qualify(&self, name: &str) -> String {
        format!("{}.{}", self.package, name)
    }
}

/// Top-level function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            params,
            body,
            span: Span::default(),
        }
    }

    /// Declare type parameters, making the function generic
    pub fn generic(mut self, type_params: &[&str]) -> Self {
        self.type_params = type_params.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

/// Function or closure parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name = init`
    Let { name: String, init: Expr },
    /// `target = value`
    Assign { target: Place, value: Expr },
    /// Expression evaluated for its effects
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        label: Option<String>,
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// Unconditional loop, left through `break` or `return`
    Loop {
        label: Option<String>,
        body: Vec<Stmt>,
    },
    /// `for var in start..end`; `var` is a fresh binding per iteration
    ForRange {
        label: Option<String>,
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    /// Deferred call, run when the enclosing function returns
    Defer(Expr),
}

/// Assignment target
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Var(String),
    Field { base: Box<Place>, field: String },
    Index { base: Box<Place>, index: Expr },
    /// Store through a reference: `*r = v`
    Deref(Expr),
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn let_(name: impl Into<String>, init: Expr) -> Self {
        Self::new(StmtKind::Let {
            name: name.into(),
            init,
        })
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Self::new(StmtKind::Assign {
            target: Place::Var(name.into()),
            value,
        })
    }

    pub fn assign_to(target: Place, value: Expr) -> Self {
        Self::new(StmtKind::Assign { target, value })
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    pub fn if_(cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::If {
            cond,
            then_body,
            else_body,
        })
    }

    pub fn while_(cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::While {
            label: None,
            cond,
            body,
        })
    }

    pub fn loop_(body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Loop { label: None, body })
    }

    pub fn for_range(var: impl Into<String>, start: Expr, end: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::ForRange {
            label: None,
            var: var.into(),
            start,
            end,
            body,
        })
    }

    /// Attach a label to a loop statement; other statements are unchanged
    pub fn labeled(mut self, name: impl Into<String>) -> Self {
        match &mut self.kind {
            StmtKind::While { label, .. }
            | StmtKind::Loop { label, .. }
            | StmtKind::ForRange { label, .. } => *label = Some(name.into()),
            _ => {}
        }
        self
    }

    pub fn break_(label: Option<&str>) -> Self {
        Self::new(StmtKind::Break(label.map(str::to_string)))
    }

    pub fn continue_(label: Option<&str>) -> Self {
        Self::new(StmtKind::Continue(label.map(str::to_string)))
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(value))
    }

    pub fn block(body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(body))
    }

    pub fn defer(call: Expr) -> Self {
        Self::new(StmtKind::Defer(call))
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Short-circuit operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

/// What a call expression invokes
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// A declared function of this package, with explicit type arguments when generic
    Function { name: String, type_args: Vec<Type> },
    /// A host native registered by name
    Native(String),
    /// Any function value (closure or function reference)
    Value(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Lit(Literal),
    Var(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        target: CallTarget,
        args: Vec<Expr>,
    },
    /// Suspend, handing the operand to the consumer; evaluates to the value sent back
    Yield(Box<Expr>),
    Closure {
        params: Vec<Param>,
        body: Vec<Stmt>,
    },
    /// A declared function used as a value
    FuncRef {
        name: String,
        type_args: Vec<Type>,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Struct {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    Field {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// Allocate a heap cell holding the operand
    NewRef(Box<Expr>),
    /// Read through a reference
    Deref(Box<Expr>),
    /// Box a value behind a dynamic type
    Box {
        ty: Type,
        expr: Box<Expr>,
    },
    /// Checked conversion out of a dynamic type
    Unbox {
        ty: Type,
        expr: Box<Expr>,
    },
    /// Dynamic type test
    Is {
        ty: Type,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn nil() -> Self {
        Self::new(ExprKind::Lit(Literal::Nil))
    }

    pub fn bool(b: bool) -> Self {
        Self::new(ExprKind::Lit(Literal::Bool(b)))
    }

    pub fn int(i: i64) -> Self {
        Self::new(ExprKind::Lit(Literal::Int(i)))
    }

    pub fn float(f: f64) -> Self {
        Self::new(ExprKind::Lit(Literal::Float(f)))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::new(ExprKind::Lit(Literal::Str(s.into())))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Var(name.into()))
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Logical {
            op: LogicalOp::And,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Logical {
            op: LogicalOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Call a package function
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::call_generic(name, Vec::new(), args)
    }

    /// Call a generic package function with explicit type arguments
    pub fn call_generic(name: impl Into<String>, type_args: Vec<Type>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            target: CallTarget::Function {
                name: name.into(),
                type_args,
            },
            args,
        })
    }

    pub fn call_native(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            target: CallTarget::Native(name.into()),
            args,
        })
    }

    /// Call a function value
    pub fn call_value(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            target: CallTarget::Value(Box::new(callee)),
            args,
        })
    }

    pub fn yield_(value: Expr) -> Self {
        Self::new(ExprKind::Yield(Box::new(value)))
    }

    pub fn closure(params: Vec<Param>, body: Vec<Stmt>) -> Self {
        Self::new(ExprKind::Closure { params, body })
    }

    pub fn func_ref(name: impl Into<String>, type_args: Vec<Type>) -> Self {
        Self::new(ExprKind::FuncRef {
            name: name.into(),
            type_args,
        })
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::List(items))
    }

    pub fn map(entries: Vec<(Expr, Expr)>) -> Self {
        Self::new(ExprKind::Map(entries))
    }

    pub fn struct_(name: impl Into<String>, fields: Vec<(&str, Expr)>) -> Self {
        Self::new(ExprKind::Struct {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        })
    }

    pub fn field(object: Expr, field: impl Into<String>) -> Self {
        Self::new(ExprKind::Field {
            object: Box::new(object),
            field: field.into(),
        })
    }

    pub fn index(object: Expr, index: Expr) -> Self {
        Self::new(ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    pub fn new_ref(init: Expr) -> Self {
        Self::new(ExprKind::NewRef(Box::new(init)))
    }

    pub fn deref(expr: Expr) -> Self {
        Self::new(ExprKind::Deref(Box::new(expr)))
    }

    pub fn box_(ty: Type, expr: Expr) -> Self {
        Self::new(ExprKind::Box {
            ty,
            expr: Box::new(expr),
        })
    }

    pub fn unbox(ty: Type, expr: Expr) -> Self {
        Self::new(ExprKind::Unbox {
            ty,
            expr: Box::new(expr),
        })
    }

    pub fn is(ty: Type, expr: Expr) -> Self {
        Self::new(ExprKind::Is {
            ty,
            expr: Box::new(expr),
        })
    }
}

// ============================================================================
// Traversal
// ============================================================================

/// AST visitor
///
/// Default methods recurse through [`walk_stmt`], [`walk_expr`] and
/// [`walk_place`]. Overriding `visit_expr` for `ExprKind::Closure` is how a
/// pass decides whether to look inside nested function literals.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_place(&mut self, place: &Place) {
        walk_place(self, place);
    }

    /// Called for every `Type` in `box`/`unbox`/`is` and every explicit type argument
    fn visit_type(&mut self, _ty: &Type) {}
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Let { init, .. } => visitor.visit_expr(init),
        StmtKind::Assign { target, value } => {
            visitor.visit_expr(value);
            visitor.visit_place(target);
        }
        StmtKind::Expr(expr) | StmtKind::Defer(expr) => visitor.visit_expr(expr),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            visitor.visit_expr(cond);
            walk_body(visitor, then_body);
            walk_body(visitor, else_body);
        }
        StmtKind::While { cond, body, .. } => {
            visitor.visit_expr(cond);
            walk_body(visitor, body);
        }
        StmtKind::Loop { body, .. } | StmtKind::Block(body) => walk_body(visitor, body),
        StmtKind::ForRange {
            start, end, body, ..
        } => {
            visitor.visit_expr(start);
            visitor.visit_expr(end);
            walk_body(visitor, body);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Break(_) | StmtKind::Continue(_) => {}
    }
}

pub fn walk_place<V: Visitor + ?Sized>(visitor: &mut V, place: &Place) {
    match place {
        Place::Var(_) => {}
        Place::Field { base, .. } => visitor.visit_place(base),
        Place::Index { base, index } => {
            visitor.visit_place(base);
            visitor.visit_expr(index);
        }
        Place::Deref(expr) => visitor.visit_expr(expr),
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Lit(_) | ExprKind::Var(_) => {}
        ExprKind::Unary { expr, .. }
        | ExprKind::Yield(expr)
        | ExprKind::NewRef(expr)
        | ExprKind::Deref(expr)
        | ExprKind::Field { object: expr, .. } => visitor.visit_expr(expr),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::Call { target, args } => {
            match target {
                CallTarget::Function { type_args, .. } => {
                    for ty in type_args {
                        visitor.visit_type(ty);
                    }
                }
                CallTarget::Value(callee) => visitor.visit_expr(callee),
                CallTarget::Native(_) => {}
            }
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::Closure { body, .. } => walk_body(visitor, body),
        ExprKind::FuncRef { type_args, .. } => {
            for ty in type_args {
                visitor.visit_type(ty);
            }
        }
        ExprKind::List(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        ExprKind::Map(entries) => {
            for (k, v) in entries {
                visitor.visit_expr(k);
                visitor.visit_expr(v);
            }
        }
        ExprKind::Struct { fields, .. } => {
            for (_, value) in fields {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Index { object, index } => {
            visitor.visit_expr(object);
            visitor.visit_expr(index);
        }
        ExprKind::Box { ty, expr } | ExprKind::Unbox { ty, expr } | ExprKind::Is { ty, expr } => {
            visitor.visit_type(ty);
            visitor.visit_expr(expr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VarCollector(Vec<String>);

    impl Visitor for VarCollector {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Var(name) = &expr.kind {
                self.0.push(name.clone());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_walk_follows_evaluation_order() {
        let body = vec![
            Stmt::let_("a", Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("y"))),
            Stmt::assign_to(
                Place::Index {
                    base: Box::new(Place::Var("list".into())),
                    index: Expr::var("i"),
                },
                Expr::var("v"),
            ),
            Stmt::expr(Expr::call_value(Expr::var("f"), vec![Expr::var("arg")])),
        ];
        let mut collector = VarCollector(Vec::new());
        walk_body(&mut collector, &body);
        assert_eq!(collector.0, vec!["x", "y", "v", "i", "f", "arg"]);
    }

    #[test]
    fn test_labeled_only_applies_to_loops() {
        let stmt = Stmt::loop_(vec![]).labeled("outer");
        assert!(matches!(stmt.kind, StmtKind::Loop { label: Some(ref l), .. } if l == "outer"));
        let stmt = Stmt::break_(None).labeled("outer");
        assert_eq!(stmt.kind, StmtKind::Break(None));
    }
}
