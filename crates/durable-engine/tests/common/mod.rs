//! Shared programs and drivers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use durable_engine::compiler::ast::{BinaryOp, Expr, FunctionDecl, Param, Program, Stmt};
use durable_engine::compiler::types::Type;
use durable_engine::{CompiledProgram, Compiler, Coroutine, TypeRegistry, Value};

/// Route engine logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn compile(program: &Program) -> CompiledProgram {
    init_tracing();
    Compiler::default().compile(program).expect("program compiles")
}

pub fn registry(program: &Program) -> Arc<TypeRegistry> {
    compile(program).registry().expect("registry builds")
}

fn add(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, left, right)
}

fn mul(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Mul, left, right)
}

/// ```text
/// func squares(n int) {
///     for i in 1..n+1 { yield i * i }
/// }
/// ```
pub fn squares() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "squares",
        vec![Param::new("n", Type::Int)],
        vec![Stmt::for_range(
            "i",
            Expr::int(1),
            add(Expr::var("n"), Expr::int(1)),
            vec![Stmt::expr(Expr::yield_(mul(Expr::var("i"), Expr::var("i"))))],
        )],
    ))
}

/// ```text
/// func sum() {
///     total := 0
///     for {
///         x := yield total
///         if x == nil { return total }
///         total = total + x
///     }
/// }
/// ```
pub fn accumulator() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "sum",
        vec![],
        vec![
            Stmt::let_("total", Expr::int(0)),
            Stmt::loop_(vec![
                Stmt::let_("x", Expr::yield_(Expr::var("total"))),
                Stmt::if_(
                    Expr::binary(BinaryOp::Eq, Expr::var("x"), Expr::nil()),
                    vec![Stmt::ret(Some(Expr::var("total")))],
                    vec![],
                ),
                Stmt::assign("total", add(Expr::var("total"), Expr::var("x"))),
            ]),
        ],
    ))
}

/// A closure mutating a captured variable shared with its frame
///
/// ```text
/// func counter(limit int) {
///     n := 0
///     inc := func() { n = n + 1 }
///     for n < limit { inc(); yield n }
///     return n
/// }
/// ```
pub fn counter() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "counter",
        vec![Param::new("limit", Type::Int)],
        vec![
            Stmt::let_("n", Expr::int(0)),
            Stmt::let_(
                "inc",
                Expr::closure(vec![], vec![Stmt::assign("n", add(Expr::var("n"), Expr::int(1)))]),
            ),
            Stmt::while_(
                Expr::binary(BinaryOp::Lt, Expr::var("n"), Expr::var("limit")),
                vec![
                    Stmt::expr(Expr::call_value(Expr::var("inc"), vec![])),
                    Stmt::expr(Expr::yield_(Expr::var("n"))),
                ],
            ),
            Stmt::ret(Some(Expr::var("n"))),
        ],
    ))
}

/// Durable calls nest frames
///
/// ```text
/// func inner(k int) { yield k; yield k * 10; return k + 1 }
/// func outer() { a := inner(1); b := inner(a); return a + b }
/// ```
pub fn nested() -> Program {
    Program::new("main")
        .with_function(FunctionDecl::new(
            "inner",
            vec![Param::new("k", Type::Int)],
            vec![
                Stmt::expr(Expr::yield_(Expr::var("k"))),
                Stmt::expr(Expr::yield_(mul(Expr::var("k"), Expr::int(10)))),
                Stmt::ret(Some(add(Expr::var("k"), Expr::int(1)))),
            ],
        ))
        .with_function(FunctionDecl::new(
            "outer",
            vec![],
            vec![
                Stmt::let_("a", Expr::call("inner", vec![Expr::int(1)])),
                Stmt::let_("b", Expr::call("inner", vec![Expr::var("a")])),
                Stmt::ret(Some(add(Expr::var("a"), Expr::var("b")))),
            ],
        ))
}

/// A suspending closure called through a function value
///
/// ```text
/// func emitter() {
///     scale := 3
///     emit := func(x int) { yield x * scale }
///     for i in 0..3 { emit(i) }
///     return scale
/// }
/// ```
pub fn emitter() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "emitter",
        vec![],
        vec![
            Stmt::let_("scale", Expr::int(3)),
            Stmt::let_(
                "emit",
                Expr::closure(
                    vec![Param::new("x", Type::Int)],
                    vec![Stmt::expr(Expr::yield_(mul(Expr::var("x"), Expr::var("scale"))))],
                ),
            ),
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(3),
                vec![Stmt::expr(Expr::call_value(Expr::var("emit"), vec![Expr::var("i")]))],
            ),
            Stmt::ret(Some(Expr::var("scale"))),
        ],
    ))
}

/// Generic functions instantiated at several shapes
///
/// ```text
/// func pair[T](x T) { yield x; return x }
/// func id[T](x T) { return x }
/// func gen() { a := pair[int](1); b := pair[string]("s"); return id[float](2.5) }
/// ```
pub fn generics(with_int_pair: bool) -> Program {
    let mut body = Vec::new();
    if with_int_pair {
        body.push(Stmt::let_(
            "a",
            Expr::call_generic("pair", vec![Type::Int], vec![Expr::int(1)]),
        ));
    }
    body.push(Stmt::let_(
        "b",
        Expr::call_generic("pair", vec![Type::Str], vec![Expr::str("s")]),
    ));
    body.push(Stmt::ret(Some(Expr::call_generic(
        "id",
        vec![Type::Float],
        vec![Expr::float(2.5)],
    ))));

    Program::new("main")
        .with_function(
            FunctionDecl::new(
                "pair",
                vec![Param::new("x", Type::param("T"))],
                vec![
                    Stmt::expr(Expr::yield_(Expr::var("x"))),
                    Stmt::ret(Some(Expr::var("x"))),
                ],
            )
            .generic(&["T"]),
        )
        .with_function(
            FunctionDecl::new(
                "id",
                vec![Param::new("x", Type::param("T"))],
                vec![Stmt::ret(Some(Expr::var("x")))],
            )
            .generic(&["T"]),
        )
        .with_function(FunctionDecl::new("gen", vec![], body))
}

pub fn celsius() -> Type {
    Type::named("main.Celsius", Type::Float)
}

/// A dynamically typed value held across a yield
///
/// ```text
/// func temps() { c := any(Celsius(21.5)); yield c; return c.(Celsius) }
/// ```
pub fn temps() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "temps",
        vec![],
        vec![
            Stmt::let_("c", Expr::box_(celsius(), Expr::float(21.5))),
            Stmt::expr(Expr::yield_(Expr::var("c"))),
            Stmt::ret(Some(Expr::unbox(celsius(), Expr::var("c")))),
        ],
    ))
}

/// Run to completion answering every yield with `Nil`
pub fn run_plain(co: &mut Coroutine) -> (Vec<Value>, Option<Value>) {
    let mut yielded = Vec::new();
    while co.next().expect("coroutine runs") {
        yielded.push(co.recv().cloned().unwrap_or_default());
    }
    (yielded, co.result().cloned())
}

/// Like [`run_plain`], but marshal and unmarshal after every yield
pub fn run_marshaling(registry: &Arc<TypeRegistry>, mut co: Coroutine) -> (Vec<Value>, Option<Value>) {
    let mut yielded = Vec::new();
    while co.next().expect("coroutine runs") {
        yielded.push(co.recv().cloned().unwrap_or_default());
        let bytes = co.marshal().expect("suspended coroutine marshals");
        co = Coroutine::unmarshal(registry.clone(), &bytes).expect("stream decodes");
    }
    (yielded, co.result().cloned())
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&i| Value::Int(i)).collect()
}
