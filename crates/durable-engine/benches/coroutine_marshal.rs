use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use durable_engine::compiler::ast::{BinaryOp, Expr, FunctionDecl, Param, Program, Stmt};
use durable_engine::compiler::types::Type;
use durable_engine::{Compiler, Coroutine, TypeRegistry, Value};

/// `func walk(depth int) { if depth > 0 { walk(depth - 1) } else { yield depth }; yield depth }`
fn recursive_program() -> Program {
    let depth = || Expr::var("depth");
    Program::new("main").with_function(FunctionDecl::new(
        "walk",
        vec![Param::new("depth", Type::Int)],
        vec![
            Stmt::if_(
                Expr::binary(BinaryOp::Gt, depth(), Expr::int(0)),
                vec![Stmt::expr(Expr::call(
                    "walk",
                    vec![Expr::binary(BinaryOp::Sub, depth(), Expr::int(1))],
                ))],
                vec![Stmt::expr(Expr::yield_(depth()))],
            ),
            Stmt::expr(Expr::yield_(depth())),
        ],
    ))
}

/// `func fill(n int) { items := []; for i in 0..n { items = append(items, i) }; yield items }`
fn list_program() -> Program {
    Program::new("main").with_function(FunctionDecl::new(
        "fill",
        vec![Param::new("n", Type::Int)],
        vec![
            Stmt::let_("items", Expr::list(vec![])),
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::var("n"),
                vec![Stmt::assign(
                    "items",
                    Expr::call_native("append", vec![Expr::var("items"), Expr::var("i")]),
                )],
            ),
            Stmt::expr(Expr::yield_(Expr::var("items"))),
        ],
    ))
}

fn registry(program: &Program) -> Arc<TypeRegistry> {
    Compiler::default().compile(program).unwrap().registry().unwrap()
}

fn suspended(registry: &Arc<TypeRegistry>, entry: &str, arg: i64) -> Coroutine {
    let mut co = Coroutine::start(registry.clone(), entry, vec![Value::Int(arg)]).unwrap();
    co.next().unwrap();
    co
}

fn bench_compile(c: &mut Criterion) {
    let program = recursive_program();
    c.bench_function("compile_recursive", |b| {
        b.iter(|| Compiler::default().compile(black_box(&program)).unwrap());
    });
}

fn bench_frame_depth(c: &mut Criterion) {
    let registry = registry(&recursive_program());
    let mut group = c.benchmark_group("frames");

    for depth in [1, 16, 128] {
        let co = suspended(&registry, "main.walk", depth);
        let bytes = co.marshal().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("marshal", depth), &co, |b, co| {
            b.iter(|| black_box(co).marshal().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("unmarshal", depth), &bytes, |b, bytes| {
            b.iter(|| Coroutine::unmarshal(registry.clone(), black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

fn bench_payload(c: &mut Criterion) {
    let registry = registry(&list_program());
    let mut group = c.benchmark_group("payload");

    for len in [10, 1_000] {
        let co = suspended(&registry, "main.fill", len);
        let bytes = co.marshal().unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("roundtrip", len), &bytes, |b, bytes| {
            b.iter(|| {
                let co = Coroutine::unmarshal(registry.clone(), black_box(bytes)).unwrap();
                co.marshal().unwrap()
            });
        });
    }

    group.finish();
}

fn bench_resume(c: &mut Criterion) {
    let registry = registry(&recursive_program());
    c.bench_function("run_walk_32", |b| {
        b.iter(|| {
            let mut co = Coroutine::start(registry.clone(), "main.walk", vec![Value::Int(32)]).unwrap();
            let mut count = 0;
            while co.next().unwrap() {
                count += 1;
            }
            black_box(count)
        });
    });
}

criterion_group!(benches, bench_compile, bench_frame_depth, bench_payload, bench_resume);
criterion_main!(benches);
