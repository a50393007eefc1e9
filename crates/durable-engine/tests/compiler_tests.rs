//! Compiler integration tests
//!
//! Checks the registry-facing output of a full compilation: which functions
//! become durable, how keys are derived and that resume points are stable.

mod common;

use common::*;
use durable_engine::compiler::ast::{Expr, FunctionDecl, Program, Span, Stmt};
use durable_engine::compiler::types::Type;
use durable_engine::config::InstantiationRequest;
use durable_engine::{CompileError, Compiler, CompilerOptions};

#[test]
fn test_recompiling_yields_identical_registrations() {
    for program in [squares(), accumulator(), counter(), nested(), emitter(), generics(true), temps()] {
        let first = compile(&program);
        let second = compile(&program);
        assert_eq!(first.registrations(), second.registrations());
    }
}

#[test]
fn test_resume_points_are_numbered_from_one() {
    let compiled = compile(&nested());
    assert_eq!(compiled.resume_points("main.inner"), vec![1, 2]);
    assert_eq!(compiled.resume_points("main.outer"), vec![1, 2]);
}

#[test]
fn test_plain_functions_have_no_resume_points() {
    let compiled = compile(&generics(true));
    let id = compiled.function("main.id[float]").unwrap();
    assert!(!id.is_durable());
    assert!(compiled.resume_points("main.id[float]").is_empty());
}

#[test]
fn test_each_instantiation_gets_its_own_key() {
    let compiled = compile(&generics(true));
    let keys: Vec<&str> = compiled.keys().into_iter().map(|k| k.as_str()).collect();
    assert!(keys.contains(&"main.pair[int]"));
    assert!(keys.contains(&"main.pair[string]"));
    assert!(keys.contains(&"main.id[float]"));
    // Generic declarations themselves are never registered.
    assert!(!keys.contains(&"main.pair"));
    assert!(compiled.function("main.pair[int]").unwrap().is_durable());
}

#[test]
fn test_dropping_a_call_site_drops_its_instantiation() {
    let compiled = compile(&generics(false));
    assert!(compiled.function("main.pair[int]").is_none());
    assert!(compiled.function("main.pair[string]").is_some());
    assert_eq!(compiled.resume_points("main.gen"), vec![1]);
}

#[test]
fn test_closure_keys_follow_the_enclosing_function() {
    let compiled = compile(&emitter());
    let closure = compiled.function("main.emitter.func1").unwrap();
    assert!(closure.is_durable());
    assert_eq!(closure.captures.len(), 1);
    assert_eq!(closure.captures[0].name, "scale");
    assert!(!closure.captures[0].boxed);
    // A dynamic call in a function that can reach a suspending value suspends.
    assert!(compiled.function("main.emitter").unwrap().is_durable());
}

#[test]
fn test_mutated_capture_is_boxed() {
    let compiled = compile(&counter());
    let closure = compiled.function("main.counter.func1").unwrap();
    assert!(!closure.is_durable());
    assert_eq!(closure.captures.len(), 1);
    assert!(closure.captures[0].boxed);
}

#[test]
fn test_boxed_named_types_are_registered() {
    let compiled = compile(&temps());
    let ids: Vec<&str> = compiled.dyn_types.iter().map(|t| t.type_id.as_str()).collect();
    assert_eq!(ids, vec!["main.Celsius"]);
}

#[test]
fn test_defer_in_suspending_function_is_rejected() {
    let program = Program::new("main")
        .with_function(FunctionDecl::new("cleanup", vec![], vec![]))
        .with_function(
            FunctionDecl::new(
                "task",
                vec![],
                vec![
                    Stmt::defer(Expr::call("cleanup", vec![])).at(Span::new(3, 5)),
                    Stmt::expr(Expr::yield_(Expr::int(1))),
                ],
            )
            .at(Span::new(2, 1)),
        );
    match Compiler::default().compile(&program) {
        Err(CompileError::Unsupported { function, construct, span }) => {
            assert_eq!(function, "main.task");
            assert_eq!(construct, "defer");
            assert_eq!(span, Span::new(3, 5));
        }
        other => panic!("expected an unsupported construct, got {other:?}"),
    }
}

#[test]
fn test_defer_in_plain_function_compiles() {
    let program = Program::new("main")
        .with_function(FunctionDecl::new("cleanup", vec![], vec![]))
        .with_function(FunctionDecl::new(
            "plain",
            vec![],
            vec![Stmt::defer(Expr::call("cleanup", vec![])), Stmt::ret(Some(Expr::int(1)))],
        ));
    let compiled = compile(&program);
    assert!(!compiled.function("main.plain").unwrap().is_durable());
}

#[test]
fn test_unknown_callee_is_reported() {
    let program = Program::new("main").with_function(FunctionDecl::new(
        "broken",
        vec![],
        vec![Stmt::expr(Expr::call("missing", vec![]))],
    ));
    assert!(matches!(
        Compiler::default().compile(&program),
        Err(CompileError::UnknownFunction { ref name, .. }) if name == "missing"
    ));
}

#[test]
fn test_requested_instantiations_are_compiled() {
    let mut options = CompilerOptions::default();
    options
        .instantiations
        .push(InstantiationRequest::new("id", vec![Type::Bool]));
    let compiled = Compiler::new(options).compile(&generics(true)).unwrap();
    assert!(compiled.function("main.id[bool]").is_some());
}
