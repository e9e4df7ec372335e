//! Integration tests for single contexts

use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tether_runtime::{Context, HostFunction, Raw, TetherError, Variadic, runtime};

#[test]
fn test_eval_basic() {
    let cx = Context::new().unwrap();

    let sum: i32 = cx.eval("1 + 1").unwrap();
    assert_eq!(sum, 2);

    let hello: String = cx.eval("'h' + 'ello'").unwrap();
    assert_eq!(hello, "hello");

    let object: Value = cx.eval("({ a: [1, 2], b: 'x' })").unwrap();
    assert_eq!(object, json!({ "a": [1, 2], "b": "x" }));
}

#[test]
fn test_eval_undefined_is_null() {
    let cx = Context::new().unwrap();

    let nothing: Option<i32> = cx.eval("undefined").unwrap();
    assert_eq!(nothing, None);

    let nothing: Value = cx.eval("(function () {})").unwrap();
    assert_eq!(nothing, Value::Null);
}

#[test]
fn test_eval_raw_passthrough() {
    let cx = Context::new().unwrap();

    let raw: Raw = cx.eval("({ b: 1, a: [true, null] })").unwrap();
    assert_eq!(raw.as_str(), r#"{"b":1,"a":[true,null]}"#);
}

#[test]
fn test_eval_type_mismatch() {
    let cx = Context::new().unwrap();

    let err = cx.eval::<i32>("'not a number'").unwrap_err();
    assert!(matches!(err, TetherError::Json(_)));
}

#[test]
fn test_state_persists_between_calls() {
    let cx = Context::new().unwrap();

    cx.exec("var counter = 40;").unwrap();
    cx.exec("counter += 2;").unwrap();
    assert_eq!(cx.eval::<i32>("counter").unwrap(), 42);
}

#[test]
fn test_contexts_are_isolated() {
    let a = Context::new().unwrap();
    let b = Context::new().unwrap();

    a.exec("var only_in_a = 1;").unwrap();
    assert_eq!(b.eval::<String>("typeof only_in_a").unwrap(), "undefined");
}

#[test]
fn test_exec_error_report() {
    let cx = Context::new().unwrap();

    let err = cx.exec("throw new Error('ERROR1')").unwrap_err();
    let report = err.report().expect("script error");
    assert_eq!(report.filename, "exec");
    assert_eq!(report.message, "Error: ERROR1");
    assert!(err.to_string().starts_with("exec:"));
    assert!(err.to_string().ends_with(" Error: ERROR1"));
}

#[test]
fn test_eval_error_report() {
    let cx = Context::new().unwrap();

    let err = cx.eval::<Value>("null.property").unwrap_err();
    let report = err.report().expect("script error");
    assert_eq!(report.filename, "eval");
    assert!(report.message.starts_with("TypeError"));
}

#[test]
fn test_thrown_non_error_value() {
    let cx = Context::new().unwrap();

    let err = cx.exec("throw 'plain string'").unwrap_err();
    assert_eq!(err.report().unwrap().message, "plain string");
}

#[test]
fn test_syntax_error_report() {
    let cx = Context::new().unwrap();

    let err = cx.exec("var = ;").unwrap_err();
    assert!(err.report().unwrap().message.starts_with("SyntaxError"));
}

#[test]
fn test_report_is_claimed_once() {
    let cx = Context::new().unwrap();

    assert!(cx.exec("throw new Error('first')").is_err());
    cx.exec("1").unwrap();
    let err = cx.exec("throw new Error('second')").unwrap_err();
    assert_eq!(err.report().unwrap().message, "Error: second");
}

#[test]
fn test_exec_file_labels_with_path() {
    let cx = Context::new().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "var fromFile = 'loaded';").unwrap();
    writeln!(file, "throw new Error('in file');").unwrap();

    let err = cx.exec_file(file.path()).unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.filename, file.path().display().to_string());
    assert_eq!(report.message, "Error: in file");
    assert_eq!(cx.eval::<String>("fromFile").unwrap(), "loaded");
}

#[test]
fn test_exec_file_missing() {
    let cx = Context::new().unwrap();

    let err = cx.exec_file("/definitely/not/here.js").unwrap_err();
    assert!(matches!(err, TetherError::Io(_)));
}

#[test]
fn test_exec_from_reader() {
    let cx = Context::new().unwrap();

    cx.exec_from("var fromReader = 7;".as_bytes()).unwrap();
    assert_eq!(cx.eval::<i32>("fromReader").unwrap(), 7);

    let err = cx.exec_from("throw new Error('r')".as_bytes()).unwrap_err();
    assert_eq!(err.report().unwrap().filename, "reader");
}

#[test]
fn test_host_function() {
    let cx = Context::new().unwrap();
    cx.define_function("add", |a: i64, b: i64| a + b).unwrap();

    assert_eq!(cx.eval::<i64>("add(1, 2)").unwrap(), 3);
    assert_eq!(cx.eval::<String>("add.name").unwrap(), "add");
}

#[test]
fn test_host_function_argument_count() {
    let cx = Context::new().unwrap();
    cx.define_function("add", |a: i64, b: i64| a + b).unwrap();

    let err = cx.exec("add(1)").unwrap_err();
    assert_eq!(
        err.report().unwrap().message,
        "Error: Invalid number of arguments: expected 2 got 1"
    );
}

#[test]
fn test_host_function_argument_type() {
    let cx = Context::new().unwrap();
    cx.define_function("not", |b: bool| !b).unwrap();

    assert!(cx.eval::<bool>("not(false)").unwrap());
    let err = cx.exec("not('yes')").unwrap_err();
    assert_eq!(err.report().unwrap().message, "Error: cannot cast string to bool");
}

#[test]
fn test_host_function_argument_out_of_range() {
    let cx = Context::new().unwrap();
    cx.define_function("id", |n: i64| n).unwrap();

    assert_eq!(cx.eval::<i64>("id(-7.5)").unwrap(), -7);
    for huge in ["1e300", "-1e300", "Number.MAX_VALUE"] {
        let err = cx.exec(&format!("id({huge})")).unwrap_err();
        assert_eq!(err.report().unwrap().message, "Error: cannot cast number to int");
    }
}

#[test]
fn test_host_error_reports_calling_line() {
    let cx = Context::new().unwrap();
    cx.define_function("add", |a: i64, b: i64| a + b).unwrap();
    cx.define_function("not", |b: bool| !b).unwrap();

    let err = cx.exec("var x = 1;\n\nadd(1);").unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.filename, "exec");
    assert_eq!(report.line, 3);

    let err = cx.eval::<Value>("1;\nnot('yes')").unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.filename, "eval");
    assert_eq!(report.line, 2);
}

#[test]
fn test_thrown_error_line() {
    let cx = Context::new().unwrap();

    let err = cx.exec("var a = 1;\nthrow new Error('two');").unwrap_err();
    assert_eq!(err.report().unwrap().line, 2);
}

#[test]
fn test_stack_names_evaluation_label() {
    let cx = Context::new().unwrap();

    let stack: String = cx.eval("\n(new Error('here')).stack").unwrap();
    assert!(stack.contains("eval:2"), "{stack}");
    assert!(!stack.contains("eval_script"), "{stack}");
}

#[test]
fn test_host_function_unit_returns_undefined() {
    let cx = Context::new().unwrap();
    cx.define_function("noop", || {}).unwrap();

    assert_eq!(cx.eval::<String>("typeof noop()").unwrap(), "undefined");
}

#[test]
fn test_host_function_raw_return() {
    let cx = Context::new().unwrap();
    cx.define_function("settings", || Raw::new(r#"{"debug": true, "level": 3}"#).unwrap())
        .unwrap();

    assert!(cx.eval::<bool>("settings().debug").unwrap());
    assert_eq!(cx.eval::<i32>("settings().level").unwrap(), 3);
}

#[test]
fn test_host_function_panic_becomes_exception() {
    let cx = Context::new().unwrap();
    cx.define_function("raise", || -> bool { panic!("BANG") })
        .unwrap();

    let err = cx.exec("raise()").unwrap_err();
    assert_eq!(err.report().unwrap().message, "Error: raise: BANG");

    let err = cx.exec("// first\nraise();").unwrap_err();
    assert_eq!(err.report().unwrap().line, 2);

    let caught: String = cx
        .eval("try { raise(); 'no' } catch (e) { e.message }")
        .unwrap();
    assert_eq!(caught, "raise: BANG");

    // The owning thread survives the panic.
    assert_eq!(cx.eval::<i32>("1 + 1").unwrap(), 2);
}

#[test]
fn test_fallible_host_function() {
    let cx = Context::new().unwrap();
    cx.define_function("parse", HostFunction::fallible(|s: String| s.parse::<i64>()))
        .unwrap();

    assert_eq!(cx.eval::<i64>("parse('12')").unwrap(), 12);
    let err = cx.exec("parse('twelve')").unwrap_err();
    assert_eq!(
        err.report().unwrap().message,
        "Error: parse: invalid digit found in string"
    );
}

#[test]
fn test_variadic_host_function() {
    let cx = Context::new().unwrap();
    cx.define_function("sprintf", |format: String, args: Variadic<Value>| {
        args.iter().fold(format, |out, arg| {
            let text = match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.replacen("%v", &text, 1)
        })
    })
    .unwrap();

    assert_eq!(cx.eval::<String>("sprintf('plain')").unwrap(), "plain");
    assert_eq!(
        cx.eval::<String>("sprintf('%v is %v years', 'Ada', 36)").unwrap(),
        "Ada is 36 years"
    );
    assert!(cx.exec("sprintf()").is_err());
}

#[test]
fn test_nested_objects() {
    let cx = Context::new().unwrap();
    let parent = cx.define_object("parent", None).unwrap();
    let child = parent.define_object("child", None).unwrap();
    child
        .define_function("greet", |name: String| format!("hello {name}"))
        .unwrap();

    assert_eq!(
        cx.eval::<String>("parent.child.greet('world')").unwrap(),
        "hello world"
    );
    assert_eq!(cx.eval::<String>("typeof parent.child").unwrap(), "object");
}

#[test]
fn test_method_called_with_apply() {
    let cx = Context::new().unwrap();
    let math = cx.define_object("math", None).unwrap();
    math.define_function("add", |a: f64, b: f64| a + b).unwrap();

    assert_eq!(cx.eval::<f64>("math.add.apply(math, [1, 2])").unwrap(), 3.0);
}

#[test]
fn test_define_function_from_host_function() {
    let cx = Context::new().unwrap();
    let handle = cx.handle();
    cx.define_function("mkfun", move || {
        handle.define_function("dynamic", || true).is_ok()
    })
    .unwrap();

    assert!(cx.eval::<bool>("mkfun() && dynamic()").unwrap());
}

#[test]
fn test_eval_from_host_function() {
    let cx = Context::new().unwrap();
    let handle = cx.handle();
    cx.exec("var secret = 41;").unwrap();
    cx.define_function("peek", move || handle.eval::<i32>("secret + 1").unwrap_or(-1))
        .unwrap();

    assert_eq!(cx.eval::<i32>("peek()").unwrap(), 42);
}

#[test]
fn test_inline_failure_reports_to_inner_call() {
    let cx = Context::new().unwrap();
    let handle = cx.handle();
    cx.define_function("inner", move || {
        handle
            .exec("throw new Error('inner')")
            .map_err(|err| err.report().map(|r| r.message.clone()))
            .err()
            .flatten()
    })
    .unwrap();

    assert_eq!(
        cx.eval::<Option<String>>("inner()").unwrap().as_deref(),
        Some("Error: inner")
    );
}

#[test]
fn test_concurrent_evals_are_serialized() {
    let cx = Context::new().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&counter);
    cx.define_function("next", move || {
        let seen = shared.load(Ordering::Relaxed);
        thread::yield_now();
        shared.store(seen + 1, Ordering::Relaxed);
        seen + 1
    })
    .unwrap();

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let handle = cx.handle();
            thread::spawn(move || handle.eval::<usize>("next()").unwrap())
        })
        .collect();

    let mut values: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, (1..=100).collect::<Vec<_>>());
    assert_eq!(counter.load(Ordering::Relaxed), 100);
}

#[test]
fn test_promise_jobs_run_after_exec() {
    let cx = Context::new().unwrap();

    cx.exec("var settled = 0; Promise.resolve(5).then(v => { settled = v; });")
        .unwrap();
    assert_eq!(cx.eval::<i32>("settled").unwrap(), 5);
}

#[test]
fn test_destroy_is_idempotent() {
    let cx = Context::new().unwrap();
    let id = cx.id();
    let handle = cx.handle();

    cx.destroy();
    cx.destroy();
    handle.destroy();

    assert!(!runtime::is_registered(id));
    assert!(matches!(cx.exec("1"), Err(TetherError::DestroyedContext)));
    assert!(matches!(
        handle.eval::<i32>("1"),
        Err(TetherError::DestroyedContext)
    ));
    assert!(matches!(
        handle.define_function("f", || 1),
        Err(TetherError::DestroyedContext)
    ));
}

#[test]
fn test_destroy_from_host_function() {
    let cx = Context::new().unwrap();
    let handle = cx.handle();
    cx.define_function("selfDestruct", move || handle.destroy())
        .unwrap();

    cx.exec("selfDestruct()").unwrap();
    assert!(!cx.is_valid());
    assert!(cx.exec("1").is_err());
}
