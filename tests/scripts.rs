// End-to-end scenarios through the public driver API: the full pipeline
// from source text to console output, under both dispatch cores.

use derkjs::vm::DispatchPolicy;
use derkjs::{Driver, DriverInfo, EngineError, VmError};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Console sink the test keeps a handle on after giving it to the driver.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedSink {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn driver_with_sink(policy: DispatchPolicy) -> (Driver, SharedSink) {
    let mut driver = Driver::with_defaults(DriverInfo::default()).expect("engine startup");
    driver.set_dispatch(policy);
    let sink = SharedSink::default();
    driver.set_console_sink(Box::new(sink.clone()));
    (driver, sink)
}

fn run_script(src: &str, policy: DispatchPolicy) -> (Result<(), EngineError>, String) {
    let (mut driver, sink) = driver_with_sink(policy);
    let result = driver.run_source("test.js", src).map(|_| ());
    (result, sink.contents())
}

fn output_of(src: &str, policy: DispatchPolicy) -> String {
    let (result, out) = run_script(src, policy);
    result.expect("script failed");
    out
}

const BOTH: [DispatchPolicy; 2] = [DispatchPolicy::LoopSwitch, DispatchPolicy::Tail];

#[test]
fn arithmetic_and_print() {
    for policy in BOTH {
        assert_eq!(output_of("console.log(1 + 2 * 3);", policy), "7 \n");
    }
}

#[test]
fn prototype_inheritance_via_object_create() {
    let src = r#"
        var p = {greet: function() { return "hi"; }};
        var o = Object.create(p);
        console.log(o.greet());
    "#;
    for policy in BOTH {
        assert_eq!(output_of(src, policy), "hi \n");
    }
}

#[test]
fn array_push_and_join() {
    let src = r#"
        var a = [];
        a.push(1);
        a.push(2);
        console.log(a.join(","));
    "#;
    for policy in BOTH {
        assert_eq!(output_of(src, policy), "1,2 \n");
    }
}

#[test]
fn closures_share_their_upvalue_cell() {
    let src = r#"
        function mk() {
            var n = 0;
            return function() { n += 1; return n; };
        }
        var c = mk();
        console.log(c());
        console.log(c());
    "#;
    for policy in BOTH {
        assert_eq!(output_of(src, policy), "1 \n2 \n");
    }
}

#[test]
fn deep_recursion_under_tail_dispatch() {
    let src = r#"
        function f(n) { if (n === 0) { return "done"; } return f(n - 1); }
        console.log(f(100000));
    "#;
    assert_eq!(output_of(src, DispatchPolicy::Tail), "done \n");
}

#[test]
fn deep_recursion_exhausts_loop_switch_frames() {
    let src = r#"
        function f(n) { if (n === 0) { return "done"; } return f(n - 1); }
        console.log(f(100000));
    "#;
    let (result, _) = run_script(src, DispatchPolicy::LoopSwitch);
    match result {
        Err(EngineError::Vm(VmError::CallDepthExhausted)) => {}
        other => panic!("expected call-depth exhaustion, got {other:?}"),
    }
}

#[test]
fn writing_a_frozen_object_is_a_runtime_error() {
    let src = "var o = {x: 1}; Object.freeze(o); o.x = 2;";
    for policy in BOTH {
        let (result, _) = run_script(src, policy);
        match result {
            Err(EngineError::Vm(VmError::Runtime { msg, .. })) => {
                assert!(msg.contains("frozen"), "unexpected message: {msg}");
            }
            other => panic!("expected frozen-write error, got {other:?}"),
        }
    }
}

#[test]
fn frozen_object_reads_are_unaffected() {
    let src = "var o = {x: 1}; Object.freeze(o); console.log(o.x);";
    assert_eq!(output_of(src, DispatchPolicy::Tail), "1 \n");
}

#[test]
fn prototype_lookup_uses_first_owning_ancestor() {
    let src = r#"
        var grandparent = {tag: "old", kind: "g"};
        var parent = Object.create(grandparent);
        parent.tag = "mid";
        var child = Object.create(parent);
        console.log(child.tag);
        console.log(child.kind);
        console.log(child.missing);
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::LoopSwitch),
        "mid \ng \nundefined \n"
    );
}

#[test]
fn object_keys_preserve_insertion_order() {
    let src = r#"
        var o = {zeta: 1, alpha: 2, mid: 3};
        o.last = 4;
        console.log(Object.keys(o).join(","));
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::Tail),
        "zeta,alpha,mid,last \n"
    );
}

#[test]
fn typeof_reports_value_kinds() {
    let src = r#"
        console.log(typeof undefined);
        console.log(typeof null);
        console.log(typeof true);
        console.log(typeof 1);
        console.log(typeof 1.5);
        console.log(typeof "s");
        console.log(typeof console.log);
        console.log(typeof {});
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::LoopSwitch),
        "undefined \nobject \nboolean \nnumber \nnumber \nstring \nfunction \nobject \n"
    );
}

#[test]
fn equality_rules() {
    let src = r#"
        console.log(1 == 1.0);
        console.log(1 === 1.0);
        console.log(true == 1);
        console.log(null == undefined);
        console.log(null === undefined);
        console.log("a" + "b" === "ab");
        console.log(1 == "1");
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::Tail),
        "true \nfalse \ntrue \ntrue \nfalse \ntrue \nfalse \n"
    );
}

#[test]
fn string_methods_and_length() {
    let src = r#"
        var s = "Hello World";
        console.log(s.length);
        console.log(s.charAt(1));
        console.log(s.indexOf("World"));
        console.log(s.slice(0, 5));
        console.log(s.toUpperCase());
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::LoopSwitch),
        "11 \ne \n6 \nHello \nHELLO WORLD \n"
    );
}

#[test]
fn parse_int_with_and_without_radix() {
    let src = r#"
        console.log(parseInt("42"));
        console.log(parseInt("  -17"));
        console.log(parseInt("ff", 16));
        console.log(parseInt("101", 2));
        console.log(typeof parseInt("nope"));
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::Tail),
        "42 \n-17 \n255 \n5 \nundefined \n"
    );
}

#[test]
fn constructors_and_this() {
    let src = r#"
        function Point(x, y) {
            this.x = x;
            this.y = y;
        }
        Point.prototype.sum = function() { return this.x + this.y; };
        var p = new Point(3, 4);
        console.log(p.sum());
        console.log(p.x);
    "#;
    for policy in BOTH {
        assert_eq!(output_of(src, policy), "7 \n3 \n");
    }
}

#[test]
fn polyfill_runs_before_user_code() {
    let polyfill = include_str!("../scripts/polyfill.js");
    let user = r#"
        var doubled = [1, 2, 3].map(function(x) { return x * 2; });
        console.log(doubled.join("-"));
        console.log("ab".repeat(3));
        console.log("hello".includes("ell"));
    "#;

    let (mut driver, sink) = driver_with_sink(DispatchPolicy::Tail);
    driver
        .run_source("polyfill.js", polyfill)
        .expect("polyfill failed");
    driver.run_source("user.js", user).expect("user failed");
    assert_eq!(sink.contents(), "2-4-6 \nababab \ntrue \n");
}

#[test]
fn compile_errors_reject_the_unit() {
    let (result, _) = run_script("var = 1;", DispatchPolicy::Tail);
    assert!(matches!(result, Err(EngineError::Compile(_))));

    let (result, _) = run_script("missingName();", DispatchPolicy::Tail);
    assert!(matches!(result, Err(EngineError::Compile(_))));
}

#[test]
fn runtime_error_reports_source_line() {
    let src = "var a = 1;\nvar b = a.missing.deep;\n";
    let (result, _) = run_script(src, DispatchPolicy::LoopSwitch);
    match result {
        Err(EngineError::Vm(VmError::Runtime { line, .. })) => assert_eq!(line, 2),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn globals_survive_across_units() {
    let (mut driver, sink) = driver_with_sink(DispatchPolicy::Tail);
    driver
        .run_source("first.js", "var counter = 41;")
        .expect("first unit failed");
    driver
        .run_source("second.js", "counter += 1; console.log(counter);")
        .expect("second unit failed");
    assert_eq!(sink.contents(), "42 \n");
}

#[test]
fn disassembly_mentions_functions_and_constants() {
    let (mut driver, _) = driver_with_sink(DispatchPolicy::Tail);
    driver
        .run_source(
            "dump.js",
            "function inner() { return \"forty-two\"; }\nfunction fortyTwo() { return inner(); }\nconsole.log(fortyTwo());",
        )
        .expect("script failed");

    let dump = driver.dump_program();
    assert!(dump.contains("fortyTwo"));
    assert!(dump.contains("\"forty-two\""));
    assert!(dump.contains("tail_call"));
}

#[test]
fn run_files_exit_status() {
    use std::io::Write as _;

    let dir = tempfile::tempdir().expect("create temp dir");
    let good = dir.path().join("good.js");
    let bad = dir.path().join("bad.js");
    std::fs::File::create(&good)
        .and_then(|mut f| f.write_all(b"console.log(2 + 2);"))
        .expect("write script");
    std::fs::File::create(&bad)
        .and_then(|mut f| f.write_all(b"var o = {}; Object.freeze(o); o.x = 1;"))
        .expect("write script");

    let (mut driver, sink) = driver_with_sink(DispatchPolicy::Tail);
    assert_eq!(driver.run(&good, None), 0);
    assert_eq!(sink.contents(), "4 \n");

    let (mut driver, _) = driver_with_sink(DispatchPolicy::Tail);
    assert_eq!(driver.run(&bad, None), 1);

    let (mut driver, _) = driver_with_sink(DispatchPolicy::Tail);
    assert_eq!(driver.run(dir.path().join("absent.js").as_path(), None), 1);
}

#[test]
fn gc_keeps_reachable_objects_alive_under_pressure() {
    // Builds thousands of temporary strings while keeping one object graph
    // live; the run only completes if collection reclaims the garbage and
    // never touches reachable values.
    let src = r#"
        var keep = {list: []};
        keep.list.push("anchor");
        var i = 0;
        while (i < 20000) {
            var garbage = "tmp" + i;
            i += 1;
        }
        console.log(keep.list.join(","));
        console.log(keep.list.length);
    "#;
    for policy in BOTH {
        assert_eq!(output_of(src, policy), "anchor \n1 \n");
    }
}

#[test]
fn method_calls_on_string_primitives() {
    // Member lookup on a primitive string goes through String.prototype.
    let src = r#"console.log("abc".slice(1).toUpperCase());"#;
    assert_eq!(output_of(src, DispatchPolicy::Tail), "BC \n");
}

#[test]
fn void_and_logical_operators() {
    let src = r#"
        console.log(void 1);
        console.log(true && "yes");
        console.log(false || "fallback");
        console.log(!0);
    "#;
    assert_eq!(
        output_of(src, DispatchPolicy::LoopSwitch),
        "undefined \nyes \nfallback \ntrue \n"
    );
}
