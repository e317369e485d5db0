mod common;

use common::{compile, count, declare, ir, sig};
use cranelift_module::Linkage;
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::ssa::{BinaryOp, Builtin, CallCommon, Callee, Const, ConstValue, Operand};
use gocrane::types::BasicKind;

#[test]
fn test_closure_captures_free_variable() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let thunk_sig = sig(&mut pb, &[], &[int]);
    let outer_sig = sig(&mut pb, &[int], &[int]);
    let outer = declare(&mut pb, a, "outer", outer_sig);

    let inner = pb.function(Some(a), "inner", thunk_sig);
    pb.set_enclosing(inner, outer);
    let mut body = pb.body(inner);
    let x = body.free_var("x", int);
    let doubled = body.binop(BinaryOp::Add, Operand::Value(x), Operand::Value(x), int);
    body.ret(vec![Operand::Value(doubled)]);
    body.finish();

    let mut body = pb.body(outer);
    let n = body.param("n", int);
    let fv = body.make_closure(inner, vec![Operand::Value(n)], thunk_sig);
    let v = body.call_value(Operand::Value(fv), vec![], thunk_sig).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let closure = ir(&obj, "outer:inner");
    // __go_get_closure, then the binding load
    assert!(closure.contains("call fn"), "{closure}");
    assert!(closure.contains("load.i64"), "{closure}");
    let text = ir(&obj, "outer");
    assert!(text.contains("func_addr"), "{text}");
    assert!(text.contains("call_indirect"), "{text}");
}

#[test]
fn test_function_operand_called_dynamically() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let unary = sig(&mut pb, &[int], &[int]);
    let inc = declare(&mut pb, a, "inc", unary);
    let mut body = pb.body(inc);
    let x = body.param("x", int);
    let y = body.binop(BinaryOp::Add, Operand::Value(x), Operand::int(int, 1), int);
    body.ret(vec![Operand::Value(y)]);
    body.finish();

    let apply_sig = sig(&mut pb, &[unary, int], &[int]);
    let apply = declare(&mut pb, a, "apply", apply_sig);
    let mut body = pb.body(apply);
    let g = body.param("g", unary);
    let x = body.param("x", int);
    let v = body.call_value(Operand::Value(g), vec![Operand::Value(x)], unary).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    let v = body
        .call_static(apply, vec![Operand::Function(inc), Operand::int(int, 41)], apply_sig)
        .unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "main");
    assert!(text.contains("global_value"), "{text}");
}

#[test]
fn test_go_statement_spawns_thunk() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let worker_sig = sig(&mut pb, &[int], &[]);
    let worker = declare(&mut pb, a, "worker", worker_sig);
    let mut body = pb.body(worker);
    body.param("id", int);
    body.ret(vec![]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    body.go(CallCommon {
        callee: Callee::Value(Operand::Function(worker)),
        args: vec![Operand::int(int, 7)],
        signature: worker_sig,
    });
    body.go(CallCommon {
        callee: Callee::Value(Operand::Function(worker)),
        args: vec![Operand::int(int, 8)],
        signature: worker_sig,
    });
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    for name in ["main$thunk0", "main$thunk1"] {
        let thunk = obj.function(name).unwrap_or_else(|| panic!("{name} missing"));
        assert_eq!(thunk.func, None);
        assert_eq!(thunk.linkage, Linkage::Local);
        assert!(!thunk.has_checkpoint);
        let text = ir(&obj, name);
        assert!(text.contains("call_indirect"), "{text}");
    }
    let text = ir(&obj, "main");
    assert!(count(&text, "func_addr") >= 2, "{text}");
}

#[test]
fn test_deferred_builtin_gets_builtin_thunk() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let string = pb.types().basic(BasicKind::String);
    let print_sig = sig(&mut pb, &[string], &[]);
    let main_sig = sig(&mut pb, &[], &[]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    body.defer(CallCommon {
        callee: Callee::Builtin(Builtin::Println),
        args: vec![Operand::Const(Const { ty: string, value: ConstValue::String("bye".into()) })],
        signature: print_sig,
    });
    body.run_defers();
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let main = obj.function("main").unwrap();
    assert!(main.has_checkpoint);
    let thunk = ir(&obj, "main$thunk0");
    assert!(!thunk.contains("call_indirect"), "{thunk}");
    // print_string and print_nl
    assert!(count(&thunk, "call fn") >= 2, "{thunk}");
}

#[test]
fn test_closure_not_in_members_is_reached() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let s = sig(&mut pb, &[], &[]);
    let main = declare(&mut pb, a, "main", s);
    let anon = pb.function(Some(a), "func1", s);
    pb.set_enclosing(anon, main);
    let mut body = pb.body(anon);
    body.ret(vec![]);
    body.finish();

    let mut body = pb.body(main);
    let fv = body.make_closure(anon, vec![], s);
    body.call_value(Operand::Value(fv), vec![], s);
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    assert!(obj.function("main:func1").is_some());
}

#[test]
fn test_closure_record_reserves_slot_for_code_pointer() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let int32 = pb.types().basic(BasicKind::Int32);
    let thunk_sig = sig(&mut pb, &[], &[int]);
    let outer_sig = sig(&mut pb, &[int32, int], &[thunk_sig]);
    let outer = declare(&mut pb, a, "outer", outer_sig);

    let inner = pb.function(Some(a), "inner", thunk_sig);
    pb.set_enclosing(inner, outer);
    let mut body = pb.body(inner);
    let small = body.free_var("small", int32);
    let big = body.free_var("big", int);
    let wide = body.value(gocrane::ssa::InstrKind::Convert { x: Operand::Value(small) }, int);
    let sum = body.binop(BinaryOp::Add, Operand::Value(wide), Operand::Value(big), int);
    body.ret(vec![Operand::Value(sum)]);
    body.finish();

    let mut body = pb.body(outer);
    let x = body.param("x", int32);
    let y = body.param("y", int);
    let fv = body.make_closure(inner, vec![Operand::Value(x), Operand::Value(y)], thunk_sig);
    body.ret(vec![Operand::Value(fv)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    // code pointer at 0, int32 binding at 8, int binding at 16
    let text = ir(&obj, "outer");
    assert!(text.contains("iconst.i64 24"), "{text}");
    assert!(text.contains("func_addr"), "{text}");
    let closure = ir(&obj, "outer:inner");
    assert!(closure.lines().any(|l| l.contains("load.i32") && l.ends_with("+8")), "{closure}");
    assert!(closure.lines().any(|l| l.contains("load.i64") && l.ends_with("+16")), "{closure}");
    assert!(!closure.lines().any(|l| l.contains("load") && !l.contains('+')), "{closure}");
}
