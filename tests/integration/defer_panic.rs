mod common;

use common::{compile, compile_with, config, count, declare, ir, sig};
use gocrane::Config;
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::ssa::{Builtin, CallCommon, Callee, Const, ConstValue, FuncId, Operand, PkgId, Program};
use gocrane::types::BasicKind;

/// `func handler() { recover() }`
fn handler(pb: &mut ProgramBuilder, pkg: PkgId) -> FuncId {
    let any = pb.types().interface(vec![]);
    let void = sig(pb, &[], &[]);
    let recover_sig = sig(pb, &[], &[any]);
    let f = declare(pb, pkg, "handler", void);
    let mut body = pb.body(f);
    body.call_builtin(Builtin::Recover, vec![], recover_sig);
    body.ret(vec![]);
    body.finish();
    f
}

fn defer_call(f: FuncId, signature: gocrane::types::TypeId) -> CallCommon {
    CallCommon { callee: Callee::Value(Operand::Function(f)), args: vec![], signature }
}

/// `func safe() (n int) { defer handler(); panic("boom") }` with a recover
/// block returning `n`.
fn recovering_program() -> (Program, PkgId) {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let string = pb.types().basic(BasicKind::String);
    let any = pb.types().interface(vec![]);
    let h = handler(&mut pb, a);
    let void = sig(&mut pb, &[], &[]);
    let s = sig(&mut pb, &[], &[int]);
    let f = declare(&mut pb, a, "safe", s);
    let mut body = pb.body(f);
    let entry = body.block("entry");
    let recover = body.block("recover");
    body.switch_to(entry);
    let n = body.alloc_local(int, "n");
    body.defer(defer_call(h, void));
    let msg = body.make_interface(Operand::Const(Const { ty: string, value: ConstValue::String("boom".into()) }), any);
    body.panic(Operand::Value(msg));
    body.switch_to(recover);
    let v = body.load(Operand::Value(n));
    body.ret(vec![Operand::Value(v)]);
    body.set_recover(recover);
    body.finish();
    (pb.finish(), a)
}

#[test]
fn test_defer_installs_checkpoint() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let h = handler(&mut pb, a);
    let void = sig(&mut pb, &[], &[]);
    let main = declare(&mut pb, a, "main", void);
    let mut body = pb.body(main);
    body.defer(defer_call(h, void));
    body.run_defers();
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let main = obj.function("main").unwrap();
    assert!(main.has_checkpoint);
    assert!(!main.no_inline);
    let text = ir(&obj, "main");
    assert!(text.contains("stack_addr"), "{text}");
    assert!(obj.function("main$thunk0").is_some());
}

#[test]
fn test_recover_block_marks_no_inline() {
    let (program, a) = recovering_program();
    let obj = compile(&program, a);
    let safe = obj.function("safe").unwrap();
    assert!(safe.has_checkpoint);
    assert!(safe.no_inline);
    let text = ir(&obj, "safe");
    // the recover block returns the named result
    assert!(count(&text, "return") >= 2, "{text}");

    let handler = obj.function("handler").unwrap();
    assert!(!handler.has_checkpoint);
    assert!(!handler.no_inline);
}

#[test]
fn test_plain_function_has_no_checkpoint() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let s = sig(&mut pb, &[], &[int]);
    let f = declare(&mut pb, a, "plain", s);
    let mut body = pb.body(f);
    body.ret(vec![Operand::int(int, 3)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let plain = obj.function("plain").unwrap();
    assert!(!plain.has_checkpoint);
    assert!(!plain.no_inline);
    assert!(!ir(&obj, "plain").contains("stack_addr"));
}

#[test]
fn test_panic_without_checkpoint_returns_zero() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let any = pb.types().interface(vec![]);
    let s = sig(&mut pb, &[], &[int]);
    let f = declare(&mut pb, a, "boom", s);
    let mut body = pb.body(f);
    let e = body.make_interface(Operand::int(int, 1), any);
    body.panic(Operand::Value(e));
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "boom");
    assert!(text.contains("jump"), "{text}");
    assert!(text.contains("iconst.i64 0"), "{text}");
    assert!(text.contains("return"), "{text}");
}

#[test]
fn test_nil_checks_follow_runtime_checks() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let ptr = pb.types().pointer(int);
    let s = sig(&mut pb, &[ptr], &[int]);
    let f = declare(&mut pb, a, "deref", s);
    let mut body = pb.body(f);
    let p = body.param("p", ptr);
    let v = body.load(Operand::Value(p));
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let checked = compile(&program, a);
    assert!(ir(&checked, "deref").contains("brif"));

    let config = Config { runtime_checks: false, ..config() };
    let unchecked = compile_with(&program, a, &config);
    let text = ir(&unchecked, "deref");
    assert!(!text.contains("brif"), "{text}");
    assert!(text.contains("load.i64"), "{text}");
}

#[test]
fn test_synthetic_recover_zeroes_result_block() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let string = pb.types().basic(BasicKind::String);
    let any = pb.types().interface(vec![]);
    let h = handler(&mut pb, a);
    let void = sig(&mut pb, &[], &[]);
    // (string, int) is three scalars, so results go through a hidden pointer
    let s = sig(&mut pb, &[], &[string, int]);
    let f = declare(&mut pb, a, "pair", s);
    let mut body = pb.body(f);
    body.defer(defer_call(h, void));
    let e = body.make_interface(Operand::int(int, 1), any);
    body.panic(Operand::Value(e));
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    assert!(obj.function("pair").unwrap().has_checkpoint);
    let text = ir(&obj, "pair");
    let header = text.lines().next().unwrap();
    assert!(!header.contains("->"), "{header}");
    // string data, string length and int, all written through the result pointer v0
    assert!(text.contains(", v0\n"), "{text}");
    assert!(text.contains(", v0+8"), "{text}");
    assert!(text.contains(", v0+16"), "{text}");
}
