mod common;

use common::{compile, config, count, declare, ir, method_sig, sig, try_compile};
use gocrane::codegen::Unit;
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::ssa::{BinaryOp, InstrKind, Operand, PkgId, Program};
use gocrane::types::{BasicKind, IfaceMethod, TypeId};

struct Fixture {
    pb: ProgramBuilder,
    pkg: PkgId,
    int: TypeId,
    bool_ty: TypeId,
    any: TypeId,
    getter: TypeId,
    get_sig: TypeId,
    ptr_t: TypeId,
}

/// Package `p` with `type T int`, `func (*T) Get() int` and
/// `type Getter interface { Get() int }`.
fn fixture() -> Fixture {
    let mut pb = ProgramBuilder::new();
    let pkg = pb.package("p", "p");
    let int = pb.types().basic(BasicKind::Int);
    let bool_ty = pb.types().basic(BasicKind::Bool);
    let any = pb.types().interface(vec![]);
    let get_sig = sig(&mut pb, &[], &[int]);
    let getter_iface = pb.types().interface(vec![IfaceMethod { name: "Get".into(), sig: get_sig }]);
    let getter = pb.types().named("Getter", Some("p"), getter_iface);
    let t = pb.types().named("T", Some("p"), int);
    let ptr_t = pb.types().pointer(t);

    let method = method_sig(&mut pb, ptr_t, &[], &[int]);
    let get = pb.function(Some(pkg), "Get", method);
    pb.add_method(ptr_t, "Get", get);
    let mut body = pb.body(get);
    let r = body.param("r", ptr_t);
    let v = body.load(Operand::Value(r));
    let n = body.value(InstrKind::ChangeType { x: Operand::Value(v) }, int);
    body.ret(vec![Operand::Value(n)]);
    body.finish();

    Fixture { pb, pkg, int, bool_ty, any, getter, get_sig, ptr_t }
}

fn finish(f: Fixture) -> (Program, PkgId) {
    (f.pb.finish(), f.pkg)
}

#[test]
fn test_boxing_into_empty_interface() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[], &[f.any]);
    let box_it = declare(&mut f.pb, f.pkg, "boxIt", s);
    let mut body = f.pb.body(box_it);
    let i = body.make_interface(Operand::int(f.int, 5), f.any);
    body.ret(vec![Operand::Value(i)]);
    body.finish();
    let (program, pkg) = finish(f);

    let config = config();
    let mut unit = Unit::new(&program, pkg, &config).unwrap();
    unit.translate_package().unwrap();
    assert!(unit.descriptors().descriptor_count() >= 1);
    assert_eq!(unit.descriptors().itab_count(), 0);
    let obj = unit.finish().unwrap();
    let text = ir(&obj, "boxIt");
    assert!(text.contains("global_value"), "{text}");
    assert!(text.contains("store"), "{text}");
}

#[test]
fn test_pointer_receiver_gets_itab() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[f.ptr_t], &[f.getter]);
    let wrap = declare(&mut f.pb, f.pkg, "wrap", s);
    let mut body = f.pb.body(wrap);
    let p = body.param("p", f.ptr_t);
    let i = body.make_interface(Operand::Value(p), f.getter);
    body.ret(vec![Operand::Value(i)]);
    body.finish();
    let (program, pkg) = finish(f);

    let config = config();
    let mut unit = Unit::new(&program, pkg, &config).unwrap();
    unit.translate_package().unwrap();
    assert_eq!(unit.descriptors().itab_count(), 1);
    let obj = unit.finish().unwrap();
    assert!(obj.function("(*p.T).Get").is_some());
    // pointer-shaped values are stored directly
    let text = ir(&obj, "wrap");
    assert!(!text.contains("call fn"), "{text}");
}

#[test]
fn test_invoke_dispatches_through_itab() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[f.getter], &[f.int]);
    let call_get = declare(&mut f.pb, f.pkg, "callGet", s);
    let get_sig = f.get_sig;
    let mut body = f.pb.body(call_get);
    let g = body.param("g", f.getter);
    let v = body.invoke(Operand::Value(g), "Get", vec![], get_sig).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let (program, pkg) = finish(f);

    let obj = compile(&program, pkg);
    let text = ir(&obj, "callGet");
    assert!(text.contains("call_indirect"), "{text}");
    assert!(text.contains("+8"), "{text}");
}

#[test]
fn test_comma_ok_assertion_to_concrete_type() {
    let mut f = fixture();
    let pair = f.pb.types().tuple(vec![f.int, f.bool_ty]);
    let s = sig(&mut f.pb, &[f.any], &[f.int, f.bool_ty]);
    let as_int = declare(&mut f.pb, f.pkg, "asInt", s);
    let int = f.int;
    let bool_ty = f.bool_ty;
    let mut body = f.pb.body(as_int);
    let x = body.param("x", f.any);
    let t = body.value(InstrKind::TypeAssert { x: Operand::Value(x), asserted: int, comma_ok: true }, pair);
    let v = body.extract(t, 0, int);
    let ok = body.extract(t, 1, bool_ty);
    body.ret(vec![Operand::Value(v), Operand::Value(ok)]);
    body.finish();
    let (program, pkg) = finish(f);

    let obj = compile(&program, pkg);
    let text = ir(&obj, "asInt");
    assert!(text.contains("brif"), "{text}");
    assert!(text.contains("load.i64"), "{text}");
}

#[test]
fn test_assertion_to_interface_type() {
    let mut f = fixture();
    let pair = f.pb.types().tuple(vec![f.getter, f.bool_ty]);
    let s = sig(&mut f.pb, &[f.any], &[f.bool_ty]);
    let is_getter = declare(&mut f.pb, f.pkg, "isGetter", s);
    let getter = f.getter;
    let bool_ty = f.bool_ty;
    let mut body = f.pb.body(is_getter);
    let x = body.param("x", f.any);
    let t = body.value(InstrKind::TypeAssert { x: Operand::Value(x), asserted: getter, comma_ok: true }, pair);
    let ok = body.extract(t, 1, bool_ty);
    body.ret(vec![Operand::Value(ok)]);
    body.finish();
    let (program, pkg) = finish(f);

    let obj = compile(&program, pkg);
    let text = ir(&obj, "isGetter");
    assert!(text.contains("icmp_imm ne"), "{text}");
    assert!(text.contains("select"), "{text}");
}

#[test]
fn test_change_interface_to_empty() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[f.getter], &[f.any]);
    let widen = declare(&mut f.pb, f.pkg, "widen", s);
    let any = f.any;
    let mut body = f.pb.body(widen);
    let g = body.param("g", f.getter);
    let e = body.value(InstrKind::ChangeInterface { x: Operand::Value(g) }, any);
    body.ret(vec![Operand::Value(e)]);
    body.finish();
    let (program, pkg) = finish(f);

    let obj = compile(&program, pkg);
    let text = ir(&obj, "widen");
    // the dynamic type is read from a non-nil itab only
    assert!(text.contains("brif"), "{text}");
    assert_eq!(count(&text, "call fn"), 0, "{text}");
}

#[test]
fn test_interface_equality_calls_runtime() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[f.any, f.any], &[f.bool_ty]);
    let eq = declare(&mut f.pb, f.pkg, "eq", s);
    let bool_ty = f.bool_ty;
    let mut body = f.pb.body(eq);
    let a = body.param("a", f.any);
    let b = body.param("b", f.any);
    let r = body.binop(BinaryOp::Eql, Operand::Value(a), Operand::Value(b), bool_ty);
    body.ret(vec![Operand::Value(r)]);
    body.finish();
    let (program, pkg) = finish(f);

    let obj = compile(&program, pkg);
    assert!(ir(&obj, "eq").contains("call fn"));
}

#[test]
fn test_missing_method_is_internal_error() {
    let mut f = fixture();
    let s = sig(&mut f.pb, &[], &[f.getter]);
    let bad = declare(&mut f.pb, f.pkg, "bad", s);
    let mut body = f.pb.body(bad);
    // int has no Get method
    let i = body.make_interface(Operand::int(f.int, 1), f.getter);
    body.ret(vec![Operand::Value(i)]);
    body.finish();
    let (program, pkg) = finish(f);

    let err = try_compile(&program, pkg, &config()).unwrap_err();
    assert!(err.is_internal(), "{err}");
    assert!(err.to_string().contains("Get"), "{err}");
}
