mod common;

use common::{compile, compile_with, config, declare, method_sig, sig};
use cranelift_module::Linkage;
use gocrane::codegen::Unit;
use gocrane::ssa::Operand;
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::types::BasicKind;

#[test]
fn test_foreign_function_stays_declared() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("example.com/a", "a");
    let b = pb.package("example.com/b", "b");
    let int = pb.types().basic(BasicKind::Int);
    let helper_sig = sig(&mut pb, &[], &[int]);
    let helper = declare(&mut pb, b, "helper", helper_sig);
    let mut body = pb.body(helper);
    body.ret(vec![Operand::int(int, 1)]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    let v = body.call_static(helper, vec![], helper_sig).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    unit.translate_package().unwrap();
    assert!(unit.resolver().is_defined(main));
    assert!(!unit.resolver().is_defined(helper));
    assert!(!unit.resolver().is_undefined(helper));
    assert!(unit.resolver().function(helper).is_some());

    let obj = unit.finish().unwrap();
    assert!(obj.function("main").is_some());
    assert!(obj.function("helper").is_none());
    assert!(!obj.object.is_empty());
}

#[test]
fn test_resolve_function_is_idempotent() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let s = sig(&mut pb, &[], &[]);
    let f = declare(&mut pb, a, "f", s);
    let mut body = pb.body(f);
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    let first = unit.resolve_function(f).unwrap();
    let second = unit.resolve_function(f).unwrap();
    assert_eq!(first, second);
    assert!(unit.resolver().is_undefined(f));

    unit.translate_package().unwrap();
    assert!(unit.resolver().is_defined(f));
    assert_eq!(unit.resolver().undefined().count(), 0);
}

#[test]
fn test_callee_in_same_package_defined_once() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let leaf_sig = sig(&mut pb, &[int], &[int]);
    let leaf = declare(&mut pb, a, "leaf", leaf_sig);
    let mut body = pb.body(leaf);
    let x = body.param("x", int);
    body.ret(vec![Operand::Value(x)]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    let first = body.call_static(leaf, vec![Operand::int(int, 1)], leaf_sig).unwrap();
    let second = body.call_static(leaf, vec![Operand::Value(first)], leaf_sig).unwrap();
    body.ret(vec![Operand::Value(second)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    assert_eq!(obj.functions.iter().filter(|f| f.name == "leaf").count(), 1);
    assert!(common::count(&common::ir(&obj, "main"), "call fn") >= 2);
}

#[test]
fn test_ordered_compilation_sorts_by_name() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let s = sig(&mut pb, &[], &[]);
    for name in ["zeta", "alpha", "mid"] {
        let f = declare(&mut pb, a, name, s);
        let mut body = pb.body(f);
        body.ret(vec![]);
        body.finish();
    }
    let program = pb.finish();

    let config = gocrane::Config { ordered_compilation: true, ..config() };
    let obj = compile_with(&program, a, &config);
    let names: Vec<&str> = obj.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["alpha", "mid", "zeta"]);
}

#[test]
fn test_globals_get_storage() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let counter = pb.global(a, "counter", int);
    let s = sig(&mut pb, &[], &[int]);
    let f = declare(&mut pb, a, "bump", s);
    let mut body = pb.body(f);
    let old = body.load(Operand::Global(counter));
    let new = body.binop(gocrane::ssa::BinaryOp::Add, Operand::Value(old), Operand::int(int, 1), int);
    body.store(Operand::Global(counter), Operand::Value(new));
    body.ret(vec![Operand::Value(old)]);
    body.finish();
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    unit.translate_package().unwrap();
    assert!(unit.resolver().global(counter).is_some());
    unit.finish().unwrap();
}

#[test]
fn test_function_value_uses_descriptor() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let target_sig = sig(&mut pb, &[], &[]);
    let target = declare(&mut pb, a, "target", target_sig);
    let mut body = pb.body(target);
    body.ret(vec![]);
    body.finish();

    let s = sig(&mut pb, &[], &[target_sig]);
    let f = declare(&mut pb, a, "get", s);
    let mut body = pb.body(f);
    body.ret(vec![Operand::Function(target)]);
    body.finish();
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    unit.translate_package().unwrap();
    assert!(unit.resolver().descriptor(target).is_some());
    assert_eq!(unit.resolver().descriptor_count(), 1);
}

#[test]
fn test_method_names_and_linkage() {
    let mut pb = ProgramBuilder::new();
    let p = pb.package("p", "p");
    let int = pb.types().basic(BasicKind::Int);
    let t = pb.types().named("T", Some("p"), int);
    let get_sig = method_sig(&mut pb, t, &[], &[int]);
    let get = pb.function(Some(p), "Get", get_sig);
    pb.add_method(t, "Get", get);
    let mut body = pb.body(get);
    let r = body.param("r", t);
    let v = body.value(gocrane::ssa::InstrKind::ChangeType { x: Operand::Value(r) }, int);
    body.ret(vec![Operand::Value(v)]);
    body.finish();

    let wrap_sig = sig(&mut pb, &[], &[]);
    let wrapper = pb.function(None, "init$wrapper", wrap_sig);
    let mut body = pb.body(wrapper);
    body.ret(vec![]);
    body.finish();
    let main = declare(&mut pb, p, "main", wrap_sig);
    let mut body = pb.body(main);
    body.call_static(wrapper, vec![], wrap_sig);
    body.ret(vec![]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, p);
    let method = obj.function("(p.T).Get").expect("method defined under its receiver name");
    assert_eq!(method.linkage, Linkage::Export);
    assert_eq!(obj.function("main").unwrap().linkage, Linkage::Export);
    assert_eq!(obj.function("init$wrapper").unwrap().linkage, Linkage::Local);
}

#[test]
fn test_global_shared_by_two_functions_has_one_handle() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("example.com/a", "a");
    let b = pb.package("example.com/b", "b");
    let int = pb.types().basic(BasicKind::Int);
    let limit = pb.global(b, "limit", int);
    let s = sig(&mut pb, &[], &[int]);
    for name in ["first", "second"] {
        let f = declare(&mut pb, a, name, s);
        let mut body = pb.body(f);
        let v = body.load(Operand::Global(limit));
        body.ret(vec![Operand::Value(v)]);
        body.finish();
    }
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    unit.translate_package().unwrap();
    let id = unit.resolver().global(limit).expect("foreign global declared on use");
    assert_eq!(unit.resolve_global(limit).unwrap(), id);
    let obj = unit.finish().unwrap();
    assert!(common::ir(&obj, "first").contains("global_value"));
    assert!(common::ir(&obj, "second").contains("global_value"));
}

#[test]
fn test_descriptor_requested_twice_is_cached() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let target_sig = sig(&mut pb, &[], &[]);
    let target = declare(&mut pb, a, "target", target_sig);
    let mut body = pb.body(target);
    body.ret(vec![]);
    body.finish();

    let s = sig(&mut pb, &[], &[target_sig]);
    for name in ["get1", "get2"] {
        let f = declare(&mut pb, a, name, s);
        let mut body = pb.body(f);
        body.ret(vec![Operand::Function(target)]);
        body.finish();
    }
    let program = pb.finish();

    let config = config();
    let mut unit = Unit::new(&program, a, &config).unwrap();
    unit.translate_package().unwrap();
    assert_eq!(unit.resolver().descriptor_count(), 1);
    let id = unit.resolver().descriptor(target).unwrap();
    assert_eq!(unit.resolve_function_descriptor(target).unwrap(), id);
    assert_eq!(unit.resolver().descriptor_count(), 1);
    unit.finish().unwrap();
}
