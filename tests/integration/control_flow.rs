mod common;

use common::{compile, compile_with, config, count, declare, ir, sig};
use gocrane::Config;
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::ssa::{BinaryOp, Operand};
use gocrane::types::BasicKind;

#[test]
fn test_add_two_ints() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let s = sig(&mut pb, &[int, int], &[int]);
    let f = declare(&mut pb, a, "add", s);
    let mut body = pb.body(f);
    let x = body.param("x", int);
    let y = body.param("y", int);
    let sum = body.binop(BinaryOp::Add, Operand::Value(x), Operand::Value(y), int);
    body.ret(vec![Operand::Value(sum)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "add");
    assert!(text.contains("iadd"), "{text}");
    assert!(text.contains("return"), "{text}");
}

#[test]
fn test_branch_merges_through_phi() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let bool_ty = pb.types().basic(BasicKind::Bool);
    let s = sig(&mut pb, &[int, int], &[int]);
    let f = declare(&mut pb, a, "max", s);
    let mut body = pb.body(f);
    let x = body.param("x", int);
    let y = body.param("y", int);
    let entry = body.block("entry");
    let then = body.block("if.then");
    let done = body.block("if.done");
    body.switch_to(entry);
    let gt = body.binop(BinaryOp::Gtr, Operand::Value(x), Operand::Value(y), bool_ty);
    body.if_(Operand::Value(gt), then, done);
    body.switch_to(then);
    body.jump(done);
    body.switch_to(done);
    let m = body.phi(int, vec![Operand::Value(y), Operand::Value(x)]);
    body.ret(vec![Operand::Value(m)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "max");
    // x and y are v0 and v1 in the entry block; block2 is if.done
    assert!(text.contains("v2 = icmp.i64 sgt v0, v1"), "{text}");
    assert_eq!(count(&text, "brif"), 1, "{text}");
    assert!(text.contains("brif v2, block1, block2(v1)"), "{text}");
    assert!(text.contains("jump block2(v0)"), "{text}");
}

#[test]
fn test_loop_with_back_edge_phis() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let bool_ty = pb.types().basic(BasicKind::Bool);
    let s = sig(&mut pb, &[int], &[int]);
    let f = declare(&mut pb, a, "sum", s);
    let mut body = pb.body(f);
    let n = body.param("n", int);
    let entry = body.block("entry");
    let head = body.block("for.loop");
    let step = body.block("for.body");
    let done = body.block("for.done");
    body.switch_to(entry);
    body.jump(head);

    body.switch_to(head);
    let i = body.phi(int, vec![Operand::int(int, 0)]);
    let acc = body.phi(int, vec![Operand::int(int, 0)]);
    let more = body.binop(BinaryOp::Lss, Operand::Value(i), Operand::Value(n), bool_ty);
    body.if_(Operand::Value(more), step, done);

    body.switch_to(step);
    let acc2 = body.binop(BinaryOp::Add, Operand::Value(acc), Operand::Value(i), int);
    let i2 = body.binop(BinaryOp::Add, Operand::Value(i), Operand::int(int, 1), int);
    body.jump(head);
    body.set_phi_edges(i, vec![Operand::int(int, 0), Operand::Value(i2)]);
    body.set_phi_edges(acc, vec![Operand::int(int, 0), Operand::Value(acc2)]);

    body.switch_to(done);
    body.ret(vec![Operand::Value(acc)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "sum");
    assert!(count(&text, "iadd") >= 2, "{text}");
    assert!(text.contains("icmp slt"), "{text}");
}

fn division_program(kind: BasicKind, op: BinaryOp) -> (gocrane::ssa::Program, gocrane::ssa::PkgId) {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let t = pb.types().basic(kind);
    let s = sig(&mut pb, &[t, t], &[t]);
    let f = declare(&mut pb, a, "div", s);
    let mut body = pb.body(f);
    let x = body.param("x", t);
    let y = body.param("y", t);
    let q = body.binop(op, Operand::Value(x), Operand::Value(y), t);
    body.ret(vec![Operand::Value(q)]);
    body.finish();
    (pb.finish(), a)
}

#[test]
fn test_signed_division_handles_minus_one() {
    let (program, a) = division_program(BasicKind::Int64, BinaryOp::Quo);
    let obj = compile(&program, a);
    let text = ir(&obj, "div");
    assert!(text.contains("sdiv"), "{text}");
    assert!(text.contains("select"), "{text}");
    assert!(text.contains("ineg"), "{text}");
}

#[test]
fn test_division_by_zero_guard_follows_runtime_checks() {
    let (program, a) = division_program(BasicKind::Uint32, BinaryOp::Rem);
    let checked = compile(&program, a);
    let text = ir(&checked, "div");
    assert!(text.contains("urem"), "{text}");
    assert!(text.contains("brif"), "{text}");

    let config = Config { runtime_checks: false, ..config() };
    let unchecked = compile_with(&program, a, &config);
    let text = ir(&unchecked, "div");
    assert!(text.contains("urem"), "{text}");
    assert!(!text.contains("brif"), "{text}");
}

#[test]
fn test_oversized_shifts_are_masked() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int32);
    let uint = pb.types().basic(BasicKind::Uint);
    let s = sig(&mut pb, &[int, uint], &[int, int]);
    let f = declare(&mut pb, a, "shifts", s);
    let mut body = pb.body(f);
    let x = body.param("x", int);
    let n = body.param("n", uint);
    let l = body.binop(BinaryOp::Shl, Operand::Value(x), Operand::Value(n), int);
    let r = body.binop(BinaryOp::Shr, Operand::Value(x), Operand::Value(n), int);
    body.ret(vec![Operand::Value(l), Operand::Value(r)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "shifts");
    assert!(text.contains("ishl"), "{text}");
    assert!(text.contains("sshr"), "{text}");
    assert!(count(&text, "select") >= 2, "{text}");
    assert!(text.contains("ireduce"), "{text}");
}

#[test]
fn test_negative_signed_shift_count_panics() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let uint = pb.types().basic(BasicKind::Uint);
    let s = sig(&mut pb, &[int, int, uint], &[int, int]);
    let f = declare(&mut pb, a, "shifts", s);
    let mut body = pb.body(f);
    let x = body.param("x", int);
    let n = body.param("n", int);
    let u = body.param("u", uint);
    let signed = body.binop(BinaryOp::Shl, Operand::Value(x), Operand::Value(n), int);
    let unsigned = body.binop(BinaryOp::Shr, Operand::Value(x), Operand::Value(u), int);
    body.ret(vec![Operand::Value(signed), Operand::Value(unsigned)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "shifts");
    let negative_tests = |text: &str| text.lines().filter(|l| l.contains("icmp_imm") && l.contains(" slt ")).count();
    // only the int count is tested
    assert_eq!(negative_tests(&text), 1, "{text}");
    assert_eq!(count(&text, "brif"), 1, "{text}");

    let config = Config { runtime_checks: false, ..config() };
    let unchecked = compile_with(&program, a, &config);
    let text = ir(&unchecked, "shifts");
    assert_eq!(negative_tests(&text), 0, "{text}");
    assert!(!text.contains("brif"), "{text}");
}

#[test]
fn test_unreachable_block_is_skipped() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let s = sig(&mut pb, &[], &[int]);
    let f = declare(&mut pb, a, "early", s);
    let mut body = pb.body(f);
    let entry = body.block("entry");
    let dead = body.block("dead");
    body.switch_to(entry);
    body.ret(vec![Operand::int(int, 1)]);
    body.switch_to(dead);
    let bogus = body.binop(BinaryOp::Mul, Operand::int(int, 6), Operand::int(int, 7), int);
    body.ret(vec![Operand::Value(bogus)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "early");
    assert!(!text.contains("imul"), "{text}");
}

#[test]
fn test_float_arithmetic_and_conversion() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let f64_ty = pb.types().basic(BasicKind::Float64);
    let s = sig(&mut pb, &[int, f64_ty], &[f64_ty]);
    let f = declare(&mut pb, a, "scale", s);
    let mut body = pb.body(f);
    let n = body.param("n", int);
    let k = body.param("k", f64_ty);
    let nf = body.value(gocrane::ssa::InstrKind::Convert { x: Operand::Value(n) }, f64_ty);
    let prod = body.binop(BinaryOp::Mul, Operand::Value(nf), Operand::Value(k), f64_ty);
    body.ret(vec![Operand::Value(prod)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "scale");
    assert!(text.contains("fcvt_from_sint"), "{text}");
    assert!(text.contains("fmul"), "{text}");
}

#[test]
fn test_debug_locals_recorded() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let s = sig(&mut pb, &[int], &[int]);
    let f = declare(&mut pb, a, "local", s);
    let mut body = pb.body(f);
    let x = body.param("x", int);
    body.at(3, 2);
    let slot = body.alloc_local(int, "x");
    body.store(Operand::Value(slot), Operand::Value(x));
    let y = body.alloc_local(int, "y");
    body.store(Operand::Value(y), Operand::int(int, 2));
    let v = body.load(Operand::Value(slot));
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let config = Config { generate_debug: true, ..config() };
    let obj = compile_with(&program, a, &config);
    assert_eq!(obj.debug_locals.len(), 2);
    let x_local = &obj.debug_locals[0];
    assert_eq!(x_local.function, "local");
    assert_eq!(x_local.name, "x");
    assert!(x_local.is_param);
    assert_eq!(x_local.type_name, "int");
    assert_eq!(x_local.pos.line, 3);
    assert!(!obj.debug_locals[1].is_param);

    let plain = compile(&program, a);
    assert!(plain.debug_locals.is_empty());
}

/// Lines of the native block `name`, up to the next block header.
fn block_text<'t>(text: &'t str, name: &str) -> Vec<&'t str> {
    text.lines()
        .skip_while(|l| !l.starts_with(&format!("{name}:")) && !l.starts_with(&format!("{name}(")))
        .skip(1)
        .take_while(|l| l.starts_with(' '))
        .collect()
}

#[test]
fn test_phi_operand_leaves_final_block_of_split_predecessor() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let bool_ty = pb.types().basic(BasicKind::Bool);
    let seven_sig = sig(&mut pb, &[], &[int]);
    let seven = declare(&mut pb, a, "seven", seven_sig);
    let mut body = pb.body(seven);
    body.ret(vec![Operand::int(int, 7)]);
    body.finish();

    let s = sig(&mut pb, &[bool_ty], &[int]);
    let f = declare(&mut pb, a, "pick", s);
    let mut body = pb.body(f);
    let c = body.param("c", bool_ty);
    let entry = body.block("entry");
    let then = body.block("if.then");
    let done = body.block("if.done");
    body.switch_to(entry);
    body.if_(Operand::Value(c), then, done);
    body.switch_to(then);
    let t = body.call_static(seven, vec![], seven_sig).unwrap();
    body.jump(done);
    body.switch_to(done);
    let m = body.phi(int, vec![Operand::int(int, 0), Operand::Value(t)]);
    body.ret(vec![Operand::Value(m)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "pick");
    // if.then is block1; the call's panic check moves its jump into a later block
    let then_lines = block_text(&text, "block1");
    assert!(then_lines.iter().any(|l| l.contains("call fn")), "{text}");
    assert!(then_lines.last().is_some_and(|l| l.contains("brif")), "{text}");
    assert!(!then_lines.iter().any(|l| l.contains("block2")), "{text}");
    assert_eq!(count(&text, "jump block2("), 1, "{text}");
    assert!(text.contains("brif v0, block1, block2("), "{text}");
}
