mod common;

use common::{compile, count, declare, ir, method_sig, sig};
use gocrane::ssa::builder::ProgramBuilder;
use gocrane::ssa::{BinaryOp, Builtin, Const, ConstValue, Operand};
use gocrane::types::{BasicKind, Field};

#[test]
fn test_two_results_come_back_in_registers() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let pair_sig = sig(&mut pb, &[int], &[int, int]);
    let pair = declare(&mut pb, a, "pair", pair_sig);
    let mut body = pb.body(pair);
    let x = body.param("x", int);
    let y = body.binop(BinaryOp::Mul, Operand::Value(x), Operand::int(int, 2), int);
    body.ret(vec![Operand::Value(x), Operand::Value(y)]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    let t = body.call_static(pair, vec![Operand::int(int, 21)], pair_sig).unwrap();
    let first = body.extract(t, 0, int);
    let second = body.extract(t, 1, int);
    let sum = body.binop(BinaryOp::Add, Operand::Value(first), Operand::Value(second), int);
    body.ret(vec![Operand::Value(sum)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let pair_ir = ir(&obj, "pair");
    assert!(pair_ir.lines().next().unwrap().contains("(i64) -> i64, i64"), "{pair_ir}");
    let main_ir = ir(&obj, "main");
    assert!(main_ir.contains("call fn"), "{main_ir}");
    assert!(main_ir.contains("iadd"), "{main_ir}");
}

#[test]
fn test_wide_results_go_through_result_pointer() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let string = pb.types().basic(BasicKind::String);
    let named_sig = sig(&mut pb, &[], &[string, int]);
    let named = declare(&mut pb, a, "named", named_sig);
    let mut body = pb.body(named);
    body.ret(vec![
        Operand::Const(Const { ty: string, value: ConstValue::String("gopher".into()) }),
        Operand::int(int, 6),
    ]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, a, "main", main_sig);
    let mut body = pb.body(main);
    let t = body.call_static(named, vec![], named_sig).unwrap();
    let n = body.extract(t, 1, int);
    body.ret(vec![Operand::Value(n)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let callee = ir(&obj, "named");
    assert!(!callee.lines().next().unwrap().contains("->"), "{callee}");
    assert!(count(&callee, "store") >= 3, "{callee}");
    let caller = ir(&obj, "main");
    assert!(caller.contains("stack_addr"), "{caller}");
    assert!(caller.contains("load.i64"), "{caller}");
}

#[test]
fn test_value_receiver_passed_by_address() {
    let mut pb = ProgramBuilder::new();
    let p = pb.package("p", "p");
    let int = pb.types().basic(BasicKind::Int);
    let fields = vec![
        Field { name: "x".into(), ty: int, embedded: false },
        Field { name: "y".into(), ty: int, embedded: false },
    ];
    let point_struct = pb.types().strukt(fields);
    let point = pb.types().named("Point", Some("p"), point_struct);
    let sum_sig = method_sig(&mut pb, point, &[], &[int]);
    let sum = pb.function(Some(p), "Sum", sum_sig);
    pb.add_method(point, "Sum", sum);
    let mut body = pb.body(sum);
    let r = body.param("r", point);
    let slot = body.alloc_local(point, "r");
    body.store(Operand::Value(slot), Operand::Value(r));
    let xa = body.field_addr(Operand::Value(slot), 0);
    let ya = body.field_addr(Operand::Value(slot), 1);
    let x = body.load(Operand::Value(xa));
    let y = body.load(Operand::Value(ya));
    let s = body.binop(BinaryOp::Add, Operand::Value(x), Operand::Value(y), int);
    body.ret(vec![Operand::Value(s)]);
    body.finish();

    let main_sig = sig(&mut pb, &[], &[int]);
    let main = declare(&mut pb, p, "main", main_sig);
    let mut body = pb.body(main);
    let local = body.alloc_local(point, "pt");
    let pt = body.load(Operand::Value(local));
    let v = body.call_static(sum, vec![Operand::Value(pt)], sum_sig).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, p);
    let method = ir(&obj, "(p.Point).Sum");
    assert!(method.lines().next().unwrap().contains("(i64) -> i64"), "{method}");
    let caller = ir(&obj, "main");
    assert!(caller.contains("call fn"), "{caller}");
}

#[test]
fn test_builtins_on_strings_and_slices() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let string = pb.types().basic(BasicKind::String);
    let ints = pb.types().slice(int);
    let s = sig(&mut pb, &[string, ints, ints], &[int]);
    let f = declare(&mut pb, a, "work", s);
    let len_sig = sig(&mut pb, &[string], &[int]);
    let append_sig = sig(&mut pb, &[ints, int, int], &[ints]);
    let copy_sig = sig(&mut pb, &[ints, ints], &[int]);
    let print_sig = sig(&mut pb, &[string, int], &[]);

    let mut body = pb.body(f);
    let text = body.param("text", string);
    let dst = body.param("dst", ints);
    let src = body.param("src", ints);
    let n = body.call_builtin(Builtin::Len, vec![Operand::Value(text)], len_sig).unwrap();
    let grown = body
        .call_builtin(
            Builtin::Append,
            vec![Operand::Value(src), Operand::int(int, 1), Operand::int(int, 2)],
            append_sig,
        )
        .unwrap();
    let copied = body.call_builtin(Builtin::Copy, vec![Operand::Value(dst), Operand::Value(grown)], copy_sig).unwrap();
    body.call_builtin(
        Builtin::Println,
        vec![Operand::Const(Const { ty: string, value: ConstValue::String("n =".into()) }), Operand::Value(n)],
        print_sig,
    );
    let total = body.binop(BinaryOp::Add, Operand::Value(n), Operand::Value(copied), int);
    body.ret(vec![Operand::Value(total)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "work");
    // append, copy, two prints, a space and a newline
    assert!(count(&text, "call fn") >= 6, "{text}");
    assert!(text.contains("stack_addr"), "{text}");
    assert!(text.contains("iadd"), "{text}");
}

#[test]
fn test_dynamic_call_through_function_value() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let int = pb.types().basic(BasicKind::Int);
    let fn_ty = sig(&mut pb, &[int], &[int]);
    let s = sig(&mut pb, &[fn_ty], &[int]);
    let f = declare(&mut pb, a, "apply", s);
    let mut body = pb.body(f);
    let g = body.param("g", fn_ty);
    let v = body.call_value(Operand::Value(g), vec![Operand::int(int, 3)], fn_ty).unwrap();
    body.ret(vec![Operand::Value(v)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "apply");
    assert!(text.contains("call_indirect"), "{text}");
    assert!(text.contains("load.i64"), "{text}");
}

#[test]
fn test_string_concatenation_and_comparison() {
    let mut pb = ProgramBuilder::new();
    let a = pb.package("a", "a");
    let string = pb.types().basic(BasicKind::String);
    let bool_ty = pb.types().basic(BasicKind::Bool);
    let s = sig(&mut pb, &[string, string], &[bool_ty]);
    let f = declare(&mut pb, a, "same", s);
    let mut body = pb.body(f);
    let x = body.param("x", string);
    let y = body.param("y", string);
    let xy = body.binop(BinaryOp::Add, Operand::Value(x), Operand::Value(y), string);
    let eq = body.binop(BinaryOp::Eql, Operand::Value(xy), Operand::Value(y), bool_ty);
    body.ret(vec![Operand::Value(eq)]);
    body.finish();
    let program = pb.finish();

    let obj = compile(&program, a);
    let text = ir(&obj, "same");
    assert!(count(&text, "call fn") >= 2, "{text}");
}
