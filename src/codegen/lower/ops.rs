//! Arithmetic, comparison and conversion.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, InstBuilder, Value, types};

use crate::diagnostics::CompileError;
use crate::ssa::{BinaryOp, Instruction, Operand, UnaryOp};
use crate::types::{BasicKind, Type, TypeId};

use crate::codegen::frame::Frame;
use crate::codegen::types::GoValue;

fn int_cc(op: BinaryOp, unsigned: bool) -> Option<IntCC> {
    Some(match (op, unsigned) {
        (BinaryOp::Eql, _) => IntCC::Equal,
        (BinaryOp::Neq, _) => IntCC::NotEqual,
        (BinaryOp::Lss, false) => IntCC::SignedLessThan,
        (BinaryOp::Lss, true) => IntCC::UnsignedLessThan,
        (BinaryOp::Leq, false) => IntCC::SignedLessThanOrEqual,
        (BinaryOp::Leq, true) => IntCC::UnsignedLessThanOrEqual,
        (BinaryOp::Gtr, false) => IntCC::SignedGreaterThan,
        (BinaryOp::Gtr, true) => IntCC::UnsignedGreaterThan,
        (BinaryOp::Geq, false) => IntCC::SignedGreaterThanOrEqual,
        (BinaryOp::Geq, true) => IntCC::UnsignedGreaterThanOrEqual,
        _ => return None,
    })
}

fn float_cc(op: BinaryOp) -> Option<FloatCC> {
    Some(match op {
        BinaryOp::Eql => FloatCC::Equal,
        BinaryOp::Neq => FloatCC::NotEqual,
        BinaryOp::Lss => FloatCC::LessThan,
        BinaryOp::Leq => FloatCC::LessThanOrEqual,
        BinaryOp::Gtr => FloatCC::GreaterThan,
        BinaryOp::Geq => FloatCC::GreaterThanOrEqual,
        _ => return None,
    })
}

fn is_int_like(kind: BasicKind) -> bool {
    kind.is_integer() || kind == BasicKind::UnsafePointer
}

fn is_unsigned_like(kind: BasicKind) -> bool {
    kind.is_unsigned() || kind == BasicKind::UnsafePointer
}

impl<'a, 'p> Frame<'a, 'p> {
    fn op_error(&self, op: BinaryOp, ty: TypeId) -> CompileError {
        self.unsupported(format!("{op:?} on {}", self.program.types.type_string(ty)))
    }

    pub(crate) fn binop(
        &mut self,
        op: BinaryOp,
        x: &Operand,
        y: &Operand,
        result_ty: TypeId,
    ) -> Result<GoValue, CompileError> {
        let program = self.program;
        let xt = self.operand_type(x)?;
        let xv = self.value(x)?;
        let yv = self.value(y)?;

        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            let v = self.shift(op, &xv, &yv)?;
            return Ok(GoValue::scalar(v, result_ty));
        }
        if op.is_comparison() {
            let v = self.compare(op, xt, &xv, &yv)?;
            return Ok(GoValue::scalar(v, result_ty));
        }

        let parts = match program.types.under(xt) {
            Type::Basic(k) if k.is_integer() => {
                vec![self.int_arith(op, *k, xv.single(), yv.single()).ok_or_else(|| self.op_error(op, xt))??]
            }
            Type::Basic(k) if k.is_float() => {
                let (a, b) = (xv.single(), yv.single());
                let ins = self.builder.ins();
                vec![match op {
                    BinaryOp::Add => ins.fadd(a, b),
                    BinaryOp::Sub => ins.fsub(a, b),
                    BinaryOp::Mul => ins.fmul(a, b),
                    BinaryOp::Quo => ins.fdiv(a, b),
                    _ => return Err(self.op_error(op, xt)),
                }]
            }
            Type::Basic(k) if k.is_complex() => self.complex_arith(op, &xv, &yv).ok_or_else(|| self.op_error(op, xt))?,
            Type::Basic(BasicKind::String) if op == BinaryOp::Add => {
                let args = [xv.parts[0], xv.parts[1], yv.parts[0], yv.parts[1]];
                self.call_runtime("__go_string_plus", &args)?
            }
            _ => return Err(self.op_error(op, xt)),
        };
        Ok(GoValue::new(parts, result_ty))
    }

    fn int_arith(&mut self, op: BinaryOp, kind: BasicKind, a: Value, b: Value) -> Option<Result<Value, CompileError>> {
        let ins = self.builder.ins();
        Some(Ok(match op {
            BinaryOp::Add => ins.iadd(a, b),
            BinaryOp::Sub => ins.isub(a, b),
            BinaryOp::Mul => ins.imul(a, b),
            BinaryOp::And => ins.band(a, b),
            BinaryOp::Or => ins.bor(a, b),
            BinaryOp::Xor => ins.bxor(a, b),
            BinaryOp::AndNot => ins.band_not(a, b),
            BinaryOp::Quo | BinaryOp::Rem => return Some(self.divide(op, kind, a, b)),
            _ => return None,
        }))
    }

    /// Integer division. Division by zero raises a runtime panic when checks
    /// are on; `MIN / -1` wraps to `MIN` and `MIN % -1` is zero.
    fn divide(&mut self, op: BinaryOp, kind: BasicKind, a: Value, b: Value) -> Result<Value, CompileError> {
        if self.unit.config.runtime_checks {
            let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, b, 0);
            self.guard(is_zero, "__go_panic_divide", &[])?;
        }
        let quo = op == BinaryOp::Quo;
        if kind.is_unsigned() {
            let ins = self.builder.ins();
            return Ok(if quo { ins.udiv(a, b) } else { ins.urem(a, b) });
        }
        let ty = self.builder.func.dfg.value_type(b);
        let minus_one = self.iconst(ty, -1);
        let one = self.iconst(ty, 1);
        let is_minus_one = self.builder.ins().icmp(IntCC::Equal, b, minus_one);
        let divisor = self.builder.ins().select(is_minus_one, one, b);
        if quo {
            let q = self.builder.ins().sdiv(a, divisor);
            let neg = self.builder.ins().ineg(a);
            Ok(self.builder.ins().select(is_minus_one, neg, q))
        } else {
            let r = self.builder.ins().srem(a, divisor);
            let zero = self.iconst(ty, 0);
            Ok(self.builder.ins().select(is_minus_one, zero, r))
        }
    }

    /// Shifts by at least the operand width give zero, or the sign fill for
    /// signed right shifts. A negative signed count panics.
    fn shift(&mut self, op: BinaryOp, x: &GoValue, y: &GoValue) -> Result<Value, CompileError> {
        let kind = self
            .program
            .types
            .basic_kind(x.ty)
            .filter(|k| k.is_integer())
            .ok_or_else(|| self.op_error(op, x.ty))?;
        let v = x.single();
        let ty = self.builder.func.dfg.value_type(v);
        let bits = i64::from(ty.bits());
        let count64 = self.to_i64(y);
        let signed_count = self.program.types.basic_kind(y.ty).is_some_and(|k| k.is_integer() && !k.is_unsigned());
        if signed_count && self.unit.config.runtime_checks {
            let negative = self.builder.ins().icmp_imm(IntCC::SignedLessThan, count64, 0);
            self.guard(negative, "__go_panic_shift", &[])?;
        }
        let count = if ty == types::I64 { count64 } else { self.builder.ins().ireduce(ty, count64) };
        let over = self.builder.ins().icmp_imm(IntCC::UnsignedGreaterThanOrEqual, count64, bits);
        let zero = self.iconst(ty, 0);
        Ok(match op {
            BinaryOp::Shl => {
                let raw = self.builder.ins().ishl(v, count);
                self.builder.ins().select(over, zero, raw)
            }
            _ if kind.is_unsigned() => {
                let raw = self.builder.ins().ushr(v, count);
                self.builder.ins().select(over, zero, raw)
            }
            _ => {
                let max = self.iconst(ty, bits - 1);
                let clamped = self.builder.ins().select(over, max, count);
                self.builder.ins().sshr(v, clamped)
            }
        })
    }

    fn complex_arith(&mut self, op: BinaryOp, x: &GoValue, y: &GoValue) -> Option<Vec<Value>> {
        let (a, b) = (x.parts[0], x.parts[1]);
        let (c, d) = (y.parts[0], y.parts[1]);
        let fb = &mut self.builder;
        Some(match op {
            BinaryOp::Add => vec![fb.ins().fadd(a, c), fb.ins().fadd(b, d)],
            BinaryOp::Sub => vec![fb.ins().fsub(a, c), fb.ins().fsub(b, d)],
            BinaryOp::Mul => {
                let (ac, bd) = (fb.ins().fmul(a, c), fb.ins().fmul(b, d));
                let (ad, bc) = (fb.ins().fmul(a, d), fb.ins().fmul(b, c));
                vec![fb.ins().fsub(ac, bd), fb.ins().fadd(ad, bc)]
            }
            BinaryOp::Quo => {
                let (cc, dd) = (fb.ins().fmul(c, c), fb.ins().fmul(d, d));
                let den = fb.ins().fadd(cc, dd);
                let (ac, bd) = (fb.ins().fmul(a, c), fb.ins().fmul(b, d));
                let (bc, ad) = (fb.ins().fmul(b, c), fb.ins().fmul(a, d));
                let re = fb.ins().fadd(ac, bd);
                let im = fb.ins().fsub(bc, ad);
                vec![fb.ins().fdiv(re, den), fb.ins().fdiv(im, den)]
            }
            _ => return None,
        })
    }

    /// Compare two values of type `ty`, giving a bool (I8).
    pub(crate) fn compare(&mut self, op: BinaryOp, ty: TypeId, x: &GoValue, y: &GoValue) -> Result<Value, CompileError> {
        let program = self.program;
        match program.types.under(ty) {
            Type::Basic(k) if is_int_like(*k) || *k == BasicKind::Bool => {
                let cc = int_cc(op, is_unsigned_like(*k)).ok_or_else(|| self.op_error(op, ty))?;
                Ok(self.builder.ins().icmp(cc, x.single(), y.single()))
            }
            Type::Basic(k) if k.is_float() => {
                let cc = float_cc(op).ok_or_else(|| self.op_error(op, ty))?;
                Ok(self.builder.ins().fcmp(cc, x.single(), y.single()))
            }
            Type::Basic(k) if k.is_complex() => {
                let cc = match op {
                    BinaryOp::Eql => FloatCC::Equal,
                    BinaryOp::Neq => FloatCC::NotEqual,
                    _ => return Err(self.op_error(op, ty)),
                };
                let re = self.builder.ins().fcmp(cc, x.parts[0], y.parts[0]);
                let im = self.builder.ins().fcmp(cc, x.parts[1], y.parts[1]);
                Ok(if op == BinaryOp::Eql { self.builder.ins().band(re, im) } else { self.builder.ins().bor(re, im) })
            }
            Type::Basic(BasicKind::String) => {
                let cc = int_cc(op, false).ok_or_else(|| self.op_error(op, ty))?;
                let args = [x.parts[0], x.parts[1], y.parts[0], y.parts[1]];
                let cmp = self.call_runtime("__go_strcmp", &args)?[0];
                Ok(self.builder.ins().icmp_imm(cc, cmp, 0))
            }
            Type::Pointer(_) | Type::Map { .. } | Type::Chan { .. } | Type::Signature(_) | Type::Slice(_) => {
                let cc = match op {
                    BinaryOp::Eql => IntCC::Equal,
                    BinaryOp::Neq => IntCC::NotEqual,
                    _ => return Err(self.op_error(op, ty)),
                };
                // Slices, maps and funcs only compare against nil.
                Ok(self.builder.ins().icmp(cc, x.parts[0], y.parts[0]))
            }
            Type::Interface(_) | Type::Struct(_) | Type::Array { .. } => {
                let eq = match op {
                    BinaryOp::Eql | BinaryOp::Neq => self.equal(ty, &x.parts, &y.parts)?,
                    _ => return Err(self.op_error(op, ty)),
                };
                Ok(if op == BinaryOp::Eql { eq } else { self.builder.ins().icmp_imm(IntCC::Equal, eq, 0) })
            }
            _ => Err(self.op_error(op, ty)),
        }
    }

    /// Structural equality of two flattened values of type `ty`.
    fn equal(&mut self, ty: TypeId, a: &[Value], b: &[Value]) -> Result<Value, CompileError> {
        let program = self.program;
        match program.types.under(ty) {
            Type::Struct(fields) => {
                let mut acc = self.iconst(types::I8, 1);
                for (i, f) in fields.iter().enumerate() {
                    let range = self.unit.lowering.field_parts(ty, i);
                    let eq = self.equal(f.ty, &a[range.clone()], &b[range])?;
                    acc = self.builder.ins().band(acc, eq);
                }
                Ok(acc)
            }
            Type::Array { elem, len } => {
                let per = self.unit.lowering.part_count(*elem);
                let mut acc = self.iconst(types::I8, 1);
                for i in 0..*len as usize {
                    let range = i * per..(i + 1) * per;
                    let eq = self.equal(*elem, &a[range.clone()], &b[range])?;
                    acc = self.builder.ins().band(acc, eq);
                }
                Ok(acc)
            }
            Type::Interface(_) => self.iface_equal(ty, a, b),
            _ => {
                let x = GoValue::new(a.to_vec(), ty);
                let y = GoValue::new(b.to_vec(), ty);
                self.compare(BinaryOp::Eql, ty, &x, &y)
            }
        }
    }

    pub(crate) fn unop(
        &mut self,
        instr: &Instruction,
        op: UnaryOp,
        x: &Operand,
        comma_ok: bool,
    ) -> Result<(), CompileError> {
        if op == UnaryOp::Recv {
            return self.recv(instr, x, comma_ok);
        }
        let program = self.program;
        let ty = self.result_type(instr)?;
        let xt = self.operand_type(x)?;
        let v = self.value(x)?;
        let parts = match (op, program.types.under(xt)) {
            (UnaryOp::Deref, _) => {
                let ptr = v.single();
                if !matches!(x, Operand::Global(_)) {
                    self.nil_check(ptr)?;
                }
                let loaded = self.load_value(ptr, ty)?;
                return self.define(instr, loaded);
            }
            (UnaryOp::Neg, Type::Basic(k)) if k.is_integer() => vec![self.builder.ins().ineg(v.single())],
            (UnaryOp::Neg, Type::Basic(k)) if k.is_float() || k.is_complex() => {
                v.parts.iter().map(|p| self.builder.ins().fneg(*p)).collect()
            }
            (UnaryOp::Not, _) => vec![self.builder.ins().icmp_imm(IntCC::Equal, v.single(), 0)],
            (UnaryOp::Xor, Type::Basic(k)) if k.is_integer() => vec![self.builder.ins().bnot(v.single())],
            _ => {
                return Err(self.unsupported(format!("{op:?} on {}", program.types.type_string(xt))));
            }
        };
        self.define(instr, GoValue::new(parts, ty))
    }

    pub(crate) fn convert(&mut self, instr: &Instruction, x: &Operand) -> Result<(), CompileError> {
        let program = self.program;
        let from = self.operand_type(x)?;
        let to = self.result_type(instr)?;
        let v = self.value(x)?;
        let types = &program.types;
        let result = match (types.under(from), types.under(to)) {
            (Type::Basic(f), Type::Basic(t)) => self.convert_basic(*f, *t, v, to)?,
            (Type::Basic(BasicKind::String), Type::Slice(elem)) => {
                let func = match types.basic_kind(*elem) {
                    Some(BasicKind::Uint8) => "__go_string_to_bytes",
                    Some(BasicKind::Int32) => "__go_string_to_runes",
                    _ => return Err(self.conversion_error(from, to)),
                };
                let out = self.temp(to)?;
                self.call_runtime(func, &[out, v.parts[0], v.parts[1]])?;
                self.load_value(out, to)?
            }
            (Type::Slice(elem), Type::Basic(BasicKind::String)) => {
                let func = match types.basic_kind(*elem) {
                    Some(BasicKind::Uint8) => "__go_bytes_to_string",
                    Some(BasicKind::Int32) => "__go_runes_to_string",
                    _ => return Err(self.conversion_error(from, to)),
                };
                GoValue::new(self.call_runtime(func, &[v.parts[0], v.parts[1]])?, to)
            }
            (Type::Pointer(_), Type::Basic(BasicKind::UnsafePointer))
            | (Type::Basic(BasicKind::UnsafePointer), Type::Pointer(_)) => v.retyped(to),
            _ => return Err(self.conversion_error(from, to)),
        };
        self.define(instr, result)
    }

    fn conversion_error(&self, from: TypeId, to: TypeId) -> CompileError {
        let types = &self.program.types;
        self.unsupported(format!("conversion from {} to {}", types.type_string(from), types.type_string(to)))
    }

    fn convert_basic(&mut self, from: BasicKind, to: BasicKind, v: GoValue, to_ty: TypeId) -> Result<GoValue, CompileError> {
        if from == to {
            return Ok(v.retyped(to_ty));
        }
        let target: Vec<ir::Type> = self.layout(to_ty)?.part_types();
        let x = v.single();
        let src = self.builder.func.dfg.value_type(x);
        let parts = if is_int_like(from) && is_int_like(to) {
            let t = target[0];
            vec![if src == t {
                x
            } else if src.bits() > t.bits() {
                self.builder.ins().ireduce(t, x)
            } else if is_unsigned_like(from) {
                self.builder.ins().uextend(t, x)
            } else {
                self.builder.ins().sextend(t, x)
            }]
        } else if from.is_integer() && to.is_float() {
            let wide = self.to_i64(&v);
            vec![if from.is_unsigned() {
                self.builder.ins().fcvt_from_uint(target[0], wide)
            } else {
                self.builder.ins().fcvt_from_sint(target[0], wide)
            }]
        } else if from.is_float() && to.is_integer() {
            let wide = if to.is_unsigned() {
                self.builder.ins().fcvt_to_uint_sat(types::I64, x)
            } else {
                self.builder.ins().fcvt_to_sint_sat(types::I64, x)
            };
            vec![if target[0] == types::I64 { wide } else { self.builder.ins().ireduce(target[0], wide) }]
        } else if (from.is_float() && to.is_float()) || (from.is_complex() && to.is_complex()) {
            v.parts.iter().zip(&target).map(|(p, t)| self.resize_float(*p, *t)).collect()
        } else if from.is_integer() && to == BasicKind::String {
            let wide = self.to_i64(&v);
            self.call_runtime("__go_int_to_string", &[wide])?
        } else {
            return Err(self.unsupported(format!("conversion from {from} to {to}")));
        };
        Ok(GoValue::new(parts, to_ty))
    }

    fn resize_float(&mut self, v: Value, to: ir::Type) -> Value {
        let from = self.builder.func.dfg.value_type(v);
        if from == to {
            v
        } else if from.bits() < to.bits() {
            self.builder.ins().fpromote(to, v)
        } else {
            self.builder.ins().fdemote(to, v)
        }
    }
}
