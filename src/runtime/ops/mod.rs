//! Instruction implementations
//!
//! Each function pops its operands from the [`Stack`], pushes its result and
//! returns a [`Trap`] on a fault. Control, variable and call instructions
//! live in the executor because they need the active frame.

pub mod bitwise;
pub mod comparison;
pub mod conversion;
pub mod memory;
pub mod numeric;

pub(crate) use crate::parser::instruction::MemArg;
pub(crate) use crate::runtime::memory::LinearMemory;
pub(crate) use crate::runtime::stack::Stack;
pub(crate) use crate::runtime::trap::{Trap, TrapCode};
pub(crate) use crate::runtime::value::Value;

use crate::parser::instruction::NumericOp;

/// Execute one instruction from the numeric opcode table.
pub fn execute_numeric(stack: &mut Stack, op: NumericOp) -> Result<(), Trap> {
    use NumericOp::*;
    match op {
        I32Eqz => comparison::i32_eqz(stack),
        I32Eq => comparison::i32_eq(stack),
        I32Ne => comparison::i32_ne(stack),
        I32LtS => comparison::i32_lt_s(stack),
        I32LtU => comparison::i32_lt_u(stack),
        I32GtS => comparison::i32_gt_s(stack),
        I32GtU => comparison::i32_gt_u(stack),
        I32LeS => comparison::i32_le_s(stack),
        I32LeU => comparison::i32_le_u(stack),
        I32GeS => comparison::i32_ge_s(stack),
        I32GeU => comparison::i32_ge_u(stack),

        I64Eqz => comparison::i64_eqz(stack),
        I64Eq => comparison::i64_eq(stack),
        I64Ne => comparison::i64_ne(stack),
        I64LtS => comparison::i64_lt_s(stack),
        I64LtU => comparison::i64_lt_u(stack),
        I64GtS => comparison::i64_gt_s(stack),
        I64GtU => comparison::i64_gt_u(stack),
        I64LeS => comparison::i64_le_s(stack),
        I64LeU => comparison::i64_le_u(stack),
        I64GeS => comparison::i64_ge_s(stack),
        I64GeU => comparison::i64_ge_u(stack),

        F32Eq => comparison::f32_eq(stack),
        F32Ne => comparison::f32_ne(stack),
        F32Lt => comparison::f32_lt(stack),
        F32Gt => comparison::f32_gt(stack),
        F32Le => comparison::f32_le(stack),
        F32Ge => comparison::f32_ge(stack),

        F64Eq => comparison::f64_eq(stack),
        F64Ne => comparison::f64_ne(stack),
        F64Lt => comparison::f64_lt(stack),
        F64Gt => comparison::f64_gt(stack),
        F64Le => comparison::f64_le(stack),
        F64Ge => comparison::f64_ge(stack),

        I32Clz => bitwise::i32_clz(stack),
        I32Ctz => bitwise::i32_ctz(stack),
        I32Popcnt => bitwise::i32_popcnt(stack),
        I32Add => numeric::i32_add(stack),
        I32Sub => numeric::i32_sub(stack),
        I32Mul => numeric::i32_mul(stack),
        I32DivS => numeric::i32_div_s(stack),
        I32DivU => numeric::i32_div_u(stack),
        I32RemS => numeric::i32_rem_s(stack),
        I32RemU => numeric::i32_rem_u(stack),
        I32And => bitwise::i32_and(stack),
        I32Or => bitwise::i32_or(stack),
        I32Xor => bitwise::i32_xor(stack),
        I32Shl => bitwise::i32_shl(stack),
        I32ShrS => bitwise::i32_shr_s(stack),
        I32ShrU => bitwise::i32_shr_u(stack),
        I32Rotl => bitwise::i32_rotl(stack),
        I32Rotr => bitwise::i32_rotr(stack),

        I64Clz => bitwise::i64_clz(stack),
        I64Ctz => bitwise::i64_ctz(stack),
        I64Popcnt => bitwise::i64_popcnt(stack),
        I64Add => numeric::i64_add(stack),
        I64Sub => numeric::i64_sub(stack),
        I64Mul => numeric::i64_mul(stack),
        I64DivS => numeric::i64_div_s(stack),
        I64DivU => numeric::i64_div_u(stack),
        I64RemS => numeric::i64_rem_s(stack),
        I64RemU => numeric::i64_rem_u(stack),
        I64And => bitwise::i64_and(stack),
        I64Or => bitwise::i64_or(stack),
        I64Xor => bitwise::i64_xor(stack),
        I64Shl => bitwise::i64_shl(stack),
        I64ShrS => bitwise::i64_shr_s(stack),
        I64ShrU => bitwise::i64_shr_u(stack),
        I64Rotl => bitwise::i64_rotl(stack),
        I64Rotr => bitwise::i64_rotr(stack),

        F32Abs => numeric::f32_abs(stack),
        F32Neg => numeric::f32_neg(stack),
        F32Ceil => numeric::f32_ceil(stack),
        F32Floor => numeric::f32_floor(stack),
        F32Trunc => numeric::f32_trunc(stack),
        F32Nearest => numeric::f32_nearest(stack),
        F32Sqrt => numeric::f32_sqrt(stack),
        F32Add => numeric::f32_add(stack),
        F32Sub => numeric::f32_sub(stack),
        F32Mul => numeric::f32_mul(stack),
        F32Div => numeric::f32_div(stack),
        F32Min => numeric::f32_min(stack),
        F32Max => numeric::f32_max(stack),
        F32Copysign => numeric::f32_copysign(stack),

        F64Abs => numeric::f64_abs(stack),
        F64Neg => numeric::f64_neg(stack),
        F64Ceil => numeric::f64_ceil(stack),
        F64Floor => numeric::f64_floor(stack),
        F64Trunc => numeric::f64_trunc(stack),
        F64Nearest => numeric::f64_nearest(stack),
        F64Sqrt => numeric::f64_sqrt(stack),
        F64Add => numeric::f64_add(stack),
        F64Sub => numeric::f64_sub(stack),
        F64Mul => numeric::f64_mul(stack),
        F64Div => numeric::f64_div(stack),
        F64Min => numeric::f64_min(stack),
        F64Max => numeric::f64_max(stack),
        F64Copysign => numeric::f64_copysign(stack),

        I32WrapI64 => conversion::i32_wrap_i64(stack),
        I32TruncF32S => conversion::i32_trunc_f32_s(stack),
        I32TruncF32U => conversion::i32_trunc_f32_u(stack),
        I32TruncF64S => conversion::i32_trunc_f64_s(stack),
        I32TruncF64U => conversion::i32_trunc_f64_u(stack),
        I64ExtendI32S => conversion::i64_extend_i32_s(stack),
        I64ExtendI32U => conversion::i64_extend_i32_u(stack),
        I64TruncF32S => conversion::i64_trunc_f32_s(stack),
        I64TruncF32U => conversion::i64_trunc_f32_u(stack),
        I64TruncF64S => conversion::i64_trunc_f64_s(stack),
        I64TruncF64U => conversion::i64_trunc_f64_u(stack),
        F32ConvertI32S => conversion::f32_convert_i32_s(stack),
        F32ConvertI32U => conversion::f32_convert_i32_u(stack),
        F32ConvertI64S => conversion::f32_convert_i64_s(stack),
        F32ConvertI64U => conversion::f32_convert_i64_u(stack),
        F32DemoteF64 => conversion::f32_demote_f64(stack),
        F64ConvertI32S => conversion::f64_convert_i32_s(stack),
        F64ConvertI32U => conversion::f64_convert_i32_u(stack),
        F64ConvertI64S => conversion::f64_convert_i64_s(stack),
        F64ConvertI64U => conversion::f64_convert_i64_u(stack),
        F64PromoteF32 => conversion::f64_promote_f32(stack),
        I32ReinterpretF32 => conversion::i32_reinterpret_f32(stack),
        I64ReinterpretF64 => conversion::i64_reinterpret_f64(stack),
        F32ReinterpretI32 => conversion::f32_reinterpret_i32(stack),
        F64ReinterpretI64 => conversion::f64_reinterpret_i64(stack),

        I32Extend8S => conversion::i32_extend8_s(stack),
        I32Extend16S => conversion::i32_extend16_s(stack),
        I64Extend8S => conversion::i64_extend8_s(stack),
        I64Extend16S => conversion::i64_extend16_s(stack),
        I64Extend32S => conversion::i64_extend32_s(stack),

        I32TruncSatF32S => conversion::i32_trunc_sat_f32_s(stack),
        I32TruncSatF32U => conversion::i32_trunc_sat_f32_u(stack),
        I32TruncSatF64S => conversion::i32_trunc_sat_f64_s(stack),
        I32TruncSatF64U => conversion::i32_trunc_sat_f64_u(stack),
        I64TruncSatF32S => conversion::i64_trunc_sat_f32_s(stack),
        I64TruncSatF32U => conversion::i64_trunc_sat_f32_u(stack),
        I64TruncSatF64S => conversion::i64_trunc_sat_f64_s(stack),
        I64TruncSatF64U => conversion::i64_trunc_sat_f64_u(stack),
    }
}
