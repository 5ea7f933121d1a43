//! Conversion instructions
//!
//! The trapping float-to-integer truncations check the operand against the
//! exclusive bounds of the target range before casting; the saturating forms
//! rely on `as`, which clamps out-of-range values and maps NaN to zero.

use super::{Stack, Trap, TrapCode, Value};

macro_rules! convert {
    ($($name:ident: $pop:ident -> $variant:ident, |$a:ident| $body:expr;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let $a = stack.$pop()?;
                stack.push(Value::$variant($body));
                Ok(())
            }
        )*
    };
}

/// Truncate `value` towards zero when it lies strictly between `lower` and
/// `upper`. Every f32 is exactly representable as f64, so one helper serves
/// both source types.
fn checked_trunc(value: f64, lower: f64, upper: f64) -> Result<f64, Trap> {
    if value.is_nan() {
        return Err(TrapCode::InvalidConversionToInteger.into());
    }
    if value <= lower || value >= upper {
        return Err(TrapCode::IntegerOverflow.into());
    }
    Ok(value.trunc())
}

const I32_S: (f64, f64) = (-2147483649.0, 2147483648.0);
const I32_U: (f64, f64) = (-1.0, 4294967296.0);
const I64_S: (f64, f64) = (-9223372036854777856.0, 9223372036854775808.0);
const I64_U: (f64, f64) = (-1.0, 18446744073709551616.0);

macro_rules! trunc {
    ($($name:ident: $pop:ident -> $variant:ident as $int:ty, $bounds:ident;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let value = stack.$pop()? as f64;
                let truncated = checked_trunc(value, $bounds.0, $bounds.1)?;
                stack.push(Value::$variant(truncated as $int as _));
                Ok(())
            }
        )*
    };
}

trunc! {
    i32_trunc_f32_s: pop_f32 -> I32 as i32, I32_S;
    i32_trunc_f32_u: pop_f32 -> I32 as u32, I32_U;
    i32_trunc_f64_s: pop_f64 -> I32 as i32, I32_S;
    i32_trunc_f64_u: pop_f64 -> I32 as u32, I32_U;
    i64_trunc_f32_s: pop_f32 -> I64 as i64, I64_S;
    i64_trunc_f32_u: pop_f32 -> I64 as u64, I64_U;
    i64_trunc_f64_s: pop_f64 -> I64 as i64, I64_S;
    i64_trunc_f64_u: pop_f64 -> I64 as u64, I64_U;
}

convert! {
    i32_wrap_i64: pop_i64 -> I32, |a| a as i32;
    i64_extend_i32_s: pop_i32 -> I64, |a| a as i64;
    i64_extend_i32_u: pop_i32 -> I64, |a| a as u32 as i64;

    i32_extend8_s: pop_i32 -> I32, |a| a as i8 as i32;
    i32_extend16_s: pop_i32 -> I32, |a| a as i16 as i32;
    i64_extend8_s: pop_i64 -> I64, |a| a as i8 as i64;
    i64_extend16_s: pop_i64 -> I64, |a| a as i16 as i64;
    i64_extend32_s: pop_i64 -> I64, |a| a as i32 as i64;

    i32_trunc_sat_f32_s: pop_f32 -> I32, |a| a as i32;
    i32_trunc_sat_f32_u: pop_f32 -> I32, |a| a as u32 as i32;
    i32_trunc_sat_f64_s: pop_f64 -> I32, |a| a as i32;
    i32_trunc_sat_f64_u: pop_f64 -> I32, |a| a as u32 as i32;
    i64_trunc_sat_f32_s: pop_f32 -> I64, |a| a as i64;
    i64_trunc_sat_f32_u: pop_f32 -> I64, |a| a as u64 as i64;
    i64_trunc_sat_f64_s: pop_f64 -> I64, |a| a as i64;
    i64_trunc_sat_f64_u: pop_f64 -> I64, |a| a as u64 as i64;

    f32_convert_i32_s: pop_i32 -> F32, |a| a as f32;
    f32_convert_i32_u: pop_i32 -> F32, |a| a as u32 as f32;
    f32_convert_i64_s: pop_i64 -> F32, |a| a as f32;
    f32_convert_i64_u: pop_i64 -> F32, |a| a as u64 as f32;
    f64_convert_i32_s: pop_i32 -> F64, |a| a as f64;
    f64_convert_i32_u: pop_i32 -> F64, |a| a as u32 as f64;
    f64_convert_i64_s: pop_i64 -> F64, |a| a as f64;
    f64_convert_i64_u: pop_i64 -> F64, |a| a as u64 as f64;

    f32_demote_f64: pop_f64 -> F32, |a| a as f32;
    f64_promote_f32: pop_f32 -> F64, |a| a as f64;

    i32_reinterpret_f32: pop_f32 -> I32, |a| a.to_bits() as i32;
    i64_reinterpret_f64: pop_f64 -> I64, |a| a.to_bits() as i64;
    f32_reinterpret_i32: pop_i32 -> F32, |a| f32::from_bits(a as u32);
    f64_reinterpret_i64: pop_i64 -> F64, |a| f64::from_bits(a as u64);
}
