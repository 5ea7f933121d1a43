//! Arithmetic instructions
//!
//! Integer arithmetic wraps modulo 2^N. Division and remainder trap on a
//! zero divisor, and signed division also traps when the quotient does not
//! fit. Float arithmetic follows IEEE 754 with the WebAssembly rules for
//! `min`, `max` and `nearest`.

use super::{Stack, Trap, TrapCode, Value};

macro_rules! binop {
    ($($name:ident: $pop:ident -> $variant:ident, |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let $b = stack.$pop()?;
                let $a = stack.$pop()?;
                stack.push(Value::$variant($body));
                Ok(())
            }
        )*
    };
}

macro_rules! unop {
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

// ============================================================================
// Integer arithmetic
// ============================================================================

binop! {
    i32_add: pop_i32 -> I32, |a, b| a.wrapping_add(b);
    i32_sub: pop_i32 -> I32, |a, b| a.wrapping_sub(b);
    i32_mul: pop_i32 -> I32, |a, b| a.wrapping_mul(b);
    i64_add: pop_i64 -> I64, |a, b| a.wrapping_add(b);
    i64_sub: pop_i64 -> I64, |a, b| a.wrapping_sub(b);
    i64_mul: pop_i64 -> I64, |a, b| a.wrapping_mul(b);
}

/// i32.div_s
/// Traps on a zero divisor and on `i32::MIN / -1`, whose quotient 2^31 is
/// not representable.
pub fn i32_div_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    if c1 == i32::MIN && c2 == -1 {
        return Err(TrapCode::IntegerOverflow.into());
    }
    stack.push(Value::I32(c1 / c2));
    Ok(())
}

pub fn i32_div_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()? as u32;
    let c1 = stack.pop_i32()? as u32;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I32((c1 / c2) as i32));
    Ok(())
}

/// i32.rem_s
/// The sign of the result follows the dividend. `i32::MIN % -1` is 0.
pub fn i32_rem_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()?;
    let c1 = stack.pop_i32()?;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I32(c1.wrapping_rem(c2)));
    Ok(())
}

pub fn i32_rem_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i32()? as u32;
    let c1 = stack.pop_i32()? as u32;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I32((c1 % c2) as i32));
    Ok(())
}

pub fn i64_div_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    if c1 == i64::MIN && c2 == -1 {
        return Err(TrapCode::IntegerOverflow.into());
    }
    stack.push(Value::I64(c1 / c2));
    Ok(())
}

pub fn i64_div_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()? as u64;
    let c1 = stack.pop_i64()? as u64;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I64((c1 / c2) as i64));
    Ok(())
}

pub fn i64_rem_s(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()?;
    let c1 = stack.pop_i64()?;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I64(c1.wrapping_rem(c2)));
    Ok(())
}

pub fn i64_rem_u(stack: &mut Stack) -> Result<(), Trap> {
    let c2 = stack.pop_i64()? as u64;
    let c1 = stack.pop_i64()? as u64;
    if c2 == 0 {
        return Err(TrapCode::IntegerDivideByZero.into());
    }
    stack.push(Value::I64((c1 % c2) as i64));
    Ok(())
}

// ============================================================================
// Float arithmetic
// ============================================================================

/// Either operand NaN gives NaN, and -0 is less than +0.
fn min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else {
        a.max(b)
    }
}

fn min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else {
        a.max(b)
    }
}

binop! {
    f32_add: pop_f32 -> F32, |a, b| a + b;
    f32_sub: pop_f32 -> F32, |a, b| a - b;
    f32_mul: pop_f32 -> F32, |a, b| a * b;
    f32_div: pop_f32 -> F32, |a, b| a / b;
    f32_min: pop_f32 -> F32, |a, b| min_f32(a, b);
    f32_max: pop_f32 -> F32, |a, b| max_f32(a, b);
    f32_copysign: pop_f32 -> F32, |a, b| a.copysign(b);
    f64_add: pop_f64 -> F64, |a, b| a + b;
    f64_sub: pop_f64 -> F64, |a, b| a - b;
    f64_mul: pop_f64 -> F64, |a, b| a * b;
    f64_div: pop_f64 -> F64, |a, b| a / b;
    f64_min: pop_f64 -> F64, |a, b| min_f64(a, b);
    f64_max: pop_f64 -> F64, |a, b| max_f64(a, b);
    f64_copysign: pop_f64 -> F64, |a, b| a.copysign(b);
}

// abs, neg and copysign only touch the sign bit, so NaN payloads survive.
unop! {
    f32_abs: pop_f32 -> F32, |a| a.abs();
    f32_neg: pop_f32 -> F32, |a| -a;
    f32_ceil: pop_f32 -> F32, |a| a.ceil();
    f32_floor: pop_f32 -> F32, |a| a.floor();
    f32_trunc: pop_f32 -> F32, |a| a.trunc();
    f32_nearest: pop_f32 -> F32, |a| a.round_ties_even();
    f32_sqrt: pop_f32 -> F32, |a| a.sqrt();
    f64_abs: pop_f64 -> F64, |a| a.abs();
    f64_neg: pop_f64 -> F64, |a| -a;
    f64_ceil: pop_f64 -> F64, |a| a.ceil();
    f64_floor: pop_f64 -> F64, |a| a.floor();
    f64_trunc: pop_f64 -> F64, |a| a.trunc();
    f64_nearest: pop_f64 -> F64, |a| a.round_ties_even();
    f64_sqrt: pop_f64 -> F64, |a| a.sqrt();
}
