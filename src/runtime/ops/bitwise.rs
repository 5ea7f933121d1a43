//! Bitwise and bit-counting instructions
//!
//! Shift and rotate counts are taken modulo the operand width.

use super::{Stack, Trap, Value};

macro_rules! bitop {
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

macro_rules! countop {
    ($($name:ident: $pop:ident -> $variant:ident, $method:ident;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let a = stack.$pop()?;
                stack.push(Value::$variant(a.$method() as _));
                Ok(())
            }
        )*
    };
}

bitop! {
    i32_and: pop_i32 -> I32, |a, b| a & b;
    i32_or: pop_i32 -> I32, |a, b| a | b;
    i32_xor: pop_i32 -> I32, |a, b| a ^ b;
    i32_shl: pop_i32 -> I32, |a, b| a.wrapping_shl(b as u32);
    i32_shr_s: pop_i32 -> I32, |a, b| a.wrapping_shr(b as u32);
    i32_shr_u: pop_i32 -> I32, |a, b| (a as u32).wrapping_shr(b as u32) as i32;
    i32_rotl: pop_i32 -> I32, |a, b| a.rotate_left(b as u32 % 32);
    i32_rotr: pop_i32 -> I32, |a, b| a.rotate_right(b as u32 % 32);
    i64_and: pop_i64 -> I64, |a, b| a & b;
    i64_or: pop_i64 -> I64, |a, b| a | b;
    i64_xor: pop_i64 -> I64, |a, b| a ^ b;
    i64_shl: pop_i64 -> I64, |a, b| a.wrapping_shl(b as u32);
    i64_shr_s: pop_i64 -> I64, |a, b| a.wrapping_shr(b as u32);
    i64_shr_u: pop_i64 -> I64, |a, b| (a as u64).wrapping_shr(b as u32) as i64;
    i64_rotl: pop_i64 -> I64, |a, b| a.rotate_left((b as u64 % 64) as u32);
    i64_rotr: pop_i64 -> I64, |a, b| a.rotate_right((b as u64 % 64) as u32);
}

countop! {
    i32_clz: pop_i32 -> I32, leading_zeros;
    i32_ctz: pop_i32 -> I32, trailing_zeros;
    i32_popcnt: pop_i32 -> I32, count_ones;
    i64_clz: pop_i64 -> I64, leading_zeros;
    i64_ctz: pop_i64 -> I64, trailing_zeros;
    i64_popcnt: pop_i64 -> I64, count_ones;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn run(op: fn(&mut Stack) -> Result<(), Trap>, args: &[Value]) -> Value {
        let mut stack = Stack::new();
        stack.push_all(args.iter().copied());
        op(&mut stack).unwrap();
        stack.pop().unwrap()
    }

    #[rstest]
    #[case(i32_shl, 1, 33, 2)]
    #[case(i32_shr_s, -8, 1, -4)]
    #[case(i32_shr_u, -8, 1, 0x7fff_fffc)]
    #[case(i32_rotl, 0x8000_0001u32 as i32, 1, 3)]
    #[case(i32_rotr, 1, 33, 0x8000_0000u32 as i32)]
    #[case(i32_and, 0b1100, 0b1010, 0b1000)]
    fn test_i32_bitops(
        #[case] op: fn(&mut Stack) -> Result<(), Trap>,
        #[case] a: i32,
        #[case] b: i32,
        #[case] expected: i32,
    ) {
        assert_eq!(run(op, &[Value::I32(a), Value::I32(b)]), Value::I32(expected));
    }

    #[test]
    fn test_i64_shift_counts_wrap() {
        assert_eq!(run(i64_shl, &[Value::I64(1), Value::I64(65)]), Value::I64(2));
        assert_eq!(run(i64_rotl, &[Value::I64(i64::MIN), Value::I64(-63)]), Value::I64(1));
        assert_eq!(run(i64_shr_u, &[Value::I64(-1), Value::I64(63)]), Value::I64(1));
    }

    #[test]
    fn test_counts() {
        assert_eq!(run(i32_clz, &[Value::I32(1)]), Value::I32(31));
        assert_eq!(run(i32_ctz, &[Value::I32(0)]), Value::I32(32));
        assert_eq!(run(i64_popcnt, &[Value::I64(-1)]), Value::I64(64));
        assert_eq!(run(i64_ctz, &[Value::I64(8)]), Value::I64(3));
    }
}
