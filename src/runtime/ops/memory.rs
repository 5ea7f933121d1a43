//! Memory instructions
//!
//! The address operand is an unsigned i32; the effective address is that
//! plus the static offset, computed without wrapping. Values are stored
//! little-endian.

use super::{LinearMemory, MemArg, Stack, Trap, Value};
use crate::parser::instruction::{LoadOp, StoreOp};

/// Pop an address, read the accessed bytes, and push the extended value.
pub fn load(stack: &mut Stack, memory: &LinearMemory, op: LoadOp, memarg: MemArg) -> Result<(), Trap> {
    let addr = stack.pop_i32()? as u32;
    let offset = memarg.offset;

    let value = match op {
        LoadOp::I32Load => Value::I32(i32::from_le_bytes(memory.load(addr, offset)?)),
        LoadOp::I64Load => Value::I64(i64::from_le_bytes(memory.load(addr, offset)?)),
        LoadOp::F32Load => Value::F32(f32::from_le_bytes(memory.load(addr, offset)?)),
        LoadOp::F64Load => Value::F64(f64::from_le_bytes(memory.load(addr, offset)?)),
        LoadOp::I32Load8S => Value::I32(i8::from_le_bytes(memory.load(addr, offset)?) as i32),
        LoadOp::I32Load8U => Value::I32(u8::from_le_bytes(memory.load(addr, offset)?) as i32),
        LoadOp::I32Load16S => Value::I32(i16::from_le_bytes(memory.load(addr, offset)?) as i32),
        LoadOp::I32Load16U => Value::I32(u16::from_le_bytes(memory.load(addr, offset)?) as i32),
        LoadOp::I64Load8S => Value::I64(i8::from_le_bytes(memory.load(addr, offset)?) as i64),
        LoadOp::I64Load8U => Value::I64(u8::from_le_bytes(memory.load(addr, offset)?) as i64),
        LoadOp::I64Load16S => Value::I64(i16::from_le_bytes(memory.load(addr, offset)?) as i64),
        LoadOp::I64Load16U => Value::I64(u16::from_le_bytes(memory.load(addr, offset)?) as i64),
        LoadOp::I64Load32S => Value::I64(i32::from_le_bytes(memory.load(addr, offset)?) as i64),
        LoadOp::I64Load32U => Value::I64(u32::from_le_bytes(memory.load(addr, offset)?) as i64),
    };
    stack.push(value);
    Ok(())
}

/// Pop a value and an address, and write the value's low bytes.
pub fn store(stack: &mut Stack, memory: &mut LinearMemory, op: StoreOp, memarg: MemArg) -> Result<(), Trap> {
    let value = stack.pop_typed(op.value_type())?;
    let addr = stack.pop_i32()? as u32;
    let offset = memarg.offset;

    match (op, value) {
        (StoreOp::I32Store, Value::I32(v)) => memory.store(addr, offset, v.to_le_bytes()),
        (StoreOp::I64Store, Value::I64(v)) => memory.store(addr, offset, v.to_le_bytes()),
        (StoreOp::F32Store, Value::F32(v)) => memory.store(addr, offset, v.to_le_bytes()),
        (StoreOp::F64Store, Value::F64(v)) => memory.store(addr, offset, v.to_le_bytes()),
        (StoreOp::I32Store8, Value::I32(v)) => memory.store(addr, offset, (v as u8).to_le_bytes()),
        (StoreOp::I32Store16, Value::I32(v)) => memory.store(addr, offset, (v as u16).to_le_bytes()),
        (StoreOp::I64Store8, Value::I64(v)) => memory.store(addr, offset, (v as u8).to_le_bytes()),
        (StoreOp::I64Store16, Value::I64(v)) => memory.store(addr, offset, (v as u16).to_le_bytes()),
        (StoreOp::I64Store32, Value::I64(v)) => memory.store(addr, offset, (v as u32).to_le_bytes()),
        (op, value) => Err(Trap::new(format!("{} cannot store {value}", op.name()))),
    }
}

/// memory.size: push the current size in pages.
pub fn size(stack: &mut Stack, memory: &LinearMemory) -> Result<(), Trap> {
    stack.push(Value::I32(memory.size() as i32));
    Ok(())
}

/// memory.grow: push the previous size in pages, or -1 if the memory
/// cannot grow by the requested amount.
pub fn grow(stack: &mut Stack, memory: &mut LinearMemory) -> Result<(), Trap> {
    let delta = stack.pop_i32()? as u32;
    let result = match memory.grow(delta) {
        Ok(previous) => previous as i32,
        Err(_) => -1,
    };
    stack.push(Value::I32(result));
    Ok(())
}
