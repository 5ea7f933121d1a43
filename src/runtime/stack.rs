//! Operand stack of the interpreter

use super::trap::Trap;
use super::value::Value;
use crate::parser::module::ValueType;

/// Validation rules out every case in which these fire, so they only
/// signal an interpreter bug.
fn underflow() -> Trap {
    Trap::new("value stack underflow")
}

fn type_mismatch(expected: ValueType, actual: ValueType) -> Trap {
    Trap::new(format!("value stack type mismatch: expected {expected}, got {actual}"))
}

#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    pub fn pop(&mut self) -> Result<Value, Trap> {
        self.values.pop().ok_or_else(underflow)
    }

    /// Pop a value and check its type
    pub fn pop_typed(&mut self, expected_type: ValueType) -> Result<Value, Trap> {
        let value = self.pop()?;
        if value.ty() != expected_type {
            return Err(type_mismatch(expected_type, value.ty()));
        }
        Ok(value)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(type_mismatch(ValueType::I32, other.ty())),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            other => Err(type_mismatch(ValueType::I64, other.ty())),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, Trap> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            other => Err(type_mismatch(ValueType::F32, other.ty())),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, Trap> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            other => Err(type_mismatch(ValueType::F64, other.ty())),
        }
    }

    /// Pop the top `count` values, preserving their order.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, Trap> {
        let start = self.values.len().checked_sub(count).ok_or_else(underflow)?;
        Ok(self.values.split_off(start))
    }

    /// Drop everything above `height` except the top `arity` values.
    pub fn unwind(&mut self, height: usize, arity: usize) -> Result<(), Trap> {
        let kept = self.pop_n(arity)?;
        if self.values.len() < height {
            return Err(underflow());
        }
        self.values.truncate(height);
        self.values.extend(kept);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }
}
