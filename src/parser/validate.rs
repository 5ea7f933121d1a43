//! Operand-stack validation of function bodies
//!
//! The standard WebAssembly validation algorithm: a value stack of
//! possibly-unknown types and a stack of control frames, each remembering
//! the value stack height at entry and whether the rest of the frame is
//! unreachable.

use super::instruction::{BlockType, InstructionKind, MemArg};
use super::module::{FunctionType, GlobalType, ValueType};
use thiserror::Error;
use MaybeValue::{Unknown, Val};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type mismatch")]
    TypeMismatch,

    #[error("unknown type")]
    UnknownType,

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("unknown local {0}")]
    UnknownLocal(u32),

    #[error("unknown global {0}")]
    UnknownGlobal(u32),

    #[error("global is immutable")]
    ImmutableGlobal,

    #[error("unknown label")]
    UnknownLabel,

    #[error("unknown memory")]
    UnknownMemory,

    #[error("unknown table")]
    UnknownTable,

    #[error("else without matching if")]
    UnexpectedElse,

    #[error("unexpected end")]
    UnexpectedEnd,

    #[error("instructions after the final end")]
    TrailingInstructions,

    #[error("alignment must not be larger than natural")]
    BadAlignment,
}

/// What a function body may refer to in its module.
pub struct ModuleContext<'a> {
    pub types: &'a [FunctionType],
    /// Type index of every function in the function index space.
    pub func_types: &'a [u32],
    pub globals: &'a [GlobalType],
    pub has_memory: bool,
    pub has_table: bool,
}

impl ModuleContext<'_> {
    pub fn block_signature(&self, block_type: BlockType) -> Result<(Vec<ValueType>, Vec<ValueType>), ValidationError> {
        match block_type {
            BlockType::Empty => Ok((vec![], vec![])),
            BlockType::Value(value_type) => Ok((vec![], vec![value_type])),
            BlockType::FuncType(index) => self
                .types
                .get(index as usize)
                .map(|ty| (ty.parameters.clone(), ty.return_types.clone()))
                .ok_or(ValidationError::UnknownType),
        }
    }

    fn function_type(&self, func_index: u32) -> Result<&FunctionType, ValidationError> {
        self.func_types
            .get(func_index as usize)
            .and_then(|type_index| self.types.get(*type_index as usize))
            .ok_or(ValidationError::UnknownFunction(func_index))
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum MaybeValue {
    Val(ValueType),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Clone)]
struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

pub struct CodeValidator<'a> {
    context: &'a ModuleContext<'a>,
    locals: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
    ended: bool,
}

impl<'a> CodeValidator<'a> {
    /// `locals` holds the parameters followed by the declared locals.
    pub fn new(
        context: &'a ModuleContext<'a>,
        function_type: &FunctionType,
        locals: Vec<ValueType>,
    ) -> CodeValidator<'a> {
        let mut validator = CodeValidator {
            context,
            locals,
            vals: vec![],
            ctrls: vec![],
            ended: false,
        };
        // parameters live in locals, so the function frame starts empty
        validator.push_ctrl(FrameKind::Function, vec![], function_type.return_types.clone());
        validator
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    fn push_val(&mut self, val_type: MaybeValue) {
        self.vals.push(val_type);
    }

    fn pop_val(&mut self) -> Result<MaybeValue, ValidationError> {
        let frame = self.ctrls.last().ok_or(ValidationError::UnexpectedEnd)?;
        if self.vals.len() == frame.height {
            if frame.unreachable {
                return Ok(Unknown);
            }
            return Err(ValidationError::TypeMismatch);
        }
        self.vals.pop().ok_or(ValidationError::TypeMismatch)
    }

    fn pop_expected(&mut self, expected: ValueType) -> Result<MaybeValue, ValidationError> {
        let popped = self.pop_val()?;
        match popped {
            Val(actual) if actual != expected => Err(ValidationError::TypeMismatch),
            _ => Ok(popped),
        }
    }

    fn pop_expecteds(&mut self, expected: &[ValueType]) -> Result<(), ValidationError> {
        for val_type in expected.iter().rev() {
            self.pop_expected(*val_type)?;
        }
        Ok(())
    }

    fn push_types(&mut self, types: &[ValueType]) {
        for val_type in types {
            self.push_val(Val(*val_type));
        }
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: Vec<ValueType>, end_types: Vec<ValueType>) {
        let height = self.vals.len();
        self.push_types(&start_types);
        self.ctrls.push(CtrlFrame {
            kind,
            start_types,
            end_types,
            height,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> Result<CtrlFrame, ValidationError> {
        let end_types = self.ctrls.last().ok_or(ValidationError::UnexpectedEnd)?.end_types.clone();
        self.pop_expecteds(&end_types)?;
        let frame = self.ctrls.pop().ok_or(ValidationError::UnexpectedEnd)?;
        if self.vals.len() != frame.height {
            return Err(ValidationError::TypeMismatch);
        }
        Ok(frame)
    }

    fn label_types(&self, label: u32) -> Result<Vec<ValueType>, ValidationError> {
        let index = self
            .ctrls
            .len()
            .checked_sub(label as usize + 1)
            .ok_or(ValidationError::UnknownLabel)?;
        let frame = &self.ctrls[index];
        Ok(if frame.kind == FrameKind::Loop {
            frame.start_types.clone()
        } else {
            frame.end_types.clone()
        })
    }

    fn unreachable(&mut self) -> Result<(), ValidationError> {
        let frame = self.ctrls.last_mut().ok_or(ValidationError::UnexpectedEnd)?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    fn local(&self, local_index: u32) -> Result<ValueType, ValidationError> {
        self.locals
            .get(local_index as usize)
            .copied()
            .ok_or(ValidationError::UnknownLocal(local_index))
    }

    fn global(&self, global_index: u32) -> Result<GlobalType, ValidationError> {
        self.context
            .globals
            .get(global_index as usize)
            .copied()
            .ok_or(ValidationError::UnknownGlobal(global_index))
    }

    fn memory(&self, memarg: Option<(&MemArg, u32)>) -> Result<(), ValidationError> {
        if !self.context.has_memory {
            return Err(ValidationError::UnknownMemory);
        }
        if let Some((memarg, max_align)) = memarg {
            if memarg.align > max_align {
                return Err(ValidationError::BadAlignment);
            }
        }
        Ok(())
    }

    pub fn validate(&mut self, kind: &InstructionKind) -> Result<(), ValidationError> {
        use InstructionKind::*;

        if self.ended {
            return Err(ValidationError::TrailingInstructions);
        }

        match kind {
            Unreachable => self.unreachable(),
            Nop => Ok(()),

            Block { block_type } | Loop { block_type } => {
                let (params, results) = self.context.block_signature(*block_type)?;
                self.pop_expecteds(&params)?;
                let frame_kind = if matches!(kind, Loop { .. }) {
                    FrameKind::Loop
                } else {
                    FrameKind::Block
                };
                self.push_ctrl(frame_kind, params, results);
                Ok(())
            }

            If { block_type } => {
                let (params, results) = self.context.block_signature(*block_type)?;
                self.pop_expected(ValueType::I32)?;
                self.pop_expecteds(&params)?;
                self.push_ctrl(FrameKind::If, params, results);
                Ok(())
            }

            Else => {
                if self.ctrls.last().map(|frame| frame.kind) != Some(FrameKind::If) {
                    return Err(ValidationError::UnexpectedElse);
                }
                let frame = self.pop_ctrl()?;
                self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
                Ok(())
            }

            End => {
                let frame = self.pop_ctrl()?;
                // an if without else must leave its parameters as its results
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(ValidationError::TypeMismatch);
                }
                if frame.kind == FrameKind::Function {
                    self.ended = true;
                }
                self.push_types(&frame.end_types);
                Ok(())
            }

            Br { label_idx } => {
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.unreachable()
            }

            BrIf { label_idx } => {
                self.pop_expected(ValueType::I32)?;
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.push_types(&types);
                Ok(())
            }

            BrTable { labels, default } => {
                self.pop_expected(ValueType::I32)?;
                let default_types = self.label_types(*default)?;
                let arity = default_types.len();
                for label in labels {
                    let types = self.label_types(*label)?;
                    if types.len() != arity {
                        return Err(ValidationError::TypeMismatch);
                    }
                    // check without consuming, against possibly-unknown operands
                    let mut popped = Vec::with_capacity(arity);
                    for val_type in types.iter().rev() {
                        popped.push(self.pop_expected(*val_type)?);
                    }
                    for value in popped.into_iter().rev() {
                        self.push_val(value);
                    }
                }
                self.pop_expecteds(&default_types)?;
                self.unreachable()
            }

            Return => {
                let types = self
                    .ctrls
                    .first()
                    .ok_or(ValidationError::UnexpectedEnd)?
                    .end_types
                    .clone();
                self.pop_expecteds(&types)?;
                self.unreachable()
            }

            Call { func_idx } => {
                let function_type = self.context.function_type(*func_idx)?.clone();
                self.pop_expecteds(&function_type.parameters)?;
                self.push_types(&function_type.return_types);
                Ok(())
            }

            CallIndirect { type_idx, table_idx } => {
                if *table_idx != 0 || !self.context.has_table {
                    return Err(ValidationError::UnknownTable);
                }
                let function_type = self
                    .context
                    .types
                    .get(*type_idx as usize)
                    .ok_or(ValidationError::UnknownType)?
                    .clone();
                self.pop_expected(ValueType::I32)?;
                self.pop_expecteds(&function_type.parameters)?;
                self.push_types(&function_type.return_types);
                Ok(())
            }

            RefNull { ref_type } => {
                self.push_val(Val(*ref_type));
                Ok(())
            }

            RefIsNull => {
                match self.pop_val()? {
                    Val(ValueType::ExternRef) | Unknown => {}
                    Val(_) => return Err(ValidationError::TypeMismatch),
                }
                self.push_val(Val(ValueType::I32));
                Ok(())
            }

            Drop => self.pop_val().map(|_| ()),

            Select => {
                self.pop_expected(ValueType::I32)?;
                let first = self.pop_val()?;
                let second = self.pop_val()?;
                // untyped select only works on numeric operands
                if matches!(first, Val(ValueType::ExternRef)) || matches!(second, Val(ValueType::ExternRef)) {
                    return Err(ValidationError::TypeMismatch);
                }
                match (first, second) {
                    (Val(a), Val(b)) if a != b => Err(ValidationError::TypeMismatch),
                    (Unknown, value) => {
                        self.push_val(value);
                        Ok(())
                    }
                    (value, _) => {
                        self.push_val(value);
                        Ok(())
                    }
                }
            }

            SelectTyped { val_type } => {
                self.pop_expected(ValueType::I32)?;
                self.pop_expected(*val_type)?;
                self.pop_expected(*val_type)?;
                self.push_val(Val(*val_type));
                Ok(())
            }

            LocalGet { local_idx } => {
                let local = self.local(*local_idx)?;
                self.push_val(Val(local));
                Ok(())
            }

            LocalSet { local_idx } => {
                let local = self.local(*local_idx)?;
                self.pop_expected(local).map(|_| ())
            }

            LocalTee { local_idx } => {
                let local = self.local(*local_idx)?;
                self.pop_expected(local)?;
                self.push_val(Val(local));
                Ok(())
            }

            GlobalGet { global_idx } => {
                let global = self.global(*global_idx)?;
                self.push_val(Val(global.value_type));
                Ok(())
            }

            GlobalSet { global_idx } => {
                let global = self.global(*global_idx)?;
                if !global.mutable {
                    return Err(ValidationError::ImmutableGlobal);
                }
                self.pop_expected(global.value_type).map(|_| ())
            }

            Load { op, memarg } => {
                self.memory(Some((memarg, op.max_align())))?;
                self.pop_expected(ValueType::I32)?;
                self.push_val(Val(op.value_type()));
                Ok(())
            }

            Store { op, memarg } => {
                self.memory(Some((memarg, op.max_align())))?;
                self.pop_expected(op.value_type())?;
                self.pop_expected(ValueType::I32).map(|_| ())
            }

            MemorySize => {
                self.memory(None)?;
                self.push_val(Val(ValueType::I32));
                Ok(())
            }

            MemoryGrow => {
                self.memory(None)?;
                self.pop_expected(ValueType::I32)?;
                self.push_val(Val(ValueType::I32));
                Ok(())
            }

            I32Const { .. } => {
                self.push_val(Val(ValueType::I32));
                Ok(())
            }
            I64Const { .. } => {
                self.push_val(Val(ValueType::I64));
                Ok(())
            }
            F32Const { .. } => {
                self.push_val(Val(ValueType::F32));
                Ok(())
            }
            F64Const { .. } => {
                self.push_val(Val(ValueType::F64));
                Ok(())
            }

            Numeric(op) => {
                self.pop_expecteds(op.params())?;
                self.push_val(Val(op.result()));
                Ok(())
            }
        }
    }
}
