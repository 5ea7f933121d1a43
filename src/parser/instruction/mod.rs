//! WebAssembly instruction representation
//!
//! Control, variable and memory instructions get their own variants. The
//! numeric instructions are described by a single opcode table that also
//! records each instruction's operand and result types, which the validator
//! and the interpreter both read from.

pub mod decode;

use super::module::ValueType;
use fhex::ToHex;
use std::fmt;

/// Memory argument for memory access instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// Memory alignment (as power of 2)
    pub align: u32,
    pub offset: u32,
}

/// Block type for structured control instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    /// Function type index for multi-value blocks
    FuncType(u32),
}

/// A decoded instruction and the absolute offset of its opcode in the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub offset: usize,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    // Control instructions
    Unreachable,
    Nop,
    Block { block_type: BlockType },
    Loop { block_type: BlockType },
    If { block_type: BlockType },
    Else,
    End,
    Br { label_idx: u32 },
    BrIf { label_idx: u32 },
    BrTable { labels: Vec<u32>, default: u32 },
    Return,
    Call { func_idx: u32 },
    CallIndirect { type_idx: u32, table_idx: u32 },

    // Reference instructions
    RefNull { ref_type: ValueType },
    RefIsNull,

    // Parametric instructions
    Drop,
    Select,
    SelectTyped { val_type: ValueType },

    // Variable instructions
    LocalGet { local_idx: u32 },
    LocalSet { local_idx: u32 },
    LocalTee { local_idx: u32 },
    GlobalGet { global_idx: u32 },
    GlobalSet { global_idx: u32 },

    // Memory instructions
    Load { op: LoadOp, memarg: MemArg },
    Store { op: StoreOp, memarg: MemArg },
    MemorySize,
    MemoryGrow,

    // Numeric instructions
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { value: f32 },
    F64Const { value: f64 },
    Numeric(NumericOp),
}

impl InstructionKind {
    pub fn mnemonic(&self) -> &'static str {
        use InstructionKind::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block { .. } => "block",
            Loop { .. } => "loop",
            If { .. } => "if",
            Else => "else",
            End => "end",
            Br { .. } => "br",
            BrIf { .. } => "br_if",
            BrTable { .. } => "br_table",
            Return => "return",
            Call { .. } => "call",
            CallIndirect { .. } => "call_indirect",
            RefNull { .. } => "ref.null",
            RefIsNull => "ref.is_null",
            Drop => "drop",
            Select | SelectTyped { .. } => "select",
            LocalGet { .. } => "local.get",
            LocalSet { .. } => "local.set",
            LocalTee { .. } => "local.tee",
            GlobalGet { .. } => "global.get",
            GlobalSet { .. } => "global.set",
            Load { op, .. } => op.name(),
            Store { op, .. } => op.name(),
            MemorySize => "memory.size",
            MemoryGrow => "memory.grow",
            I32Const { .. } => "i32.const",
            I64Const { .. } => "i64.const",
            F32Const { .. } => "f32.const",
            F64Const { .. } => "f64.const",
            Numeric(op) => op.name(),
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InstructionKind::*;

        write!(f, "{}", self.mnemonic())?;

        match self {
            Block { block_type } | Loop { block_type } | If { block_type } => {
                write!(f, "{block_type}")
            }
            Br { label_idx } | BrIf { label_idx } => write!(f, " {label_idx}"),
            BrTable { labels, default } => {
                for label in labels {
                    write!(f, " {label}")?;
                }
                write!(f, " {default}")
            }
            Call { func_idx } => write!(f, " {func_idx}"),
            CallIndirect { type_idx, table_idx } => write!(f, " {table_idx} (type {type_idx})"),
            RefNull { .. } => write!(f, " extern"),
            SelectTyped { val_type } => write!(f, " {val_type}"),
            LocalGet { local_idx } | LocalSet { local_idx } | LocalTee { local_idx } => {
                write!(f, " {local_idx}")
            }
            GlobalGet { global_idx } | GlobalSet { global_idx } => write!(f, " {global_idx}"),
            Load { memarg, .. } | Store { memarg, .. } => {
                write!(f, " {} {}", memarg.align, memarg.offset)
            }
            I32Const { value } => write!(f, " {value}"),
            I64Const { value } => write!(f, " {value}"),
            F32Const { value } => write!(f, " {}", value.to_hex()),
            F64Const { value } => write!(f, " {}", value.to_hex()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::Empty => Ok(()),
            BlockType::Value(vt) => write!(f, " {vt}"),
            BlockType::FuncType(idx) => write!(f, " type[{idx}]"),
        }
    }
}

/// Prefix byte for the saturating truncation instructions.
pub const PREFIX_FC: u8 = 0xfc;

macro_rules! numeric_ops {
    ($($name:ident = $code:literal, $text:literal, [$($param:ident),*] -> $result:ident;)*) => {
        /// A numeric instruction. Codes above 0xff are `0xfc`-prefixed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NumericOp {
            $($name,)*
        }

        impl NumericOp {
            pub fn from_code(code: u16) -> Option<NumericOp> {
                match code {
                    $($code => Some(NumericOp::$name),)*
                    _ => None,
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(NumericOp::$name => $text,)*
                }
            }

            pub fn params(&self) -> &'static [ValueType] {
                match self {
                    $(NumericOp::$name => &[$(ValueType::$param),*],)*
                }
            }

            pub fn result(&self) -> ValueType {
                match self {
                    $(NumericOp::$name => ValueType::$result,)*
                }
            }
        }
    };
}

numeric_ops! {
    I32Eqz = 0x45, "i32.eqz", [I32] -> I32;
    I32Eq = 0x46, "i32.eq", [I32, I32] -> I32;
    I32Ne = 0x47, "i32.ne", [I32, I32] -> I32;
    I32LtS = 0x48, "i32.lt_s", [I32, I32] -> I32;
    I32LtU = 0x49, "i32.lt_u", [I32, I32] -> I32;
    I32GtS = 0x4a, "i32.gt_s", [I32, I32] -> I32;
    I32GtU = 0x4b, "i32.gt_u", [I32, I32] -> I32;
    I32LeS = 0x4c, "i32.le_s", [I32, I32] -> I32;
    I32LeU = 0x4d, "i32.le_u", [I32, I32] -> I32;
    I32GeS = 0x4e, "i32.ge_s", [I32, I32] -> I32;
    I32GeU = 0x4f, "i32.ge_u", [I32, I32] -> I32;

    I64Eqz = 0x50, "i64.eqz", [I64] -> I32;
    I64Eq = 0x51, "i64.eq", [I64, I64] -> I32;
    I64Ne = 0x52, "i64.ne", [I64, I64] -> I32;
    I64LtS = 0x53, "i64.lt_s", [I64, I64] -> I32;
    I64LtU = 0x54, "i64.lt_u", [I64, I64] -> I32;
    I64GtS = 0x55, "i64.gt_s", [I64, I64] -> I32;
    I64GtU = 0x56, "i64.gt_u", [I64, I64] -> I32;
    I64LeS = 0x57, "i64.le_s", [I64, I64] -> I32;
    I64LeU = 0x58, "i64.le_u", [I64, I64] -> I32;
    I64GeS = 0x59, "i64.ge_s", [I64, I64] -> I32;
    I64GeU = 0x5a, "i64.ge_u", [I64, I64] -> I32;

    F32Eq = 0x5b, "f32.eq", [F32, F32] -> I32;
    F32Ne = 0x5c, "f32.ne", [F32, F32] -> I32;
    F32Lt = 0x5d, "f32.lt", [F32, F32] -> I32;
    F32Gt = 0x5e, "f32.gt", [F32, F32] -> I32;
    F32Le = 0x5f, "f32.le", [F32, F32] -> I32;
    F32Ge = 0x60, "f32.ge", [F32, F32] -> I32;

    F64Eq = 0x61, "f64.eq", [F64, F64] -> I32;
    F64Ne = 0x62, "f64.ne", [F64, F64] -> I32;
    F64Lt = 0x63, "f64.lt", [F64, F64] -> I32;
    F64Gt = 0x64, "f64.gt", [F64, F64] -> I32;
    F64Le = 0x65, "f64.le", [F64, F64] -> I32;
    F64Ge = 0x66, "f64.ge", [F64, F64] -> I32;

    I32Clz = 0x67, "i32.clz", [I32] -> I32;
    I32Ctz = 0x68, "i32.ctz", [I32] -> I32;
    I32Popcnt = 0x69, "i32.popcnt", [I32] -> I32;
    I32Add = 0x6a, "i32.add", [I32, I32] -> I32;
    I32Sub = 0x6b, "i32.sub", [I32, I32] -> I32;
    I32Mul = 0x6c, "i32.mul", [I32, I32] -> I32;
    I32DivS = 0x6d, "i32.div_s", [I32, I32] -> I32;
    I32DivU = 0x6e, "i32.div_u", [I32, I32] -> I32;
    I32RemS = 0x6f, "i32.rem_s", [I32, I32] -> I32;
    I32RemU = 0x70, "i32.rem_u", [I32, I32] -> I32;
    I32And = 0x71, "i32.and", [I32, I32] -> I32;
    I32Or = 0x72, "i32.or", [I32, I32] -> I32;
    I32Xor = 0x73, "i32.xor", [I32, I32] -> I32;
    I32Shl = 0x74, "i32.shl", [I32, I32] -> I32;
    I32ShrS = 0x75, "i32.shr_s", [I32, I32] -> I32;
    I32ShrU = 0x76, "i32.shr_u", [I32, I32] -> I32;
    I32Rotl = 0x77, "i32.rotl", [I32, I32] -> I32;
    I32Rotr = 0x78, "i32.rotr", [I32, I32] -> I32;

    I64Clz = 0x79, "i64.clz", [I64] -> I64;
    I64Ctz = 0x7a, "i64.ctz", [I64] -> I64;
    I64Popcnt = 0x7b, "i64.popcnt", [I64] -> I64;
    I64Add = 0x7c, "i64.add", [I64, I64] -> I64;
    I64Sub = 0x7d, "i64.sub", [I64, I64] -> I64;
    I64Mul = 0x7e, "i64.mul", [I64, I64] -> I64;
    I64DivS = 0x7f, "i64.div_s", [I64, I64] -> I64;
    I64DivU = 0x80, "i64.div_u", [I64, I64] -> I64;
    I64RemS = 0x81, "i64.rem_s", [I64, I64] -> I64;
    I64RemU = 0x82, "i64.rem_u", [I64, I64] -> I64;
    I64And = 0x83, "i64.and", [I64, I64] -> I64;
    I64Or = 0x84, "i64.or", [I64, I64] -> I64;
    I64Xor = 0x85, "i64.xor", [I64, I64] -> I64;
    I64Shl = 0x86, "i64.shl", [I64, I64] -> I64;
    I64ShrS = 0x87, "i64.shr_s", [I64, I64] -> I64;
    I64ShrU = 0x88, "i64.shr_u", [I64, I64] -> I64;
    I64Rotl = 0x89, "i64.rotl", [I64, I64] -> I64;
    I64Rotr = 0x8a, "i64.rotr", [I64, I64] -> I64;

    F32Abs = 0x8b, "f32.abs", [F32] -> F32;
    F32Neg = 0x8c, "f32.neg", [F32] -> F32;
    F32Ceil = 0x8d, "f32.ceil", [F32] -> F32;
    F32Floor = 0x8e, "f32.floor", [F32] -> F32;
    F32Trunc = 0x8f, "f32.trunc", [F32] -> F32;
    F32Nearest = 0x90, "f32.nearest", [F32] -> F32;
    F32Sqrt = 0x91, "f32.sqrt", [F32] -> F32;
    F32Add = 0x92, "f32.add", [F32, F32] -> F32;
    F32Sub = 0x93, "f32.sub", [F32, F32] -> F32;
    F32Mul = 0x94, "f32.mul", [F32, F32] -> F32;
    F32Div = 0x95, "f32.div", [F32, F32] -> F32;
    F32Min = 0x96, "f32.min", [F32, F32] -> F32;
    F32Max = 0x97, "f32.max", [F32, F32] -> F32;
    F32Copysign = 0x98, "f32.copysign", [F32, F32] -> F32;

    F64Abs = 0x99, "f64.abs", [F64] -> F64;
    F64Neg = 0x9a, "f64.neg", [F64] -> F64;
    F64Ceil = 0x9b, "f64.ceil", [F64] -> F64;
    F64Floor = 0x9c, "f64.floor", [F64] -> F64;
    F64Trunc = 0x9d, "f64.trunc", [F64] -> F64;
    F64Nearest = 0x9e, "f64.nearest", [F64] -> F64;
    F64Sqrt = 0x9f, "f64.sqrt", [F64] -> F64;
    F64Add = 0xa0, "f64.add", [F64, F64] -> F64;
    F64Sub = 0xa1, "f64.sub", [F64, F64] -> F64;
    F64Mul = 0xa2, "f64.mul", [F64, F64] -> F64;
    F64Div = 0xa3, "f64.div", [F64, F64] -> F64;
    F64Min = 0xa4, "f64.min", [F64, F64] -> F64;
    F64Max = 0xa5, "f64.max", [F64, F64] -> F64;
    F64Copysign = 0xa6, "f64.copysign", [F64, F64] -> F64;

    I32WrapI64 = 0xa7, "i32.wrap_i64", [I64] -> I32;
    I32TruncF32S = 0xa8, "i32.trunc_f32_s", [F32] -> I32;
    I32TruncF32U = 0xa9, "i32.trunc_f32_u", [F32] -> I32;
    I32TruncF64S = 0xaa, "i32.trunc_f64_s", [F64] -> I32;
    I32TruncF64U = 0xab, "i32.trunc_f64_u", [F64] -> I32;
    I64ExtendI32S = 0xac, "i64.extend_i32_s", [I32] -> I64;
    I64ExtendI32U = 0xad, "i64.extend_i32_u", [I32] -> I64;
    I64TruncF32S = 0xae, "i64.trunc_f32_s", [F32] -> I64;
    I64TruncF32U = 0xaf, "i64.trunc_f32_u", [F32] -> I64;
    I64TruncF64S = 0xb0, "i64.trunc_f64_s", [F64] -> I64;
    I64TruncF64U = 0xb1, "i64.trunc_f64_u", [F64] -> I64;
    F32ConvertI32S = 0xb2, "f32.convert_i32_s", [I32] -> F32;
    F32ConvertI32U = 0xb3, "f32.convert_i32_u", [I32] -> F32;
    F32ConvertI64S = 0xb4, "f32.convert_i64_s", [I64] -> F32;
    F32ConvertI64U = 0xb5, "f32.convert_i64_u", [I64] -> F32;
    F32DemoteF64 = 0xb6, "f32.demote_f64", [F64] -> F32;
    F64ConvertI32S = 0xb7, "f64.convert_i32_s", [I32] -> F64;
    F64ConvertI32U = 0xb8, "f64.convert_i32_u", [I32] -> F64;
    F64ConvertI64S = 0xb9, "f64.convert_i64_s", [I64] -> F64;
    F64ConvertI64U = 0xba, "f64.convert_i64_u", [I64] -> F64;
    F64PromoteF32 = 0xbb, "f64.promote_f32", [F32] -> F64;
    I32ReinterpretF32 = 0xbc, "i32.reinterpret_f32", [F32] -> I32;
    I64ReinterpretF64 = 0xbd, "i64.reinterpret_f64", [F64] -> I64;
    F32ReinterpretI32 = 0xbe, "f32.reinterpret_i32", [I32] -> F32;
    F64ReinterpretI64 = 0xbf, "f64.reinterpret_i64", [I64] -> F64;

    I32Extend8S = 0xc0, "i32.extend8_s", [I32] -> I32;
    I32Extend16S = 0xc1, "i32.extend16_s", [I32] -> I32;
    I64Extend8S = 0xc2, "i64.extend8_s", [I64] -> I64;
    I64Extend16S = 0xc3, "i64.extend16_s", [I64] -> I64;
    I64Extend32S = 0xc4, "i64.extend32_s", [I64] -> I64;

    I32TruncSatF32S = 0xfc00, "i32.trunc_sat_f32_s", [F32] -> I32;
    I32TruncSatF32U = 0xfc01, "i32.trunc_sat_f32_u", [F32] -> I32;
    I32TruncSatF64S = 0xfc02, "i32.trunc_sat_f64_s", [F64] -> I32;
    I32TruncSatF64U = 0xfc03, "i32.trunc_sat_f64_u", [F64] -> I32;
    I64TruncSatF32S = 0xfc04, "i64.trunc_sat_f32_s", [F32] -> I64;
    I64TruncSatF32U = 0xfc05, "i64.trunc_sat_f32_u", [F32] -> I64;
    I64TruncSatF64S = 0xfc06, "i64.trunc_sat_f64_s", [F64] -> I64;
    I64TruncSatF64U = 0xfc07, "i64.trunc_sat_f64_u", [F64] -> I64;
}

macro_rules! memory_ops {
    ($op:ident { $($name:ident = $code:literal, $text:literal, $ty:ident, $width:literal;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $op {
            $($name,)*
        }

        impl $op {
            pub fn from_opcode(opcode: u8) -> Option<$op> {
                match opcode {
                    $($code => Some($op::$name),)*
                    _ => None,
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $($op::$name => $text,)*
                }
            }

            /// Type of the value loaded or stored.
            pub fn value_type(&self) -> ValueType {
                match self {
                    $($op::$name => ValueType::$ty,)*
                }
            }

            /// Number of bytes accessed in memory.
            pub fn width(&self) -> u32 {
                match self {
                    $($op::$name => $width,)*
                }
            }

            /// Largest alignment exponent the instruction may declare.
            pub fn max_align(&self) -> u32 {
                self.width().trailing_zeros()
            }
        }
    };
}

memory_ops!(LoadOp {
    I32Load = 0x28, "i32.load", I32, 4;
    I64Load = 0x29, "i64.load", I64, 8;
    F32Load = 0x2a, "f32.load", F32, 4;
    F64Load = 0x2b, "f64.load", F64, 8;
    I32Load8S = 0x2c, "i32.load8_s", I32, 1;
    I32Load8U = 0x2d, "i32.load8_u", I32, 1;
    I32Load16S = 0x2e, "i32.load16_s", I32, 2;
    I32Load16U = 0x2f, "i32.load16_u", I32, 2;
    I64Load8S = 0x30, "i64.load8_s", I64, 1;
    I64Load8U = 0x31, "i64.load8_u", I64, 1;
    I64Load16S = 0x32, "i64.load16_s", I64, 2;
    I64Load16U = 0x33, "i64.load16_u", I64, 2;
    I64Load32S = 0x34, "i64.load32_s", I64, 4;
    I64Load32U = 0x35, "i64.load32_u", I64, 4;
});

memory_ops!(StoreOp {
    I32Store = 0x36, "i32.store", I32, 4;
    I64Store = 0x37, "i64.store", I64, 8;
    F32Store = 0x38, "f32.store", F32, 4;
    F64Store = 0x39, "f64.store", F64, 8;
    I32Store8 = 0x3a, "i32.store8", I32, 1;
    I32Store16 = 0x3b, "i32.store16", I32, 2;
    I64Store8 = 0x3c, "i64.store8", I64, 1;
    I64Store16 = 0x3d, "i64.store16", I64, 2;
    I64Store32 = 0x3e, "i64.store32", I64, 4;
});

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x45, "i32.eqz", &[ValueType::I32], ValueType::I32)]
    #[case(0x5d, "f32.lt", &[ValueType::F32, ValueType::F32], ValueType::I32)]
    #[case(0x7f, "i64.div_s", &[ValueType::I64, ValueType::I64], ValueType::I64)]
    #[case(0xb6, "f32.demote_f64", &[ValueType::F64], ValueType::F32)]
    #[case(0xfc05, "i64.trunc_sat_f32_u", &[ValueType::F32], ValueType::I64)]
    fn test_numeric_table(
        #[case] code: u16,
        #[case] name: &str,
        #[case] params: &[ValueType],
        #[case] result: ValueType,
    ) {
        let op = NumericOp::from_code(code).unwrap();
        assert_eq!(op.name(), name);
        assert_eq!(op.params(), params);
        assert_eq!(op.result(), result);
    }

    #[test]
    fn test_numeric_table_gaps() {
        assert_eq!(NumericOp::from_code(0x44), None);
        assert_eq!(NumericOp::from_code(0xc5), None);
        assert_eq!(NumericOp::from_code(0xfc08), None);
    }

    #[test]
    fn test_memory_ops() {
        let load = LoadOp::from_opcode(0x33).unwrap();
        assert_eq!(load, LoadOp::I64Load16U);
        assert_eq!(load.width(), 2);
        assert_eq!(load.max_align(), 1);
        assert_eq!(load.value_type(), ValueType::I64);

        let store = StoreOp::from_opcode(0x39).unwrap();
        assert_eq!(store.name(), "f64.store");
        assert_eq!(store.max_align(), 3);
        assert_eq!(StoreOp::from_opcode(0x3f), None);
    }

    #[test]
    fn test_display() {
        let kind = InstructionKind::Load {
            op: LoadOp::I32Load8U,
            memarg: MemArg { align: 0, offset: 16 },
        };
        assert_eq!(kind.to_string(), "i32.load8_u 0 16");
        assert_eq!(InstructionKind::I32Const { value: -7 }.to_string(), "i32.const -7");
        assert_eq!(
            InstructionKind::Block {
                block_type: BlockType::Value(ValueType::I64)
            }
            .to_string(),
            "block i64"
        );
        assert_eq!(InstructionKind::Numeric(NumericOp::F64Sqrt).to_string(), "f64.sqrt");
    }
}
