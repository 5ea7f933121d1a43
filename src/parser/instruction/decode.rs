//! Instruction decoding from binary format

use super::{BlockType, InstructionKind, LoadOp, MemArg, NumericOp, StoreOp, PREFIX_FC};
use crate::error::CompileError;
use crate::parser::limits;
use crate::parser::module::ValueType;
use crate::parser::reader::Reader;
use crate::parser::AtOffset;

impl MemArg {
    pub fn decode(reader: &mut Reader) -> Result<Self, CompileError> {
        let align = reader.read_vu32().at(reader.pos())?;
        let offset = reader.read_vu32().at(reader.pos())?;
        Ok(MemArg { align, offset })
    }
}

impl BlockType {
    pub fn decode(reader: &mut Reader) -> Result<Self, CompileError> {
        let start = reader.pos();
        let byte = reader.peek_byte().ok_or(CompileError::UnexpectedEof { offset: start })?;
        if byte == 0x40 {
            reader.read_byte().at(start)?;
            return Ok(BlockType::Empty);
        }
        if ValueType::is_value_type_byte(byte) {
            reader.read_byte().at(start)?;
            return ValueType::decode(byte)
                .map(BlockType::Value)
                .map_err(|message| CompileError::malformed(start, message));
        }
        // a type index is encoded as a non-negative s33
        let index = reader.read_vs33().at(reader.pos())?;
        if index < 0 {
            return Err(CompileError::malformed(start, "invalid block type"));
        }
        Ok(BlockType::FuncType(index as u32))
    }
}

impl InstructionKind {
    /// Decode one instruction, with `reader` positioned on its opcode.
    pub fn decode(reader: &mut Reader) -> Result<Self, CompileError> {
        let start = reader.pos();
        let opcode = reader.read_byte().at(start)?;

        use InstructionKind::*;
        let kind = match opcode {
            0x00 => Unreachable,
            0x01 => Nop,
            0x02 => Block {
                block_type: BlockType::decode(reader)?,
            },
            0x03 => Loop {
                block_type: BlockType::decode(reader)?,
            },
            0x04 => If {
                block_type: BlockType::decode(reader)?,
            },
            0x05 => Else,
            0x0b => End,
            0x0c => Br {
                label_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x0d => BrIf {
                label_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x0e => {
                let count = reader.read_vu32().at(reader.pos())?;
                if count > limits::MAX_BR_TABLE_LABELS {
                    return Err(CompileError::unsupported(
                        start,
                        "br_table label count exceeds implementation limit",
                    ));
                }
                let mut labels = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    labels.push(reader.read_vu32().at(reader.pos())?);
                }
                let default = reader.read_vu32().at(reader.pos())?;
                BrTable { labels, default }
            }
            0x0f => Return,
            0x10 => Call {
                func_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x11 => {
                let type_idx = reader.read_vu32().at(reader.pos())?;
                let table_idx = reader.read_vu32().at(reader.pos())?;
                CallIndirect { type_idx, table_idx }
            }

            0xd0 => {
                let byte = reader.read_byte().at(reader.pos())?;
                if byte != 0x6f {
                    return Err(CompileError::unsupported(
                        start,
                        "only ref.null extern is supported",
                    ));
                }
                RefNull {
                    ref_type: ValueType::ExternRef,
                }
            }
            0xd1 => RefIsNull,

            0x1a => Drop,
            0x1b => Select,
            0x1c => {
                let count = reader.read_vu32().at(reader.pos())?;
                if count != 1 {
                    return Err(CompileError::invalid(start, "invalid result arity"));
                }
                let byte = reader.read_byte().at(reader.pos())?;
                let val_type =
                    ValueType::decode(byte).map_err(|message| CompileError::malformed(start, message))?;
                SelectTyped { val_type }
            }

            0x20 => LocalGet {
                local_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x21 => LocalSet {
                local_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x22 => LocalTee {
                local_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x23 => GlobalGet {
                global_idx: reader.read_vu32().at(reader.pos())?,
            },
            0x24 => GlobalSet {
                global_idx: reader.read_vu32().at(reader.pos())?,
            },

            0x28..=0x35 => match LoadOp::from_opcode(opcode) {
                Some(op) => Load {
                    op,
                    memarg: MemArg::decode(reader)?,
                },
                None => return Err(illegal_opcode(start, opcode)),
            },
            0x36..=0x3e => match StoreOp::from_opcode(opcode) {
                Some(op) => Store {
                    op,
                    memarg: MemArg::decode(reader)?,
                },
                None => return Err(illegal_opcode(start, opcode)),
            },
            0x3f | 0x40 => {
                let pos = reader.pos();
                if reader.read_byte().at(pos)? != 0x00 {
                    return Err(CompileError::malformed(pos, "zero byte expected"));
                }
                if opcode == 0x3f {
                    MemorySize
                } else {
                    MemoryGrow
                }
            }

            0x41 => I32Const {
                value: reader.read_vs32().at(reader.pos())?,
            },
            0x42 => I64Const {
                value: reader.read_vs64().at(reader.pos())?,
            },
            0x43 => F32Const {
                value: reader.read_f32().at(reader.pos())?,
            },
            0x44 => F64Const {
                value: reader.read_f64().at(reader.pos())?,
            },

            PREFIX_FC => {
                let sub = reader.read_vu32().at(reader.pos())?;
                match u16::try_from(sub)
                    .ok()
                    .filter(|sub| *sub <= 0xff)
                    .and_then(|sub| NumericOp::from_code(0xfc00 | sub))
                {
                    Some(op) => Numeric(op),
                    None => {
                        return Err(CompileError::unsupported(
                            start,
                            format!("unsupported instruction {PREFIX_FC:#04x} {sub}"),
                        ))
                    }
                }
            }
            0xfd => return Err(CompileError::unsupported(start, "SIMD instructions are not supported")),

            _ => match NumericOp::from_code(opcode as u16) {
                Some(op) => Numeric(op),
                None => return Err(illegal_opcode(start, opcode)),
            },
        };

        Ok(kind)
    }
}

fn illegal_opcode(offset: usize, opcode: u8) -> CompileError {
    CompileError::malformed(offset, format!("illegal opcode {opcode:#04x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<InstructionKind, CompileError> {
        let mut reader = Reader::new(bytes);
        InstructionKind::decode(&mut reader)
    }

    #[test]
    fn test_decode_block_types() {
        assert_eq!(
            decode(&[0x02, 0x40]).unwrap(),
            InstructionKind::Block {
                block_type: BlockType::Empty
            }
        );
        assert_eq!(
            decode(&[0x03, 0x7e]).unwrap(),
            InstructionKind::Loop {
                block_type: BlockType::Value(ValueType::I64)
            }
        );
        assert_eq!(
            decode(&[0x04, 0x02]).unwrap(),
            InstructionKind::If {
                block_type: BlockType::FuncType(2)
            }
        );
    }

    #[test]
    fn test_decode_memory_instructions() {
        assert_eq!(
            decode(&[0x2d, 0x00, 0x80, 0x20]).unwrap(),
            InstructionKind::Load {
                op: LoadOp::I32Load8U,
                memarg: MemArg { align: 0, offset: 0x1000 }
            }
        );
        assert_eq!(decode(&[0x40, 0x00]).unwrap(), InstructionKind::MemoryGrow);
        assert!(decode(&[0x3f, 0x01]).is_err());
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(
            decode(&[0x41, 0x7f]).unwrap(),
            InstructionKind::I32Const { value: -1 }
        );
        assert_eq!(
            decode(&[0x6a]).unwrap(),
            InstructionKind::Numeric(NumericOp::I32Add)
        );
        assert_eq!(
            decode(&[0xfc, 0x07]).unwrap(),
            InstructionKind::Numeric(NumericOp::I64TruncSatF64U)
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_unsupported() {
        assert!(matches!(
            decode(&[0x06]),
            Err(CompileError::Malformed { offset: 0, .. })
        ));
        assert!(matches!(
            decode(&[0xfd, 0x0c]),
            Err(CompileError::Unsupported { .. })
        ));
        assert!(matches!(
            decode(&[0xfc, 0x0a, 0x00, 0x00]),
            Err(CompileError::Unsupported { .. })
        ));
        assert!(matches!(
            decode(&[0x41]),
            Err(CompileError::UnexpectedEof { .. })
        ));
    }
}
