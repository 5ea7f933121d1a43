//! Structured representation of WebAssembly control flow
//!
//! Control instructions are encoded as a flat sequence in the binary format.
//! The builder below turns that sequence into a tree as it is decoded, so
//! the interpreter never has to scan forward for a matching `end`.

use super::instruction::{BlockType, Instruction, InstructionKind};
use std::fmt;
use std::io;

/// A structured instruction that makes control flow explicit
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredInstruction {
    /// Regular instruction (no nested body)
    Plain(Instruction),

    /// Branches to blocks go to the end
    Block {
        block_type: BlockType,
        body: Vec<StructuredInstruction>,
        offset: usize,
    },

    /// Branches to loops go to the beginning
    Loop {
        block_type: BlockType,
        body: Vec<StructuredInstruction>,
        offset: usize,
    },

    If {
        block_type: BlockType,
        then_branch: Vec<StructuredInstruction>,
        else_branch: Option<Vec<StructuredInstruction>>,
        offset: usize,
    },
}

impl StructuredInstruction {
    /// Absolute offset of the instruction's opcode in the binary.
    pub fn offset(&self) -> usize {
        match self {
            StructuredInstruction::Plain(instruction) => instruction.offset,
            StructuredInstruction::Block { offset, .. }
            | StructuredInstruction::Loop { offset, .. }
            | StructuredInstruction::If { offset, .. } => *offset,
        }
    }
}

impl fmt::Display for StructuredInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_instruction(self, 0))
    }
}

fn format_instruction(inst: &StructuredInstruction, indent: usize) -> String {
    let prefix = "  ".repeat(indent);
    let nested = |body: &[StructuredInstruction]| -> String {
        body.iter()
            .map(|child| format_instruction(child, indent + 1))
            .collect()
    };
    match inst {
        StructuredInstruction::Plain(i) => format!("{prefix}{i}\n"),
        StructuredInstruction::Block { block_type, body, .. } => {
            format!("{prefix}block{block_type}\n{}{prefix}end\n", nested(body))
        }
        StructuredInstruction::Loop { block_type, body, .. } => {
            format!("{prefix}loop{block_type}\n{}{prefix}end\n", nested(body))
        }
        StructuredInstruction::If {
            block_type,
            then_branch,
            else_branch,
            ..
        } => {
            let mut s = format!("{prefix}if{block_type}\n{}", nested(then_branch));
            if let Some(else_body) = else_branch {
                s.push_str(&format!("{prefix}else\n{}", nested(else_body)));
            }
            s.push_str(&format!("{prefix}end\n"));
            s
        }
    }
}

/// Result of executing a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Normal completion - continue to next instruction
    Normal,
    /// Branch to label at given depth
    Branch(u32),
    /// Return from function
    Return,
}

/// Context for a block being built
enum BlockContext {
    Block {
        block_type: BlockType,
        instructions: Vec<StructuredInstruction>,
        offset: usize,
    },
    Loop {
        block_type: BlockType,
        instructions: Vec<StructuredInstruction>,
        offset: usize,
    },
    IfThen {
        block_type: BlockType,
        then_instructions: Vec<StructuredInstruction>,
        offset: usize,
    },
    IfElse {
        block_type: BlockType,
        then_instructions: Vec<StructuredInstruction>,
        else_instructions: Vec<StructuredInstruction>,
        offset: usize,
    },
    Function {
        instructions: Vec<StructuredInstruction>,
    },
}

impl BlockContext {
    fn instructions_mut(&mut self) -> &mut Vec<StructuredInstruction> {
        match self {
            BlockContext::Block { instructions, .. }
            | BlockContext::Loop { instructions, .. }
            | BlockContext::Function { instructions } => instructions,
            BlockContext::IfThen {
                then_instructions, ..
            } => then_instructions,
            BlockContext::IfElse {
                else_instructions, ..
            } => else_instructions,
        }
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Transforms a flat instruction stream into a tree, one instruction at a time.
pub struct StructureBuilder {
    block_stack: Vec<BlockContext>,
    body: Option<Vec<StructuredInstruction>>,
}

impl Default for StructureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureBuilder {
    pub fn new() -> Self {
        StructureBuilder {
            block_stack: vec![BlockContext::Function {
                instructions: Vec::new(),
            }],
            body: None,
        }
    }

    pub fn process_instruction(&mut self, instruction: Instruction) -> Result<(), io::Error> {
        let offset = instruction.offset;
        match instruction.kind {
            InstructionKind::Block { block_type } => {
                self.block_stack.push(BlockContext::Block {
                    block_type,
                    instructions: Vec::new(),
                    offset,
                });
            }

            InstructionKind::Loop { block_type } => {
                self.block_stack.push(BlockContext::Loop {
                    block_type,
                    instructions: Vec::new(),
                    offset,
                });
            }

            InstructionKind::If { block_type } => {
                self.block_stack.push(BlockContext::IfThen {
                    block_type,
                    then_instructions: Vec::new(),
                    offset,
                });
            }

            InstructionKind::Else => match self.block_stack.pop() {
                Some(BlockContext::IfThen {
                    block_type,
                    then_instructions,
                    offset,
                }) => {
                    self.block_stack.push(BlockContext::IfElse {
                        block_type,
                        then_instructions,
                        else_instructions: Vec::new(),
                        offset,
                    });
                }
                _ => return Err(invalid("else without matching if")),
            },

            InstructionKind::End => {
                let finished = match self.block_stack.pop() {
                    Some(BlockContext::Block {
                        block_type,
                        instructions,
                        offset,
                    }) => StructuredInstruction::Block {
                        block_type,
                        body: instructions,
                        offset,
                    },
                    Some(BlockContext::Loop {
                        block_type,
                        instructions,
                        offset,
                    }) => StructuredInstruction::Loop {
                        block_type,
                        body: instructions,
                        offset,
                    },
                    Some(BlockContext::IfThen {
                        block_type,
                        then_instructions,
                        offset,
                    }) => StructuredInstruction::If {
                        block_type,
                        then_branch: then_instructions,
                        else_branch: None,
                        offset,
                    },
                    Some(BlockContext::IfElse {
                        block_type,
                        then_instructions,
                        else_instructions,
                        offset,
                    }) => StructuredInstruction::If {
                        block_type,
                        then_branch: then_instructions,
                        else_branch: Some(else_instructions),
                        offset,
                    },
                    Some(BlockContext::Function { instructions }) => {
                        self.body = Some(instructions);
                        return Ok(());
                    }
                    None => return Err(invalid("end after the function body")),
                };
                self.current()?.push(finished);
            }

            kind => self.current()?.push(StructuredInstruction::Plain(Instruction { kind, offset })),
        }
        Ok(())
    }

    /// Number of blocks, loops and ifs currently open.
    pub fn depth(&self) -> usize {
        self.block_stack.len().saturating_sub(1)
    }

    fn current(&mut self) -> Result<&mut Vec<StructuredInstruction>, io::Error> {
        self.block_stack
            .last_mut()
            .map(BlockContext::instructions_mut)
            .ok_or_else(|| invalid("instruction after the function body"))
    }

    /// The finished body, once the function's final `end` has been seen.
    pub fn finalise(self) -> Result<Vec<StructuredInstruction>, io::Error> {
        self.body
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "function body is missing its end"))
    }
}
