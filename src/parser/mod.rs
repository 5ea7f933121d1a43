//! Binary format decoder and validator
//!
//! [`parse`] turns the bytes of a `.wasm` binary into a validated
//! [`module::Module`] whose function bodies are already in structured form.

pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
pub mod structured;
pub mod validate;

use std::collections::HashSet;
use std::io;

use crate::error::CompileError;
use instruction::{Instruction, InstructionKind};
use module::{
    ConstExpr, Data, DataMode, Element, Export, ExportIndex, ExternalKind, FunctionBody, FunctionType, Global,
    GlobalType, Import, Limits, Module, TableType, ValueType,
};
use reader::Reader;
use structured::StructureBuilder;
use validate::{CodeValidator, ModuleContext};

const MAGIC: u32 = 0x6d736100; // '\0asm'
const VERSION: u32 = 1;

/// Attach a byte offset to an I/O level failure from the [`Reader`].
pub(crate) trait AtOffset<T> {
    fn at(self, offset: usize) -> Result<T, CompileError>;
}

impl<T> AtOffset<T> for Result<T, io::Error> {
    fn at(self, offset: usize) -> Result<T, CompileError> {
        self.map_err(|err| CompileError::from_io(err, offset))
    }
}

/// Decode and validate a complete module.
pub fn parse(bytes: &[u8]) -> Result<Module, CompileError> {
    let mut reader = Reader::new(bytes);
    read_header(&mut reader)?;

    let mut module = Module::default();
    let mut last_rank = 0;
    let mut saw_code = false;
    let mut saw_data = false;

    while !reader.is_empty() {
        let section_start = reader.pos();
        let sec_id = reader.read_byte().at(section_start)?;
        let sec_len = reader.read_vu32().at(reader.pos())? as usize;
        if !reader.has_at_least(sec_len) {
            return Err(CompileError::UnexpectedEof { offset: reader.pos() });
        }
        let mut section = reader.sub_reader(sec_len).at(reader.pos())?;

        if sec_id != 0 {
            let rank = section_rank(sec_id).ok_or_else(|| {
                CompileError::malformed(section_start, format!("malformed section id {sec_id}"))
            })?;
            if rank <= last_rank {
                return Err(CompileError::malformed(section_start, "unexpected section"));
            }
            last_rank = rank;
        }

        match sec_id {
            0 => {
                // custom sections carry a name and are otherwise ignored
                section.read_string().at(section.pos())?;
                section.read_slice(section.remaining()).at(section.pos())?;
            }
            1 => read_section_type(&mut section, &mut module)?,
            2 => read_section_import(&mut section, &mut module)?,
            3 => read_section_function(&mut section, &mut module)?,
            4 => read_section_table(&mut section, &mut module)?,
            5 => read_section_memory(&mut section, &mut module)?,
            6 => read_section_global(&mut section, &mut module)?,
            7 => read_section_export(&mut section, &mut module)?,
            8 => read_section_start(&mut section, &mut module)?,
            9 => read_section_element(&mut section, &mut module)?,
            10 => {
                read_section_code(&mut section, &mut module)?;
                saw_code = true;
            }
            11 => {
                read_section_data(&mut section, &mut module)?;
                saw_data = true;
            }
            12 => module.data_count = Some(section.read_vu32().at(section.pos())?),
            _ => unreachable!("section ids are ranked above"),
        }

        if !section.is_empty() {
            return Err(CompileError::malformed(section.pos(), "section size mismatch"));
        }
    }

    if !saw_code && !module.functions.is_empty() {
        return Err(CompileError::malformed(
            reader.pos(),
            "function and code section have inconsistent lengths",
        ));
    }
    if !saw_data && module.data_count.is_some_and(|count| count > 0) {
        return Err(CompileError::malformed(
            reader.pos(),
            "data count and data section have inconsistent lengths",
        ));
    }

    Ok(module)
}

fn read_header(reader: &mut Reader) -> Result<(), CompileError> {
    let magic = reader.read_u32().at(0)?;
    if magic != MAGIC {
        return Err(CompileError::malformed(0, "magic header not detected"));
    }
    let version = reader.read_u32().at(4)?;
    if version != VERSION {
        return Err(CompileError::malformed(4, format!("unknown binary version {version}")));
    }
    Ok(())
}

/// Position of a known section in the required ordering.
fn section_rank(sec_id: u8) -> Option<u8> {
    match sec_id {
        1..=9 => Some(sec_id),
        12 => Some(10),
        10 => Some(11),
        11 => Some(12),
        _ => None,
    }
}

/* SECTION READERS ************************************************/

fn read_count(reader: &mut Reader, limit: u32, what: &str) -> Result<u32, CompileError> {
    let pos = reader.pos();
    let count = reader.read_vu32().at(pos)?;
    if count > limit {
        return Err(CompileError::unsupported(
            pos,
            format!("too many {what}: {count} exceeds the limit of {limit}"),
        ));
    }
    Ok(count)
}

fn read_value_type(reader: &mut Reader) -> Result<ValueType, CompileError> {
    let pos = reader.pos();
    let byte = reader.read_byte().at(pos)?;
    ValueType::decode(byte).map_err(|message| {
        if ValueType::is_value_type_byte(byte) || byte == 0x7b || byte == 0x70 {
            CompileError::unsupported(pos, message)
        } else {
            CompileError::malformed(pos, message)
        }
    })
}

fn read_result_types(reader: &mut Reader, limit: u32) -> Result<Vec<ValueType>, CompileError> {
    let count = read_count(reader, limit, "value types")?;
    (0..count).map(|_| read_value_type(reader)).collect()
}

fn read_limits(reader: &mut Reader, ceiling: u32, what: &str) -> Result<Limits, CompileError> {
    let pos = reader.pos();
    let flags = reader.read_byte().at(pos)?;
    let limits = match flags {
        0x00 => Limits {
            min: reader.read_vu32().at(reader.pos())?,
            max: None,
        },
        0x01 => Limits {
            min: reader.read_vu32().at(reader.pos())?,
            max: Some(reader.read_vu32().at(reader.pos())?),
        },
        0x02 | 0x03 => return Err(CompileError::unsupported(pos, "shared memories are not supported")),
        _ => return Err(CompileError::malformed(pos, "integer too large")),
    };
    if limits.min > ceiling || limits.max.is_some_and(|max| max > ceiling) {
        return Err(CompileError::invalid(
            pos,
            format!("{what} size must be at most {ceiling}"),
        ));
    }
    if limits.max.is_some_and(|max| max < limits.min) {
        return Err(CompileError::invalid(
            pos,
            "size minimum must not be greater than maximum",
        ));
    }
    Ok(limits)
}

fn read_global_type(reader: &mut Reader) -> Result<GlobalType, CompileError> {
    let value_type = read_value_type(reader)?;
    let pos = reader.pos();
    let mutable = match reader.read_byte().at(pos)? {
        0x00 => false,
        0x01 => true,
        _ => return Err(CompileError::malformed(pos, "malformed mutability")),
    };
    Ok(GlobalType { value_type, mutable })
}

/// Read a constant expression producing `expected`. Only imported immutable
/// globals may be referenced.
fn read_const_expr(
    reader: &mut Reader,
    expected: ValueType,
    imported_globals: &[GlobalType],
) -> Result<ConstExpr, CompileError> {
    let start = reader.pos();
    let (expr, actual) = match InstructionKind::decode(reader)? {
        InstructionKind::I32Const { value } => (ConstExpr::I32(value), ValueType::I32),
        InstructionKind::I64Const { value } => (ConstExpr::I64(value), ValueType::I64),
        InstructionKind::F32Const { value } => (ConstExpr::F32(value), ValueType::F32),
        InstructionKind::F64Const { value } => (ConstExpr::F64(value), ValueType::F64),
        InstructionKind::RefNull { ref_type } => (ConstExpr::NullRef, ref_type),
        InstructionKind::GlobalGet { global_idx } => {
            let global = imported_globals
                .get(global_idx as usize)
                .ok_or_else(|| CompileError::invalid(start, format!("unknown global {global_idx}")))?;
            if global.mutable {
                return Err(CompileError::invalid(start, "constant expression required"));
            }
            (ConstExpr::GlobalGet(global_idx), global.value_type)
        }
        InstructionKind::End => return Err(CompileError::invalid(start, "type mismatch")),
        _ => return Err(CompileError::invalid(start, "constant expression required")),
    };
    if actual != expected {
        return Err(CompileError::invalid(start, "type mismatch"));
    }
    let end = reader.pos();
    match InstructionKind::decode(reader)? {
        InstructionKind::End => Ok(expr),
        _ => Err(CompileError::invalid(end, "constant expression required")),
    }
}

fn imported_global_types(module: &Module) -> Vec<GlobalType> {
    module
        .imports
        .iter()
        .filter_map(|import| match import.external_kind {
            ExternalKind::Global(global_type) => Some(global_type),
            _ => None,
        })
        .collect()
}

fn read_section_type(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_TYPES, "types")?;
    for _ in 0..count {
        let pos = reader.pos();
        if reader.read_byte().at(pos)? != 0x60 {
            return Err(CompileError::malformed(pos, "expected 0x60 to lead function type"));
        }
        let parameters = read_result_types(reader, limits::MAX_FUNCTION_PARAMS)?;
        let return_types = read_result_types(reader, limits::MAX_FUNCTION_RETURNS)?;
        module.types.push(FunctionType {
            parameters,
            return_types,
        });
    }
    Ok(())
}

fn read_section_import(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_IMPORTS, "imports")?;
    for _ in 0..count {
        let start = reader.pos();
        let module_name = reader.read_string().at(reader.pos())?;
        let name = reader.read_string().at(reader.pos())?;
        let pos = reader.pos();
        let external_kind = match reader.read_byte().at(pos)? {
            0x00 => {
                let type_index = reader.read_vu32().at(reader.pos())?;
                if type_index as usize >= module.types.len() {
                    return Err(CompileError::invalid(pos, format!("unknown type {type_index}")));
                }
                ExternalKind::Function(type_index)
            }
            0x01 => return Err(CompileError::unsupported(start, "table imports are not supported")),
            0x02 => {
                if module.imported_memory().is_some() {
                    return Err(CompileError::invalid(start, "multiple memories"));
                }
                ExternalKind::Memory(read_limits(reader, limits::MAX_MEMORY_PAGES, "memory")?)
            }
            0x03 => ExternalKind::Global(read_global_type(reader)?),
            byte => return Err(CompileError::malformed(pos, format!("malformed import kind {byte:#04x}"))),
        };
        module.imports.push(Import {
            module: module_name,
            name,
            external_kind,
        });
    }
    Ok(())
}

fn read_section_function(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_FUNCTIONS, "functions")?;
    for _ in 0..count {
        let pos = reader.pos();
        let type_index = reader.read_vu32().at(pos)?;
        if type_index as usize >= module.types.len() {
            return Err(CompileError::invalid(pos, format!("unknown type {type_index}")));
        }
        module.functions.push(type_index);
    }
    Ok(())
}

fn read_section_table(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let pos = reader.pos();
    let count = reader.read_vu32().at(pos)?;
    if count > 1 {
        return Err(CompileError::unsupported(pos, "multiple tables are not supported"));
    }
    for _ in 0..count {
        let pos = reader.pos();
        if reader.read_byte().at(pos)? != 0x70 {
            return Err(CompileError::unsupported(pos, "only funcref tables are supported"));
        }
        let limits = read_limits(reader, limits::MAX_TABLE_SIZE, "table")?;
        module.table = Some(TableType { limits });
    }
    Ok(())
}

fn read_section_memory(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let pos = reader.pos();
    let count = reader.read_vu32().at(pos)?;
    if count > 1 || (count == 1 && module.imported_memory().is_some()) {
        return Err(CompileError::invalid(pos, "multiple memories"));
    }
    for _ in 0..count {
        module.memory = Some(read_limits(reader, limits::MAX_MEMORY_PAGES, "memory")?);
    }
    Ok(())
}

fn read_section_global(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_GLOBALS, "globals")?;
    let imported = imported_global_types(module);
    for _ in 0..count {
        let global_type = read_global_type(reader)?;
        let init = read_const_expr(reader, global_type.value_type, &imported)?;
        module.globals.push(Global { global_type, init });
    }
    Ok(())
}

fn read_section_export(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_EXPORTS, "exports")?;
    let mut names = HashSet::new();
    let global_count = module.global_types().len() as u32;
    for _ in 0..count {
        let start = reader.pos();
        let name = reader.read_string().at(start)?;
        let pos = reader.pos();
        let kind = reader.read_byte().at(pos)?;
        let index = reader.read_vu32().at(reader.pos())?;
        let (index, in_range) = match kind {
            0x00 => (ExportIndex::Function(index), index < module.function_count()),
            0x01 => return Err(CompileError::unsupported(start, "table exports are not supported")),
            0x02 => (ExportIndex::Memory(index), index == 0 && module.has_memory()),
            0x03 => (ExportIndex::Global(index), index < global_count),
            _ => return Err(CompileError::malformed(pos, format!("malformed export kind {kind:#04x}"))),
        };
        if !in_range {
            return Err(CompileError::invalid(pos, format!("unknown export target {index:?}")));
        }
        if !names.insert(name.clone()) {
            return Err(CompileError::invalid(start, "duplicate export name"));
        }
        module.exports.push(Export { name, index });
    }
    Ok(())
}

fn read_section_start(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let pos = reader.pos();
    let func_index = reader.read_vu32().at(pos)?;
    match module.function_type(func_index) {
        None => Err(CompileError::invalid(pos, format!("unknown function {func_index}"))),
        Some(ty) if !ty.parameters.is_empty() || !ty.return_types.is_empty() => {
            Err(CompileError::invalid(pos, "start function must have type [] -> []"))
        }
        Some(_) => {
            module.start = Some(func_index);
            Ok(())
        }
    }
}

fn read_section_element(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let count = read_count(reader, limits::MAX_ELEMENT_SEGMENTS, "element segments")?;
    let imported = imported_global_types(module);
    for _ in 0..count {
        let pos = reader.pos();
        let flags = reader.read_vu32().at(pos)?;
        if flags != 0 {
            return Err(CompileError::unsupported(
                pos,
                format!("element segment flags {flags} are not supported"),
            ));
        }
        if module.table.is_none() {
            return Err(CompileError::invalid(pos, "unknown table 0"));
        }
        let offset = read_const_expr(reader, ValueType::I32, &imported)?;
        let entries = read_count(reader, limits::MAX_TABLE_INIT_ENTRIES, "element entries")?;
        let mut functions = Vec::with_capacity(entries.min(1024) as usize);
        for _ in 0..entries {
            let pos = reader.pos();
            let func_index = reader.read_vu32().at(pos)?;
            if func_index >= module.function_count() {
                return Err(CompileError::invalid(pos, format!("unknown function {func_index}")));
            }
            functions.push(func_index);
        }
        module.elements.push(Element { offset, functions });
    }
    Ok(())
}

fn read_section_code(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let pos = reader.pos();
    let count = reader.read_vu32().at(pos)?;
    if count as usize != module.functions.len() {
        return Err(CompileError::malformed(
            pos,
            "function and code section have inconsistent lengths",
        ));
    }

    let func_types: Vec<u32> = (0..module.function_count())
        .filter_map(|func_index| module.function_type_index(func_index))
        .collect();
    let globals = module.global_types();
    let context = ModuleContext {
        types: &module.types,
        func_types: &func_types,
        globals: &globals,
        has_memory: module.has_memory(),
        has_table: module.table.is_some(),
    };

    let mut code = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let size_pos = reader.pos();
        let size = reader.read_vu32().at(size_pos)?;
        if size > limits::MAX_FUNCTION_SIZE {
            return Err(CompileError::unsupported(size_pos, "function body too large"));
        }
        let mut body_reader = reader.sub_reader(size as usize).at(reader.pos())?;
        let function_type = &module.types[module.functions[index] as usize];
        code.push(read_function_body(&mut body_reader, &context, function_type)?);
    }
    module.code = code;
    Ok(())
}

fn read_function_body(
    reader: &mut Reader,
    context: &ModuleContext,
    function_type: &FunctionType,
) -> Result<FunctionBody, CompileError> {
    let offset = reader.pos();

    let groups = reader.read_vu32().at(offset)?;
    let mut locals = Vec::new();
    let mut total: u64 = 0;
    for _ in 0..groups {
        let pos = reader.pos();
        let count = reader.read_vu32().at(pos)?;
        total += count as u64;
        if total > limits::MAX_FUNCTION_LOCALS as u64 {
            return Err(CompileError::malformed(pos, "too many locals"));
        }
        let value_type = read_value_type(reader)?;
        locals.extend(std::iter::repeat(value_type).take(count as usize));
    }

    let all_locals = function_type.parameters.iter().chain(locals.iter()).copied().collect();
    let mut validator = CodeValidator::new(context, function_type, all_locals);
    let mut builder = StructureBuilder::new();

    while !validator.ended() {
        let start = reader.pos();
        let kind = InstructionKind::decode(reader)?;
        validator
            .validate(&kind)
            .map_err(|err| CompileError::invalid(start, err.to_string()))?;
        builder
            .process_instruction(Instruction { kind, offset: start })
            .at(start)?;
        if builder.depth() > limits::MAX_NESTING_DEPTH {
            return Err(CompileError::unsupported(start, "control structures nested too deeply"));
        }
    }
    if !reader.is_empty() {
        return Err(CompileError::malformed(reader.pos(), "section size mismatch"));
    }

    Ok(FunctionBody {
        locals,
        body: builder.finalise().at(reader.pos())?,
        offset,
    })
}

fn read_section_data(reader: &mut Reader, module: &mut Module) -> Result<(), CompileError> {
    let pos = reader.pos();
    let count = read_count(reader, limits::MAX_DATA_SEGMENTS, "data segments")?;
    if module.data_count.is_some_and(|expected| expected != count) {
        return Err(CompileError::malformed(
            pos,
            "data count and data section have inconsistent lengths",
        ));
    }
    let imported = imported_global_types(module);
    for _ in 0..count {
        let pos = reader.pos();
        let flags = reader.read_vu32().at(pos)?;
        let mode = match flags {
            0 => DataMode::Active {
                offset: read_const_expr(reader, ValueType::I32, &imported)?,
            },
            1 => DataMode::Passive,
            2 => {
                let memory_index = reader.read_vu32().at(reader.pos())?;
                if memory_index != 0 {
                    return Err(CompileError::invalid(pos, format!("unknown memory {memory_index}")));
                }
                DataMode::Active {
                    offset: read_const_expr(reader, ValueType::I32, &imported)?,
                }
            }
            _ => return Err(CompileError::malformed(pos, format!("malformed data segment flags {flags}"))),
        };
        if matches!(mode, DataMode::Active { .. }) && !module.has_memory() {
            return Err(CompileError::invalid(pos, "unknown memory 0"));
        }
        let init = reader.read_u8vec().at(reader.pos())?;
        module.data.push(Data { mode, init });
    }
    Ok(())
}
