use std::fmt;

use super::structured::StructuredInstruction;

/// A decoded and validated module, ready to be instantiated.
#[derive(Debug, Default, PartialEq)]
pub struct Module {
    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type index of each function defined (not imported) by the module.
    pub functions: Vec<u32>,
    pub table: Option<TableType>,
    pub memory: Option<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<Data>,
    pub data_count: Option<u32>,
}

impl Module {
    pub fn imported_function_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|import| matches!(import.external_kind, ExternalKind::Function(_)))
            .count() as u32
    }

    pub fn imported_memory(&self) -> Option<&Limits> {
        self.imports.iter().find_map(|import| match &import.external_kind {
            ExternalKind::Memory(limits) => Some(limits),
            _ => None,
        })
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some() || self.imported_memory().is_some()
    }

    pub fn function_count(&self) -> u32 {
        self.imported_function_count() + self.functions.len() as u32
    }

    /// Type index of a function in the function index space, imports first.
    pub fn function_type_index(&self, func_index: u32) -> Option<u32> {
        let mut remaining = func_index;
        for import in &self.imports {
            if let ExternalKind::Function(type_index) = import.external_kind {
                if remaining == 0 {
                    return Some(type_index);
                }
                remaining -= 1;
            }
        }
        self.functions.get(remaining as usize).copied()
    }

    pub fn function_type(&self, func_index: u32) -> Option<&FunctionType> {
        self.function_type_index(func_index)
            .and_then(|type_index| self.types.get(type_index as usize))
    }

    /// Global types in the global index space, imports first.
    pub fn global_types(&self) -> Vec<GlobalType> {
        self.imports
            .iter()
            .filter_map(|import| match &import.external_kind {
                ExternalKind::Global(global_type) => Some(*global_type),
                _ => None,
            })
            .chain(self.globals.iter().map(|global| global.global_type))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(
        parameters: impl IntoIterator<Item = ValueType>,
        return_types: impl IntoIterator<Item = ValueType>,
    ) -> FunctionType {
        FunctionType {
            parameters: parameters.into_iter().collect(),
            return_types: return_types.into_iter().collect(),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "({}) -> {}",
            self.parameters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", "),
            if self.return_types.is_empty() {
                "nil".to_string()
            } else if self.return_types.len() > 1 {
                format!(
                    "({})",
                    self.return_types
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<String>>()
                        .join(", ")
                )
            } else {
                self.return_types[0].to_string()
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub external_kind: ExternalKind,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <- {}.{}", self.external_kind, self.module, self.name)
    }
}

/// What an import or export refers to. Imports carry the expected type,
/// exports carry an index into the matching index space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExternalKind {
    Function(u32),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExternalKind::Function(type_index) => write!(f, "func sig={type_index}"),
            ExternalKind::Table(table_type) => write!(f, "table {table_type}"),
            ExternalKind::Memory(limits) => write!(f, "memory {limits}"),
            ExternalKind::Global(global_type) => write!(f, "global {global_type}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportIndex {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub index: ExportIndex,
}

impl fmt::Display for Export {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (kind, index) = match self.index {
            ExportIndex::Function(i) => ("func", i),
            ExportIndex::Table(i) => ("table", i),
            ExportIndex::Memory(i) => ("memory", i),
            ExportIndex::Global(i) => ("global", i),
        };
        write!(f, "{kind}[{index}] -> \"{}\"", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "initial={} max={}", self.min, max),
            None => write!(f, "initial={}", self.min),
        }
    }
}

/// The only table element type accepted is `funcref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "funcref {}", self.limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mutable {
            write!(f, "(mut {})", self.value_type)
        } else {
            write!(f, "{}", self.value_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

/// A validated constant expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    NullRef,
    GlobalGet(u32),
}

impl fmt::Display for ConstExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConstExpr::I32(value) => write!(f, "i32={value}"),
            ConstExpr::I64(value) => write!(f, "i64={value}"),
            ConstExpr::F32(value) => write!(f, "f32={value}"),
            ConstExpr::F64(value) => write!(f, "f64={value}"),
            ConstExpr::NullRef => write!(f, "ref.null extern"),
            ConstExpr::GlobalGet(index) => write!(f, "global={index}"),
        }
    }
}

/// An active element segment targeting the module's table.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub offset: ConstExpr,
    pub functions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub mode: DataMode,
    pub init: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    /// Declared locals, not including parameters.
    pub locals: Vec<ValueType>,
    pub body: Vec<StructuredInstruction>,
    /// Absolute offset of the code entry, just after its size prefix.
    pub offset: usize,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    ExternRef,
}

impl ValueType {
    pub fn is_value_type_byte(byte: u8) -> bool {
        matches!(byte, 0x7f | 0x7e | 0x7d | 0x7c | 0x6f)
    }

    pub fn decode(byte: u8) -> Result<Self, String> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            0x6f => Ok(ValueType::ExternRef),
            0x7b => Err("v128 values are not supported".to_string()),
            0x70 => Err("funcref values are not supported".to_string()),
            _ => Err(format!("invalid value type: {byte:#04x}")),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueType::I32 => "i32",
                ValueType::I64 => "i64",
                ValueType::F32 => "f32",
                ValueType::F64 => "f64",
                ValueType::ExternRef => "externref",
            }
        )
    }
}
