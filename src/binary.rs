// binary.rs - binary back-end
//
// Produces a module in the Wasm binary format: magic and version, then the
// Type, Function, Export and Code sections in canonical order. Function
// bodies are buffered as methods finish and concatenated at the end, so an
// abandoned session never writes partial output.

use indexmap::{IndexMap, IndexSet};

use crate::error::{WasmError, WasmResult};
use crate::output::{SectionKind, WasmStream};
use crate::types::{FunctionType, ValueType};
use crate::writer::{BlockData, BlockOp, Cast, ModuleWriter, NumericOp, ParamKind};

const WASM_BINARY_MAGIC: &[u8; 4] = b"\0asm";
const WASM_BINARY_VERSION: u32 = 1;

// Opcodes of the Wasm 1.0 binary format.
const UNREACHABLE: u8 = 0x00;
const BLOCK: u8 = 0x02;
const LOOP: u8 = 0x03;
const IF: u8 = 0x04;
const ELSE: u8 = 0x05;
const END: u8 = 0x0B;
const BR: u8 = 0x0C;
const BR_IF: u8 = 0x0D;
const BR_TABLE: u8 = 0x0E;
const RETURN: u8 = 0x0F;
const GET_LOCAL: u8 = 0x20;
const SET_LOCAL: u8 = 0x21;
const I32_CONST: u8 = 0x41;
const I64_CONST: u8 = 0x42;
const F32_CONST: u8 = 0x43;
const F64_CONST: u8 = 0x44;
const I32_EQ: u8 = 0x46;

/// The empty block type for `block`/`loop`/`if`.
const BLOCK_TYPE_VOID: u8 = 0x40;

/// External kind byte of a function export.
const EXTERNAL_KIND_FUNCTION: u8 = 0x00;

/// Module writer for the binary format.
pub struct BinaryWriter {
    /// Code of the function currently being written.
    code: WasmStream,
    /// Finished function bodies, each prefixed with its size.
    bodies: WasmStream,
    /// Deduplicated signatures, position = type index.
    types: IndexSet<FunctionType>,
    /// Method name to type index, insertion order = function index space.
    functions: IndexMap<String, u32>,
    /// Export name to method name.
    exports: IndexMap<String, String>,
    /// Name of the function currently being written.
    function_name: String,
    /// Signature of the function currently being written.
    function_type: FunctionType,
}

impl BinaryWriter {
    pub fn new() -> BinaryWriter {
        BinaryWriter {
            code: WasmStream::new(),
            bodies: WasmStream::new(),
            types: IndexSet::new(),
            functions: IndexMap::new(),
            exports: IndexMap::new(),
            function_name: String::new(),
            function_type: FunctionType::default(),
        }
    }

    /// Serialize the module.
    pub fn finish(self) -> WasmResult<Vec<u8>> {
        let mut wasm = WasmStream::new();
        wasm.write_bytes(WASM_BINARY_MAGIC);
        wasm.write_int32(WASM_BINARY_VERSION);

        wasm.write_section(SectionKind::Type, &self.type_section(), None);
        wasm.write_section(SectionKind::Function, &self.function_section(), None);
        wasm.write_section(SectionKind::Export, &self.export_section()?, None);
        wasm.write_section(SectionKind::Code, &self.code_section(), None);

        Ok(wasm.into_bytes())
    }

    fn type_section(&self) -> WasmStream {
        let mut stream = WasmStream::new();
        if self.types.is_empty() {
            return stream;
        }
        stream.write_varuint32(self.types.len() as u32);
        for function_type in &self.types {
            stream.write_varint32(ValueType::Func.code() as i32);
            stream.write_varuint32(function_type.params.len() as u32);
            for value_type in &function_type.params {
                stream.write_varint32(value_type.code() as i32);
            }
            match function_type.result {
                Some(result) => {
                    stream.write_varuint32(1);
                    stream.write_varint32(result.code() as i32);
                }
                None => stream.write_varuint32(0),
            }
        }
        stream
    }

    fn function_section(&self) -> WasmStream {
        let mut stream = WasmStream::new();
        if self.functions.is_empty() {
            return stream;
        }
        stream.write_varuint32(self.functions.len() as u32);
        for type_index in self.functions.values() {
            stream.write_varuint32(*type_index);
        }
        stream
    }

    fn export_section(&self) -> WasmResult<WasmStream> {
        let mut stream = WasmStream::new();
        if self.exports.is_empty() {
            return Ok(stream);
        }
        stream.write_varuint32(self.exports.len() as u32);
        for (export_name, method_name) in &self.exports {
            let index = self.functions.get_index_of(method_name.as_str()).ok_or_else(|| {
                WasmError::new(format!("export '{export_name}' references unknown method '{method_name}'"), None)
            })?;
            stream.write_varuint32(export_name.len() as u32);
            stream.write_bytes(export_name.as_bytes());
            stream.write_byte(EXTERNAL_KIND_FUNCTION);
            stream.write_varuint32(index as u32);
        }
        Ok(stream)
    }

    fn code_section(&self) -> WasmStream {
        let mut stream = WasmStream::new();
        if self.functions.is_empty() {
            return stream;
        }
        stream.write_varuint32(self.functions.len() as u32);
        self.bodies.write_to(&mut stream);
        stream
    }
}

/// Collapse adjacent identical local types into (count, type) groups.
fn locals_stream(locals: &[ValueType]) -> WasmStream {
    let mut groups: Vec<(u32, ValueType)> = Vec::new();
    for &value_type in locals {
        match groups.last_mut() {
            Some((count, last)) if *last == value_type => *count += 1,
            _ => groups.push((1, value_type)),
        }
    }
    let mut stream = WasmStream::new();
    stream.write_varuint32(groups.len() as u32);
    for (count, value_type) in groups {
        stream.write_varuint32(count);
        stream.write_varint32(value_type.code() as i32);
    }
    stream
}

impl ModuleWriter for BinaryWriter {
    fn write_export(&mut self, method_name: &str, export_name: &str) {
        self.exports.insert(export_name.to_string(), method_name.to_string());
    }

    fn write_method_start(&mut self, name: &str) {
        self.function_name = name.to_string();
        self.function_type = FunctionType::default();
        self.code.reset();
    }

    fn write_method_param(&mut self, kind: ParamKind, value_type: ValueType) {
        match kind {
            ParamKind::Param => self.function_type.params.push(value_type),
            ParamKind::Return => self.function_type.result = Some(value_type),
        }
    }

    fn write_method_finish(&mut self, locals: &[ValueType]) -> WasmResult<()> {
        let function_type = std::mem::take(&mut self.function_type);
        let (type_index, _) = self.types.insert_full(function_type);
        let name = std::mem::take(&mut self.function_name);
        self.functions.insert(name, type_index as u32);

        let locals = locals_stream(locals);
        self.bodies.write_varuint32((locals.len() + self.code.len() + 1) as u32);
        locals.write_to(&mut self.bodies);
        self.code.write_to(&mut self.bodies);
        self.bodies.write_byte(END);
        Ok(())
    }

    fn write_const_int(&mut self, value: i32) {
        self.code.write_byte(I32_CONST);
        self.code.write_varint32(value);
    }

    fn write_const_long(&mut self, value: i64) {
        self.code.write_byte(I64_CONST);
        self.code.write_varint64(value);
    }

    fn write_const_float(&mut self, value: f32) {
        self.code.write_byte(F32_CONST);
        self.code.write_f32(value);
    }

    fn write_const_double(&mut self, value: f64) {
        self.code.write_byte(F64_CONST);
        self.code.write_f64(value);
    }

    fn write_load(&mut self, index: u32) {
        self.code.write_byte(GET_LOCAL);
        self.code.write_varuint32(index);
    }

    fn write_store(&mut self, index: u32) {
        self.code.write_byte(SET_LOCAL);
        self.code.write_varuint32(index);
    }

    fn write_numeric_op(&mut self, op: NumericOp, value_type: ValueType) -> WasmResult<()> {
        use NumericOp::*;
        use ValueType::*;
        let opcode = match (op, value_type) {
            (Add, I32) => 0x6A,
            (Sub, I32) => 0x6B,
            (Mul, I32) => 0x6C,
            (Div, I32) => 0x6D,
            (Rem, I32) => 0x6F,
            (And, I32) => 0x71,
            (Or, I32) => 0x72,
            (Xor, I32) => 0x73,
            (Shl, I32) => 0x74,
            (ShrS, I32) => 0x75,
            (ShrU, I32) => 0x76,
            (Eq, I32) => 0x46,
            (Ne, I32) => 0x47,
            (Lt, I32) => 0x48,
            (Gt, I32) => 0x4A,
            (Le, I32) => 0x4C,
            (Ge, I32) => 0x4E,

            (Add, I64) => 0x7C,
            (Sub, I64) => 0x7D,
            (Mul, I64) => 0x7E,
            (Div, I64) => 0x7F,
            (Rem, I64) => 0x81,
            (And, I64) => 0x83,
            (Or, I64) => 0x84,
            (Xor, I64) => 0x85,
            (Shl, I64) => 0x86,
            (ShrS, I64) => 0x87,
            (ShrU, I64) => 0x88,
            (Eq, I64) => 0x51,
            (Ne, I64) => 0x52,
            (Lt, I64) => 0x53,
            (Gt, I64) => 0x55,
            (Le, I64) => 0x57,
            (Ge, I64) => 0x59,

            (Add, F32) => 0x92,
            (Sub, F32) => 0x93,
            (Mul, F32) => 0x94,
            (Div, F32) => 0x95,
            (Neg, F32) => 0x8C,
            (Eq, F32) => 0x5B,
            (Ne, F32) => 0x5C,
            (Lt, F32) => 0x5D,
            (Gt, F32) => 0x5E,
            (Le, F32) => 0x5F,
            (Ge, F32) => 0x60,

            (Add, F64) => 0xA0,
            (Sub, F64) => 0xA1,
            (Mul, F64) => 0xA2,
            (Div, F64) => 0xA3,
            (Neg, F64) => 0x9A,
            (Eq, F64) => 0x61,
            (Ne, F64) => 0x62,
            (Lt, F64) => 0x63,
            (Gt, F64) => 0x64,
            (Le, F64) => 0x65,
            (Ge, F64) => 0x66,

            _ => {
                return Err(WasmError::new(
                    format!("numeric operation {op:?} has no wasm counterpart for {}", value_type.name()),
                    None,
                ))
            }
        };
        self.code.write_byte(opcode);
        Ok(())
    }

    fn write_cast(&mut self, cast: Cast) {
        let opcode = match cast {
            Cast::I2l => 0xAC, // i64.extend_i32_s
            Cast::I2f => 0xB2, // f32.convert_i32_s
            Cast::I2d => 0xB7, // f64.convert_i32_s
            Cast::L2i => 0xA7, // i32.wrap_i64
            Cast::L2f => 0xB4, // f32.convert_i64_s
            Cast::L2d => 0xB9, // f64.convert_i64_s
            Cast::F2i => 0xA8, // i32.trunc_f32_s
            Cast::F2l => 0xAE, // i64.trunc_f32_s
            Cast::F2d => 0xBB, // f64.promote_f32
            Cast::D2i => 0xAA, // i32.trunc_f64_s
            Cast::D2l => 0xB0, // i64.trunc_f64_s
            Cast::D2f => 0xB6, // f32.demote_f64
        };
        self.code.write_byte(opcode);
    }

    fn write_return(&mut self) {
        self.code.write_byte(RETURN);
    }

    fn write_block_code(&mut self, op: BlockOp, data: Option<&BlockData>) -> WasmResult<()> {
        match op {
            BlockOp::Block => {
                self.code.write_byte(BLOCK);
                self.code.write_byte(BLOCK_TYPE_VOID);
            }
            BlockOp::Loop => {
                self.code.write_byte(LOOP);
                self.code.write_byte(BLOCK_TYPE_VOID);
            }
            BlockOp::If => {
                self.code.write_byte(IF);
                self.code.write_byte(BLOCK_TYPE_VOID);
            }
            BlockOp::Else => self.code.write_byte(ELSE),
            BlockOp::End => self.code.write_byte(END),
            BlockOp::Return => self.code.write_byte(RETURN),
            BlockOp::Br | BlockOp::BrIf => {
                let depth = match data {
                    Some(BlockData::Depth(depth)) => *depth,
                    _ => return Err(WasmError::new(format!("{op:?} without a branch depth"), None)),
                };
                self.code.write_byte(if op == BlockOp::Br { BR } else { BR_IF });
                self.code.write_varuint32(depth);
            }
            BlockOp::BrTable => match data {
                Some(BlockData::Table { scratch, targets }) => {
                    self.code.write_byte(GET_LOCAL);
                    self.code.write_varuint32(*scratch);
                    self.code.write_byte(BR_TABLE);
                    // The last entry is the default target.
                    self.code.write_varuint32(targets.len() as u32 - 1);
                    for target in targets {
                        self.code.write_varuint32(*target);
                    }
                }
                Some(BlockData::Lookup { scratch, cases, default }) => {
                    for (key, depth) in cases {
                        self.code.write_byte(GET_LOCAL);
                        self.code.write_varuint32(*scratch);
                        self.code.write_byte(I32_CONST);
                        self.code.write_varint32(*key);
                        self.code.write_byte(I32_EQ);
                        self.code.write_byte(BR_IF);
                        self.code.write_varuint32(*depth);
                    }
                    self.code.write_byte(BR);
                    self.code.write_varuint32(*default);
                }
                _ => return Err(WasmError::new("br_table without targets", None)),
            },
            BlockOp::Unreachable => self.code.write_byte(UNREACHABLE),
        }
        Ok(())
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        BinaryWriter::new()
    }
}
