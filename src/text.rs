// text.rs - textual back-end
//
// Renders the module as the equivalent S-expression for diagnostics. Function
// bodies are buffered per method because the locals, which precede the body
// in the text format, are only known at method finish.

use crate::error::{WasmError, WasmResult};
use crate::types::ValueType;
use crate::writer::{BlockData, BlockOp, Cast, ModuleWriter, NumericOp, ParamKind};

/// Module writer for the text format.
pub struct TextWriter {
    exports: Vec<(String, String)>,
    functions: Vec<String>,
    name: String,
    params: Vec<ValueType>,
    result: Option<ValueType>,
    body: Vec<String>,
    indent: usize,
}

impl TextWriter {
    pub fn new() -> TextWriter {
        TextWriter {
            exports: Vec::new(),
            functions: Vec::new(),
            name: String::new(),
            params: Vec::new(),
            result: None,
            body: Vec::new(),
            indent: 0,
        }
    }

    /// Assemble the `(module ...)` form.
    pub fn finish(self) -> WasmResult<String> {
        let mut output = String::from("(module\n");
        for (export_name, method_name) in &self.exports {
            output.push_str(&format!("  (export \"{export_name}\" (func ${method_name}))\n"));
        }
        for function in &self.functions {
            output.push_str(function);
        }
        output.push_str(")\n");
        Ok(output)
    }

    fn push_line(&mut self, line: &str) {
        let mut rendered = String::new();
        for _ in 0..self.indent + 2 {
            rendered.push_str("  ");
        }
        rendered.push_str(line);
        rendered.push('\n');
        self.body.push(rendered);
    }

    fn numeric_name(op: NumericOp, value_type: ValueType) -> WasmResult<&'static str> {
        use NumericOp::*;
        use ValueType::*;
        let name = match (op, value_type) {
            (Add, I32 | I64) => "add",
            (Sub, I32 | I64) => "sub",
            (Mul, I32 | I64) => "mul",
            (Div, I32 | I64) => "div_s",
            (Rem, I32 | I64) => "rem_s",
            (And, I32 | I64) => "and",
            (Or, I32 | I64) => "or",
            (Xor, I32 | I64) => "xor",
            (Shl, I32 | I64) => "shl",
            (ShrS, I32 | I64) => "shr_s",
            (ShrU, I32 | I64) => "shr_u",
            (Eq, I32 | I64 | F32 | F64) => "eq",
            (Ne, I32 | I64 | F32 | F64) => "ne",
            (Lt, I32 | I64) => "lt_s",
            (Gt, I32 | I64) => "gt_s",
            (Le, I32 | I64) => "le_s",
            (Ge, I32 | I64) => "ge_s",
            (Add, F32 | F64) => "add",
            (Sub, F32 | F64) => "sub",
            (Mul, F32 | F64) => "mul",
            (Div, F32 | F64) => "div",
            (Neg, F32 | F64) => "neg",
            (Lt, F32 | F64) => "lt",
            (Gt, F32 | F64) => "gt",
            (Le, F32 | F64) => "le",
            (Ge, F32 | F64) => "ge",
            _ => {
                return Err(WasmError::new(
                    format!("numeric operation {op:?} has no wasm counterpart for {}", value_type.name()),
                    None,
                ))
            }
        };
        Ok(name)
    }
}

impl ModuleWriter for TextWriter {
    fn write_export(&mut self, method_name: &str, export_name: &str) {
        self.exports.push((export_name.to_string(), method_name.to_string()));
    }

    fn write_method_start(&mut self, name: &str) {
        self.name = name.to_string();
        self.params.clear();
        self.result = None;
        self.body.clear();
        self.indent = 0;
    }

    fn write_method_param(&mut self, kind: ParamKind, value_type: ValueType) {
        match kind {
            ParamKind::Param => self.params.push(value_type),
            ParamKind::Return => self.result = Some(value_type),
        }
    }

    fn write_method_finish(&mut self, locals: &[ValueType]) -> WasmResult<()> {
        let mut function = format!("  (func ${}", self.name);
        for param in &self.params {
            function.push_str(&format!(" (param {})", param.name()));
        }
        if let Some(result) = self.result {
            function.push_str(&format!(" (result {})", result.name()));
        }
        for local in locals {
            function.push_str(&format!(" (local {})", local.name()));
        }
        function.push('\n');
        for line in &self.body {
            function.push_str(line);
        }
        function.push_str("  )\n");
        self.functions.push(function);
        Ok(())
    }

    fn write_const_int(&mut self, value: i32) {
        self.push_line(&format!("i32.const {value}"));
    }

    fn write_const_long(&mut self, value: i64) {
        self.push_line(&format!("i64.const {value}"));
    }

    fn write_const_float(&mut self, value: f32) {
        self.push_line(&format!("f32.const {value}"));
    }

    fn write_const_double(&mut self, value: f64) {
        self.push_line(&format!("f64.const {value}"));
    }

    fn write_load(&mut self, index: u32) {
        self.push_line(&format!("get_local {index}"));
    }

    fn write_store(&mut self, index: u32) {
        self.push_line(&format!("set_local {index}"));
    }

    fn write_numeric_op(&mut self, op: NumericOp, value_type: ValueType) -> WasmResult<()> {
        let name = TextWriter::numeric_name(op, value_type)?;
        self.push_line(&format!("{}.{}", value_type.name(), name));
        Ok(())
    }

    fn write_cast(&mut self, cast: Cast) {
        let name = match cast {
            Cast::I2l => "i64.extend_i32_s",
            Cast::I2f => "f32.convert_i32_s",
            Cast::I2d => "f64.convert_i32_s",
            Cast::L2i => "i32.wrap_i64",
            Cast::L2f => "f32.convert_i64_s",
            Cast::L2d => "f64.convert_i64_s",
            Cast::F2i => "i32.trunc_f32_s",
            Cast::F2l => "i64.trunc_f32_s",
            Cast::F2d => "f64.promote_f32",
            Cast::D2i => "i32.trunc_f64_s",
            Cast::D2l => "i64.trunc_f64_s",
            Cast::D2f => "f32.demote_f64",
        };
        self.push_line(name);
    }

    fn write_return(&mut self) {
        self.push_line("return");
    }

    fn write_block_code(&mut self, op: BlockOp, data: Option<&BlockData>) -> WasmResult<()> {
        match op {
            BlockOp::Block => {
                self.push_line("block");
                self.indent += 1;
            }
            BlockOp::Loop => {
                self.push_line("loop");
                self.indent += 1;
            }
            BlockOp::If => {
                self.push_line("if");
                self.indent += 1;
            }
            BlockOp::Else => {
                self.indent = self.indent.saturating_sub(1);
                self.push_line("else");
                self.indent += 1;
            }
            BlockOp::End => {
                self.indent = self.indent.saturating_sub(1);
                self.push_line("end");
            }
            BlockOp::Return => self.push_line("return"),
            BlockOp::Br | BlockOp::BrIf => {
                let depth = match data {
                    Some(BlockData::Depth(depth)) => *depth,
                    _ => return Err(WasmError::new(format!("{op:?} without a branch depth"), None)),
                };
                let name = if op == BlockOp::Br { "br" } else { "br_if" };
                self.push_line(&format!("{name} {depth}"));
            }
            BlockOp::BrTable => match data {
                Some(BlockData::Table { scratch, targets }) => {
                    let targets: Vec<String> = targets.iter().map(u32::to_string).collect();
                    self.push_line(&format!("get_local {scratch}"));
                    self.push_line(&format!("br_table {}", targets.join(" ")));
                }
                Some(BlockData::Lookup { scratch, cases, default }) => {
                    for (key, depth) in cases {
                        self.push_line(&format!("get_local {scratch}"));
                        self.push_line(&format!("i32.const {key}"));
                        self.push_line("i32.eq");
                        self.push_line(&format!("br_if {depth}"));
                    }
                    self.push_line(&format!("br {default}"));
                }
                _ => return Err(WasmError::new("br_table without targets", None)),
            },
            BlockOp::Unreachable => self.push_line("unreachable"),
        }
        Ok(())
    }
}

impl Default for TextWriter {
    fn default() -> Self {
        TextWriter::new()
    }
}
