// translate.rs - JVM bytecode to Wasm translation
//
// Two passes per method. The first walks the code attribute and registers
// every control transfer with the branch manager; the second walks it again,
// asks the recovered region tree which markers to emit at each position, and
// maps the remaining opcodes one by one onto the writer protocol.
//
// `goto` and the switch dispatches emit nothing themselves; their effect is
// realized entirely by the region markers. A conditional branch emits the
// negation of its jump condition, because the JVM jumps to the else side
// while the Wasm `if` falls into the then side.

use std::collections::HashMap;

use classfile_parser::code_attribute::{code_parser, Instruction};

use crate::branch::{BranchManager, JumpKind};
use crate::classfile::{ConstantPool, ExportedMethod, NumericConstant};
use crate::error::{WasmError, WasmResult};
use crate::types::ValueType;
use crate::writer::{BlockOp, Cast, ModuleWriter, NumericOp, ParamKind};

/// Byte size of a JVM `goto`/`ifXX` instruction.
const JUMP_SIZE: u32 = 3;

/// Translates the methods of one module, reusing its branch manager and
/// locals tables across methods.
pub struct MethodTranslator {
    branch_manager: BranchManager,
    /// Wasm types of the locals beyond the parameters.
    locals: Vec<ValueType>,
    /// JVM variable slot to Wasm local index.
    slots: HashMap<u16, u32>,
    param_count: u32,
    /// Scratch locals allocated for the switches of this method during the
    /// first pass, in address order, and the cursor the second pass replays
    /// them with.
    switch_scratch: Vec<u32>,
    switch_cursor: usize,
    /// A `cmp` result waiting for the conditional branch that consumes it.
    pending_compare: Option<ValueType>,
    /// Source line of the instruction being translated.
    line: Option<u32>,
}

impl MethodTranslator {
    pub fn new() -> MethodTranslator {
        MethodTranslator {
            branch_manager: BranchManager::new(),
            locals: Vec::new(),
            slots: HashMap::new(),
            param_count: 0,
            switch_scratch: Vec::new(),
            switch_cursor: 0,
            pending_compare: None,
            line: None,
        }
    }

    /// Compile one exported method through the writer protocol.
    pub fn translate(
        &mut self,
        writer: &mut dyn ModuleWriter,
        pool: &ConstantPool<'_>,
        method: &ExportedMethod,
    ) -> WasmResult<()> {
        self.reset(method);

        writer.write_method_start(&method.name);
        for &param in &method.params {
            writer.write_method_param(ParamKind::Param, param);
        }
        if let Some(result) = method.result {
            writer.write_method_param(ParamKind::Return, result);
        }

        let code = &method.code.code;
        let (_, instructions) = code_parser(code)
            .map_err(|_| WasmError::new(format!("invalid bytecode in method '{}'", method.name), None))?;
        let code_length = code.len() as u32;

        self.collect_branches(&instructions, code_length, method)?;
        self.branch_manager
            .calculate()
            .map_err(|err| err.or_line(self.line))?;

        for (offset, instruction) in &instructions {
            let position = *offset as u32;
            self.line = method.line_table.line_for(position);
            self.branch_manager
                .handle(position, writer)
                .map_err(|err| err.or_line(self.line))?;
            self.translate_instruction(writer, pool, instruction)
                .map_err(|err| err.or_line(self.line))?;
        }
        self.branch_manager
            .handle(code_length, writer)
            .map_err(|err| err.or_line(self.line))?;

        // A method whose last instruction jumps backwards never falls out of
        // its final loop; mark the dead fall-through for the validator.
        if !matches!(instructions.last(), Some((_, instruction)) if is_return(instruction)) {
            writer.write_block_code(BlockOp::Unreachable, None)?;
        }

        writer.write_method_finish(&self.locals)
    }

    fn reset(&mut self, method: &ExportedMethod) {
        self.branch_manager.reset();
        self.locals.clear();
        self.slots.clear();
        self.switch_scratch.clear();
        self.switch_cursor = 0;
        self.pending_compare = None;
        self.line = None;

        // Parameters occupy the low end of the index space; long and double
        // parameters take two JVM slots each.
        self.param_count = method.params.len() as u32;
        let mut slot = 0u16;
        for (index, &param) in method.params.iter().enumerate() {
            self.slots.insert(slot, index as u32);
            slot += match param {
                ValueType::I64 | ValueType::F64 => 2,
                _ => 1,
            };
        }
    }

    /// The Wasm local for a JVM variable slot, appending a new local of the
    /// inferred type on first use.
    fn local(&mut self, slot: u16, value_type: ValueType) -> u32 {
        if let Some(&index) = self.slots.get(&slot) {
            return index;
        }
        let index = self.param_count + self.locals.len() as u32;
        self.locals.push(value_type);
        self.slots.insert(slot, index);
        index
    }

    /// A compiler-owned local that no bytecode slot maps to.
    fn scratch_local(&mut self, value_type: ValueType) -> u32 {
        let index = self.param_count + self.locals.len() as u32;
        self.locals.push(value_type);
        index
    }

    /// First pass: register every control transfer with the branch manager.
    ///
    /// Conditional regions are registered just past the branch instruction,
    /// so the comparison emitted at the branch site stays outside its own
    /// region. Switch regions are registered at the following instruction,
    /// after the translator has parked the selector in a scratch local.
    fn collect_branches(
        &mut self,
        instructions: &[(usize, Instruction)],
        code_length: u32,
        method: &ExportedMethod,
    ) -> WasmResult<()> {
        for (index, (offset, instruction)) in instructions.iter().enumerate() {
            let position = *offset as u32;
            let line = method.line_table.line_for(position).unwrap_or(0);
            let next_position = instructions
                .get(index + 1)
                .map(|(offset, _)| *offset as u32)
                .unwrap_or(code_length);
            match instruction {
                Instruction::Ifeq(offset)
                | Instruction::Ifne(offset)
                | Instruction::Iflt(offset)
                | Instruction::Ifge(offset)
                | Instruction::Ifgt(offset)
                | Instruction::Ifle(offset)
                | Instruction::IfIcmpeq(offset)
                | Instruction::IfIcmpne(offset)
                | Instruction::IfIcmplt(offset)
                | Instruction::IfIcmpge(offset)
                | Instruction::IfIcmpgt(offset)
                | Instruction::IfIcmple(offset) => {
                    self.branch_manager.start_branch(
                        JumpKind::If,
                        position + JUMP_SIZE,
                        *offset as i32 - JUMP_SIZE as i32,
                        line,
                    );
                }
                Instruction::Goto(offset) => {
                    self.branch_manager
                        .start_branch(JumpKind::Goto, position, *offset as i32, line);
                }
                Instruction::Tableswitch { default, offsets, .. } => {
                    let positions = offsets
                        .iter()
                        .map(|offset| (position as i64 + *offset as i64) as u32)
                        .collect();
                    let scratch = self.scratch_local(ValueType::I32);
                    self.switch_scratch.push(scratch);
                    self.branch_manager.start_switch(
                        next_position,
                        line,
                        None,
                        positions,
                        (position as i64 + *default as i64) as u32,
                        scratch,
                    );
                }
                Instruction::Lookupswitch { default, pairs } => {
                    let keys = pairs.iter().map(|(key, _)| *key).collect();
                    let positions = pairs
                        .iter()
                        .map(|(_, offset)| (position as i64 + *offset as i64) as u32)
                        .collect();
                    let scratch = self.scratch_local(ValueType::I32);
                    self.switch_scratch.push(scratch);
                    self.branch_manager.start_switch(
                        next_position,
                        line,
                        Some(keys),
                        positions,
                        (position as i64 + *default as i64) as u32,
                        scratch,
                    );
                }
                Instruction::GotoW(_) | Instruction::Jsr(_) | Instruction::JsrW(_) => {
                    return Err(WasmError::new(
                        format!("unsupported branch instruction {instruction:?}"),
                        Some(line),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Second pass: emit the Wasm counterpart of one instruction.
    fn translate_instruction(
        &mut self,
        writer: &mut dyn ModuleWriter,
        pool: &ConstantPool<'_>,
        instruction: &Instruction,
    ) -> WasmResult<()> {
        use Instruction::*;
        use ValueType::*;

        // A cmp result may only be consumed by a conditional branch on zero.
        if self.pending_compare.is_some()
            && !matches!(instruction, Ifeq(_) | Ifne(_) | Iflt(_) | Ifge(_) | Ifgt(_) | Ifle(_))
        {
            return Err(WasmError::new(
                "comparison is not followed by a conditional branch",
                self.line,
            ));
        }

        match instruction {
            Nop => {}

            // Constants
            Aconstnull => return self.unsupported(instruction),
            Iconstm1 => writer.write_const_int(-1),
            Iconst0 => writer.write_const_int(0),
            Iconst1 => writer.write_const_int(1),
            Iconst2 => writer.write_const_int(2),
            Iconst3 => writer.write_const_int(3),
            Iconst4 => writer.write_const_int(4),
            Iconst5 => writer.write_const_int(5),
            Lconst0 => writer.write_const_long(0),
            Lconst1 => writer.write_const_long(1),
            Fconst0 => writer.write_const_float(0.0),
            Fconst1 => writer.write_const_float(1.0),
            Fconst2 => writer.write_const_float(2.0),
            Dconst0 => writer.write_const_double(0.0),
            Dconst1 => writer.write_const_double(1.0),
            Bipush(value) => writer.write_const_int(*value as i32),
            Sipush(value) => writer.write_const_int(*value as i32),
            Ldc(index) => self.load_constant(writer, pool, *index as u16)?,
            LdcW(index) => self.load_constant(writer, pool, *index)?,
            Ldc2W(index) => match pool.numeric(*index)? {
                NumericConstant::Long(value) => writer.write_const_long(value),
                NumericConstant::Double(value) => writer.write_const_double(value),
                other => {
                    return Err(WasmError::new(
                        format!("ldc2_w expects a wide constant, found {other:?}"),
                        self.line,
                    ))
                }
            },

            // Local loads
            Iload(slot) => self.load(writer, *slot as u16, I32),
            IloadWide(slot) => self.load(writer, *slot, I32),
            Iload0 => self.load(writer, 0, I32),
            Iload1 => self.load(writer, 1, I32),
            Iload2 => self.load(writer, 2, I32),
            Iload3 => self.load(writer, 3, I32),
            Lload(slot) => self.load(writer, *slot as u16, I64),
            LloadWide(slot) => self.load(writer, *slot, I64),
            Lload0 => self.load(writer, 0, I64),
            Lload1 => self.load(writer, 1, I64),
            Lload2 => self.load(writer, 2, I64),
            Lload3 => self.load(writer, 3, I64),
            Fload(slot) => self.load(writer, *slot as u16, F32),
            FloadWide(slot) => self.load(writer, *slot, F32),
            Fload0 => self.load(writer, 0, F32),
            Fload1 => self.load(writer, 1, F32),
            Fload2 => self.load(writer, 2, F32),
            Fload3 => self.load(writer, 3, F32),
            Dload(slot) => self.load(writer, *slot as u16, F64),
            DloadWide(slot) => self.load(writer, *slot, F64),
            Dload0 => self.load(writer, 0, F64),
            Dload1 => self.load(writer, 1, F64),
            Dload2 => self.load(writer, 2, F64),
            Dload3 => self.load(writer, 3, F64),

            // Local stores
            Istore(slot) => self.store(writer, *slot as u16, I32),
            IstoreWide(slot) => self.store(writer, *slot, I32),
            Istore0 => self.store(writer, 0, I32),
            Istore1 => self.store(writer, 1, I32),
            Istore2 => self.store(writer, 2, I32),
            Istore3 => self.store(writer, 3, I32),
            Lstore(slot) => self.store(writer, *slot as u16, I64),
            LstoreWide(slot) => self.store(writer, *slot, I64),
            Lstore0 => self.store(writer, 0, I64),
            Lstore1 => self.store(writer, 1, I64),
            Lstore2 => self.store(writer, 2, I64),
            Lstore3 => self.store(writer, 3, I64),
            Fstore(slot) => self.store(writer, *slot as u16, F32),
            FstoreWide(slot) => self.store(writer, *slot, F32),
            Fstore0 => self.store(writer, 0, F32),
            Fstore1 => self.store(writer, 1, F32),
            Fstore2 => self.store(writer, 2, F32),
            Fstore3 => self.store(writer, 3, F32),
            Dstore(slot) => self.store(writer, *slot as u16, F64),
            DstoreWide(slot) => self.store(writer, *slot, F64),
            Dstore0 => self.store(writer, 0, F64),
            Dstore1 => self.store(writer, 1, F64),
            Dstore2 => self.store(writer, 2, F64),
            Dstore3 => self.store(writer, 3, F64),

            Iinc { index, value } => self.iinc(writer, *index as u16, *value as i32)?,
            IincWide { index, value } => self.iinc(writer, *index, *value as i32)?,

            // Arithmetic
            Iadd => writer.write_numeric_op(NumericOp::Add, I32)?,
            Isub => writer.write_numeric_op(NumericOp::Sub, I32)?,
            Imul => writer.write_numeric_op(NumericOp::Mul, I32)?,
            Idiv => writer.write_numeric_op(NumericOp::Div, I32)?,
            Irem => writer.write_numeric_op(NumericOp::Rem, I32)?,
            Ineg => {
                writer.write_const_int(-1);
                writer.write_numeric_op(NumericOp::Mul, I32)?;
            }
            Ishl => writer.write_numeric_op(NumericOp::Shl, I32)?,
            Ishr => writer.write_numeric_op(NumericOp::ShrS, I32)?,
            Iushr => writer.write_numeric_op(NumericOp::ShrU, I32)?,
            Iand => writer.write_numeric_op(NumericOp::And, I32)?,
            Ior => writer.write_numeric_op(NumericOp::Or, I32)?,
            Ixor => writer.write_numeric_op(NumericOp::Xor, I32)?,

            Ladd => writer.write_numeric_op(NumericOp::Add, I64)?,
            Lsub => writer.write_numeric_op(NumericOp::Sub, I64)?,
            Lmul => writer.write_numeric_op(NumericOp::Mul, I64)?,
            Ldiv => writer.write_numeric_op(NumericOp::Div, I64)?,
            Lrem => writer.write_numeric_op(NumericOp::Rem, I64)?,
            Lneg => {
                writer.write_const_long(-1);
                writer.write_numeric_op(NumericOp::Mul, I64)?;
            }
            // The JVM shift amount is an int; widen it first.
            Lshl => {
                writer.write_cast(Cast::I2l);
                writer.write_numeric_op(NumericOp::Shl, I64)?;
            }
            Lshr => {
                writer.write_cast(Cast::I2l);
                writer.write_numeric_op(NumericOp::ShrS, I64)?;
            }
            Lushr => {
                writer.write_cast(Cast::I2l);
                writer.write_numeric_op(NumericOp::ShrU, I64)?;
            }
            Land => writer.write_numeric_op(NumericOp::And, I64)?,
            Lor => writer.write_numeric_op(NumericOp::Or, I64)?,
            Lxor => writer.write_numeric_op(NumericOp::Xor, I64)?,

            Fadd => writer.write_numeric_op(NumericOp::Add, F32)?,
            Fsub => writer.write_numeric_op(NumericOp::Sub, F32)?,
            Fmul => writer.write_numeric_op(NumericOp::Mul, F32)?,
            Fdiv => writer.write_numeric_op(NumericOp::Div, F32)?,
            Frem => writer.write_numeric_op(NumericOp::Rem, F32)?,
            Fneg => writer.write_numeric_op(NumericOp::Neg, F32)?,
            Dadd => writer.write_numeric_op(NumericOp::Add, F64)?,
            Dsub => writer.write_numeric_op(NumericOp::Sub, F64)?,
            Dmul => writer.write_numeric_op(NumericOp::Mul, F64)?,
            Ddiv => writer.write_numeric_op(NumericOp::Div, F64)?,
            Drem => writer.write_numeric_op(NumericOp::Rem, F64)?,
            Dneg => writer.write_numeric_op(NumericOp::Neg, F64)?,

            // Casts
            I2l => writer.write_cast(Cast::I2l),
            I2f => writer.write_cast(Cast::I2f),
            I2d => writer.write_cast(Cast::I2d),
            L2i => writer.write_cast(Cast::L2i),
            L2f => writer.write_cast(Cast::L2f),
            L2d => writer.write_cast(Cast::L2d),
            F2i => writer.write_cast(Cast::F2i),
            F2l => writer.write_cast(Cast::F2l),
            F2d => writer.write_cast(Cast::F2d),
            D2i => writer.write_cast(Cast::D2i),
            D2l => writer.write_cast(Cast::D2l),
            D2f => writer.write_cast(Cast::D2f),

            // Comparisons producing -1/0/1 fuse with the branch that follows.
            Lcmp => self.pending_compare = Some(I64),
            Fcmpl | Fcmpg => self.pending_compare = Some(F32),
            Dcmpl | Dcmpg => self.pending_compare = Some(F64),

            // Conditional branches: the comparison lands here, the region
            // markers come from the branch manager.
            Ifeq(_) => self.condition(writer, NumericOp::Ne)?,
            Ifne(_) => self.condition(writer, NumericOp::Eq)?,
            Iflt(_) => self.condition(writer, NumericOp::Ge)?,
            Ifge(_) => self.condition(writer, NumericOp::Lt)?,
            Ifgt(_) => self.condition(writer, NumericOp::Le)?,
            Ifle(_) => self.condition(writer, NumericOp::Gt)?,
            IfIcmpeq(_) => writer.write_numeric_op(NumericOp::Ne, I32)?,
            IfIcmpne(_) => writer.write_numeric_op(NumericOp::Eq, I32)?,
            IfIcmplt(_) => writer.write_numeric_op(NumericOp::Ge, I32)?,
            IfIcmpge(_) => writer.write_numeric_op(NumericOp::Lt, I32)?,
            IfIcmpgt(_) => writer.write_numeric_op(NumericOp::Le, I32)?,
            IfIcmple(_) => writer.write_numeric_op(NumericOp::Gt, I32)?,

            // Realized entirely by the region markers.
            Goto(_) => {}

            // Park the selector; the dispatch reads it inside the blocks.
            Tableswitch { low, .. } => {
                if *low != 0 {
                    writer.write_const_int(*low);
                    writer.write_numeric_op(NumericOp::Sub, I32)?;
                }
                let scratch = self.next_switch_scratch()?;
                writer.write_store(scratch);
            }
            Lookupswitch { .. } => {
                let scratch = self.next_switch_scratch()?;
                writer.write_store(scratch);
            }

            // Returns
            Ireturn | Lreturn | Freturn | Dreturn | Return => writer.write_return(),

            _ => return self.unsupported(instruction),
        }
        Ok(())
    }

    fn unsupported(&self, instruction: &Instruction) -> WasmResult<()> {
        Err(WasmError::new(
            format!("unsupported bytecode operation {instruction:?}"),
            self.line,
        ))
    }

    fn load(&mut self, writer: &mut dyn ModuleWriter, slot: u16, value_type: ValueType) {
        let index = self.local(slot, value_type);
        writer.write_load(index);
    }

    fn store(&mut self, writer: &mut dyn ModuleWriter, slot: u16, value_type: ValueType) {
        let index = self.local(slot, value_type);
        writer.write_store(index);
    }

    fn iinc(&mut self, writer: &mut dyn ModuleWriter, slot: u16, value: i32) -> WasmResult<()> {
        let index = self.local(slot, ValueType::I32);
        writer.write_load(index);
        writer.write_const_int(value);
        writer.write_numeric_op(NumericOp::Add, ValueType::I32)?;
        writer.write_store(index);
        Ok(())
    }

    /// Emit the negated jump condition. A pending `cmp` supplies the typed
    /// operands; otherwise the branch compares an int against zero.
    fn condition(&mut self, writer: &mut dyn ModuleWriter, op: NumericOp) -> WasmResult<()> {
        match self.pending_compare.take() {
            Some(value_type) => writer.write_numeric_op(op, value_type),
            None => {
                writer.write_const_int(0);
                writer.write_numeric_op(op, ValueType::I32)
            }
        }
    }

    fn load_constant(
        &mut self,
        writer: &mut dyn ModuleWriter,
        pool: &ConstantPool<'_>,
        index: u16,
    ) -> WasmResult<()> {
        match pool.numeric(index)? {
            NumericConstant::Integer(value) => writer.write_const_int(value),
            NumericConstant::Float(value) => writer.write_const_float(value),
            other => {
                return Err(WasmError::new(
                    format!("ldc expects an int or float constant, found {other:?}"),
                    self.line,
                ))
            }
        }
        Ok(())
    }

    fn next_switch_scratch(&mut self) -> WasmResult<u32> {
        let index = self
            .switch_scratch
            .get(self.switch_cursor)
            .copied()
            .ok_or_else(|| WasmError::new("switch without a scratch local", self.line))?;
        self.switch_cursor += 1;
        Ok(index)
    }
}

fn is_return(instruction: &Instruction) -> bool {
    matches!(
        instruction,
        Instruction::Ireturn
            | Instruction::Lreturn
            | Instruction::Freturn
            | Instruction::Dreturn
            | Instruction::Return
    )
}

impl Default for MethodTranslator {
    fn default() -> Self {
        MethodTranslator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::LineTable;
    use crate::text::TextWriter;
    use classfile_parser::attribute_info::CodeAttribute;
    use classfile_parser::constant_info::{ConstantInfo, IntegerConstant};

    fn method(
        name: &str,
        params: Vec<ValueType>,
        result: Option<ValueType>,
        code: Vec<u8>,
    ) -> ExportedMethod {
        ExportedMethod {
            name: name.to_string(),
            export_name: name.to_string(),
            params,
            result,
            code: CodeAttribute {
                max_stack: 4,
                max_locals: 4,
                code_length: code.len() as u32,
                code,
                exception_table_length: 0,
                exception_table: Vec::new(),
                attributes_count: 0,
                attributes: Vec::new(),
            },
            line_table: LineTable::default(),
        }
    }

    fn compile(method: &ExportedMethod) -> WasmResult<String> {
        compile_with_pool(method, &[])
    }

    fn compile_with_pool(method: &ExportedMethod, entries: &[ConstantInfo]) -> WasmResult<String> {
        let mut writer = TextWriter::new();
        writer.write_export(&method.name, &method.export_name);
        let pool = ConstantPool::new(entries);
        MethodTranslator::new().translate(&mut writer, &pool, method)?;
        writer.finish()
    }

    #[test]
    fn int_constant_returns_the_literal() {
        let method = method(
            "intConst",
            vec![],
            Some(ValueType::I32),
            vec![0x10, 42, 0xAC], // bipush 42; ireturn
        );
        let text = compile(&method).unwrap();
        assert_eq!(
            text,
            "(module\n  (export \"intConst\" (func $intConst))\n  (func $intConst (result i32)\n    i32.const 42\n    return\n  )\n)\n"
        );
    }

    #[test]
    fn add_int_reads_both_parameters() {
        let method = method(
            "addInt",
            vec![ValueType::I32, ValueType::I32],
            Some(ValueType::I32),
            vec![0x1A, 0x1B, 0x60, 0xAC], // iload_0; iload_1; iadd; ireturn
        );
        let text = compile(&method).unwrap();
        assert!(text.contains("(func $addInt (param i32) (param i32) (result i32)"));
        assert!(text.contains("    get_local 0\n    get_local 1\n    i32.add\n    return\n"));
    }

    #[test]
    fn add_double_maps_wide_parameter_slots() {
        // The second double parameter lives in JVM slot 2 but is wasm
        // local 1.
        let method = method(
            "addDouble",
            vec![ValueType::F64, ValueType::F64],
            Some(ValueType::F64),
            vec![0x26, 0x28, 0x63, 0xAF], // dload_0; dload_2; dadd; dreturn
        );
        let text = compile(&method).unwrap();
        assert!(text.contains("    get_local 0\n    get_local 1\n    f64.add\n    return\n"));
    }

    #[test]
    fn ifeq_emits_the_negated_comparison_and_an_if_region() {
        // int condition = 0; if (condition != 0) return 13; else return 76;
        let method = method(
            "ifeq",
            vec![],
            Some(ValueType::I32),
            vec![
                0x03, // iconst_0
                0x3B, // istore_0
                0x1A, // iload_0
                0x99, 0x00, 0x06, // ifeq -> 9
                0x10, 13,   // bipush 13
                0xAC, // ireturn
                0x10, 76,   // bipush 76
                0xAC, // ireturn
            ],
        );
        let text = compile(&method).unwrap();
        let body = "    i32.const 0\n    set_local 0\n    get_local 0\n    i32.const 0\n    i32.ne\n    if\n      i32.const 13\n      return\n    end\n    i32.const 76\n    return\n";
        assert!(text.contains(body), "unexpected body:\n{text}");
        assert!(text.contains("(local i32)"));
    }

    #[test]
    fn double_compare_fuses_with_the_branch() {
        let method = method(
            "cmp",
            vec![],
            Some(ValueType::I32),
            vec![
                0x0E, // dconst_0
                0x0F, // dconst_1
                0x97, // dcmpl
                0x9C, 0x00, 0x06, // ifge -> 9
                0x10, 13, 0xAC, // bipush 13; ireturn
                0x10, 76, 0xAC, // bipush 76; ireturn
            ],
        );
        let text = compile(&method).unwrap();
        assert!(
            text.contains("    f64.const 0\n    f64.const 1\n    f64.lt\n    if\n"),
            "unexpected body:\n{text}"
        );
    }

    #[test]
    fn endless_loop_recovers_loop_if_else_and_back_edge() {
        // do { if (a < 10) b++; else return a; a++; } while (true);
        let method = method(
            "endlessLoop",
            vec![],
            Some(ValueType::I32),
            vec![
                0x03, // 0: iconst_0
                0x3B, // 1: istore_0
                0x03, // 2: iconst_0
                0x3C, // 3: istore_1
                0x1A, // 4: iload_0
                0x10, 10,   // 5: bipush 10
                0xA2, 0x00, 0x09, // 7: if_icmpge -> 16
                0x84, 0x01, 0x01, // 10: iinc 1, 1
                0xA7, 0x00, 0x05, // 13: goto -> 18
                0x1A, // 16: iload_0
                0xAC, // 17: ireturn
                0x84, 0x00, 0x01, // 18: iinc 0, 1
                0xA7, 0xFF, 0xEF, // 21: goto -> 4
            ],
        );
        let text = compile(&method).unwrap();
        let body = "    loop\n      get_local 0\n      i32.const 10\n      i32.lt_s\n      if\n        get_local 1\n        i32.const 1\n        i32.add\n        set_local 1\n      else\n        get_local 0\n        return\n      end\n      get_local 0\n      i32.const 1\n      i32.add\n      set_local 0\n      br 0\n    end\n    unreachable\n";
        assert!(text.contains(body), "unexpected body:\n{text}");
    }

    #[test]
    fn table_switch_builds_blocks_and_br_table() {
        // switch (a) { case 8: b = 1; break; default: b = 9; } return b;
        let method = method(
            "tableSwitch",
            vec![ValueType::I32],
            Some(ValueType::I32),
            vec![
                0x1A, // 0: iload_0
                0xAA, 0x00, 0x00, // 1: tableswitch, 2 pad bytes
                0x00, 0x00, 0x00, 24, // default -> 25
                0x00, 0x00, 0x00, 8, // low
                0x00, 0x00, 0x00, 8, // high
                0x00, 0x00, 0x00, 19, // case 8 -> 20
                0x04, // 20: iconst_1
                0x3C, // 21: istore_1
                0xA7, 0x00, 0x06, // 22: goto -> 28
                0x10, 9, // 25: bipush 9
                0x3C, // 27: istore_1
                0x1B, // 28: iload_1
                0xAC, // 29: ireturn
            ],
        );
        let text = compile(&method).unwrap();
        let body = "    get_local 0\n    i32.const 8\n    i32.sub\n    set_local 1\n    block\n      block\n        block\n          get_local 1\n          br_table 0 1\n        end\n        i32.const 1\n        set_local 2\n        br 1\n      end\n      i32.const 9\n      set_local 2\n    end\n    get_local 2\n    return\n";
        assert!(text.contains(body), "unexpected body:\n{text}");
    }

    #[test]
    fn lookup_switch_compares_each_key() {
        // switch (a) { case 1: return 10; case 1000: return 20;
        //              default: return 30; }
        let method = method(
            "lookupSwitch",
            vec![ValueType::I32],
            Some(ValueType::I32),
            vec![
                0x1A, // 0: iload_0
                0xAB, 0x00, 0x00, // 1: lookupswitch, 2 pad bytes
                0x00, 0x00, 0x00, 33, // default -> 34
                0x00, 0x00, 0x00, 2, // npairs
                0x00, 0x00, 0x00, 1, 0x00, 0x00, 0x00, 27, // 1 -> 28
                0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x00, 30, // 1000 -> 31
                0x10, 10, 0xAC, // 28: bipush 10; ireturn
                0x10, 20, 0xAC, // 31: bipush 20; ireturn
                0x10, 30, 0xAC, // 34: bipush 30; ireturn
            ],
        );
        let text = compile(&method).unwrap();
        let dispatch = "            get_local 1\n            i32.const 1\n            i32.eq\n            br_if 0\n            get_local 1\n            i32.const 1000\n            i32.eq\n            br_if 1\n            br 2\n";
        assert!(text.contains(dispatch), "unexpected dispatch:\n{text}");
        assert!(text.contains("    set_local 1\n    block\n"));
    }

    #[test]
    fn iinc_lowers_to_load_add_store() {
        let method = method(
            "inc",
            vec![ValueType::I32],
            None,
            vec![0x84, 0x00, 0x05, 0xB1], // iinc 0, 5; return
        );
        let text = compile(&method).unwrap();
        assert!(text.contains("    get_local 0\n    i32.const 5\n    i32.add\n    set_local 0\n"));
    }

    #[test]
    fn ldc_loads_numeric_pool_constants() {
        let entries = vec![ConstantInfo::Integer(IntegerConstant { value: 7 })];
        let method = method(
            "seven",
            vec![],
            Some(ValueType::I32),
            vec![0x12, 0x01, 0xAC], // ldc #1; ireturn
        );
        let text = compile_with_pool(&method, &entries).unwrap();
        assert!(text.contains("i32.const 7"));
    }

    #[test]
    fn unsupported_opcode_is_rejected() {
        let method = method("bad", vec![], None, vec![0x57, 0xB1]); // pop; return
        let err = compile(&method).unwrap_err();
        assert!(err.to_string().contains("unsupported bytecode operation"));
    }

    #[test]
    fn dangling_compare_is_rejected() {
        let method = method(
            "bad",
            vec![],
            None,
            vec![0x09, 0x0A, 0x94, 0xB1], // lconst_0; lconst_1; lcmp; return
        );
        let err = compile(&method).unwrap_err();
        assert!(err.to_string().contains("not followed by a conditional branch"));
    }
}
