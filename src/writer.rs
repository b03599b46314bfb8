// writer.rs - the emission protocol
//
// The method translator drives one of these per module. The binary and text
// back-ends implement it; the branch manager calls back into it when its
// region tree opens and closes blocks.

use crate::error::WasmResult;
use crate::types::ValueType;

/// Whether a `write_method_param` call declares a parameter or the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Param,
    Return,
}

/// A numeric operation, dispatched against a value type by the back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A value-type conversion, named after the JVM cast opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    I2l,
    I2f,
    I2d,
    L2i,
    L2f,
    L2d,
    F2i,
    F2l,
    F2d,
    D2i,
    D2l,
    D2f,
}

/// A structured-control operator emitted through `write_block_code`.
///
/// `Else` closes the true arm and opens the false arm at once. `Unreachable`
/// marks the dead fall-through past a loop no path leaves normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOp {
    Block,
    Loop,
    If,
    Else,
    End,
    Br,
    BrIf,
    BrTable,
    Return,
    Unreachable,
}

/// Payload accompanying a `BlockOp`.
///
/// The switch dispatches read their selector from a scratch local because
/// the translator parks it there before the case blocks open; an operand
/// pushed outside a block is not addressable inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockData {
    /// Relative label depth for `Br` / `BrIf`.
    Depth(u32),
    /// Table-switch dispatch: push `scratch`, then `br_table` over the block
    /// indices in case-key order, default last.
    Table { scratch: u32, targets: Vec<u32> },
    /// Lookup-switch dispatch: compare `scratch` against each key and
    /// `br_if` to the paired depth, falling back to `br default`.
    Lookup {
        scratch: u32,
        cases: Vec<(i32, u32)>,
        default: u32,
    },
}

/// The protocol a module back-end implements.
///
/// Buffer appends are infallible; operations that can lack a WebAssembly
/// counterpart for a given value type return a `WasmResult`.
pub trait ModuleWriter {
    /// Register an export for a method that may not be emitted yet.
    fn write_export(&mut self, method_name: &str, export_name: &str);

    /// Begin a function body and clear the per-method state.
    fn write_method_start(&mut self, name: &str);

    /// Append to the in-progress function signature.
    fn write_method_param(&mut self, kind: ParamKind, value_type: ValueType);

    /// Commit the current function: type index, locals prologue, body, END.
    fn write_method_finish(&mut self, locals: &[ValueType]) -> WasmResult<()>;

    fn write_const_int(&mut self, value: i32);
    fn write_const_long(&mut self, value: i64);
    fn write_const_float(&mut self, value: f32);
    fn write_const_double(&mut self, value: f64);

    /// Push a local onto the operand stack.
    fn write_load(&mut self, index: u32);

    /// Pop the operand stack into a local.
    fn write_store(&mut self, index: u32);

    fn write_numeric_op(&mut self, op: NumericOp, value_type: ValueType) -> WasmResult<()>;

    fn write_cast(&mut self, cast: Cast);

    fn write_return(&mut self);

    /// Emit a structured-control instruction with its payload.
    fn write_block_code(&mut self, op: BlockOp, data: Option<&BlockData>) -> WasmResult<()>;
}
