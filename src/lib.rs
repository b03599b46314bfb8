// jv2wasm - JVM class-file to WebAssembly AOT compiler
//
// Compiles the annotated methods of JVM class files into a WebAssembly
// module whose exported functions behave like the original bytecode.
//
// # Architecture
//
// The compiler works in several phases:
//
// 1. **Class parsing** (`classfile.rs`): load a class file, find the methods
//    marked for export, expose descriptors, code and constants
// 2. **Branch collection** (`translate.rs`): first pass over the bytecode,
//    recording every control transfer
// 3. **Structure recovery** (`branch.rs`): rebuild the flat branches as a
//    tree of nested block/loop/if regions
// 4. **Translation** (`translate.rs`): second pass, emitting one Wasm
//    instruction stream per method through the writer protocol
// 5. **Emission** (`binary.rs` / `text.rs`): serialize the module in the
//    binary format, or render it as an S-expression for diagnostics
//
// All module state lives in the writer for the duration of one compilation;
// output bytes exist only after every method body finished, so a failed
// compilation never leaves a partial module behind.

pub mod binary;
pub mod branch;
pub mod classfile;
pub mod error;
pub mod output;
pub mod text;
pub mod translate;
pub mod types;
pub mod writer;

pub use binary::BinaryWriter;
pub use classfile::LoadedClass;
pub use error::{WasmError, WasmResult};
pub use text::TextWriter;
pub use translate::MethodTranslator;
pub use types::{FunctionType, ValueType};
pub use writer::ModuleWriter;

/// Compile class files to a binary Wasm module.
pub fn compile(classes: &[Vec<u8>]) -> WasmResult<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    compile_with(&mut writer, classes)?;
    writer.finish()
}

/// Compile class files to the text representation.
pub fn compile_to_text(classes: &[Vec<u8>]) -> WasmResult<String> {
    let mut writer = TextWriter::new();
    compile_with(&mut writer, classes)?;
    writer.finish()
}

/// Feed every exported method of every class to a writer, in declaration
/// order. That order defines the function index space of the module.
fn compile_with(writer: &mut dyn ModuleWriter, classes: &[Vec<u8>]) -> WasmResult<()> {
    let mut translator = MethodTranslator::new();
    for data in classes {
        let class = LoadedClass::parse(data)?;
        let pool = class.constant_pool();
        for method in class.exported_methods()? {
            writer.write_export(&method.name, &method.export_name);
            translator.translate(writer, &pool, &method)?;
        }
    }
    Ok(())
}
