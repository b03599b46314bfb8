// jv2wasm - JVM class-file to WebAssembly AOT compiler
//
// Usage:
//   jv2wasm Math.class -o math.wasm
//   jv2wasm Math.class --text -o math.wat

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use jv2wasm::{BinaryWriter, LoadedClass, MethodTranslator, ModuleWriter, TextWriter};

#[derive(Parser, Debug)]
#[command(name = "jv2wasm")]
#[command(about = "JVM class-file to WebAssembly AOT compiler")]
#[command(version)]
struct Args {
    /// Input class files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file
    #[arg(short, long, default_value = "output.wasm")]
    output: PathBuf,

    /// Emit the text format instead of the binary module
    #[arg(long)]
    text: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        eprintln!("jv2wasm - JVM class-file to WebAssembly AOT compiler");
        eprintln!("====================================================");
    }

    let mut classes = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        if args.verbose {
            eprintln!("Loading class: {}", input.display());
        }
        let data = std::fs::read(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        classes.push(data);
    }

    if args.text {
        let mut writer = TextWriter::new();
        compile_classes(&mut writer, &args, &classes)?;
        let text = writer.finish().context("Compilation failed")?;
        if args.verbose {
            eprintln!("  Output size: {} bytes", text.len());
        }
        std::fs::write(&args.output, text).context("Failed to write output")?;
    } else {
        let mut writer = BinaryWriter::new();
        compile_classes(&mut writer, &args, &classes)?;
        let wasm = writer.finish().context("Compilation failed")?;
        if args.verbose {
            eprintln!("  Output size: {} bytes", wasm.len());
        }
        std::fs::write(&args.output, wasm).context("Failed to write output")?;
    }

    if args.verbose {
        eprintln!("Wrote: {}", args.output.display());
    }

    Ok(())
}

/// Feed every exported method of every class to the writer, in declaration
/// order, reporting each phase under --verbose.
fn compile_classes(
    writer: &mut dyn ModuleWriter,
    args: &Args,
    classes: &[Vec<u8>],
) -> Result<()> {
    let mut translator = MethodTranslator::new();
    let mut functions = 0usize;
    for (input, data) in args.inputs.iter().zip(classes) {
        let class = LoadedClass::parse(data)
            .with_context(|| format!("Failed to parse {}", input.display()))?;
        let pool = class.constant_pool();
        let methods = class.exported_methods()?;
        if args.verbose {
            eprintln!("  {}: {} exported method(s)", input.display(), methods.len());
        }
        for method in methods {
            if args.verbose {
                eprintln!(
                    "    {} ({} bytes bytecode) -> export \"{}\"",
                    method.name,
                    method.code.code.len(),
                    method.export_name
                );
            }
            writer.write_export(&method.name, &method.export_name);
            translator.translate(writer, &pool, &method)?;
            functions += 1;
        }
    }
    if args.verbose {
        eprintln!("  Wasm functions: {functions}");
    }
    Ok(())
}
