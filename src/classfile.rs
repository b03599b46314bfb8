// classfile.rs - class-file access layer
//
// Wraps the classfile-parser crate and exposes the slices of a class the
// compiler consumes: the methods marked for export, their descriptors and
// code attributes, the numeric constant pool, and the line-number table used
// for diagnostics.

use classfile_parser::attribute_info::{code_attribute_parser, AttributeInfo, CodeAttribute};
use classfile_parser::class_parser;
use classfile_parser::constant_info::ConstantInfo;
use classfile_parser::method_info::{MethodAccessFlags, MethodInfo};
use classfile_parser::ClassFile;

use crate::error::{WasmError, WasmResult};
use crate::types::ValueType;

/// The unqualified annotation name that marks a method for compilation.
const EXPORT_ANNOTATION: &str = "Export";

/// A parsed class file.
pub struct LoadedClass {
    class: ClassFile,
}

/// One method carrying the export annotation, with everything the translator
/// needs to compile it.
pub struct ExportedMethod {
    pub name: String,
    pub export_name: String,
    pub params: Vec<ValueType>,
    pub result: Option<ValueType>,
    pub code: CodeAttribute,
    pub line_table: LineTable,
}

/// A numeric entry of the constant pool, as loaded by `ldc`/`ldc2_w`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

/// Read access to the constant pool. Indices are 1-based per the class-file
/// format; wide constants occupy two slots.
pub struct ConstantPool<'a> {
    entries: &'a [ConstantInfo],
}

impl<'a> ConstantPool<'a> {
    pub fn new(entries: &'a [ConstantInfo]) -> ConstantPool<'a> {
        ConstantPool { entries }
    }

    fn entry(&self, index: u16) -> WasmResult<&'a ConstantInfo> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
            .ok_or_else(|| WasmError::new(format!("constant pool index {index} out of range"), None))
    }

    pub fn utf8(&self, index: u16) -> WasmResult<&'a str> {
        match self.entry(index)? {
            ConstantInfo::Utf8(constant) => Ok(&constant.utf8_string),
            other => Err(WasmError::new(
                format!("constant pool entry {index} is not utf8 but {other:?}"),
                None,
            )),
        }
    }

    pub fn numeric(&self, index: u16) -> WasmResult<NumericConstant> {
        match self.entry(index)? {
            ConstantInfo::Integer(constant) => Ok(NumericConstant::Integer(constant.value)),
            ConstantInfo::Float(constant) => Ok(NumericConstant::Float(constant.value)),
            ConstantInfo::Long(constant) => Ok(NumericConstant::Long(constant.value)),
            ConstantInfo::Double(constant) => Ok(NumericConstant::Double(constant.value)),
            other => Err(WasmError::new(
                format!("constant pool entry {index} is not numeric but {other:?}"),
                None,
            )),
        }
    }
}

/// Maps code positions to Java source lines, from the LineNumberTable
/// attribute. Methods compiled without debug information have an empty table.
#[derive(Debug, Default)]
pub struct LineTable {
    entries: Vec<(u16, u16)>,
}

impl LineTable {
    /// The source line of the instruction at `position`.
    pub fn line_for(&self, position: u32) -> Option<u32> {
        self.entries
            .iter()
            .take_while(|(start, _)| *start as u32 <= position)
            .last()
            .map(|(_, line)| *line as u32)
    }
}

impl LoadedClass {
    /// Parse a class file from its raw bytes.
    pub fn parse(data: &[u8]) -> WasmResult<LoadedClass> {
        let (_, class) = class_parser(data)
            .map_err(|_| WasmError::new("invalid class file", None))?;
        Ok(LoadedClass { class })
    }

    pub fn constant_pool(&self) -> ConstantPool<'_> {
        ConstantPool { entries: &self.class.const_pool }
    }

    /// The methods of this class that carry the export annotation, in
    /// declaration order.
    pub fn exported_methods(&self) -> WasmResult<Vec<ExportedMethod>> {
        let pool = self.constant_pool();
        let mut methods = Vec::new();
        for method in &self.class.methods {
            let name = pool.utf8(method.name_index)?;
            let export_name = match find_export_annotation(&pool, method)? {
                Some(export_name) => export_name.unwrap_or_else(|| name.to_string()),
                None => continue,
            };
            if !method.access_flags.contains(MethodAccessFlags::STATIC) {
                return Err(WasmError::new(
                    format!("exported method '{name}' must be static"),
                    None,
                ));
            }
            let descriptor = pool.utf8(method.descriptor_index)?;
            let (params, result) = parse_descriptor(descriptor)?;
            let code = find_code_attribute(&pool, method)?.ok_or_else(|| {
                WasmError::new(format!("exported method '{name}' has no code"), None)
            })?;
            let line_table = find_line_table(&pool, &code)?;
            methods.push(ExportedMethod {
                name: name.to_string(),
                export_name,
                params,
                result,
                code,
                line_table,
            });
        }
        Ok(methods)
    }
}

/// Decode a method descriptor like `(IDJ)V` into parameter and result types.
fn parse_descriptor(descriptor: &str) -> WasmResult<(Vec<ValueType>, Option<ValueType>)> {
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(|| WasmError::new(format!("malformed method descriptor '{descriptor}'"), None))?;
    let (params_part, return_part) = inner;

    let mut params = Vec::new();
    for ch in params_part.chars() {
        params.push(field_type(ch, descriptor)?);
    }
    let result = match return_part {
        "V" => None,
        _ => {
            let ch = return_part.chars().next().unwrap_or('V');
            if return_part.chars().count() != 1 {
                return Err(WasmError::new(
                    format!("unsupported return type '{return_part}' in '{descriptor}'"),
                    None,
                ));
            }
            Some(field_type(ch, descriptor)?)
        }
    };
    Ok((params, result))
}

fn field_type(ch: char, descriptor: &str) -> WasmResult<ValueType> {
    match ch {
        'Z' | 'B' | 'C' | 'S' | 'I' => Ok(ValueType::I32),
        'J' => Ok(ValueType::I64),
        'F' => Ok(ValueType::F32),
        'D' => Ok(ValueType::F64),
        'L' | '[' => Err(WasmError::new(
            format!("object and array types are not supported: '{descriptor}'"),
            None,
        )),
        _ => Err(WasmError::new(
            format!("unknown type '{ch}' in descriptor '{descriptor}'"),
            None,
        )),
    }
}

fn attribute_name<'a>(pool: &ConstantPool<'a>, attribute: &AttributeInfo) -> WasmResult<&'a str> {
    pool.utf8(attribute.attribute_name_index)
}

fn find_code_attribute(
    pool: &ConstantPool<'_>,
    method: &MethodInfo,
) -> WasmResult<Option<CodeAttribute>> {
    for attribute in &method.attributes {
        if attribute_name(pool, attribute)? == "Code" {
            let (_, code) = code_attribute_parser(&attribute.info)
                .map_err(|_| WasmError::new("invalid code attribute", None))?;
            return Ok(Some(code));
        }
    }
    Ok(None)
}

fn find_line_table(pool: &ConstantPool<'_>, code: &CodeAttribute) -> WasmResult<LineTable> {
    for attribute in &code.attributes {
        if attribute_name(pool, attribute)? == "LineNumberTable" {
            let mut reader = Reader::new(&attribute.info);
            let count = reader.u16()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let start = reader.u16()?;
                let line = reader.u16()?;
                entries.push((start, line));
            }
            entries.sort_by_key(|(start, _)| *start);
            return Ok(LineTable { entries });
        }
    }
    Ok(LineTable::default())
}

/// Scan the runtime-visible annotations of a method for the export marker.
/// Returns `Some(override)` when present, where the override is the optional
/// `name` element.
fn find_export_annotation(
    pool: &ConstantPool<'_>,
    method: &MethodInfo,
) -> WasmResult<Option<Option<String>>> {
    for attribute in &method.attributes {
        if attribute_name(pool, attribute)? != "RuntimeVisibleAnnotations" {
            continue;
        }
        let mut reader = Reader::new(&attribute.info);
        let count = reader.u16()?;
        for _ in 0..count {
            if let Some(export_name) = read_annotation(pool, &mut reader)? {
                return Ok(Some(export_name));
            }
        }
    }
    Ok(None)
}

/// Read one annotation structure, returning `Some` when it is the export
/// marker. The element values are always consumed so the reader stays in
/// sync for the following annotation.
fn read_annotation(
    pool: &ConstantPool<'_>,
    reader: &mut Reader<'_>,
) -> WasmResult<Option<Option<String>>> {
    let type_name = pool.utf8(reader.u16()?)?;
    let is_export = unqualified_name(type_name) == EXPORT_ANNOTATION;
    let pair_count = reader.u16()?;
    let mut export_name = None;
    for _ in 0..pair_count {
        let element_name = pool.utf8(reader.u16()?)?;
        let value = read_element_value(pool, reader)?;
        if is_export && element_name == "name" {
            export_name = value;
        }
    }
    Ok(if is_export { Some(export_name) } else { None })
}

/// Consume one element_value, returning the string payload when it is a
/// string constant.
fn read_element_value(
    pool: &ConstantPool<'_>,
    reader: &mut Reader<'_>,
) -> WasmResult<Option<String>> {
    let tag = reader.u8()?;
    match tag {
        b's' => {
            let value = pool.utf8(reader.u16()?)?;
            Ok(Some(value.to_string()))
        }
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'c' => {
            reader.u16()?;
            Ok(None)
        }
        b'e' => {
            reader.u16()?;
            reader.u16()?;
            Ok(None)
        }
        b'@' => {
            read_annotation(pool, reader)?;
            Ok(None)
        }
        b'[' => {
            let count = reader.u16()?;
            for _ in 0..count {
                read_element_value(pool, reader)?;
            }
            Ok(None)
        }
        _ => Err(WasmError::new(
            format!("unknown annotation element tag '{}'", tag as char),
            None,
        )),
    }
}

/// The simple name of a type descriptor like `Lorg/web/Export;`.
fn unqualified_name(descriptor: &str) -> &str {
    let name = descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .unwrap_or(descriptor);
    let name = name.rsplit('/').next().unwrap_or(name);
    name.rsplit('$').next().unwrap_or(name)
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, position: 0 }
    }

    fn u8(&mut self) -> WasmResult<u8> {
        let value = self
            .bytes
            .get(self.position)
            .copied()
            .ok_or_else(|| WasmError::new("truncated attribute data", None))?;
        self.position += 1;
        Ok(value)
    }

    fn u16(&mut self) -> WasmResult<u16> {
        let high = self.u8()?;
        let low = self.u8()?;
        Ok(u16::from_be_bytes([high, low]))
    }
}
