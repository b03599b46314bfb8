// End-to-end tests: assemble small class files by hand, compile them, and
// validate the emitted module with wasmparser.

/// A minimal class-file assembler, just enough for static methods with a
/// code attribute and a runtime-visible annotation.
#[derive(Default)]
struct ClassBuilder {
    pool: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

const ACC_PUBLIC_STATIC: u16 = 0x0009;

impl ClassBuilder {
    fn new() -> ClassBuilder {
        ClassBuilder::default()
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let mut entry = vec![1u8];
        entry.extend((value.len() as u16).to_be_bytes());
        entry.extend(value.as_bytes());
        self.pool.push(entry);
        self.pool.len() as u16
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7u8];
        entry.extend(name_index.to_be_bytes());
        self.pool.push(entry);
        self.pool.len() as u16
    }

    /// Add a public static method. `annotation` controls the export marker:
    /// `None` leaves the method unannotated, `Some(None)` adds a bare
    /// `@Export`, `Some(Some(n))` adds `@Export(name = n)`.
    fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        code: &[u8],
        annotation: Option<Option<&str>>,
    ) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let code_name = self.utf8("Code");

        let mut attributes: Vec<Vec<u8>> = Vec::new();

        let mut code_info = Vec::new();
        code_info.extend(8u16.to_be_bytes()); // max_stack
        code_info.extend(max_locals.to_be_bytes());
        code_info.extend((code.len() as u32).to_be_bytes());
        code_info.extend(code);
        code_info.extend(0u16.to_be_bytes()); // exception table
        code_info.extend(0u16.to_be_bytes()); // attributes
        attributes.push(attribute(code_name, &code_info));

        if let Some(export_name) = annotation {
            let annotations_name = self.utf8("RuntimeVisibleAnnotations");
            let type_index = self.utf8("Lorg/webassembly/annotation/Export;");
            let mut info = Vec::new();
            info.extend(1u16.to_be_bytes()); // one annotation
            info.extend(type_index.to_be_bytes());
            match export_name {
                Some(value) => {
                    let name_element = self.utf8("name");
                    let value_index = self.utf8(value);
                    info.extend(1u16.to_be_bytes());
                    info.extend(name_element.to_be_bytes());
                    info.push(b's');
                    info.extend(value_index.to_be_bytes());
                }
                None => info.extend(0u16.to_be_bytes()),
            }
            attributes.push(attribute(annotations_name, &info));
        }

        let mut method = Vec::new();
        method.extend(ACC_PUBLIC_STATIC.to_be_bytes());
        method.extend(name_index.to_be_bytes());
        method.extend(descriptor_index.to_be_bytes());
        method.extend((attributes.len() as u16).to_be_bytes());
        for attr in attributes {
            method.extend(attr);
        }
        self.methods.push(method);
    }

    fn build(mut self) -> Vec<u8> {
        let this_class = self.class("TestClass");
        let super_class = self.class("java/lang/Object");

        let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE];
        bytes.extend(0u16.to_be_bytes()); // minor
        bytes.extend(52u16.to_be_bytes()); // major, Java 8
        bytes.extend((self.pool.len() as u16 + 1).to_be_bytes());
        for entry in &self.pool {
            bytes.extend(entry);
        }
        bytes.extend(0x0021u16.to_be_bytes()); // public super
        bytes.extend(this_class.to_be_bytes());
        bytes.extend(super_class.to_be_bytes());
        bytes.extend(0u16.to_be_bytes()); // interfaces
        bytes.extend(0u16.to_be_bytes()); // fields
        bytes.extend((self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            bytes.extend(method);
        }
        bytes.extend(0u16.to_be_bytes()); // class attributes
        bytes
    }
}

fn attribute(name_index: u16, info: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend(name_index.to_be_bytes());
    bytes.extend((info.len() as u32).to_be_bytes());
    bytes.extend(info);
    bytes
}

#[test]
fn class_without_exports_compiles_to_the_bare_header() {
    let mut builder = ClassBuilder::new();
    builder.method("ignored", "()V", 1, &[0xB1], None); // return
    let wasm = jv2wasm::compile(&[builder.build()]).unwrap();
    assert_eq!(wasm, [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn int_constant_module_validates_and_exports() {
    let mut builder = ClassBuilder::new();
    builder.method(
        "intConst",
        "()I",
        1,
        &[0x10, 42, 0xAC], // bipush 42; ireturn
        Some(None),
    );
    let class = builder.build();

    let wasm = jv2wasm::compile(&[class.clone()]).unwrap();
    wasmparser::validate(&wasm).expect("emitted module validates");
    assert!(wasm.starts_with(&[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]));
    // i32.const 42; return; end
    assert!(windows_contain(&wasm, &[0x41, 42, 0x0F, 0x0B]));

    let text = jv2wasm::compile_to_text(&[class]).unwrap();
    assert!(text.contains("(export \"intConst\" (func $intConst))"));
    assert!(text.contains("i32.const 42"));
}

#[test]
fn annotation_name_element_overrides_the_export_name() {
    let mut builder = ClassBuilder::new();
    builder.method("intConst", "()I", 1, &[0x10, 42, 0xAC], Some(Some("answer")));
    let text = jv2wasm::compile_to_text(&[builder.build()]).unwrap();
    assert!(text.contains("(export \"answer\" (func $intConst))"));
}

#[test]
fn arithmetic_methods_validate() {
    let mut builder = ClassBuilder::new();
    builder.method(
        "addInt",
        "(II)I",
        2,
        &[0x1A, 0x1B, 0x60, 0xAC], // iload_0; iload_1; iadd; ireturn
        Some(None),
    );
    builder.method(
        "addDouble",
        "(DD)D",
        4,
        &[0x26, 0x28, 0x63, 0xAF], // dload_0; dload_2; dadd; dreturn
        Some(None),
    );
    let class = builder.build();

    let wasm = jv2wasm::compile(&[class.clone()]).unwrap();
    wasmparser::validate(&wasm).expect("emitted module validates");

    let text = jv2wasm::compile_to_text(&[class]).unwrap();
    assert!(text.contains("i32.add"));
    assert!(text.contains("f64.add"));
    // Both functions share the index space in declaration order.
    assert!(text.find("$addInt").unwrap() < text.find("$addDouble").unwrap());
}

#[test]
fn if_else_module_validates() {
    // int condition = 0; if (condition != 0) return 13; else return 76;
    let code = [
        0x03, 0x3B, 0x1A, // iconst_0; istore_0; iload_0
        0x99, 0x00, 0x06, // ifeq -> 9
        0x10, 13, 0xAC, // bipush 13; ireturn
        0x10, 76, 0xAC, // bipush 76; ireturn
    ];
    let mut builder = ClassBuilder::new();
    builder.method("ifeq", "()I", 1, &code, Some(None));
    let wasm = jv2wasm::compile(&[builder.build()]).unwrap();
    wasmparser::validate(&wasm).expect("emitted module validates");
}

#[test]
fn endless_loop_module_validates() {
    // do { if (a < 10) b++; else return a; a++; } while (true);
    let code = [
        0x03, 0x3B, 0x03, 0x3C, // a = 0; b = 0
        0x1A, 0x10, 10, // iload_0; bipush 10
        0xA2, 0x00, 0x09, // if_icmpge -> 16
        0x84, 0x01, 0x01, // iinc 1, 1
        0xA7, 0x00, 0x05, // goto -> 18
        0x1A, 0xAC, // iload_0; ireturn
        0x84, 0x00, 0x01, // iinc 0, 1
        0xA7, 0xFF, 0xEF, // goto -> 4
    ];
    let mut builder = ClassBuilder::new();
    builder.method("endlessLoop", "()I", 2, &code, Some(None));
    let class = builder.build();

    let wasm = jv2wasm::compile(&[class.clone()]).unwrap();
    wasmparser::validate(&wasm).expect("emitted module validates");

    let text = jv2wasm::compile_to_text(&[class]).unwrap();
    assert!(text.contains("loop"));
    assert!(text.contains("br 0"));
}

#[test]
fn switch_modules_validate() {
    // switch (a) { case 8: b = 1; break; default: b = 9; } return b;
    let table_switch = [
        0x1A, // iload_0
        0xAA, 0x00, 0x00, // tableswitch + padding
        0x00, 0x00, 0x00, 24, // default -> 25
        0x00, 0x00, 0x00, 8, // low
        0x00, 0x00, 0x00, 8, // high
        0x00, 0x00, 0x00, 19, // case 8 -> 20
        0x04, 0x3C, // iconst_1; istore_1
        0xA7, 0x00, 0x06, // goto -> 28
        0x10, 9, 0x3C, // bipush 9; istore_1
        0x1B, 0xAC, // iload_1; ireturn
    ];
    // switch (a) {
    //     case 1: b = 1; break;
    //     case 1000:
    //     case 1001:
    //         if (a == 1000) { b = 2; break; } else { b = 0; }
    //         //$FALL-THROUGH$
    //     case Integer.MAX_VALUE: b = 3; break;
    //     default: b = 9;
    // }
    // return b;
    let lookup_switch = [
        0x1A, // 0: iload_0
        0xAB, 0x00, 0x00, // 1: lookupswitch + padding
        0x00, 0x00, 0x00, 67, // default -> 68
        0x00, 0x00, 0x00, 4, // npairs
        0x00, 0x00, 0x00, 1, 0x00, 0x00, 0x00, 43, // 1 -> 44
        0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x00, 48, // 1000 -> 49
        0x00, 0x00, 0x03, 0xE9, 0x00, 0x00, 0x00, 48, // 1001 -> 49
        0x7F, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 62, // MAX_VALUE -> 63
        0x04, 0x3C, // 44: iconst_1; istore_1
        0xA7, 0x00, 25, // 46: goto -> 71 (break)
        0x1A, // 49: iload_0
        0x11, 0x03, 0xE8, // 50: sipush 1000
        0xA0, 0x00, 0x08, // 53: if_icmpne -> 61
        0x05, 0x3C, // 56: iconst_2; istore_1
        0xA7, 0x00, 13, // 58: goto -> 71 (break inside the if)
        0x03, 0x3C, // 61: iconst_0; istore_1, falls through
        0x06, 0x3C, // 63: iconst_3; istore_1
        0xA7, 0x00, 0x06, // 65: goto -> 71 (break)
        0x10, 9, 0x3C, // 68: bipush 9; istore_1
        0x1B, 0xAC, // 71: iload_1; ireturn
    ];
    let mut builder = ClassBuilder::new();
    builder.method("tableSwitch", "(I)I", 2, &table_switch, Some(None));
    builder.method("lookupSwitch", "(I)I", 2, &lookup_switch, Some(None));
    let class = builder.build();

    let wasm = jv2wasm::compile(&[class.clone()]).unwrap();
    wasmparser::validate(&wasm).expect("emitted module validates");

    let text = jv2wasm::compile_to_text(&[class]).unwrap();
    assert!(text.contains("br_table 0 1"));

    // Fall-through cases 1000 and 1001 share one block index, and MAX_VALUE
    // sits one level further out.
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let dispatch_of = |key: &str| {
        let key_line = format!("i32.const {key}");
        lines
            .windows(3)
            .find(|window| window[0] == key_line && window[1] == "i32.eq")
            .map(|window| window[2].to_string())
    };
    assert_eq!(dispatch_of("1000").as_deref(), Some("br_if 1"));
    assert_eq!(dispatch_of("1001").as_deref(), Some("br_if 1"));
    assert_eq!(dispatch_of("2147483647").as_deref(), Some("br_if 2"));
    // The break inside the if region exits the whole switch: the if level
    // plus the case blocks the switch walk counted.
    assert!(lines.contains(&"br 3"));
}

#[test]
fn unsupported_bytecode_aborts_the_compilation() {
    let mut builder = ClassBuilder::new();
    // invokestatic #0 is far outside the supported subset
    builder.method("bad", "()V", 1, &[0xB8, 0x00, 0x00, 0xB1], Some(None));
    assert!(jv2wasm::compile(&[builder.build()]).is_err());
}

fn windows_contain(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
