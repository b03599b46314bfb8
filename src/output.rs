// output.rs - primitive byte-stream encoder
//
// An in-memory stream with the LEB128 and little-endian writers the binary
// format is built from. Section bodies and method code are buffered here so
// their byte length can be prefixed.

use std::io;

/// Section ids of the Wasm binary format, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Custom = 0,
    Type = 1,
    Function = 3,
    Export = 7,
    Code = 10,
}

/// A growable byte buffer with Wasm primitive encoders.
#[derive(Debug, Default)]
pub struct WasmStream {
    bytes: Vec<u8>,
}

impl WasmStream {
    pub fn new() -> WasmStream {
        WasmStream::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop all buffered bytes for reuse.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_byte(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.bytes.extend_from_slice(value);
    }

    /// Four bytes, little-endian.
    pub fn write_int32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Unsigned LEB128, 1-5 bytes.
    pub fn write_varuint32(&mut self, mut value: u32) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.bytes.push(byte);
            if value == 0 {
                return;
            }
        }
    }

    /// Signed LEB128 with sign-extended termination.
    pub fn write_varint32(&mut self, value: i32) {
        self.write_varint64(value as i64);
    }

    /// Signed LEB128 with sign-extended termination.
    pub fn write_varint64(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            // The sign bit of the emitted byte is 0x40.
            if (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0) {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// IEEE-754 bit pattern, little-endian.
    pub fn write_f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// IEEE-754 bit pattern, little-endian.
    pub fn write_f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a section header and body. A custom section carries its name,
    /// length-prefixed, between the size field and the body. Sections with an
    /// empty body are omitted entirely.
    pub fn write_section(&mut self, kind: SectionKind, body: &WasmStream, name: Option<&str>) {
        if body.is_empty() {
            return;
        }
        self.write_varuint32(kind as u32);
        match (kind, name) {
            (SectionKind::Custom, Some(name)) => {
                let mut prefix = WasmStream::new();
                prefix.write_varuint32(name.len() as u32);
                prefix.write_bytes(name.as_bytes());
                self.write_varuint32((prefix.len() + body.len()) as u32);
                self.write_bytes(prefix.as_slice());
            }
            _ => self.write_varuint32(body.len() as u32),
        }
        self.write_bytes(body.as_slice());
    }

    /// Append the buffered bytes of this stream to `target`.
    pub fn write_to(&self, target: &mut WasmStream) {
        target.write_bytes(&self.bytes);
    }

    /// Flush the buffered bytes into an I/O sink.
    pub fn write_out(&self, target: &mut impl io::Write) -> io::Result<()> {
        target.write_all(&self.bytes)
    }
}
