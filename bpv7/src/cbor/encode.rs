//! Definite-length CBOR emission.

const MAJOR_UINT: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_SIMPLE: u8 = 7;

#[derive(Default)]
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_header(&mut self, major: u8, value: u64) {
        let major = major << 5;
        if value < 24 {
            self.data.push(major | value as u8);
        } else if value <= u8::MAX as u64 {
            self.data.push(major | 24);
            self.data.push(value as u8);
        } else if value <= u16::MAX as u64 {
            self.data.push(major | 25);
            self.data.extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= u32::MAX as u64 {
            self.data.push(major | 26);
            self.data.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.data.push(major | 27);
            self.data.extend_from_slice(&value.to_be_bytes());
        }
    }

    pub fn emit_uint(&mut self, value: u64) {
        self.put_header(MAJOR_UINT, value);
    }

    pub fn emit_bytes(&mut self, value: &[u8]) {
        self.put_header(MAJOR_BYTES, value.len() as u64);
        self.data.extend_from_slice(value);
    }

    pub fn emit_text(&mut self, value: &str) {
        self.put_header(MAJOR_TEXT, value.len() as u64);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Emits an array header; the caller emits exactly `len` items after it.
    pub fn emit_array(&mut self, len: usize) {
        self.put_header(MAJOR_ARRAY, len as u64);
    }

    pub fn emit_bool(&mut self, value: bool) {
        self.data.push((MAJOR_SIMPLE << 5) | if value { 21 } else { 20 });
    }

    /// Appends pre-encoded CBOR verbatim.
    pub fn emit_raw(&mut self, cbor: &[u8]) {
        self.data.extend_from_slice(cbor);
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_headers() {
        let mut e = Encoder::new();
        e.emit_uint(0);
        e.emit_uint(23);
        e.emit_uint(24);
        e.emit_uint(500);
        e.emit_uint(70_000);
        e.emit_uint(u64::MAX);
        assert_eq!(
            e.build(),
            [
                vec![0x00, 0x17, 0x18, 24, 0x19, 0x01, 0xf4, 0x1a, 0x00, 0x01, 0x11, 0x70],
                vec![0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
            ]
            .concat()
        );
    }

    #[test]
    fn text_and_bytes() {
        let mut e = Encoder::new();
        e.emit_text("abc");
        e.emit_bytes(&[1, 2]);
        assert_eq!(e.build(), vec![0x63, b'a', b'b', b'c', 0x42, 1, 2]);
    }

    #[test]
    fn array_header() {
        let mut e = Encoder::new();
        e.emit_array(2);
        e.emit_uint(1);
        e.emit_bool(true);
        assert_eq!(e.build(), vec![0x82, 0x01, 0xf5]);
    }
}
