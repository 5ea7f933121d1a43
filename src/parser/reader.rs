//! Byte reader for the WebAssembly binary format
//!
//! Little-endian fixed-width integers and floats, plus the LEB128 variable
//! length encodings used throughout the format.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io;

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "no more bytes to read")
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8, io::Error> {
        self.next().ok_or_else(eof)
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn has_at_least(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], io::Error> {
        if !self.has_at_least(len) {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes to read"));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Split off the next `len` bytes as an independent reader whose
    /// positions are still reported relative to the whole input.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, io::Error> {
        let start = self.pos;
        self.read_slice(len)?;
        Ok(Reader {
            bytes: &self.bytes[..start + len],
            pos: start,
        })
    }

    // Read and interpret types ------------------------------------------------

    // le
    pub fn read_u32(&mut self) -> Result<u32, io::Error> {
        let mut bytes = self.read_slice(4)?;
        bytes.read_u32::<LittleEndian>()
    }

    pub fn read_vu32(&mut self) -> Result<u32, io::Error> {
        read_vu(&mut || self.read_byte(), 32).map(|v| v as u32)
    }

    pub fn read_vs32(&mut self) -> Result<i32, io::Error> {
        read_vs(&mut || self.read_byte(), 32).map(|v| v as i32)
    }

    pub fn read_vs33(&mut self) -> Result<i64, io::Error> {
        read_vs(&mut || self.read_byte(), 33)
    }

    pub fn read_vs64(&mut self) -> Result<i64, io::Error> {
        read_vs(&mut || self.read_byte(), 64)
    }

    pub fn read_f32(&mut self) -> Result<f32, io::Error> {
        let mut bytes = self.read_slice(4)?;
        bytes.read_f32::<LittleEndian>()
    }

    pub fn read_f64(&mut self) -> Result<f64, io::Error> {
        let mut bytes = self.read_slice(8)?;
        bytes.read_f64::<LittleEndian>()
    }

    pub fn read_string(&mut self) -> Result<String, io::Error> {
        let len = self.read_vu32()? as usize;
        let bytes = self.read_slice(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 sequence"))
    }

    pub fn read_u8vec(&mut self) -> Result<Vec<u8>, io::Error> {
        let len = self.read_vu32()? as usize;
        Ok(self.read_slice(len)?.to_vec())
    }
}

impl Iterator for Reader<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        let byte = self.bytes.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }
}

fn read_vu<F>(reader: &mut F, size: u32) -> Result<u64, io::Error>
where
    F: FnMut() -> Result<u8, io::Error>,
{
    let mut result: u64 = 0;
    let mut shift = 0;
    let max_bytes = size.div_ceil(7);

    for i in 0..max_bytes {
        let b = reader()?;
        let payload = (b & 0x7f) as u64;
        if i == max_bytes - 1 {
            // the final byte may only carry the bits that remain
            let unused = 7 - (size - shift);
            if b & 0x80 != 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "integer representation too long"));
            }
            if unused > 0 && payload >> (7 - unused) != 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "integer too large"));
            }
        }
        result |= payload << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    Ok(result)
}

fn read_vs<F>(reader: &mut F, size: u32) -> Result<i64, io::Error>
where
    F: FnMut() -> Result<u8, io::Error>,
{
    let mut result: i64 = 0;
    let mut shift = 0;
    let max_bytes = size.div_ceil(7);

    for i in 0..max_bytes {
        let b = reader()?;
        let payload = (b & 0x7f) as i64;
        if i == max_bytes - 1 {
            if b & 0x80 != 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "integer representation too long"));
            }
            // the unused high bits must all match the sign bit
            let remaining = size - shift;
            if remaining < 7 {
                let sign_and_unused = payload >> (remaining - 1);
                if sign_and_unused != 0 && sign_and_unused != (0x7f >> (remaining - 1)) {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "integer too large"));
                }
            }
        }
        result |= payload << shift;
        shift += 7;
        if b & 0x80 == 0 {
            if shift < 64 && (b & 0x40) != 0 {
                result |= -1i64 << shift;
            }
            break;
        }
    }

    Ok(result)
}
