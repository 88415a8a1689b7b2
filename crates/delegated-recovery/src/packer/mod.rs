//! Low-level byte-packing utilities for the binary token wire format.
use std::cell::Cell;

use crate::errors::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// width of a version/type/options byte on the wire
pub const BYTE_LEN: usize = 1;

/// width of a big-endian length prefix on the wire
pub const U16_LEN: usize = 2;

/// largest payload a u16 length prefix can describe
pub const MAX_U16_LEN: usize = u16::MAX as usize;

/// A pack/unpack cursor over a token buffer.
///
/// Multi-byte integers are big-endian. Writes append at the cursor and
/// refuse to pass the size cap; reads advance the cursor and fail once a
/// declared length outruns the buffer, which is how every truncation and
/// length-overrun case in a hostile token surfaces.
pub struct Packer {
    /// hard cap on the serialized size
    max_size: usize,
    bytes: Cell<BytesMut>,
    /// cursor position, shared by reads and writes
    offset: Cell<usize>,
}

impl Packer {
    pub fn new(max_size: usize, initial_cap: usize) -> Self {
        Self {
            max_size,
            bytes: Cell::new(BytesMut::with_capacity(initial_cap)),
            offset: Cell::new(0),
        }
    }

    /// Wraps an incoming buffer for unpacking, cursor at the start.
    pub fn for_unpack(b: &[u8]) -> Self {
        Self {
            max_size: b.len(),
            bytes: Cell::new(BytesMut::from(b)),
            offset: Cell::new(0),
        }
    }

    /// Hands the packed buffer out, leaving the packer empty.
    pub fn take_bytes(&self) -> Bytes {
        self.bytes.take().freeze()
    }

    pub fn offset(&self) -> usize {
        self.offset.get()
    }

    pub fn bytes_len(&self) -> usize {
        self.with_bytes(|b| b.len())
    }

    /// Runs `f` on the buffer. The buffer lives in a `Cell` so the
    /// pack/unpack methods can take `&self`; it must be moved out and
    /// back for every access.
    fn with_bytes<T>(&self, f: impl FnOnce(&mut BytesMut) -> T) -> T {
        let mut b = self.bytes.take();
        let out = f(&mut b);
        self.bytes.set(b);
        out
    }

    /// Refuses a write of `n` bytes that would push the buffer past the
    /// size cap. Writes only ever append, so the cursor is the current
    /// end of the buffer.
    fn check_write(&self, n: usize) -> Result<()> {
        let needed = self.offset.get() + n;
        if needed > self.max_size {
            return Err(Error::MalformedToken {
                message: format!(
                    "{} byte(s) at offset {} would exceed the {}-byte cap",
                    n,
                    self.offset.get(),
                    self.max_size
                ),
            });
        }
        Ok(())
    }

    /// Reads `n` bytes at the cursor and advances past them.
    fn read(&self, n: usize) -> Result<Vec<u8>> {
        let offset = self.offset.get();
        let available = self.bytes_len().saturating_sub(offset);
        if n > available {
            return Err(Error::MalformedToken {
                message: format!(
                    "buffer truncated: {} byte(s) declared at offset {}, {} left",
                    n, offset, available
                ),
            });
        }
        let v = self.with_bytes(|b| b[offset..offset + n].to_vec());
        self.offset.set(offset + n);
        Ok(v)
    }

    pub fn pack_byte(&self, v: u8) -> Result<()> {
        self.check_write(BYTE_LEN)?;
        self.with_bytes(|b| b.put_u8(v));
        self.offset.set(self.offset.get() + BYTE_LEN);
        Ok(())
    }

    pub fn unpack_byte(&self) -> Result<u8> {
        Ok(self.read(BYTE_LEN)?[0])
    }

    pub fn pack_u16(&self, v: u16) -> Result<()> {
        self.check_write(U16_LEN)?;
        self.with_bytes(|b| b.put_u16(v));
        self.offset.set(self.offset.get() + U16_LEN);
        Ok(())
    }

    pub fn unpack_u16(&self) -> Result<u16> {
        let d = self.read(U16_LEN)?;
        Ok(u16::from_be_bytes([d[0], d[1]]))
    }

    /// Writes raw bytes with no length prefix (the fixed-width id and the
    /// trailing signature).
    pub fn pack_bytes(&self, v: &[u8]) -> Result<()> {
        self.check_write(v.len())?;
        self.with_bytes(|b| b.put_slice(v));
        self.offset.set(self.offset.get() + v.len());
        Ok(())
    }

    /// Reads `n` raw bytes.
    pub fn unpack_bytes(&self, n: usize) -> Result<Vec<u8>> {
        self.read(n)
    }

    /// Writes a u16 length prefix followed by the bytes themselves.
    pub fn pack_bytes_with_header(&self, v: &[u8]) -> Result<()> {
        if v.len() > MAX_U16_LEN {
            return Err(Error::MalformedToken {
                message: format!("length {} does not fit in a u16 prefix", v.len()),
            });
        }
        self.pack_u16(v.len() as u16)?;
        self.pack_bytes(v)
    }

    /// Reads a u16 length prefix, then exactly that many bytes.
    pub fn unpack_bytes_with_header(&self) -> Result<Vec<u8>> {
        let n = self.unpack_u16()?;
        self.read(n as usize)
    }

    /// Writes an ASCII string as a u16 length prefix plus its bytes.
    pub fn pack_str(&self, v: &str) -> Result<()> {
        if !v.is_ascii() {
            return Err(Error::MalformedToken {
                message: "non-ASCII byte in string field".to_string(),
            });
        }
        self.pack_bytes_with_header(v.as_bytes())
    }

    /// Reads a length-prefixed string field, rejecting non-ASCII bytes.
    pub fn unpack_str(&self) -> Result<String> {
        let d = self.unpack_bytes_with_header()?;
        if !d.is_ascii() {
            return Err(Error::MalformedToken {
                message: "non-ASCII byte in string field".to_string(),
            });
        }
        String::from_utf8(d).map_err(|e| Error::MalformedToken {
            message: format!("failed String::from_utf8 {}", e),
        })
    }

    /// Reads everything between the cursor and the end of the buffer,
    /// advancing the cursor to the end. May be empty.
    pub fn unpack_remaining(&self) -> Result<Vec<u8>> {
        let n = self.bytes_len().saturating_sub(self.offset.get());
        self.read(n)
    }
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_byte --exact --show-output
#[test]
fn test_pack_byte() {
    let packer = Packer::new(1, 0);
    packer.pack_byte(0x01).unwrap();
    assert_eq!(packer.bytes_len(), 1);
    assert_eq!(packer.offset(), 1);

    // past the cap
    assert!(packer.pack_byte(0x02).is_err());
    assert_eq!(packer.bytes_len(), 1);
    assert_eq!(packer.offset(), 1);

    let b = packer.take_bytes();
    assert_eq!(&b[..], b"\x01");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_unpack_byte --exact --show-output
#[test]
fn test_unpack_byte() {
    let s = [0x01];
    let packer = Packer::for_unpack(&s);
    let b = packer.unpack_byte().unwrap();
    assert_eq!(b, 1);
    assert_eq!(packer.offset(), 1);

    assert!(packer.unpack_byte().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_u16 --exact --show-output
#[test]
fn test_pack_u16() {
    let packer = Packer::new(U16_LEN, 0);
    packer.pack_u16(0x0102).unwrap();
    assert_eq!(packer.bytes_len(), U16_LEN);
    assert!(packer.pack_u16(0x0304).is_err());

    let b = packer.take_bytes();
    assert_eq!(&b[..], b"\x01\x02");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_unpack_u16 --exact --show-output
#[test]
fn test_unpack_u16() {
    let s: Vec<u8> = vec![0x01, 0x02];
    let packer = Packer::for_unpack(&s);
    let b = packer.unpack_u16().unwrap();
    assert_eq!(b, 0x0102);
    assert_eq!(packer.offset(), U16_LEN);

    assert!(packer.unpack_u16().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_bytes --exact --show-output
#[test]
fn test_pack_bytes() {
    let packer = Packer::new(8, 0);

    let s = "drtk";
    packer.pack_bytes(s.as_bytes()).unwrap();
    assert_eq!(packer.bytes_len(), 4);

    packer.pack_bytes(s.as_bytes()).unwrap();
    assert_eq!(packer.bytes_len(), 8);

    // past the cap
    assert!(packer.pack_bytes(s.as_bytes()).is_err());

    let b = packer.take_bytes();
    assert_eq!(&b[..], b"drtkdrtk");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_bytes_with_header --exact --show-output
#[test]
fn test_pack_bytes_with_header() {
    let packer = Packer::new(6, 0);
    packer.pack_bytes_with_header(b"drtk").unwrap();
    assert_eq!(packer.bytes_len(), 6);

    let b = packer.take_bytes();
    assert_eq!(&b[..], b"\x00\x04drtk");

    let packer = Packer::for_unpack(&b);
    let d = packer.unpack_bytes_with_header().unwrap();
    assert_eq!(&d[..], b"drtk");
    assert_eq!(packer.offset(), 6);
    assert!(packer.unpack_bytes_with_header().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_unpack_bytes_with_header_overrun --exact --show-output
#[test]
fn test_unpack_bytes_with_header_overrun() {
    // declared length exceeds the remaining input
    let s: Vec<u8> = vec![0x00, 0x10, 0x41, 0x42];
    let packer = Packer::for_unpack(&s);
    assert!(packer.unpack_bytes_with_header().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_str --exact --show-output
#[test]
fn test_pack_str() {
    let packer = Packer::new(6, 0);

    let s = "drtk";
    packer.pack_str(s).unwrap();
    assert_eq!(packer.bytes_len(), 2 + 4);

    // past the cap
    assert!(packer.pack_str(s).is_err());

    let b = packer.take_bytes();
    assert_eq!(&b[..], b"\x00\x04drtk");
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_pack_str_non_ascii --exact --show-output
#[test]
fn test_pack_str_non_ascii() {
    let packer = Packer::new(16, 0);
    assert!(packer.pack_str("héllo").is_err());

    // a non-ASCII byte in a string field is rejected on unpack, too
    let s: Vec<u8> = vec![0x00, 0x02, 0xc3, 0xa9];
    let packer = Packer::for_unpack(&s);
    assert!(packer.unpack_str().is_err());
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_unpack_str --exact --show-output
#[test]
fn test_unpack_str() {
    let s: Vec<u8> = vec![0x00, 0x04, 100, 114, 116, 107];
    let packer = Packer::for_unpack(&s);
    let v = packer.unpack_str().unwrap();
    assert_eq!(v, "drtk");
    assert_eq!(packer.offset(), 6);
}

/// RUST_LOG=debug cargo test --package delegated-recovery --lib -- packer::test_unpack_remaining --exact --show-output
#[test]
fn test_unpack_remaining() {
    let s: Vec<u8> = vec![0x01, 0x02, 0x03, 0x04];
    let packer = Packer::for_unpack(&s);
    packer.unpack_byte().unwrap();

    let rest = packer.unpack_remaining().unwrap();
    assert_eq!(&rest[..], &[0x02, 0x03, 0x04]);
    assert_eq!(packer.offset(), 4);

    // nothing left returns empty, not an error
    let rest = packer.unpack_remaining().unwrap();
    assert!(rest.is_empty());
}
