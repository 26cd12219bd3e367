//! Bounds-checked access to raw descriptor bytes
//!
//! Class-specific descriptors place their fields at fixed byte offsets, and
//! most of them carry variable-length arrays whose size is given by an earlier
//! field. [`DescriptorReader`] never hands out a field until the bytes backing
//! it have been validated, so a lying `bLength` or `bControlSize` yields an
//! error instead of an out-of-range access.
//!
//! [`DescriptorIter`] walks a concatenated descriptor range (the "extra" bytes
//! attached to an interface) one descriptor at a time using `bLength`.

use crate::error::{ProtocolError, Result};
use crate::guid::Guid;
use byteorder::{ByteOrder, LittleEndian};

/// Bounds-checked view over a single descriptor
#[derive(Debug, Clone, Copy)]
pub struct DescriptorReader<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> DescriptorReader<'a> {
    /// Create a reader over `data`; `what` names the structure in errors
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, what }
    }

    /// Total number of bytes available
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no bytes are available
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes backing the reader
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Fail unless at least `needed` bytes are available
    pub fn require(&self, needed: usize) -> Result<()> {
        if self.data.len() < needed {
            return Err(ProtocolError::Truncated {
                what: self.what,
                needed,
                available: self.data.len(),
            });
        }
        Ok(())
    }

    /// Byte at `offset`
    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        self.require(offset + 1)?;
        Ok(self.data[offset])
    }

    /// Little-endian u16 at `offset`
    pub fn u16_at(&self, offset: usize) -> Result<u16> {
        self.require(offset + 2)?;
        Ok(LittleEndian::read_u16(&self.data[offset..offset + 2]))
    }

    /// Little-endian u32 at `offset`
    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        self.require(offset + 4)?;
        Ok(LittleEndian::read_u32(&self.data[offset..offset + 4]))
    }

    /// Slice of `len` bytes starting at `offset`
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset.checked_add(len).ok_or(ProtocolError::Truncated {
            what: self.what,
            needed: usize::MAX,
            available: self.data.len(),
        })?;
        self.require(end)?;
        Ok(&self.data[offset..end])
    }

    /// 16-byte GUID at `offset`
    pub fn guid_at(&self, offset: usize) -> Result<Guid> {
        let raw = self.slice_at(offset, 16)?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(raw);
        Ok(Guid::from_bytes(guid))
    }

    /// Byte at `offset`, or `default` when the descriptor is too short
    ///
    /// Used for fields whose presence decides how long the descriptor must be
    /// (the caller validates the full length right after).
    pub fn u8_or(&self, offset: usize, default: u8) -> u8 {
        self.data.get(offset).copied().unwrap_or(default)
    }
}

/// One descriptor taken from a concatenated range
#[derive(Debug, Clone, Copy)]
pub struct RawDescriptor<'a> {
    /// Offset of the descriptor within the walked range
    pub offset: usize,
    /// bDescriptorType
    pub descriptor_type: u8,
    /// bDescriptorSubtype (0 when the descriptor is only 2 bytes long)
    pub subtype: u8,
    /// Full descriptor bytes, `bLength` long
    pub bytes: &'a [u8],
}

impl<'a> RawDescriptor<'a> {
    /// Reader over the descriptor bytes
    pub fn reader(&self, what: &'static str) -> DescriptorReader<'a> {
        DescriptorReader::new(self.bytes, what)
    }
}

/// Iterator over a concatenated descriptor range
///
/// Stops after yielding an error for a descriptor whose `bLength` is below 2
/// or runs past the end of the range, since nothing after it can be located.
#[derive(Debug, Clone)]
pub struct DescriptorIter<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> DescriptorIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Result<RawDescriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.offset..];
        let length = rest[0] as usize;
        if length < 2 || length > rest.len() {
            self.failed = true;
            return Some(Err(ProtocolError::InvalidLength {
                length,
                offset: self.offset,
            }));
        }

        let bytes = &rest[..length];
        let descriptor = RawDescriptor {
            offset: self.offset,
            descriptor_type: bytes[1],
            subtype: bytes.get(2).copied().unwrap_or(0),
            bytes,
        };
        self.offset += length;
        Some(Ok(descriptor))
    }
}
