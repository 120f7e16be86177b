//! Little-endian TIFF / BigTIFF header and IFD serialization.
//!
//! Tile data is streamed straight to the file while planes are converted, so
//! directories can only be written once every tile offset is known. This
//! module lays out one IFD at the current end of the file and reports where
//! its "next IFD" pointer lives so the caller can chain directories.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tiff::tags::{Tag, Type};

/// Classic TIFF (32-bit offsets) or BigTIFF (64-bit offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffFlavor {
    Classic,
    Big,
}

impl TiffFlavor {
    pub(crate) fn header(&self) -> Vec<u8> {
        match self {
            TiffFlavor::Classic => {
                let mut header = b"II".to_vec();
                header.extend_from_slice(&42u16.to_le_bytes());
                header.extend_from_slice(&0u32.to_le_bytes());
                header
            }
            TiffFlavor::Big => {
                let mut header = b"II".to_vec();
                header.extend_from_slice(&43u16.to_le_bytes());
                header.extend_from_slice(&8u16.to_le_bytes());
                header.extend_from_slice(&0u16.to_le_bytes());
                header.extend_from_slice(&0u64.to_le_bytes());
                header
            }
        }
    }

    /// File position of the pointer to the first IFD.
    pub(crate) fn first_ifd_pointer(&self) -> u64 {
        match self {
            TiffFlavor::Classic => 4,
            TiffFlavor::Big => 8,
        }
    }

    pub(crate) fn offset_len(&self) -> usize {
        match self {
            TiffFlavor::Classic => 4,
            TiffFlavor::Big => 8,
        }
    }

    pub(crate) fn max_offset(&self) -> u64 {
        match self {
            TiffFlavor::Classic => u32::MAX as u64,
            TiffFlavor::Big => u64::MAX,
        }
    }

    pub(crate) fn encode_offset(&self, offset: u64) -> io::Result<Vec<u8>> {
        match self {
            TiffFlavor::Classic => u32::try_from(offset)
                .map(|o| o.to_le_bytes().to_vec())
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("offset {offset} does not fit a classic TIFF; use BigTIFF"),
                    )
                }),
            TiffFlavor::Big => Ok(offset.to_le_bytes().to_vec()),
        }
    }
}

/// Value of one IFD entry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Ascii(String),
}

impl FieldValue {
    /// Offsets or byte counts in the width the flavor requires.
    pub(crate) fn offsets(flavor: TiffFlavor, values: &[u64]) -> io::Result<Self> {
        match flavor {
            TiffFlavor::Classic => values
                .iter()
                .map(|&v| {
                    u32::try_from(v).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("value {v} does not fit a classic TIFF; use BigTIFF"),
                        )
                    })
                })
                .collect::<io::Result<Vec<u32>>>()
                .map(FieldValue::Long),
            TiffFlavor::Big => Ok(FieldValue::Long8(values.to_vec())),
        }
    }

    fn field_type(&self) -> Type {
        match self {
            FieldValue::Short(_) => Type::SHORT,
            FieldValue::Long(_) => Type::LONG,
            FieldValue::Long8(_) => Type::LONG8,
            FieldValue::Ascii(_) => Type::ASCII,
        }
    }

    fn count(&self) -> u64 {
        match self {
            FieldValue::Short(v) => v.len() as u64,
            FieldValue::Long(v) => v.len() as u64,
            FieldValue::Long8(v) => v.len() as u64,
            FieldValue::Ascii(s) => s.len() as u64 + 1,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Short(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            FieldValue::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            FieldValue::Long8(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            FieldValue::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
        }
    }
}

/// Where a directory landed in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WrittenDirectory {
    pub offset: u64,
    /// Position of this directory's "next IFD" pointer, currently zero.
    pub next_pointer: u64,
}

/// One image file directory, entries kept sorted by tag.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    entries: BTreeMap<u16, FieldValue>,
}

impl Directory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, tag: Tag, value: FieldValue) {
        self.entries.insert(tag.to_u16(), value);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Writes out-of-line values, then the directory itself, at `*position`.
    pub(crate) fn write<W: Write>(
        &self,
        out: &mut W,
        position: &mut u64,
        flavor: TiffFlavor,
    ) -> io::Result<WrittenDirectory> {
        let inline_len = flavor.offset_len();

        let mut fields = Vec::with_capacity(self.entries.len());
        for (&tag, value) in &self.entries {
            let mut bytes = value.to_bytes();
            if bytes.len() > inline_len {
                pad_to_word(out, position)?;
                let at = *position;
                out.write_all(&bytes)?;
                *position += bytes.len() as u64;
                bytes = flavor.encode_offset(at)?;
            } else {
                bytes.resize(inline_len, 0);
            }
            fields.push((tag, value.field_type().to_u16(), value.count(), bytes));
        }

        pad_to_word(out, position)?;
        let offset = *position;
        let mut ifd = Vec::new();
        match flavor {
            TiffFlavor::Classic => {
                let count = u16::try_from(fields.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "too many directory entries")
                })?;
                ifd.extend_from_slice(&count.to_le_bytes());
            }
            TiffFlavor::Big => ifd.extend_from_slice(&(fields.len() as u64).to_le_bytes()),
        }
        for (tag, field_type, count, bytes) in &fields {
            ifd.extend_from_slice(&tag.to_le_bytes());
            ifd.extend_from_slice(&field_type.to_le_bytes());
            match flavor {
                TiffFlavor::Classic => {
                    let count = u32::try_from(*count).map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidData, "entry count exceeds 32 bits")
                    })?;
                    ifd.extend_from_slice(&count.to_le_bytes());
                }
                TiffFlavor::Big => ifd.extend_from_slice(&count.to_le_bytes()),
            }
            ifd.extend_from_slice(bytes);
        }
        let next_pointer = offset + ifd.len() as u64;
        ifd.extend_from_slice(&vec![0u8; inline_len]);

        out.write_all(&ifd)?;
        *position += ifd.len() as u64;
        Ok(WrittenDirectory {
            offset,
            next_pointer,
        })
    }
}

/// TIFF requires directories and values to start on a word boundary.
pub(crate) fn pad_to_word<W: Write>(out: &mut W, position: &mut u64) -> io::Result<()> {
    if *position % 2 == 1 {
        out.write_all(&[0])?;
        *position += 1;
    }
    Ok(())
}
