//! # User Image Relocation
//!
//! Loader for the minimal position-independent user image format. An image
//! is laid out as:
//!
//! ```text
//! +----------------------+  offset 0
//! | header (32 bytes)    |  magic, reloc table offset/size, record size
//! +----------------------+
//! | relocation records   |  (offset, kind, addend) × N
//! +----------------------+  ← entry point: first byte after the table
//! | code and data        |
//! +----------------------+
//! ```
//!
//! The format carries no symbol table and no entry-point field: the entry is
//! positional, and exactly one relocation kind exists — *"write
//! `image_base + addend` at `image_base + offset`"*. That single kind is all
//! a position-independent image needs once dynamic symbol resolution is off
//! the table: every internal pointer-valued constant is unresolved at link
//! time because the load address is chosen at run time, and the loader's
//! entire job is closing that one class of forward reference.
//!
//! Parsing follows the usual discipline for untrusted bytes: explicit
//! little-endian field reads, bounds checks on every access, and a typed
//! error per malformation. All format errors are fatal at load time, before
//! any user instruction executes.

#![cfg_attr(not(test), no_std)]

use kernel_addresses::VirtualAddress;

/// Magic bytes at offset 0: `"UIMG"` little-endian.
pub const IMAGE_MAGIC: u32 = 0x474d_4955;

/// The one supported relocation kind (numerically `R_X86_64_RELATIVE`).
pub const RELOC_RELATIVE: u32 = 8;

/// Header length in bytes.
pub const HEADER_LEN: usize = 32;

/// Size of one relocation record as this loader understands it.
pub const RECORD_LEN: u64 = 24;

/// Fatal image-format errors. Any of these aborts the load before any user
/// instruction executes.
#[derive(Copy, Clone, Eq, PartialEq, Debug, thiserror::Error)]
pub enum ImageError {
    /// Shorter than a header.
    #[error("image shorter than its header")]
    TooShort,
    /// Bad magic.
    #[error("image magic mismatch")]
    BadMagic,
    /// Header fields point outside the image.
    #[error("relocation table out of bounds")]
    Oob,
    /// Table size is not an exact multiple of the per-record size.
    #[error("relocation table size not a multiple of the record size")]
    MalformedTable,
    /// Per-record size differs from the one this loader understands.
    #[error("unsupported relocation record size")]
    BadRecordSize,
    /// A record carries a kind other than the single supported one. No
    /// dynamic symbol resolution exists here, so anything else is fatal.
    #[error("unsupported relocation kind {0}")]
    UnsupportedKind(u32),
    /// A record's patch target lies outside the image.
    #[error("relocation target out of bounds")]
    TargetOob,
}

/// One relocation record: patch the 8 bytes at `image_base + offset` to
/// `image_base + addend`. Consumed exactly once per image load.
#[derive(Copy, Clone, Debug)]
pub struct RelocationRecord {
    /// Byte offset of the patch site within the image.
    pub offset: u64,
    /// Relocation kind; must equal [`RELOC_RELATIVE`].
    pub kind: u32,
    /// Value the patch site receives, relative to the image base.
    pub addend: u64,
}

impl RelocationRecord {
    /// Decode one record from its 24 raw bytes.
    fn read(s: &[u8]) -> Self {
        Self {
            offset: le64(&s[0..8]),
            kind: le32(&s[8..12]),
            addend: le64(&s[16..24]),
        }
    }
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

/// Parsed view of an image's self-describing header.
///
/// Borrow-only; no allocation.
#[derive(Copy, Clone, Debug)]
pub struct ImageView<'a> {
    bytes: &'a [u8],
    reloc_offset: u64,
    reloc_size: u64,
    record_size: u64,
}

impl<'a> ImageView<'a> {
    /// Parse and validate the header.
    ///
    /// The header stores three facts the loader needs: the relocation
    /// table's offset and size, and the per-record size. The table must end
    /// within the image and its size must divide evenly into records.
    ///
    /// # Errors
    /// See [`ImageError`]; every malformation is fatal.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_LEN {
            return Err(ImageError::TooShort);
        }
        if le32(&bytes[0..4]) != IMAGE_MAGIC {
            return Err(ImageError::BadMagic);
        }

        let reloc_offset = le64(&bytes[8..16]);
        let reloc_size = le64(&bytes[16..24]);
        let record_size = le64(&bytes[24..32]);

        if record_size != RECORD_LEN {
            return Err(ImageError::BadRecordSize);
        }
        if !reloc_size.is_multiple_of(record_size) {
            return Err(ImageError::MalformedTable);
        }

        let end = reloc_offset.checked_add(reloc_size).ok_or(ImageError::Oob)?;
        if reloc_offset < HEADER_LEN as u64 || end > bytes.len() as u64 {
            return Err(ImageError::Oob);
        }

        Ok(Self {
            bytes,
            reloc_offset,
            reloc_size,
            record_size,
        })
    }

    /// Number of relocation records.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.reloc_size / self.record_size
    }

    /// Byte offset of the entry point: the first byte after the relocation
    /// table. The format carries no entry-point field.
    #[must_use]
    pub const fn entry_offset(&self) -> u64 {
        self.reloc_offset + self.reloc_size
    }

    /// Read record `i` (bounds pre-validated by [`parse`](Self::parse)).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    fn record(&self, i: u64) -> RelocationRecord {
        let at = (self.reloc_offset + i * self.record_size) as usize;
        RelocationRecord::read(&self.bytes[at..at + RECORD_LEN as usize])
    }

    /// Iterate all relocation records.
    pub fn records(&self) -> impl Iterator<Item = RelocationRecord> + '_ {
        (0..self.record_count()).map(|i| self.record(i))
    }
}

/// Resolve every relocation in `image` for a base address chosen at run
/// time, and return the entry point.
///
/// `image` holds the raw bytes as mapped at `base`; each record patches the
/// 8 bytes at `base + offset` (i.e. `image[offset..offset+8]`) to
/// `base + addend`. Loading the same image at a different base yields
/// correspondingly different pointers — that is the whole point.
///
/// # Errors
/// Any header malformation from [`ImageView::parse`], plus
/// [`ImageError::UnsupportedKind`] and [`ImageError::TargetOob`] per record.
/// All are fatal: the image must not be entered.
#[allow(clippy::cast_possible_truncation)]
pub fn load_and_relocate(image: &mut [u8], base: VirtualAddress) -> Result<VirtualAddress, ImageError> {
    // Parse in a scope of its own: a record may legally patch any image
    // byte, including the table region the view borrows.
    let (reloc_offset, count, entry_offset) = {
        let view = ImageView::parse(image)?;
        (view.reloc_offset, view.record_count(), view.entry_offset())
    };

    for i in 0..count {
        let at = (reloc_offset + i * RECORD_LEN) as usize;
        let record = RelocationRecord::read(&image[at..at + RECORD_LEN as usize]);

        if record.kind != RELOC_RELATIVE {
            return Err(ImageError::UnsupportedKind(record.kind));
        }
        let end = record.offset.checked_add(8).ok_or(ImageError::TargetOob)?;
        if end > image.len() as u64 {
            return Err(ImageError::TargetOob);
        }

        let value = base.as_u64() + record.addend;
        let target = record.offset as usize;
        image[target..target + 8].copy_from_slice(&value.to_le_bytes());
    }

    Ok(base + entry_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a synthetic image: header, `relocs` records, then `payload`.
    fn build_image(relocs: &[(u64, u32, u64)], payload: &[u8]) -> Vec<u8> {
        let reloc_offset = HEADER_LEN as u64;
        let reloc_size = relocs.len() as u64 * RECORD_LEN;

        let mut image = Vec::new();
        image.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
        image.extend_from_slice(&[0u8; 4]); // reserved
        image.extend_from_slice(&reloc_offset.to_le_bytes());
        image.extend_from_slice(&reloc_size.to_le_bytes());
        image.extend_from_slice(&RECORD_LEN.to_le_bytes());
        assert_eq!(image.len(), HEADER_LEN);

        for &(offset, kind, addend) in relocs {
            image.extend_from_slice(&offset.to_le_bytes());
            image.extend_from_slice(&kind.to_le_bytes());
            image.extend_from_slice(&[0u8; 4]); // record padding
            image.extend_from_slice(&addend.to_le_bytes());
        }
        image.extend_from_slice(payload);
        image
    }

    fn read_u64(image: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(image[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn relocation_patches_base_plus_addend_at_base_plus_offset() {
        // One record (offset=0x10, addend=0x100): note the patch site lies
        // inside the header area of this tiny image, which the format allows —
        // offsets are image-relative, nothing more.
        let mut image = build_image(&[(0x10, RELOC_RELATIVE, 0x100)], &[0u8; 64]);

        let entry = load_and_relocate(&mut image, VirtualAddress::new(0x2000)).unwrap();
        assert_eq!(read_u64(&image, 0x10), 0x2100);

        // Entry is positional: first byte after the one-record table.
        assert_eq!(entry.as_u64(), 0x2000 + 32 + 24);
    }

    #[test]
    fn relocating_at_a_different_base_proves_position_independence() {
        let fresh = build_image(&[(0x10, RELOC_RELATIVE, 0x100)], &[0u8; 64]);

        let mut at_2000 = fresh.clone();
        let mut at_5000 = fresh;
        load_and_relocate(&mut at_2000, VirtualAddress::new(0x2000)).unwrap();
        load_and_relocate(&mut at_5000, VirtualAddress::new(0x5000)).unwrap();

        assert_eq!(read_u64(&at_2000, 0x10), 0x2100);
        assert_eq!(read_u64(&at_5000, 0x10), 0x5100);
    }

    #[test]
    fn unknown_relocation_kind_is_fatal() {
        let mut image = build_image(&[(0x40, 7, 0)], &[0u8; 64]);
        assert_eq!(
            load_and_relocate(&mut image, VirtualAddress::new(0x2000)),
            Err(ImageError::UnsupportedKind(7))
        );
    }

    #[test]
    fn table_size_must_divide_into_records() {
        let mut image = build_image(&[(0x40, RELOC_RELATIVE, 0)], &[0u8; 64]);
        // Corrupt the stored table size to a non-multiple of 24.
        image[16..24].copy_from_slice(&23u64.to_le_bytes());
        assert_eq!(
            ImageView::parse(&image).unwrap_err(),
            ImageError::MalformedTable
        );
    }

    #[test]
    fn header_must_carry_the_expected_record_size() {
        let mut image = build_image(&[], &[0u8; 8]);
        image[24..32].copy_from_slice(&16u64.to_le_bytes());
        assert_eq!(
            ImageView::parse(&image).unwrap_err(),
            ImageError::BadRecordSize
        );
    }

    #[test]
    fn truncated_or_mislabeled_images_are_rejected() {
        assert_eq!(ImageView::parse(&[0u8; 8]).unwrap_err(), ImageError::TooShort);

        let mut image = build_image(&[], &[]);
        image[0] = 0;
        assert_eq!(ImageView::parse(&image).unwrap_err(), ImageError::BadMagic);

        // Table pointing past the end of the image.
        let mut image = build_image(&[], &[]);
        image[16..24].copy_from_slice(&RECORD_LEN.to_le_bytes());
        assert_eq!(ImageView::parse(&image).unwrap_err(), ImageError::Oob);
    }

    #[test]
    fn patch_target_must_lie_inside_the_image() {
        let mut image = build_image(&[(0x7fff, RELOC_RELATIVE, 0)], &[0u8; 16]);
        assert_eq!(
            load_and_relocate(&mut image, VirtualAddress::new(0x2000)),
            Err(ImageError::TargetOob)
        );
    }

    #[test]
    fn view_exposes_the_records_it_parsed() {
        let image = build_image(
            &[(0x40, RELOC_RELATIVE, 0x8), (0x48, RELOC_RELATIVE, 0x10)],
            &[0u8; 64],
        );
        let view = ImageView::parse(&image).unwrap();
        assert_eq!(view.record_count(), 2);

        let records: Vec<_> = view.records().collect();
        assert_eq!(records[0].offset, 0x40);
        assert_eq!(records[0].addend, 0x8);
        assert_eq!(records[1].offset, 0x48);
        assert_eq!(records[1].addend, 0x10);
    }

    #[test]
    fn entry_is_positional_after_an_empty_table_too() {
        let mut image = build_image(&[], b"\xeb\xfe");
        let entry = load_and_relocate(&mut image, VirtualAddress::new(0x9000)).unwrap();
        assert_eq!(entry.as_u64(), 0x9000 + HEADER_LEN as u64);
    }
}
