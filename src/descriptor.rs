//! Export-descriptor encoding.
//!
//! The image header carries a compact bitmap telling the loader which
//! export slots are absent. Bit `i` is clear iff slot `i` traps. Two
//! encodings compete: the full bitmap, and a sparse form holding a
//! meta-bitmap plus only the bitmap bytes that are not `0xFF`. The
//! smaller one wins.

use crate::table::ExportTable;
use crate::utils::align_up;

/// Descriptor type tag: full bitmap payload.
pub const EXPORT_DESC_FULL_BITMAP: u8 = 1;
/// Descriptor type tag: meta-bitmap followed by the non-`0xFF` byte groups.
pub const EXPORT_DESC_SPARSE8: u8 = 2;

pub struct ExportDescriptor {
    pub desc_type: u8,
    pub payload: Vec<u8>,
}

/// Computes the absence bitmap for a table: `ceil(N/8)` bytes, one bit per
/// slot, clear for absent slots. Trailing bits of the last byte stay set.
pub fn absence_bitmap(table: &ExportTable) -> Vec<u8> {
    let n = table.num_exports();
    let mut bitmap = vec![0xffu8; n.div_ceil(8)];
    for i in 0..n {
        if table.is_absent(i) {
            bitmap[i >> 3] &= !(1u8 << (i & 7));
        }
    }
    bitmap
}

/// Encodes the table's absence bitmap, choosing the smaller encoding.
pub fn encode(table: &ExportTable) -> ExportDescriptor {
    let bitmap = absence_bitmap(table);
    let memsz = bitmap.len();
    let mbs = memsz.div_ceil(8);
    let groups: Vec<&u8> = bitmap.iter().filter(|b| **b != 0xff).collect();

    if mbs + groups.len() < memsz {
        let mut payload = vec![0u8; mbs];
        for (i, byte) in bitmap.iter().enumerate() {
            if *byte != 0xff {
                payload[i >> 3] |= 1u8 << (i & 7);
            }
        }
        payload.extend(groups.into_iter().copied());
        ExportDescriptor {
            desc_type: EXPORT_DESC_SPARSE8,
            payload,
        }
    } else {
        ExportDescriptor {
            desc_type: EXPORT_DESC_FULL_BITMAP,
            payload: bitmap,
        }
    }
}

impl ExportDescriptor {
    /// Encoded size, as stored in the image header.
    pub fn size(&self) -> u16 {
        self.payload.len() as u16
    }

    /// The payload zero-padded so the region past the first byte ends on a
    /// 4-byte boundary.
    pub fn padded_payload(&self) -> Vec<u8> {
        let mut padded = self.payload.clone();
        padded.resize(self.padded_len(), 0);
        padded
    }

    pub fn padded_len(&self) -> usize {
        if self.payload.is_empty() {
            0
        } else {
            1 + align_up(self.payload.len() - 1, 4)
        }
    }
}
