//! E32 image writer.
//!
//! Lays out the translated image: the extended E32 header (base, J and V
//! parts, the V part carrying the export descriptor), the code payload
//! with the export directory appended, then initialized data. Compression
//! and relocation sections are not produced.

use std::path::Path;

use object::{Object, ObjectSection, SectionKind};

use crate::descriptor::ExportDescriptor;
use crate::error::{Error, Result};
use crate::table::ExportTable;
use crate::utils::align_up;

const E32_SIGNATURE: u32 = 0x434F_5045; // "EPOC"
const UID1_DLL: u32 = 0x1000_0079;
const UID1_EXE: u32 = 0x1000_007A;
const CPU_ARM: u16 = 0x2000;

/// Header flag: image exports by name lookup as well as by ordinal.
const FLAG_NAMED_LOOKUP: u32 = 0x10;
/// Header flag: image is a DLL.
const FLAG_DLL: u32 = 0x1;

const DEFAULT_HEAP_MIN: u32 = 0x1000;
const DEFAULT_HEAP_MAX: u32 = 0x0010_0000;
const DEFAULT_STACK: u32 = 0x2000;
const DEFAULT_PRIORITY: u16 = 350; // EPriorityForeground

/// Payload pulled from the input ELF.
pub struct ImageSource {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub bss_size: u32,
    /// Entry point offset within the code section.
    pub entry_point: u32,
    pub code_base: u32,
    pub data_base: u32,
}

/// Gathers code, initialized data and BSS out of the input ELF sections.
pub fn gather(obj: &object::File, path: &Path) -> Result<ImageSource> {
    let mut code = Vec::new();
    let mut data = Vec::new();
    let mut bss_size = 0u32;
    let mut code_base = u32::MAX;
    let mut data_base = 0u32;

    for sec in obj.sections() {
        if sec.size() == 0 {
            continue;
        }
        match sec.kind() {
            SectionKind::Text | SectionKind::ReadOnlyData | SectionKind::ReadOnlyString => {
                let bytes = sec.data().map_err(|e| Error::elf_read(path, e))?;
                let off = align_up(code.len(), sec.align().max(1) as usize);
                code.resize(off, 0);
                code.extend_from_slice(bytes);
                code_base = code_base.min(sec.address() as u32);
            }
            SectionKind::Data => {
                let bytes = sec.data().map_err(|e| Error::elf_read(path, e))?;
                let off = align_up(data.len(), sec.align().max(1) as usize);
                data.resize(off, 0);
                data.extend_from_slice(bytes);
                if data_base == 0 {
                    data_base = sec.address() as u32;
                }
            }
            SectionKind::UninitializedData => {
                bss_size += sec.size() as u32;
            }
            _ => {}
        }
    }

    if code_base == u32::MAX {
        code_base = 0;
    }
    let entry_point = (obj.entry() as u32).saturating_sub(code_base);

    Ok(ImageSource {
        code,
        data,
        bss_size,
        entry_point,
        code_base,
        data_base,
    })
}

/// Builds the complete image byte buffer.
pub fn build(
    source: &ImageSource,
    table: &ExportTable,
    descriptor: &ExportDescriptor,
    is_dll: bool,
    named_lookup: bool,
) -> Vec<u8> {
    let desc_region = descriptor.padded_payload();

    // Base (124) + J (4) + V (27) headers, then the descriptor region.
    let header_len = 124 + 4 + 27 + desc_region.len();
    let code_offset = align_up(header_len, 4);
    let export_dir_bytes = if table.num_exports() > 0 {
        table.to_bytes()
    } else {
        Vec::new()
    };
    // The export directory lives at the end of the code section; the
    // header offset points past the reserved leading word.
    let export_dir_offset = if table.num_exports() > 0 {
        (code_offset + source.code.len() + 4) as u32
    } else {
        0
    };
    let code_size = (source.code.len() + export_dir_bytes.len()) as u32;
    let data_offset = code_offset + source.code.len() + export_dir_bytes.len();

    let mut flags = 0u32;
    if is_dll {
        flags |= FLAG_DLL;
    }
    if named_lookup {
        flags |= FLAG_NAMED_LOOKUP;
    }

    let mut buf = Vec::with_capacity(data_offset + source.data.len());
    let mut push32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_le_bytes());

    // Base header.
    push32(&mut buf, if is_dll { UID1_DLL } else { UID1_EXE });
    push32(&mut buf, 0); // uid2
    push32(&mut buf, 0); // uid3
    push32(&mut buf, 0); // uid checksum
    push32(&mut buf, E32_SIGNATURE);
    push32(&mut buf, 0); // header crc
    push32(&mut buf, 1); // module version
    push32(&mut buf, 0); // compression type: none
    push32(&mut buf, 0); // tools version
    push32(&mut buf, 0); // time lo
    push32(&mut buf, 0); // time hi
    push32(&mut buf, flags);
    push32(&mut buf, code_size);
    push32(&mut buf, source.data.len() as u32);
    push32(&mut buf, DEFAULT_HEAP_MIN);
    push32(&mut buf, DEFAULT_HEAP_MAX);
    push32(&mut buf, DEFAULT_STACK);
    push32(&mut buf, source.bss_size);
    push32(&mut buf, source.entry_point);
    push32(&mut buf, source.code_base);
    push32(&mut buf, source.data_base);
    push32(&mut buf, 0); // dll ref table count
    push32(&mut buf, export_dir_offset);
    push32(&mut buf, table.num_exports() as u32);
    push32(&mut buf, source.code.len() as u32); // text size
    push32(&mut buf, code_offset as u32);
    push32(
        &mut buf,
        if source.data.is_empty() {
            0
        } else {
            data_offset as u32
        },
    );
    push32(&mut buf, 0); // import offset
    push32(&mut buf, 0); // code reloc offset
    push32(&mut buf, 0); // data reloc offset
    buf.extend_from_slice(&DEFAULT_PRIORITY.to_le_bytes());
    buf.extend_from_slice(&CPU_ARM.to_le_bytes());

    // J header.
    push32(&mut buf, (data_offset + source.data.len()) as u32); // uncompressed size

    // V header.
    push32(&mut buf, 0); // secure id
    push32(&mut buf, 0); // vendor id
    push32(&mut buf, 0); // capabilities lo
    push32(&mut buf, 0); // capabilities hi
    push32(&mut buf, 0); // exception descriptor
    push32(&mut buf, 0); // spare
    buf.extend_from_slice(&descriptor.size().to_le_bytes());
    buf.push(descriptor.desc_type);
    buf.extend_from_slice(&desc_region);

    buf.resize(code_offset, 0);
    buf.extend_from_slice(&source.code);
    buf.extend_from_slice(&export_dir_bytes);
    buf.extend_from_slice(&source.data);
    buf
}

/// Writes the image to disk.
pub fn write(
    path: &Path,
    source: &ImageSource,
    table: &ExportTable,
    descriptor: &ExportDescriptor,
    is_dll: bool,
    named_lookup: bool,
) -> Result<()> {
    let buf = build(source, table, descriptor, is_dll, named_lookup);
    std::fs::write(path, buf).map_err(|e| Error::output_write(path, e))
}
