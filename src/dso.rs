//! Proxy DSO writer.
//!
//! The DSO is an ELF32 shared object that later link steps use in place of
//! the real DLL: every export appears as an absolute dynamic symbol whose
//! value is its frozen ordinal, and `DT_SONAME` carries the link-as name.
//! Only link-time consumers read it, so no program headers are emitted.

use std::path::Path;

use object::endian::{U16, U32};
use object::pod::bytes_of;
use object::Endianness;

use crate::error::{Error, Result};
use crate::symbol::{Symbol, SymbolKind};

fn u16(v: u16) -> U16<Endianness> {
    U16::new(Endianness::Little, v)
}
fn u32(v: u32) -> U32<Endianness> {
    U32::new(Endianness::Little, v)
}

const EHDR_SIZE: usize = 52;
const SYM_SIZE: usize = 16;
const DYN_SIZE: usize = 8;
const SHDR_SIZE: usize = 40;

/// Section layout: NULL, .dynsym, .dynstr, .hash, .dynamic, .shstrtab.
const NUM_SECTIONS: u16 = 6;

const SHSTRTAB: &[u8] = b"\0.dynsym\0.dynstr\0.hash\0.dynamic\0.shstrtab\0";
const NAME_DYNSYM: u32 = 1;
const NAME_DYNSTR: u32 = 9;
const NAME_HASH: u32 = 17;
const NAME_DYNAMIC: u32 = 23;
const NAME_SHSTRTAB: u32 = 32;

/// The SysV ELF hash function, used for the `.hash` section.
fn elf_hash(name: &str) -> u32 {
    let mut h: u32 = 0;
    for byte in name.bytes() {
        h = (h << 4).wrapping_add(u32::from(byte));
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Builds the DSO byte buffer from the final ordinal-ordered symbol list.
pub fn build(symbols: &[Symbol], soname: &str) -> Vec<u8> {
    // .dynstr: NUL, the export names, then the soname.
    let mut dynstr: Vec<u8> = vec![0];
    let mut name_offsets = Vec::with_capacity(symbols.len());
    for sym in symbols {
        name_offsets.push(dynstr.len() as u32);
        dynstr.extend_from_slice(sym.name.as_bytes());
        dynstr.push(0);
    }
    let soname_offset = dynstr.len() as u32;
    dynstr.extend_from_slice(soname.as_bytes());
    dynstr.push(0);

    // .dynsym: null entry plus one absolute symbol per export, ordinal as
    // the value.
    let nsym = symbols.len() + 1;
    let mut dynsym: Vec<u8> = Vec::with_capacity(nsym * SYM_SIZE);
    dynsym.extend_from_slice(bytes_of(&object::elf::Sym32::<Endianness> {
        st_name: u32(0),
        st_value: u32(0),
        st_size: u32(0),
        st_info: 0,
        st_other: 0,
        st_shndx: u16(0),
    }));
    for (i, sym) in symbols.iter().enumerate() {
        let st_type = match sym.kind {
            SymbolKind::Code => object::elf::STT_FUNC,
            SymbolKind::Data => object::elf::STT_OBJECT,
        };
        dynsym.extend_from_slice(bytes_of(&object::elf::Sym32::<Endianness> {
            st_name: u32(name_offsets[i]),
            st_value: u32(sym.ordinal.unwrap_or(0)),
            st_size: u32(sym.size),
            st_info: (object::elf::STB_GLOBAL << 4) | st_type,
            st_other: 0,
            st_shndx: u16(object::elf::SHN_ABS),
        }));
    }

    // .hash: standard SysV chain construction over the export names.
    let nbucket = symbols.len().max(1);
    let mut bucket = vec![0u32; nbucket];
    let mut chain = vec![0u32; nsym];
    for (i, sym) in symbols.iter().enumerate() {
        let symidx = (i + 1) as u32;
        let b = (elf_hash(&sym.name) as usize) % nbucket;
        chain[symidx as usize] = bucket[b];
        bucket[b] = symidx;
    }
    let mut hash: Vec<u8> = Vec::with_capacity((2 + nbucket + nsym) * 4);
    hash.extend_from_slice(&(nbucket as u32).to_le_bytes());
    hash.extend_from_slice(&(nsym as u32).to_le_bytes());
    for v in bucket.iter().chain(chain.iter()) {
        hash.extend_from_slice(&v.to_le_bytes());
    }

    // File layout.
    let dynsym_offset = EHDR_SIZE;
    let dynstr_offset = dynsym_offset + dynsym.len();
    let hash_offset = dynstr_offset + dynstr.len();
    let dynamic_offset = hash_offset + hash.len();

    // .dynamic, addressed as if the file were mapped at zero.
    let entries: &[(u32, u32)] = &[
        (object::elf::DT_SONAME as u32, soname_offset),
        (object::elf::DT_HASH as u32, hash_offset as u32),
        (object::elf::DT_STRTAB as u32, dynstr_offset as u32),
        (object::elf::DT_SYMTAB as u32, dynsym_offset as u32),
        (object::elf::DT_STRSZ as u32, dynstr.len() as u32),
        (object::elf::DT_SYMENT as u32, SYM_SIZE as u32),
        (object::elf::DT_NULL as u32, 0),
    ];
    let mut dynamic: Vec<u8> = Vec::with_capacity(entries.len() * DYN_SIZE);
    for (tag, val) in entries {
        dynamic.extend_from_slice(bytes_of(&object::elf::Dyn32::<Endianness> {
            d_tag: u32(*tag),
            d_val: u32(*val),
        }));
    }

    let shstrtab_offset = dynamic_offset + dynamic.len();
    let shoff = shstrtab_offset + SHSTRTAB.len();

    let mut buf = Vec::with_capacity(shoff + NUM_SECTIONS as usize * SHDR_SIZE);
    buf.extend_from_slice(bytes_of(&object::elf::FileHeader32::<Endianness> {
        e_ident: object::elf::Ident {
            magic: object::elf::ELFMAG,
            class: object::elf::ELFCLASS32,
            data: object::elf::ELFDATA2LSB,
            version: object::elf::EV_CURRENT,
            os_abi: object::elf::ELFOSABI_NONE,
            abi_version: 0,
            padding: [0; 7],
        },
        e_type: u16(object::elf::ET_DYN),
        e_machine: u16(object::elf::EM_ARM),
        e_version: u32(u32::from(object::elf::EV_CURRENT)),
        e_entry: u32(0),
        e_phoff: u32(0),
        e_shoff: u32(shoff as u32),
        e_flags: u32(0),
        e_ehsize: u16(EHDR_SIZE as u16),
        e_phentsize: u16(0),
        e_phnum: u16(0),
        e_shentsize: u16(SHDR_SIZE as u16),
        e_shnum: u16(NUM_SECTIONS),
        e_shstrndx: u16(NUM_SECTIONS - 1),
    }));
    buf.extend_from_slice(&dynsym);
    buf.extend_from_slice(&dynstr);
    buf.extend_from_slice(&hash);
    buf.extend_from_slice(&dynamic);
    buf.extend_from_slice(SHSTRTAB);

    let shdr = |name: u32, sh_type: u32, offset: usize, size: usize, link: u32, entsize: u32| {
        object::elf::SectionHeader32::<Endianness> {
            sh_name: u32(name),
            sh_type: u32(sh_type),
            sh_flags: u32(object::elf::SHF_ALLOC),
            sh_addr: u32(offset as u32),
            sh_offset: u32(offset as u32),
            sh_size: u32(size as u32),
            sh_link: u32(link),
            sh_info: u32(0),
            sh_addralign: u32(4),
            sh_entsize: u32(entsize),
        }
    };

    buf.extend_from_slice(bytes_of(&object::elf::SectionHeader32::<Endianness> {
        sh_name: u32(0),
        sh_type: u32(object::elf::SHT_NULL),
        sh_flags: u32(0),
        sh_addr: u32(0),
        sh_offset: u32(0),
        sh_size: u32(0),
        sh_link: u32(0),
        sh_info: u32(0),
        sh_addralign: u32(0),
        sh_entsize: u32(0),
    }));
    // sh_info of .dynsym: index of the first non-local symbol.
    let mut dynsym_hdr = shdr(
        NAME_DYNSYM,
        object::elf::SHT_DYNSYM,
        dynsym_offset,
        dynsym.len(),
        2,
        SYM_SIZE as u32,
    );
    dynsym_hdr.sh_info = u32(1);
    buf.extend_from_slice(bytes_of(&dynsym_hdr));
    buf.extend_from_slice(bytes_of(&shdr(
        NAME_DYNSTR,
        object::elf::SHT_STRTAB,
        dynstr_offset,
        dynstr.len(),
        0,
        0,
    )));
    buf.extend_from_slice(bytes_of(&shdr(
        NAME_HASH,
        object::elf::SHT_HASH,
        hash_offset,
        hash.len(),
        1,
        4,
    )));
    buf.extend_from_slice(bytes_of(&shdr(
        NAME_DYNAMIC,
        object::elf::SHT_DYNAMIC,
        dynamic_offset,
        dynamic.len(),
        2,
        DYN_SIZE as u32,
    )));
    buf.extend_from_slice(bytes_of(&shdr(
        NAME_SHSTRTAB,
        object::elf::SHT_STRTAB,
        shstrtab_offset,
        SHSTRTAB.len(),
        0,
        0,
    )));
    buf
}

/// Writes the proxy DSO to disk.
pub fn write(path: &Path, symbols: &[Symbol], soname: &str) -> Result<()> {
    std::fs::write(path, build(symbols, soname)).map_err(|e| Error::output_write(path, e))
}
