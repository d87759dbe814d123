//! Synthetic ELF shared objects for tests.
//!
//! [`ElfFixture`] lays out a minimal but loader-shaped shared object: a
//! read-only segment holding the headers, `.dynstr` and `.dynsym`, and a
//! read-write segment holding `.dynamic` at a different virtual address
//! from its file offset. Section headers are optional.

use crate::elf::{
    Class, Codec, DT_NEEDED, DT_RPATH, DT_RUNPATH, DT_SONAME, DT_STRSZ, DT_STRTAB, Endian,
    PF_R, PF_W, PT_DYNAMIC, PT_LOAD, PT_PHDR, SHT_DYNAMIC, SHT_DYNSYM, SHT_STRTAB,
};

const DATA_OFFSET: u64 = 0x1000;
const DATA_VADDR: u64 = 0x20_1000;
const SEGMENT_ALIGN: u64 = 0x1000;
const PHNUM: usize = 4;
const SHSTRTAB: &[u8] = b"\0.dynstr\0.dynamic\0.shstrtab\0.dynsym\0";

/// Builder for synthetic shared objects.
#[derive(Debug, Clone)]
pub struct ElfFixture {
    class: Class,
    endian: Endian,
    needed: Vec<String>,
    soname: Option<String>,
    soname_inside_search_path: bool,
    search_path: Option<(u64, String)>,
    symbols: Vec<String>,
    spare_slots: usize,
    section_headers: bool,
}

impl ElfFixture {
    /// A 64-bit little-endian object depending on `libpq.so.5` with one
    /// exported symbol and no search path.
    #[must_use]
    pub fn shared_object() -> Self {
        Self {
            class: Class::Elf64,
            endian: Endian::Little,
            needed: vec!["libpq.so.5".to_owned()],
            soname: None,
            soname_inside_search_path: false,
            search_path: None,
            symbols: vec!["PyInit__psycopg".to_owned()],
            spare_slots: 0,
            section_headers: true,
        }
    }

    /// Select the ELF class and byte order.
    #[must_use]
    pub fn with_layout(mut self, class: Class, endian: Endian) -> Self {
        self.class = class;
        self.endian = endian;
        self
    }

    /// Add a `DT_NEEDED` entry.
    #[must_use]
    pub fn with_needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_owned());
        self
    }

    /// Add a `DT_SONAME` entry.
    #[must_use]
    pub fn with_soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_owned());
        self
    }

    /// Point `DT_SONAME` one byte into the search-path string, the way a
    /// linker merges string suffixes.
    #[must_use]
    pub fn with_soname_inside_search_path(mut self) -> Self {
        self.soname_inside_search_path = true;
        self
    }

    /// Carry `path` as `DT_RUNPATH`.
    #[must_use]
    pub fn with_runpath(mut self, path: &str) -> Self {
        self.search_path = Some((DT_RUNPATH, path.to_owned()));
        self
    }

    /// Carry `path` as the legacy `DT_RPATH`.
    #[must_use]
    pub fn with_rpath(mut self, path: &str) -> Self {
        self.search_path = Some((DT_RPATH, path.to_owned()));
        self
    }

    /// Add a `.dynsym` entry named `name`.
    #[must_use]
    pub fn with_symbol(mut self, name: &str) -> Self {
        self.symbols.push(name.to_owned());
        self
    }

    /// Reserve `count` extra `DT_NULL` slots after the terminator.
    #[must_use]
    pub fn with_spare_dynamic_slots(mut self, count: usize) -> Self {
        self.spare_slots = count;
        self
    }

    /// Omit the section header table, as `strip --strip-section-headers` does.
    #[must_use]
    pub fn without_section_headers(mut self) -> Self {
        self.section_headers = false;
        self
    }

    /// Lay out and encode the object.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let codec = Codec::new(self.class, self.endian);
        let mut out = Writer::new(codec);

        let ehsize = codec.ehdr_size();
        let phoff = ehsize;
        let dynstr_at = align8(phoff + PHNUM * codec.phdr_size());

        let strings = self.string_table();
        let dynstr_len = strings.bytes.len();
        let sym_size = match self.class {
            Class::Elf32 => 16,
            Class::Elf64 => 24,
        };
        let dynsym_at = align8(dynstr_at + dynstr_len);
        let dynsym_len = (self.symbols.len() + 1) * sym_size;
        let text_end = dynsym_at + dynsym_len;

        let entries = self.dynamic_entries(&strings, dynstr_at as u64, dynstr_len as u64);
        let dynamic_len = (entries.len() + 1 + self.spare_slots) * codec.dyn_size();
        let data_at = to_usize(DATA_OFFSET);

        let shstrtab_at = data_at + dynamic_len;
        let shoff = align8(shstrtab_at + SHSTRTAB.len());

        // File header.
        out.put(0, &[0x7f, b'E', b'L', b'F']);
        out.put(
            4,
            &[
                match self.class {
                    Class::Elf32 => 1,
                    Class::Elf64 => 2,
                },
                match self.endian {
                    Endian::Little => 1,
                    Endian::Big => 2,
                },
                1,
            ],
        );
        out.u16(16, 3);
        out.u16(
            18,
            match self.class {
                Class::Elf32 => 3,
                Class::Elf64 => 62,
            },
        );
        out.u32(20, 1);
        let (shoff_value, shnum, shstrndx) = if self.section_headers {
            (shoff as u64, 5, 3)
        } else {
            (0, 0, 0)
        };
        let fields = match self.class {
            Class::Elf32 => [28, 32, 40, 42, 44, 46, 48, 50],
            Class::Elf64 => [32, 40, 52, 54, 56, 58, 60, 62],
        };
        out.word(fields[0], phoff as u64);
        out.word(fields[1], shoff_value);
        out.u16(fields[2], to_u16(ehsize));
        out.u16(fields[3], to_u16(codec.phdr_size()));
        out.u16(fields[4], to_u16(PHNUM));
        out.u16(fields[5], to_u16(codec.shdr_size()));
        out.u16(fields[6], shnum);
        out.u16(fields[7], shstrndx);

        // Program headers.
        let phdr_len = (PHNUM * codec.phdr_size()) as u64;
        let dynamic_vaddr = DATA_VADDR;
        let segments = [
            (PT_PHDR, PF_R, phoff as u64, phoff as u64, phdr_len, 8),
            (PT_LOAD, PF_R, 0, 0, text_end as u64, SEGMENT_ALIGN),
            (
                PT_LOAD,
                PF_R | PF_W,
                DATA_OFFSET,
                dynamic_vaddr,
                dynamic_len as u64,
                SEGMENT_ALIGN,
            ),
            (
                PT_DYNAMIC,
                PF_R | PF_W,
                DATA_OFFSET,
                dynamic_vaddr,
                dynamic_len as u64,
                8,
            ),
        ];
        for (index, (kind, flags, offset, vaddr, size, align)) in segments.into_iter().enumerate() {
            out.program_header(
                phoff + index * codec.phdr_size(),
                kind,
                flags,
                offset,
                vaddr,
                size,
                align,
            );
        }

        // Dynamic string table and symbols.
        out.put(dynstr_at, &strings.bytes);
        for (index, name) in self.symbols.iter().enumerate() {
            let at = dynsym_at + (index + 1) * sym_size;
            out.u32(at, to_u32(strings.index_of(name)));
        }

        // Dynamic array; the terminator and spare slots stay zeroed.
        for (index, (tag, value)) in entries.iter().enumerate() {
            let at = data_at + index * codec.dyn_size();
            out.word(at, *tag);
            out.word(at + codec.word_size(), *value);
        }
        out.zero_to(data_at + dynamic_len);

        if self.section_headers {
            out.put(shstrtab_at, SHSTRTAB);
            let shdrs = [
                (0, 0, 0, 0, 0, 0, 0),
                (
                    1,
                    SHT_STRTAB,
                    dynstr_at as u64,
                    dynstr_at as u64,
                    dynstr_len as u64,
                    0,
                    0,
                ),
                (
                    9,
                    SHT_DYNAMIC,
                    dynamic_vaddr,
                    DATA_OFFSET,
                    dynamic_len as u64,
                    codec.dyn_size() as u64,
                    1,
                ),
                (
                    18,
                    SHT_STRTAB,
                    0,
                    shstrtab_at as u64,
                    SHSTRTAB.len() as u64,
                    0,
                    0,
                ),
                (
                    28,
                    SHT_DYNSYM,
                    dynsym_at as u64,
                    dynsym_at as u64,
                    dynsym_len as u64,
                    sym_size as u64,
                    1,
                ),
            ];
            for (index, (name, kind, addr, offset, size, entsize, link)) in
                shdrs.into_iter().enumerate()
            {
                out.section_header(
                    shoff + index * codec.shdr_size(),
                    name,
                    kind,
                    addr,
                    offset,
                    size,
                    entsize,
                    link,
                );
            }
        }

        out.bytes
    }

    fn string_table(&self) -> Strings {
        let mut strings = Strings::default();
        for name in &self.needed {
            strings.push(name);
        }
        if let Some(soname) = &self.soname {
            strings.push(soname);
        }
        if let Some((_, path)) = &self.search_path {
            strings.push(path);
        }
        for name in &self.symbols {
            strings.push(name);
        }
        strings
    }

    fn dynamic_entries(&self, strings: &Strings, strtab: u64, strsz: u64) -> Vec<(u64, u64)> {
        let mut entries: Vec<(u64, u64)> = self
            .needed
            .iter()
            .map(|name| (DT_NEEDED, strings.index_of(name)))
            .collect();
        match (&self.search_path, self.soname_inside_search_path) {
            (Some((_, path)), true) => entries.push((DT_SONAME, strings.index_of(path) + 1)),
            _ => {
                if let Some(soname) = &self.soname {
                    entries.push((DT_SONAME, strings.index_of(soname)));
                }
            }
        }
        if let Some((tag, path)) = &self.search_path {
            entries.push((*tag, strings.index_of(path)));
        }
        entries.push((DT_STRTAB, strtab));
        entries.push((DT_STRSZ, strsz));
        entries
    }
}

#[derive(Default)]
struct Strings {
    bytes: Vec<u8>,
    offsets: Vec<(String, u64)>,
}

impl Strings {
    fn push(&mut self, value: &str) {
        if self.bytes.is_empty() {
            self.bytes.push(0);
        }
        if self.offsets.iter().any(|(name, _)| name == value) {
            return;
        }
        self.offsets.push((value.to_owned(), self.bytes.len() as u64));
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.push(0);
    }

    fn index_of(&self, value: &str) -> u64 {
        self.offsets
            .iter()
            .find(|(name, _)| name == value)
            .map_or(0, |(_, offset)| *offset)
    }
}

/// Growable little helper that never fails: the fixture layout is fixed.
struct Writer {
    codec: Codec,
    bytes: Vec<u8>,
}

impl Writer {
    fn new(codec: Codec) -> Self {
        Self {
            codec,
            bytes: Vec::new(),
        }
    }

    fn zero_to(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    fn put(&mut self, at: usize, raw: &[u8]) {
        self.zero_to(at + raw.len());
        self.bytes[at..at + raw.len()].copy_from_slice(raw);
    }

    fn u16(&mut self, at: usize, value: u16) {
        let raw = match self.codec.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.put(at, &raw);
    }

    fn u32(&mut self, at: usize, value: u32) {
        let raw = match self.codec.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.put(at, &raw);
    }

    fn word(&mut self, at: usize, value: u64) {
        match self.codec.class {
            Class::Elf32 => self.u32(at, to_u32(value)),
            Class::Elf64 => {
                let raw = match self.codec.endian {
                    Endian::Little => value.to_le_bytes(),
                    Endian::Big => value.to_be_bytes(),
                };
                self.put(at, &raw);
            }
        }
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the Elf_Phdr fields")]
    fn program_header(
        &mut self,
        at: usize,
        kind: u32,
        flags: u32,
        offset: u64,
        vaddr: u64,
        size: u64,
        align: u64,
    ) {
        let word = self.codec.word_size();
        match self.codec.class {
            Class::Elf32 => {
                self.u32(at, kind);
                self.word(at + 4, offset);
                self.word(at + 8, vaddr);
                self.word(at + 12, vaddr);
                self.word(at + 16, size);
                self.word(at + 20, size);
                self.u32(at + 24, flags);
                self.word(at + 28, align);
            }
            Class::Elf64 => {
                self.u32(at, kind);
                self.u32(at + 4, flags);
                self.word(at + 8, offset);
                self.word(at + 8 + word, vaddr);
                self.word(at + 8 + 2 * word, vaddr);
                self.word(at + 8 + 3 * word, size);
                self.word(at + 8 + 4 * word, size);
                self.word(at + 8 + 5 * word, align);
            }
        }
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the Elf_Shdr fields")]
    fn section_header(
        &mut self,
        at: usize,
        name: u32,
        kind: u32,
        addr: u64,
        offset: u64,
        size: u64,
        entsize: u64,
        link: u32,
    ) {
        let word = self.codec.word_size();
        self.u32(at, name);
        self.u32(at + 4, kind);
        let addr_at = at + 8 + word;
        self.word(addr_at, addr);
        self.word(addr_at + word, offset);
        self.word(addr_at + 2 * word, size);
        self.u32(addr_at + 3 * word, link);
        self.word(addr_at + 3 * word + 8 + word, entsize);
        self.zero_to(at + self.codec.shdr_size());
    }
}

fn align8(value: usize) -> usize {
    value.div_ceil(8) * 8
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
