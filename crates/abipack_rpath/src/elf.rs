//! Minimal ELF reader covering the structures a runpath rewrite touches.
//!
//! Only the file header, program headers, section headers and the dynamic
//! array are decoded. Both ELF classes and both byte orders are supported;
//! all field access goes through [`Codec`] so offsets and widths stay in one
//! place.

use crate::error::{Result, RpathError};

pub(crate) const PT_LOAD: u32 = 1;
pub(crate) const PT_DYNAMIC: u32 = 2;
pub(crate) const PT_INTERP: u32 = 3;
pub(crate) const PT_PHDR: u32 = 6;

pub(crate) const PF_W: u32 = 2;
pub(crate) const PF_R: u32 = 4;

pub(crate) const SHT_STRTAB: u32 = 3;
pub(crate) const SHT_DYNAMIC: u32 = 6;
pub(crate) const SHT_DYNSYM: u32 = 11;

pub(crate) const DT_NULL: u64 = 0;
pub(crate) const DT_NEEDED: u64 = 1;
pub(crate) const DT_STRTAB: u64 = 5;
pub(crate) const DT_STRSZ: u64 = 10;
pub(crate) const DT_SONAME: u64 = 14;
pub(crate) const DT_RPATH: u64 = 15;
pub(crate) const DT_RUNPATH: u64 = 29;
pub(crate) const DT_VERDEF: u64 = 0x6fff_fffc;
pub(crate) const DT_VERDEFNUM: u64 = 0x6fff_fffd;
pub(crate) const DT_VERNEED: u64 = 0x6fff_fffe;
pub(crate) const DT_VERNEEDNUM: u64 = 0x6fff_ffff;
pub(crate) const DT_AUXILIARY: u64 = 0x7fff_fffd;
pub(crate) const DT_FILTER: u64 = 0x7fff_ffff;

/// Dynamic tags whose value is an offset into the dynamic string table.
const STRING_TAGS: &[u64] = &[
    DT_NEEDED,
    DT_SONAME,
    DT_RPATH,
    DT_RUNPATH,
    DT_AUXILIARY,
    DT_FILTER,
];

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF file class (word size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// 32-bit objects (`ELFCLASS32`).
    Elf32,
    /// 64-bit objects (`ELFCLASS64`).
    Elf64,
}

/// ELF data encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Two's complement, little-endian (`ELFDATA2LSB`).
    Little,
    /// Two's complement, big-endian (`ELFDATA2MSB`).
    Big,
}

/// Field encoder/decoder for one class and byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Codec {
    pub(crate) class: Class,
    pub(crate) endian: Endian,
}

impl Codec {
    pub(crate) const fn new(class: Class, endian: Endian) -> Self {
        Self { class, endian }
    }

    pub(crate) const fn word_size(self) -> usize {
        match self.class {
            Class::Elf32 => 4,
            Class::Elf64 => 8,
        }
    }

    pub(crate) const fn ehdr_size(self) -> usize {
        match self.class {
            Class::Elf32 => 52,
            Class::Elf64 => 64,
        }
    }

    pub(crate) const fn phdr_size(self) -> usize {
        match self.class {
            Class::Elf32 => 32,
            Class::Elf64 => 56,
        }
    }

    pub(crate) const fn shdr_size(self) -> usize {
        match self.class {
            Class::Elf32 => 40,
            Class::Elf64 => 64,
        }
    }

    pub(crate) const fn dyn_size(self) -> usize {
        self.word_size() * 2
    }

    fn array<const N: usize>(bytes: &[u8], at: usize, what: &'static str) -> Result<[u8; N]> {
        at.checked_add(N)
            .and_then(|end| bytes.get(at..end))
            .and_then(|slice| slice.try_into().ok())
            .ok_or(RpathError::Truncated {
                what,
                offset: at as u64,
                len: N as u64,
            })
    }

    pub(crate) fn u16(self, bytes: &[u8], at: usize, what: &'static str) -> Result<u16> {
        let raw = Self::array::<2>(bytes, at, what)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub(crate) fn u32(self, bytes: &[u8], at: usize, what: &'static str) -> Result<u32> {
        let raw = Self::array::<4>(bytes, at, what)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub(crate) fn u64(self, bytes: &[u8], at: usize, what: &'static str) -> Result<u64> {
        let raw = Self::array::<8>(bytes, at, what)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Read a class-sized address, offset or size.
    pub(crate) fn word(self, bytes: &[u8], at: usize, what: &'static str) -> Result<u64> {
        match self.class {
            Class::Elf32 => self.u32(bytes, at, what).map(u64::from),
            Class::Elf64 => self.u64(bytes, at, what),
        }
    }

    fn put(bytes: &mut [u8], at: usize, raw: &[u8], what: &'static str) -> Result<()> {
        let target = at
            .checked_add(raw.len())
            .and_then(|end| bytes.get_mut(at..end))
            .ok_or(RpathError::Truncated {
                what,
                offset: at as u64,
                len: raw.len() as u64,
            })?;
        target.copy_from_slice(raw);
        Ok(())
    }

    pub(crate) fn put_u16(self, bytes: &mut [u8], at: usize, value: u16, what: &'static str) -> Result<()> {
        let raw = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        Self::put(bytes, at, &raw, what)
    }

    pub(crate) fn put_u32(self, bytes: &mut [u8], at: usize, value: u32, what: &'static str) -> Result<()> {
        let raw = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        Self::put(bytes, at, &raw, what)
    }

    pub(crate) fn put_u64(self, bytes: &mut [u8], at: usize, value: u64, what: &'static str) -> Result<()> {
        let raw = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        Self::put(bytes, at, &raw, what)
    }

    /// Write a class-sized address, offset or size.
    ///
    /// Values that do not fit a 32-bit field are rejected instead of being
    /// truncated.
    pub(crate) fn put_word(self, bytes: &mut [u8], at: usize, value: u64, what: &'static str) -> Result<()> {
        match self.class {
            Class::Elf32 => {
                let narrow =
                    u32::try_from(value).map_err(|_| RpathError::SizeOverflow { what, value })?;
                self.put_u32(bytes, at, narrow, what)
            }
            Class::Elf64 => self.put_u64(bytes, at, value, what),
        }
    }
}

/// The file header fields the rewriter reads or updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub(crate) phoff: u64,
    pub(crate) shoff: u64,
    pub(crate) phentsize: u16,
    pub(crate) phnum: u16,
    pub(crate) shentsize: u16,
    pub(crate) shnum: u16,
}

impl FileHeader {
    /// Offsets of `e_phoff` and `e_phnum` inside the file header.
    pub(crate) const fn phoff_field(codec: Codec) -> (usize, usize) {
        match codec.class {
            Class::Elf32 => (28, 44),
            Class::Elf64 => (32, 56),
        }
    }

    fn read(codec: Codec, bytes: &[u8]) -> Result<Self> {
        let what = "file header";
        match codec.class {
            Class::Elf32 => Ok(Self {
                phoff: codec.word(bytes, 28, what)?,
                shoff: codec.word(bytes, 32, what)?,
                phentsize: codec.u16(bytes, 42, what)?,
                phnum: codec.u16(bytes, 44, what)?,
                shentsize: codec.u16(bytes, 46, what)?,
                shnum: codec.u16(bytes, 48, what)?,
            }),
            Class::Elf64 => Ok(Self {
                phoff: codec.word(bytes, 32, what)?,
                shoff: codec.word(bytes, 40, what)?,
                phentsize: codec.u16(bytes, 54, what)?,
                phnum: codec.u16(bytes, 56, what)?,
                shentsize: codec.u16(bytes, 58, what)?,
                shnum: codec.u16(bytes, 60, what)?,
            }),
        }
    }
}

/// One program header table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type (`p_type`).
    pub kind: u32,
    /// Segment permission flags (`p_flags`).
    pub flags: u32,
    /// File offset of the segment.
    pub offset: u64,
    /// Virtual address of the segment.
    pub vaddr: u64,
    /// Physical address of the segment.
    pub paddr: u64,
    /// Bytes occupied in the file.
    pub filesz: u64,
    /// Bytes occupied in memory.
    pub memsz: u64,
    /// Required alignment.
    pub align: u64,
}

impl ProgramHeader {
    fn read(codec: Codec, bytes: &[u8], at: usize) -> Result<Self> {
        let what = "program header";
        match codec.class {
            Class::Elf32 => Ok(Self {
                kind: codec.u32(bytes, at, what)?,
                offset: codec.word(bytes, at + 4, what)?,
                vaddr: codec.word(bytes, at + 8, what)?,
                paddr: codec.word(bytes, at + 12, what)?,
                filesz: codec.word(bytes, at + 16, what)?,
                memsz: codec.word(bytes, at + 20, what)?,
                flags: codec.u32(bytes, at + 24, what)?,
                align: codec.word(bytes, at + 28, what)?,
            }),
            Class::Elf64 => Ok(Self {
                kind: codec.u32(bytes, at, what)?,
                flags: codec.u32(bytes, at + 4, what)?,
                offset: codec.word(bytes, at + 8, what)?,
                vaddr: codec.word(bytes, at + 16, what)?,
                paddr: codec.word(bytes, at + 24, what)?,
                filesz: codec.word(bytes, at + 32, what)?,
                memsz: codec.word(bytes, at + 40, what)?,
                align: codec.word(bytes, at + 48, what)?,
            }),
        }
    }

    pub(crate) fn write(&self, codec: Codec, bytes: &mut [u8], at: usize) -> Result<()> {
        let what = "program header";
        match codec.class {
            Class::Elf32 => {
                codec.put_u32(bytes, at, self.kind, what)?;
                codec.put_word(bytes, at + 4, self.offset, what)?;
                codec.put_word(bytes, at + 8, self.vaddr, what)?;
                codec.put_word(bytes, at + 12, self.paddr, what)?;
                codec.put_word(bytes, at + 16, self.filesz, what)?;
                codec.put_word(bytes, at + 20, self.memsz, what)?;
                codec.put_u32(bytes, at + 24, self.flags, what)?;
                codec.put_word(bytes, at + 28, self.align, what)
            }
            Class::Elf64 => {
                codec.put_u32(bytes, at, self.kind, what)?;
                codec.put_u32(bytes, at + 4, self.flags, what)?;
                codec.put_word(bytes, at + 8, self.offset, what)?;
                codec.put_word(bytes, at + 16, self.vaddr, what)?;
                codec.put_word(bytes, at + 24, self.paddr, what)?;
                codec.put_word(bytes, at + 32, self.filesz, what)?;
                codec.put_word(bytes, at + 40, self.memsz, what)?;
                codec.put_word(bytes, at + 48, self.align, what)
            }
        }
    }

    /// Whether `vaddr` falls inside the file-backed part of this segment.
    fn maps(&self, vaddr: u64) -> bool {
        vaddr >= self.vaddr && vaddr - self.vaddr < self.filesz
    }
}

/// One section header table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section type (`sh_type`).
    pub kind: u32,
    /// Virtual address when loaded.
    pub addr: u64,
    /// File offset of the section contents.
    pub offset: u64,
    /// Size of the section contents.
    pub size: u64,
    /// Size of one entry for table sections.
    pub entsize: u64,
    /// File offset of this header, for in-place updates.
    pub(crate) header_offset: usize,
}

impl SectionHeader {
    fn read(codec: Codec, bytes: &[u8], at: usize) -> Result<Self> {
        let what = "section header";
        let kind = codec.u32(bytes, at + 4, what)?;
        match codec.class {
            Class::Elf32 => Ok(Self {
                kind,
                addr: codec.word(bytes, at + 12, what)?,
                offset: codec.word(bytes, at + 16, what)?,
                size: codec.word(bytes, at + 20, what)?,
                entsize: codec.word(bytes, at + 36, what)?,
                header_offset: at,
            }),
            Class::Elf64 => Ok(Self {
                kind,
                addr: codec.word(bytes, at + 16, what)?,
                offset: codec.word(bytes, at + 24, what)?,
                size: codec.word(bytes, at + 32, what)?,
                entsize: codec.word(bytes, at + 56, what)?,
                header_offset: at,
            }),
        }
    }

    /// Rewrite the address, offset and size fields of this header.
    pub(crate) fn relocate(
        &self,
        codec: Codec,
        bytes: &mut [u8],
        addr: u64,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        let what = "section header";
        let at = self.header_offset;
        let (addr_at, offset_at, size_at) = match codec.class {
            Class::Elf32 => (at + 12, at + 16, at + 20),
            Class::Elf64 => (at + 16, at + 24, at + 32),
        };
        codec.put_word(bytes, addr_at, addr, what)?;
        codec.put_word(bytes, offset_at, offset, what)?;
        codec.put_word(bytes, size_at, size, what)
    }
}

/// One `Elf_Dyn` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicEntry {
    /// The `d_tag` value.
    pub tag: u64,
    /// The `d_val`/`d_ptr` value.
    pub value: u64,
}

impl DynamicEntry {
    /// Whether the value is an offset into the dynamic string table.
    pub(crate) fn references_string(&self) -> bool {
        STRING_TAGS.contains(&self.tag)
    }
}

/// The decoded dynamic array and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DynamicTable {
    /// File offset of the first entry.
    pub(crate) offset: usize,
    /// Number of entry slots the segment has room for.
    pub(crate) capacity: usize,
    /// Entries before the terminating `DT_NULL`.
    pub(crate) entries: Vec<DynamicEntry>,
}

impl DynamicTable {
    /// Slots available for new entries while keeping one terminating `DT_NULL`.
    pub(crate) fn spare_slots(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len() + 1)
    }

    pub(crate) fn value_of(&self, tag: u64) -> Option<u64> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| e.value)
    }

    /// Index of the entry carrying the search path, preferring `DT_RUNPATH`.
    pub(crate) fn search_path_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.tag == DT_RUNPATH)
            .or_else(|| self.entries.iter().position(|e| e.tag == DT_RPATH))
    }

    pub(crate) fn write_entries(
        codec: Codec,
        bytes: &mut [u8],
        at: usize,
        entries: &[DynamicEntry],
    ) -> Result<()> {
        let what = "dynamic entry";
        let word = codec.word_size();
        let terminator = DynamicEntry {
            tag: DT_NULL,
            value: 0,
        };
        for (index, entry) in entries.iter().chain(std::iter::once(&terminator)).enumerate() {
            let slot = entry_at(at, index, codec.dyn_size(), what)?;
            codec.put_word(bytes, slot, entry.tag, what)?;
            codec.put_word(bytes, offset_add(slot, word, what)?, entry.value, what)?;
        }
        Ok(())
    }
}

/// The dynamic string table located through `DT_STRTAB`/`DT_STRSZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StringTable {
    pub(crate) vaddr: u64,
    pub(crate) offset: usize,
    pub(crate) size: usize,
}

impl StringTable {
    /// Read the NUL-terminated string at `index`.
    pub(crate) fn read(&self, bytes: &[u8], index: u64) -> Result<String> {
        let start = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.size)
            .ok_or_else(|| {
                RpathError::Malformed(format!("string index {index} outside dynamic string table"))
            })?;
        let table = self.bytes(bytes)?;
        let tail = &table[start..];
        let end = tail.iter().position(|b| *b == 0).ok_or_else(|| {
            RpathError::Malformed(format!("unterminated string at index {index}"))
        })?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    /// The raw bytes of the table.
    pub(crate) fn bytes<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        self.offset
            .checked_add(self.size)
            .and_then(|end| bytes.get(self.offset..end))
            .ok_or(RpathError::Truncated {
                what: "dynamic string table",
                offset: self.offset as u64,
                len: self.size as u64,
            })
    }
}

/// A parsed view over an ELF object.
#[derive(Debug, Clone)]
pub struct ElfFile<'a> {
    bytes: &'a [u8],
    pub(crate) codec: Codec,
    pub(crate) header: FileHeader,
    program_headers: Vec<ProgramHeader>,
    section_headers: Vec<SectionHeader>,
}

impl<'a> ElfFile<'a> {
    /// Parse the headers of an ELF object.
    ///
    /// # Errors
    ///
    /// Returns [`RpathError::NotElf`] for non-ELF input, a class or encoding
    /// error for unsupported objects, and [`RpathError::Truncated`] or
    /// [`RpathError::Malformed`] when a table does not fit the input.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let ident = bytes.get(..16).ok_or_else(|| RpathError::NotElf {
            magic: bytes.iter().take(4).copied().collect(),
        })?;
        if ident[..4] != ELF_MAGIC {
            return Err(RpathError::NotElf {
                magic: ident[..4].to_vec(),
            });
        }
        let class = match ident[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(RpathError::UnsupportedClass(other)),
        };
        let endian = match ident[5] {
            1 => Endian::Little,
            2 => Endian::Big,
            other => return Err(RpathError::UnsupportedEncoding(other)),
        };
        let codec = Codec::new(class, endian);
        let header = FileHeader::read(codec, bytes)?;

        let program_headers = read_table(
            bytes,
            header.phoff,
            header.phnum,
            header.phentsize,
            codec.phdr_size(),
            |at| ProgramHeader::read(codec, bytes, at),
        )?;
        let section_headers = if header.shoff == 0 || header.shnum == 0 {
            Vec::new()
        } else {
            read_table(
                bytes,
                header.shoff,
                header.shnum,
                header.shentsize,
                codec.shdr_size(),
                |at| SectionHeader::read(codec, bytes, at),
            )?
        };

        Ok(Self {
            bytes,
            codec,
            header,
            program_headers,
            section_headers,
        })
    }

    /// The ELF class of the object.
    #[must_use]
    pub fn class(&self) -> Class {
        self.codec.class
    }

    /// The data encoding of the object.
    #[must_use]
    pub fn endian(&self) -> Endian {
        self.codec.endian
    }

    /// The raw bytes this view was parsed from.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The program header table.
    #[must_use]
    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.program_headers
    }

    /// The section header table (empty for stripped objects).
    #[must_use]
    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.section_headers
    }

    /// Translate a virtual address to a file offset through `PT_LOAD` segments.
    ///
    /// # Errors
    ///
    /// Returns [`RpathError::UnmappedAddress`] when no segment backs `vaddr`.
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Result<u64> {
        let segment = self
            .program_headers
            .iter()
            .filter(|ph| ph.kind == PT_LOAD)
            .find(|ph| ph.maps(vaddr))
            .ok_or(RpathError::UnmappedAddress(vaddr))?;
        segment
            .offset
            .checked_add(vaddr - segment.vaddr)
            .ok_or_else(|| {
                RpathError::Malformed(format!(
                    "segment at offset {:#x} cannot hold address {vaddr:#x}",
                    segment.offset
                ))
            })
    }

    pub(crate) fn dynamic_segment(&self) -> Result<&ProgramHeader> {
        self.program_headers
            .iter()
            .find(|ph| ph.kind == PT_DYNAMIC)
            .ok_or(RpathError::NotDynamic)
    }

    /// Decode the dynamic array up to its terminating `DT_NULL`.
    pub(crate) fn dynamic(&self) -> Result<DynamicTable> {
        let segment = self.dynamic_segment()?;
        let offset = to_usize(segment.offset, "dynamic segment offset")?;
        let size = to_usize(segment.filesz, "dynamic segment size")?;
        let entry_size = self.codec.dyn_size();
        let capacity = size / entry_size;
        let word = self.codec.word_size();

        let mut entries = Vec::new();
        for index in 0..capacity {
            let at = entry_at(offset, index, entry_size, "dynamic entry")?;
            let tag = self.codec.word(self.bytes, at, "dynamic entry")?;
            if tag == DT_NULL {
                return Ok(DynamicTable {
                    offset,
                    capacity,
                    entries,
                });
            }
            let value = self.codec.word(self.bytes, at + word, "dynamic entry")?;
            entries.push(DynamicEntry { tag, value });
        }
        Err(RpathError::Malformed(
            "dynamic array has no DT_NULL terminator".to_owned(),
        ))
    }

    /// Locate the dynamic string table.
    pub(crate) fn string_table(&self, dynamic: &DynamicTable) -> Result<StringTable> {
        let vaddr = dynamic
            .value_of(DT_STRTAB)
            .ok_or(RpathError::MissingStringTable)?;
        let size = dynamic
            .value_of(DT_STRSZ)
            .ok_or(RpathError::MissingStringTable)?;
        let table = StringTable {
            vaddr,
            offset: to_usize(self.vaddr_to_offset(vaddr)?, "string table offset")?,
            size: to_usize(size, "string table size")?,
        };
        table.bytes(self.bytes)?;
        Ok(table)
    }

    /// The section header describing the dynamic string table, if present.
    pub(crate) fn string_table_section(&self, table: &StringTable) -> Option<&SectionHeader> {
        self.section_headers
            .iter()
            .find(|sh| sh.kind == SHT_STRTAB && sh.addr == table.vaddr && sh.addr != 0)
    }

    /// The section header describing the dynamic array, if present.
    pub(crate) fn dynamic_section(&self) -> Option<&SectionHeader> {
        self.section_headers
            .iter()
            .find(|sh| sh.kind == SHT_DYNAMIC)
    }

    /// String table offsets referenced by `.dynsym` symbol names.
    pub(crate) fn symbol_name_references(&self) -> Result<Vec<u64>> {
        let mut names = Vec::new();
        for section in self.section_headers.iter().filter(|sh| sh.kind == SHT_DYNSYM) {
            if section.entsize == 0 {
                continue;
            }
            let start = to_usize(section.offset, "dynsym offset")?;
            let count = to_usize(section.size / section.entsize, "dynsym count")?;
            let stride = to_usize(section.entsize, "dynsym entry size")?;
            for index in 0..count {
                let at = entry_at(start, index, stride, "dynsym entry")?;
                let name = self.codec.u32(self.bytes, at, "dynsym entry")?;
                names.push(u64::from(name));
            }
        }
        Ok(names)
    }
}

impl ElfFile<'_> {
    /// String table offsets referenced by symbol-version records.
    ///
    /// Walks `DT_VERNEED` and `DT_VERDEF` chains; their layout is identical
    /// for both ELF classes.
    pub(crate) fn version_name_references(&self, dynamic: &DynamicTable) -> Result<Vec<u64>> {
        let mut names = Vec::new();
        if let (Some(vaddr), Some(count)) = (
            dynamic.value_of(DT_VERNEED),
            dynamic.value_of(DT_VERNEEDNUM),
        ) {
            self.walk_verneed(vaddr, count, &mut names)?;
        }
        if let (Some(vaddr), Some(count)) =
            (dynamic.value_of(DT_VERDEF), dynamic.value_of(DT_VERDEFNUM))
        {
            self.walk_verdef(vaddr, count, &mut names)?;
        }
        Ok(names)
    }

    fn walk_verneed(&self, vaddr: u64, count: u64, names: &mut Vec<u64>) -> Result<()> {
        let what = "version requirement";
        let mut at = to_usize(self.vaddr_to_offset(vaddr)?, what)?;
        for _ in 0..count {
            let aux_count = self.codec.u16(self.bytes, offset_add(at, 2, what)?, what)?;
            names.push(u64::from(self.codec.u32(self.bytes, offset_add(at, 4, what)?, what)?));
            let first_aux = self.codec.u32(self.bytes, offset_add(at, 8, what)?, what)?;
            let mut aux = offset_add(at, to_usize(u64::from(first_aux), what)?, what)?;
            for _ in 0..aux_count {
                names.push(u64::from(self.codec.u32(self.bytes, offset_add(aux, 8, what)?, what)?));
                let next = self.codec.u32(self.bytes, offset_add(aux, 12, what)?, what)?;
                if next == 0 {
                    break;
                }
                aux = offset_add(aux, to_usize(u64::from(next), what)?, what)?;
            }
            let next = self.codec.u32(self.bytes, offset_add(at, 12, what)?, what)?;
            if next == 0 {
                break;
            }
            at = offset_add(at, to_usize(u64::from(next), what)?, what)?;
        }
        Ok(())
    }

    fn walk_verdef(&self, vaddr: u64, count: u64, names: &mut Vec<u64>) -> Result<()> {
        let what = "version definition";
        let mut at = to_usize(self.vaddr_to_offset(vaddr)?, what)?;
        for _ in 0..count {
            let aux_count = self.codec.u16(self.bytes, offset_add(at, 6, what)?, what)?;
            let first_aux = self.codec.u32(self.bytes, offset_add(at, 12, what)?, what)?;
            let mut aux = offset_add(at, to_usize(u64::from(first_aux), what)?, what)?;
            for _ in 0..aux_count {
                names.push(u64::from(self.codec.u32(self.bytes, aux, what)?));
                let next = self.codec.u32(self.bytes, offset_add(aux, 4, what)?, what)?;
                if next == 0 {
                    break;
                }
                aux = offset_add(aux, to_usize(u64::from(next), what)?, what)?;
            }
            let next = self.codec.u32(self.bytes, offset_add(at, 16, what)?, what)?;
            if next == 0 {
                break;
            }
            at = offset_add(at, to_usize(u64::from(next), what)?, what)?;
        }
        Ok(())
    }
}

fn read_table<T>(
    bytes: &[u8],
    offset: u64,
    count: u16,
    entry_size: u16,
    expected_size: usize,
    mut read: impl FnMut(usize) -> Result<T>,
) -> Result<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if usize::from(entry_size) != expected_size {
        return Err(RpathError::Malformed(format!(
            "table entry size {entry_size} does not match the ELF class ({expected_size})"
        )));
    }
    let start = to_usize(offset, "table offset")?;
    let len = usize::from(count) * expected_size;
    if start.checked_add(len).is_none_or(|end| end > bytes.len()) {
        return Err(RpathError::Truncated {
            what: "header table",
            offset,
            len: len as u64,
        });
    }
    (0..usize::from(count))
        .map(|index| read(start + index * expected_size))
        .collect()
}

pub(crate) fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| RpathError::Malformed(format!("{what} {value:#x} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ElfFixture;
    use rstest::rstest;

    #[rstest]
    #[case::elf64_le(Class::Elf64, Endian::Little)]
    #[case::elf64_be(Class::Elf64, Endian::Big)]
    #[case::elf32_le(Class::Elf32, Endian::Little)]
    #[case::elf32_be(Class::Elf32, Endian::Big)]
    fn parses_fixture_in_every_layout(#[case] class: Class, #[case] endian: Endian) {
        let bytes = ElfFixture::shared_object()
            .with_layout(class, endian)
            .build();
        let elf = ElfFile::parse(&bytes).expect("fixture parses");
        assert_eq!(elf.class(), class);
        assert_eq!(elf.endian(), endian);

        let dynamic = elf.dynamic().expect("dynamic table");
        let strings = elf.string_table(&dynamic).expect("string table");
        let needed = dynamic.value_of(DT_NEEDED).expect("DT_NEEDED present");
        assert_eq!(strings.read(&bytes, needed).expect("needed name"), "libpq.so.5");
    }

    #[test]
    fn rejects_non_elf_input() {
        let err = ElfFile::parse(b"\xcf\xfa\xed\xfe macho").expect_err("Mach-O is rejected");
        assert!(matches!(err, RpathError::NotElf { .. }));
    }

    #[test]
    fn rejects_short_input() {
        let err = ElfFile::parse(b"\x7fELF").expect_err("too short");
        assert!(matches!(err, RpathError::NotElf { .. }));
    }

    #[test]
    fn rejects_unknown_class() {
        let mut bytes = ElfFixture::shared_object().build();
        bytes[4] = 9;
        let err = ElfFile::parse(&bytes).expect_err("bad class");
        assert!(matches!(err, RpathError::UnsupportedClass(9)));
    }

    #[test]
    fn rejects_truncated_program_headers() {
        let bytes = ElfFixture::shared_object().build();
        let err = ElfFile::parse(&bytes[..80]).expect_err("truncated");
        assert!(matches!(err, RpathError::Truncated { .. }));
    }

    #[test]
    fn unmapped_address_is_reported() {
        let bytes = ElfFixture::shared_object().build();
        let elf = ElfFile::parse(&bytes).expect("parses");
        let err = elf.vaddr_to_offset(0xdead_0000).expect_err("unmapped");
        assert!(matches!(err, RpathError::UnmappedAddress(0xdead_0000)));
    }

    #[test]
    fn put_word_refuses_to_truncate_on_elf32() {
        let codec = Codec::new(Class::Elf32, Endian::Little);
        let mut buffer = [0u8; 4];
        let err = codec
            .put_word(&mut buffer, 0, u64::from(u32::MAX) + 1, "test field")
            .expect_err("overflow");
        assert!(matches!(err, RpathError::SizeOverflow { .. }));
    }
}

/// `base + delta` as a file offset. Offsets taken from a corrupt header can
/// leave the address space; those are reported as truncation.
pub(crate) fn offset_add(base: usize, delta: usize, what: &'static str) -> Result<usize> {
    base.checked_add(delta).ok_or(RpathError::Truncated {
        what,
        offset: base as u64,
        len: delta as u64,
    })
}

/// File offset of entry `index` in a table of `stride`-byte entries at `start`.
pub(crate) fn entry_at(start: usize, index: usize, stride: usize, what: &'static str) -> Result<usize> {
    let delta = index.checked_mul(stride).ok_or(RpathError::Truncated {
        what,
        offset: start as u64,
        len: (index as u64).saturating_mul(stride as u64),
    })?;
    offset_add(start, delta, what)
}
