//! Runpath rewriting strategies.
//!
//! A rewrite first tries to reuse the existing `DT_RUNPATH`/`DT_RPATH`
//! string in place. When that string is too short, or shares bytes with
//! another string table reference, the dynamic string table is copied into a
//! new read-write `PT_LOAD` segment appended to the file, together with a new
//! program header table and, when the dynamic array has no free slot, a
//! relocated dynamic array. Existing segments never move, so code and data
//! addresses stay valid.

use crate::elf::{
    DT_RUNPATH, DT_STRSZ, DT_STRTAB, DynamicEntry, DynamicTable, ElfFile, FileHeader,
    PF_R, PF_W, PT_DYNAMIC, PT_INTERP, PT_LOAD, PT_PHDR, ProgramHeader, StringTable, offset_add, to_usize,
};
use crate::error::{Result, RpathError};
use log::debug;

const MIN_SEGMENT_ALIGN: u64 = 0x1000;
/// The largest page size of any supported architecture (x86-64 1 GiB pages).
const MAX_SEGMENT_ALIGN: u64 = 0x4000_0000;

/// How a runpath rewrite was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The object already carried the requested `DT_RUNPATH`.
    Unchanged,
    /// The existing search-path string was overwritten and NUL padded.
    InPlace,
    /// A new loadable segment holds the extended string table.
    AppendedSegment {
        /// Whether the dynamic array was moved into the new segment.
        relocated_dynamic: bool,
    },
}

/// The outcome of [`set_runpath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    /// The rewritten object.
    pub bytes: Vec<u8>,
    /// The strategy used for the rewrite.
    pub strategy: Strategy,
    /// The search path the object carried before the rewrite.
    pub previous: Option<String>,
}

/// Read the runtime search path of an ELF object.
///
/// `DT_RUNPATH` takes precedence over `DT_RPATH`, matching the dynamic
/// loader. Returns `Ok(None)` when neither entry is present.
///
/// # Errors
///
/// Returns an error when the input is not a dynamic ELF object or its
/// dynamic string table cannot be located.
pub fn read_runpath(bytes: &[u8]) -> Result<Option<String>> {
    let elf = ElfFile::parse(bytes)?;
    let dynamic = elf.dynamic()?;
    let Some(slot) = dynamic.search_path_slot() else {
        return Ok(None);
    };
    let strings = elf.string_table(&dynamic)?;
    strings.read(bytes, dynamic.entries[slot].value).map(Some)
}

/// Rewrite the runtime search path of an ELF object to `runpath`.
///
/// The result always carries the path as `DT_RUNPATH` and is read back
/// before being returned.
///
/// # Errors
///
/// Returns [`RpathError::InvalidRunpath`] for an empty path or one containing
/// NUL, a structural error when the object cannot be rewritten safely, and
/// [`RpathError::ReadBackMismatch`] when the rewritten object does not report
/// the requested path.
pub fn set_runpath(bytes: &[u8], runpath: &str) -> Result<Patched> {
    if runpath.is_empty() || runpath.contains('\0') {
        return Err(RpathError::InvalidRunpath(runpath.to_owned()));
    }

    let elf = ElfFile::parse(bytes)?;
    let dynamic = elf.dynamic()?;
    let strings = elf.string_table(&dynamic)?;
    let slot = dynamic.search_path_slot();
    let previous = slot
        .map(|index| strings.read(bytes, dynamic.entries[index].value))
        .transpose()?;

    let (patched, strategy) = match slot {
        Some(index)
            if dynamic.entries[index].tag == DT_RUNPATH
                && previous.as_deref() == Some(runpath) =>
        {
            (bytes.to_vec(), Strategy::Unchanged)
        }
        Some(index) if fits_in_place(&elf, &dynamic, index, previous.as_deref(), runpath)? => {
            (
                rewrite_in_place(&elf, &dynamic, index, runpath)?,
                Strategy::InPlace,
            )
        }
        _ => append_segment(&elf, &dynamic, &strings, slot, runpath)?,
    };
    debug!(
        "runpath {previous:?} -> {runpath:?} via {strategy:?} ({} -> {} bytes)",
        bytes.len(),
        patched.len()
    );

    let actual = read_runpath(&patched)?;
    if actual.as_deref() != Some(runpath) {
        return Err(RpathError::ReadBackMismatch {
            expected: runpath.to_owned(),
            actual,
        });
    }

    Ok(Patched {
        bytes: patched,
        strategy,
        previous,
    })
}

/// Whether the string at `slot` can be overwritten without disturbing any
/// other string table reference.
fn fits_in_place(
    elf: &ElfFile<'_>,
    dynamic: &DynamicTable,
    slot: usize,
    previous: Option<&str>,
    runpath: &str,
) -> Result<bool> {
    let Some(previous) = previous else {
        return Ok(false);
    };
    if previous.len() < runpath.len() {
        return Ok(false);
    }

    let start = dynamic.entries[slot].value;
    let end = start.saturating_add(previous.len() as u64);
    let overlaps = |offset: u64| offset >= start && offset < end;

    let shared_by_dynamic = dynamic
        .entries
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != slot)
        .any(|(_, entry)| entry.references_string() && overlaps(entry.value));
    if shared_by_dynamic {
        return Ok(false);
    }

    let shared_by_symbols = elf
        .symbol_name_references()?
        .into_iter()
        .chain(elf.version_name_references(dynamic)?)
        .any(overlaps);
    Ok(!shared_by_symbols)
}

fn rewrite_in_place(
    elf: &ElfFile<'_>,
    dynamic: &DynamicTable,
    slot: usize,
    runpath: &str,
) -> Result<Vec<u8>> {
    let codec = elf.codec;
    let strings = elf.string_table(dynamic)?;
    let mut bytes = elf.bytes().to_vec();

    let start = offset_add(
        strings.offset,
        to_usize(dynamic.entries[slot].value, "runpath index")?,
        "runpath string",
    )?;
    let old_len = strings.read(elf.bytes(), dynamic.entries[slot].value)?.len();
    let target = offset_add(start, old_len, "runpath string")
        .ok()
        .and_then(|end| bytes.get_mut(start..end))
        .ok_or(RpathError::Truncated {
            what: "runpath string",
            offset: start as u64,
            len: old_len as u64,
        })?;
    target.fill(0);
    target[..runpath.len()].copy_from_slice(runpath.as_bytes());

    let tag_at = dynamic.offset + slot * codec.dyn_size();
    codec.put_word(&mut bytes, tag_at, DT_RUNPATH, "dynamic entry")?;
    Ok(bytes)
}

/// Placement of the appended region in the file and in memory.
struct Region {
    offset: u64,
    vaddr: u64,
    align: u64,
}

impl Region {
    fn place(elf: &ElfFile<'_>) -> Result<Self> {
        let loads: Vec<&ProgramHeader> = elf
            .program_headers()
            .iter()
            .filter(|ph| ph.kind == PT_LOAD)
            .collect();
        let first = loads
            .first()
            .ok_or_else(|| RpathError::Malformed("object has no PT_LOAD segment".to_owned()))?;
        let align = loads
            .iter()
            .map(|ph| ph.align)
            .fold(MIN_SEGMENT_ALIGN, u64::max);
        if !align.is_power_of_two() || align > MAX_SEGMENT_ALIGN {
            return Err(RpathError::Malformed(format!(
                "PT_LOAD alignment {align:#x} is not a supported page size"
            )));
        }
        let mut vaddr_end = 0;
        for ph in &loads {
            let end = ph.vaddr.checked_add(ph.memsz).ok_or_else(|| {
                RpathError::Malformed(format!(
                    "PT_LOAD at {:#x} with size {:#x} wraps the address space",
                    ph.vaddr, ph.memsz
                ))
            })?;
            vaddr_end = vaddr_end.max(end);
        }
        let file_end = elf.bytes().len() as u64;

        // Kernels before 5.18 derive AT_PHDR for executables from e_phoff and
        // the first PT_LOAD, so an interpreted object keeps that segment's
        // vaddr-offset delta whenever the delta is segment aligned.
        let interpreted = elf.program_headers().iter().any(|ph| ph.kind == PT_INTERP);
        if interpreted && first.offset <= first.vaddr && (first.vaddr - first.offset) % align == 0 {
            let delta = first.vaddr - first.offset;
            let offset = align_up(file_end.max(vaddr_end.saturating_sub(delta)), align)?;
            let vaddr = offset.checked_add(delta).ok_or_else(|| {
                RpathError::Malformed(format!("no address left above {offset:#x} for a new segment"))
            })?;
            return Ok(Self {
                offset,
                vaddr,
                align,
            });
        }

        Ok(Self {
            offset: align_up(file_end, align)?,
            vaddr: align_up(vaddr_end, align)?,
            align,
        })
    }
}

fn append_segment(
    elf: &ElfFile<'_>,
    dynamic: &DynamicTable,
    strings: &StringTable,
    slot: Option<usize>,
    runpath: &str,
) -> Result<(Vec<u8>, Strategy)> {
    let codec = elf.codec;
    let region = Region::place(elf)?;
    let old_phnum = elf.program_headers().len();
    let phnum = u16::try_from(old_phnum + 1)
        .map_err(|_| RpathError::Malformed("program header table is full".to_owned()))?;

    // New string table: the old one, then the runpath.
    let mut table = strings.bytes(elf.bytes())?.to_vec();
    let runpath_index = table.len() as u64;
    table.extend_from_slice(runpath.as_bytes());
    table.push(0);

    let mut entries = dynamic.entries.clone();
    match slot {
        Some(index) => {
            entries[index] = DynamicEntry {
                tag: DT_RUNPATH,
                value: runpath_index,
            };
        }
        None => entries.push(DynamicEntry {
            tag: DT_RUNPATH,
            value: runpath_index,
        }),
    }
    let relocated_dynamic = entries.len() + 1 > dynamic.capacity;

    let phdr_table_len = (old_phnum + 1) * codec.phdr_size();
    let dynamic_len = if relocated_dynamic {
        (entries.len() + 1) * codec.dyn_size()
    } else {
        0
    };
    let dynamic_at = phdr_table_len;
    let table_at = dynamic_at + dynamic_len;
    let region_len = (table_at + table.len()) as u64;
    if region.offset.checked_add(region_len).is_none() || region.vaddr.checked_add(region_len).is_none() {
        return Err(RpathError::Malformed(format!(
            "no room for a {region_len}-byte segment at {:#x}",
            region.vaddr
        )));
    }

    for entry in &mut entries {
        match entry.tag {
            DT_STRTAB => entry.value = region.vaddr + table_at as u64,
            DT_STRSZ => entry.value = table.len() as u64,
            _ => {}
        }
    }

    let phdrs = rewrite_program_headers(
        elf,
        &region,
        region_len,
        phdr_table_len,
        relocated_dynamic.then_some((dynamic_at, dynamic_len)),
    );

    let region_start = to_usize(region.offset, "region offset")?;
    let region_end = offset_add(
        region_start,
        to_usize(region_len, "region length")?,
        "appended segment",
    )?;
    let mut bytes = elf.bytes().to_vec();
    bytes.resize(region_end, 0);

    for (index, ph) in phdrs.iter().enumerate() {
        ph.write(codec, &mut bytes, region_start + index * codec.phdr_size())?;
    }
    let dynamic_offset = if relocated_dynamic {
        region_start + dynamic_at
    } else {
        dynamic.offset
    };
    DynamicTable::write_entries(codec, &mut bytes, dynamic_offset, &entries)?;
    bytes[region_start + table_at..region_start + table_at + table.len()].copy_from_slice(&table);

    let (phoff_at, phnum_at) = FileHeader::phoff_field(codec);
    codec.put_word(&mut bytes, phoff_at, region.offset, "e_phoff")?;
    codec.put_u16(&mut bytes, phnum_at, phnum, "e_phnum")?;

    if let Some(section) = elf.string_table_section(strings) {
        section.relocate(
            codec,
            &mut bytes,
            region.vaddr + table_at as u64,
            region.offset + table_at as u64,
            table.len() as u64,
        )?;
    }
    if relocated_dynamic {
        if let Some(section) = elf.dynamic_section() {
            section.relocate(
                codec,
                &mut bytes,
                region.vaddr + dynamic_at as u64,
                region.offset + dynamic_at as u64,
                dynamic_len as u64,
            )?;
        }
    }

    Ok((bytes, Strategy::AppendedSegment { relocated_dynamic }))
}

/// Build the new program header table: the new `PT_LOAD` goes right after
/// the last existing one so loadable segments stay sorted by address.
fn rewrite_program_headers(
    elf: &ElfFile<'_>,
    region: &Region,
    region_len: u64,
    phdr_table_len: usize,
    relocated_dynamic: Option<(usize, usize)>,
) -> Vec<ProgramHeader> {
    let mut phdrs = elf.program_headers().to_vec();
    for ph in &mut phdrs {
        match ph.kind {
            PT_PHDR => move_segment(ph, region, 0, phdr_table_len),
            PT_DYNAMIC => {
                if let Some((at, len)) = relocated_dynamic {
                    move_segment(ph, region, at, len);
                }
            }
            _ => {}
        }
    }

    let insert_at = phdrs
        .iter()
        .rposition(|ph| ph.kind == PT_LOAD)
        .map_or(phdrs.len(), |index| index + 1);
    phdrs.insert(
        insert_at,
        ProgramHeader {
            kind: PT_LOAD,
            flags: PF_R | PF_W,
            offset: region.offset,
            vaddr: region.vaddr,
            paddr: region.vaddr,
            filesz: region_len,
            memsz: region_len,
            align: region.align,
        },
    );
    phdrs
}

fn move_segment(ph: &mut ProgramHeader, region: &Region, at: usize, len: usize) {
    ph.offset = region.offset + at as u64;
    ph.vaddr = region.vaddr + at as u64;
    ph.paddr = ph.vaddr;
    ph.filesz = len as u64;
    ph.memsz = len as u64;
}

fn align_up(value: u64, align: u64) -> Result<u64> {
    value.checked_next_multiple_of(align).ok_or_else(|| {
        RpathError::Malformed(format!("{value:#x} cannot be aligned to {align:#x}"))
    })
}

#[cfg(test)]
#[path = "patch_tests.rs"]
mod tests;
