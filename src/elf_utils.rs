//! ELF loading.
//!
//! Not part of the core hart's public contract (`spec.md` §6 treats
//! any ELF/binary loader as an external collaborator); this exists so
//! the `emulate`/`elf2trace` binaries and golden-trace tests have a way
//! to get a compiled program into a `FlatMemory` host. Grounded in the
//! teacher's `elf_utils.rs`: walk every `SHF_ALLOC` section header and
//! copy its bytes to `sh_addr`, the same section-by-section approach
//! the teacher uses rather than walking `PT_LOAD` program headers.

use elf::abi::SHF_ALLOC;
use elf::endian::AnyEndian;
use elf::section::SectionHeader;
use elf::string_table::StringTable;
use elf::ElfBytes;
use thiserror::Error;

use crate::io::FlatMemory;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("could not read {0}: {1}")]
    Io(String, String),
    #[error("failed to parse ELF file: {0}")]
    Parse(String),
    #[error("ELF file has no allocatable sections to load")]
    NothingToLoad,
}

/// The program's entry point, for a caller that wants to
/// `hart.reset(loaded.entry)` afterwards, plus the `[low, high)` byte
/// range the loaded sections span, for a caller (the trace-file
/// converter) that wants to walk back over what it just loaded
/// without re-parsing the ELF file a second time.
#[derive(Debug, Clone, Copy)]
pub struct LoadedElf {
    pub entry: u32,
    pub low: u32,
    pub high: u32,
}

fn section_name<'a>(header: &SectionHeader, strtab: &'a StringTable) -> &'a str {
    strtab.get(header.sh_name as usize).unwrap_or("<unnamed>")
}

/// Load every `SHF_ALLOC` section of the ELF file at `path` into
/// `memory` at its linked address, returning the entry point.
pub fn load_elf(memory: &mut FlatMemory, path: &str) -> Result<LoadedElf, ElfError> {
    let file_data =
        std::fs::read(path).map_err(|e| ElfError::Io(path.to_string(), e.to_string()))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&file_data)
        .map_err(|e| ElfError::Parse(e.to_string()))?;

    let (section_headers, strtab) = file
        .section_headers_with_strtab()
        .map_err(|e| ElfError::Parse(e.to_string()))?;
    let section_headers = section_headers.ok_or(ElfError::NothingToLoad)?;
    let strtab = strtab.ok_or(ElfError::NothingToLoad)?;

    let mut loaded_any = false;
    let mut low = u32::MAX;
    let mut high = 0u32;
    for header in section_headers.iter() {
        if header.sh_flags & u64::from(SHF_ALLOC) == 0 {
            continue;
        }
        let addr = header.sh_addr as u32;
        let end = addr.wrapping_add(header.sh_size as u32);
        low = low.min(addr);
        high = high.max(end);
        // SHT_NOBITS (.bss) sections are allocatable but carry no file
        // data; memory already reads as zero before anything is
        // written, so there is nothing to copy.
        if header.sh_type == elf::abi::SHT_NOBITS {
            loaded_any = true;
            continue;
        }
        let (data, compression) = file
            .section_data(&header)
            .map_err(|e| ElfError::Parse(e.to_string()))?;
        if compression.is_some() {
            return Err(ElfError::Parse(format!(
                "section {} is compressed, which is not supported",
                section_name(&header, &strtab)
            )));
        }
        memory.load_bytes(addr, data);
        loaded_any = true;
    }

    if !loaded_any {
        return Err(ElfError::NothingToLoad);
    }

    Ok(LoadedElf {
        entry: file.ehdr.e_entry as u32,
        low,
        high,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error() {
        let mut memory = FlatMemory::new();
        let result = load_elf(&mut memory, "/nonexistent/path/to/nothing.elf");
        assert!(matches!(result, Err(ElfError::Io(_, _))));
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let mut memory = FlatMemory::new();
        let path = std::env::temp_dir().join("riscvemu_elf_utils_garbage_test.bin");
        std::fs::write(&path, b"not an elf file").unwrap();
        let result = load_elf(&mut memory, path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ElfError::Parse(_))));
    }
}
