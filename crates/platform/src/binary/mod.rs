//! Binary header inspection
//!
//! Only the ELF identification bytes and `e_machine`/`e_flags` are read; the
//! file is never executed or mapped.

use async_trait::async_trait;
use crossgrader_errors::PlatformError;
use std::path::Path;

use crate::core::PlatformContext;

pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// Bytes needed to cover a 64-bit ELF header
pub const ELF_HEADER_LEN: usize = 64;

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const E_MACHINE: usize = 18;
const E_FLAGS_32: usize = 36;
const E_FLAGS_64: usize = 48;

const EF_ARM_ABI_FLOAT_HARD: u32 = 0x400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfData {
    Little,
    Big,
}

/// The fields of an ELF header that identify the target CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub data: ElfData,
    pub machine: u16,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf(ElfHeader),
    NotElf,
}

/// Parse the leading bytes of a file
///
/// Anything without the ELF magic, or too short to carry `e_machine`,
/// is `NotElf`.
#[must_use]
pub fn parse_header(buf: &[u8]) -> BinaryFormat {
    if buf.len() < E_MACHINE + 2 || buf[..4] != ELF_MAGIC {
        return BinaryFormat::NotElf;
    }
    let class = match buf[EI_CLASS] {
        1 => ElfClass::Elf32,
        2 => ElfClass::Elf64,
        _ => return BinaryFormat::NotElf,
    };
    let data = match buf[EI_DATA] {
        1 => ElfData::Little,
        2 => ElfData::Big,
        _ => return BinaryFormat::NotElf,
    };
    let machine = read_u16(&buf[E_MACHINE..E_MACHINE + 2], data);
    let flags_at = match class {
        ElfClass::Elf32 => E_FLAGS_32,
        ElfClass::Elf64 => E_FLAGS_64,
    };
    let flags = buf
        .get(flags_at..flags_at + 4)
        .map_or(0, |b| read_u32(b, data));

    BinaryFormat::Elf(ElfHeader {
        class,
        data,
        machine,
        flags,
    })
}

fn read_u16(b: &[u8], data: ElfData) -> u16 {
    let bytes = [b[0], b[1]];
    match data {
        ElfData::Little => u16::from_le_bytes(bytes),
        ElfData::Big => u16::from_be_bytes(bytes),
    }
}

fn read_u32(b: &[u8], data: ElfData) -> u32 {
    let bytes = [b[0], b[1], b[2], b[3]];
    match data {
        ElfData::Little => u32::from_le_bytes(bytes),
        ElfData::Big => u32::from_be_bytes(bytes),
    }
}

/// `e_machine` plus whatever class/byte order disambiguates a Debian architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchSignature {
    pub machine: u16,
    pub class: Option<ElfClass>,
    pub data: Option<ElfData>,
}

impl ArchSignature {
    const fn new(machine: u16, class: Option<ElfClass>, data: Option<ElfData>) -> Self {
        Self {
            machine,
            class,
            data,
        }
    }
}

/// Header signature expected for a Debian architecture name
#[must_use]
pub fn signature_for(arch: &str) -> Option<ArchSignature> {
    use ElfClass::{Elf32, Elf64};
    use ElfData::{Big, Little};
    let sig = match arch {
        "i386" => ArchSignature::new(3, Some(Elf32), None),
        "amd64" => ArchSignature::new(62, Some(Elf64), None),
        "x32" => ArchSignature::new(62, Some(Elf32), None),
        // armel and armhf share e_machine; the float ABI flag is not compared
        "armel" | "armhf" => ArchSignature::new(40, None, None),
        "arm64" => ArchSignature::new(183, None, None),
        "mips" => ArchSignature::new(8, Some(Elf32), Some(Big)),
        "mipsel" => ArchSignature::new(8, Some(Elf32), Some(Little)),
        "mips64" => ArchSignature::new(8, Some(Elf64), Some(Big)),
        "mips64el" => ArchSignature::new(8, Some(Elf64), Some(Little)),
        "powerpc" => ArchSignature::new(20, None, None),
        "ppc64" => ArchSignature::new(21, None, Some(Big)),
        "ppc64el" => ArchSignature::new(21, None, Some(Little)),
        "s390x" => ArchSignature::new(22, Some(Elf64), None),
        "riscv64" => ArchSignature::new(243, Some(Elf64), None),
        "loong64" => ArchSignature::new(258, None, None),
        "sparc64" => ArchSignature::new(43, None, None),
        "ia64" => ArchSignature::new(50, None, None),
        "alpha" => ArchSignature::new(0x9026, None, None),
        "hppa" => ArchSignature::new(15, None, None),
        "m68k" => ArchSignature::new(4, None, None),
        "sh4" => ArchSignature::new(42, None, None),
        _ => return None,
    };
    Some(sig)
}

impl ElfHeader {
    /// Debian architecture name for this header, when there is one
    #[must_use]
    pub fn debian_arch(&self) -> Option<&'static str> {
        let arch = match (self.machine, self.class, self.data) {
            (3, _, _) => "i386",
            (62, ElfClass::Elf64, _) => "amd64",
            (62, ElfClass::Elf32, _) => "x32",
            (40, _, _) if self.flags & EF_ARM_ABI_FLOAT_HARD != 0 => "armhf",
            (40, _, _) => "armel",
            (183, _, _) => "arm64",
            (8, ElfClass::Elf32, ElfData::Big) => "mips",
            (8, ElfClass::Elf32, ElfData::Little) => "mipsel",
            (8, ElfClass::Elf64, ElfData::Big) => "mips64",
            (8, ElfClass::Elf64, ElfData::Little) => "mips64el",
            (20, _, _) => "powerpc",
            (21, _, ElfData::Big) => "ppc64",
            (21, _, ElfData::Little) => "ppc64el",
            (22, ElfClass::Elf64, _) => "s390x",
            (243, ElfClass::Elf64, _) => "riscv64",
            (258, _, _) => "loong64",
            (43, _, _) => "sparc64",
            (50, _, _) => "ia64",
            (0x9026, _, _) => "alpha",
            (15, _, _) => "hppa",
            (4, _, _) => "m68k",
            (42, _, _) => "sh4",
            _ => return None,
        };
        Some(arch)
    }

    /// Human-readable machine name, falling back to the raw field
    #[must_use]
    pub fn machine_name(&self) -> String {
        self.debian_arch()
            .map_or_else(|| format!("unknown (e_machine {:#06x})", self.machine), String::from)
    }

    /// Whether this header satisfies the signature of `arch`
    #[must_use]
    pub fn matches(&self, sig: &ArchSignature) -> bool {
        self.machine == sig.machine
            && sig.class.is_none_or(|c| c == self.class)
            && sig.data.is_none_or(|d| d == self.data)
    }
}

/// Trait for binary inspection operations
#[async_trait]
pub trait BinaryOperations: Send + Sync {
    /// Read the executable format of a file without executing it
    async fn read_format(
        &self,
        ctx: &PlatformContext,
        path: &Path,
    ) -> Result<BinaryFormat, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(class: u8, data: u8, machine: u16, flags: u32) -> Vec<u8> {
        let mut buf = vec![0u8; ELF_HEADER_LEN];
        buf[..4].copy_from_slice(&ELF_MAGIC);
        buf[EI_CLASS] = class;
        buf[EI_DATA] = data;
        let flags_at = if class == 1 { E_FLAGS_32 } else { E_FLAGS_64 };
        if data == 1 {
            buf[E_MACHINE..E_MACHINE + 2].copy_from_slice(&machine.to_le_bytes());
            buf[flags_at..flags_at + 4].copy_from_slice(&flags.to_le_bytes());
        } else {
            buf[E_MACHINE..E_MACHINE + 2].copy_from_slice(&machine.to_be_bytes());
            buf[flags_at..flags_at + 4].copy_from_slice(&flags.to_be_bytes());
        }
        buf
    }

    fn arch_of(buf: &[u8]) -> Option<&'static str> {
        match parse_header(buf) {
            BinaryFormat::Elf(h) => h.debian_arch(),
            BinaryFormat::NotElf => None,
        }
    }

    #[test]
    fn test_common_architectures() {
        assert_eq!(arch_of(&header(2, 1, 62, 0)), Some("amd64"));
        assert_eq!(arch_of(&header(2, 1, 183, 0)), Some("arm64"));
        assert_eq!(arch_of(&header(1, 1, 3, 0)), Some("i386"));
        assert_eq!(arch_of(&header(1, 1, 40, 0x0500_0400)), Some("armhf"));
        assert_eq!(arch_of(&header(1, 1, 40, 0x0500_0200)), Some("armel"));
        assert_eq!(arch_of(&header(2, 1, 21, 0)), Some("ppc64el"));
        assert_eq!(arch_of(&header(2, 2, 22, 0)), Some("s390x"));
        assert_eq!(arch_of(&header(2, 2, 8, 0)), Some("mips64"));
    }

    #[test]
    fn test_byte_order_respected() {
        // big-endian ppc64 stores e_machine 21 as 0x0015
        let buf = header(2, 2, 21, 0);
        assert_eq!(buf[E_MACHINE], 0);
        assert_eq!(arch_of(&buf), Some("ppc64"));
    }

    #[test]
    fn test_not_elf() {
        assert_eq!(parse_header(b"#!/bin/sh\necho hi\n"), BinaryFormat::NotElf);
        assert_eq!(parse_header(b"\x7fELF"), BinaryFormat::NotElf);
        assert_eq!(parse_header(b""), BinaryFormat::NotElf);
    }

    #[test]
    fn test_signature_matching() {
        let BinaryFormat::Elf(amd64) = parse_header(&header(2, 1, 62, 0)) else {
            panic!("expected ELF");
        };
        assert!(amd64.matches(&signature_for("amd64").unwrap()));
        assert!(!amd64.matches(&signature_for("x32").unwrap()));
        assert!(!amd64.matches(&signature_for("arm64").unwrap()));

        let BinaryFormat::Elf(armel) = parse_header(&header(1, 1, 40, 0)) else {
            panic!("expected ELF");
        };
        assert!(armel.matches(&signature_for("armhf").unwrap()));
        assert!(signature_for("not-an-arch").is_none());
    }

    #[test]
    fn test_unknown_machine_name() {
        let BinaryFormat::Elf(h) = parse_header(&header(2, 1, 0x1234, 0)) else {
            panic!("expected ELF");
        };
        assert_eq!(h.debian_arch(), None);
        assert!(h.machine_name().contains("0x1234"));
    }
}
