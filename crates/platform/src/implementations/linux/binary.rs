//! Linux binary inspection implementation

use async_trait::async_trait;
use crossgrader_errors::PlatformError;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::binary::{parse_header, BinaryFormat, BinaryOperations, ELF_HEADER_LEN};
use crate::core::PlatformContext;

/// Reads ELF headers with buffered async file I/O
pub struct LinuxBinaryOperations;

impl LinuxBinaryOperations {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinuxBinaryOperations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BinaryOperations for LinuxBinaryOperations {
    async fn read_format(
        &self,
        _ctx: &PlatformContext,
        path: &Path,
    ) -> Result<BinaryFormat, PlatformError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            PlatformError::FilesystemOperationFailed {
                operation: format!("open {}", path.display()),
                message: e.to_string(),
            }
        })?;

        let mut buf = Vec::with_capacity(ELF_HEADER_LEN);
        file.take(ELF_HEADER_LEN as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| PlatformError::FilesystemOperationFailed {
                operation: format!("read {}", path.display()),
                message: e.to_string(),
            })?;

        Ok(parse_header(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_elf_and_script() {
        let dir = tempfile::tempdir().unwrap();

        let elf_path = dir.path().join("prog");
        let mut header = vec![0u8; 64];
        header[..4].copy_from_slice(b"\x7fELF");
        header[4] = 2;
        header[5] = 1;
        header[18..20].copy_from_slice(&183u16.to_le_bytes());
        std::fs::File::create(&elf_path)
            .unwrap()
            .write_all(&header)
            .unwrap();

        let script_path = dir.path().join("script.sh");
        std::fs::write(&script_path, "#!/bin/sh\nexit 0\n").unwrap();

        let ops = LinuxBinaryOperations::new();
        let ctx = PlatformContext::default();

        match ops.read_format(&ctx, &elf_path).await.unwrap() {
            BinaryFormat::Elf(h) => assert_eq!(h.debian_arch(), Some("arm64")),
            BinaryFormat::NotElf => panic!("expected ELF"),
        }
        assert_eq!(
            ops.read_format(&ctx, &script_path).await.unwrap(),
            BinaryFormat::NotElf
        );
        assert!(ops
            .read_format(&ctx, &dir.path().join("missing"))
            .await
            .is_err());
    }
}
