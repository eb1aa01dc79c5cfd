//! Centralized, non-configurable filesystem paths
//!
//! These belong to dpkg, apt and initramfs-tools, not to us. Paths the
//! crossgrader owns default from here but can be overridden in `[paths]`.

pub const CONFIG_PATH: &str = "/etc/crossgrader/config.toml";

pub const STORAGE_DIR: &str = "/var/lib/crossgrader";
pub const SNAPSHOT_FILE: &str = "packages.json";
pub const JOURNAL_FILE: &str = "journal.json";
pub const EMULATION_DEBS_DIR: &str = "emulation-debs";
pub const HOOK_FUNCTIONS_BACKUP: &str = "hook-functions.bak";
pub const DEBUG_LOG_FILE: &str = "crossgrader.log";

pub const APT_ARCHIVES_DIR: &str = "/var/cache/apt/archives";
pub const DPKG_INFO_DIR: &str = "/var/lib/dpkg/info";

pub const INITRAMFS_HOOKS_DIR: &str = "/usr/share/initramfs-tools/hooks";
pub const HOOK_FUNCTIONS: &str = "/usr/share/initramfs-tools/hook-functions";

pub const ARCH_CHECK_BIN: &str = "/usr/bin/crossgrader-arch-check";

pub const SHELLS_FILE: &str = "/etc/shells";
pub const PASSWD_FILE: &str = "/etc/passwd";
