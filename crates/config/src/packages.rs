//! Package sets the stage controller treats specially

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Emulation layer, crossgraded first and in this order
    #[serde(default = "default_emulation")]
    pub emulation: Vec<String>,
    /// The package manager itself; its dependency closure leads every order
    #[serde(default = "default_package_manager")]
    pub package_manager: Vec<String>,
    /// Package whose `Depends` are the crossgrader's own runtime needs
    #[serde(default = "default_tool_package")]
    pub tool_package: String,
    /// Used when the tool package is not installed through dpkg
    #[serde(default = "default_fallback_tool_dependencies")]
    pub fallback_tool_dependencies: Vec<String>,
    /// Always part of stage one when installed
    #[serde(default = "default_always_include")]
    pub always_include: Vec<String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            emulation: default_emulation(),
            package_manager: default_package_manager(),
            tool_package: default_tool_package(),
            fallback_tool_dependencies: default_fallback_tool_dependencies(),
            always_include: default_always_include(),
        }
    }
}

/// Remediations the executor may apply, by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_remediations")]
    pub enabled: Vec<String>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: default_remediations(),
        }
    }
}

fn default_emulation() -> Vec<String> {
    vec!["qemu-user-static".to_string(), "binfmt-support".to_string()]
}

fn default_package_manager() -> Vec<String> {
    vec!["dpkg".to_string(), "apt".to_string()]
}

fn default_tool_package() -> String {
    "crossgrader".to_string()
}

fn default_fallback_tool_dependencies() -> Vec<String> {
    vec!["libc6".to_string(), "libgcc-s1".to_string()]
}

fn default_always_include() -> Vec<String> {
    vec!["sudo".to_string()]
}

fn default_remediations() -> Vec<String> {
    vec!["remove-coinstalled".to_string(), "strip-prerm".to_string()]
}
