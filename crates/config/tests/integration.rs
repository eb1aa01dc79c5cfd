//! Integration tests for config

#[cfg(test)]
mod tests {
    use crossgrader_config::*;
    use crossgrader_types::{ColorChoice, OutputFormat};
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Env var tests must not run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "CROSSGRADER_OUTPUT",
        "CROSSGRADER_COLOR",
        "CROSSGRADER_MAX_PASSES",
        "CROSSGRADER_STORAGE_DIR",
        "CROSSGRADER_REMEDIATIONS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[general]
default_output = "plain"
color = "never"

[transaction]
max_passes = 4
batch_size = 25

[paths]
storage_dir = "/srv/crossgrade"

[packages]
always_include = ["sudo", "openssh-server"]

[remediation]
enabled = ["strip-prerm"]
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.general.default_output, OutputFormat::Plain);
        assert_eq!(config.general.color, ColorChoice::Never);
        assert_eq!(config.transaction.max_passes, 4);
        assert_eq!(config.transaction.batch_size, 25);
        // untouched fields keep their defaults
        assert_eq!(config.transaction.abort_after_min, 50);
        assert_eq!(config.storage_dir(), PathBuf::from("/srv/crossgrade"));
        assert_eq!(config.packages.always_include.len(), 2);
        assert_eq!(config.packages.tool_package, "crossgrader");
        assert_eq!(config.remediation.enabled, vec!["strip-prerm"]);
    }

    #[tokio::test]
    async fn test_invalid_file_values_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[download]\nqueue_capacity = 0").unwrap();
        assert!(Config::load_from_file(temp_file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = Config::load_from_file(std::path::Path::new("/nonexistent/crossgrader.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("CROSSGRADER_OUTPUT", "json");
        std::env::set_var("CROSSGRADER_COLOR", "always");
        std::env::set_var("CROSSGRADER_MAX_PASSES", "3");
        std::env::set_var("CROSSGRADER_STORAGE_DIR", "/tmp/cg-env");
        std::env::set_var("CROSSGRADER_REMEDIATIONS", "remove-coinstalled, ");

        let mut config = Config::default();
        config.merge_env().unwrap();

        assert_eq!(config.general.default_output, OutputFormat::Json);
        assert_eq!(config.general.color, ColorChoice::Always);
        assert_eq!(config.transaction.max_passes, 3);
        assert_eq!(config.storage_dir(), PathBuf::from("/tmp/cg-env"));
        assert_eq!(config.remediation.enabled, vec!["remove-coinstalled"]);

        clear_env();
    }

    #[test]
    fn test_invalid_env_value() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("CROSSGRADER_MAX_PASSES", "0");

        let mut config = Config::default();
        assert!(config.merge_env().is_err());

        clear_env();
    }
}
