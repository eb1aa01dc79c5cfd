//! Integration tests for types

#[cfg(test)]
mod tests {
    use crossgrader_types::*;
    use proptest::prelude::*;

    #[test]
    fn test_arch_serialization() {
        let arch = Arch::new("arm64");
        let json = serde_json::to_string(&arch).unwrap();
        assert_eq!(json, r#""arm64""#);

        let deserialized: Arch = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, arch);
    }

    #[test]
    fn test_verdict_serialization() {
        let json = serde_json::to_string(&ArchVerdict::Mismatch("amd64".into())).unwrap();
        assert_eq!(json, r#"{"verdict":"mismatch","actual":"amd64"}"#);
        let json = serde_json::to_string(&ArchVerdict::NotABinary).unwrap();
        assert_eq!(json, r#"{"verdict":"not_a_binary"}"#);
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Tty);
    }

    proptest! {
        #[test]
        fn package_names_with_colons_keep_the_last_segment_as_arch(
            name in "[a-z0-9][a-z0-9+.-]{0,20}",
            arch in "[a-z][a-z0-9]{1,8}",
        ) {
            let parsed: PackageRef = format!("{name}:{arch}").parse().unwrap();
            prop_assert_eq!(parsed.name, name);
            prop_assert_eq!(parsed.arch.as_str(), arch.as_str());
        }
    }
}
