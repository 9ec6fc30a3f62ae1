#[cfg(test)]
mod tests {
    use deferrals::config::{DeferralConfig, FatalPolicy};
    use deferrals::Error;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_bare_config_file() {
        let file = write_config(
            r#"
poll_interval_ms = 1500
worker_count = 8
fatal_policy = "report"
"#,
        );

        let config = DeferralConfig::from_file(file.path()).unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(1500));
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.fatal_policy, FatalPolicy::Report);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_section_inside_application_file() {
        let file = write_config(
            r#"
[app]
name = "control-plane"

[deferrals]
worker_count = 4
"#,
        );

        let config = DeferralConfig::from_file(file.path()).unwrap();

        // Unset keys keep their defaults
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.fatal_policy, FatalPolicy::Exit);
    }

    #[test]
    fn test_zero_workers_fails_validation() {
        let file = write_config("worker_count = 0\n");
        let config = DeferralConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeferralConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let file = write_config("poll_interval_ms = [\n");
        let err = DeferralConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config file"));
    }
}
