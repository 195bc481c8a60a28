#[cfg(test)]
mod tests {
    use laniakea_config::ConfigLoader;
    use laniakea_config::schema::*;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_config_defaults() {
        let config = LaniakeaConfig::default();
        assert_eq!(config.plugin.name, "laniakea-plugin");
        assert_eq!(config.plugin.version, "0.1.0");
        assert!(config.plugin.host_version_constraint.is_none());
        assert_eq!(config.server.listen, "127.0.0.1:0");
        assert_eq!(config.server.shutdown_grace_ms, 5_000);
        assert!(config.client.request_timeout_ms.is_none());
        assert_eq!(config.stream.buffer, 64);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_defaults_validate_with_warnings_only() {
        let warnings = LaniakeaConfig::default().validate().unwrap();
        assert!(
            warnings
                .iter()
                .all(|w| w.severity == WarningSeverity::Warning)
        );
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "plugin.host_version_constraint")
        );
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = LaniakeaConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: LaniakeaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.server.listen, config.server.listen);
        assert_eq!(restored.stream.buffer, config.stream.buffer);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[plugin]
name = "test_datasource"
version = "0.3.1"
host_version_constraint = ">= 0.2.0"

[stream]
buffer = 8
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        assert_eq!(config.plugin.name, "test_datasource");
        assert_eq!(config.plugin.host_version_constraint.as_deref(), Some(">= 0.2.0"));
        assert_eq!(config.stream.buffer, 8);
        assert_eq!(config.server.listen, "127.0.0.1:0");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.validate().is_ok());
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_buffer_is_error() {
        let mut config = LaniakeaConfig::default();
        config.stream.buffer = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("stream.buffer"));
    }

    #[test]
    fn test_bad_listen_is_error() {
        let mut config = LaniakeaConfig::default();
        config.server.listen = "localhost".into();
        assert!(config.validate().unwrap_err().contains("server.listen"));
    }

    #[test]
    fn test_bad_constraint_is_error() {
        let mut config = LaniakeaConfig::default();
        config.plugin.host_version_constraint = Some("~~> 1".into());
        assert!(
            config
                .validate()
                .unwrap_err()
                .contains("plugin.host_version_constraint")
        );
    }

    #[test]
    fn test_bad_plugin_version_is_error() {
        let mut config = LaniakeaConfig::default();
        config.plugin.version = "one".into();
        assert!(config.validate().unwrap_err().contains("plugin.version"));
    }

    #[test]
    fn test_plugin_version_gate_from_config() {
        let mut config = LaniakeaConfig::default();
        config.plugin.version = "0.3.1".into();
        config.plugin.host_version_constraint = Some(">= 0.2.0".into());
        let gate = config.plugin.version_gate().unwrap();
        assert_eq!(gate.get_version().unwrap(), "0.3.1");
        assert!(gate.push_version("0.1.0").is_err());
        gate.push_version("0.2.5").unwrap();

        config.plugin.host_version_constraint = None;
        let open = config.plugin.version_gate().unwrap();
        open.push_version("99.0.0").unwrap();
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[plugin]
name = "rng"
version = "1.0.0"
host_version_constraint = ">=0.2.0"

[server]
listen = "127.0.0.1:1234"
"#
        )
        .unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(loader.get().plugin.name, "rng");
        assert_eq!(loader.path(), file.path());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().plugin.version, "0.1.0");
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[plugin\nname = ").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_invalid_values_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nbuffer = 0").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }
}
