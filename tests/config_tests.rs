//! 配置模块的集成测试

use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod config_tests {
    use super::*;
    use mysql_pload::config::{ClientConfig, Config, LoadConfig, MAX_PARALLEL};

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.client.binary, "/usr/local/bin/mysql");
        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.client.port, 8250);
        assert_eq!(config.client.user, "root");

        assert_eq!(config.load.lines_per_chunk, 16);
        assert_eq!(config.load.parallel, 8);
        assert!(config.load.delete_after_load);
        assert!(config.load.fast_mode);
        assert_eq!(config.min_free_space_bytes(), 2 * 1024 * 1024 * 1024);
        assert!(config.failure_log_path().is_none());

        assert_eq!(config.log.level, "info");
        assert!(!config.log.enable_file);
        assert!(config.claim_file_path().is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_content = r#"
[client]
socket = "/var/run/mysqld/mysqld.sock"

[load]
database = "shop"
parallel = 16
"#;
        let config = Config::from_str(toml_content).unwrap();
        assert_eq!(config.client.socket, "/var/run/mysqld/mysqld.sock");
        assert_eq!(config.client.user, ClientConfig::default().user);
        assert_eq!(config.load.parallel, 16);
        assert_eq!(
            config.load.lines_per_chunk,
            LoadConfig::default().lines_per_chunk
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_str("[load\nparallel = ");
        assert!(result.unwrap_err().is_config_error());
    }

    #[test]
    fn test_wrong_type() {
        assert!(Config::from_str("[load]\nparallel = \"many\"\n").is_err());
    }

    #[test]
    fn test_parallel_is_bounded() {
        let config = Config::from_str("[load]\nparallel = 100000\n").unwrap();
        assert_eq!(config.load.parallel, MAX_PARALLEL);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pload.toml");

        let mut config = Config::default();
        config.load.database = "shop".to_string();
        config.load.failure_log = "failed.jsonl".to_string();
        config.save_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[load]"));
        assert!(content.contains("database = \"shop\""));

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.load.database, "shop");
        assert_eq!(
            loaded.failure_log_path().unwrap().to_str(),
            Some("failed.jsonl")
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/pload.toml").unwrap_err();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_work_dir() {
        let mut config = Config::default();
        config.load.tmp_dir = "/data/tmp".into();
        assert_eq!(
            config.work_dir(),
            std::path::PathBuf::from("/data/tmp/this_is_temp_dir_for_chunks")
        );
    }
}
