//! Configuration loading tests
//!
//! Run with: `cargo test -p uvc-common --test config_tests`

use std::io::Write;
use tempfile::NamedTempFile;
use uvc_common::{DriverConfig, Error, Quirks, UsbId, load_config};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

mod loading {
    use super::*;

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
[locking]
timeout_ms = 250

[streaming]
transfer_count = 3
packets_per_transfer = 8
drop_corrupted = true

[queues]
pool_size = 2
buffers_per_queue = 6

[[quirks]]
device = "0x1234:0xabcd"
flags = ["fix_bandwidth", "PROBE_DEF"]
"#,
        );

        let config = DriverConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.locking.timeout_ms, 250);
        assert_eq!(config.streaming.transfer_count, 3);
        assert_eq!(config.streaming.packets_per_transfer, 8);
        assert!(config.streaming.drop_corrupted);
        assert_eq!(config.queues.buffers_per_queue, 6);

        let overrides = config.quirk_overrides().unwrap();
        assert_eq!(
            overrides,
            vec![(
                UsbId::new(0x1234, 0xabcd),
                Quirks::FIX_BANDWIDTH | Quirks::PROBE_DEF
            )]
        );
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let file = write_config("");
        let config = DriverConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.streaming.cancel_timeout_ms, 2000);
        assert!(config.quirks.is_empty());
    }

    #[test]
    fn test_load_config_by_string_path() {
        let file = write_config("[queues]\npool_size = 8\n");
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.queues.pool_size, 8);
    }
}

mod rejection {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/uvc-host/driver.toml");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let file = write_config("[streaming\ntransfer_count = ");
        assert!(matches!(
            DriverConfig::load(Some(file.path().to_path_buf())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_quirk_rejected_at_load() {
        let file = write_config("[[quirks]]\ndevice = \"046d:0825\"\nflags = [\"warp_speed\"]\n");
        let err = DriverConfig::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("warp_speed"));
    }

    #[test]
    fn test_zero_transfer_count_rejected() {
        let file = write_config("[streaming]\ntransfer_count = 0\n");
        assert!(DriverConfig::load(Some(file.path().to_path_buf())).is_err());
    }
}
