use figment::Jail;
use rust_ivi::config::{ConfigError, IviConfig};

const FILE: &str = r#"
[application]
name = "bench"
log_level = "info"

[[instruments]]
id = "dmm"
type = "hmc8012"
resource = "TCPIP0::192.168.1.20::INSTR"
"#;

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("instruments.toml", FILE)?;
        jail.set_env("RUSTIVI_APPLICATION__LOG_LEVEL", "debug");

        let config = IviConfig::load_from("instruments.toml").map_err(|e| e.to_string())?;
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "bench");
        assert_eq!(config.instruments.len(), 1);
        Ok(())
    });
}

#[test]
fn test_env_value_is_validated() {
    Jail::expect_with(|jail| {
        jail.create_file("instruments.toml", FILE)?;
        jail.set_env("RUSTIVI_APPLICATION__LOG_LEVEL", "verbose");

        match IviConfig::load_from("instruments.toml") {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("'verbose'")),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    });
}
