// tests/config_env.rs
use onchain_analyst::config::{AppConfig, ConfigError};
use std::{env, fs};

const KEYS: &[&str] = &[
    "ANALYST_CONFIG_PATH",
    "ANALYST_DATA_DIR",
    "OPENROUTER_API_KEY",
    "OPENROUTER_MODEL",
    "CONTRACT_ADDRESS",
    "ANALYST_ADDRESS",
    "X_API_KEY",
    "X_API_KEY_SECRET",
    "X_ACCESS_TOKEN",
    "X_ACCESS_TOKEN_SECRET",
    "MIN_CONFIDENCE",
];

const CONTRACT: &str = "0x3333333333333333333333333333333333333333";
const SENDER: &str = "0x4444444444444444444444444444444444444444";

fn clear_env() {
    for k in KEYS {
        env::remove_var(k);
    }
}

#[serial_test::serial]
#[test]
fn load_layers_file_then_env_and_reads_deployment_record() {
    // Own CWD so neither a repo config/ nor a stray deployed.json leaks in.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/analyst.toml"),
        r#"
data_dir = "state"
[insight]
model = "file-model"
[compose]
max_len = 200
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("deployed.json"),
        format!(r#"{{"address":"{CONTRACT}"}}"#),
    )
    .unwrap();

    env::set_var("OPENROUTER_API_KEY", "sk-test");
    env::set_var("OPENROUTER_MODEL", "env-model");
    env::set_var("ANALYST_ADDRESS", SENDER);

    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.insight.model, "env-model");
    assert_eq!(cfg.compose.max_len, 200);
    assert_eq!(cfg.run_log_path(), std::path::Path::new("state/runs.jsonl"));
    assert_eq!(cfg.ledger.contract_address.as_deref(), Some(CONTRACT));
    assert!(cfg.publish.credentials.is_none());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn missing_api_key_fails_load_but_not_resolve() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();
    env::set_var("CONTRACT_ADDRESS", CONTRACT);
    env::set_var("ANALYST_ADDRESS", SENDER);

    assert!(matches!(
        AppConfig::load(),
        Err(ConfigError::Missing("OPENROUTER_API_KEY"))
    ));
    let cfg = AppConfig::resolve().unwrap();
    assert_eq!(cfg.ledger.contract_address.as_deref(), Some(CONTRACT));

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn explicit_config_path_must_exist() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    env::set_var("ANALYST_CONFIG_PATH", tmp.path().join("nope.toml"));

    match AppConfig::resolve() {
        Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "ANALYST_CONFIG_PATH"),
        other => panic!("unexpected {other:?}"),
    }
    clear_env();
}
