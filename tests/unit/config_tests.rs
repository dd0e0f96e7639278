//! Unit tests for configuration parsing and validation.

use serial_test::serial;

use session_relay::config::{GlobalConfig, PASSWORD_ENV_VAR};

const MINIMAL: &str = r#"
upload_dir = "/srv/relay/uploads"
"#;

#[test]
fn minimal_config_gets_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).unwrap();
    assert_eq!(config.listen_addr, "127.0.0.1:8787");
    assert_eq!(config.buffer_capacity, 400);
    assert_eq!(config.job.cli, "claude");
    assert_eq!(config.job.tool_result_limit, 800);
    assert_eq!(config.plan.idle_seconds, 2);
    assert_eq!(config.plan.reject_grace_ms, 200);
    assert!(!config.plan.approval_patterns.is_empty());
    assert_eq!(config.plan.approve_token, "y");
    assert_eq!(config.plan.reject_token, "n");
    assert!(config.agents_dir.is_none());
    assert!(config.password.is_empty(), "secret never comes from TOML");
}

#[test]
fn sections_override_defaults() {
    let text = r#"
listen_addr = "0.0.0.0:9000"
upload_dir = "/data/uploads"
agents_dir = "/data/agents"
buffer_capacity = 64

[job]
cli = "agent-cli"
base_args = ["--yes"]
default_model = "opus"
tool_result_limit = 400

[plan]
idle_seconds = 5
approval_patterns = ["(?i)continue\\?"]
"#;
    let config = GlobalConfig::from_toml_str(text).unwrap();
    assert_eq!(config.listen_addr, "0.0.0.0:9000");
    assert_eq!(config.buffer_capacity, 64);
    assert_eq!(config.job.cli, "agent-cli");
    assert_eq!(config.job.base_args, vec!["--yes"]);
    assert_eq!(config.job.default_model, "opus");
    assert_eq!(config.job.tool_result_limit, 400);
    assert_eq!(config.plan.idle_seconds, 5);
    assert_eq!(config.plan.approval_patterns.len(), 1);
}

#[test]
fn zero_buffer_capacity_is_rejected() {
    let text = "upload_dir = \"/x\"\nbuffer_capacity = 0\n";
    assert!(GlobalConfig::from_toml_str(text).is_err());
}

#[test]
fn missing_upload_dir_is_rejected() {
    assert!(GlobalConfig::from_toml_str("listen_addr = \"127.0.0.1:1\"\n").is_err());
}

#[test]
fn invalid_approval_pattern_is_rejected_at_load() {
    let text = "upload_dir = \"/x\"\n\n[plan]\napproval_patterns = [\"(unclosed\"]\n";
    let err = GlobalConfig::from_toml_str(text).unwrap_err();
    assert!(err.to_string().contains("approval pattern"), "{err}");
}

#[test]
fn approval_regexes_match_case_insensitively() {
    let config = GlobalConfig::from_toml_str(MINIMAL).unwrap();
    let regexes = config.approval_regexes().unwrap();
    let hit = |text: &str| regexes.iter().any(|re| re.is_match(text));
    assert!(hit("Do you want to proceed?"));
    assert!(hit("PROCEED with the plan?"));
    assert!(!hit("compiling 14 crates"));
}

#[test]
#[serial]
fn credentials_come_from_the_environment() {
    let mut config = GlobalConfig::from_toml_str(MINIMAL).unwrap();

    std::env::remove_var(PASSWORD_ENV_VAR);
    assert!(config.load_credentials().is_err());

    std::env::set_var(PASSWORD_ENV_VAR, "hunter2");
    config.load_credentials().unwrap();
    assert_eq!(config.password, "hunter2");
    std::env::remove_var(PASSWORD_ENV_VAR);
}
