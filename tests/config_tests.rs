//! Tests for configuration loading, validation, and credential overrides.

#[path = "common/test_constants.rs"]
mod test_constants;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use demo_deployer::test_support::EnvGuard;
use demo_deployer::{
    ConfigError, CredentialOverrides, ScalewayConfig, expand_tilde, load_credentials,
};
use rstest::*;
use tempfile::TempDir;

use test_constants::DEFAULT_INSTANCE_TYPE;

#[fixture]
fn valid_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESSKEYEXAMPLE")),
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_organization_id: None,
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from(DEFAULT_INSTANCE_TYPE),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
    }
}

#[rstest]
fn config_validation_rejects_missing_secret_with_actionable_error(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        secret_key: String::from("   "),
        ..valid_config
    };

    let error = cfg.validate().expect_err("secret is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("SCW_SECRET_KEY"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("demo-deployer.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("secret_key"),
        "error should mention TOML key: {message}"
    );
}

#[rstest]
#[case::project(|cfg: &mut ScalewayConfig| cfg.default_project_id.clear(), "SCW_DEFAULT_PROJECT_ID", "default_project_id")]
#[case::image(|cfg: &mut ScalewayConfig| cfg.default_image.clear(), "SCW_DEFAULT_IMAGE", "default_image")]
#[case::instance_type(|cfg: &mut ScalewayConfig| cfg.default_instance_type.clear(), "SCW_DEFAULT_INSTANCE_TYPE", "default_instance_type")]
#[case::zone(|cfg: &mut ScalewayConfig| cfg.default_zone.clear(), "SCW_DEFAULT_ZONE", "default_zone")]
#[case::architecture(|cfg: &mut ScalewayConfig| cfg.default_architecture.clear(), "SCW_DEFAULT_ARCHITECTURE", "default_architecture")]
fn config_validation_produces_actionable_errors_for_all_fields(
    valid_config: ScalewayConfig,
    #[case] mutate: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let message = cfg.validate().expect_err("validation should fail").to_string();

    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("demo-deployer.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn launch_builder_prefills_image_and_type(valid_config: ScalewayConfig) {
    let request = valid_config
        .launch_builder()
        .unwrap_or_else(|err| panic!("valid config yields builder: {err}"))
        .name("cms-demo")
        .ports([22, 80])
        .build()
        .unwrap_or_else(|err| panic!("request builds: {err}"));

    assert_eq!(request.image, "Ubuntu 24.04 Noble Numbat");
    assert_eq!(request.instance_type, DEFAULT_INSTANCE_TYPE);
    assert_eq!(request.ports, vec![22, 80]);
    assert_eq!(request.spot_bid(), None);
}

#[rstest]
fn launch_builder_refuses_invalid_config(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        default_project_id: String::new(),
        ..valid_config
    };

    assert!(matches!(
        cfg.launch_builder(),
        Err(ConfigError::MissingField(_))
    ));
}

#[rstest]
fn credentials_override_only_present_values(valid_config: ScalewayConfig) {
    let mut cfg = valid_config.clone();
    let overrides = CredentialOverrides {
        secret_key: Some(String::from("from-file")),
        zone: Some(String::from("nl-ams-1")),
        ..CredentialOverrides::default()
    };

    cfg.apply_credentials(&overrides);

    assert_eq!(cfg.secret_key, "from-file");
    assert_eq!(cfg.default_zone, "nl-ams-1");
    assert_eq!(cfg.access_key, valid_config.access_key);
    assert_eq!(cfg.default_project_id, valid_config.default_project_id);
    assert_eq!(cfg.default_instance_type, valid_config.default_instance_type);
}

#[tokio::test]
async fn environment_values_feed_the_loader() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home = tmp.path().to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[
        ("HOME", home.as_str()),
        ("XDG_CONFIG_HOME", home.as_str()),
        ("SCW_SECRET_KEY", "env-secret"),
        ("SCW_DEFAULT_PROJECT_ID", "env-project"),
        ("SCW_DEFAULT_ZONE", "pl-waw-1"),
    ])
    .await;

    let cfg = ScalewayConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("load should succeed: {err}"));

    assert_eq!(cfg.secret_key, "env-secret");
    assert_eq!(cfg.default_project_id, "env-project");
    assert_eq!(cfg.default_zone, "pl-waw-1");
    assert_eq!(cfg.default_instance_type, DEFAULT_INSTANCE_TYPE);
    cfg.validate()
        .unwrap_or_else(|err| panic!("env config validates: {err}"));
}

#[tokio::test]
async fn credentials_path_expands_tilde() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let home = tmp.path().to_string_lossy().to_string();
    let _guard = EnvGuard::set_vars(&[("HOME", home.as_str())]).await;

    let tmp_root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp home dir should be utf8: {}", path.display()));
    let fs = Dir::open_ambient_dir(&tmp_root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp home dir: {err}"));
    fs.create_dir_all(".scw")
        .unwrap_or_else(|err| panic!("create credentials dir: {err}"));
    fs.write(
        ".scw/demo.json",
        r#"{"SCW_SECRET_KEY": "tilde-secret", "SCW_DEFAULT_PROJECT_ID": "p"}"#,
    )
    .unwrap_or_else(|err| panic!("write credentials: {err}"));

    let path = Utf8PathBuf::from(expand_tilde("~/.scw/demo.json"));
    let overrides = load_credentials(&path).unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(overrides.secret_key.as_deref(), Some("tilde-secret"));
    assert_eq!(overrides.project_id.as_deref(), Some("p"));
}
