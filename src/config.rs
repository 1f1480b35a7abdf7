//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::LaunchRequestBuilder;
use crate::credentials::CredentialOverrides;

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "demo-deployer",
        env_var = "DEMO_DEPLOYER_CONFIG_PATH",
        config_file_name = "demo-deployer.toml",
        dotfile_name = ".demo-deployer.toml",
        project_file_name = "demo-deployer.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; kept so credential files round-trip.
    pub access_key: Option<String>,
    /// Secret key used for authentication. Required, but may arrive through
    /// a credentials file after loading.
    #[ortho_config(default = String::new())]
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and SSH keys. Required.
    #[ortho_config(default = String::new())]
    pub default_project_id: String,
    /// Availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances. Defaults to `DEV1-L`, which has
    /// enough memory for the content server and its database.
    #[ortho_config(default = "DEV1-L".to_owned())]
    pub default_instance_type: String,
    /// Image label (for example `Ubuntu 24.04 Noble Numbat`) or image id.
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in demo-deployer.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("demo-deployer")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Replaces the values present in `overrides`.
    ///
    /// Credential files take precedence over configuration files and
    /// environment variables.
    pub fn apply_credentials(&mut self, overrides: &CredentialOverrides) {
        if let Some(access_key) = &overrides.access_key {
            self.access_key = Some(access_key.clone());
        }
        if let Some(secret_key) = &overrides.secret_key {
            self.secret_key.clone_from(secret_key);
        }
        if let Some(project_id) = &overrides.project_id {
            self.default_project_id.clone_from(project_id);
        }
        if let Some(organization_id) = &overrides.organization_id {
            self.default_organization_id = Some(organization_id.clone());
        }
        if let Some(zone) = &overrides.zone {
            self.default_zone.clone_from(zone);
        }
    }

    /// Starts a launch request prefilled with the configured image and
    /// instance type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn launch_builder(&self) -> Result<LaunchRequestBuilder, ConfigError> {
        self.validate()?;
        Ok(LaunchRequestBuilder::new()
            .image(&self.default_image)
            .instance_type(&self.default_instance_type))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_image,
            &FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
        )?;
        Self::require_field(
            &self.default_instance_type,
            &FieldMetadata::new(
                "instance type",
                "SCW_DEFAULT_INSTANCE_TYPE",
                "default_instance_type",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_architecture,
            &FieldMetadata::new(
                "CPU architecture",
                "SCW_DEFAULT_ARCHITECTURE",
                "default_architecture",
                "scaleway",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
