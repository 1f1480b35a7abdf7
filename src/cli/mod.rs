//! Command-line interface definitions for the `demo-deployer` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Instance name used when `--instance-name` is omitted.
pub(crate) const DEFAULT_INSTANCE_NAME: &str = "cms-demo";
/// Keys folder used when `--keys-folder` is omitted.
pub(crate) const DEFAULT_KEYS_FOLDER: &str = "~/.demo-deployer/keys";

/// Top-level CLI for the `demo-deployer` binary.
#[derive(Debug, Parser)]
#[command(
    name = "demo-deployer",
    about = "Deploy a content server demo onto a single cloud VM",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision or reuse the named instance and deploy the demo on it.
    #[command(name = "deploy", about = "Provision an instance and deploy the demo")]
    Deploy(DeployCommand),
    /// Cancel spot requests and terminate the named instance.
    #[command(name = "terminate", about = "Terminate the named instance")]
    Terminate(TerminateCommand),
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct CommonArgs {
    /// Logical instance name, stored in the instance's `Name` tag.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_INSTANCE_NAME)]
    pub(crate) instance_name: String,
    /// JSON file with provider credentials; overrides config files and the
    /// environment.
    #[arg(long, value_name = "FILE")]
    pub(crate) credentials: Option<String>,
}

/// Arguments for the `demo-deployer deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    /// Override the image label or id for this deployment.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the instance type (commercial type) for this deployment.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Key pair name; defaults to the instance name.
    #[arg(long, value_name = "NAME")]
    pub(crate) keypair_name: Option<String>,
    /// Folder holding `<keypair>.pem` private keys.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_KEYS_FOLDER)]
    pub(crate) keys_folder: String,
    /// Remote SSH user; needs passwordless sudo.
    #[arg(long, value_name = "USER")]
    pub(crate) user: Option<String>,
    /// Spot bid price; zero launches an on-demand instance.
    #[arg(long, value_name = "PRICE", default_value_t = 0.0)]
    pub(crate) bid: f64,
    /// Inbound TCP port to open; repeat for several ports.
    #[arg(long = "port", value_name = "PORT", default_values_t = [22_u16, 80, 443, 8080])]
    pub(crate) ports: Vec<u16>,
    /// Package uploaded into the working directory; repeat for several.
    #[arg(long = "package", value_name = "FILE")]
    pub(crate) packages: Vec<String>,
    /// Connect credential file uploaded as `instance.clid`.
    #[arg(long, value_name = "FILE")]
    pub(crate) instance_clid: Option<String>,
    /// Remote working directory name; defaults to the instance name.
    #[arg(long, value_name = "NAME")]
    pub(crate) application_name: Option<String>,
    /// Setup script run on the instance with the package names as arguments.
    #[arg(long, value_name = "FILE", required = true)]
    pub(crate) deployment_script: String,
}

/// Arguments for the `demo-deployer terminate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TerminateCommand {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
}
