//! Binary entry point for the demo-deployer CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use demo_deployer::{
    BackendError, ChannelError, ConfigError, ControllerError, CredentialsError, DeployError, Deployer,
    DeploymentPlan, KeyStore, LaunchRequest, LifecycleController, RemoteChannel, ScalewayBackend,
    ScalewayBackendError, ScalewayConfig, SshConfig, StreamingCommandRunner, expand_tilde,
    load_credentials,
};

mod cli;

use cli::{Cli, CommonArgs, DeployCommand, TerminateCommand};

type Controller = LifecycleController<ScalewayBackend, StreamingCommandRunner>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ssh configuration error: {0}")]
    Ssh(String),
    #[error(transparent)]
    Remote(#[from] ChannelError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("backend error: {0}")]
    Backend(#[from] ScalewayBackendError),
    #[error("invalid launch request: {0}")]
    Launch(#[from] BackendError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("deployment failed: {0}")]
    Deploy(#[from] DeployError<ScalewayBackendError>),
    #[error("{0}")]
    Controller(#[from] ControllerError<ScalewayBackendError>),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(args) => run_deploy(args).await,
        Cli::Terminate(args) => run_terminate(args).await,
    }
}

async fn run_deploy(args: DeployCommand) -> Result<(), CliError> {
    validate_user_input(&deploy_inputs(&args))?;
    let plan = build_plan(&args);
    plan.check_artifacts::<ScalewayBackendError>()?;

    let mut scaleway = load_scaleway_config(&args.common)?;
    if let Some(image) = &args.image {
        scaleway.default_image.clone_from(image);
    }
    if let Some(instance_type) = &args.instance_type {
        scaleway.default_instance_type.clone_from(instance_type);
    }
    let launch = build_launch(&scaleway, &args)?;

    let mut ssh = SshConfig::load_without_cli_args().map_err(|err| CliError::Ssh(err.to_string()))?;
    if let Some(user) = &args.user {
        ssh.ssh_user.clone_from(user);
    }

    let keypair = args
        .keypair_name
        .as_deref()
        .unwrap_or(&args.common.instance_name);
    let keystore = KeyStore::new(keypair, expand_tilde(&args.keys_folder));
    let controller = build_controller(scaleway, ssh, keystore).await?;

    let report = Deployer::new(controller).deploy(&launch, &plan).await?;
    writeln!(io::stdout(), "{report}").ok();
    Ok(())
}

async fn run_terminate(args: TerminateCommand) -> Result<(), CliError> {
    let name = args.common.instance_name.as_str();
    validate_user_input(&[name])?;

    let scaleway = load_scaleway_config(&args.common)?;
    let ssh = SshConfig::load_without_cli_args().map_err(|err| CliError::Ssh(err.to_string()))?;
    let mut controller =
        build_controller(scaleway, ssh, KeyStore::new(name, expand_tilde(cli::DEFAULT_KEYS_FOLDER)))
            .await?;

    match controller.terminate(Some(name)).await? {
        Some(instance_id) => info!("Terminated {name} ({instance_id})"),
        None => warn!("Nothing to terminate for {name}"),
    }
    Ok(())
}

async fn build_controller(
    scaleway: ScalewayConfig,
    ssh: SshConfig,
    keystore: KeyStore,
) -> Result<Controller, CliError> {
    let backend = ScalewayBackend::new(scaleway)?;
    let channel = RemoteChannel::with_streaming_runner(ssh)?;
    let controller = LifecycleController::new(backend, channel, keystore);
    controller.check_backend().await?;
    Ok(controller)
}

/// Merges defaults, configuration files, and the environment, then applies a
/// credentials file when one is given.
fn load_scaleway_config(common: &CommonArgs) -> Result<ScalewayConfig, CliError> {
    let overrides = common
        .credentials
        .as_deref()
        .map(|path| load_credentials(&Utf8PathBuf::from(expand_tilde(path))))
        .transpose()?;

    let mut config = ScalewayConfig::load_without_cli_args()?;
    if let Some(overrides) = overrides {
        info!("Using credentials: {}", overrides.present_keys().join(", "));
        config.apply_credentials(&overrides);
    }
    Ok(config)
}

fn build_launch(config: &ScalewayConfig, args: &DeployCommand) -> Result<LaunchRequest, CliError> {
    Ok(config
        .launch_builder()?
        .name(&args.common.instance_name)
        .ports(args.ports.iter().copied())
        .bid_price(Some(args.bid))
        .build()?)
}

fn build_plan(args: &DeployCommand) -> DeploymentPlan {
    DeploymentPlan {
        application_name: args
            .application_name
            .clone()
            .unwrap_or_else(|| args.common.instance_name.clone()),
        packages: args
            .packages
            .iter()
            .map(|path| Utf8PathBuf::from(expand_tilde(path)))
            .collect(),
        instance_clid: args
            .instance_clid
            .as_deref()
            .map(|path| Utf8PathBuf::from(expand_tilde(path))),
        deployment_script: Utf8PathBuf::from(expand_tilde(&args.deployment_script)),
    }
}

fn deploy_inputs(args: &DeployCommand) -> Vec<&str> {
    let mut inputs = vec![
        args.common.instance_name.as_str(),
        args.keys_folder.as_str(),
        args.deployment_script.as_str(),
    ];
    inputs.extend(
        [
            &args.image,
            &args.instance_type,
            &args.keypair_name,
            &args.user,
            &args.instance_clid,
            &args.application_name,
            &args.common.credentials,
        ]
        .into_iter()
        .filter_map(Option::as_deref),
    );
    inputs.extend(args.packages.iter().map(String::as_str));
    inputs
}

fn validate_user_input(values: &[&str]) -> Result<(), CliError> {
    if values.iter().any(|value| value.chars().any(char::is_control)) {
        return Err(CliError::InvalidArgument(String::from(concat!(
            "arguments must not contain control characters (ASCII ",
            "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
        ))));
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
