//! kubevirt-ci-runner - prepare a KubeVirt VM for a CI job

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubevirt_ci_runner::client::{create_client, KubeInstanceApi};
use kubevirt_ci_runner::job::{JobContext, JobDefaults};
use kubevirt_ci_runner::prepare::{prepare, PrepareConfig};

/// kubevirt-ci-runner - ephemeral KubeVirt VMs as CI job executors
#[derive(Parser, Debug)]
#[command(name = "kubevirt-ci-runner", version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file
    ///
    /// When unset, the in-cluster service account is tried first, then
    /// $KUBECONFIG and ~/.kube/config.
    #[arg(long, global = true, env = "KUBECONFIG_PATH")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the job's virtual machine and wait until it is ready
    Prepare(PrepareArgs),
}

/// Prepare stage arguments
#[derive(Args, Debug)]
struct PrepareArgs {
    #[command(flatten)]
    job: JobArgs,

    #[command(flatten)]
    defaults: DefaultArgs,

    /// Seconds to wait for the instance to become ready
    #[arg(long, env = "KUBEVIRT_TIMEOUT_SECS", default_value = "3600")]
    timeout_secs: u64,
}

/// The job description, as exported by the CI system
#[derive(Args, Debug)]
struct JobArgs {
    /// Job ID; must be unique among running jobs
    #[arg(long, env = "CUSTOM_ENV_CI_JOB_ID")]
    job_id: String,

    /// Prefix for the generated instance name (default: "ci-job-<id>-")
    #[arg(long, env = "KUBEVIRT_BASE_NAME")]
    base_name: Option<String>,

    /// Namespace to create the instance in
    #[arg(long, env = "KUBEVIRT_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Emulated machine type
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_MACHINE_TYPE", default_value = "")]
    machine_type: String,

    /// Containerdisk image
    #[arg(long, env = "CUSTOM_ENV_CI_JOB_IMAGE")]
    image: Option<String>,

    /// Image pull policy
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_IMAGE_PULL_POLICY")]
    image_pull_policy: Option<String>,

    /// Image pull secret
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_IMAGE_PULL_SECRET")]
    image_pull_secret: Option<String>,

    /// CPU request
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_CPU_REQUEST")]
    cpu_request: Option<String>,

    /// CPU limit
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_CPU_LIMIT")]
    cpu_limit: Option<String>,

    /// Memory request
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_MEMORY_REQUEST")]
    memory_request: Option<String>,

    /// Memory limit
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_MEMORY_LIMIT")]
    memory_limit: Option<String>,

    /// Ephemeral storage request
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_EPHEMERAL_STORAGE_REQUEST")]
    ephemeral_storage_request: Option<String>,

    /// Ephemeral storage limit
    #[arg(long, env = "CUSTOM_ENV_KUBEVIRT_EPHEMERAL_STORAGE_LIMIT")]
    ephemeral_storage_limit: Option<String>,
}

/// Cluster-wide defaults for fields the job leaves unset
#[derive(Args, Debug)]
struct DefaultArgs {
    /// Default containerdisk image
    #[arg(long)]
    default_image: Option<String>,

    /// Default image pull policy
    #[arg(long)]
    default_image_pull_policy: Option<String>,

    /// Default image pull secret
    #[arg(long)]
    default_image_pull_secret: Option<String>,

    /// Default CPU request
    #[arg(long, default_value = "1")]
    default_cpu_request: String,

    /// Default CPU limit
    #[arg(long, default_value = "1")]
    default_cpu_limit: String,

    /// Default memory request
    #[arg(long, default_value = "1Gi")]
    default_memory_request: String,

    /// Default memory limit
    #[arg(long, default_value = "1Gi")]
    default_memory_limit: String,

    /// Default ephemeral storage request
    #[arg(long)]
    default_ephemeral_storage_request: Option<String>,

    /// Default ephemeral storage limit
    #[arg(long)]
    default_ephemeral_storage_limit: Option<String>,
}

impl From<JobArgs> for JobContext {
    fn from(args: JobArgs) -> Self {
        let base_name = args
            .base_name
            .unwrap_or_else(|| format!("ci-job-{}-", args.job_id));
        Self {
            id: args.job_id,
            base_name,
            namespace: args.namespace,
            machine_type: args.machine_type,
            image: args.image,
            image_pull_policy: args.image_pull_policy,
            image_pull_secret: args.image_pull_secret,
            cpu_request: args.cpu_request,
            cpu_limit: args.cpu_limit,
            memory_request: args.memory_request,
            memory_limit: args.memory_limit,
            ephemeral_storage_request: args.ephemeral_storage_request,
            ephemeral_storage_limit: args.ephemeral_storage_limit,
        }
    }
}

impl From<DefaultArgs> for JobDefaults {
    fn from(args: DefaultArgs) -> Self {
        Self {
            image: args.default_image,
            image_pull_policy: args.default_image_pull_policy,
            image_pull_secret: args.default_image_pull_secret,
            cpu_request: Some(args.default_cpu_request),
            cpu_limit: Some(args.default_cpu_limit),
            memory_request: Some(args.default_memory_request),
            memory_limit: Some(args.default_memory_limit),
            ephemeral_storage_request: args.default_ephemeral_storage_request,
            ephemeral_storage_limit: args.default_ephemeral_storage_limit,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout belongs to the CI system
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare(args) => run_prepare(cli.kubeconfig, args).await,
    }
}

/// Run the prepare stage for one job
async fn run_prepare(kubeconfig: Option<PathBuf>, args: PrepareArgs) -> anyhow::Result<()> {
    let client = create_client(kubeconfig.as_deref()).await?;
    let api = KubeInstanceApi::new(client);

    let config = PrepareConfig {
        defaults: args.defaults.into(),
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let job: JobContext = args.job.into();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if let Err(e) = prepare(&api, job, &config, &cancel).await {
        if e.is_identity_violation() {
            tracing::error!(
                error = %e,
                "instance identity broken; check for a reused job ID or outside deletion"
            );
        }
        return Err(e.into());
    }
    Ok(())
}

/// Cancel the wait on Ctrl-C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                ctrl_c().await;
                tracing::info!("Received shutdown signal, cancelling");
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;

    tracing::info!("Received shutdown signal, cancelling");
    cancel.cancel();
}

/// Resolve on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C").await
}

async fn signal_or_pending(
    signal: impl std::future::Future<Output = std::io::Result<()>>,
    name: &str,
) {
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, signal = name, "cannot listen for signal");
        std::future::pending::<()>().await;
    }
}
