use std::{path::PathBuf, sync::Arc};

use add_pod_eni_ip_limit_webhook::{
    cli::{Cli, ClusterOptions, DeploymentMode},
    client::{self, ClusterClient, KubeClusterClient},
    config_reader::{self, ClusterConfigReader},
    constants::{FIELD_MANAGER, WEBHOOK_NAME},
    http::{WebhookState, router},
    identity::{self, FailurePolicy, IdentityReconciler, VersionError, WebhookIdentity},
    policy::AdmissionPolicy,
};
use clap::Parser;
use eni_webhook_certs::IssueError;
use eni_webhook_server::{Options, WebhookError, WebhookServer};
use eni_webhook_telemetry::tracing::{self as telemetry, Tracing};
use kube::config::{Config, InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use snafu::{ResultExt, Snafu};
use tracing::info;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitTracing { source: telemetry::Error },

    #[snafu(display("failed to read kubeconfig {path:?}"))]
    ReadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to load kubeconfig {path:?}"))]
    LoadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to infer the Kubernetes client configuration"))]
    InferKubeConfig { source: InferConfigError },

    #[snafu(display("failed to parse API server address {master:?}"))]
    ParseMasterUrl {
        source: hyper::http::uri::InvalidUri,
        master: String,
    },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display(
        "failed to reach the API server, check --master and --kubeconfig and that the API server is running"
    ))]
    ConnectApiServer { source: client::Error },

    #[snafu(display("failed to determine the webhook failure policy"))]
    DetermineFailurePolicy { source: VersionError },

    #[snafu(display("failed to resolve the cluster default CNI"))]
    ResolveDefaultCni { source: config_reader::Error },

    #[snafu(display("certificate issuing task failed"))]
    JoinIssueTask { source: tokio::task::JoinError },

    #[snafu(display("failed to issue webhook certificates"))]
    IssueCertificates { source: IssueError },

    #[snafu(display("failed to reconcile the webhook Secret and MutatingWebhookConfiguration"))]
    ReconcileIdentity {
        source: identity::Error<client::Error>,
    },

    #[snafu(display("failed to create webhook server"))]
    CreateWebhookServer { source: WebhookError },

    #[snafu(display("failed to run webhook server"))]
    RunWebhookServer { source: WebhookError },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    Tracing::pre_configured(WEBHOOK_NAME, cli.telemetry)
        .init()
        .context(InitTracingSnafu)?;

    info!(
        deployment_mode = %cli.deployment_mode,
        namespace = cli.namespace,
        "starting {WEBHOOK_NAME}"
    );

    let kube_client =
        kube::Client::try_from(kube_config(&cli.cluster).await?).context(CreateKubeClientSnafu)?;
    let client = KubeClusterClient::new(kube_client, FIELD_MANAGER);

    let version = client.server_version().await.context(ConnectApiServerSnafu)?;
    info!(
        version.major = version.major,
        version.minor = version.minor,
        version.git_version = version.git_version,
        version.platform = version.platform,
        "connected to API server"
    );
    let failure_policy =
        FailurePolicy::for_server_version(&version, cli.webhook.legacy_ignore_minor_version)
            .context(DetermineFailurePolicySnafu)?;

    let default_cni = ClusterConfigReader::new(&client, cli.cni.reader_options())
        .resolve_default_cni()
        .await
        .context(ResolveDefaultCniSnafu)?;

    let identity = match cli.deployment_mode {
        DeploymentMode::InCluster => {
            WebhookIdentity::in_cluster(&cli.namespace, cli.webhook.service_port, failure_policy)
        }
        DeploymentMode::Remote => WebhookIdentity::remote(
            &cli.namespace,
            cli.webhook.remote_webhook_port,
            failure_policy,
        ),
    }
    .with_statefulset_entry(cli.webhook.enable_statefulset_check);

    // Key generation is CPU bound.
    let dns_names = identity.dns_names();
    let validity = cli.webhook.certificate_validity;
    let bundle = tokio::task::spawn_blocking(move || eni_webhook_certs::issue(&dns_names, validity))
        .await
        .context(JoinIssueTaskSnafu)?
        .context(IssueCertificatesSnafu)?;

    let secret_check = IdentityReconciler::new(&client, &identity)
        .reconcile(&bundle)
        .await
        .context(ReconcileIdentitySnafu)?;

    let state = Arc::new(WebhookState {
        policy: AdmissionPolicy::default(),
        default_cni,
    });
    let options = Options::builder()
        .socket_addr(cli.webhook.listen_address)
        .build();

    let server =
        WebhookServer::new(router(state), options, &bundle).context(CreateWebhookServerSnafu)?;
    info!(
        listen_address = %cli.webhook.listen_address,
        cni.default = %default_cni,
        failure_policy = %failure_policy,
        secret.check = %secret_check,
        "serving admission requests"
    );
    server.run().await.context(RunWebhookServerSnafu)
}

async fn kube_config(options: &ClusterOptions) -> Result<Config, Error> {
    let mut config = match &options.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).context(ReadKubeconfigSnafu { path })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(LoadKubeconfigSnafu { path })?
        }
        None => Config::infer().await.context(InferKubeConfigSnafu)?,
    };

    if let Some(master) = &options.master {
        config.cluster_url = master.parse().context(ParseMasterUrlSnafu { master })?;
    }

    Ok(config)
}
