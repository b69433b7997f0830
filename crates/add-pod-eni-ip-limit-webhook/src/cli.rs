use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser};
use eni_webhook_server::constants::{DEFAULT_HTTPS_PORT, DEFAULT_SOCKET_ADDRESS};
use eni_webhook_telemetry::tracing::TelemetryOptions;

use crate::{
    cni::CniKind,
    config_reader::{OnConfigMapMissing, ReaderOptions},
    constants::{
        CNI_CONFIG_MAP_KEY, CNI_CONFIG_MAP_NAME, CNI_CONFIG_MAP_NAMESPACE,
        DEFAULT_REMOTE_WEBHOOK_PORT,
    },
};

/// Where the webhook runs relative to the cluster it serves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentMode {
    /// Inside the served cluster, reached through its Service.
    #[default]
    InCluster,

    /// Outside the served cluster, reached through an explicit URL.
    Remote,
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "add-pod-eni-ip-limit-webhook",
    about = "Adds ENI IP extended resources to Pods based on their CNI",
    long_about = ""
)]
pub struct Cli {
    #[arg(long, env, value_enum, default_value_t)]
    pub deployment_mode: DeploymentMode,

    /// Namespace the webhook runs in. In remote mode this identifies the
    /// served cluster.
    #[arg(long, env, default_value = "kube-system")]
    pub namespace: String,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub cluster: ClusterOptions,

    #[command(flatten)]
    pub cni: CniOptions,

    #[command(flatten)]
    pub webhook: WebhookOptions,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Cluster Options")]
pub struct ClusterOptions {
    /// Path to a kubeconfig. The in-cluster or default configuration is used
    /// if unset.
    #[arg(long, env = "KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Address of the API server, overriding the one in the kubeconfig.
    #[arg(long, env = "KUBERNETES_MASTER", value_name = "URL")]
    pub master: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "CNI Options")]
pub struct CniOptions {
    /// What to do when the CNI agent ConfigMap does not exist.
    #[arg(long, env, value_enum, default_value_t)]
    pub on_config_map_missing: OnConfigMapMissing,

    /// Interval between reads of the CNI agent ConfigMap.
    #[arg(long, env, default_value = "3s", value_parser = humantime::parse_duration)]
    pub cni_poll_interval: Duration,

    /// Upper bound of the delay between reads after errors.
    #[arg(long, env, default_value = "1m", value_parser = humantime::parse_duration)]
    pub cni_max_backoff: Duration,

    /// Give up resolving the default CNI after this many reads.
    #[arg(long, env)]
    pub cni_max_attempts: Option<u32>,

    /// CNI assumed as default once --cni-max-attempts reads failed. Startup
    /// fails instead if unset.
    #[arg(long, env, value_enum, requires = "cni_max_attempts")]
    pub cni_fallback: Option<CniKind>,
}

impl CniOptions {
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            namespace: CNI_CONFIG_MAP_NAMESPACE.to_owned(),
            name: CNI_CONFIG_MAP_NAME.to_owned(),
            key: CNI_CONFIG_MAP_KEY.to_owned(),
            poll_interval: self.cni_poll_interval,
            max_backoff: self.cni_max_backoff,
            max_attempts: self.cni_max_attempts,
            on_config_map_missing: self.on_config_map_missing,
            fallback: self.cni_fallback,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Webhook Options")]
pub struct WebhookOptions {
    /// Socket address the HTTPS server listens on.
    #[arg(long, env, default_value_t = DEFAULT_SOCKET_ADDRESS)]
    pub listen_address: SocketAddr,

    /// Port of the webhook Service the API server connects to.
    #[arg(long, env, default_value_t = DEFAULT_HTTPS_PORT)]
    pub service_port: u16,

    /// Port used in the webhook URL in remote mode.
    #[arg(long, env, default_value_t = DEFAULT_REMOTE_WEBHOOK_PORT)]
    pub remote_webhook_port: u16,

    /// Kubernetes 1.x minor version whose API server gets the `Ignore`
    /// failure policy.
    #[arg(long, env, default_value_t = 10)]
    pub legacy_ignore_minor_version: u32,

    /// Lifetime of the generated CA and server certificates.
    #[arg(long, env, default_value = "175300h", value_parser = humantime::parse_duration)]
    pub certificate_validity: Duration,

    /// Also deny StatefulSets requesting static IPs without the route ENI CNI.
    #[arg(long, env)]
    pub enable_statefulset_check: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["add-pod-eni-ip-limit-webhook"]).unwrap();

        assert_eq!(cli.deployment_mode, DeploymentMode::InCluster);
        assert_eq!(cli.webhook.listen_address, DEFAULT_SOCKET_ADDRESS);
        assert_eq!(cli.webhook.remote_webhook_port, 61679);
        assert_eq!(
            cli.webhook.certificate_validity,
            Duration::from_secs(175300 * 60 * 60)
        );
        assert!(!cli.webhook.enable_statefulset_check);

        let reader = cli.cni.reader_options();
        assert_eq!(reader, ReaderOptions::default());
    }

    #[test]
    fn cni_options() {
        let cli = Cli::try_parse_from([
            "add-pod-eni-ip-limit-webhook",
            "--deployment-mode",
            "remote",
            "--on-config-map-missing",
            "retry",
            "--cni-poll-interval",
            "500ms",
            "--cni-max-attempts",
            "20",
            "--cni-fallback",
            "tke-direct-eni",
        ])
        .unwrap();

        assert_eq!(cli.deployment_mode, DeploymentMode::Remote);
        let reader = cli.cni.reader_options();
        assert_eq!(reader.on_config_map_missing, OnConfigMapMissing::Retry);
        assert_eq!(reader.poll_interval, Duration::from_millis(500));
        assert_eq!(reader.max_attempts, Some(20));
        assert_eq!(reader.fallback, Some(CniKind::DirectEni));
    }

    #[test]
    fn fallback_requires_budget() {
        assert!(
            Cli::try_parse_from(["add-pod-eni-ip-limit-webhook", "--cni-fallback", "tke-route-eni"])
                .is_err()
        );
    }

    #[rstest]
    #[case(CniKind::RouteEni)]
    #[case(CniKind::DirectEni)]
    #[case(CniKind::Bridge)]
    fn fallback_accepts_logged_cni_names(#[case] cni: CniKind) {
        let cli = Cli::try_parse_from([
            "add-pod-eni-ip-limit-webhook".to_owned(),
            "--cni-max-attempts".to_owned(),
            "1".to_owned(),
            "--cni-fallback".to_owned(),
            cni.to_string(),
        ])
        .unwrap();

        assert_eq!(cli.cni.reader_options().fallback, Some(cni));
    }
}
