//! The cluster objects that make the webhook reachable and trusted: the TLS
//! Secret and the MutatingWebhookConfiguration.
use std::{collections::BTreeMap, num::ParseIntError};

use eni_webhook_certs::CertBundle;
use k8s_openapi::{
    ByteString,
    api::{
        admissionregistration::v1::{
            MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
            WebhookClientConfig,
        },
        core::v1::Secret,
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement},
        version::Info,
    },
};
use kube::{ResourceExt, api::ObjectMeta};
use snafu::{ResultExt, Snafu};
use tracing::{info, instrument, warn};

use crate::{
    client::{ClusterClient, ClusterObject},
    constants::{
        OPT_OUT_NAMESPACE_LABEL, POD_PATH, POD_WEBHOOK_ENTRY_NAME, REMOTE_SECRET_NAMESPACE,
        SECRET_NAME, STATEFULSET_PATH, STATEFULSET_WEBHOOK_ENTRY_NAME, TLS_CERT_KEY, TLS_KEY_KEY,
        WEBHOOK_NAME,
    },
};

#[derive(Debug, Snafu)]
pub enum VersionError {
    #[snafu(display("failed to parse API server major version {major:?}"))]
    ParseMajorVersion {
        source: ParseIntError,
        major: String,
    },

    #[snafu(display("failed to parse API server minor version {minor:?}"))]
    ParseMinorVersion {
        source: ParseIntError,
        minor: String,
    },
}

/// How the API server treats a failed call to the webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum FailurePolicy {
    Ignore,
    Fail,
}

impl FailurePolicy {
    /// Returns [`FailurePolicy::Ignore`] for Kubernetes `1.<legacy_minor>`
    /// and [`FailurePolicy::Fail`] for every other version.
    ///
    /// Non-digit characters are dropped from the minor version first, as
    /// some distributions report versions like `10+`.
    pub fn for_server_version(version: &Info, legacy_minor: u32) -> Result<Self, VersionError> {
        let major: u32 = version.major.trim().parse().context(ParseMajorVersionSnafu {
            major: &version.major,
        })?;

        let digits: String = version.minor.chars().filter(char::is_ascii_digit).collect();
        let minor: u32 = digits.parse().context(ParseMinorVersionSnafu {
            minor: &version.minor,
        })?;

        Ok(if major == 1 && minor == legacy_minor {
            Self::Ignore
        } else {
            Self::Fail
        })
    }
}

/// Where the API server sends admission requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientTarget {
    /// Through the Service in front of the webhook Pods.
    InCluster {
        service: String,
        namespace: String,
        port: u16,
    },

    /// To an explicit URL, for webhooks running outside the cluster they
    /// serve. The host is derived from the service name and the namespace,
    /// which identifies the tenant cluster.
    Remote {
        service: String,
        namespace: String,
        port: u16,
    },
}

impl ClientTarget {
    fn client_config(&self, path: &str, ca_bundle: ByteString) -> WebhookClientConfig {
        match self {
            Self::InCluster {
                service,
                namespace,
                port,
            } => WebhookClientConfig {
                service: Some(ServiceReference {
                    name: service.clone(),
                    namespace: namespace.clone(),
                    path: Some(path.to_owned()),
                    port: Some((*port).into()),
                }),
                ca_bundle: Some(ca_bundle),
                url: None,
            },
            Self::Remote {
                service,
                namespace,
                port,
            } => WebhookClientConfig {
                service: None,
                ca_bundle: Some(ca_bundle),
                url: Some(format!(
                    "https://{service}.{namespace}.svc.cluster.local:{port}{path}"
                )),
            },
        }
    }

    fn service_and_namespace(&self) -> (&str, &str) {
        match self {
            Self::InCluster {
                service, namespace, ..
            }
            | Self::Remote {
                service, namespace, ..
            } => (service, namespace),
        }
    }
}

/// Describes the desired Secret and MutatingWebhookConfiguration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookIdentity {
    pub configuration_name: String,
    pub secret_name: String,
    pub secret_namespace: String,
    pub target: ClientTarget,
    pub pod_path: String,

    /// Path of the StatefulSet entry. No entry is registered when `None`.
    pub statefulset_path: Option<String>,

    /// Namespaces carrying this label are excluded from admission.
    pub opt_out_label: String,
    pub failure_policy: FailurePolicy,
}

impl WebhookIdentity {
    /// Identity of a webhook served through the Service `namespace/<webhook>`.
    pub fn in_cluster(namespace: &str, service_port: u16, failure_policy: FailurePolicy) -> Self {
        Self::new(
            namespace,
            ClientTarget::InCluster {
                service: WEBHOOK_NAME.to_owned(),
                namespace: namespace.to_owned(),
                port: service_port,
            },
            failure_policy,
        )
    }

    /// Identity of a webhook running outside the cluster it serves. The
    /// Secret is placed in `kube-system` of the served cluster.
    pub fn remote(namespace: &str, port: u16, failure_policy: FailurePolicy) -> Self {
        Self {
            secret_namespace: REMOTE_SECRET_NAMESPACE.to_owned(),
            ..Self::new(
                namespace,
                ClientTarget::Remote {
                    service: WEBHOOK_NAME.to_owned(),
                    namespace: namespace.to_owned(),
                    port,
                },
                failure_policy,
            )
        }
    }

    fn new(secret_namespace: &str, target: ClientTarget, failure_policy: FailurePolicy) -> Self {
        Self {
            configuration_name: WEBHOOK_NAME.to_owned(),
            secret_name: SECRET_NAME.to_owned(),
            secret_namespace: secret_namespace.to_owned(),
            target,
            pod_path: POD_PATH.to_owned(),
            statefulset_path: None,
            opt_out_label: OPT_OUT_NAMESPACE_LABEL.to_owned(),
            failure_policy,
        }
    }

    /// Registers the StatefulSet entry in addition to the Pod entry.
    pub fn with_statefulset_entry(mut self, enabled: bool) -> Self {
        self.statefulset_path = enabled.then(|| STATEFULSET_PATH.to_owned());
        self
    }

    /// DNS names the server certificate has to cover.
    pub fn dns_names(&self) -> Vec<String> {
        let (service, namespace) = self.target.service_and_namespace();
        eni_webhook_certs::service_dns_names(service, namespace)
    }

    pub fn desired_secret(&self, bundle: &CertBundle) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(self.secret_namespace.clone()),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_owned()),
            data: Some(BTreeMap::from([
                (
                    TLS_CERT_KEY.to_owned(),
                    ByteString(bundle.server_cert.as_bytes().to_vec()),
                ),
                (
                    TLS_KEY_KEY.to_owned(),
                    ByteString(bundle.server_key.as_bytes().to_vec()),
                ),
            ])),
            ..Secret::default()
        }
    }

    pub fn desired_webhook_configuration(&self, bundle: &CertBundle) -> MutatingWebhookConfiguration {
        let ca_bundle = ByteString(bundle.ca_cert.as_bytes().to_vec());

        let mut webhooks = vec![self.webhook(
            POD_WEBHOOK_ENTRY_NAME,
            &self.pod_path,
            ca_bundle.clone(),
            RuleWithOperations {
                api_groups: Some(vec!["".to_owned()]),
                api_versions: Some(vec!["v1".to_owned()]),
                operations: Some(vec!["CREATE".to_owned()]),
                resources: Some(vec!["pods".to_owned()]),
                scope: None,
            },
        )];

        if let Some(statefulset_path) = &self.statefulset_path {
            webhooks.push(self.webhook(
                STATEFULSET_WEBHOOK_ENTRY_NAME,
                statefulset_path,
                ca_bundle,
                RuleWithOperations {
                    api_groups: Some(vec!["apps".to_owned()]),
                    api_versions: Some(vec!["v1".to_owned()]),
                    operations: Some(vec!["CREATE".to_owned(), "UPDATE".to_owned()]),
                    resources: Some(vec!["statefulsets".to_owned()]),
                    scope: None,
                },
            ));
        }

        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(self.configuration_name.clone()),
                ..ObjectMeta::default()
            },
            webhooks: Some(webhooks),
        }
    }

    fn webhook(
        &self,
        name: &str,
        path: &str,
        ca_bundle: ByteString,
        rule: RuleWithOperations,
    ) -> MutatingWebhook {
        MutatingWebhook {
            name: name.to_owned(),
            // Requests are decoded as admission.k8s.io/v1 only.
            admission_review_versions: vec!["v1".to_owned()],
            client_config: self.target.client_config(path, ca_bundle),
            failure_policy: Some(self.failure_policy.to_string()),
            namespace_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: self.opt_out_label.clone(),
                    operator: "DoesNotExist".to_owned(),
                    values: None,
                }]),
                match_labels: None,
            }),
            rules: Some(vec![rule]),
            side_effects: "None".to_owned(),
            ..MutatingWebhook::default()
        }
    }
}

#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to read {kind} {name:?}"))]
    ReadObject { source: E, kind: String, name: String },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateObject { source: E, kind: String, name: String },

    #[snafu(display("failed to update {kind} {name:?}"))]
    UpdateObject { source: E, kind: String, name: String },
}

/// Upserts the Secret and the MutatingWebhookConfiguration of a
/// [`WebhookIdentity`].
///
/// Existing objects are replaced with the resourceVersion they were read
/// with, so a concurrent modification surfaces as a conflict from the
/// cluster instead of being overwritten.
pub struct IdentityReconciler<'a, C> {
    client: &'a C,
    identity: &'a WebhookIdentity,
}

impl<'a, C: ClusterClient> IdentityReconciler<'a, C> {
    pub fn new(client: &'a C, identity: &'a WebhookIdentity) -> Self {
        Self { client, identity }
    }

    #[instrument(
        skip(self, bundle),
        fields(
            k8s.secret.namespace = %self.identity.secret_namespace,
            k8s.secret.name = %self.identity.secret_name,
            k8s.mutatingwebhookconfiguration.name = %self.identity.configuration_name,
        )
    )]
    pub async fn reconcile(&self, bundle: &CertBundle) -> Result<SecretCheck, Error<C::Error>> {
        self.upsert(self.identity.desired_secret(bundle)).await?;
        self.upsert(self.identity.desired_webhook_configuration(bundle))
            .await?;
        Ok(self.verify_secret(bundle).await)
    }

    async fn upsert<K: ClusterObject>(&self, mut desired: K) -> Result<K, Error<C::Error>> {
        let kind = K::kind(&()).into_owned();
        let name = desired.name_any();
        let namespace = desired.namespace();

        let current = self
            .client
            .get::<K>(namespace.as_deref(), &name)
            .await
            .context(ReadObjectSnafu {
                kind: &kind,
                name: &name,
            })?;

        match current {
            None => {
                info!(kind, name, "creating object");
                self.client
                    .create(&desired)
                    .await
                    .context(CreateObjectSnafu { kind, name })
            }
            Some(current) => {
                info!(kind, name, "updating existing object");
                desired.meta_mut().resource_version = current.resource_version();
                self.client
                    .replace(&desired)
                    .await
                    .context(UpdateObjectSnafu { kind, name })
            }
        }
    }

    /// Reads the Secret back and warns if it does not hold the certificate
    /// that is going to be served. The in-memory bundle is used either way.
    async fn verify_secret(&self, bundle: &CertBundle) -> SecretCheck {
        let secret = match self
            .client
            .get::<Secret>(Some(&self.identity.secret_namespace), &self.identity.secret_name)
            .await
        {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                warn!("secret was deleted after reconciliation, serving the generated certificate");
                return SecretCheck::Missing;
            }
            Err(error) => {
                warn!(%error, "failed to read back secret");
                return SecretCheck::Unreadable;
            }
        };

        let data = secret.data.unwrap_or_default();
        let matches = |key: &str, expected: &str| {
            data.get(key)
                .is_some_and(|value| value.0 == expected.as_bytes())
        };

        if matches(TLS_CERT_KEY, &bundle.server_cert) && matches(TLS_KEY_KEY, bundle.server_key.as_str()) {
            info!("secret holds the generated certificate");
            SecretCheck::Matches
        } else {
            warn!("secret does not hold the generated certificate, serving the generated one");
            SecretCheck::Mismatch
        }
    }
}

/// The state of the Secret as read back after reconciliation. None of these
/// stop the webhook, the generated bundle is served regardless.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SecretCheck {
    Matches,
    Mismatch,
    Missing,
    Unreadable,
}
