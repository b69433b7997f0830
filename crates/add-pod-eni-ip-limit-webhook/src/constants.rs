//! Names of the cluster objects, annotations and extended resources the
//! webhook reads or writes.

/// Namespace holding the CNI agent ConfigMap.
pub const CNI_CONFIG_MAP_NAMESPACE: &str = "kube-system";
pub const CNI_CONFIG_MAP_NAME: &str = "tke-cni-agent-conf";
/// Key of the multus configuration inside [`CNI_CONFIG_MAP_NAME`].
pub const CNI_CONFIG_MAP_KEY: &str = "00-multus.conf";

pub const TKE_ROUTE_ENI: &str = "tke-route-eni";
pub const TKE_DIRECT_ENI: &str = "tke-direct-eni";
pub const TKE_BRIDGE: &str = "tke-bridge";

/// Pod (and Pod template) annotation selecting the CNI delegates.
pub const NETWORKS_ANNOTATION: &str = "tke.cloud.tencent.com/networks";

/// Annotations by which a StatefulSet requests static Pod IPs.
pub const STATIC_IP_ANNOTATIONS: [&str; 2] = [
    "tke.cloud.tencent.com/enable-static-ip",
    "tke.cloud.tencent.com/vpc-ip-claim-static",
];

pub const ENI_IP_RESOURCE: &str = "tke.cloud.tencent.com/eni-ip";
pub const DIRECT_ENI_RESOURCE: &str = "tke.cloud.tencent.com/direct-eni";

/// Name of the MutatingWebhookConfiguration and of the Service in front of
/// the webhook.
pub const WEBHOOK_NAME: &str = "add-pod-eni-ip-limit-webhook";
pub const POD_WEBHOOK_ENTRY_NAME: &str = "add-pod-eni-ip-limit-webhook.tke.cloud.tencent.com";
pub const STATEFULSET_WEBHOOK_ENTRY_NAME: &str = "statefulset-static-ip.tke.cloud.tencent.com";
pub const SECRET_NAME: &str = "eni-ip-webhook-certs";

/// Namespaces carrying this label (with any value) are never mutated.
pub const OPT_OUT_NAMESPACE_LABEL: &str = "not-add-pod-eni-ip-limit";

pub const POD_PATH: &str = "/add-pod-eni-ip-limit";
pub const POD_PATH_ALIAS: &str = "/mutating-pods";
pub const STATEFULSET_PATH: &str = "/statefulsets";

/// Namespace used for the Secret when the webhook runs outside the cluster it
/// serves.
pub const REMOTE_SECRET_NAMESPACE: &str = "kube-system";
pub const DEFAULT_REMOTE_WEBHOOK_PORT: u16 = 61679;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

pub const FIELD_MANAGER: &str = WEBHOOK_NAME;
