//! The admission decision: which Pods get an ENI extended resource and which
//! StatefulSets are denied.
//!
//! Everything in here is free of I/O and shared state, so a single
//! [`AdmissionPolicy`] can serve any number of concurrent requests.
use json_patch::{
    AddOperation, Patch, PatchOperation, ReplaceOperation,
    jsonptr::PointerBuf,
};
use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    cni::CniKind,
    constants::{NETWORKS_ANNOTATION, STATIC_IP_ANNOTATIONS, TKE_ROUTE_ENI},
};

mod resources;
mod subject;

pub use resources::ResourceMapping;
pub use subject::{
    AdmissionSubject, FirstContainer, PodSubject, StatefulSetSubject, SubjectError, SubjectMeta,
};

#[derive(Debug, Snafu)]
pub enum PolicyError {
    #[snafu(display("pod {pod} has no containers to attach {resource:?} to"))]
    NoContainers { pod: String, resource: String },

    #[snafu(display("failed to serialize resource requirements of pod {pod}"))]
    SerializeResources {
        source: serde_json::Error,
        pod: String,
    },
}

/// The outcome of an admission decision.
///
/// A denied verdict never carries a patch.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    allowed: bool,
    patch: Option<Patch>,
    deny_reason: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            patch: None,
            deny_reason: None,
        }
    }

    pub fn allow_with_patch(patch: Patch) -> Self {
        Self {
            allowed: true,
            patch: Some(patch),
            deny_reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            patch: None,
            deny_reason: Some(reason.into()),
        }
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    pub fn deny_reason(&self) -> Option<&str> {
        self.deny_reason.as_deref()
    }

    pub fn into_patch(self) -> Option<Patch> {
        self.patch
    }
}

/// The quantity requested and limited for the extended resource.
const RESOURCE_QUANTITY: &str = "1";

#[derive(Clone, Debug, Default)]
pub struct AdmissionPolicy {
    resources: ResourceMapping,
}

impl AdmissionPolicy {
    pub fn new(resources: ResourceMapping) -> Self {
        Self { resources }
    }

    pub fn decide(
        &self,
        subject: &AdmissionSubject,
        default_cni: CniKind,
    ) -> Result<Verdict, PolicyError> {
        match subject {
            AdmissionSubject::Pod(pod) => self.decide_pod(pod, default_cni),
            AdmissionSubject::StatefulSet(statefulset) => Ok(decide_statefulset(statefulset)),
        }
    }

    fn decide_pod(&self, pod: &PodSubject, default_cni: CniKind) -> Result<Verdict, PolicyError> {
        let display_name = pod.meta.display_name();

        if pod.host_network {
            info!(pod = display_name, "pod uses the host network, nothing to patch");
            return Ok(Verdict::allow());
        }

        let effective_cni = match pod.meta.annotations.get(NETWORKS_ANNOTATION) {
            Some(networks) => CniKind::from_networks_annotation(networks),
            None => default_cni,
        };

        let Some(resource) = self.resources.resource_for(effective_cni) else {
            info!(
                pod = display_name,
                cni.effective = %effective_cni,
                "no extended resource mapped for CNI, nothing to patch"
            );
            return Ok(Verdict::allow());
        };

        let Some(container) = &pod.first_container else {
            return NoContainersSnafu {
                pod: display_name,
                resource,
            }
            .fail();
        };

        let patch = resource_patch(container, resource).context(SerializeResourcesSnafu {
            pod: &display_name,
        })?;
        info!(
            pod = display_name,
            cni.effective = %effective_cni,
            resource,
            "adding extended resource to first container"
        );

        Ok(Verdict::allow_with_patch(patch))
    }
}

/// Denies StatefulSets that request static IPs while their Pod template does
/// not select the route ENI CNI. The cluster default CNI plays no role here.
fn decide_statefulset(statefulset: &StatefulSetSubject) -> Verdict {
    let display_name = statefulset.meta.display_name();

    let requests_static_ip = [&statefulset.meta.annotations, &statefulset.template_annotations]
        .into_iter()
        .flat_map(|annotations| STATIC_IP_ANNOTATIONS.iter().filter_map(|key| annotations.get(*key)))
        .any(|value| value.eq_ignore_ascii_case("true"));

    if !requests_static_ip {
        debug!(statefulset = display_name, "statefulset does not request static IPs");
        return Verdict::allow();
    }

    match statefulset.template_annotations.get(NETWORKS_ANNOTATION) {
        Some(networks) if networks.contains(TKE_ROUTE_ENI) => {
            debug!(statefulset = display_name, "static IPs requested with route ENI");
            Verdict::allow()
        }
        networks => {
            let found = networks.map_or_else(
                || "no annotation".to_owned(),
                |networks| format!("{networks:?}"),
            );
            info!(statefulset = display_name, networks = found, "denying static IPs without route ENI");
            Verdict::deny(format!(
                "statefulset {display_name} requests static IPs, which require the {TKE_ROUTE_ENI} CNI, \
                 but the pod template annotation {NETWORKS_ANNOTATION} has {found}"
            ))
        }
    }
}

/// Builds the patch setting request and limit of `resource` on the first
/// container, keeping everything else in its resource requirements.
fn resource_patch(container: &FirstContainer, resource: &str) -> Result<Patch, serde_json::Error> {
    let quantity = Quantity(RESOURCE_QUANTITY.to_owned());
    let mut requirements: ResourceRequirements = container.resources.clone().unwrap_or_default();
    requirements
        .requests
        .get_or_insert_with(Default::default)
        .insert(resource.to_owned(), quantity.clone());
    requirements
        .limits
        .get_or_insert_with(Default::default)
        .insert(resource.to_owned(), quantity);

    let path = PointerBuf::from_tokens(["spec", "containers", "0", "resources"]);
    let value = serde_json::to_value(&requirements)?;

    // Replacing a missing member is an error in JSON Patch.
    let operation = if container.resources.is_some() {
        PatchOperation::Replace(ReplaceOperation { path, value })
    } else {
        PatchOperation::Add(AddOperation { path, value })
    };

    Ok(Patch(vec![operation]))
}
