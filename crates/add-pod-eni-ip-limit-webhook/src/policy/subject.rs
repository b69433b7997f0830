//! Extraction of the fields the policy looks at from an admission request.
use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Pod, ResourceRequirements},
};
use kube::{
    api::{DynamicObject, ObjectMeta},
    core::{GroupVersionResource, admission::AdmissionRequest},
};
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum SubjectError {
    #[snafu(display("unexpected resource {actual:?}, expected {expected:?}"))]
    UnexpectedResource { actual: String, expected: String },

    #[snafu(display("admission request for {kind} carries no object"))]
    MissingObject { kind: &'static str },

    #[snafu(display("failed to parse admission request object as {kind}"))]
    ParseObject {
        source: serde_json::Error,
        kind: &'static str,
    },
}

/// Identity of the admitted object, used for decisions and log lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectMeta {
    pub namespace: Option<String>,
    pub name: Option<String>,

    /// Kind and name of the controlling owner, or of the first owner if none
    /// is marked as controller.
    pub owner: Option<(String, String)>,

    pub annotations: BTreeMap<String, String>,
}

impl SubjectMeta {
    fn new(metadata: ObjectMeta, request: &AdmissionRequest<DynamicObject>) -> Self {
        let owner = metadata.owner_references.as_ref().and_then(|owners| {
            owners
                .iter()
                .find(|owner| owner.controller == Some(true))
                .or_else(|| owners.first())
                .map(|owner| (owner.kind.clone(), owner.name.clone()))
        });

        // Pods created by controllers have no name yet, only generateName.
        let name = metadata
            .name
            .or_else(|| (!request.name.is_empty()).then(|| request.name.clone()))
            .or(metadata.generate_name);

        Self {
            namespace: metadata.namespace.or_else(|| request.namespace.clone()),
            name,
            owner,
            annotations: metadata.annotations.unwrap_or_default(),
        }
    }

    /// Describes the subject by its owner if it has one.
    pub fn display_name(&self) -> String {
        let namespace = self.namespace.as_deref().unwrap_or_default();
        match &self.owner {
            Some((kind, name)) => format!("{namespace}/{name} ({kind})"),
            None => format!("{namespace}/{}", self.name.as_deref().unwrap_or_default()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FirstContainer {
    pub resources: Option<ResourceRequirements>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PodSubject {
    pub meta: SubjectMeta,
    pub host_network: bool,

    /// `None` when the Pod spec lists no containers.
    pub first_container: Option<FirstContainer>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatefulSetSubject {
    pub meta: SubjectMeta,
    pub template_annotations: BTreeMap<String, String>,
}

/// An object the admission policy can decide on.
#[derive(Clone, Debug, PartialEq)]
pub enum AdmissionSubject {
    Pod(PodSubject),
    StatefulSet(StatefulSetSubject),
}

impl AdmissionSubject {
    pub fn meta(&self) -> &SubjectMeta {
        match self {
            Self::Pod(pod) => &pod.meta,
            Self::StatefulSet(statefulset) => &statefulset.meta,
        }
    }

    /// Builds a Pod subject from a request for the core `v1` `pods` resource.
    pub fn pod_from_request(request: &AdmissionRequest<DynamicObject>) -> Result<Self, SubjectError> {
        let pod: Pod = parse_object(request, &POD)?;
        let spec = pod.spec.unwrap_or_default();

        Ok(Self::Pod(PodSubject {
            meta: SubjectMeta::new(pod.metadata, request),
            host_network: spec.host_network.unwrap_or_default(),
            first_container: spec.containers.into_iter().next().map(|container| FirstContainer {
                resources: container.resources,
            }),
        }))
    }

    /// Builds a StatefulSet subject from a request for the `apps/v1`
    /// `statefulsets` resource.
    pub fn statefulset_from_request(
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Self, SubjectError> {
        let statefulset: StatefulSet = parse_object(request, &STATEFULSET)?;
        let template_annotations = statefulset
            .spec
            .and_then(|spec| spec.template.metadata)
            .and_then(|metadata| metadata.annotations)
            .unwrap_or_default();

        Ok(Self::StatefulSet(StatefulSetSubject {
            meta: SubjectMeta::new(statefulset.metadata, request),
            template_annotations,
        }))
    }
}

/// The resource a route accepts, with the kind used in error messages.
struct ExpectedResource {
    group: &'static str,
    version: &'static str,
    resource: &'static str,
    kind: &'static str,
}

const POD: ExpectedResource = ExpectedResource {
    group: "",
    version: "v1",
    resource: "pods",
    kind: "Pod",
};

const STATEFULSET: ExpectedResource = ExpectedResource {
    group: "apps",
    version: "v1",
    resource: "statefulsets",
    kind: "StatefulSet",
};

fn format_gvr(group: &str, version: &str, resource: &str) -> String {
    format!("{group}/{version}/{resource}")
}

fn parse_object<K: DeserializeOwned>(
    request: &AdmissionRequest<DynamicObject>,
    expected: &ExpectedResource,
) -> Result<K, SubjectError> {
    let GroupVersionResource {
        group,
        version,
        resource,
        ..
    } = &request.resource;
    if (group.as_str(), version.as_str(), resource.as_str())
        != (expected.group, expected.version, expected.resource)
    {
        return UnexpectedResourceSnafu {
            actual: format_gvr(group, version, resource),
            expected: format_gvr(expected.group, expected.version, expected.resource),
        }
        .fail();
    }

    let kind = expected.kind;
    let object = request.object.as_ref().context(MissingObjectSnafu { kind })?;
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .context(ParseObjectSnafu { kind })
}

#[cfg(test)]
mod tests {
    use kube::core::admission::AdmissionReview;
    use serde_json::{Value, json};

    use super::*;

    fn request(
        (group, resource, kind): (&str, &str, &str),
        mut object: Value,
    ) -> AdmissionRequest<DynamicObject> {
        let api_version = if group.is_empty() {
            "v1".to_owned()
        } else {
            format!("{group}/v1")
        };
        object["apiVersion"] = json!(api_version);
        object["kind"] = json!(kind);

        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": { "group": group, "version": "v1", "kind": kind },
                "resource": { "group": group, "version": "v1", "resource": resource },
                "operation": "CREATE",
                "userInfo": {},
                "namespace": "team-a",
                "object": object,
            },
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    const PODS: (&str, &str, &str) = ("", "pods", "Pod");
    const STATEFULSETS: (&str, &str, &str) = ("apps", "statefulsets", "StatefulSet");

    #[test]
    fn extracts_pod_fields() {
        let request = request(
            PODS,
            json!({
                "metadata": {
                    "generateName": "web-7d9c-",
                    "annotations": { "tke.cloud.tencent.com/networks": "tke-route-eni" },
                    "ownerReferences": [
                        { "apiVersion": "v1", "kind": "ConfigMap", "name": "unrelated", "uid": "1" },
                        { "apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web-7d9c", "uid": "2", "controller": true },
                    ],
                },
                "spec": {
                    "hostNetwork": true,
                    "containers": [
                        { "name": "app", "resources": { "requests": { "cpu": "100m" } } },
                        { "name": "sidecar" },
                    ],
                },
            }),
        );

        let AdmissionSubject::Pod(pod) = AdmissionSubject::pod_from_request(&request).unwrap() else {
            panic!("expected a Pod subject");
        };
        assert!(pod.host_network);
        assert_eq!(pod.meta.namespace.as_deref(), Some("team-a"));
        assert_eq!(pod.meta.name.as_deref(), Some("web-7d9c-"));
        assert_eq!(
            pod.meta.owner,
            Some(("ReplicaSet".to_owned(), "web-7d9c".to_owned()))
        );
        assert_eq!(pod.meta.display_name(), "team-a/web-7d9c (ReplicaSet)");
        assert_eq!(
            pod.meta.annotations.get("tke.cloud.tencent.com/networks").map(String::as_str),
            Some("tke-route-eni")
        );

        let requests = pod
            .first_container
            .and_then(|container| container.resources)
            .and_then(|resources| resources.requests)
            .unwrap();
        assert_eq!(requests["cpu"].0, "100m");
    }

    #[test]
    fn pod_without_containers_has_no_first_container() {
        let request = request(PODS, json!({ "metadata": { "name": "empty" }, "spec": { "containers": [] } }));

        let AdmissionSubject::Pod(pod) = AdmissionSubject::pod_from_request(&request).unwrap() else {
            panic!("expected a Pod subject");
        };
        assert!(!pod.host_network);
        assert_eq!(pod.first_container, None);
        assert_eq!(pod.meta.display_name(), "team-a/empty");
    }

    #[test]
    fn extracts_statefulset_template_annotations() {
        let request = request(
            STATEFULSETS,
            json!({
                "metadata": {
                    "name": "db",
                    "annotations": { "tke.cloud.tencent.com/enable-static-ip": "true" },
                },
                "spec": {
                    "selector": {},
                    "template": {
                        "metadata": { "annotations": { "tke.cloud.tencent.com/networks": "tke-bridge" } },
                    },
                },
            }),
        );

        let AdmissionSubject::StatefulSet(statefulset) =
            AdmissionSubject::statefulset_from_request(&request).unwrap()
        else {
            panic!("expected a StatefulSet subject");
        };
        assert_eq!(statefulset.meta.name.as_deref(), Some("db"));
        assert_eq!(
            statefulset.template_annotations.get("tke.cloud.tencent.com/networks").map(String::as_str),
            Some("tke-bridge")
        );
    }

    #[test]
    fn rejects_unexpected_resource() {
        let request = request(STATEFULSETS, json!({ "metadata": { "name": "db" } }));

        let err = AdmissionSubject::pod_from_request(&request).unwrap_err();
        assert!(matches!(
            &err,
            SubjectError::UnexpectedResource { actual, expected }
                if actual == "apps/v1/statefulsets" && expected == "/v1/pods"
        ));
    }
}
