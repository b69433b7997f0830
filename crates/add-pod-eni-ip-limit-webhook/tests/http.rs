use std::sync::Arc;

use add_pod_eni_ip_limit_webhook::{
    cni::CniKind,
    http::{WebhookState, router},
    policy::AdmissionPolicy,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;

const UID: &str = "0df28fbd-5f5f-11e8-bc74-36e6bb280816";

fn app(default_cni: CniKind) -> Router {
    router(Arc::new(WebhookState {
        policy: AdmissionPolicy::default(),
        default_cni,
    }))
}

fn review(group: &str, resource: &str, kind: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": UID,
            "kind": { "group": group, "version": "v1", "kind": kind },
            "resource": { "group": group, "version": "v1", "resource": resource },
            "operation": "CREATE",
            "userInfo": { "username": "system:serviceaccount:kube-system:replicaset-controller" },
            "namespace": "default",
            "object": object,
            "oldObject": null,
            "dryRun": false,
        },
    })
}

fn pod_review(annotations: Value, resources: Value) -> Value {
    review(
        "",
        "pods",
        "Pod",
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "generateName": "nginx-", "namespace": "default", "annotations": annotations },
            "spec": { "containers": [{ "name": "nginx", "image": "nginx", "resources": resources }] },
        }),
    )
}

async fn post(app: Router, path: &str, content_type: &str, body: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::post(path)
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn admit(app: Router, path: &str, review: Value) -> Value {
    let (status, body) = post(app, path, "application/json", review.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let review: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(review["kind"], "AdmissionReview");
    review["response"].clone()
}

fn decoded_patch(response: &Value) -> Value {
    assert_eq!(response["patchType"], "JSONPatch");
    let patch = STANDARD.decode(response["patch"].as_str().unwrap()).unwrap();
    serde_json::from_slice(&patch).unwrap()
}

#[rstest]
#[case("/add-pod-eni-ip-limit")]
#[case("/mutating-pods")]
#[tokio::test]
async fn patches_pod_with_default_cni(#[case] path: &str) {
    let response = admit(
        app(CniKind::RouteEni),
        path,
        pod_review(json!({}), json!({ "requests": { "cpu": "100m" } })),
    )
    .await;

    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], true);
    assert_eq!(
        decoded_patch(&response),
        json!([{
            "op": "replace",
            "path": "/spec/containers/0/resources",
            "value": {
                "requests": { "cpu": "100m", "tke.cloud.tencent.com/eni-ip": "1" },
                "limits": { "tke.cloud.tencent.com/eni-ip": "1" },
            },
        }])
    );
    assert!(response.get("oldObject").is_none());
}

#[tokio::test]
async fn direct_eni_annotation_overrides_default() {
    let response = admit(
        app(CniKind::RouteEni),
        "/add-pod-eni-ip-limit",
        pod_review(
            json!({ "tke.cloud.tencent.com/networks": "tke-direct-eni" }),
            json!({}),
        ),
    )
    .await;

    let patch = decoded_patch(&response);
    assert_eq!(
        patch[0]["value"]["limits"],
        json!({ "tke.cloud.tencent.com/direct-eni": "1" })
    );
}

#[tokio::test]
async fn bridge_pods_are_not_patched() {
    let response = admit(
        app(CniKind::Bridge),
        "/add-pod-eni-ip-limit",
        pod_review(json!({}), json!({})),
    )
    .await;

    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none());
}

#[tokio::test]
async fn denies_statefulset_with_static_ip_on_bridge() {
    let review = review(
        "apps",
        "statefulsets",
        "StatefulSet",
        json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {
                "name": "db",
                "namespace": "default",
                "annotations": { "tke.cloud.tencent.com/enable-static-ip": "true" },
            },
            "spec": {
                "serviceName": "db",
                "selector": { "matchLabels": { "app": "db" } },
                "template": {
                    "metadata": {
                        "labels": { "app": "db" },
                        "annotations": { "tke.cloud.tencent.com/networks": "tke-bridge" },
                    },
                    "spec": { "containers": [{ "name": "db", "image": "postgres" }] },
                },
            },
        }),
    );

    let response = admit(app(CniKind::RouteEni), "/statefulsets", review).await;

    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], false);
    assert!(response.get("patch").is_none());
    let message = response["status"]["message"].as_str().unwrap();
    assert!(message.contains("tke-bridge"), "{message}");
}

#[tokio::test]
async fn pod_route_fails_closed_on_other_resources() {
    let review = review(
        "apps",
        "deployments",
        "Deployment",
        json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "name": "web" } }),
    );

    let response = admit(app(CniKind::RouteEni), "/add-pod-eni-ip-limit", review).await;

    assert_eq!(response["uid"], UID);
    assert_eq!(response["allowed"], false);
    assert!(response.get("patch").is_none());
}

#[rstest]
#[case("text/plain")]
#[case("application/yaml")]
#[tokio::test]
async fn rejects_other_content_types(#[case] content_type: &str) {
    let (status, body) = post(
        app(CniKind::RouteEni),
        "/add-pod-eni-ip-limit",
        content_type,
        pod_review(json!({}), json!({})).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body.is_empty());
}

#[tokio::test]
async fn undecodable_body_gets_error_review() {
    let (status, body) = post(
        app(CniKind::RouteEni),
        "/add-pod-eni-ip-limit",
        "application/json; charset=utf-8",
        "{\"apiVersion\":".to_owned(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let review: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(review["response"]["allowed"], false);
    let message = review["response"]["status"]["message"].as_str().unwrap();
    assert!(message.contains("failed to decode admission review"), "{message}");
}
