//! Admission routes: decoding `AdmissionReview`s, asking the
//! [`AdmissionPolicy`] and encoding the answer.
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    cni::CniKind,
    constants::{POD_PATH, POD_PATH_ALIAS, STATEFULSET_PATH},
    policy::{AdmissionPolicy, AdmissionSubject, SubjectError},
};

/// Shared by all requests. Read-only once the server is running.
#[derive(Debug)]
pub struct WebhookState {
    pub policy: AdmissionPolicy,
    pub default_cni: CniKind,
}

type ExtractSubject = fn(&AdmissionRequest<DynamicObject>) -> Result<AdmissionSubject, SubjectError>;

/// Returns the admission routes. Both Pod paths are served so that
/// configurations registered by older deployments keep working.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(POD_PATH, post(mutate_pod))
        .route(POD_PATH_ALIAS, post(mutate_pod))
        .route(STATEFULSET_PATH, post(check_statefulset))
        .with_state(state)
}

async fn mutate_pod(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    admit(&state, &headers, &body, AdmissionSubject::pod_from_request)
}

async fn check_statefulset(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    admit(
        &state,
        &headers,
        &body,
        AdmissionSubject::statefulset_from_request,
    )
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

#[instrument(skip_all)]
fn admit(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &[u8],
    extract: ExtractSubject,
) -> Response {
    if !is_json(headers) {
        warn!(content_type = ?headers.get(CONTENT_TYPE), "rejecting request with unsupported content type");
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(error) => {
            warn!(%error, "failed to decode admission review");
            return invalid(format!("failed to decode admission review: {error}"));
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "admission review carries no request");
            return invalid(format!("failed to convert to request: {error}"));
        }
    };

    let response = respond(state, &request, extract);
    info!(
        uid = request.uid,
        operation = ?request.operation,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        allowed = response.allowed,
        patched = response.patch.is_some(),
        "answered admission request"
    );

    Json(response.into_review()).into_response()
}

fn respond(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
    extract: ExtractSubject,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let subject = match extract(request) {
        Ok(subject) => subject,
        Err(error) => {
            warn!(%error, "refusing admission request");
            return response.deny(error);
        }
    };
    debug!(subject = subject.meta().display_name(), "deciding on admission request");

    let verdict = match state.policy.decide(&subject, state.default_cni) {
        Ok(verdict) => verdict,
        Err(error) => {
            warn!(%error, "failed to decide on admission request");
            return response.deny(error);
        }
    };

    if !verdict.allowed() {
        return response.deny(verdict.deny_reason().unwrap_or("denied by admission policy"));
    }

    match verdict.into_patch() {
        Some(patch) => response.with_patch(patch).unwrap_or_else(|error| {
            warn!(%error, "failed to serialize patch");
            AdmissionResponse::from(request).deny(error)
        }),
        None => response,
    }
}

fn invalid(message: String) -> Response {
    Json(AdmissionResponse::invalid(message).into_review()).into_response()
}
