//! Rolling restart of a single Deployment.
//!
//! A restart is requested the same way `kubectl rollout restart` does it: a
//! strategic merge patch that stamps the pod template with a
//! `kubectl.kubernetes.io/restartedAt` annotation. Only that key changes, so
//! the controller sees a template diff and rolls the pods while the rest of
//! the spec (and every other annotation) stays as it is.
//!
//! The trigger is fire-and-forget: it returns once the API server accepted
//! the patch and does not wait for the rollout to converge.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{ConfigError, UpdateError, UpdateErrorKind};

/// Annotation understood by `kubectl rollout` tooling.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Field manager recorded on the patched object.
pub const FIELD_MANAGER: &str = "rollout-hook";

/// Namespace + name of the Deployment to restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadId {
    namespace: String,
    name: String,
}

impl WorkloadId {
    /// Validate and build an identifier.
    ///
    /// The namespace must be an RFC 1123 label and the name an RFC 1123
    /// subdomain, the same rules the API server applies.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        let name = name.into();

        if !is_dns_label(&namespace) {
            return Err(ConfigError::InvalidWorkload {
                field: "namespace",
                value: namespace,
            });
        }
        if !is_dns_subdomain(&name) {
            return Err(ConfigError::InvalidWorkload {
                field: "name",
                value: name,
            });
        }

        Ok(WorkloadId { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= 253 && s.split('.').all(is_dns_label)
}

/// Source of restart markers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Build the merge patch that stamps the pod template with `at`.
pub fn restart_patch(at: DateTime<Utc>) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: at.to_rfc3339_opts(SecondsFormat::Secs, true)
                    }
                }
            }
        }
    })
}

/// Control-plane capability: apply a partial update to one Deployment.
///
/// Implementations must be safe to call from many requests at once.
#[async_trait]
pub trait WorkloadPatcher: Send + Sync {
    async fn patch_workload(&self, workload: &WorkloadId, patch: &Value) -> Result<(), UpdateError>;
}

/// [`WorkloadPatcher`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePatcher {
    client: Client,
}

impl KubePatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadPatcher for KubePatcher {
    async fn patch_workload(&self, workload: &WorkloadId, patch: &Value) -> Result<(), UpdateError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), workload.namespace());
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        api.patch(workload.name(), &params, &Patch::Strategic(patch))
            .await
            .map(|_| ())
            .map_err(|e| UpdateError::new(classify_kube_error(&e), e.to_string()))
    }
}

/// Map a client error onto the three restart failure kinds.
pub fn classify_kube_error(err: &kube::Error) -> UpdateErrorKind {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => UpdateErrorKind::NotFound,
            401 | 403 => UpdateErrorKind::Forbidden,
            _ => UpdateErrorKind::Transient,
        },
        _ => UpdateErrorKind::Transient,
    }
}

/// Ask the control plane to roll `workload`.
///
/// Reads `clock` once and sends exactly one patch, bounded by `deadline`.
/// There is no retry here: a transient failure is returned to the caller,
/// which decides whether redelivery is worth it. Returns the marker that was
/// applied.
pub async fn trigger_restart(
    patcher: &dyn WorkloadPatcher,
    workload: &WorkloadId,
    clock: &dyn Clock,
    deadline: Duration,
) -> Result<DateTime<Utc>, UpdateError> {
    let at = clock.now();
    let patch = restart_patch(at);

    debug!(
        namespace = %workload.namespace(),
        name = %workload.name(),
        restarted_at = %at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "restart_patch_sending"
    );

    match tokio::time::timeout(deadline, patcher.patch_workload(workload, &patch)).await {
        Ok(Ok(())) => {
            info!(
                namespace = %workload.namespace(),
                name = %workload.name(),
                "restart_patch_accepted"
            );
            Ok(at)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(UpdateError::transient(format!(
            "patch not acknowledged within {}ms",
            deadline.as_millis()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators for tests.

    use std::sync::Mutex;

    use super::*;

    /// Records every patch and answers with a fixed result.
    pub struct RecordingPatcher {
        pub calls: Mutex<Vec<(WorkloadId, Value)>>,
        result: Result<(), UpdateError>,
        delay: Option<Duration>,
    }

    impl RecordingPatcher {
        pub fn accepting() -> Self {
            Self::answering(Ok(()))
        }

        pub fn failing(err: UpdateError) -> Self {
            Self::answering(Err(err))
        }

        pub fn hanging(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::accepting()
            }
        }

        fn answering(result: Result<(), UpdateError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                result,
                delay: None,
            }
        }

        pub fn calls(&self) -> Vec<(WorkloadId, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkloadPatcher for RecordingPatcher {
        async fn patch_workload(
            &self,
            workload: &WorkloadId,
            patch: &Value,
        ) -> Result<(), UpdateError> {
            self.calls
                .lock()
                .unwrap()
                .push((workload.clone(), patch.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    /// Clock that advances by a fixed step on every read.
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: chrono::Duration,
    }

    impl SteppingClock {
        pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }

        pub fn fixed(at: DateTime<Utc>) -> Self {
            Self::new(at, chrono::Duration::zero())
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + self.step;
            now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingPatcher, SteppingClock};
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn frontend() -> WorkloadId {
        WorkloadId::new("htwr", "frontend").unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_patch_only_touches_restart_annotation() {
        let patch = restart_patch(start());

        assert_eq!(
            patch,
            json!({
                "spec": {"template": {"metadata": {"annotations": {
                    "kubectl.kubernetes.io/restartedAt": "2026-10-17T08:30:00Z"
                }}}}
            })
        );
    }

    #[test]
    fn test_patch_timestamp_is_parseable() {
        let patch = restart_patch(start());
        let raw = patch["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION]
            .as_str()
            .unwrap();

        let parsed = DateTime::parse_from_rfc3339(raw).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), start());
    }

    #[test]
    fn test_workload_id_validation() {
        assert!(WorkloadId::new("htwr", "frontend").is_ok());
        assert!(WorkloadId::new("team-a", "api.v2").is_ok());

        assert!(WorkloadId::new("", "frontend").is_err());
        assert!(WorkloadId::new("HTWR", "frontend").is_err());
        assert!(WorkloadId::new("-htwr", "frontend").is_err());
        assert!(WorkloadId::new("htwr", "").is_err());
        assert!(WorkloadId::new("htwr", "front end").is_err());
        assert!(WorkloadId::new("htwr", "api..v2").is_err());
        assert!(WorkloadId::new("a".repeat(64), "frontend").is_err());
    }

    #[tokio::test]
    async fn test_two_triggers_produce_two_distinct_patches() {
        let patcher = RecordingPatcher::accepting();
        let clock = SteppingClock::new(start(), chrono::Duration::seconds(1));
        let deadline = Duration::from_secs(1);

        let first = trigger_restart(&patcher, &frontend(), &clock, deadline).await.unwrap();
        let second = trigger_restart(&patcher, &frontend(), &clock, deadline).await.unwrap();

        assert_ne!(first, second);
        let calls = patcher.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].1, calls[1].1);
        assert!(calls.iter().all(|(id, _)| *id == frontend()));
    }

    #[tokio::test]
    async fn test_same_timestamp_yields_identical_patch() {
        let patcher = RecordingPatcher::accepting();
        let clock = SteppingClock::fixed(start());
        let deadline = Duration::from_secs(1);

        trigger_restart(&patcher, &frontend(), &clock, deadline).await.unwrap();
        trigger_restart(&patcher, &frontend(), &clock, deadline).await.unwrap();

        let calls = patcher.calls();
        assert_eq!(calls[0].1, calls[1].1);
    }

    #[tokio::test]
    async fn test_not_found_is_returned_without_retry() {
        let patcher = RecordingPatcher::failing(UpdateError::not_found("deployment missing"));
        let clock = SteppingClock::fixed(start());

        let err = trigger_restart(&patcher, &frontend(), &clock, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind, UpdateErrorKind::NotFound);
        assert_eq!(patcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_maps_to_transient() {
        let patcher = RecordingPatcher::hanging(Duration::from_secs(30));
        let clock = SteppingClock::fixed(start());

        let err = trigger_restart(&patcher, &frontend(), &clock, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert_eq!(err.kind, UpdateErrorKind::Transient);
        assert_eq!(patcher.calls().len(), 1);
    }

    /// Run `KubePatcher` against an in-memory API server that answers every
    /// request with `status` and `body`. Returns the request lines it saw.
    async fn patch_against_api(
        status: u16,
        body: Value,
    ) -> (Vec<String>, Result<(), UpdateError>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let body = serde_json::to_vec(&body).unwrap();

        let service = tower::service_fn(move |req: http::Request<kube::client::Body>| {
            let recorded = recorded.clone();
            let body = body.clone();
            async move {
                let content_type = req
                    .headers()
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                recorded
                    .lock()
                    .unwrap()
                    .push(format!("{} {} {}", req.method(), req.uri(), content_type));

                let response = http::Response::builder()
                    .status(status)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(kube::client::Body::from(body))
                    .unwrap();
                Ok::<_, std::convert::Infallible>(response)
            }
        });

        let patcher = KubePatcher::new(Client::new(service, "default"));
        let result = patcher
            .patch_workload(&frontend(), &restart_patch(start()))
            .await;
        let seen = seen.lock().unwrap().clone();
        (seen, result)
    }

    fn status_body(code: u16, reason: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{} from api server", reason),
            "reason": reason,
            "code": code,
        })
    }

    #[tokio::test]
    async fn test_kube_patcher_sends_strategic_merge_patch() {
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "frontend", "namespace": "htwr"},
        });

        let (seen, result) = patch_against_api(200, deployment).await;

        assert!(result.is_ok());
        assert_eq!(seen.len(), 1);
        let line = &seen[0];
        assert!(
            line.starts_with("PATCH /apis/apps/v1/namespaces/htwr/deployments/frontend?"),
            "{}",
            line
        );
        assert!(line.contains("fieldManager=rollout-hook"), "{}", line);
        assert!(
            line.ends_with(" application/strategic-merge-patch+json"),
            "{}",
            line
        );
    }

    #[tokio::test]
    async fn test_kube_patcher_maps_api_statuses() {
        let cases = [
            (404, "NotFound", UpdateErrorKind::NotFound),
            (403, "Forbidden", UpdateErrorKind::Forbidden),
            (503, "ServiceUnavailable", UpdateErrorKind::Transient),
        ];

        for (code, reason, kind) in cases {
            let (seen, result) = patch_against_api(code, status_body(code, reason)).await;

            let err = result.unwrap_err();
            assert_eq!(err.kind, kind, "status {}", code);
            // one request, no retry
            assert_eq!(seen.len(), 1, "status {}", code);
            assert!(seen[0].starts_with("PATCH /apis/apps/v1/namespaces/htwr/deployments/frontend"));
        }
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_kube_error() {
        assert_eq!(
            classify_kube_error(&api_error(404, "NotFound")),
            UpdateErrorKind::NotFound
        );
        assert_eq!(
            classify_kube_error(&api_error(403, "Forbidden")),
            UpdateErrorKind::Forbidden
        );
        assert_eq!(
            classify_kube_error(&api_error(401, "Unauthorized")),
            UpdateErrorKind::Forbidden
        );
        assert_eq!(
            classify_kube_error(&api_error(503, "ServiceUnavailable")),
            UpdateErrorKind::Transient
        );
        assert_eq!(
            classify_kube_error(&api_error(500, "InternalError")),
            UpdateErrorKind::Transient
        );
    }
}
