use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
};
use base64::{URL_SAFE, URL_SAFE_NO_PAD, decode_config};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dashboard::{DashboardView, FetchOutcome},
    error::AppError,
    models::{
        ConfigResponse, Platform, PushSubscription, StoredSubscription, SubscribeResponse,
        TriggerTime,
    },
    notifications::Permission,
    state::AppState,
    worker::{Lifecycle, WorkerEvent},
};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub backend: Option<String>,
    pub github_token_configured: bool,
    pub worker: Option<Lifecycle>,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let health = state.controller.backend_health().await;
    Json(StatusResponse {
        github_token_configured: health.as_ref().is_some_and(|h| h.github_token_configured),
        backend: health.map(|h| h.status),
        worker: state.controller.worker().map(|worker| worker.lifecycle()),
    })
}

pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        public_key: state.cfg.vapid_public_key.clone(),
    })
}

pub async fn view(State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.controller.view().await)
}

pub async fn refresh(State(state): State<AppState>) -> Result<Json<DashboardView>, AppError> {
    match state.controller.fetch_dashboard().await {
        FetchOutcome::Completed => Ok(Json(state.controller.view().await)),
        FetchOutcome::Skipped => Err(AppError::new(
            StatusCode::CONFLICT,
            "refresh already in progress",
        )),
        FetchOutcome::Discarded => Err(AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "dashboard is shutting down",
        )),
    }
}

#[derive(Deserialize)]
pub struct CreateTriggerRequest {
    pub platform: String,
    pub trigger_time: String,
}

pub async fn create_trigger(
    State(state): State<AppState>,
    Json(request): Json<CreateTriggerRequest>,
) -> Result<(StatusCode, Json<DashboardView>), AppError> {
    let platform = request
        .platform
        .parse::<Platform>()
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    let time = request
        .trigger_time
        .parse::<TriggerTime>()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    if !state.controller.create_trigger(platform, time).await {
        return Err(AppError::new(
            StatusCode::BAD_GATEWAY,
            "failed to create reminder",
        ));
    }
    Ok((StatusCode::CREATED, Json(state.controller.view().await)))
}

pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DashboardView>, AppError> {
    if !state.controller.delete_trigger(&id).await {
        return Err(AppError::new(
            StatusCode::BAD_GATEWAY,
            "failed to delete reminder",
        ));
    }
    Ok(Json(state.controller.view().await))
}

#[derive(Deserialize)]
pub struct PermissionReport {
    pub permission: String,
}

#[derive(Serialize)]
pub struct PermissionResponse {
    pub permission: Permission,
    pub notifications_enabled: bool,
}

/// The browser ran its permission prompt; record the answer and let the
/// dashboard pick it up.
pub async fn report_permission(
    State(state): State<AppState>,
    Json(report): Json<PermissionReport>,
) -> Result<Json<PermissionResponse>, AppError> {
    let reported = report
        .permission
        .parse::<Permission>()
        .map_err(AppError::bad_request)?;
    state.host.record_decision(reported).await;
    let permission = state.controller.request_notification_permission().await;
    Ok(Json(PermissionResponse {
        permission,
        notifications_enabled: permission.is_granted(),
    }))
}

pub async fn test_notification(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    if state.controller.test_notification().await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::new(
            StatusCode::CONFLICT,
            "notifications are not enabled",
        ))
    }
}

pub async fn dismiss_notice(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    state.controller.dismiss_notice(id).await;
    StatusCode::NO_CONTENT
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(subscription): Json<PushSubscription>,
) -> Result<Json<SubscribeResponse>, AppError> {
    validate_subscription(&subscription, &state.cfg.allowed_push_hosts)
        .map_err(AppError::bad_request)?;

    let delete_token = Uuid::new_v4().simple().to_string();
    let stored = StoredSubscription {
        subscription,
        created_at: Utc::now(),
        delete_token: delete_token.clone(),
    };
    let id = state.store.insert(&stored)?;

    Ok(Json(SubscribeResponse { id, delete_token }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let provided = headers
        .get("x-delete-token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "delete token required",
        ));
    }

    let stored = state
        .store
        .get(&id)?
        .ok_or_else(|| AppError::not_found("subscription not found"))?;
    if stored.delete_token != provided {
        return Err(AppError::new(StatusCode::FORBIDDEN, "invalid delete token"));
    }

    state.store.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Push-service ingress: the raw body is the push payload.
pub async fn push(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, AppError> {
    let data = (!body.is_empty()).then(|| body.to_vec());
    state.worker.dispatch(WorkerEvent::Push { data }).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct ClickReport {
    pub tag: String,
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn notification_click(
    State(state): State<AppState>,
    Json(click): Json<ClickReport>,
) -> Result<StatusCode, AppError> {
    state
        .worker
        .dispatch(WorkerEvent::NotificationClick {
            tag: click.tag,
            action: click.action.filter(|action| !action.is_empty()),
        })
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn sync(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<StatusCode, AppError> {
    state.worker.dispatch(WorkerEvent::Sync { tag }).await?;
    Ok(StatusCode::ACCEPTED)
}

fn validate_subscription(
    subscription: &PushSubscription,
    allowed_hosts: &[String],
) -> Result<(), &'static str> {
    let endpoint = subscription.endpoint.trim();
    if endpoint.is_empty() {
        return Err("endpoint required");
    }
    if endpoint.len() > 2048 {
        return Err("endpoint too long");
    }
    let uri: Uri = endpoint.parse().map_err(|_| "invalid endpoint url")?;
    if !uri.scheme_str().unwrap_or("").eq_ignore_ascii_case("https") {
        return Err("endpoint must be https");
    }
    let host = uri.host().ok_or("endpoint host missing")?;
    if !host_allowed(host, allowed_hosts) {
        return Err("endpoint host not allowed");
    }

    if subscription.keys.p256dh.len() > 256 || subscription.keys.auth.len() > 128 {
        return Err("subscription keys too long");
    }
    // Uncompressed P-256 point and a 16-byte auth secret.
    match decode_b64url(&subscription.keys.p256dh) {
        Ok(bytes) if bytes.len() == 65 => {}
        Ok(_) => return Err("invalid p256dh length"),
        Err(_) => return Err("invalid p256dh"),
    }
    match decode_b64url(&subscription.keys.auth) {
        Ok(bytes) if bytes.len() == 16 => {}
        Ok(_) => return Err("invalid auth length"),
        Err(_) => return Err("invalid auth"),
    }

    Ok(())
}

fn host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    if allowed_hosts.is_empty() || allowed_hosts.iter().any(|item| item == "*") {
        return true;
    }

    allowed_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(host))
}

fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    decode_config(value, URL_SAFE_NO_PAD).or_else(|_| decode_config(value, URL_SAFE))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{http::HeaderValue, response::IntoResponse};
    use base64::encode_config;

    use super::*;
    use crate::{
        config::Config,
        dashboard::{ControllerSettings, DashboardController, store::NoticeVariant},
        db::SubscriptionStore,
        models::{PushKeys, TRACKED_USERNAME},
        notifications::NotificationHost,
        testing::{FakeBackend, RecordingHost, RecordingSurface, SurfaceCall, snapshot},
        worker::{self, DEFAULT_TITLE, REMINDER_TAG},
    };

    struct Harness {
        state: AppState,
        backend: Arc<FakeBackend>,
        surface: Arc<RecordingSurface>,
        _dir: tempfile::TempDir,
    }

    async fn harness(permission: Permission) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_lookup(|key| match key {
            "VAPID_PUBLIC_KEY" => Some("public-key".to_string()),
            "VAPID_PRIVATE_KEY" => Some("private-key".to_string()),
            _ => None,
        })
        .unwrap();

        let backend = Arc::new(FakeBackend::with_snapshot(snapshot(true)));
        let host: Arc<dyn NotificationHost> = Arc::new(RecordingHost::new(permission));
        let surface = Arc::new(RecordingSurface::default());
        let (worker, _task) = worker::spawn(surface.clone(), 8);
        worker.register().await.unwrap();
        worker.wait_active().await.unwrap();

        let controller = Arc::new(
            DashboardController::new(
                backend.clone(),
                host.clone(),
                ControllerSettings {
                    username: TRACKED_USERNAME.to_string(),
                    refresh_interval: Duration::from_secs(300),
                    test_notification_ttl: Duration::from_secs(5),
                },
            )
            .with_worker(worker.clone()),
        );
        let store = Arc::new(SubscriptionStore::open(dir.path().join("subs.redb")).unwrap());

        Harness {
            state: AppState {
                cfg: Arc::new(cfg),
                controller,
                host,
                worker,
                store,
            },
            backend,
            surface,
            _dir: dir,
        }
    }

    fn status_of<T: IntoResponse>(result: Result<T, AppError>) -> StatusCode {
        match result {
            Ok(response) => response.into_response().status(),
            Err(err) => err.status,
        }
    }

    // Lets the worker drain its queue; the paused clock only advances once
    // every task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn denied_report_turns_notifications_off() {
        let h = harness(Permission::Granted).await;

        let Json(response) = report_permission(
            State(h.state.clone()),
            Json(PermissionReport {
                permission: "denied".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.permission, Permission::Denied);
        assert!(!response.notifications_enabled);

        let view = h.state.controller.view().await;
        assert!(!view.notifications_enabled);
        let notice = view.notices.last().unwrap();
        assert_eq!(notice.title, "Notifications Blocked");
        assert_eq!(notice.variant, NoticeVariant::Destructive);

        let unknown = report_permission(
            State(h.state.clone()),
            Json(PermissionReport {
                permission: "maybe".to_string(),
            }),
        )
        .await;
        assert_eq!(status_of(unknown), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_reports_overlap_and_shutdown() {
        let h = harness(Permission::Default).await;
        assert_eq!(status_of(refresh(State(h.state.clone())).await), StatusCode::OK);

        h.backend.park_dashboard(true);
        let pending = tokio::spawn(refresh(State(h.state.clone())));
        h.backend.entered.notified().await;
        assert_eq!(
            status_of(refresh(State(h.state.clone())).await),
            StatusCode::CONFLICT
        );

        h.state.controller.unmount();
        h.backend.release.notify_one();
        assert_eq!(
            status_of(pending.await.unwrap()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn create_trigger_validates_before_calling_backend() {
        let h = harness(Permission::Default).await;
        let request = |platform: &str, time: &str| {
            Json(CreateTriggerRequest {
                platform: platform.to_string(),
                trigger_time: time.to_string(),
            })
        };

        let bad_time = create_trigger(State(h.state.clone()), request("github", "9:00")).await;
        assert_eq!(status_of(bad_time), StatusCode::BAD_REQUEST);
        let bad_platform =
            create_trigger(State(h.state.clone()), request("codeforces", "09:00")).await;
        assert_eq!(status_of(bad_platform), StatusCode::BAD_REQUEST);
        assert!(h.state.controller.view().await.triggers.is_empty());

        let created = create_trigger(State(h.state.clone()), request("leetcode", "21:30")).await;
        assert_eq!(status_of(created), StatusCode::CREATED);

        h.backend.fail_writes(true);
        let failed = create_trigger(State(h.state.clone()), request("github", "09:00")).await;
        assert_eq!(status_of(failed), StatusCode::BAD_GATEWAY);
        assert_eq!(h.state.controller.view().await.triggers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_push_body_shows_default_notification() {
        let h = harness(Permission::Granted).await;

        let empty = push(State(h.state.clone()), Bytes::new()).await.unwrap();
        assert_eq!(empty, StatusCode::ACCEPTED);
        let titled = push(
            State(h.state.clone()),
            Bytes::from_static(br#"{"title":"Ping"}"#),
        )
        .await
        .unwrap();
        assert_eq!(titled, StatusCode::ACCEPTED);
        settle().await;

        let titles: Vec<_> = h.surface.shown().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec![DEFAULT_TITLE.to_string(), "Ping".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_click_action_only_closes() {
        let h = harness(Permission::Granted).await;
        for action in [Some(String::new()), Some("view".to_string())] {
            notification_click(
                State(h.state.clone()),
                Json(ClickReport {
                    tag: REMINDER_TAG.to_string(),
                    action,
                }),
            )
            .await
            .unwrap();
        }
        settle().await;

        let closes = h
            .surface
            .calls()
            .into_iter()
            .filter(|call| matches!(call, SurfaceCall::Close(_)))
            .count();
        assert_eq!(closes, 2);
        assert_eq!(h.surface.opened(), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_requires_matching_token() {
        let h = harness(Permission::Default).await;
        let Json(created) = subscribe(
            State(h.state.clone()),
            Json(make_subscription("https://fcm.googleapis.com/fcm/send/abc", 65, 16)),
        )
        .await
        .unwrap();

        let attempt = |token: Option<&str>| {
            let mut headers = HeaderMap::new();
            if let Some(token) = token {
                headers.insert("x-delete-token", HeaderValue::from_str(token).unwrap());
            }
            unsubscribe(State(h.state.clone()), Path(created.id.clone()), headers)
        };

        assert_eq!(status_of(attempt(None).await), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(attempt(Some("wrong")).await), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(attempt(Some(created.delete_token.as_str())).await),
            StatusCode::NO_CONTENT
        );
        assert!(h.state.store.get(&created.id).unwrap().is_none());
    }

    fn make_subscription(endpoint: &str, p256dh_bytes: usize, auth_bytes: usize) -> PushSubscription {
        PushSubscription {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: PushKeys {
                p256dh: encode_config(vec![4u8; p256dh_bytes], URL_SAFE_NO_PAD),
                auth: encode_config(vec![7u8; auth_bytes], URL_SAFE_NO_PAD),
            },
        }
    }

    fn allowed() -> Vec<String> {
        vec!["fcm.googleapis.com".to_string()]
    }

    #[test]
    fn accepts_well_formed_subscription() {
        let sub = make_subscription("https://fcm.googleapis.com/fcm/send/abc", 65, 16);
        assert_eq!(validate_subscription(&sub, &allowed()), Ok(()));
    }

    #[test]
    fn rejects_plain_http_and_foreign_hosts() {
        let sub = make_subscription("http://fcm.googleapis.com/fcm/send/abc", 65, 16);
        assert_eq!(validate_subscription(&sub, &allowed()), Err("endpoint must be https"));

        let sub = make_subscription("https://evil.example.com/push", 65, 16);
        assert_eq!(validate_subscription(&sub, &allowed()), Err("endpoint host not allowed"));
        assert_eq!(validate_subscription(&sub, &["*".to_string()]), Ok(()));
    }

    #[test]
    fn rejects_bad_key_material() {
        let sub = make_subscription("https://fcm.googleapis.com/x", 64, 16);
        assert_eq!(validate_subscription(&sub, &allowed()), Err("invalid p256dh length"));

        let sub = make_subscription("https://fcm.googleapis.com/x", 65, 15);
        assert_eq!(validate_subscription(&sub, &allowed()), Err("invalid auth length"));

        let mut sub = make_subscription("https://fcm.googleapis.com/x", 65, 16);
        sub.keys.auth = "***".to_string();
        assert_eq!(validate_subscription(&sub, &allowed()), Err("invalid auth"));
    }
}
