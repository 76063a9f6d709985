use super::*;

use std::time::{SystemTime, UNIX_EPOCH};

use shared::error::ErrorClass;

use crate::{
    cookies::FileCookieStorage,
    mock_service::{
        mock_cookies, spawn_mock_service, LoginMode, MockState, MOCK_APPROVAL_CODE, MOCK_EMAIL,
        MOCK_PASSWORD, MOCK_USER_ID,
    },
};

struct FixedCode(&'static str);

#[async_trait]
impl TwoFactorProvider for FixedCode {
    async fn request_code(&self) -> Result<String, SessionError> {
        Ok(self.0.to_string())
    }
}

fn credentials() -> Credentials {
    Credentials::new(MOCK_EMAIL, MOCK_PASSWORD)
}

async fn restored_session() -> (Session, MockState) {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    let session = Session::builder(settings)
        .from_cookies(&mock_cookies())
        .await
        .expect("restore from cookies");
    (session, state)
}

fn no_params() -> Vec<(String, String)> {
    Vec::new()
}

#[tokio::test]
async fn password_login_bootstraps_token_and_revision() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    let session = Session::builder(settings)
        .login(&credentials(), None)
        .await
        .expect("login");

    let snapshot = session.state().await;
    assert_eq!(snapshot.user_id, MOCK_USER_ID);
    assert_eq!(snapshot.token, "tok-1");
    assert_eq!(snapshot.revision, "1009876");
    assert!(!snapshot.client_id.is_empty());
    assert_eq!(session.cookies().get("c_user").map(String::as_str), Some(MOCK_USER_ID));

    let inner = state.inner.lock().await;
    assert_eq!(inner.login_forms.len(), 1);
    assert_eq!(inner.login_forms[0]["email"], MOCK_EMAIL);
    assert_eq!(inner.login_forms[0]["login"], "1");
    assert_eq!(inner.home_hits, 1);
}

#[tokio::test]
async fn checkpoint_answers_code_then_declines_remembering() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    state.inner.lock().await.login_mode = LoginMode::Checkpoint;

    let provider = FixedCode(MOCK_APPROVAL_CODE);
    let session = Session::builder(settings)
        .login(&credentials(), Some(&provider))
        .await
        .expect("login through checkpoint");
    assert_eq!(session.user_id().await, MOCK_USER_ID);

    let inner = state.inner.lock().await;
    assert_eq!(inner.checkpoint_posts.len(), 2);
    assert_eq!(inner.checkpoint_posts[0]["approvals_code"], MOCK_APPROVAL_CODE);
    assert_eq!(inner.checkpoint_posts[0]["nh"], "nh-1");
    assert_eq!(inner.checkpoint_posts[0]["fb_dtsg"], "cp-token");
    assert_eq!(inner.checkpoint_posts[1]["name_action_selected"], "dont_save");
    assert_eq!(inner.checkpoint_posts[1]["nh"], "nh-2");
}

#[tokio::test]
async fn checkpoint_review_chain_can_end_on_the_home_page() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    state.inner.lock().await.login_mode = LoginMode::ReviewedCheckpoint;

    let provider = FixedCode(MOCK_APPROVAL_CODE);
    let session = Session::builder(settings)
        .login(&credentials(), Some(&provider))
        .await
        .expect("login through reviewed checkpoint");
    assert_eq!(session.user_id().await, MOCK_USER_ID);
    assert_eq!(session.state().await.token, "tok-1");

    let inner = state.inner.lock().await;
    assert_eq!(inner.checkpoint_posts.len(), 3);
    assert_eq!(inner.checkpoint_posts[0]["approvals_code"], MOCK_APPROVAL_CODE);
    assert_eq!(inner.checkpoint_posts[1]["submit[This was me]"], "[any value]");
    assert_eq!(inner.checkpoint_posts[1]["nh"], "nh-r");
    assert!(!inner.checkpoint_posts[1].contains_key("submit[This wasn't me]"));
    assert_eq!(inner.checkpoint_posts[2]["name_action_selected"], "dont_save");
}

#[test]
fn home_is_recognised_on_either_origin() {
    let endpoints = Endpoints::from_settings(&ClientSettings::default()).expect("endpoints");
    let url = |raw: &str| Url::parse(raw).expect("url");
    assert!(endpoints.is_home(&url("https://www.messenger.com/")));
    assert!(endpoints.is_home(&url("https://www.facebook.com/")));
    assert!(endpoints.is_home(&url("https://www.facebook.com/home.php")));
    assert!(!endpoints.is_home(&url("https://www.facebook.com/checkpoint/")));
    assert!(!endpoints.is_home(&url("https://elsewhere.test/")));
}

#[tokio::test]
async fn checkpoint_code_without_provider_is_not_logged_in() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    state.inner.lock().await.login_mode = LoginMode::Checkpoint;

    let err = Session::builder(settings)
        .login(&credentials(), None)
        .await
        .expect_err("no provider");
    assert!(matches!(err, SessionError::NotLoggedIn(_)), "{err}");
    assert!(state.inner.lock().await.checkpoint_posts.is_empty());
}

#[tokio::test]
async fn unknown_checkpoint_reports_drift_with_field_names() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    state.inner.lock().await.login_mode = LoginMode::UnknownCheckpoint;

    let err = Session::builder(settings)
        .login(&credentials(), None)
        .await
        .expect_err("unknown screen");
    match err {
        SessionError::ProtocolDrift { stage, fields } => {
            assert!(stage.contains("checkpoint"), "{stage}");
            assert!(fields.contains(&"captcha_response".to_string()), "{fields:?}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn rejected_password_surfaces_the_page_message() {
    let (settings, _state) = spawn_mock_service().await.expect("spawn mock");
    let err = Session::builder(settings)
        .login(&Credentials::new(MOCK_EMAIL, "wrong"), None)
        .await
        .expect_err("bad password");
    match err {
        SessionError::InvalidCredentials(message) => {
            assert!(message.contains("password you entered is incorrect"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn every_request_carries_the_envelope_and_a_fresh_counter() {
    let (session, state) = restored_session().await;
    for _ in 0..3 {
        session
            .get("/api/echo", &[("q".to_string(), "x".to_string())])
            .await
            .expect("echo");
    }
    let body = session
        .post("/api/echo", &no_params(), &[])
        .await
        .expect("echo post");
    assert_eq!(body["payload"]["ok"], true);

    let inner = state.inner.lock().await;
    let counters: Vec<_> = inner.echo_calls.iter().map(|c| c["__req"].clone()).collect();
    assert_eq!(counters, ["1", "2", "3", "4"]);
    let first = &inner.echo_calls[0];
    assert_eq!(first["__a"], "1");
    assert_eq!(first["__user"], MOCK_USER_ID);
    assert_eq!(first["__rev"], "1009876");
    assert_eq!(first["fb_dtsg"], "tok-1");
    assert_eq!(first["q"], "x");
}

#[test]
fn counter_is_rendered_in_base36() {
    assert_eq!(to_base36(0), "0");
    assert_eq!(to_base36(35), "z");
    assert_eq!(to_base36(36), "10");
    assert_eq!(to_base36(1295), "zz");
}

#[tokio::test]
async fn stale_token_is_refreshed_and_the_call_repeated_once() {
    let (session, state) = restored_session().await;
    let hits_before = {
        let mut inner = state.inner.lock().await;
        inner.token = "tok-2".into();
        inner.home_hits
    };

    session
        .post("/api/echo", &no_params(), &[])
        .await
        .expect("retried after refresh");

    assert_eq!(session.state().await.token, "tok-2");
    let inner = state.inner.lock().await;
    assert_eq!(inner.home_hits, hits_before + 1);
    assert_eq!(inner.echo_calls.len(), 2);
    assert_eq!(inner.echo_calls[0]["fb_dtsg"], "tok-1");
    assert_eq!(inner.echo_calls[1]["fb_dtsg"], "tok-2");
}

#[tokio::test]
async fn second_stale_answer_is_returned_to_the_caller() {
    let (session, state) = restored_session().await;
    let hits_before = state.inner.lock().await.home_hits;

    let err = session
        .post("/api/stale", &no_params(), &[])
        .await
        .expect_err("stale twice");
    assert!(err.is_stale(), "{err}");
    assert_eq!(err.class(), ErrorClass::SessionStale);

    let inner = state.inner.lock().await;
    assert_eq!(inner.stale_calls, 2);
    assert_eq!(inner.home_hits, hits_before + 1);
}

#[tokio::test]
async fn token_pushed_in_a_response_is_adopted() {
    let (session, _state) = restored_session().await;
    session.get("/api/hotpatch", &no_params()).await.expect("hotpatch");
    assert_eq!(session.state().await.token, "pushed-token");
}

#[tokio::test]
async fn service_error_codes_map_to_classes() {
    let (session, _state) = restored_session().await;

    let err = session.get("/api/error/1357001", &no_params()).await.expect_err("1357001");
    assert!(matches!(err, SessionError::NotLoggedIn(_)), "{err}");

    let err = session.get("/api/error/1545010", &no_params()).await.expect_err("1545010");
    assert!(matches!(err, SessionError::InvalidParameters(_)), "{err}");

    match session.get("/api/error/42", &no_params()).await.expect_err("42") {
        SessionError::External(service) => {
            assert_eq!(service.code, 42);
            assert_eq!(service.summary, "Request failed");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn empty_body_and_server_errors_are_transport_failures() {
    let (session, _state) = restored_session().await;

    let err = session.get("/api/empty", &no_params()).await.expect_err("empty");
    assert!(matches!(err, SessionError::Transport { .. }), "{err}");

    match session.get("/api/broken", &no_params()).await.expect_err("500") {
        SessionError::Transport { status, .. } => assert_eq!(status, Some(500)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn declared_charset_is_honoured() {
    let (session, _state) = restored_session().await;
    let body = session.get("/api/latin1", &no_params()).await.expect("latin1");
    assert_eq!(body["payload"], "caf\u{e9}");
}

#[tokio::test]
async fn files_switch_the_post_to_multipart() {
    let (session, state) = restored_session().await;
    let file = UploadFile {
        field: "upload_1024".into(),
        file_name: "note.txt".into(),
        mime: "text/plain".into(),
        bytes: b"hello".to_vec(),
    };
    let body = session
        .post(
            "/api/upload",
            &[("voice_clip".to_string(), "true".to_string())],
            &[file],
        )
        .await
        .expect("upload");
    assert_eq!(body["payload"]["metadata"][0]["image_id"], 555);

    let inner = state.inner.lock().await;
    let (fields, files) = inner.upload.as_ref().expect("upload recorded");
    assert_eq!(fields["voice_clip"], "true");
    assert_eq!(fields["fb_dtsg"], "tok-1");
    assert_eq!(
        files,
        &[("upload_1024".to_string(), "note.txt".to_string(), b"hello".to_vec())]
    );
}

#[tokio::test]
async fn cookie_restore_requires_a_user_cookie() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    let cookies = HashMap::from([("xs".to_string(), "xs-secret".to_string())]);
    let err = Session::builder(settings)
        .from_cookies(&cookies)
        .await
        .expect_err("no c_user");
    assert!(matches!(err, SessionError::InvalidSession(_)), "{err}");
    assert_eq!(state.inner.lock().await.home_hits, 0);
}

#[tokio::test]
async fn empty_token_on_restore_is_an_invalid_session() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    state.inner.lock().await.token = String::new();
    let err = Session::builder(settings)
        .from_cookies(&mock_cookies())
        .await
        .expect_err("empty token");
    assert!(matches!(err, SessionError::InvalidSession(_)), "{err}");
}

#[tokio::test]
async fn logout_posts_the_token_and_forgets_everything() {
    let (session, state) = restored_session().await;
    assert!(session.is_logged_in().await.expect("probe"));

    assert!(session.logout().await.expect("logout"));
    assert_eq!(state.inner.lock().await.logout_forms[0]["fb_dtsg"], "tok-1");

    let snapshot = session.state().await;
    assert!(snapshot.token.is_empty());
    assert!(snapshot.user_id.is_empty());
    assert!(session.cookies().is_empty());
    assert!(!session.is_logged_in().await.expect("probe"));
}

#[tokio::test]
async fn cancelled_request_returns_cancelled() {
    let (session, _state) = restored_session().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = with_cancel(&cancel, session.get("/api/echo", &no_params()))
        .await
        .expect_err("cancelled");
    assert!(matches!(err, SessionError::Cancelled));
}

#[tokio::test]
async fn restore_or_login_persists_and_then_reuses_cookies() {
    let (settings, state) = spawn_mock_service().await.expect("spawn mock");
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("client_core_session_{suffix}.json"));
    let storage = FileCookieStorage::new(&path);
    let builder = Session::builder(settings);

    let first = builder
        .restore_or_login(&storage, Some(&credentials()), None)
        .await
        .expect("login on empty storage");
    assert_eq!(first.user_id().await, MOCK_USER_ID);
    let saved = storage.load().await.expect("cookies saved");
    assert_eq!(saved.get("c_user").map(String::as_str), Some(MOCK_USER_ID));

    let second = builder
        .restore_or_login(&storage, None, None)
        .await
        .expect("restored without credentials");
    assert_eq!(second.user_id().await, MOCK_USER_ID);
    assert_eq!(state.inner.lock().await.login_forms.len(), 1);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn restore_without_cookies_or_credentials_fails() {
    let (settings, _state) = spawn_mock_service().await.expect("spawn mock");
    let path = std::env::temp_dir().join("client_core_session_missing_dir/none.json");
    let storage = FileCookieStorage::new(path);
    let err = Session::builder(settings)
        .restore_or_login(&storage, None, None)
        .await
        .expect_err("nothing to use");
    assert!(matches!(err, SessionError::InvalidSession(_)), "{err}");
}
