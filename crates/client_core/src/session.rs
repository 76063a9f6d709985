use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use rand::{seq::IndexedRandom, Rng};
use reqwest::{header, multipart, redirect, Client, RequestBuilder, Response};
use serde_json::Value;
use shared::error::{classify_http_status, ServiceError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

use crate::{
    bootstrap::{parse_home_page, token_from_response},
    checkpoint::{classify, extract_form, submission, CheckpointScreen, MAX_CHECKPOINT_STEPS},
    config::ClientSettings,
    cookies::{CookieJar, CookieStorage},
    error::SessionError,
    markup::{MarkupParser, ScraperMarkup},
    retry::retry_after_refresh,
    service::{
        login_form, AUTH_TOKEN_PATH, CHECKPOINT_MARKER, CHECKPOINT_MARKUP, CHECKPOINT_NEXT_PARAM,
        CSRF_FIELD, LOGIN_PATH, LOGIN_PROBE_PATH, LOGOUT_PATH, USER_AGENTS, USER_ID_COOKIE,
    },
};

const MAX_REDIRECTS: usize = 10;

/// Login identifier and secret. The secret is wiped from memory on drop.
pub struct Credentials {
    identifier: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Supplies the code for a two-factor checkpoint; may wait on a human.
#[async_trait]
pub trait TwoFactorProvider: Send + Sync {
    async fn request_code(&self) -> Result<String, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base: Url,
    pub facebook: Url,
    pub realtime: Url,
}

impl Endpoints {
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, SessionError> {
        let parse = |raw: &str| {
            Url::parse(raw)
                .map_err(|err| SessionError::parse(format!("invalid endpoint url: {err}"), raw))
        };
        Ok(Self {
            base: parse(&settings.base_url)?,
            facebook: parse(&settings.facebook_url)?,
            realtime: parse(&settings.realtime_url)?,
        })
    }

    /// `path` on the base host.
    pub fn at(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    pub fn home(&self) -> Url {
        self.at("/")
    }

    pub fn is_home(&self, url: &Url) -> bool {
        let origin = url.origin();
        (origin == self.base.origin() || origin == self.facebook.origin())
            && (url.path() == "/" || url.path().starts_with("/home"))
    }

    pub fn is_auth_token(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.at(AUTH_TOKEN_PATH).as_str())
    }

    /// Origin string used to complete root-relative checkpoint actions.
    pub fn facebook_origin(&self) -> String {
        self.facebook.origin().ascii_serialization()
    }
}

/// Token, revision and identity of a logged-in session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user_id: String,
    pub token: String,
    pub revision: String,
    /// Random per-session id, also used as the realtime device id.
    pub client_id: String,
}

/// A file attached to a multipart POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Where a redirect chain stopped: a URL that ends the login flow (auth
/// token or home page), or a page that still needs answering.
enum Landing {
    Finished(Url),
    Page(String),
}

/// Authenticated session: cookie jar, CSRF token and request counter.
///
/// Share it behind an `Arc`; the counter is atomic and the token sits behind
/// a lock that is never held across a request.
pub struct Session {
    http: Client,
    jar: Arc<CookieJar>,
    endpoints: Endpoints,
    settings: ClientSettings,
    user_agent: String,
    markup: Arc<dyn MarkupParser>,
    state: RwLock<SessionState>,
    counter: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoints", &self.endpoints)
            .field("counter", &self.counter.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionBuilder {
    settings: ClientSettings,
    markup: Arc<dyn MarkupParser>,
}

impl SessionBuilder {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            markup: Arc::new(ScraperMarkup),
        }
    }

    pub fn markup(mut self, parser: Arc<dyn MarkupParser>) -> Self {
        self.markup = parser;
        self
    }

    fn build(&self) -> Result<Session, SessionError> {
        let endpoints = Endpoints::from_settings(&self.settings)?;
        let jar = Arc::new(CookieJar::for_settings(&self.settings));
        let user_agent = self
            .settings
            .user_agent
            .clone()
            .or_else(|| USER_AGENTS.choose(&mut rand::rng()).map(|ua| ua.to_string()))
            .unwrap_or_default();
        let http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(redirect::Policy::none())
            .user_agent(user_agent.clone())
            .timeout(self.settings.request_timeout())
            .build()?;
        let client_id = format!("{:x}", rand::rng().random_range(0..(1u32 << 31)));

        Ok(Session {
            http,
            jar,
            endpoints,
            settings: self.settings.clone(),
            user_agent,
            markup: Arc::clone(&self.markup),
            state: RwLock::new(SessionState {
                client_id,
                ..SessionState::default()
            }),
            counter: AtomicU64::new(0),
        })
    }

    /// Logs in with credentials, answering checkpoint screens on the way.
    pub async fn login(
        &self,
        credentials: &Credentials,
        two_factor: Option<&dyn TwoFactorProvider>,
    ) -> Result<Session, SessionError> {
        let session = self.build()?;
        session.run_login(credentials, two_factor).await?;
        session.refresh().await?;
        let user_id = session.user_id().await;
        info!(user_id = %user_id, "logged in as {}", credentials.identifier());
        Ok(session)
    }

    /// Restores a session from a flat cookie map, typically exported from a
    /// browser or a previous run.
    pub async fn from_cookies(
        &self,
        cookies: &HashMap<String, String>,
    ) -> Result<Session, SessionError> {
        if !cookies
            .get(USER_ID_COOKIE)
            .is_some_and(|value| !value.is_empty())
        {
            return Err(SessionError::InvalidSession(format!(
                "cookie map has no {USER_ID_COOKIE}"
            )));
        }
        let session = self.build()?;
        session.jar.import(cookies);
        match session.refresh().await {
            Ok(()) => Ok(session),
            Err(SessionError::NotLoggedIn(message)) => Err(SessionError::InvalidSession(message)),
            Err(err) => Err(err),
        }
    }

    /// Stored cookies first, then a fresh login. The resulting cookies are
    /// saved back to `storage`.
    pub async fn restore_or_login(
        &self,
        storage: &dyn CookieStorage,
        credentials: Option<&Credentials>,
        two_factor: Option<&dyn TwoFactorProvider>,
    ) -> Result<Session, SessionError> {
        let restored = match storage.load().await {
            Some(cookies) => match self.from_cookies(&cookies).await {
                Ok(session) => Some(session),
                Err(
                    err @ (SessionError::InvalidSession(_)
                    | SessionError::NotLoggedIn(_)
                    | SessionError::Parse { .. }),
                ) => {
                    warn!(error = %err, "stored cookies rejected; logging in again");
                    None
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        let session = match (restored, credentials) {
            (Some(session), _) => session,
            (None, Some(credentials)) => self.login(credentials, two_factor).await?,
            (None, None) => {
                return Err(SessionError::InvalidSession(
                    "no usable stored cookies and no credentials".into(),
                ))
            }
        };
        storage.save(&session.cookies()).await;
        Ok(session)
    }
}

impl Session {
    pub fn builder(settings: ClientSettings) -> SessionBuilder {
        SessionBuilder::new(settings)
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn user_id(&self) -> String {
        self.state.read().await.user_id.clone()
    }

    /// Apex-scope cookie map, suitable for [`SessionBuilder::from_cookies`].
    pub fn cookies(&self) -> HashMap<String, String> {
        self.jar.export()
    }

    /// `Cookie` header for a connection to `url`, read once.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar.header_for(url)
    }

    async fn run_login(
        &self,
        credentials: &Credentials,
        two_factor: Option<&dyn TwoFactorProvider>,
    ) -> Result<(), SessionError> {
        let login_url = self.endpoints.at(LOGIN_PATH);
        if let Some(host) = login_url.host_str() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            self.jar.insert(host, "act", &format!("{now}/0"));
        }

        let form = login_form(credentials.identifier(), &credentials.secret);
        let response = self.http.post(login_url.clone()).form(&form).send().await?;
        ensure_status(&response)?;

        let Some(location) = redirect_target(&response, &login_url) else {
            let body = response.text_with_charset("utf-8").await?;
            return Err(SessionError::InvalidCredentials(self.login_error_text(&body)));
        };
        debug!(location = %location, "login redirected");

        let location = if location.as_str().contains(CHECKPOINT_MARKER) {
            let target = location
                .query_pairs()
                .find(|(key, _)| key == CHECKPOINT_NEXT_PARAM)
                .and_then(|(_, next)| location.join(&next).ok())
                .unwrap_or_else(|| location.clone());
            match self.follow(target).await? {
                Landing::Finished(url) => url,
                Landing::Page(body) => self.drive_checkpoint(body, two_factor).await?,
            }
        } else {
            location
        };

        if self.endpoints.is_home(&location) {
            return Ok(());
        }
        if !self.endpoints.is_auth_token(&location) {
            return Err(SessionError::parse(
                "login redirected somewhere unexpected",
                location.as_str(),
            ));
        }

        let response = self.http.get(location.clone()).send().await?;
        ensure_status(&response)?;
        match redirect_target(&response, &location) {
            Some(target) if self.endpoints.is_home(&target) => Ok(()),
            target => {
                let body = response.text_with_charset("utf-8").await.unwrap_or_default();
                Err(SessionError::NotLoggedIn(format!(
                    "auth token redirected to {}: {}",
                    target.map(|u| u.to_string()).unwrap_or_else(|| "nowhere".into()),
                    self.login_error_text(&body)
                )))
            }
        }
    }

    async fn drive_checkpoint(
        &self,
        first_page: String,
        two_factor: Option<&dyn TwoFactorProvider>,
    ) -> Result<Url, SessionError> {
        let origin = self.endpoints.facebook_origin();
        let mut page = first_page;

        for step in 1..=MAX_CHECKPOINT_STEPS {
            let form = extract_form(self.markup.as_ref(), &page, &origin)?;
            let screen = classify(&form, &CHECKPOINT_MARKUP)?;
            info!(step, ?screen, "answering login checkpoint");

            let code = match (screen, two_factor) {
                (CheckpointScreen::ApprovalCode, Some(provider)) => {
                    Some(provider.request_code().await?)
                }
                (CheckpointScreen::ApprovalCode, None) => {
                    return Err(SessionError::NotLoggedIn(
                        "two-factor code requested but no provider was given".into(),
                    ))
                }
                _ => None,
            };
            let fields = submission(&form, screen, &CHECKPOINT_MARKUP, code.as_deref())?;

            let action = Url::parse(&form.action)
                .map_err(|err| SessionError::parse(err.to_string(), &form.action))?;
            let response = self.http.post(action.clone()).form(&fields).send().await?;
            ensure_status(&response)?;

            page = match redirect_target(&response, &action) {
                Some(next) if self.ends_login(&next) => return Ok(next),
                Some(next) => match self.follow(next).await? {
                    Landing::Finished(url) => return Ok(url),
                    Landing::Page(body) => body,
                },
                None => response.text_with_charset("utf-8").await?,
            };
        }

        Err(SessionError::parse(
            format!("checkpoint not finished after {MAX_CHECKPOINT_STEPS} steps"),
            &page,
        ))
    }

    fn login_error_text(&self, html: &str) -> String {
        let text = self
            .markup
            .select(html, "form", Some(("id", "login_form")))
            .ok()
            .and_then(|forms| forms.into_iter().next())
            .map(|form| {
                form.strings
                    .iter()
                    .skip(1)
                    .take(2)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        if text.is_empty() {
            "login was not accepted".into()
        } else {
            text
        }
    }

    fn ends_login(&self, url: &Url) -> bool {
        self.endpoints.is_auth_token(url) || self.endpoints.is_home(url)
    }

    /// GET following redirects by hand; stops early at the auth-token URL or
    /// the home page.
    async fn follow(&self, url: Url) -> Result<Landing, SessionError> {
        let mut current = url;
        for _ in 0..MAX_REDIRECTS {
            if self.ends_login(&current) {
                return Ok(Landing::Finished(current));
            }
            let response = self.http.get(current.clone()).send().await?;
            ensure_status(&response)?;
            if response.status().is_redirection() {
                if let Some(next) = redirect_target(&response, &current) {
                    current = next;
                    continue;
                }
            }
            let body = response.text_with_charset("utf-8").await?;
            return Ok(Landing::Page(body));
        }
        Err(SessionError::transport(None, "too many redirects"))
    }

    async fn fetch_page(&self, url: Url) -> Result<(Url, String), SessionError> {
        let mut current = url;
        for _ in 0..MAX_REDIRECTS {
            let response = self.http.get(current.clone()).send().await?;
            ensure_status(&response)?;
            if response.status().is_redirection() {
                if let Some(next) = redirect_target(&response, &current) {
                    current = next;
                    continue;
                }
            }
            let body = response.text_with_charset("utf-8").await?;
            return Ok((current, body));
        }
        Err(SessionError::transport(None, "too many redirects"))
    }

    /// Reloads token and revision from the home page using the current
    /// cookies.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let user_id = self
            .jar
            .find(USER_ID_COOKIE)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SessionError::NotLoggedIn(format!("no {USER_ID_COOKIE} cookie")))?;

        let (landed, page) = self.fetch_page(self.endpoints.home()).await?;
        let data = parse_home_page(&page)?;
        debug!(url = %landed, "home page fetched");

        let mut state = self.state.write().await;
        state.user_id = user_id;
        state.token = data.token;
        state.revision = data.revision;
        info!(user_id = %state.user_id, revision = %state.revision, "session bootstrapped");
        Ok(())
    }

    /// True when the login page redirects straight to the home page.
    pub async fn is_logged_in(&self) -> Result<bool, SessionError> {
        let probe = self.endpoints.at(LOGIN_PROBE_PATH);
        let response = self.http.get(probe.clone()).send().await?;
        ensure_status(&response)?;
        Ok(redirect_target(&response, &probe).is_some_and(|target| self.endpoints.is_home(&target)))
    }

    /// Posts the token to the logout endpoint. Local state is cleared either
    /// way; the result says whether the server confirmed.
    pub async fn logout(&self) -> Result<bool, SessionError> {
        let url = self.endpoints.at(LOGOUT_PATH);
        let token = self.state.read().await.token.clone();
        let outcome = self
            .http
            .post(url.clone())
            .form(&[(CSRF_FIELD, token.as_str())])
            .send()
            .await;

        {
            let mut state = self.state.write().await;
            state.token.clear();
            state.revision.clear();
            state.user_id.clear();
        }
        self.jar.clear();

        let response = outcome?;
        let confirmed = redirect_target(&response, &url)
            .is_some_and(|target| target.path() == LOGIN_PROBE_PATH);
        info!(confirmed, "logged out");
        Ok(confirmed)
    }

    async fn envelope(&self) -> Vec<(String, String)> {
        let request_id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let state = self.state.read().await;
        vec![
            ("__a".into(), "1".into()),
            ("__req".into(), to_base36(request_id)),
            ("__rev".into(), state.revision.clone()),
            ("__user".into(), state.user_id.clone()),
            (CSRF_FIELD.into(), state.token.clone()),
        ]
    }

    fn resolve(&self, target: &str) -> Result<Url, SessionError> {
        if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else {
            self.endpoints.base.join(target)
        }
        .map_err(|err| SessionError::parse(format!("invalid request url: {err}"), target))
    }

    /// Runs `op`, re-bootstrapping and retrying once on a stale session.
    pub async fn with_refresh<T, F, Fut>(&self, mut op: F) -> Result<T, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        retry_after_refresh(|_| op(), || self.refresh()).await
    }

    pub async fn get(
        &self,
        target: &str,
        params: &[(String, String)],
    ) -> Result<Value, SessionError> {
        self.with_refresh(|| self.get_once(target, params)).await
    }

    pub async fn post(
        &self,
        target: &str,
        params: &[(String, String)],
        files: &[UploadFile],
    ) -> Result<Value, SessionError> {
        self.with_refresh(|| self.post_once(target, params, files)).await
    }

    async fn get_once(
        &self,
        target: &str,
        params: &[(String, String)],
    ) -> Result<Value, SessionError> {
        let url = self.resolve(target)?;
        let mut query = params.to_vec();
        query.extend(self.envelope().await);
        self.execute(self.http.get(url).query(&query)).await
    }

    async fn post_once(
        &self,
        target: &str,
        params: &[(String, String)],
        files: &[UploadFile],
    ) -> Result<Value, SessionError> {
        let url = self.resolve(target)?;
        let mut fields = params.to_vec();
        fields.extend(self.envelope().await);

        let request = if files.is_empty() {
            self.http.post(url).form(&fields)
        } else {
            let mut form = multipart::Form::new();
            for (name, value) in fields {
                form = form.text(name, value);
            }
            for file in files {
                let part = multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)?;
                form = form.part(file.field.clone(), part);
            }
            self.http.post(url).multipart(form)
        };
        self.execute(request).await
    }

    /// POST returning the raw decoded body, for endpoints that do not answer
    /// with a single JSON document.
    pub(crate) async fn post_text(
        &self,
        target: &str,
        params: &[(String, String)],
    ) -> Result<String, SessionError> {
        let url = self.resolve(target)?;
        let mut fields = params.to_vec();
        fields.extend(self.envelope().await);
        read_body(self.http.post(url).form(&fields).send().await?).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, SessionError> {
        let text = read_body(request.send().await?).await?;
        let body = parse_json_body(&text)?;
        if let Some(err) = ServiceError::from_body(&body) {
            return Err(SessionError::from_service(err));
        }
        if let Some(token) = token_from_response(&body) {
            let mut state = self.state.write().await;
            if state.token != token {
                debug!("adopting token pushed by the server");
                state.token = token;
            }
        }
        Ok(body)
    }
}

/// Races `fut` against `cancel`.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = fut => result,
    }
}

fn ensure_status(response: &Response) -> Result<(), SessionError> {
    let status = response.status();
    match classify_http_status(status.as_u16()) {
        None => Ok(()),
        Some(_) => Err(SessionError::transport(
            Some(status.as_u16()),
            format!("{} returned {status}", response.url()),
        )),
    }
}

fn redirect_target(response: &Response, from: &Url) -> Option<Url> {
    let raw = response.headers().get(header::LOCATION)?.to_str().ok()?;
    from.join(raw).ok()
}

async fn read_body(response: Response) -> Result<String, SessionError> {
    ensure_status(&response)?;
    let status = response.status().as_u16();
    let text = response.text_with_charset("utf-8").await?;
    if text.trim().is_empty() {
        return Err(SessionError::transport(Some(status), "empty response body"));
    }
    Ok(text)
}

/// Strips the `for (;;);` guard and anything else before the first object.
pub fn parse_json_body(text: &str) -> Result<Value, SessionError> {
    let start = text
        .find('{')
        .ok_or_else(|| SessionError::parse("response holds no JSON object", text))?;
    serde_json::from_str(&text[start..]).map_err(|err| SessionError::parse(err.to_string(), text))
}

pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
