use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::model::{ApiRequest, ApiResponse, LoginReq, LoginResp};
use crate::config::Config;
use crate::error::ApiError;
use crate::session::AuthSession;

pub mod model;

const LOGIN_PATH: &str = "api/auth/login/";
const ME_PATH: &str = "api/users/me/";

/// Wire seam. Returns `Err` only when no response was obtained; any HTTP
/// status, including errors, comes back as `Ok(ApiResponse)`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent("staffdesk/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(&self, request: &ApiRequest) -> Result<reqwest::Request, ApiError> {
        let endpoint = self
            .base_url
            .join(&request.path)
            .map_err(|err| ApiError::InvalidRequest(format!("{}: {err}", request.path)))?;
        let mut builder = self.http.request(request.method.clone(), endpoint);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self.build_request(&request)?;
        debug!(method = %request.method(), url = %request.url(), "sending request");
        let res = self.http.execute(request).await?;
        let status = res.status().as_u16();
        let text = res.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(status, "received response");
        Ok(ApiResponse { status, body })
    }
}

/// Client for the employee management REST service.
///
/// Stamps the auth and language headers on each request, reading the token
/// from the session every time, and turns error statuses into [`ApiError`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: AuthSession,
    language: String,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("language", &self.language)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: AuthSession,
        language: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session,
            language: language.into(),
        }
    }

    pub fn from_config(cfg: &Config, session: AuthSession) -> Result<Self, ApiError> {
        let base_url = cfg
            .base_url()
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
        let transport = HttpTransport::new(base_url, cfg.request_timeout())?;
        Ok(Self::new(Arc::new(transport), session, cfg.api.language.clone()))
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Build a request carrying the current token. Fails locally, without
    /// touching the network, when no token is stored.
    pub fn authorized(&self, method: Method, path: impl Into<String>) -> Result<ApiRequest, ApiError> {
        let token = self.session.token().ok_or(ApiError::MissingToken)?;
        let mut request = self.anonymous(method, path);
        request
            .headers
            .push(("Authorization".into(), format!("Token {token}")));
        Ok(request)
    }

    fn anonymous(&self, method: Method, path: impl Into<String>) -> ApiRequest {
        let mut request = ApiRequest::new(method, path);
        request
            .headers
            .push(("X-Language".into(), self.language.clone()));
        request
            .headers
            .push(("Accept-Language".into(), self.language.clone()));
        request
    }

    /// Send and map the status. A `401` on an authenticated request expires
    /// the session before the error is returned.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let authenticated = request.header("Authorization").is_some();
        let method = request.method.clone();
        let path = request.path.clone();
        let res = match self.transport.send(request).await {
            Ok(res) => res,
            Err(err) => {
                warn!(%method, path = %path, %err, "request failed without a response");
                return Err(err);
            }
        };
        if res.is_success() {
            return Ok(res.body);
        }
        if res.status == 401 && authenticated {
            self.session.expire();
            return Err(ApiError::Unauthorized);
        }
        let err = ApiError::from_status(res.status, &res.body);
        warn!(%method, path = %path, status = res.status, %err, "request rejected");
        Err(err)
    }

    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        let mut request = self.authorized(Method::GET, path)?;
        request.query = query.to_vec();
        self.execute(request).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let mut request = self.authorized(Method::POST, path)?;
        request.body = body;
        self.execute(request).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        let mut request = self.authorized(Method::PATCH, path)?;
        request.body = Some(body);
        self.execute(request).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        let request = self.authorized(Method::DELETE, path)?;
        self.execute(request).await
    }

    /// Exchange credentials for a token and start the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResp, ApiError> {
        let mut request = self.anonymous(Method::POST, LOGIN_PATH);
        let body = serde_json::to_value(LoginReq { email, password })
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
        request.body = Some(body);

        let body = self.execute(request).await?;
        let resp: LoginResp =
            serde_json::from_value(body).map_err(|err| ApiError::Decode(err.to_string()))?;
        if resp.token.trim().is_empty() {
            return Err(ApiError::Decode("login response carried an empty token".into()));
        }
        self.session
            .sign_in(&resp.token)
            .map_err(|err| ApiError::InvalidRequest(format!("failed to store token: {err}")))?;
        info!(email, "signed in");
        Ok(resp)
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.session
            .sign_out()
            .map_err(|err| ApiError::InvalidRequest(format!("failed to clear token: {err}")))
    }

    /// Profile of the signed-in user.
    pub async fn me(&self) -> Result<Value, ApiError> {
        self.get(ME_PATH, &[]).await
    }
}
