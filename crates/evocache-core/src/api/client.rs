//! API client for communicating with the EVO REST backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests for goals, courses and the user profile. Authorized requests
//! that come back 401 are retried once after a token refresh; concurrent
//! 401s share a single refresh.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{Session, SessionData};
use crate::models::{Course, CourseProgress, Goal, GoalProgress, ProfileUpdate, UserCourse, UserProfile};

use super::{ApiError, Backend};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    user: UserProfile,
    #[serde(rename = "accessToken", alias = "access_token")]
    access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token", default)]
    refresh_token: Option<String>,
}

/// Session plus a counter bumped every time the access token changes.
/// Requests remember the epoch they were sent with, so a 401 can tell
/// whether someone else already refreshed.
struct TokenState {
    session: Session,
    epoch: u64,
}

/// API client for the EVO backend.
/// Clone is cheap - clones share the connection pool, session and refresh lock.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<Mutex<TokenState>>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:3001/api`).
    pub fn new(base_url: &str, session: Session) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens: Arc::new(Mutex::new(TokenState { session, epoch: 0 })),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared HTTP client, e.g. for a health probe.
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// Default health endpoint for this backend.
    pub fn health_url(&self) -> String {
        self.url("/health")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_tokens().session.is_authenticated()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock_tokens().session.user().cloned()
    }

    fn current_token(&self) -> Result<(String, u64), ApiError> {
        let state = self.lock_tokens();
        let token = state
            .session
            .access_token()
            .ok_or(ApiError::NotAuthenticated)?
            .to_string();
        Ok((token, state.epoch))
    }

    fn clear_session(&self) {
        let mut state = self.lock_tokens();
        state.epoch += 1;
        if let Err(e) = state.session.clear() {
            warn!(error = %e, "Failed to remove session file");
        }
    }

    fn store_session(&self, data: SessionData) {
        let mut state = self.lock_tokens();
        state.session.update(data);
        state.epoch += 1;
        if let Err(e) = state.session.save() {
            warn!(error = %e, "Failed to save session");
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }

    // ===== Authentication =====

    async fn authenticate(&self, path: &str, body: serde_json::Value) -> Result<UserProfile, ApiError> {
        let url = self.url(path);
        let response = self.client.post(&url).json(&body).send().await?;
        let response = Self::check_response(response).await?;
        let auth: AuthResponse = Self::parse(response, &url).await?;

        self.store_session(SessionData::new(
            auth.access_token,
            auth.refresh_token,
            Some(auth.user.clone()),
        ));
        Ok(auth.user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let user = self
            .authenticate("/auth/login", json!({ "email": email, "password": password }))
            .await?;
        info!(user_id = user.id, "Login successful");
        Ok(user)
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<UserProfile, ApiError> {
        let user = self
            .authenticate(
                "/auth/register",
                json!({ "email": email, "password": password, "name": name }),
            )
            .await?;
        info!(user_id = user.id, "Registration successful");
        Ok(user)
    }

    pub fn logout(&self) {
        self.clear_session();
        info!("Logged out");
    }

    /// Refresh the access token now.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let epoch = self.lock_tokens().epoch;
        self.refresh_after(epoch).await.map(|_| ())
    }

    /// Refresh the access token unless it already changed since `seen_epoch`.
    /// Only one refresh runs at a time; callers queued behind it reuse its
    /// result. A failed refresh clears the session.
    async fn refresh_after(&self, seen_epoch: u64) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let state = self.lock_tokens();
            if state.epoch != seen_epoch {
                debug!("Token already refreshed by another request");
                return state
                    .session
                    .access_token()
                    .map(str::to_string)
                    .ok_or(ApiError::SessionExpired);
            }
            state
                .session
                .refresh_token()
                .map(str::to_string)
                .ok_or(ApiError::SessionExpired)?
        };

        match self.request_refresh(&refresh_token).await {
            Ok(refreshed) => {
                let mut state = self.lock_tokens();
                state
                    .session
                    .update_tokens(refreshed.access_token.clone(), refreshed.refresh_token);
                state.epoch += 1;
                if let Err(e) = state.session.save() {
                    warn!(error = %e, "Failed to save refreshed session");
                }
                debug!("Access token refreshed");
                Ok(refreshed.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear_session();
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let url = self.url("/auth/refresh");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse(response, &url).await
    }

    // ===== Request plumbing =====

    /// Send an authorized request, refreshing once on 401 and backing off on 429.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let (mut token, epoch) = self.current_token()?;
        let mut refreshed = false;
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.client.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            match status.as_u16() {
                401 if !refreshed => {
                    debug!(url = %url, "Unauthorized, refreshing token");
                    token = self.refresh_after(epoch).await?;
                    refreshed = true;
                }
                401 => {
                    warn!(url = %url, "Still unauthorized after refresh, clearing session");
                    self.clear_session();
                    return Err(ApiError::SessionExpired);
                }
                429 => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::from_status(status, &body));
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, None).await?;
        Self::parse(response, path).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(method, path, Some(&body)).await?;
        Self::parse(response, path).await
    }

    /// Send a request whose response body is not needed.
    async fn send(&self, method: Method, path: &str) -> Result<(), ApiError> {
        self.execute(method, path, None).await.map(|_| ())
    }

    // ===== Goals =====

    pub async fn fetch_goals(&self) -> Result<Vec<Goal>, ApiError> {
        self.get("/goals").await
    }

    pub async fn fetch_goal_progress(&self) -> Result<Vec<GoalProgress>, ApiError> {
        self.get("/goals/progress").await
    }

    /// Mark today's tasks of a goal as done.
    pub async fn complete_goal_day(&self, progress_id: i64) -> Result<(), ApiError> {
        self.send(Method::POST, &format!("/goals/progress/{}/complete", progress_id))
            .await
    }

    // ===== Courses =====

    pub async fn fetch_course(&self, course_id: i64) -> Result<Course, ApiError> {
        self.get(&format!("/courses/{}", course_id)).await
    }

    pub async fn fetch_course_progress(&self, course_id: i64) -> Result<CourseProgress, ApiError> {
        self.get(&format!("/courses/{}/progress", course_id)).await
    }

    pub async fn fetch_my_courses(&self) -> Result<Vec<UserCourse>, ApiError> {
        self.get("/courses/my/courses").await
    }

    pub async fn complete_lesson(&self, course_id: i64, lesson_id: i64) -> Result<(), ApiError> {
        self.send(
            Method::POST,
            &format!("/courses/{}/lesson/{}/complete", course_id, lesson_id),
        )
        .await
    }

    pub async fn complete_course(&self, course_id: i64) -> Result<(), ApiError> {
        self.send(Method::POST, &format!("/courses/{}/complete", course_id))
            .await
    }

    pub async fn enroll(&self, course_id: i64) -> Result<(), ApiError> {
        self.send(Method::POST, &format!("/courses/{}/enroll", course_id))
            .await
    }

    pub async fn unenroll(&self, course_id: i64) -> Result<(), ApiError> {
        self.send(Method::DELETE, &format!("/courses/{}/unenroll", course_id))
            .await
    }

    // ===== Profile =====

    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        self.get("/users/profile").await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        self.send_json(Method::PUT, "/users/profile", update).await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn fetch_goals(&self) -> Result<Vec<Goal>, ApiError> {
        ApiClient::fetch_goals(self).await
    }

    async fn fetch_goal_progress(&self) -> Result<Vec<GoalProgress>, ApiError> {
        ApiClient::fetch_goal_progress(self).await
    }

    async fn fetch_my_courses(&self) -> Result<Vec<UserCourse>, ApiError> {
        ApiClient::fetch_my_courses(self).await
    }

    async fn fetch_course(&self, course_id: i64) -> Result<Course, ApiError> {
        ApiClient::fetch_course(self, course_id).await
    }
}

// ============================================================================
// Tests
// ============================================================================
