use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserProfile;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Option<UserProfile>,
    pub created_at: DateTime<Utc>,
    /// Last time the access token was replaced through a refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn new(access_token: String, refresh_token: String, user: Option<UserProfile>) -> Self {
        Self {
            access_token,
            refresh_token,
            user,
            created_at: Utc::now(),
            refreshed_at: None,
        }
    }
}

pub struct Session {
    cache_dir: PathBuf,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: None,
        }
    }

    /// Load session from disk. Returns whether a session was found.
    pub fn load(&mut self) -> Result<bool> {
        let path = self.session_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read session file")?;
            let data: SessionData = serde_json::from_str(&contents)
                .context("Failed to parse session file")?;
            self.data = Some(data);
            return Ok(true);
        }
        Ok(false)
    }

    /// Save session to disk
    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            let path = self.session_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Clear session data
    pub fn clear(&mut self) -> Result<()> {
        self.data = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Update session with new data
    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    /// Replace the tokens after a refresh. A missing refresh token keeps the
    /// old one, since some backends only rotate the access token.
    pub fn update_tokens(&mut self, access_token: String, refresh_token: Option<String>) {
        if let Some(ref mut data) = self.data {
            data.access_token = access_token;
            if let Some(refresh_token) = refresh_token {
                data.refresh_token = refresh_token;
            }
            data.refreshed_at = Some(Utc::now());
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.refresh_token.as_str())
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.data.as_ref().and_then(|d| d.user.as_ref())
    }

    /// Both tokens are present.
    pub fn is_authenticated(&self) -> bool {
        self.data
            .as_ref()
            .map(|d| !d.access_token.is_empty() && !d.refresh_token.is_empty())
            .unwrap_or(false)
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}
