//! Reddit polling source over the OAuth JSON API.
//!
//! Uses app-only (client credentials) auth. A cursor snapshots the listing
//! when it is opened so only items created afterwards are yielded, then
//! re-fetches the listing whenever its buffer runs dry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RedditCredentials;
use crate::error::{Error, Result};
use crate::model::{Comment, Item, ItemKind, Submission, is_valid_redditor_name};
use crate::source::{Cursor, PollingSource};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const LISTING_LIMIT: usize = 100;
/// How many fullnames a cursor remembers.
const SEEN_CAPACITY: usize = 301;
/// Refresh the token this long before Reddit says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

struct AccessToken {
    value: String,
    expires_at: Instant,
}

struct Inner {
    http: reqwest::Client,
    credentials: RedditCredentials,
    token: Mutex<Option<AccessToken>>,
}

/// Reddit API client. Cheap to clone.
#[derive(Clone)]
pub struct RedditClient {
    inner: Arc<Inner>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                credentials,
                token: Mutex::new(None),
            }),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.inner.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let creds = &self.inner.credentials;
        let response: TokenResponse = self
            .inner
            .http
            .post(AUTH_URL)
            .basic_auth(&creds.client_id, Some(creds.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(expires_in = response.expires_in, "reddit access token refreshed");
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_SLACK);
        let value = response.access_token;
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    /// Fetch the newest items of a redditor's listing, newest first.
    pub async fn listing(&self, kind: ItemKind, key: &str) -> Result<Vec<Item>> {
        check_name(key)?;
        let path = match kind {
            ItemKind::Submission => "submitted",
            ItemKind::Comment => "comments",
        };
        let token = self.access_token().await?;
        let body: serde_json::Value = self
            .inner
            .http
            .get(format!("{API_BASE}/user/{key}/{path}"))
            .bearer_auth(token)
            .query(&[
                ("limit", LISTING_LIMIT.to_string()),
                ("raw_json", "1".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_listing(kind, body)
    }
}

#[async_trait]
impl PollingSource for RedditClient {
    async fn open_cursor(&self, kind: ItemKind, key: &str) -> Result<Box<dyn Cursor>> {
        let existing = self.listing(kind, key).await?;
        let mut seen = SeenSet::new(SEEN_CAPACITY);
        // Oldest first so the newest survive eviction.
        for item in existing.iter().rev() {
            seen.insert(item.id());
        }
        Ok(Box::new(RedditCursor {
            client: self.clone(),
            kind,
            key: key.to_string(),
            seen,
            pending: VecDeque::new(),
        }))
    }

    async fn account_exists(&self, key: &str) -> Result<bool> {
        check_name(key)?;
        let token = self.access_token().await?;
        let response = self
            .inner
            .http
            .get(format!("{API_BASE}/user/{key}/about"))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }
}

/// Usernames are interpolated into request paths.
fn check_name(key: &str) -> Result<()> {
    if is_valid_redditor_name(key) {
        Ok(())
    } else {
        Err(Error::Source(format!("invalid redditor name {key:?}")))
    }
}

struct RedditCursor {
    client: RedditClient,
    kind: ItemKind,
    key: String,
    seen: SeenSet,
    pending: VecDeque<Item>,
}

#[async_trait]
impl Cursor for RedditCursor {
    async fn poll_next(&mut self) -> Result<Option<Item>> {
        if let Some(item) = self.pending.pop_front() {
            return Ok(Some(item));
        }

        let listing = self.client.listing(self.kind, &self.key).await?;
        for item in listing.into_iter().rev() {
            if self.seen.insert(item.id()) {
                self.pending.push_back(item);
            }
        }
        Ok(self.pending.pop_front())
    }
}

/// Insertion-ordered set that forgets its oldest entries past `capacity`.
struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` if `id` was not already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// Listing JSON
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSubmission {
    name: String,
    subreddit: String,
    title: String,
    url: String,
    permalink: String,
    created_utc: f64,
}

#[derive(Deserialize)]
struct RawComment {
    name: String,
    subreddit: String,
    body: String,
    permalink: String,
    #[serde(default)]
    is_submitter: bool,
    created_utc: f64,
}

fn timestamp(created_utc: f64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(created_utc as i64, 0)
        .ok_or_else(|| Error::Source(format!("invalid created_utc {created_utc}")))
}

/// Decode a Reddit listing response into items of `kind`.
pub fn parse_listing(kind: ItemKind, body: serde_json::Value) -> Result<Vec<Item>> {
    let listing: Listing = serde_json::from_value(body)
        .map_err(|e| Error::Source(format!("malformed listing: {e}")))?;

    listing
        .data
        .children
        .into_iter()
        .map(|thing| {
            let decode_err = |e: serde_json::Error| Error::Source(format!("malformed {kind}: {e}"));
            match kind {
                ItemKind::Submission => {
                    let raw: RawSubmission =
                        serde_json::from_value(thing.data).map_err(decode_err)?;
                    Ok(Item::Submission(Submission {
                        id: raw.name,
                        subreddit: raw.subreddit,
                        title: raw.title,
                        url: raw.url,
                        permalink: raw.permalink,
                        created: timestamp(raw.created_utc)?,
                    }))
                }
                ItemKind::Comment => {
                    let raw: RawComment = serde_json::from_value(thing.data).map_err(decode_err)?;
                    Ok(Item::Comment(Comment {
                        id: raw.name,
                        subreddit: raw.subreddit,
                        body: raw.body,
                        permalink: raw.permalink,
                        is_submitter: raw.is_submitter,
                        created: timestamp(raw.created_utc)?,
                    }))
                }
            }
        })
        .collect()
}
