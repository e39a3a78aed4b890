//! In-process fakes for the polling source and notification sink.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use wsbwatch::error::{Error, Result};
use wsbwatch::model::{ChatId, Comment, Item, ItemKind, Submission, TrackedAccount};
use wsbwatch::registry::MemoryRegistry;
use wsbwatch::sink::{Delivery, NotificationSink};
use wsbwatch::source::{Cursor, PollingSource};
use wsbwatch::watch::{WatchConfig, WatchContext};

/// What a fake cursor does on its next poll.
#[derive(Debug, Clone)]
pub enum Step {
    Yield(Item),
    Fail(String),
    Panic,
}

type Key = (ItemKind, String);

#[derive(Default)]
struct Script {
    steps: HashMap<Key, VecDeque<Step>>,
    opens: HashMap<Key, usize>,
    polls: HashMap<Key, usize>,
    missing: HashSet<String>,
    exploding: HashSet<String>,
}

/// Scripted polling source. Steps queued for a (kind, redditor) are consumed
/// by whichever cursor is open for it; an empty script polls as "nothing new".
#[derive(Clone, Default)]
pub struct FakeSource {
    script: Arc<Mutex<Script>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: ItemKind, key: &str, step: Step) {
        self.script
            .lock()
            .unwrap()
            .steps
            .entry((kind, key.to_string()))
            .or_default()
            .push_back(step);
    }

    pub fn push_item(&self, key: &str, item: Item) {
        self.push(item.kind(), key, Step::Yield(item));
    }

    pub fn mark_missing(&self, key: &str) {
        self.script.lock().unwrap().missing.insert(key.to_string());
    }

    /// Make `account_exists` panic for `key`.
    pub fn explode_on_lookup(&self, key: &str) {
        self.script.lock().unwrap().exploding.insert(key.to_string());
    }

    pub fn opens(&self, kind: ItemKind, key: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.opens.get(&(kind, key.to_string())).copied().unwrap_or(0)
    }

    pub fn polls(&self, kind: ItemKind, key: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.polls.get(&(kind, key.to_string())).copied().unwrap_or(0)
    }

    pub fn pending(&self, kind: ItemKind, key: &str) -> usize {
        let script = self.script.lock().unwrap();
        script
            .steps
            .get(&(kind, key.to_string()))
            .map_or(0, |steps| steps.len())
    }
}

struct FakeCursor {
    key: Key,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Cursor for FakeCursor {
    async fn poll_next(&mut self) -> Result<Option<Item>> {
        let step = {
            let mut script = self.script.lock().unwrap();
            *script.polls.entry(self.key.clone()).or_default() += 1;
            script
                .steps
                .get_mut(&self.key)
                .and_then(|steps| steps.pop_front())
        };
        match step {
            None => Ok(None),
            Some(Step::Yield(item)) => Ok(Some(item)),
            Some(Step::Fail(reason)) => Err(Error::Source(reason)),
            Some(Step::Panic) => panic!("cursor exploded"),
        }
    }
}

#[async_trait]
impl PollingSource for FakeSource {
    async fn open_cursor(&self, kind: ItemKind, key: &str) -> Result<Box<dyn Cursor>> {
        let key = (kind, key.to_string());
        *self
            .script
            .lock()
            .unwrap()
            .opens
            .entry(key.clone())
            .or_default() += 1;
        Ok(Box::new(FakeCursor {
            key,
            script: self.script.clone(),
        }))
    }

    async fn account_exists(&self, key: &str) -> Result<bool> {
        let (missing, exploding) = {
            let script = self.script.lock().unwrap();
            (script.missing.contains(key), script.exploding.contains(key))
        };
        if exploding {
            panic!("lookup of {key} exploded");
        }
        Ok(!missing)
    }
}

/// Records every delivery.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(String, Vec<ChatId>)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<(String, Vec<ChatId>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages mentioning `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, message: &str, destinations: &[ChatId]) -> Vec<Delivery> {
        self.sent
            .lock()
            .unwrap()
            .push((message.to_string(), destinations.to_vec()));
        destinations.iter().map(|&chat| Delivery::ok(chat)).collect()
    }
}

/// Default timings, but a liveness hour that never comes.
pub fn test_config() -> WatchConfig {
    WatchConfig {
        liveness_hour: 99,
        ..WatchConfig::default()
    }
}

pub struct Harness {
    pub source: FakeSource,
    pub sink: RecordingSink,
    pub registry: Arc<MemoryRegistry>,
    pub ctx: WatchContext,
}

pub fn harness(accounts: impl IntoIterator<Item = TrackedAccount>) -> Harness {
    let source = FakeSource::new();
    let sink = RecordingSink::new();
    let registry = Arc::new(MemoryRegistry::with(accounts, &[ChatId(100), ChatId(200)]));
    let ctx = WatchContext::new(
        Arc::new(source.clone()),
        Arc::new(sink.clone()),
        registry.clone(),
        test_config(),
    );
    Harness {
        source,
        sink,
        registry,
        ctx,
    }
}

pub fn submission(id: &str, subreddit: &str, age: Duration) -> Item {
    Item::Submission(Submission {
        id: id.to_string(),
        subreddit: subreddit.to_string(),
        title: format!("DD for {id}"),
        url: format!("https://www.reddit.com/r/{subreddit}/comments/{id}/"),
        permalink: format!("/r/{subreddit}/comments/{id}/"),
        created: Utc::now() - age,
    })
}

pub fn comment(id: &str, subreddit: &str, is_submitter: bool) -> Item {
    Item::Comment(Comment {
        id: id.to_string(),
        subreddit: subreddit.to_string(),
        body: format!("comment {id}"),
        permalink: format!("/r/{subreddit}/comments/x/y/{id}/"),
        is_submitter,
        created: Utc::now() - Duration::minutes(10),
    })
}

/// Let virtual time pass so workers run their loops.
pub async fn advance(secs: u64) {
    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
}

/// Poll `check` once per virtual second until it holds, for at most `secs`.
pub async fn eventually(secs: u64, mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..secs {
        if check() {
            return true;
        }
        advance(1).await;
    }
    check()
}
