#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use points_market::{
    Embed, Member, MemoryStore, MessageId, NotificationSink, NotifyError, Points, PointsConfig,
    PointsService, PredictionView, ThreadId, UserId,
};

/// Everything a sink was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Post(String),
    Thread { thread: ThreadId, name: String },
    Send { thread: ThreadId, message: MessageId, text: String, view: PredictionView },
    Edit { message: MessageId, embed: Option<Embed>, view: Option<PredictionView> },
    Reply { message: MessageId, text: String },
}

/// A platform double that records calls and can simulate missing threads,
/// deleted messages and outages.
pub struct RecordingSink {
    next_id: AtomicU64,
    events: Mutex<Vec<SinkEvent>>,
    missing_threads: Mutex<HashSet<ThreadId>>,
    forbidden_threads: Mutex<HashSet<ThreadId>>,
    deleted_messages: Mutex<HashSet<MessageId>>,
    outage: AtomicBool,
    hold_posts: AtomicBool,
    post_entered: Notify,
    post_released: Notify,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Self::starting_at(1_000)
    }

    /// Ids handed out start at `first_id`, so two sinks never collide.
    pub fn starting_at(first_id: u64) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(first_id),
            events: Mutex::new(Vec::new()),
            missing_threads: Mutex::new(HashSet::new()),
            forbidden_threads: Mutex::new(HashSet::new()),
            deleted_messages: Mutex::new(HashSet::new()),
            outage: AtomicBool::new(false),
            hold_posts: AtomicBool::new(false),
            post_entered: Notify::new(),
            post_released: Notify::new(),
        })
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_outage(&self) -> Result<(), NotifyError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("platform down".into()));
        }
        Ok(())
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn delete_thread(&self, thread: ThreadId) {
        self.missing_threads.lock().unwrap().insert(thread);
    }

    pub fn forbid_thread(&self, thread: ThreadId) {
        self.forbidden_threads.lock().unwrap().insert(thread);
    }

    pub fn delete_message(&self, message: MessageId) {
        self.deleted_messages.lock().unwrap().insert(message);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Make the next `post` hang until [`RecordingSink::release_post`].
    pub fn hold_next_post(&self) {
        self.hold_posts.store(true, Ordering::SeqCst);
    }

    /// Wait until a held `post` is in flight.
    pub async fn post_held(&self) {
        self.post_entered.notified().await;
    }

    pub fn release_post(&self) {
        self.post_released.notify_one();
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Reply { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.replies().pop()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn post(&self, text: &str) -> Result<MessageId, NotifyError> {
        if self.hold_posts.swap(false, Ordering::SeqCst) {
            self.post_entered.notify_one();
            self.post_released.notified().await;
        }
        self.check_outage()?;
        self.record(SinkEvent::Post(text.to_string()));
        Ok(self.next())
    }

    async fn create_thread(&self, name: &str) -> Result<ThreadId, NotifyError> {
        self.check_outage()?;
        let thread = self.next();
        self.record(SinkEvent::Thread { thread, name: name.to_string() });
        Ok(thread)
    }

    async fn send(
        &self,
        thread: ThreadId,
        text: &str,
        _embed: &Embed,
        view: &PredictionView,
    ) -> Result<MessageId, NotifyError> {
        self.check_outage()?;
        let message = self.next();
        self.record(SinkEvent::Send {
            thread,
            message,
            text: text.to_string(),
            view: view.clone(),
        });
        Ok(message)
    }

    async fn edit(
        &self,
        message: MessageId,
        embed: Option<&Embed>,
        view: Option<&PredictionView>,
    ) -> Result<(), NotifyError> {
        self.check_outage()?;
        self.record(SinkEvent::Edit {
            message,
            embed: embed.cloned(),
            view: view.cloned(),
        });
        Ok(())
    }

    async fn reply(&self, message: MessageId, text: &str) -> Result<(), NotifyError> {
        self.check_outage()?;
        self.record(SinkEvent::Reply { message, text: text.to_string() });
        Ok(())
    }

    async fn resolve_thread(&self, thread: ThreadId) -> Result<ThreadId, NotifyError> {
        self.check_outage()?;
        if self.missing_threads.lock().unwrap().contains(&thread) {
            return Err(NotifyError::NotFound);
        }
        if self.forbidden_threads.lock().unwrap().contains(&thread) {
            return Err(NotifyError::Forbidden);
        }
        Ok(thread)
    }

    async fn fetch_message(
        &self,
        _thread: ThreadId,
        message: MessageId,
    ) -> Result<Option<MessageId>, NotifyError> {
        self.check_outage()?;
        if self.deleted_messages.lock().unwrap().contains(&message) {
            return Ok(None);
        }
        Ok(Some(message))
    }
}

pub fn member(id: UserId) -> Member {
    Member { id, display_name: format!("user{id}") }
}

/// A service over a fresh store seeded with `balances`.
pub fn service_with(
    balances: &[(UserId, Points)],
) -> (Arc<MemoryStore>, Arc<RecordingSink>, PointsService) {
    let store = Arc::new(MemoryStore::with_balances(balances.iter().copied()));
    let sink = RecordingSink::new();
    let service = PointsService::new(store.clone(), sink.clone(), PointsConfig::default());
    (store, sink, service)
}

/// A second process over the same store, as after a restart.
pub fn restart(store: &Arc<MemoryStore>, sink: &Arc<RecordingSink>) -> PointsService {
    PointsService::new(store.clone(), sink.clone(), PointsConfig::default())
}
