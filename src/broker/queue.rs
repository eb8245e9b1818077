//! The queue engine.
//!
//! A queue owns two message stores (priority and regular), an optional
//! redelivery ledger and a delivery tracker. Producers push into it,
//! consumers receive from its dispatch loop (or pull), and every transition
//! in between is decided by the queue's `DeliveryHandler`. The queue applies
//! those decisions: it saves, deletes, puts back and notifies producers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::consumer::{Acknowledge, Consumer, Delivery, PullRequest};
use super::context::BrokerContext;
use super::decision::{Decision, PutBack, Transmission};
use super::handler::DeliveryHandler;
use super::message::{CommitStatus, DELIVERY_COUNT_HEADER, Message, ProducerLink, QueueMessage, Receipt};
use super::options::{AckMode, CommitWhen, QueueOptions, QueueType};
use super::store::MessageStore;
use super::tracker::{DeliveryTracker, MessageDelivery, deadline_after};
use crate::persistence::{FlushMode, RedeliveryLedger};
use crate::utils::{BrokerError, Result};

/// Answer to a producer's push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Success,
    /// The queue reached its message limit.
    Full,
    /// The handler denied the message, or its id is already queued.
    NotAllowed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Active,
    Destroyed,
}

/// What the dispatch loop does after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// Something happened; look at the next message right away.
    Progress,
    /// Nothing can be sent now; wait for a push, a consumer or a timer.
    Idle,
}

#[derive(Debug)]
struct Delayed {
    due: Instant,
    message: QueueMessage,
    mode: PutBack,
}

#[derive(Debug)]
pub struct Queue {
    name: String,
    options: QueueOptions,
    handler: Arc<dyn DeliveryHandler>,
    context: Arc<BrokerContext>,
    regular: MessageStore,
    priority: MessageStore,
    ledger: Option<RedeliveryLedger>,
    tracker: DeliveryTracker,
    consumers: RwLock<Vec<Consumer>>,
    cursor: AtomicUsize,
    delayed: Mutex<VecDeque<Delayed>>,
    /// Ids the queue holds, from acceptance until the message finishes.
    owned: Mutex<HashSet<String>>,
    destroyed: AtomicBool,
    wake: Notify,
    dispatch_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// `<stem>.<suffix>.wal` next to the queue's main log.
fn companion_path(path: &Path, suffix: &str) -> PathBuf {
    path.with_extension(format!("{suffix}.wal"))
}

fn rejected(producer: &Option<ProducerLink>, result: PushResult) -> PushResult {
    if let Some(link) = producer {
        link.notify(CommitStatus::Failed);
    }
    result
}

impl Queue {
    /// Opens a queue whose main log lives at `path`. Persistent queues
    /// reload their messages, with delivery counts from the ledger, before
    /// this returns. Nothing runs until `start` is called.
    pub fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        options: QueueOptions,
        handler: Arc<dyn DeliveryHandler>,
        context: Arc<BrokerContext>,
    ) -> Result<Self> {
        let name = name.into();
        let path = path.into();

        let (regular, priority, ledger) = if options.is_persistent() {
            let log = options.log_options();
            let ledger = if options.use_redelivery {
                Some(RedeliveryLedger::open(companion_path(&path, "delivery"), log)?)
            } else {
                None
            };
            (
                MessageStore::persistent(&path, log)?,
                MessageStore::persistent(companion_path(&path, "priority"), log)?,
                ledger,
            )
        } else {
            (MessageStore::in_memory(), MessageStore::in_memory(), None)
        };

        let counts = match &ledger {
            Some(ledger) => ledger.load()?,
            None => HashMap::new(),
        };
        let restored = priority.load(&counts)? + regular.load(&counts)?;
        if restored > 0 {
            info!(queue = %name, restored, "Restored messages from disk");
        }
        let owned: HashSet<String> = priority.ids().into_iter().chain(regular.ids()).collect();

        Ok(Self {
            tracker: DeliveryTracker::new(options.ack_timeout()),
            name,
            options,
            handler,
            context,
            regular,
            priority,
            ledger,
            consumers: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            delayed: Mutex::new(VecDeque::new()),
            owned: Mutex::new(owned),
            destroyed: AtomicBool::new(false),
            wake: Notify::new(),
            dispatch_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the dispatch loop (except for pull queues), the acknowledgment
    /// sweep and, for persistent queues, the log maintenance task.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if self.options.queue_type != QueueType::Pull {
            tasks.push(tokio::spawn(self.clone().run_dispatch()));
        }
        tasks.push(tokio::spawn(self.clone().run_sweep()));
        if self.options.is_persistent() {
            tasks.push(tokio::spawn(self.clone().run_maintenance()));
        }
        debug!(queue = %self.name, tasks = tasks.len(), "Queue started");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn status(&self) -> QueueStatus {
        if self.is_destroyed() {
            QueueStatus::Destroyed
        } else {
            QueueStatus::Active
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Messages waiting for dispatch, including delayed put-backs.
    pub fn message_count(&self) -> usize {
        self.priority.count() + self.regular.count() + self.lock_delayed().len()
    }

    /// Deliveries waiting for an acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Ids of the waiting messages in dispatch order.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids = self.priority.ids();
        ids.extend(self.regular.ids());
        ids
    }

    pub fn consumer_count(&self) -> usize {
        self.read_consumers().len()
    }

    fn read_consumers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Consumer>> {
        self.consumers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_consumers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Consumer>> {
        self.consumers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_delayed(&self) -> MutexGuard<'_, VecDeque<Delayed>> {
        self.delayed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn report(&self, err: &BrokerError) {
        self.context.report(&self.name, err);
    }

    fn store_for(&self, message: &QueueMessage) -> &MessageStore {
        if message.is_high_priority() {
            &self.priority
        } else {
            &self.regular
        }
    }

    fn lock_owned(&self) -> MutexGuard<'_, HashSet<String>> {
        self.owned.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims `id` for a new message. Fails while another message with the
    /// same id is queued, delayed or in flight.
    fn reserve(&self, id: &str) -> bool {
        self.lock_owned().insert(id.to_string())
    }

    fn release(&self, id: &str) {
        self.lock_owned().remove(id);
    }

    /// Attaches a consumer and wakes the dispatch loop.
    pub fn add_consumer(&self, consumer: Consumer) -> Result<()> {
        if self.is_destroyed() {
            return Err(BrokerError::QueueDestroyed(self.name.clone()));
        }
        info!(queue = %self.name, consumer = %consumer.id, "Consumer attached");
        self.write_consumers().push(consumer);
        self.wake.notify_one();
        Ok(())
    }

    /// Detaches a consumer. Deliveries it still owes an acknowledgment for
    /// resolve through the timeout sweep.
    pub fn remove_consumer(&self, consumer_id: &str) -> bool {
        let mut consumers = self.write_consumers();
        let before = consumers.len();
        consumers.retain(|c| c.id != consumer_id);
        let removed = consumers.len() != before;
        drop(consumers);

        if removed {
            info!(queue = %self.name, consumer = %consumer_id, "Consumer detached");
            self.wake.notify_one();
        }
        removed
    }

    /// Pushes a message without waiting for a commit.
    pub fn push(&self, message: Message) -> PushResult {
        self.accept(message, None)
    }

    /// Pushes a message and returns a receipt that resolves according to the
    /// queue's commit policy.
    pub fn push_with_receipt(&self, message: Message) -> (PushResult, Receipt) {
        let (link, receipt) = ProducerLink::channel();
        (self.accept(message, Some(link)), receipt)
    }

    fn accept(&self, mut message: Message, producer: Option<ProducerLink>) -> PushResult {
        if self.is_destroyed() {
            return rejected(&producer, PushResult::Error);
        }

        if message.message_id.is_empty() {
            message.message_id = Uuid::new_v4().to_string();
        }
        message.timestamp = chrono::Utc::now().timestamp_millis();

        let limit = self.options.message_limit;
        if limit > 0 && self.message_count() >= limit {
            let err = self.rejection(format!("limit of {limit} messages reached"));
            debug!(message_id = %message.message_id, "{err}");
            return rejected(&producer, PushResult::Full);
        }
        if !self.reserve(&message.message_id) {
            let err = self.rejection(format!("duplicate id {}", message.message_id));
            warn!("{err}");
            return rejected(&producer, PushResult::NotAllowed);
        }

        let mut message = QueueMessage::new(message);
        message.producer = producer;

        let decision = match self.handler.received_from_producer(self, &message) {
            Ok(decision) => decision,
            Err(e) => {
                self.report(&e);
                self.release(message.id());
                message.notify_producer(CommitStatus::Failed);
                return PushResult::Error;
            }
        };
        if !decision.allow {
            debug!(queue = %self.name, message_id = %message.id(), "Message denied by handler");
            self.release(message.id());
            message.notify_producer(CommitStatus::Failed);
            return PushResult::NotAllowed;
        }

        let store = self.store_for(&message);
        if decision.save {
            if let Err(e) = store.save(&mut message) {
                warn!(queue = %self.name, message_id = %message.id(), error = %e, "Failed to save message");
                self.report(&e);
                if self.options.commit_when == CommitWhen::AfterSaved {
                    self.release(message.id());
                    message.notify_producer(CommitStatus::Failed);
                    return PushResult::Error;
                }
            }
        }

        self.transmit(&message, decision.transmission);
        debug!(queue = %self.name, message_id = %message.id(), saved = message.is_saved, "Message accepted");
        store.put(message);
        self.wake.notify_one();
        PushResult::Success
    }

    fn rejection(&self, reason: String) -> BrokerError {
        BrokerError::ProducerRejected {
            queue: self.name.clone(),
            reason,
        }
    }

    fn transmit(&self, message: &QueueMessage, transmission: Transmission) {
        match transmission {
            Transmission::None => {}
            Transmission::Commit => message.notify_producer(CommitStatus::Committed),
            Transmission::Failed => message.notify_producer(CommitStatus::Failed),
        }
    }

    fn next_message(&self) -> Option<QueueMessage> {
        self.priority
            .take_next()
            .or_else(|| self.regular.take_next())
    }

    /// Connected consumers. Consumers whose channel closed are detached.
    fn online_consumers(&self) -> Vec<Consumer> {
        let (online, gone): (Vec<Consumer>, Vec<Consumer>) = self
            .read_consumers()
            .iter()
            .cloned()
            .partition(Consumer::is_connected);

        for consumer in gone {
            self.remove_consumer(&consumer.id);
        }
        online
    }

    fn accepts(&self, message: &QueueMessage, consumer: &Consumer) -> bool {
        match self.handler.can_consumer_receive(self, message, consumer) {
            Ok(decision) => decision.allow,
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    fn select_receivers(&self, message: &QueueMessage, consumers: &[Consumer]) -> Vec<Consumer> {
        if self.options.queue_type != QueueType::RoundRobin {
            return consumers
                .iter()
                .filter(|c| self.accepts(message, c))
                .cloned()
                .collect();
        }

        let len = consumers.len();
        let start = self.cursor.load(Ordering::Relaxed) % len;
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| self.accepts(message, &consumers[i]))
            .map(|i| {
                self.cursor.store(i + 1, Ordering::Relaxed);
                vec![consumers[i].clone()]
            })
            .unwrap_or_default()
    }

    /// Bumps the delivery count, records it and consults the handler.
    fn begin_send(&self, mut message: QueueMessage) -> ControlFlow<Dispatch, QueueMessage> {
        message.delivery_count += 1;
        message.send_count = 0;
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.set(message.id(), message.delivery_count) {
                warn!(queue = %self.name, message_id = %message.id(), error = %e, "Failed to record delivery count");
                self.report(&e);
            }
        }
        if message.delivery_count > 1 {
            message.message.headers.insert(
                DELIVERY_COUNT_HEADER.to_string(),
                message.delivery_count.to_string(),
            );
        }

        match self.handler.begin_send(self, &message) {
            Ok(decision) if decision.allow => ControlFlow::Continue(message),
            Ok(decision) => {
                debug!(queue = %self.name, message_id = %message.id(), "Send denied by handler");
                ControlFlow::Break(self.settle(message, decision))
            }
            Err(e) => {
                self.report(&e);
                self.put_back(message, PutBack::Regular);
                ControlFlow::Break(Dispatch::Idle)
            }
        }
    }

    fn send_to(&self, message: &mut QueueMessage, receivers: &[Consumer]) {
        let ack_required = self.options.ack_mode.requires_ack();
        for consumer in receivers {
            let delivery = Delivery {
                queue: self.name.clone(),
                message: message.message.clone(),
                ack_required,
            };
            match consumer.send(delivery) {
                Ok(()) => message.send_count += 1,
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "Dropping unreachable consumer");
                    self.remove_consumer(&consumer.id);
                }
            }
        }
    }

    /// Nothing reached a consumer. The message goes back to the head of its
    /// store, except on broadcast queues where it is dropped.
    fn unsent(&self, message: QueueMessage) -> Dispatch {
        if self.options.queue_type == QueueType::Broadcast {
            debug!(queue = %self.name, message_id = %message.id(), "No consumer received broadcast, dropping");
            self.finish(message);
            return Dispatch::Progress;
        }
        self.store_for(&message).put_front(message);
        Dispatch::Idle
    }

    /// Registers the delivery before it is sent, so an acknowledgment can
    /// never arrive ahead of it.
    fn track(&self, message: &QueueMessage, consumers: Vec<String>) -> Option<Arc<Notify>> {
        if !self.options.ack_mode.requires_ack() {
            return None;
        }
        debug!(queue = %self.name, message_id = %message.id(), consumers = ?consumers, "Waiting for acknowledge");
        Some(self.tracker.track(message.clone(), consumers))
    }

    /// Ends a send attempt that reached at least one consumer. A tracked
    /// message stays with the tracker until it resolves.
    fn end_send(&self, message: QueueMessage, tracked: bool) {
        let decision = match self.handler.end_send(self, &message) {
            Ok(decision) => decision,
            Err(e) if tracked => {
                if let Some(delivery) = self.tracker.cancel(message.id()) {
                    self.resolve(delivery, Err(e));
                }
                return;
            }
            Err(e) => {
                self.report(&e);
                self.put_back(message, PutBack::Regular);
                return;
            }
        };

        self.transmit(&message, decision.transmission);
        if !tracked {
            self.settle(message, decision);
        }
    }

    /// Applies the put-back part of a decision.
    fn settle(&self, message: QueueMessage, decision: Decision) -> Dispatch {
        match decision.put_back {
            PutBack::No => {
                self.finish(message);
                Dispatch::Progress
            }
            mode => {
                self.put_back(message, mode);
                Dispatch::Idle
            }
        }
    }

    fn put_back(&self, mut message: QueueMessage, mode: PutBack) {
        message.send_count = 0;
        if self.is_destroyed() {
            debug!(queue = %self.name, message_id = %message.id(), "Queue closed, message left on disk");
            return;
        }
        match self.options.put_back_delay() {
            Some(delay) => self.lock_delayed().push_back(Delayed {
                due: deadline_after(delay),
                message,
                mode,
            }),
            None => self.place(message, mode),
        }
    }

    fn place(&self, message: QueueMessage, mode: PutBack) {
        let store = self.store_for(&message);
        match mode {
            PutBack::Priority => store.put_front(message),
            _ => store.put(message),
        }
    }

    /// Moves delayed put-backs whose delay elapsed into their stores.
    fn release_due(&self, now: Instant) -> usize {
        let mut delayed = self.lock_delayed();
        let mut released = 0;
        while delayed.front().is_some_and(|d| d.due <= now) {
            if let Some(entry) = delayed.pop_front() {
                self.place(entry.message, entry.mode);
                released += 1;
            }
        }
        released
    }

    fn next_due(&self) -> Option<Instant> {
        self.lock_delayed().front().map(|d| d.due)
    }

    /// The message is done: its persisted copy and ledger entry go away.
    fn finish(&self, mut message: QueueMessage) {
        message.is_removed = true;
        if message.is_saved {
            if let Err(e) = self.store_for(&message).delete_saved(message.id()) {
                warn!(queue = %self.name, message_id = %message.id(), error = %e, "Failed to delete message");
                self.report(&e);
            }
        }
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.remove(message.id()) {
                warn!(queue = %self.name, message_id = %message.id(), error = %e, "Failed to clear delivery count");
                self.report(&e);
            }
        }
        self.release(message.id());
        debug!(queue = %self.name, message_id = %message.id(), deliveries = message.delivery_count, "Message finished");
    }

    /// Applies the handler's answer to a tracked delivery, then wakes
    /// whoever waits on it.
    fn resolve(&self, delivery: MessageDelivery, decision: Result<Decision>) {
        let decision = decision.unwrap_or_else(|e| {
            self.report(&e);
            Decision::put_back(PutBack::Regular)
        });

        self.transmit(&delivery.message, decision.transmission);
        self.settle(delivery.message.clone(), decision);
        delivery.notify_resolved();
        self.wake.notify_one();
    }

    /// Handles a consumer's acknowledgment. Returns `false` when the
    /// delivery is unknown or already resolved.
    pub fn acknowledge_delivered(&self, consumer_id: &str, ack: &Acknowledge) -> bool {
        let Some(delivery) = self.tracker.process(consumer_id, &ack.message_id) else {
            debug!(queue = %self.name, message_id = %ack.message_id, consumer = %consumer_id, "No pending delivery for acknowledge");
            return false;
        };

        debug!(
            queue = %self.name,
            message_id = %ack.message_id,
            consumer = %consumer_id,
            success = ack.success,
            reason = ?ack.reason,
            "Delivery acknowledged"
        );
        let decision = self.handler.acknowledge_received(self, &delivery, ack);
        self.resolve(delivery, decision);
        true
    }

    /// Hands up to `request.count` messages to `consumer`. Only valid on
    /// pull queues.
    pub async fn pull(&self, consumer: &Consumer, request: PullRequest) -> Result<Vec<Delivery>> {
        if self.options.queue_type != QueueType::Pull {
            return Err(BrokerError::InvalidQueueType {
                queue: self.name.clone(),
                operation: "pull".to_string(),
            });
        }
        if self.is_destroyed() {
            return Err(BrokerError::QueueDestroyed(self.name.clone()));
        }

        let _guard = self.dispatch_lock.lock().await;
        self.release_due(Instant::now());

        let ack_required = self.options.ack_mode.requires_ack();
        let mut deliveries = Vec::new();
        while deliveries.len() < request.count {
            let Some(message) = self.next_message() else {
                break;
            };
            if !self.accepts(&message, consumer) {
                self.store_for(&message).put_front(message);
                break;
            }
            let ControlFlow::Continue(mut message) = self.begin_send(message) else {
                break;
            };

            let tracked = self.track(&message, vec![consumer.id.clone()]).is_some();
            message.send_count = 1;
            deliveries.push(Delivery {
                queue: self.name.clone(),
                message: message.message.clone(),
                ack_required,
            });
            self.end_send(message, tracked);
        }

        debug!(queue = %self.name, consumer = %consumer.id, count = deliveries.len(), "Pulled messages");
        Ok(deliveries)
    }

    async fn run_dispatch(self: Arc<Self>) {
        debug!(queue = %self.name, "Dispatch loop started");
        while !self.cancel.is_cancelled() {
            if self.dispatch_once().await == Dispatch::Progress {
                tokio::task::yield_now().await;
                continue;
            }

            let due = self.next_due();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = sleep_until(due) => {}
            }
        }
        debug!(queue = %self.name, "Dispatch loop stopped");
    }

    async fn dispatch_once(&self) -> Dispatch {
        let _guard = self.dispatch_lock.lock().await;
        self.release_due(Instant::now());

        let Some(message) = self.next_message() else {
            return Dispatch::Idle;
        };

        let consumers = self.online_consumers();
        if consumers.is_empty() {
            return self.unsent(message);
        }

        let receivers = self.select_receivers(&message, &consumers);
        if receivers.is_empty() {
            return self.unsent(message);
        }

        let mut message = match self.begin_send(message) {
            ControlFlow::Continue(message) => message,
            ControlFlow::Break(outcome) => return outcome,
        };

        let ids = receivers.iter().map(|c| c.id.clone()).collect();
        let resolved = self.track(&message, ids);
        self.send_to(&mut message, &receivers);
        if message.send_count == 0 {
            if resolved.is_some() && self.tracker.cancel(message.id()).is_none() {
                return Dispatch::Progress;
            }
            return self.unsent(message);
        }

        self.end_send(message, resolved.is_some());
        if let Some(resolved) = resolved.filter(|_| self.options.ack_mode == AckMode::WaitForAcknowledge) {
            tokio::select! {
                _ = resolved.notified() => {}
                _ = self.cancel.cancelled() => {}
            }
        }
        Dispatch::Progress
    }

    /// One pass of the periodic sweep: overdue acknowledgments, expired
    /// messages, delayed put-backs and a retry of waiting messages.
    pub fn sweep(&self) {
        let now = Instant::now();

        for delivery in self.tracker.sweep(now) {
            let timeout = BrokerError::AcknowledgeTimeout {
                message_id: delivery.message_id().to_string(),
            };
            info!(queue = %self.name, consumers = ?delivery.consumers, "{timeout}");
            let decision = self.handler.acknowledge_timeout(self, &delivery);
            self.resolve(delivery, decision);
        }

        if let Some(cutoff) = self
            .options
            .message_timeout()
            .and_then(|timeout| now.checked_sub(timeout))
        {
            for store in [&self.priority, &self.regular] {
                for message in store.take_received_before(cutoff) {
                    info!(queue = %self.name, message_id = %message.id(), "Message expired before delivery");
                    message.notify_producer(CommitStatus::Failed);
                    self.finish(message);
                }
            }
        }

        // Waiting messages get another dispatch attempt each pass, so a send
        // that was denied or failed in the handler is retried.
        let released = self.release_due(now);
        if released > 0 || self.priority.count() + self.regular.count() > 0 {
            self.wake.notify_one();
        }
    }

    async fn run_sweep(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.context.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.sweep(),
            }
        }
        debug!(queue = %self.name, "Sweep stopped");
    }

    /// Flushes buffered logs and shrinks the ones with enough dead records.
    pub fn maintain(&self) {
        if self.options.flush == FlushMode::Buffered {
            let flushed = [
                self.regular.flush(),
                self.priority.flush(),
                self.ledger.as_ref().map_or(Ok(()), |l| l.flush()),
            ];
            for e in flushed.into_iter().filter_map(|r| r.err()) {
                warn!(queue = %self.name, error = %e, "Flush failed");
                self.report(&e);
            }
        }

        let threshold = self.options.shrink_threshold;
        for store in [&self.regular, &self.priority] {
            if !store.needs_shrink(threshold) {
                continue;
            }
            match store.shrink() {
                Ok(Some(stats)) => info!(
                    queue = %self.name,
                    live = stats.live_records,
                    bytes_before = stats.bytes_before,
                    bytes_after = stats.bytes_after,
                    "Shrank message log"
                ),
                Ok(None) => {}
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "Shrink failed");
                    self.report(&e);
                }
            }
        }

        if let Some(ledger) = self.ledger.as_ref().filter(|l| l.needs_shrink(threshold)) {
            match ledger.shrink() {
                Ok(stats) => info!(queue = %self.name, live = stats.live_records, "Shrank delivery ledger"),
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "Ledger shrink failed");
                    self.report(&e);
                }
            }
        }
    }

    async fn run_maintenance(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.context.maintenance_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let queue = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || queue.maintain()).await {
                error!(queue = %self.name, error = %e, "Maintenance task failed");
            }
        }
        debug!(queue = %self.name, "Maintenance stopped");
    }

    /// Stops the queue and closes its files. Outstanding deliveries resolve
    /// as timed out first, so put-back messages stay on disk for the next
    /// start. Calling it twice is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(queue = %self.name, "Shutting down queue");

        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(queue = %self.name, error = %e, "Queue task failed");
            }
        }

        for delivery in self.tracker.mark_all_expired() {
            let decision = self.handler.acknowledge_timeout(self, &delivery);
            self.resolve(delivery, decision);
        }

        self.lock_delayed().clear();
        self.lock_owned().clear();
        self.regular.clear();
        self.priority.clear();

        let closed = [
            self.regular.close(),
            self.priority.close(),
            self.ledger.as_ref().map_or(Ok(()), |l| l.close()),
        ];
        closed.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    /// Shuts the queue down and removes its files.
    pub async fn destroy(&self) -> Result<()> {
        let closed = self.shutdown().await;
        self.regular.destroy()?;
        self.priority.destroy()?;
        if let Some(ledger) = &self.ledger {
            ledger.destroy()?;
        }
        info!(queue = %self.name, "Queue destroyed");
        closed
    }
}

async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
