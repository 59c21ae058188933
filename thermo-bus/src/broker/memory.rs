/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process broker with fanout routing.
//!
//! A [`MemoryBroker`] plays the server; every [`MemorySession`] obtained from
//! [`MemoryBroker::connect`] plays one client connection with one channel.
//! Modelled behaviour:
//!
//! * exchanges are fanout: a publication is copied to every bound queue and
//!   dropped when no queue is bound;
//! * re-declaring an exchange, queue or binding is a no-op;
//! * an exclusive queue belongs to the declaring session, is refused to
//!   everyone else (`RESOURCE_LOCKED`) and is deleted when that session
//!   closes;
//! * deliveries stay unacked until acked or rejected; when a session closes
//!   its unacked deliveries go back to the front of their queue with the
//!   redelivered flag set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Broker, BrokerError, Delivery, DeliveryStream, QueueInfo, QueueOptions};
use crate::lifecycle::{ConnectionEvent, SharedHandler};

type SessionId = u64;

// ── Server state ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Message {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    body: Vec<u8>,
}

#[derive(Debug)]
struct Consumer {
    session: SessionId,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// `Some(session)` for exclusive queues.
    owner: Option<SessionId>,
    /// Exchanges this queue is bound to.
    bound_to: HashSet<String>,
    ready: VecDeque<Message>,
    consumer: Option<Consumer>,
}

impl QueueState {
    fn accessible_by(&self, session: SessionId) -> bool {
        self.owner.map_or(true, |owner| owner == session)
    }
}

#[derive(Debug)]
struct Unacked {
    session: SessionId,
    queue: String,
    message: Message,
}

#[derive(Debug, Default)]
struct State {
    next_session: SessionId,
    next_tag: u64,
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,
}

impl State {
    /// Hands `message` to the queue's consumer, or parks it in the queue.
    fn enqueue(&mut self, queue_name: &str, message: Message) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        if let Some(consumer) = &queue.consumer {
            self.next_tag += 1;
            let tag = self.next_tag;
            let delivery = Delivery {
                delivery_tag: tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                body: message.body.clone(),
            };
            if consumer.tx.send(delivery).is_ok() {
                trace!(queue = queue_name, delivery_tag = tag, "delivered");
                self.unacked.insert(
                    tag,
                    Unacked {
                        session: consumer.session,
                        queue: queue_name.to_string(),
                        message,
                    },
                );
                return;
            }
            // Receiver gone: forget the consumer and keep the message.
            queue.consumer = None;
        }
        queue.ready.push_back(message);
    }

    /// Releases everything `session` held.
    fn drop_session(&mut self, session: SessionId) {
        self.queues.retain(|name, q| {
            let keep = q.owner != Some(session);
            if !keep {
                debug!(queue = %name, "exclusive queue deleted with its owner");
            }
            keep
        });

        for queue in self.queues.values_mut() {
            if queue.consumer.as_ref().map(|c| c.session) == Some(session) {
                queue.consumer = None;
            }
        }

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.session == session)
            .map(|(tag, _)| *tag)
            .collect();
        // Newest first so push_front keeps delivery order.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(Unacked {
                queue, mut message, ..
            }) = self.unacked.remove(&tag)
            {
                if let Some(q) = self.queues.get_mut(&queue) {
                    message.redelivered = true;
                    q.ready.push_front(message);
                }
            }
        }
    }
}

// ── MemoryBroker ──────────────────────────────────────────────────────────────

/// The in-process server.  Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session.  Emits `Connected` then `Ready` on `handler`.
    pub fn connect(&self, handler: SharedHandler) -> MemorySession {
        let id = {
            let mut state = self.state.lock();
            state.next_session += 1;
            state.next_session
        };
        handler.on_event(ConnectionEvent::Connected);
        handler.on_event(ConnectionEvent::Ready);
        MemorySession {
            id,
            state: Arc::clone(&self.state),
            handler,
            closed: AtomicBool::new(false),
        }
    }

    /// Ends every consumer stream.  Queued and unacked messages stay put.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
    }

    /// Messages waiting in `queue`, or `None` if it does not exist.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.ready.len())
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }
}

// ── MemorySession ─────────────────────────────────────────────────────────────

/// One client connection to a [`MemoryBroker`].
///
/// Dropping a session without [`close`](Broker::close) releases its
/// resources the way a lost TCP connection would.
pub struct MemorySession {
    id: SessionId,
    state: Arc<Mutex<State>>,
    handler: SharedHandler,
    closed: AtomicBool,
}

impl MemorySession {
    fn lock_open(&self) -> Result<MutexGuard<'_, State>, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err("channel is closed".to_string());
        }
        Ok(self.state.lock())
    }

    fn release(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.lock().drop_session(self.id);
        true
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.release() {
            self.handler.on_event(ConnectionEvent::Detached);
        }
    }
}

fn locked(queue: &str) -> String {
    format!("RESOURCE_LOCKED - cannot obtain exclusive access to locked queue '{queue}'")
}

#[async_trait]
impl Broker for MemorySession {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.lock_open().map_err(|reason| BrokerError::DeclareExchange {
            exchange: name.to_string(),
            reason,
        })?;
        if state.exchanges.insert(name.to_string()) {
            debug!(exchange = name, "exchange declared");
        }
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        let err = |reason: String| BrokerError::DeclareQueue {
            queue: name.to_string(),
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;

        let queue = state.queues.entry(name.to_string()).or_insert_with(|| {
            debug!(queue = name, exclusive = options.exclusive, "queue declared");
            QueueState {
                owner: options.exclusive.then_some(self.id),
                ..QueueState::default()
            }
        });
        if !queue.accessible_by(self.id) {
            return Err(err(locked(name)));
        }
        Ok(QueueInfo {
            name: name.to_string(),
            message_count: queue.ready.len() as u32,
            consumer_count: u32::from(queue.consumer.is_some()),
        })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let err = |reason: String| BrokerError::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;

        if !state.exchanges.contains(exchange) {
            return Err(err(format!("NOT_FOUND - no exchange '{exchange}'")));
        }
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(err(format!("NOT_FOUND - no queue '{queue}'")));
        };
        if !q.accessible_by(self.id) {
            return Err(err(locked(queue)));
        }
        q.bound_to.insert(exchange.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let err = |reason: String| BrokerError::Publish {
            exchange: exchange.to_string(),
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;

        if !state.exchanges.contains(exchange) {
            return Err(err(format!("NOT_FOUND - no exchange '{exchange}'")));
        }

        let mut targets: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.bound_to.contains(exchange))
            .map(|(name, _)| name.clone())
            .collect();
        if targets.is_empty() {
            trace!(exchange, routing_key, "unroutable message dropped");
        }
        targets.sort();
        for queue in targets {
            state.enqueue(
                &queue,
                Message {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    body: payload.to_vec(),
                },
            );
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let err = |reason: String| BrokerError::Consume {
            queue: queue.to_string(),
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(err(format!("NOT_FOUND - no queue '{queue}'")));
        };
        if !q.accessible_by(self.id) {
            return Err(err(locked(queue)));
        }
        if q.consumer.is_some() {
            return Err(err("ACCESS_REFUSED - queue already has a consumer".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumer = Some(Consumer {
            session: self.id,
            tx,
        });
        let backlog: Vec<Message> = q.ready.drain(..).collect();
        for message in backlog {
            state.enqueue(queue, message);
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        });
        Ok(stream.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let err = |reason: String| BrokerError::Ack {
            delivery_tag,
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;
        take_unacked(&mut state, self.id, delivery_tag).map_err(err)
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let err = |reason: String| BrokerError::Reject {
            delivery_tag,
            reason,
        };
        let mut state = self.lock_open().map_err(err)?;
        take_unacked(&mut state, self.id, delivery_tag).map_err(err)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.release() {
            return Err(BrokerError::Close {
                reason: "connection already closed".to_string(),
            });
        }
        self.handler.on_event(ConnectionEvent::Closed);
        self.handler.on_event(ConnectionEvent::Detached);
        Ok(())
    }
}

/// Removes `tag` from the unacked set if `session` owns it.
fn take_unacked(state: &mut State, session: SessionId, tag: u64) -> Result<(), String> {
    match state.unacked.get(&tag) {
        Some(u) if u.session == session => {
            state.unacked.remove(&tag);
            Ok(())
        }
        _ => Err(format!("PRECONDITION_FAILED - unknown delivery tag {tag}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
