/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The broker seam.
//!
//! Both loops talk to a [`Broker`]; two back-ends implement it:
//!
//! | Back-end | Use |
//! |---|---|
//! | [`amqp::AmqpBroker`] | a real AMQP 0-9-1 broker through `lapin` |
//! | [`memory::MemorySession`] | in-process broker for tests and local runs |
//!
//! Every method maps onto one AMQP channel method.  Publishing is
//! fire-and-forget: `publish` returns once the frame is handed to the client
//! library, without waiting for a broker confirmation.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

// ── Deliveries ────────────────────────────────────────────────────────────────

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned id used to acknowledge or reject this message.
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// `true` if the broker delivered this message before without an ack.
    pub redelivered: bool,
    pub body: Vec<u8>,
}

/// Deliveries for one consumer.  Ends when the channel or broker goes away.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

// ── Declarations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
}

impl QueueOptions {
    pub fn exclusive() -> Self {
        Self { exclusive: true }
    }
}

/// Result of a successful queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a single broker operation.
///
/// `reason` carries the client library's (or broker's) own message so it can
/// be logged verbatim.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("cannot connect to '{uri}': {reason}")]
    Connect { uri: String, reason: String },

    #[error("cannot open channel: {reason}")]
    Channel { reason: String },

    #[error("cannot declare fanout exchange '{exchange}': {reason}")]
    DeclareExchange { exchange: String, reason: String },

    #[error("cannot declare queue '{queue}': {reason}")]
    DeclareQueue { queue: String, reason: String },

    #[error("cannot bind queue '{queue}' to exchange '{exchange}' with key '{routing_key}': {reason}")]
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("cannot publish to exchange '{exchange}': {reason}")]
    Publish { exchange: String, reason: String },

    #[error("cannot consume from queue '{queue}': {reason}")]
    Consume { queue: String, reason: String },

    #[error("delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("cannot acknowledge delivery {delivery_tag}: {reason}")]
    Ack { delivery_tag: u64, reason: String },

    #[error("cannot reject delivery {delivery_tag}: {reason}")]
    Reject { delivery_tag: u64, reason: String },

    #[error("cannot close connection: {reason}")]
    Close { reason: String },
}

// ── Broker ────────────────────────────────────────────────────────────────────

/// One connection plus one channel to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares fanout exchange `name`.  Re-declaring succeeds.
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Declares `name`.  Re-declaring from the owning connection succeeds.
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError>;

    /// Binds `queue` to `exchange`; the exchange must already exist.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Hands `payload` to the broker without waiting for a confirm.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Starts a consumer with manual acknowledgement.  An empty
    /// `consumer_tag` lets the broker pick one.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Drops a delivery without requeueing it.
    async fn reject(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
