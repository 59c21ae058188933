/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timer-driven reading publisher.
//!
//! ```text
//! declare fanout exchange ──► wait initial_delay ──► every period:
//!                                                     next_reading()
//!                                                     publish(exchange, routing_key, "%f")
//! ```
//!
//! Publishing is fire-and-forget.  A failed publish is logged and the next
//! tick proceeds as usual; there is no retry and no backpressure.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::broker::{Broker, BrokerError};
use crate::config::Settings;
use crate::reading::{Reading, ReadingSource};
use crate::topology::Topology;

/// How and where readings are published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub topology: Topology,
    pub initial_delay: Duration,
    pub period: Duration,
    /// Stop after this many ticks; `None` runs until the task is dropped.
    pub limit: Option<u64>,
}

impl PublisherConfig {
    pub fn from_settings(settings: &Settings, limit: Option<u64>) -> Self {
        Self {
            topology: settings.topology.clone(),
            initial_delay: settings.publisher.initial_delay(),
            period: settings.publisher.period(),
            limit,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), None)
    }
}

/// Publishes one reading per timer tick.
pub struct Publisher<B, S> {
    broker: B,
    source: S,
    config: PublisherConfig,
}

impl<B: Broker, S: ReadingSource> Publisher<B, S> {
    pub fn new(broker: B, source: S, config: PublisherConfig) -> Self {
        Self {
            broker,
            source,
            config,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Declares the fanout exchange.  Safe to repeat on every start.
    pub async fn declare(&self) -> Result<(), BrokerError> {
        self.broker
            .declare_exchange(&self.config.topology.exchange)
            .await?;
        info!(exchange = %self.config.topology.exchange, "declared exchange");
        Ok(())
    }

    /// Draws one reading and publishes it.
    pub async fn publish_once(&mut self) -> Result<Reading, BrokerError> {
        let reading = self.source.next_reading();
        self.broker
            .publish(
                &self.config.topology.exchange,
                &self.config.topology.routing_key,
                &reading.encode(),
            )
            .await?;
        Ok(reading)
    }

    /// Runs the timer loop and returns how many readings were handed to the
    /// broker.  Returns only when `limit` is set.
    pub async fn run(&mut self) -> u64 {
        let mut ticker = time::interval_at(
            Instant::now() + self.config.initial_delay,
            self.config.period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            period_ms = self.config.period.as_millis() as u64,
            limit = ?self.config.limit,
            "Publish timer started"
        );

        let mut ticks = 0u64;
        let mut published = 0u64;
        while self.config.limit.map_or(true, |limit| ticks < limit) {
            ticker.tick().await;
            ticks += 1;

            match self.publish_once().await {
                Ok(reading) => {
                    published += 1;
                    info!(
                        timestamp = Utc::now().timestamp(),
                        temperature = %reading,
                        "published reading"
                    );
                }
                Err(e) => error!("Publish failed: {e}"),
            }
        }

        info!(ticks, published, "Publish timer stopped");
        published
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
