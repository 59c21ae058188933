/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Reading subscriber: consume, acknowledge, average.
//!
//! Start-up order:
//!
//! 1. (optional) declare the fanout exchange,
//! 2. declare the exclusive queue and arm the report timer,
//! 3. bind the queue to the exchange with the routing key,
//! 4. start consuming with manual acknowledgement.
//!
//! The loop then multiplexes two sources on one task: deliveries, each
//! parsed, acknowledged and folded into the [`Aggregate`], and the report
//! timer, which logs the running mean.  If binding or consuming fails the
//! armed timer keeps reporting through [`Subscriber::keep_reporting`].

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregate::{Aggregate, Summary};
use crate::broker::{Broker, BrokerError, Delivery, DeliveryStream, QueueOptions};
use crate::config::Settings;
use crate::reading::{Reading, ReadingError};
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    pub topology: Topology,
    pub report_period: Duration,
    pub declare_exchange: bool,
}

impl SubscriberConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            topology: settings.topology.clone(),
            report_period: settings.subscriber.report_period(),
            declare_exchange: settings.subscriber.declare_exchange,
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Parsed, acknowledged and counted.
    Counted(Reading),
    /// Body was not a reading; rejected without requeue, not counted.
    Rejected(ReadingError),
    /// Parsed but the ack failed; not counted.
    AckFailed,
}

pub struct Subscriber<B> {
    broker: B,
    config: SubscriberConfig,
    aggregate: Aggregate,
    report: Option<Interval>,
    reports: u64,
}

impl<B: Broker> Subscriber<B> {
    pub fn new(broker: B, config: SubscriberConfig) -> Self {
        Self {
            broker,
            config,
            aggregate: Aggregate::new(),
            report: None,
            reports: 0,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// Report timer ticks handled so far.
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Declares, binds and starts consuming.  The report timer is armed as
    /// soon as the queue exists.
    ///
    /// # Errors
    /// The first failing broker operation.
    pub async fn start(&mut self) -> Result<DeliveryStream, BrokerError> {
        let topo = &self.config.topology;

        if self.config.declare_exchange {
            self.broker.declare_exchange(&topo.exchange).await?;
            info!(exchange = %topo.exchange, "declared exchange");
        }

        let queue = self
            .broker
            .declare_queue(&topo.queue, QueueOptions::exclusive())
            .await?;
        info!(
            queue = %queue.name,
            messages = queue.message_count,
            consumers = queue.consumer_count,
            "declared queue"
        );
        self.report = Some(report_timer(self.config.report_period));

        self.broker
            .bind_queue(&queue.name, &topo.exchange, &topo.routing_key)
            .await?;
        debug!(queue = %queue.name, exchange = %topo.exchange, routing_key = %topo.routing_key, "queue bound");

        let deliveries = self.broker.consume(&queue.name, "").await?;
        info!(queue = %queue.name, "consume operation started");
        Ok(deliveries)
    }

    /// Parses, acknowledges and counts one delivery.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> DeliveryOutcome {
        let tag = delivery.delivery_tag;

        let reading = match Reading::decode(&delivery.body) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(delivery_tag = tag, "Discarding delivery: {e}");
                if let Err(reject) = self.broker.reject(tag).await {
                    error!("{reject}");
                }
                return DeliveryOutcome::Rejected(e);
            }
        };

        if let Err(e) = self.broker.ack(tag).await {
            error!("{e}");
            return DeliveryOutcome::AckFailed;
        }
        self.aggregate.record(reading);

        info!(
            count = self.aggregate.count(),
            temperature = %reading,
            redelivered = delivery.redelivered,
            "received reading"
        );
        DeliveryOutcome::Counted(reading)
    }

    /// Logs and returns the current running average.
    pub fn report(&self) -> Summary {
        let summary = self.aggregate.summary();
        info!(
            timestamp = Utc::now().timestamp(),
            average = summary.mean,
            accumulated = summary.sum,
            count = summary.count,
            "running average"
        );
        summary
    }

    fn report_tick(&mut self) {
        self.reports += 1;
        self.report();
    }

    /// Keeps the report timer running after [`start`](Self::start) failed
    /// past the queue declaration.  Never returns; callers race it against
    /// shutdown.  Waits forever without reporting if the queue was never
    /// declared.
    pub async fn keep_reporting(&mut self) {
        let Some(mut report) = self.report.take() else {
            return std::future::pending().await;
        };
        loop {
            report.tick().await;
            self.report_tick();
        }
    }

    /// Runs until `deliveries` ends and returns the final aggregate.
    pub async fn run(&mut self, mut deliveries: DeliveryStream) -> Aggregate {
        let mut report = self
            .report
            .take()
            .unwrap_or_else(|| report_timer(self.config.report_period));

        loop {
            tokio::select! {
                _ = report.tick() => {
                    self.report_tick();
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        self.handle_delivery(delivery).await;
                    }
                    Some(Err(e)) => error!("{e}"),
                    None => {
                        info!("Delivery stream closed");
                        break;
                    }
                },
            }
        }

        self.aggregate
    }
}

/// First tick one period from now, like a plain repeating timer.
fn report_timer(period: Duration) -> Interval {
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::{MemoryBroker, MemorySession};
    use crate::lifecycle::LoggingHandler;
    use crate::publisher::{Publisher, PublisherConfig};
    use crate::reading::{ReadingSource, ScriptedSource, UniformSource};

    fn subscriber(broker: &MemoryBroker, config: SubscriberConfig) -> Subscriber<MemorySession> {
        Subscriber::new(broker.connect(LoggingHandler::shared("subscriber")), config)
    }

    fn publisher(
        broker: &MemoryBroker,
        values: Vec<f64>,
    ) -> Publisher<MemorySession, ScriptedSource> {
        let limit = values.len() as u64;
        Publisher::new(
            broker.connect(LoggingHandler::shared("publisher")),
            ScriptedSource::new(values),
            PublisherConfig {
                limit: Some(limit),
                ..PublisherConfig::default()
            },
        )
    }

    #[test]
    fn default_config_matches_stock_timer() {
        let c = SubscriberConfig::default();
        assert_eq!(c.report_period, Duration::from_secs(5));
        assert!(!c.declare_exchange);
        assert_eq!(c.topology, Topology::default());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_mean_of_three_readings() {
        let broker = MemoryBroker::new();
        let mut publisher = publisher(&broker, vec![10.0, 20.0, 30.0]);
        publisher.declare().await.unwrap();

        let mut sub = subscriber(&broker, SubscriberConfig::default());
        let stream = sub.start().await.unwrap();

        assert_eq!(publisher.run().await, 3);
        broker.shutdown();

        let agg = sub.run(stream).await;
        assert_eq!(agg.count(), 3);
        assert_eq!(agg.sum(), 60.0);
        assert_eq!(agg.mean(), 20.0);
        assert_eq!(broker.unacked_count(), 0, "every delivery acknowledged");
    }

    #[tokio::test(start_paused = true)]
    async fn readings_published_before_binding_are_lost() {
        let broker = MemoryBroker::new();
        let mut early = publisher(&broker, vec![50.0, 50.0]);
        early.declare().await.unwrap();
        early.run().await;

        let mut sub = subscriber(&broker, SubscriberConfig::default());
        let stream = sub.start().await.unwrap();

        let mut late = publisher(&broker, vec![7.0]);
        late.run().await;
        broker.shutdown();

        let agg = sub.run(stream).await;
        assert_eq!(agg.count(), 1);
        assert_eq!(agg.sum(), 7.0);
    }

    #[tokio::test]
    async fn binding_needs_exchange_unless_subscriber_declares_it() {
        let broker = MemoryBroker::new();

        let mut plain = subscriber(&broker, SubscriberConfig::default());
        let err = plain.start().await.err().unwrap();
        assert!(matches!(err, BrokerError::Bind { .. }));
        drop(plain);

        let mut declaring = subscriber(
            &broker,
            SubscriberConfig {
                declare_exchange: true,
                ..SubscriberConfig::default()
            },
        );
        declaring.start().await.unwrap();
    }

    #[tokio::test]
    async fn second_subscriber_cannot_take_exclusive_queue() {
        let broker = MemoryBroker::new();
        let config = SubscriberConfig {
            declare_exchange: true,
            ..SubscriberConfig::default()
        };
        let mut first = subscriber(&broker, config.clone());
        first.start().await.unwrap();

        let mut second = subscriber(&broker, config);
        assert!(matches!(
            second.start().await.err().unwrap(),
            BrokerError::DeclareQueue { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_and_not_counted() {
        let broker = MemoryBroker::new();
        let mut sub = subscriber(
            &broker,
            SubscriberConfig {
                declare_exchange: true,
                ..SubscriberConfig::default()
            },
        );
        let mut stream = sub.start().await.unwrap();

        let topo = Topology::default();
        let raw = broker.connect(LoggingHandler::shared("raw"));
        raw.publish(&topo.exchange, &topo.routing_key, b"hot")
            .await
            .unwrap();
        raw.publish(&topo.exchange, &topo.routing_key, b"21.5")
            .await
            .unwrap();

        let bad = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            sub.handle_delivery(bad).await,
            DeliveryOutcome::Rejected(ReadingError::Malformed { .. })
        ));
        assert_eq!(sub.aggregate().count(), 0);

        let good = stream.next().await.unwrap().unwrap();
        assert_eq!(
            sub.handle_delivery(good).await,
            DeliveryOutcome::Counted(Reading(21.5))
        );
        assert_eq!(sub.aggregate().count(), 1);
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_depth(&topo.queue), Some(0));
    }

    #[tokio::test]
    async fn failed_ack_is_not_counted() {
        let broker = MemoryBroker::new();
        let mut sub = subscriber(&broker, SubscriberConfig::default());

        let forged = Delivery {
            delivery_tag: 42,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            body: b"10.0".to_vec(),
        };
        assert_eq!(sub.handle_delivery(forged).await, DeliveryOutcome::AckFailed);
        assert_eq!(sub.aggregate().count(), 0);
    }

    #[tokio::test]
    async fn report_is_zero_before_first_reading() {
        let broker = MemoryBroker::new();
        let sub = subscriber(&broker, SubscriberConfig::default());
        let s = sub.report();
        assert_eq!(s.count, 0);
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.sum, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_timer_keeps_running_while_idle() {
        let broker = MemoryBroker::new();
        let mut sub = subscriber(
            &broker,
            SubscriberConfig {
                declare_exchange: true,
                ..SubscriberConfig::default()
            },
        );
        let stream = sub.start().await.unwrap();

        let stopper = broker.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(12)).await;
            stopper.shutdown();
        });

        let started = Instant::now();
        let agg = sub.run(stream).await;
        assert_eq!(agg.count(), 0);
        assert!(started.elapsed() >= Duration::from_secs(12));
        assert_eq!(sub.reports(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn many_seeded_readings_are_summed_and_counted_exactly() {
        const N: u64 = 200;
        const SEED: u64 = 0x7e3d;
        let source = || UniformSource::new(0.0..100.0, Some(SEED)).unwrap();

        let broker = MemoryBroker::new();
        let mut publisher = Publisher::new(
            broker.connect(LoggingHandler::shared("publisher")),
            source(),
            PublisherConfig {
                limit: Some(N),
                ..PublisherConfig::default()
            },
        );
        publisher.declare().await.unwrap();

        let mut sub = subscriber(&broker, SubscriberConfig::default());
        let stream = sub.start().await.unwrap();
        assert_eq!(publisher.run().await, N);
        broker.shutdown();
        let agg = sub.run(stream).await;

        // Same seed, same draws; sum what actually crossed the wire.
        let mut replay = source();
        let mut expected = 0.0;
        for _ in 0..N {
            let sent = Reading::decode(&replay.next_reading().encode()).unwrap();
            assert!((0.0..=100.0).contains(&sent.value()));
            expected += sent.value();
        }

        assert_eq!(agg.count(), N);
        assert_eq!(agg.sum(), expected);
        assert_eq!(agg.mean(), expected / N as f64);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_timer_survives_a_failed_bind() {
        let broker = MemoryBroker::new();
        let mut sub = subscriber(&broker, SubscriberConfig::default());
        assert!(matches!(
            sub.start().await.err().unwrap(),
            BrokerError::Bind { .. }
        ));

        let waited = time::timeout(Duration::from_secs(12), sub.keep_reporting()).await;
        assert!(waited.is_err(), "keep_reporting never returns");
        assert_eq!(sub.reports(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_reported_when_the_queue_was_never_declared() {
        let broker = MemoryBroker::new();
        let config = SubscriberConfig {
            declare_exchange: true,
            ..SubscriberConfig::default()
        };
        let mut owner = subscriber(&broker, config.clone());
        owner.start().await.unwrap();

        let mut locked_out = subscriber(&broker, config);
        assert!(locked_out.start().await.is_err());

        let waited = time::timeout(Duration::from_secs(12), locked_out.keep_reporting()).await;
        assert!(waited.is_err());
        assert_eq!(locked_out.reports(), 0);
    }
}
