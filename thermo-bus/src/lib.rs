/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! thermo-bus – shared plumbing for the reading publisher and subscriber.
//!
//! ```text
//! lib.rs
//! ├── topology     – exchange / queue / routing-key names
//! ├── reading      – Reading type, wire codec, random source
//! ├── aggregate    – running sum / count / mean
//! ├── lifecycle    – connection lifecycle events + logging handler
//! ├── config/      – optional YAML settings file
//! ├── broker/      – Broker trait, lapin back-end, in-memory back-end
//! ├── publisher    – timer-driven publish loop
//! └── subscriber   – consume / ack / report loop
//! ```

pub mod aggregate;
pub mod broker;
pub mod config;
pub mod lifecycle;
pub mod publisher;
pub mod reading;
pub mod subscriber;
pub mod topology;
