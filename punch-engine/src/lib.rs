//! Punch acquisition and course validation for orienteering events.
//!
//! Stations feed raw frames through [`transport`] sessions into a single
//! [`pipeline`] task, which deduplicates and orders punches, assembles
//! card readouts, resolves them to runs, checks them against courses and
//! hands results to the [`publisher`].

pub mod assembler;
pub mod checker;
pub mod config;
pub mod domain;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod protocol;
pub mod publisher;
pub mod resolver;
pub mod status;
pub mod transport;
pub mod web;
