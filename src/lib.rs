//! Core library for Heka's in-process event-routing engine: the pack pool,
//! matcher compiler/evaluator, router, plugin runner contract, stat
//! accumulator and the small set of wire-level helpers (framed stream
//! codec, disk-backed output buffer) those runners need. Inputs, transports
//! and wire codecs beyond the framed-stream header are external
//! collaborators this crate does not implement.

pub mod buffer;
pub mod config;
pub mod error;
pub mod framing;
pub mod matcher;
pub mod message;
pub mod pack;
pub mod report;
pub mod router;
pub mod runner;
pub mod stats;
pub mod stats_decoder;

pub use config::Config;
pub use message::{Field, FieldValue, Message};
pub use pack::{Pack, PackPool};
pub use router::{Router, RouterHandle};
