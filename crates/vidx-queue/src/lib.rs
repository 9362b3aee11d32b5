//! Typed, durable job queue for the ingestion pipeline.
//!
//! This crate provides:
//! - FIFO-per-type queueing with atomic enqueue and single-consumer dequeue
//! - At-least-once delivery through an in-flight set with visibility timeouts
//! - Delayed jobs for retry backoff
//! - Ordered secondary indexes for listing and per-video lookup
//!
//! `RedisJobQueue` is the production backend; `MemoryJobQueue` mirrors its
//! semantics in process for tests and single-binary runs.

pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_queue;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobQueue;
pub use queue::JobQueue;
pub use redis_queue::RedisJobQueue;
