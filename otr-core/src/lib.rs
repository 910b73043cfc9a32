//! OTR Core — Oplog Tailer for the OTR Change-Data-Capture Bridge
//!
//! This crate implements the tailer at the heart of OTR: a component that
//! continuously reads a MongoDB replica set's oplog and republishes each
//! logically meaningful write as a normalized [`event::ChangeEvent`] on an
//! output channel, for a downstream publisher to broadcast over Redis.
//!
//! # Key Components
//!
//! - **Events**: [`event`] defines the raw oplog record and the canonical
//!   change event
//! - **Decoder**: [`decode`] unpacks records, including transactional
//!   `applyOps` batches, into ordered events
//! - **Resume**: [`resume`] picks the timestamp a session starts from
//! - **Tailer**: [`tailer`] drives the cursor and supervises sessions
//! - **Checkpoint**: [`checkpoint`] abstracts the bus-side resume point
//! - **Metrics**: [`metrics`] records tailer observability
//!
//! # Example
//!
//! ```rust
//! use otr_core::event::{ChangeEvent, OperationType};
//!
//! fn handle(event: &ChangeEvent) {
//!     match event.operation {
//!         OperationType::Insert => println!("created in {}", event.namespace),
//!         OperationType::Update => println!("updated in {}", event.namespace),
//!         OperationType::Remove => println!("removed from {}", event.namespace),
//!     }
//! }
//! ```

pub mod checkpoint;
pub mod decode;
pub mod event;
pub mod metrics;
pub mod resume;
pub mod tailer;
