//! Event-to-point transformation and the per-event handler.

pub mod decode;
pub mod handler;
pub mod point;

pub use decode::{decode_field, parse_timestamp};
pub use handler::{IngestionPipeline, Outcome};
pub use point::{SECTIONS, build_point};
