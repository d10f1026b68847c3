mod event;
mod point;

pub use event::{BuildEvent, RawEvent, UnknownEvent};
pub use point::{ALL_SERIES, Record, Scalar, SeriesName};
