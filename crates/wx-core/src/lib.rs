// wx-core: Shared data model for the weather telemetry pipeline.
//
// Contains the `Reading` type that flows from the sensor scraper through
// the queue, disk buffer, and cloud uploader, plus the sensor line parser.

pub mod parse;
pub mod reading;

pub use parse::parse_sensor_line;
pub use reading::{CONNECTION_PREFIX, READING_PREFIX, Reading, connection_kind, reading_kind};
