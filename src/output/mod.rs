//! Capture serialization and file output.

pub mod json;

pub use json::{
    deserialize_capture, read_capture, serialize_capture, write_capture, TimestampEncoding,
};
