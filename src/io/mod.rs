//! IO module for format-specific reading and writing operations.
//!
//! GeoJSON is the only ingestion format; the same module also serializes
//! clipped geometry back to GeoJSON text for storage.

pub(crate) mod geojson;
