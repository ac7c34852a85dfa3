pub mod track_point;

pub use track_point::{parse_gpx_time, TimeParseError, TrackPoint};
