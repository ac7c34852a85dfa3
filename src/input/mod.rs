pub mod enrich;
pub mod gpx;

pub use enrich::Enricher;
pub use gpx::{GpxEvent, GpxParser};

use crate::core::TrackPoint;
use std::path::Path;
use thiserror::Error;

/// Reasons a track file cannot be loaded
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Error in the GPX file, unable to read it: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed GPX document: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Track point is missing its {0} attribute")]
    MissingCoordinate(&'static str),

    #[error("Track point has an invalid {attr} value: {value:?}")]
    InvalidCoordinate { attr: &'static str, value: String },

    #[error("Document ended inside a track point")]
    UnexpectedEof,
}

/// Read a whole track document from disk
pub async fn read_document(path: impl AsRef<Path>) -> Result<String, IngestError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Parse a document into raw (not yet enriched) points, stopping at the
/// first error
pub fn parse_track(xml: &str) -> Result<Vec<TrackPoint>, IngestError> {
    let mut points = Vec::new();

    for event in GpxParser::new(xml) {
        match event {
            GpxEvent::Point(point) => points.push(point),
            GpxEvent::Error(e) => return Err(e),
            GpxEvent::Start | GpxEvent::End => {}
        }
    }

    Ok(points)
}

/// Load and enrich every point of a track file
pub async fn load_track(path: impl AsRef<Path>) -> Result<Vec<TrackPoint>, IngestError> {
    let xml = read_document(path).await?;
    let mut enricher = Enricher::new();

    Ok(parse_track(&xml)?
        .into_iter()
        .map(|p| enricher.enrich(p))
        .collect())
}
