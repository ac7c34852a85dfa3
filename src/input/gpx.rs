use crate::core::TrackPoint;
use crate::input::IngestError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

/// Element that opens a track point
const TRACK_POINT_TAG: &[u8] = b"trkpt";

/// Events produced while walking a GPX document, in document order
#[derive(Debug)]
pub enum GpxEvent {
    Start,
    Point(TrackPoint),
    Error(IngestError),
    End,
}

/// Leaf elements captured inside a track point
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Ele,
    Time,
    Sat,
    Fix,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        if name.eq_ignore_ascii_case(b"ele") {
            Some(Field::Ele)
        } else if name.eq_ignore_ascii_case(b"time") {
            Some(Field::Time)
        } else if name.eq_ignore_ascii_case(b"sat") {
            Some(Field::Sat)
        } else if name.eq_ignore_ascii_case(b"fix") {
            Some(Field::Fix)
        } else {
            None
        }
    }

    fn apply(self, point: &mut TrackPoint, text: &str) {
        match self {
            Field::Ele => {
                point.ele = match text.parse::<f64>() {
                    Ok(ele) => Some(ele),
                    Err(_) => {
                        warn!("Ignoring non-numeric elevation: {:?}", text);
                        None
                    }
                }
            }
            Field::Time => point.time = Some(text.to_string()),
            Field::Sat => point.sat = Some(text.to_string()),
            Field::Fix => point.fix = Some(text.to_string()),
        }
    }
}

/// Streaming GPX parser
///
/// Yields `Start`, then one `Point` per `trkpt`, then `End`. The first
/// failure is reported as a single `Error` and ends the sequence. A parser
/// walks one document once; create a new one per file.
pub struct GpxParser<'a> {
    reader: Reader<&'a [u8]>,
    started: bool,
    finished: bool,
    /// Point currently open in the document
    point: Option<TrackPoint>,
    /// Leaf element currently open inside `point`
    field: Option<Field>,
}

impl<'a> GpxParser<'a> {
    pub fn new(xml: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        Self {
            reader,
            started: false,
            finished: false,
            point: None,
            field: None,
        }
    }

    /// Advance to the next complete track point
    fn next_point(&mut self) -> Result<Option<TrackPoint>, IngestError> {
        loop {
            match self.reader.read_event()? {
                Event::Start(e) => {
                    if is_track_point(&e) {
                        self.point = Some(point_from_attributes(&e)?);
                        self.field = None;
                    } else if self.point.is_some() {
                        self.field = Field::from_name(e.local_name().as_ref());
                    }
                }
                Event::Empty(e) => {
                    if is_track_point(&e) {
                        return Ok(Some(point_from_attributes(&e)?));
                    }
                }
                Event::Text(text) => {
                    if let (Some(point), Some(field)) = (self.point.as_mut(), self.field) {
                        let text = text.unescape()?;
                        field.apply(point, text.trim());
                    }
                }
                Event::End(e) => {
                    self.field = None;
                    if e.local_name().as_ref().eq_ignore_ascii_case(TRACK_POINT_TAG) {
                        if let Some(point) = self.point.take() {
                            return Ok(Some(point));
                        }
                    }
                }
                Event::Eof => {
                    if self.point.is_some() {
                        return Err(IngestError::UnexpectedEof);
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl Iterator for GpxParser<'_> {
    type Item = GpxEvent;

    fn next(&mut self) -> Option<GpxEvent> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            return Some(GpxEvent::Start);
        }

        match self.next_point() {
            Ok(Some(point)) => Some(GpxEvent::Point(point)),
            Ok(None) => {
                self.finished = true;
                Some(GpxEvent::End)
            }
            Err(e) => {
                self.finished = true;
                Some(GpxEvent::Error(e))
            }
        }
    }
}

fn is_track_point(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref().eq_ignore_ascii_case(TRACK_POINT_TAG)
}

/// Build a point from the mandatory `lat`/`lon` attributes
fn point_from_attributes(e: &BytesStart<'_>) -> Result<TrackPoint, IngestError> {
    let mut lat = None;
    let mut lon = None;

    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        match attr.key.local_name().as_ref() {
            b"lat" => lat = Some(parse_coordinate("lat", &attr.value)?),
            b"lon" => lon = Some(parse_coordinate("lon", &attr.value)?),
            _ => {}
        }
    }

    let lat = lat.ok_or(IngestError::MissingCoordinate("lat"))?;
    let lon = lon.ok_or(IngestError::MissingCoordinate("lon"))?;

    Ok(TrackPoint::new(lat, lon))
}

fn parse_coordinate(attr: &'static str, raw: &[u8]) -> Result<f64, IngestError> {
    let invalid = || IngestError::InvalidCoordinate {
        attr,
        value: String::from_utf8_lossy(raw).to_string(),
    };

    let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(invalid()),
    }
}
