//! Bounded replayable CSV sources
//!
//! Each source is a cursor over a finite, comma-separated file whose fields
//! may be quoted with `|`. The first row is a header and is skipped on open.
//! When the data runs out the cursor is reset by `rewind()`: seek to the first
//! data row, discard exactly one row, and resume. After a wrap the stream
//! yields row 2, 3, ... and never realigns to row 1.

use crate::domain::types::{AccelerometerSample, GpsSample};
use crate::error::SourceError;
use std::fs::File;
use std::io::{Read, Seek};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const QUOTE: u8 = b'|';

/// A record type that can be read from one CSV row
pub trait SourceRecord: Sized {
    /// Stream name used in logs and errors
    const STREAM: &'static str;

    /// Decode one data row; the error string becomes the `MalformedRecord` reason
    fn decode(row: &csv::StringRecord) -> Result<Self, String>;
}

/// Columns: x, y, z
impl SourceRecord for AccelerometerSample {
    const STREAM: &'static str = "accelerometer";

    fn decode(row: &csv::StringRecord) -> Result<Self, String> {
        let (x, y, z): (f64, f64, f64) = row.deserialize(None).map_err(|e| e.to_string())?;
        Ok(AccelerometerSample::new(x, y, z))
    }
}

/// Columns: longitude, latitude
impl SourceRecord for GpsSample {
    const STREAM: &'static str = "gps";

    fn decode(row: &csv::StringRecord) -> Result<Self, String> {
        let (longitude, latitude): (f64, f64) =
            row.deserialize(None).map_err(|e| e.to_string())?;
        Ok(GpsSample::new(latitude, longitude))
    }
}

/// Raw parking row: the free-space count, optionally with its own position
///
/// Rows without coordinates are positioned by the aggregator using the GPS
/// sample read in the same tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParkingReading {
    pub empty_count: f64,
    pub gps: Option<GpsSample>,
}

/// Parse column `idx`; a missing or blank column is `None`
fn optional_column(
    row: &csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<Option<f64>, String> {
    match row.get(idx) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|e| format!("field {idx} ({name}): {e} in {raw:?}")),
    }
}

/// Columns: empty_count[, longitude, latitude]
impl SourceRecord for ParkingReading {
    const STREAM: &'static str = "parking";

    fn decode(row: &csv::StringRecord) -> Result<Self, String> {
        let empty_count = optional_column(row, 0, "empty_count")?
            .ok_or_else(|| "missing empty_count".to_string())?;
        let longitude = optional_column(row, 1, "longitude")?;
        let latitude = optional_column(row, 2, "latitude")?;
        let gps = match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(GpsSample::new(lat, lon)),
            _ => None,
        };
        Ok(ParkingReading { empty_count, gps })
    }
}

/// Looping cursor over one CSV stream
pub struct ReplayableSource<T, R = File> {
    path: PathBuf,
    reader: Option<csv::Reader<R>>,
    /// Position of the first data row (just past the header)
    data_start: csv::Position,
    row: csv::StringRecord,
    wraps: u64,
    _record: PhantomData<fn() -> T>,
}

impl<T: SourceRecord> ReplayableSource<T, File> {
    /// Open a source file, positioning the cursor at the first data row
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SourceError::Unavailable {
            stream: T::STREAM,
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_reader(file, path)
    }
}

impl<T: SourceRecord, R: Read + Seek> ReplayableSource<T, R> {
    /// Open a source over any seekable reader; `origin` is used for errors
    pub fn from_reader(inner: R, origin: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = origin.as_ref().to_path_buf();
        let unavailable = |reason: String| SourceError::Unavailable {
            stream: T::STREAM,
            path: path.clone(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b',')
            .quote(QUOTE)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(inner);

        let mut row = csv::StringRecord::new();
        match reader.read_record(&mut row) {
            Ok(true) => {}
            Ok(false) => return Err(unavailable("empty file".to_string())),
            Err(e) => return Err(unavailable(e.to_string())),
        }
        let data_start = reader.position().clone();

        match reader.read_record(&mut row) {
            Ok(true) => {}
            Ok(false) => return Err(unavailable("no data rows after header".to_string())),
            Err(e) => return Err(unavailable(e.to_string())),
        }
        reader.seek(data_start.clone()).map_err(|e| unavailable(e.to_string()))?;

        info!(stream = T::STREAM, path = %path.display(), "source_opened");

        Ok(Self {
            path,
            reader: Some(reader),
            data_start,
            row,
            wraps: 0,
            _record: PhantomData,
        })
    }

    /// Return the next record, rewinding with a one-row skip on exhaustion
    pub fn next(&mut self) -> Result<T, SourceError> {
        if !self.read_row()? {
            self.rewind()?;
            if !self.read_row()? {
                return Err(SourceError::ExhaustedAfterSkip { stream: T::STREAM });
            }
        }
        self.parse_row()
    }

    /// Seek to the first data row and discard it
    fn rewind(&mut self) -> Result<(), SourceError> {
        let stream = T::STREAM;
        let reader = self.reader.as_mut().ok_or(SourceError::Closed { stream })?;
        reader.seek(self.data_start.clone()).map_err(|e| SourceError::Unavailable {
            stream,
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if !self.read_row()? {
            return Err(SourceError::ExhaustedAfterSkip { stream });
        }
        self.wraps += 1;
        debug!(stream, wraps = self.wraps, "source_rewound");
        Ok(())
    }

    fn read_row(&mut self) -> Result<bool, SourceError> {
        let stream = T::STREAM;
        let reader = self.reader.as_mut().ok_or(SourceError::Closed { stream })?;
        reader.read_record(&mut self.row).map_err(|e| SourceError::MalformedRecord {
            stream,
            line: e.position().map(|p| p.line()).unwrap_or(0),
            reason: e.to_string(),
        })
    }

    fn parse_row(&self) -> Result<T, SourceError> {
        T::decode(&self.row).map_err(|reason| SourceError::MalformedRecord {
            stream: T::STREAM,
            line: self.row.position().map(|p| p.line()).unwrap_or(0),
            reason,
        })
    }

    /// Release the underlying file; safe to call repeatedly
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            info!(stream = T::STREAM, wraps = self.wraps, "source_closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Number of times the stream has wrapped around
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
