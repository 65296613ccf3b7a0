//! Aggregator - combines one record from each source into one sample

use crate::domain::types::{AccelerometerSample, AggregatedData, GpsSample, ParkingSample, UserId};
use crate::error::SourceError;
use crate::infra::config::Config;
use crate::io::csv_source::{ParkingReading, ReplayableSource};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Read, Seek};

/// Reads the three streams in lockstep, 1:1:1 per call
pub struct Aggregator<R = File> {
    accelerometer: ReplayableSource<AccelerometerSample, R>,
    gps: ReplayableSource<GpsSample, R>,
    parking: ReplayableSource<ParkingReading, R>,
    user_id: UserId,
    last_captured_at: Option<DateTime<Utc>>,
}

impl Aggregator<File> {
    /// Open the three source files named in the config
    pub fn open(config: &Config) -> Result<Self, SourceError> {
        Ok(Self::new(
            ReplayableSource::open(config.accelerometer_file())?,
            ReplayableSource::open(config.gps_file())?,
            ReplayableSource::open(config.parking_file())?,
            config.user_id(),
        ))
    }
}

impl<R: Read + Seek> Aggregator<R> {
    pub fn new(
        accelerometer: ReplayableSource<AccelerometerSample, R>,
        gps: ReplayableSource<GpsSample, R>,
        parking: ReplayableSource<ParkingReading, R>,
        user_id: UserId,
    ) -> Self {
        Self { accelerometer, gps, parking, user_id, last_captured_at: None }
    }

    /// Pull accelerometer, gps, then parking and stamp the result
    pub fn read(&mut self) -> Result<AggregatedData, SourceError> {
        let accelerometer = self.accelerometer.next()?;
        let gps = self.gps.next()?;
        let reading = self.parking.next()?;
        let parking = ParkingSample::new(reading.empty_count, reading.gps.unwrap_or(gps));

        // Wall clock may step backwards; captured_at must not
        let now = Utc::now();
        let captured_at = match self.last_captured_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_captured_at = Some(captured_at);

        Ok(AggregatedData { accelerometer, gps, parking, captured_at, user_id: self.user_id })
    }

    /// Close all three sources (idempotent)
    pub fn close(&mut self) {
        self.accelerometer.close();
        self.gps.close();
        self.parking.close();
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_open(&self) -> bool {
        self.accelerometer.is_open() && self.gps.is_open() && self.parking.is_open()
    }
}
