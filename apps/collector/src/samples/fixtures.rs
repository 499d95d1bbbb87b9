//! Sample builders shared by the store, ingest and router tests.

use crate::samples::models::{NewLocationSample, SamplePayload};
use crate::samples::validation::validate_sample;

pub fn payload(id: &str) -> SamplePayload {
    SamplePayload {
        id: Some(id.to_string()),
        lat: Some(6.5244),
        lon: Some(3.3792),
        acc: Some(4.5),
        sample_date: Some("2025-03-01".into()),
        sample_time: Some("10:15:00".into()),
        captured_at_utc: Some(1_740_824_100_000),
        provider: Some("GPS_CHIP".into()),
        freq: Some("145.500".into()),
        rf_pwr: Some("5W".into()),
        comm_state: Some("Loud and clear".into()),
        user: Some("op-1".into()),
        station: Some("alpha".into()),
        ..Default::default()
    }
}

pub fn new_sample(client_id: &str, device_id: &str) -> NewLocationSample {
    validate_sample(payload(client_id), device_id).expect("fixture payload is valid")
}
