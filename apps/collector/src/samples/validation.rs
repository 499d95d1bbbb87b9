use crate::errors::AppError;
use crate::samples::models::{NewLocationSample, SamplePayload};

/// Provider recorded when the device omits one.
pub const DEFAULT_PROVIDER: &str = "FUSED";

/// Validates an uploaded sample and binds it to the uploading device.
///
/// Fails with `AppError::Validation` naming the first missing required field
/// or the first out-of-range value. `sample_date` and `sample_time` are opaque
/// client strings: presence is checked, format is not.
pub fn validate_sample(
    payload: SamplePayload,
    device_id: &str,
) -> Result<NewLocationSample, AppError> {
    let device_id = require_text("deviceId", Some(device_id.to_string()))?;
    let client_id = require_text("id", payload.id)?;

    let lat = require("lat", payload.lat)?;
    let lon = require("lon", payload.lon)?;
    let acc = payload.acc.unwrap_or(0.0);
    check_range("lat", lat, -90.0, 90.0)?;
    check_range("lon", lon, -180.0, 180.0)?;
    if !(acc.is_finite() && acc >= 0.0) {
        return Err(AppError::Validation(format!(
            "acc must be a non-negative accuracy radius, got {acc}"
        )));
    }

    let captured_at_utc = require("captured_at_utc", payload.captured_at_utc)?;
    if captured_at_utc < 0 {
        return Err(AppError::Validation(format!(
            "captured_at_utc must be non-negative epoch milliseconds, got {captured_at_utc}"
        )));
    }

    Ok(NewLocationSample {
        client_id,
        lat,
        lon,
        acc,
        sample_date: require("sample_date", payload.sample_date)?,
        sample_time: require("sample_time", payload.sample_time)?,
        captured_at_utc,
        provider: payload
            .provider
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        freq: require("freq", payload.freq)?,
        rf_pwr: require("rf_pwr", payload.rf_pwr)?,
        comm_state: require("comm_state", payload.comm_state)?,
        user: require("user", payload.user)?,
        station: require("station", payload.station)?,
        device_id,
    })
}

fn require<T>(field: &str, value: Option<T>) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::Validation(format!("missing required field '{field}'")))
}

// Identity keys must carry at least one non-whitespace character.
fn require_text(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!(
            "missing required field '{field}'"
        ))),
    }
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), AppError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{field} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::fixtures::payload;

    #[test]
    fn test_complete_payload_passes() {
        let sample = validate_sample(payload("dev-42-0001"), "dev-42").unwrap();
        assert_eq!(sample.client_id, "dev-42-0001");
        assert_eq!(sample.device_id, "dev-42");
        assert_eq!(sample.provider, "GPS_CHIP");
        assert_eq!(sample.acc, 4.5);
    }

    #[test]
    fn test_defaults_for_acc_and_provider() {
        let mut p = payload("a");
        p.acc = None;
        p.provider = None;
        let sample = validate_sample(p, "dev-1").unwrap();
        assert_eq!(sample.acc, 0.0);
        assert_eq!(sample.provider, DEFAULT_PROVIDER);
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let mut p = payload("a");
        p.freq = None;
        let err = validate_sample(p, "dev-1").unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("'freq'")));
    }

    #[test]
    fn test_blank_identity_rejected() {
        let err = validate_sample(payload("   "), "dev-1").unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("'id'")));

        let err = validate_sample(payload("a"), "").unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("'deviceId'")));
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let mut p = payload("a");
        p.lat = Some(91.0);
        assert!(validate_sample(p, "dev-1").is_err());

        let mut p = payload("a");
        p.lon = Some(f64::NAN);
        assert!(validate_sample(p, "dev-1").is_err());

        let mut p = payload("a");
        p.acc = Some(-1.0);
        assert!(validate_sample(p, "dev-1").is_err());
    }

    #[test]
    fn test_negative_capture_time_rejected() {
        let mut p = payload("a");
        p.captured_at_utc = Some(-5);
        assert!(validate_sample(p, "dev-1").is_err());
    }

    #[test]
    fn test_date_and_time_are_opaque() {
        let mut p = payload("a");
        p.sample_date = Some("01/03/2025".into());
        p.sample_time = Some("10h15".into());
        let sample = validate_sample(p, "dev-1").unwrap();
        assert_eq!(sample.sample_date, "01/03/2025");
        assert_eq!(sample.sample_time, "10h15");
    }
}
