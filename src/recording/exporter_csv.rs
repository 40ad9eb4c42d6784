//! CSV export of a recorded workout timeline.

use crate::recording::types::{ExportError, Recording};
use chrono::Duration;
use std::io::Write;

/// Export the recording's timeline to CSV, one row per planned second.
pub fn export_csv(recording: &Recording) -> Result<String, ExportError> {
    if recording.recorded_seconds() == 0 {
        return Err(ExportError::NoData);
    }

    let mut output = Vec::new();

    writeln!(
        output,
        "timestamp,elapsed_seconds,target_power,power_watts,speed_kmh,cadence_rpm"
    )
    .map_err(|e| ExportError::WriteFailed(e.to_string()))?;

    for slot in &recording.timeline {
        let timestamp = recording.started_at + Duration::seconds(slot.second_index as i64);
        writeln!(
            output,
            "{},{},{},{},{},{}",
            timestamp.to_rfc3339(),
            slot.second_index,
            slot.target_power_watts,
            slot.measured_power_watts
                .map_or(String::new(), |v| v.to_string()),
            slot.measured_speed_kmh
                .map_or(String::new(), |v| format!("{:.2}", v)),
            slot.measured_cadence_rpm
                .map_or(String::new(), |v| format!("{:.1}", v)),
        )
        .map_err(|e| ExportError::WriteFailed(e.to_string()))?;
    }

    String::from_utf8(output).map_err(|e| ExportError::WriteFailed(e.to_string()))
}

/// Export a recording to CSV and write to a file.
pub fn export_csv_to_file(
    recording: &Recording,
    path: &std::path::Path,
) -> Result<(), ExportError> {
    let content = export_csv(recording)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default filename for a CSV export.
pub fn generate_csv_filename(recording: &Recording) -> String {
    let timestamp = recording.started_at.format("%Y%m%d_%H%M%S");
    format!("FtmsRide_{}.csv", timestamp)
}
