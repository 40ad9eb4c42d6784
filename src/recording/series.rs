//! Chart series for rendering a workout timeline.
//!
//! `second_index` runs continuously from workout start; `label` restarts at
//! zero at every segment boundary.

use crate::recording::types::{ChartPoint, ExportError, Recording};

/// Build the chart series for a recording.
pub fn chart_series(recording: &Recording) -> Vec<ChartPoint> {
    let mut points = Vec::with_capacity(recording.timeline.len());
    let mut slots = recording.timeline.iter();

    'segments: for (segment_index, segment) in recording.segments.iter().enumerate() {
        for offset in 0..segment.duration_seconds {
            let Some(slot) = slots.next() else {
                break 'segments;
            };

            points.push(ChartPoint {
                second_index: slot.second_index,
                segment_index,
                label: offset.to_string(),
                target_power_watts: slot.target_power_watts,
                power_watts: slot.measured_power_watts,
                speed_kmh: slot.measured_speed_kmh,
                cadence_rpm: slot.measured_cadence_rpm,
            });
        }
    }

    points
}

/// Chart series as a JSON array.
pub fn chart_series_json(recording: &Recording) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&chart_series(recording))?)
}
