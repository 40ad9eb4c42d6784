//! Recording module for workout telemetry export.

pub mod exporter_csv;
pub mod series;
pub mod types;

pub use exporter_csv::{export_csv, export_csv_to_file, generate_csv_filename};
pub use series::{chart_series, chart_series_json};
pub use types::{ChartPoint, ExportError, Recording};
