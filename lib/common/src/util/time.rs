use std::time::Duration;

/// Pretty-print an elapsed time (used in logs and diagnostics)
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    let micros = nanos / 1_000;
    let millis = duration.as_millis();
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = seconds / 3_600;

    if hours > 0 {
        format!("{:.3}h", seconds as f64 / 3_600.0)
    } else if minutes > 0 {
        format!("{:.3}m", seconds as f64 / 60.0)
    } else if seconds > 0 {
        format!("{:.3}s", duration.as_secs_f64())
    } else if millis > 0 {
        format!("{:.3}ms", micros as f64 / 1_000.0)
    } else if micros > 0 {
        format!("{:.3}μs", nanos as f64 / 1_000.0)
    } else {
        format!("{}ns", nanos)
    }
}
