/// Formats a duration as `HH:MM:SS`, hours are not wrapped at 24.
pub fn format_hms(duration: &std::time::Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
