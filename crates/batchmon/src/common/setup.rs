use env_logger::DEFAULT_FILTER_ENV;
use env_logger::fmt::style::{AnsiColor, Style};
use log::LevelFilter;
use std::io::Write;

fn base_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Full records (millisecond timestamps, complete module path) are used when debugging.
fn wants_full_records(verbose: bool, filter: Option<&str>) -> bool {
    verbose || filter.is_some_and(|f| f.contains("debug") || f.contains("trace"))
}

/// `batchmon::monitor::jobs` -> `jobs`
fn subsystem(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Installs the global logger of the monitor.
///
/// `RUST_LOG` overrides the level selected by `verbose`. Outside of debugging, each line is
/// `<time> <level> [<subsystem>] <message>`, so that the check which produced a line is visible.
pub fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(base_level(verbose));

    let filter = std::env::var(DEFAULT_FILTER_ENV).ok();
    if wants_full_records(verbose, filter.as_deref()) {
        builder.format_timestamp_millis();
    } else {
        builder.format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();
            let dim = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
            writeln!(
                buf,
                "{dim}{}{dim:#} {level_style}{:<5}{level_style:#} {dim}[{}]{dim:#} {}",
                buf.timestamp_seconds(),
                record.level(),
                subsystem(record.target()),
                record.args()
            )
        });
    }

    builder.parse_default_env();
    builder.init();
}
