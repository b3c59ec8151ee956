use colored::{ColoredString, Colorize};
use env_logger::Env;
use log::{warn, Level};
use std::io::Write;

/// Initializes the logger of the monitor.
///
/// Each line is prefixed with a UTC timestamp, the level and the colored
/// component `name`. Lines at `debug` and `trace` additionally carry the
/// module they were emitted from.
///
/// The default filter is `info`, which can be overridden through `RUST_LOG`.
pub fn init_logging(name: ColoredString) {
    if env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
            let level_style = buf.default_level_style(record.level());
            if record.level() >= Level::Debug {
                writeln!(
                    buf,
                    "{timestamp} {level_style}{}{level_style:#} {name} {} {}",
                    record.level(),
                    record.target().dimmed(),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{timestamp} {level_style}{}{level_style:#} {name} {}",
                    record.level(),
                    record.args()
                )
            }
        })
        .try_init()
        .is_err()
    {
        warn!("Unable to initialize logging -- has it already been initialized?")
    }
}

/// Formats a line that the monitor itself contributes to the logs of a
/// pipeline, such that followers can tell it apart from pipeline output.
pub fn control_plane_line(pipeline_name: &str, message: &str) -> String {
    let t = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
    format!("{t} {} {message}", format!("[monitor:{pipeline_name}]").cyan())
}
