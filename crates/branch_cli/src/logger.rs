use log::{Level, LevelFilter, Log, Metadata, Record};

/// Writes `[branch] LEVEL target: message` lines to stderr.
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error | Level::Warn => eprintln!(
                "[branch] {:<5} {}: {}",
                record.level(),
                record.target(),
                record.args()
            ),
            _ => eprintln!("[branch] {:<5} {}", record.level(), record.args()),
        }
    }

    fn flush(&self) {}
}

/// Installs the stderr logger. `verbose` lowers the threshold from `info`
/// to `debug`; a second call is a no-op.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}
