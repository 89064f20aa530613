//! A logger that writes library and CLI records to stderr

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;

/// Writes each record as a single line to stderr
pub struct StderrLogger;

/// Format a record as `[LEVEL target] message`
fn format_record(record: &Record) -> String {
	let level = match record.level() {
		Level::Error => "ERROR".red(),
		Level::Warn => "WARN".yellow(),
		Level::Info => "INFO".green(),
		Level::Debug => "DEBUG".blue(),
		Level::Trace => "TRACE".dimmed(),
	};
	format!("[{level} {}] {}", record.target(), record.args())
}

impl Log for StderrLogger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &Record) {
		if self.enabled(record.metadata()) {
			eprintln!("{}", format_record(record));
		}
	}

	fn flush(&self) {
		std::io::stderr().flush().ok();
	}
}

/// Install [`StderrLogger`] as the global logger with the given maximum level
///
/// Subsequent calls are silently ignored.
pub fn init(level: LevelFilter) {
	static LOGGER: StderrLogger = StderrLogger;

	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}
