use std::sync::Once;

use crate::util::config::render_config;

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Keep it terse; hosts usually interleave this with their own output.
        eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;
static INIT: Once = Once::new();

/// Install the console logger.
///
/// Safe to call repeatedly; only the first call has an effect. If the host already
/// installed its own logger, that one is kept.
pub fn init_logger() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(render_config().log_level);
        }
    });
}
