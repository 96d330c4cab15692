use log::{Level, LevelFilter, Log, Metadata, Record};

/// Console logger: colored level tag, target, message. Trace events
/// from the scheduler land here too, under the `sched` target.
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, meta: &Metadata) -> bool {
        meta.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level_str = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33m WARN\x1b[0m",
            Level::Info => "\x1b[32m INFO\x1b[0m",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[90mTRACE\x1b[0m",
        };

        eprintln!("[{}] {}: {}", level_str, record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

pub fn init() {
    log::set_logger(&LOGGER).expect("Logger already set");
    log::set_max_level(LevelFilter::Trace);
}
