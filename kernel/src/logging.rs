//! `log` crate integration: a `log::Log` that writes
//! formatted records straight to the console's `ByteSink`, installed once
//! during boot.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::terminal::ByteSink;

/// Wraps a `ByteSink` so `log::Record` formatting can go through
/// `core::fmt::Write` without an intermediate allocation.
struct SinkWriter<'a, S: ByteSink>(&'a S);

impl<S: ByteSink> Write for SinkWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}

/// The installed logger. A `Mutex` around the sink keeps interleaved log
/// lines from different call sites from garbling each other; logging
/// itself never happens inside an IRQ-masked section long enough to risk
/// the deadlock `sync::without_interrupts` exists to avoid.
pub struct KernelLogger<S: ByteSink + Sync + 'static> {
    sink: Mutex<&'static S>,
}

impl<S: ByteSink + Sync + 'static> KernelLogger<S> {
    pub const fn new(sink: &'static S) -> Self {
        KernelLogger { sink: Mutex::new(sink) }
    }
}

impl<S: ByteSink + Sync + 'static> Log for KernelLogger<S> {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = self.sink.lock();
        let mut writer = SinkWriter(*sink);
        let _ = writeln!(writer, "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Installs `logger` as the global `log` backend at `LevelFilter::Info`.
pub fn install<S: ByteSink + Sync + 'static>(logger: &'static KernelLogger<S>) {
    let _ = log::set_logger(logger);
    log::set_max_level(LevelFilter::Info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::uart::HostUart;

    static SINK: HostUart = HostUart::new();
    static LOGGER: KernelLogger<HostUart> = KernelLogger::new(&SINK);

    #[test]
    fn a_log_record_reaches_the_sink() {
        LOGGER.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("disk is getting full"))
                .build(),
        );
        let out = SINK.lines.lock().clone();
        assert!(out.contains("disk is getting full"));
        assert!(out.contains("WARN"));
    }
}
