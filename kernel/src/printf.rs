// Formatted console output for the `log` facade.

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::spinlock::Spinlock;

static PRINTER: Printer = Printer {
    lock: Spinlock::init_lock("pr", ()),
};

/// lock to avoid interleaving concurrent printf's.
pub struct Printer {
    lock: Spinlock<()>,
}

impl Log for Printer {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _pr = self.lock.acquire();
        let mut console = std::io::stderr().lock();
        let _ = writeln!(
            console,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Route `log` records to the console. Only the first call installs the printer.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&PRINTER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installs_once() {
        assert!(init(LevelFilter::Debug).is_ok());
        log::debug!("printer installed");
        assert!(init(LevelFilter::Trace).is_err());
        assert_eq!(log::max_level(), LevelFilter::Debug);
    }
}
