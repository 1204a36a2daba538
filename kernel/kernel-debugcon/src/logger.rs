use crate::debugcon_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A `log::Log` backend writing to the debug console.
pub struct DebugconLogger {
    max_level: LevelFilter,
}

impl DebugconLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once during early init.
    ///
    /// # Errors
    /// Fails if a logger was already installed.
    #[allow(static_mut_refs, clippy::missing_panics_doc)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        // log::set_logger expects &'static Log; keep the instance in a static
        // since the kernel has no allocator at this point.
        static mut LOGGER: Option<DebugconLogger> = None;

        unsafe {
            LOGGER = Some(self);
            log::set_logger(LOGGER.as_ref().unwrap() as &'static dyn Log)?;
        }
        log::set_max_level(LevelFilter::Trace);
        Ok(())
    }
}

impl Log for DebugconLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n", straight into the sink.
        debugcon_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // no-op for the debug port
    }
}
