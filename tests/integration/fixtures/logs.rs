use std::sync::{Arc, Mutex};

use pdm_store::telemetry::{LogRecord, Logger, recording_subscriber};
use tracing::Level;

#[derive(Default)]
pub struct CaptureLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl Logger for CaptureLogger {
    fn log(&self, record: LogRecord) {
        self.records.lock().expect("capture lock").push(record);
    }
}

impl CaptureLogger {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("capture lock").clone()
    }

    pub fn warnings(&self) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == Level::WARN)
            .collect()
    }
}

/// Run `f` with events routed to a fresh capture on this thread only.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Arc<CaptureLogger>) {
    let logger = Arc::new(CaptureLogger::default());
    let result = tracing::subscriber::with_default(recording_subscriber(logger.clone()), f);
    (result, logger)
}
