use std::sync::Mutex;

/// Sink for the protocol's human-readable diagnostics. Sessions take
/// one at construction so concurrent transfers never share mutable
/// logging state.
pub trait DiagSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Forwards diagnostics to the process-wide logger.
pub struct ConsoleSink;

impl DiagSink for ConsoleSink {
    fn log(&self, line: &str) {
        log::info!("{}", line);
    }
}

/// Discards everything, for silent operation.
pub struct NopSink;

impl DiagSink for NopSink {
    fn log(&self, _line: &str) {}
}

/// Collects diagnostics in memory so tests can assert on the exact lines.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl DiagSink for MemorySink {
    fn log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
