//! Run history: an append-only log sink mirrored into a display buffer.

use crate::metrics::format_duration_long;
use crate::session::{ErrorNote, RunSummary};
use chrono::{DateTime, Local};
use std::io;
use tracing::warn;

pub const ENTRY_SEPARATOR: &str = "\n\n";
pub const STOPPED_MARKER: &str = "STOPPED";
pub const EMPTY_HISTORY: &str = "No History";
pub const CANCELLED_LINE: &str = " > STOPPED:\tCancelled";
pub const CRASH_LINE: &str = " > STOPPED:\t! CRASH !";

/// A sink must hold at least this many bytes to be restored from.
pub const MIN_RESTORE_BYTES: usize = 6;

/// Durable side of the history; the controller is its only writer.
pub trait HistorySink {
    fn append(&mut self, text: &str) -> io::Result<()>;
    fn has_entries(&self) -> bool;
    fn read_all(&self) -> io::Result<String>;
}

#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    contents: String,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

impl HistorySink for MemorySink {
    fn append(&mut self, text: &str) -> io::Result<()> {
        self.contents.push_str(text);
        Ok(())
    }

    fn has_entries(&self) -> bool {
        self.contents.len() >= MIN_RESTORE_BYTES
    }

    fn read_all(&self) -> io::Result<String> {
        Ok(self.contents.clone())
    }
}

pub fn header_block(at: DateTime<Local>, size_mb: u32, threads: u32) -> String {
    format!(
        "[{}]\n > TESTING:\t{size_mb} MB / {threads} threads\n",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn summary_block(summary: &RunSummary) -> String {
    format!(
        " > STOPPED:\t{}\n    MemUsage:\t{:.1} %\n    Duration:\t{}\n    Coverage:\t{:.0} %\n    MaxSpeed:\t{:.3} MB/s",
        summary.verdict(),
        summary.memory_usage_percent,
        format_duration_long(summary.duration),
        summary.coverage_percent,
        summary.max_speed,
    )
}

pub struct HistoryRecorder {
    buffer: String,
    sink: Box<dyn HistorySink>,
}

impl HistoryRecorder {
    pub fn new(sink: Box<dyn HistorySink>) -> Self {
        Self {
            buffer: String::new(),
            sink,
        }
    }

    pub fn with_buffer(sink: Box<dyn HistorySink>, buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
            sink,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn sink(&self) -> &dyn HistorySink {
        self.sink.as_ref()
    }

    /// Closes an entry the previous process left open. Returns whether a
    /// crash marker was written.
    pub fn recover_crash(&mut self) -> bool {
        if self.buffer.trim().is_empty() {
            return false;
        }
        let last_entry = self
            .buffer
            .trim_end()
            .rsplit(ENTRY_SEPARATOR)
            .next()
            .unwrap_or_default();
        if last_entry.contains(STOPPED_MARKER) {
            return false;
        }
        warn!(event = "history_crash_recovered");
        self.write(CRASH_LINE, false);
        true
    }

    pub fn begin_entry(&mut self, at: DateTime<Local>, size_mb: u32, threads: u32) {
        self.write(&header_block(at, size_mb, threads), true);
    }

    pub fn record_error(&mut self, note: &ErrorNote) {
        self.write(&note.history_line(), false);
    }

    pub fn record_stop(&mut self, summary: &RunSummary) {
        if summary.is_cancelled() {
            self.record_cancel();
        } else {
            self.write(&summary_block(summary), false);
        }
    }

    /// The log file keeps the cancelled block; the display buffer drops it.
    pub fn record_cancel(&mut self) {
        if let Err(err) = self.sink.append(CANCELLED_LINE) {
            warn!(event = "history_append_failed", error = %err);
        }
        self.remove_last_entry();
    }

    /// Blocks of the display buffer, oldest first.
    pub fn entries(&self) -> Vec<String> {
        let entries: Vec<String> = self
            .buffer
            .split(ENTRY_SEPARATOR)
            .map(str::trim_end)
            .filter(|entry| !entry.trim().is_empty())
            .map(str::to_string)
            .collect();
        if entries.is_empty() {
            vec![EMPTY_HISTORY.to_string()]
        } else {
            entries
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn remove_last_entry(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        match self.buffer.rfind(ENTRY_SEPARATOR) {
            Some(index) => self.buffer.truncate(index),
            None => self.buffer.clear(),
        }
        true
    }

    /// Replaces the display buffer with the sink's contents.
    pub fn restore_from_sink(&mut self) -> bool {
        if !self.sink.has_entries() {
            return false;
        }
        match self.sink.read_all() {
            Ok(contents) => {
                self.buffer = contents.trim_start().to_string();
                true
            }
            Err(err) => {
                warn!(event = "history_read_failed", error = %err);
                false
            }
        }
    }

    fn write(&mut self, text: &str, new_entry: bool) {
        if new_entry && !self.buffer.is_empty() {
            self.buffer.push_str(ENTRY_SEPARATOR);
        }
        self.buffer.push_str(text);

        let durable = if new_entry && self.sink.has_entries() {
            format!("{ENTRY_SEPARATOR}{text}")
        } else {
            text.to_string()
        };
        if let Err(err) = self.sink.append(&durable) {
            warn!(event = "history_append_failed", error = %err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<String>>);

    impl HistorySink for SharedSink {
        fn append(&mut self, text: &str) -> io::Result<()> {
            self.0.borrow_mut().push_str(text);
            Ok(())
        }

        fn has_entries(&self) -> bool {
            self.0.borrow().len() >= MIN_RESTORE_BYTES
        }

        fn read_all(&self) -> io::Result<String> {
            Ok(self.0.borrow().clone())
        }
    }

    fn at() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 0)
            .single()
            .expect("valid local time")
    }

    fn summary(errors: u32, max_speed: f64) -> RunSummary {
        RunSummary {
            memory_usage_percent: 12.5,
            duration: Duration::from_secs(3_661),
            coverage_percent: 250.4,
            max_speed,
            error_count: errors,
        }
    }

    #[test]
    fn header_and_summary_layout() {
        assert_eq!(
            header_block(at(), 2_000, 4),
            "[2024-03-01 12:30:00]\n > TESTING:\t2000 MB / 4 threads\n"
        );
        assert_eq!(
            summary_block(&summary(0, 1_234.5)),
            " > STOPPED:\t** PASS **\n    MemUsage:\t12.5 %\n    Duration:\t0:01:01:01\n    Coverage:\t250 %\n    MaxSpeed:\t1234.500 MB/s"
        );
    }

    #[test]
    fn entries_are_separated_in_buffer_and_sink() {
        let sink = SharedSink::default();
        let mut history = HistoryRecorder::new(Box::new(sink.clone()));
        history.begin_entry(at(), 100, 1);
        history.record_stop(&summary(2, 5.0));
        history.begin_entry(at(), 200, 2);
        history.record_stop(&summary(0, 5.0));

        assert_eq!(history.entries().len(), 2);
        assert_eq!(*sink.0.borrow(), history.buffer());
        assert!(history.entries()[0].contains("2 Errors"));
    }

    #[test]
    fn cancel_keeps_log_but_drops_display_entry() {
        let sink = SharedSink::default();
        let mut history = HistoryRecorder::new(Box::new(sink.clone()));
        history.begin_entry(at(), 100, 1);
        history.record_stop(&summary(0, 3.0));
        history.begin_entry(at(), 100, 1);
        history.record_stop(&summary(0, 0.0));

        assert_eq!(history.entries().len(), 1);
        assert!(sink.0.borrow().ends_with(CANCELLED_LINE));
    }

    #[test]
    fn crash_marker_written_once_for_open_entry() {
        let mut history =
            HistoryRecorder::with_buffer(Box::new(MemorySink::new()), header_block(at(), 100, 1));
        assert!(history.recover_crash());
        assert!(!history.recover_crash());
        assert_eq!(history.buffer().matches("CRASH").count(), 1);

        let mut empty = HistoryRecorder::new(Box::new(MemorySink::new()));
        assert!(!empty.recover_crash());
    }

    #[test]
    fn closed_summary_entry_is_not_a_crash() {
        let mut history = HistoryRecorder::new(Box::new(MemorySink::new()));
        history.begin_entry(at(), 100, 1);
        history.record_error(&ErrorNote::Numbered {
            index: 1,
            at: Duration::from_secs(5),
        });
        history.record_stop(&summary(1, 4.0));
        assert!(history.buffer().ends_with("MaxSpeed:\t4.000 MB/s"));

        assert!(!history.recover_crash());
        assert!(!history.buffer().contains("CRASH"));

        history.begin_entry(at(), 100, 1);
        history.record_stop(&summary(0, 0.0));
        assert!(!history.recover_crash());
        assert_eq!(history.entries().len(), 1);
    }

    #[test]
    fn empty_buffer_reports_no_history() {
        let mut history = HistoryRecorder::new(Box::new(MemorySink::new()));
        assert_eq!(history.entries(), vec![EMPTY_HISTORY.to_string()]);
        assert!(!history.remove_last_entry());

        history.begin_entry(at(), 100, 1);
        history.clear();
        assert_eq!(history.entries(), vec![EMPTY_HISTORY.to_string()]);
    }

    #[test]
    fn restore_requires_minimum_sink_size() {
        let mut short = HistoryRecorder::new(Box::new(MemorySink::with_contents("abc")));
        assert!(!short.restore_from_sink());

        let mut full =
            HistoryRecorder::new(Box::new(MemorySink::with_contents("\n\n[old]\n > STOPPED:\tx")));
        assert!(full.restore_from_sink());
        assert_eq!(full.buffer(), "[old]\n > STOPPED:\tx");
    }
}
