//! Turns staged byte counts into chat-style progress messages.
//!
//! The staging layer only knows `(bytes_done, total_bytes)`. A
//! [`ProgressReporter`] binds that callback to one task, decides whether the
//! current percentage sits on a cadence tick and hands a finished
//! [`ProgressUpdate`] to the protocol layer through a [`ProgressSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{error, trace};
use serde::Serialize;
use thiserror::Error;

use crate::policy::PROGRESS_FLOOR;
use crate::staging::ProgressCallback;
use crate::task::Task;

pub const CANCEL_BUTTON_TEXT: &str = "cancel task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStyle {
    Code,
    Bold,
}

/// Styled range of a message, measured in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSpan {
    pub style: SpanStyle,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelButton {
    pub text: String,
    pub payload: String,
}

impl CancelButton {
    pub fn for_task(key: &str) -> Self {
        Self {
            text: CANCEL_BUTTON_TEXT.to_string(),
            payload: format!("cancel {key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub spans: Vec<TextSpan>,
    pub cancel: CancelButton,
}

/// Delivery side of progress messages, owned by the protocol layer.
pub trait ProgressSink: Send + Sync {
    fn emit_update(&self, update: ProgressUpdate);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StyleError {
    #[error("styled segment is empty")]
    EmptySpan,
    #[error("span offset exceeds message limits")]
    OffsetOverflow,
}

enum Segment<'a> {
    Plain(&'a str),
    Styled(SpanStyle, &'a str),
}

fn perform(segments: &[Segment<'_>]) -> Result<(String, Vec<TextSpan>), StyleError> {
    let mut text = String::new();
    let mut spans = Vec::new();
    let mut cursor = 0usize;
    for segment in segments {
        match segment {
            Segment::Plain(part) => {
                text.push_str(part);
                cursor += part.encode_utf16().count();
            }
            Segment::Styled(style, part) => {
                let length = part.encode_utf16().count();
                if length == 0 {
                    return Err(StyleError::EmptySpan);
                }
                spans.push(TextSpan {
                    style: *style,
                    offset: u32::try_from(cursor).map_err(|_| StyleError::OffsetOverflow)?,
                    length: u32::try_from(length).map_err(|_| StyleError::OffsetOverflow)?,
                });
                text.push_str(part);
                cursor += length;
            }
        }
    }
    Ok((text, spans))
}

pub fn format_speed(bytes_read: u64, start_time: Option<Instant>) -> String {
    let Some(start) = start_time else {
        return "0MB/s".to_string();
    };
    let elapsed = start.elapsed().as_secs_f64();
    if elapsed <= f64::EPSILON {
        return "0MB/s".to_string();
    }
    let speed = bytes_read as f64 / 1024.0 / 1024.0 / elapsed;
    format!("{speed:.2}MB/s")
}

/// Integer percentage, truncated, computed without float rounding.
fn percent_floor(bytes_read: u64, content_length: u64) -> u64 {
    if content_length == 0 {
        return 0;
    }
    (bytes_read as u128 * 100 / content_length as u128) as u64
}

/// Whether `bytes_read` of `content_length` lands on a reportable tick.
pub fn should_emit(
    declared_size: u64,
    bytes_read: u64,
    content_length: u64,
    update_count: u32,
) -> bool {
    if declared_size < PROGRESS_FLOOR || update_count == 0 {
        return false;
    }
    let step = (100 / update_count.min(100)) as u64;
    let percent = percent_floor(bytes_read, content_length);
    percent != 0 && percent % step == 0
}

/// Task details captured once so the callback does not borrow the task.
#[derive(Debug, Clone)]
struct ReportTarget {
    label: String,
    file_name: String,
    destination: String,
    key: String,
    chat_id: i64,
    message_id: i64,
    declared_size: u64,
    start_time: Option<Instant>,
}

pub struct ProgressReporter {
    target: ReportTarget,
    update_count: u32,
    last_percent: AtomicU64,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(task: &Task, update_count: u32, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            target: ReportTarget {
                label: task.to_string(),
                file_name: task.file_name().to_string(),
                destination: format!("[{}]:{}", task.storage_name, task.storage_path),
                key: task.key(),
                chat_id: task.reply_chat_id,
                message_id: task.reply_message_id,
                declared_size: task.file.size,
                start_time: task.start_time,
            },
            update_count,
            last_percent: AtomicU64::new(0),
            sink,
        }
    }

    /// Emits an update if this snapshot crosses a new tick. Returns whether it did.
    pub fn report(&self, bytes_read: u64, content_length: u64) -> bool {
        let progress = if content_length == 0 {
            0.0
        } else {
            bytes_read as f64 * 100.0 / content_length as f64
        };
        trace!("Downloading {}: {progress:.2}%", self.target.label);

        if !should_emit(
            self.target.declared_size,
            bytes_read,
            content_length,
            self.update_count,
        ) {
            return false;
        }
        let percent = percent_floor(bytes_read, content_length);
        if self.last_percent.fetch_max(percent, Ordering::SeqCst) >= percent {
            return false;
        }

        let (text, spans) = self.build_message(bytes_read, progress);
        self.sink.emit_update(ProgressUpdate {
            chat_id: self.target.chat_id,
            message_id: self.target.message_id,
            text,
            spans,
            cancel: CancelButton::for_task(&self.target.key),
        });
        true
    }

    fn build_message(&self, bytes_read: u64, progress: f64) -> (String, Vec<TextSpan>) {
        let speed = format_speed(bytes_read, self.target.start_time);
        let percent = format!("{progress:.2}%");
        let segments = [
            Segment::Plain("Processing download task\nFile: "),
            Segment::Styled(SpanStyle::Code, &self.target.file_name),
            Segment::Plain("\nSave path: "),
            Segment::Styled(SpanStyle::Code, &self.target.destination),
            Segment::Plain("\nAverage speed: "),
            Segment::Styled(SpanStyle::Bold, &speed),
            Segment::Plain("\nProgress: "),
            Segment::Styled(SpanStyle::Bold, &percent),
        ];
        match perform(&segments) {
            Ok(built) => built,
            Err(err) => {
                error!("Failed to build progress entities: {err}");
                let text = segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Plain(part) | Segment::Styled(_, part) => *part,
                    })
                    .collect();
                (text, Vec::new())
            }
        }
    }

    /// Binds this reporter to the transport-agnostic staging callback.
    pub fn into_callback(self) -> ProgressCallback {
        let reporter = Arc::new(self);
        Arc::new(move |done, total| {
            reporter.report(done, total);
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::policy::{update_cadence_for, MIB};
    use crate::task::RemoteFile;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub updates: Mutex<Vec<ProgressUpdate>>,
    }

    impl RecordingSink {
        pub(crate) fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    impl ProgressSink for RecordingSink {
        fn emit_update(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }
    }

    fn task(size: u64, name: &str) -> Task {
        Task::new(
            RemoteFile {
                location: "https://example.com/file".into(),
                size,
                name: name.into(),
                supports_ranges: true,
            },
            "nas",
            "videos/clip.mp4",
            42,
            7,
        )
    }

    fn span_text(text: &str, span: &TextSpan) -> String {
        let units: Vec<u16> = text.encode_utf16().collect();
        let start = span.offset as usize;
        String::from_utf16(&units[start..start + span.length as usize]).unwrap()
    }

    #[test]
    fn no_updates_below_floor() {
        let size = 49 * MIB;
        for step in 1..=100u64 {
            assert!(!should_emit(size, size * step / 100, size, 5));
        }
    }

    #[test]
    fn updates_only_on_ticks() {
        let size = 600 * MIB;
        let count = update_cadence_for(size);
        assert_eq!(count, 20);
        let ticks: Vec<u64> = (0..=100u64)
            .filter(|percent| should_emit(size, size * percent / 100, size, count))
            .collect();
        assert_eq!(ticks, (1..=20).map(|i| i * 5).collect::<Vec<_>>());
    }

    #[test]
    fn zero_progress_is_suppressed() {
        assert!(!should_emit(100 * MIB, 1, 100 * MIB, 5));
        assert!(!should_emit(100 * MIB, 0, 0, 5));
    }

    #[test]
    fn speed_without_start_is_zero() {
        assert_eq!(format_speed(10 * MIB, None), "0MB/s");
    }

    #[test]
    fn speed_is_reported_in_megabytes() {
        let start = Instant::now() - Duration::from_secs(2);
        let speed = format_speed(20 * MIB, Some(start));
        assert!(speed.ends_with("MB/s"));
        let value: f64 = speed.trim_end_matches("MB/s").parse().unwrap();
        assert!(value > 5.0 && value <= 10.0, "{speed}");
    }

    #[test]
    fn message_carries_styled_fields_and_cancel_button() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(&task(100 * MIB, "clip.mp4"), 5, sink.clone());
        assert!(reporter.report(40 * MIB, 100 * MIB));

        let updates = sink.updates.lock().unwrap();
        let update = &updates[0];
        assert_eq!(update.chat_id, 42);
        assert_eq!(update.message_id, 7);
        assert_eq!(update.cancel.text, "cancel task");
        assert_eq!(update.cancel.payload, "cancel 42:7");
        assert!(update.text.contains("File: clip.mp4"));
        assert!(update.text.contains("Save path: [nas]:videos/clip.mp4"));
        assert!(update.text.contains("Average speed: 0MB/s"));
        assert!(update.text.ends_with("Progress: 40.00%"));

        let styles: Vec<SpanStyle> = update.spans.iter().map(|span| span.style).collect();
        assert_eq!(
            styles,
            vec![SpanStyle::Code, SpanStyle::Code, SpanStyle::Bold, SpanStyle::Bold]
        );
        assert_eq!(span_text(&update.text, &update.spans[0]), "clip.mp4");
        assert_eq!(
            span_text(&update.text, &update.spans[1]),
            "[nas]:videos/clip.mp4"
        );
        assert_eq!(span_text(&update.text, &update.spans[3]), "40.00%");
    }

    #[test]
    fn span_offsets_count_utf16_units() {
        let (text, spans) = perform(&[
            Segment::Plain("é😀 "),
            Segment::Styled(SpanStyle::Bold, "x"),
        ])
        .unwrap();
        assert_eq!(text, "é😀 x");
        assert_eq!(spans[0].offset, 4);
        assert_eq!(spans[0].length, 1);
    }

    #[test]
    fn styling_failure_falls_back_to_plain_text() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(&task(100 * MIB, ""), 5, sink.clone());
        assert!(reporter.report(20 * MIB, 100 * MIB));

        let updates = sink.updates.lock().unwrap();
        assert!(updates[0].spans.is_empty());
        assert!(updates[0].text.starts_with("Processing download task\nFile: \nSave path"));
        assert_eq!(updates[0].cancel.payload, "cancel 42:7");
    }

    #[test]
    fn repeated_tick_is_reported_once() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(&task(100 * MIB, "a.bin"), 5, sink.clone());
        assert!(reporter.report(20 * MIB, 100 * MIB));
        assert!(!reporter.report(20 * MIB + 10, 100 * MIB));
        assert!(reporter.report(40 * MIB, 100 * MIB));
        assert!(!reporter.report(20 * MIB, 100 * MIB));
        assert_eq!(sink.count(), 2);
    }

    #[test]
    fn callback_drives_reporter() {
        let sink = Arc::new(RecordingSink::default());
        let callback =
            ProgressReporter::new(&task(100 * MIB, "a.bin"), 5, sink.clone()).into_callback();
        for percent in 1..=100u64 {
            callback(percent * MIB, 100 * MIB);
        }
        assert_eq!(sink.count(), 5);
    }
}
