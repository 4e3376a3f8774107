use std::io::{IsTerminal, Write};

use colored::Colorize;

use crate::progress::{ProgressSink, ProgressUpdate, SpanStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Quiet,
    Text,
    Json,
}

/// Prints progress updates to the terminal for the command-line front end.
pub struct TerminalSink {
    mode: SinkMode,
    styled: bool,
}

impl TerminalSink {
    pub fn new(mode: SinkMode) -> Self {
        Self {
            mode,
            styled: std::io::stderr().is_terminal(),
        }
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    fn render_text(&self, update: &ProgressUpdate) -> String {
        let mut out = String::new();
        for (style, piece) in split_spans(update) {
            match style {
                Some(SpanStyle::Code) if self.styled => out.push_str(&piece.cyan().to_string()),
                Some(SpanStyle::Bold) if self.styled => out.push_str(&piece.bold().to_string()),
                _ => out.push_str(&piece),
            }
        }
        out
    }
}

impl ProgressSink for TerminalSink {
    fn emit_update(&self, update: ProgressUpdate) {
        match self.mode {
            SinkMode::Quiet => {}
            SinkMode::Text => {
                let body = self.render_text(&update);
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "{}\n  ({})", body, update.cancel.payload);
                let _ = stderr.flush();
            }
            SinkMode::Json => {
                if let Ok(serialized) = serde_json::to_string(&update) {
                    let mut stdout = std::io::stdout().lock();
                    let _ = writeln!(stdout, "{serialized}");
                    let _ = stdout.flush();
                }
            }
        }
    }
}

/// Cuts the message into runs of plain and styled text.
///
/// Span offsets count UTF-16 units. Spans that do not line up with the text
/// are rendered plain.
fn split_spans(update: &ProgressUpdate) -> Vec<(Option<SpanStyle>, String)> {
    let units: Vec<u16> = update.text.encode_utf16().collect();
    let mut spans = update.spans.clone();
    spans.sort_by_key(|span| span.offset);

    let mut pieces = Vec::new();
    let mut cursor = 0usize;
    for span in spans {
        let start = span.offset as usize;
        let end = start + span.length as usize;
        if start < cursor || end > units.len() {
            continue;
        }
        if start > cursor {
            pieces.push((None, String::from_utf16_lossy(&units[cursor..start])));
        }
        pieces.push((Some(span.style), String::from_utf16_lossy(&units[start..end])));
        cursor = end;
    }
    if cursor < units.len() {
        pieces.push((None, String::from_utf16_lossy(&units[cursor..])));
    }
    pieces
}
