//! Backtraces for diagnostics raised by the storage layer.
//!
//! Recursion and race diagnostics are created deep inside the slot machinery. Their traces are
//! only useful from the point where the caller's computation starts, so sanitizing drops the
//! leading frames that belong to the backtrace machinery and to this crate.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

/// Symbol prefixes of frames that are stripped from the top of a trace.
const STORAGE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::backtrace_rs",
    "backtrace::",
    "lockstore::",
    "<lockstore::",
];

/// A rendered backtrace, split into frames.
#[derive(Clone, Default)]
pub struct SanitizedTrace {
    frames: Arc<[String]>,
    sanitized: bool,
}

impl SanitizedTrace {
    /// Captures the current backtrace.
    ///
    /// This respects `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`: with backtraces disabled the trace
    /// is empty.
    pub fn capture() -> Self {
        Self::from_backtrace(&Backtrace::capture())
    }

    pub fn from_backtrace(backtrace: &Backtrace) -> Self {
        if backtrace.status() != BacktraceStatus::Captured {
            return Self::default();
        }
        Self::from_rendered(&backtrace.to_string())
    }

    /// Splits a rendered backtrace into frames.
    ///
    /// A frame starts at a numbered line (`  12: some::symbol`); the unnumbered lines that follow
    /// (source locations and inlined symbols) belong to it.
    pub fn from_rendered(rendered: &str) -> Self {
        let mut frames: Vec<String> = Vec::new();
        for line in rendered.lines() {
            match frame_symbol(line) {
                Some(symbol) => frames.push(symbol.to_owned()),
                None => {
                    if let Some(frame) = frames.last_mut() {
                        frame.push('\n');
                        frame.push_str(line.trim());
                    }
                }
            }
        }
        Self {
            frames: frames.into(),
            sanitized: false,
        }
    }

    /// Drops the leading frames that belong to the storage layer.
    ///
    /// Sanitizing twice is a no-op.
    pub fn sanitized(self) -> Self {
        if self.sanitized {
            return self;
        }
        let first_foreign = self
            .frames
            .iter()
            .position(|frame| !is_storage_frame(frame))
            .unwrap_or(self.frames.len());
        Self {
            frames: self.frames[first_foreign..].into(),
            sanitized: true,
        }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn frame_symbol(line: &str) -> Option<&str> {
    let (index, symbol) = line.trim_start().split_once(": ")?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(symbol.trim())
}

fn is_storage_frame(frame: &str) -> bool {
    STORAGE_FRAME_PREFIXES
        .iter()
        .any(|prefix| frame.starts_with(prefix))
}

impl fmt::Display for SanitizedTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, frame) in self.frames.iter().enumerate() {
            let mut lines = frame.lines();
            if let Some(symbol) = lines.next() {
                writeln!(f, "{index:4}: {symbol}")?;
            }
            for line in lines {
                writeln!(f, "             {line}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SanitizedTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizedTrace")
            .field("frames", &self.frames.len())
            .field("sanitized", &self.sanitized)
            .finish()
    }
}
