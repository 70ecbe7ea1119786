//! Parsing of ffmpeg's `-progress` key/value stream.

/// One line of `-progress` output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLine {
    /// `frame=<n>`
    Frame(u64),
    /// `progress=end`
    End,
    /// Any other well-formed `key=value` line.
    Other,
    /// Not `key=value`, or a `frame=` value that is not a number.
    Malformed,
}

pub fn parse_progress_line(line: &str) -> ProgressLine {
    let Some((key, value)) = line.trim().split_once('=') else {
        return ProgressLine::Malformed;
    };
    match (key.trim(), value.trim()) {
        ("frame", v) => v.parse().map(ProgressLine::Frame).unwrap_or(ProgressLine::Malformed),
        ("progress", "end") => ProgressLine::End,
        ("", _) => ProgressLine::Malformed,
        _ => ProgressLine::Other,
    }
}

/// Keeps reported progress non-decreasing and capped at the expected total.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    last: Option<u64>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { total, last: None }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the frame to report for a `frame=` value, or `None` if it
    /// would not move progress forward.
    pub fn frame(&mut self, frame: u64) -> Option<u64> {
        let frame = frame.min(self.total);
        match self.last {
            Some(last) if frame <= last => None,
            _ => {
                self.last = Some(frame);
                Some(frame)
            }
        }
    }

    /// Final report: the expected total, unless already reported.
    pub fn finish(&mut self) -> Option<u64> {
        if self.last == Some(self.total) {
            return None;
        }
        self.last = Some(self.total);
        Some(self.total)
    }
}
