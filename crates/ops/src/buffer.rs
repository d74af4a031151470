use std::collections::VecDeque;

/// Default line cap, overridable via `KESTREL_LOG_BUFFER_CAP`.
pub const DEFAULT_LOG_CAP: usize = 10_000;

/// Bounded log tail. Appends past the cap drop the oldest lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    cap: usize,
}

impl Default for LogBuffer {
    fn default() -> Self { Self::with_cap(DEFAULT_LOG_CAP) }
}

impl LogBuffer {
    /// A cap of zero is treated as one.
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { lines: VecDeque::with_capacity(cap.min(1024)), cap }
    }

    pub fn cap(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.lines.len() }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn push(&mut self, line: impl Into<String>) {
        while self.lines.len() >= self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn clear(&mut self) { self.lines.clear(); }

    pub fn lines(&self) -> impl Iterator<Item = &str> { self.lines.iter().map(String::as_str) }

    pub fn to_vec(&self) -> Vec<String> { self.lines.iter().cloned().collect() }

    /// Removes and returns every buffered line.
    pub fn drain(&mut self) -> Vec<String> { self.lines.drain(..).collect() }

    /// Buffer contents as newline-joined text, ready to write to a file.
    pub fn export(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Case-insensitive substring search; an empty needle matches everything.
    pub fn filter<'a>(&'a self, needle: &str) -> Vec<&'a str> {
        let needle = needle.to_lowercase();
        self.lines().filter(|l| needle.is_empty() || l.to_lowercase().contains(&needle)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_cap_lines_in_order() {
        let mut buf = LogBuffer::with_cap(3);
        for i in 0..10 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.to_vec(), ["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn export_and_filter() {
        let mut buf = LogBuffer::default();
        buf.push("GET /healthz 200");
        buf.push("ERROR db timeout");
        buf.push("GET /api 500");
        assert_eq!(buf.export(), "GET /healthz 200\nERROR db timeout\nGET /api 500\n");
        assert_eq!(buf.filter("error"), ["ERROR db timeout"]);
        assert_eq!(buf.filter("").len(), 3);
        assert_eq!(buf.drain().len(), 3);
        assert!(buf.is_empty());
        assert_eq!(buf.export(), "");
    }

    #[test]
    fn zero_cap_still_holds_latest() {
        let mut buf = LogBuffer::with_cap(0);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.to_vec(), ["b"]);
    }
}
