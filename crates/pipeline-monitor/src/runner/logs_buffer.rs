use std::collections::VecDeque;

/// Caps of a [`LogsBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsLimits {
    /// Maximum total size of the retained lines, in bytes.
    pub max_bytes: usize,
    /// Maximum number of retained lines.
    pub max_lines: usize,
}

impl Default for LogsLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1_000_000,
            max_lines: 50_000,
        }
    }
}

/// Backlog of the most recent log lines of a pipeline.
///
/// Appending evicts the oldest lines until both caps hold again. A line that
/// is larger than the byte cap on its own empties the buffer and is not kept.
#[derive(Debug)]
pub struct LogsBuffer {
    limits: LogsLimits,
    lines: VecDeque<String>,
    size_bytes: usize,
    discarded: usize,
}

impl LogsBuffer {
    pub fn new(limits: LogsLimits) -> Self {
        Self {
            limits,
            lines: VecDeque::new(),
            size_bytes: 0,
            discarded: 0,
        }
    }

    pub fn append(&mut self, line: String) {
        if line.len() > self.limits.max_bytes || self.limits.max_lines == 0 {
            self.discarded += self.lines.len() + 1;
            self.lines.clear();
            self.size_bytes = 0;
            return;
        }
        while self.size_bytes + line.len() > self.limits.max_bytes
            || self.lines.len() >= self.limits.max_lines
        {
            match self.lines.pop_front() {
                Some(evicted) => {
                    self.size_bytes -= evicted.len();
                    self.discarded += 1;
                }
                None => break,
            }
        }
        self.size_bytes += line.len();
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of lines evicted or rejected so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}
