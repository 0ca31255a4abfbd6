//! Line buffering for `text/event-stream` bodies that arrive in arbitrary
//! byte chunks.

pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Bytes are kept raw until a line completes, so a multi-byte character
    /// split across chunks is decoded whole.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Drain every complete line, trimmed. A trailing partial line stays
    /// buffered until its newline arrives.
    pub fn lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|&b| b == b'\n')
            .map(|l| String::from_utf8_lossy(l).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Whatever is left once the stream closes.
    pub fn finish(self) -> Option<String> {
        let tail = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!tail.is_empty()).then_some(tail)
    }
}

/// Payload of a `data:` line, if this is one.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
