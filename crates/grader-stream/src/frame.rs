use tracing::{debug, warn};

/// One delimiter-bounded unit of streamed text.
pub type RawFrame = String;

/// Incremental splitter turning transport chunks into text frames.
///
/// Frames are separated by a blank line (`\n\n`, or `\r\n\r\n`). Splitting
/// happens on bytes before text decoding, so a multi-byte character split
/// across two chunks is reassembled intact.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
    scan_from: usize,
}

impl FrameSplitter {
    /// Appends a chunk and returns every frame it completed, in order.
    ///
    /// Empty and whitespace-only frames are dropped. The unterminated tail is
    /// kept for the next call.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut from = self.scan_from;
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            if let Some(frame) = frame_text(&self.buf[consumed..idx]) {
                frames.push(frame);
            }
            consumed = idx + delim_len;
            from = consumed;
        }
        self.buf.drain(..consumed);
        // A delimiter may straddle the next chunk by at most three bytes.
        self.scan_from = self.buf.len().saturating_sub(3);
        frames
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Ends the stream, abandoning any unterminated tail.
    ///
    /// Returns the number of discarded bytes that carried content.
    pub fn finish(&mut self) -> usize {
        let tail = std::mem::take(&mut self.buf);
        self.scan_from = 0;
        if frame_text(&tail).is_none() {
            if !tail.is_empty() {
                debug!(bytes = tail.len(), "dropping whitespace tail at end of stream");
            }
            return 0;
        }
        warn!(
            bytes = tail.len(),
            "stream ended with an unterminated partial frame; discarding it"
        );
        tail.len()
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn frame_text(bytes: &[u8]) -> Option<RawFrame> {
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        return None;
    }
    Some(text.into_owned())
}
