//! Incremental Server-Sent-Events frame scanner
//!
//! Runs on a side channel of the response byte stream: the caller always
//! receives the original bytes untouched, while complete frames (blank-line
//! delimited) are decoded here for usage extraction. Frames that fail to
//! parse are dropped silently; streaming integrity beats metadata
//! completeness.

/// A decoded SSE frame: optional `event:` name plus the JSON payload of the
/// last `data:` line.
pub struct SseFrame<'a> {
    pub event: Option<&'a str>,
    pub data: &'a str,
}

pub struct SseScanner {
    buffer: Vec<u8>,
}

impl SseScanner {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one chunk; invokes `on_frame` for each completed frame. Chunk
    /// boundaries may fall anywhere, including inside a UTF-8 sequence -
    /// frames are only decoded once fully buffered.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(SseFrame<'_>),
    {
        self.buffer.extend_from_slice(chunk);

        loop {
            let Some((pos, delim_len)) = find_frame_end(&self.buffer) else {
                break;
            };
            let frame: Vec<u8> = self.buffer.drain(..pos + delim_len).collect();
            let text = String::from_utf8_lossy(&frame);

            let mut event = None;
            let mut data = None;
            for line in text.lines() {
                let line = line.trim_end_matches('\r');
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(rest.trim());
                }
            }

            if let Some(data) = data {
                if !data.is_empty() {
                    on_frame(SseFrame { event, data });
                }
            }
        }
    }
}

impl Default for SseScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Earliest blank-line delimiter, LF or CRLF framed. Returns the match
/// position and delimiter length.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
