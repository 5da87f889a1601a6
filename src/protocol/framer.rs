//! Incremental frame extraction for tracker TCP streams.
//!
//! Trackers write frames back to back with no length prefix, and a single
//! `read()` may hold several frames, half of one, or line noise. The extractor
//! buffers per connection and yields whole frames as soon as their terminator
//! arrives:
//!
//! ```text
//! *HQ,<fields...>#          HQ family, one or more leading '*'
//! $GPRMC,<fields...>*hh\r\n  NMEA sentence, any talker id
//! ```
//!
//! Bytes before a frame start are discarded. A trailing partial start marker
//! is kept, so `*H` + `Q,...#` still forms a frame.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

/// Default cap on a buffered frame (start marker through terminator).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

const INITIAL_BUFFER_CAPACITY: usize = 2 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartKind {
    Hq,
    Nmea,
}

impl StartKind {
    fn terminator(self) -> u8 {
        match self {
            StartKind::Hq => b'#',
            StartKind::Nmea => b'\n',
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Start {
    /// Offset of the first marker byte.
    at: usize,
    /// Offset of the first byte after the marker.
    body: usize,
    kind: StartKind,
}

/// Per-connection frame buffer.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameExtractor {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame_len: max_frame_len.max(8),
        }
    }

    /// Appends `chunk` and returns every frame completed by it, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_start(&self.buf) else {
                let keep = partial_marker_len(&self.buf).min(self.max_frame_len);
                let noise = self.buf.len() - keep;
                if noise > 0 {
                    debug!("Discarding {} bytes of noise", noise);
                    self.buf.advance(noise);
                }
                break;
            };

            if start.at > 0 {
                debug!("Discarding {} bytes before frame start", start.at);
                self.buf.advance(start.at);
            }
            let body = start.body - start.at;

            let terminator = start.kind.terminator();
            let end = self.buf[body..]
                .iter()
                .position(|b| *b == terminator)
                .map(|p| p + body);
            let next = find_start(&self.buf[body..]).map(|s| s.at + body);

            if let Some(next) = next.filter(|n| end.map_or(true, |e| *n < e)) {
                debug!("Truncated frame superseded by a new start marker");
                self.buf.advance(next);
                continue;
            }

            let Some(end) = end else {
                if self.buf.len() > self.max_frame_len {
                    warn!(
                        "No terminator within {} bytes, resynchronising",
                        self.max_frame_len
                    );
                    self.buf.advance(body);
                    continue;
                }
                break;
            };

            let frame = self.buf.split_to(end + 1);
            if frame.len() > self.max_frame_len {
                warn!(
                    "Dropping oversize frame ({} bytes, limit {})",
                    frame.len(),
                    self.max_frame_len
                );
                continue;
            }
            let text = String::from_utf8_lossy(&frame);
            frames.push(text.trim_end_matches(['\r', '\n']).to_string());
        }

        frames
    }

    /// True when bytes are held back waiting for the rest of a frame.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_start(buf: &[u8]) -> Option<Start> {
    let hq = buf.windows(3).position(|w| w == b"*HQ").map(|star| {
        let mut at = star;
        while at > 0 && buf[at - 1] == b'*' {
            at -= 1;
        }
        Start {
            at,
            body: star + 3,
            kind: StartKind::Hq,
        }
    });
    let nmea = buf
        .windows(2)
        .position(|w| w[0] == b'$' && w[1].is_ascii_uppercase())
        .map(|at| Start {
            at,
            body: at + 1,
            kind: StartKind::Nmea,
        });

    match (hq, nmea) {
        (Some(h), Some(n)) => Some(if h.at < n.at { h } else { n }),
        (h, n) => h.or(n),
    }
}

/// Length of a trailing run that could still grow into a start marker.
fn partial_marker_len(buf: &[u8]) -> usize {
    let stars = |bytes: &[u8]| bytes.iter().rev().take_while(|b| **b == b'*').count();
    match buf.last() {
        Some(b'$') => 1,
        Some(b'*') => stars(buf),
        Some(b'H') => match stars(&buf[..buf.len() - 1]) {
            0 => 0,
            n => n + 1,
        },
        _ => 0,
    }
}
