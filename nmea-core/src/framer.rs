//! Reassemble complete sentences from arbitrarily split text chunks.
//!
//! One framer per transport session. Chunks arrive at I/O granularity, so a
//! chunk may hold half a sentence, several sentences, or (for streams that
//! never send a line terminator) the tail of one sentence followed by the
//! start of the next.

use crate::types::SENTENCE_PREFIXES;

/// Per-session accumulation buffer.
#[derive(Debug, Default)]
pub struct SentenceFramer {
    buffer: String,
    /// Leading bytes of a UTF-8 character split across two reads.
    partial: Vec<u8>,
}

impl SentenceFramer {
    pub fn new() -> Self {
        SentenceFramer {
            buffer: String::new(),
            partial: Vec::new(),
        }
    }

    /// Feed raw bytes from a stream read.
    ///
    /// Invalid bytes become U+FFFD. A character cut off at the end of the
    /// read is held back until the next call completes it.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let ready = self.partial.len() - incomplete_tail(&self.partial);
        let text = String::from_utf8_lossy(&self.partial[..ready]).into_owned();
        self.partial.drain(..ready);
        self.push(&text)
    }

    /// Feed one chunk, returning every sentence it completes, in order.
    ///
    /// Returned sentences are trimmed and never empty. They are not checked
    /// for a `$`/`!` prefix; the dispatcher routes un-prefixed lines to the
    /// CSV parser.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        if chunk.is_empty() {
            return out;
        }

        if chunk.contains('\n') {
            let mut rest = chunk;
            while let Some(idx) = rest.find('\n') {
                self.buffer.push_str(&rest[..idx]);
                self.flush_into(&mut out);
                rest = &rest[idx + 1..];
            }
            self.buffer.push_str(rest);
        } else if let Some(idx) = chunk.find(SENTENCE_PREFIXES) {
            // Non-canonical stream: the prefix itself marks the boundary.
            self.buffer.push_str(&chunk[..idx]);
            self.flush_into(&mut out);
            self.buffer.push_str(&chunk[idx..]);
        } else {
            self.buffer.push_str(chunk);
        }

        out
    }

    /// Flush whatever is buffered, e.g. at end of file.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial.is_empty() {
            let tail = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.buffer.push_str(&tail);
        }
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out.pop()
    }

    /// Bytes currently waiting for a boundary.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn flush_into(&mut self, out: &mut Vec<String>) {
        let trimmed = self.buffer.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        self.buffer.clear();
    }
}

/// Length of a trailing UTF-8 sequence that the next read may still complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let n = bytes.len();
    for back in 1..=n.min(3) {
        let b = bytes[n - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        return if back < width { back } else { 0 };
    }
    0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76\r\n\
!AIVDM,1,1,,A,13HOI:0P0000VOHLCnHQKwvL05Ip,0*23\r\n\
AIS,Node_Name=BUOY,Latitude=41.1,Longitude=-8.7\n\
$A-TLL,01,123,4567,N,00987,6543,W,VESSEL1,,,\n";

    fn frame_all(chunks: &[&str]) -> Vec<String> {
        let mut framer = SentenceFramer::new();
        let mut out = Vec::new();
        for c in chunks {
            out.extend(framer.push(c));
        }
        out
    }

    #[test]
    fn test_whole_stream() {
        let out = frame_all(&[STREAM]);
        assert_eq!(out.len(), 4);
        assert!(out[0].starts_with("$GPGGA"));
        assert!(out[0].ends_with("*76"));
        assert!(out[1].starts_with("!AIVDM"));
        assert!(out[2].starts_with("AIS,"));
        assert_eq!(out[3], "$A-TLL,01,123,4567,N,00987,6543,W,VESSEL1,,,");
    }

    #[test]
    fn test_every_two_way_split_matches_whole() {
        let expected = frame_all(&[STREAM]);
        for i in 0..=STREAM.len() {
            let (a, b) = STREAM.split_at(i);
            assert_eq!(frame_all(&[a, b]), expected, "split at {i}");
        }
    }

    #[test]
    fn test_every_three_way_split_matches_whole() {
        let expected = frame_all(&[STREAM]);
        let step = 7;
        for i in (0..STREAM.len()).step_by(step) {
            for j in (i..=STREAM.len()).step_by(step) {
                let chunks = [&STREAM[..i], &STREAM[i..j], &STREAM[j..]];
                assert_eq!(frame_all(&chunks), expected, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let expected = frame_all(&[STREAM]);
        let chunks: Vec<&str> = (0..STREAM.len()).map(|i| &STREAM[i..i + 1]).collect();
        assert_eq!(frame_all(&chunks), expected);
    }

    #[test]
    fn test_partial_sentence_is_buffered() {
        let mut framer = SentenceFramer::new();
        assert!(framer.push("$GPHDT,12").is_empty());
        assert_eq!(framer.pending(), "$GPHDT,12");
        assert_eq!(framer.push("3.4,T\r\n"), vec!["$GPHDT,123.4,T"]);
        assert_eq!(framer.pending(), "");
    }

    #[test]
    fn test_non_canonical_stream_without_newlines() {
        let mut framer = SentenceFramer::new();
        assert!(framer.push("$GPHDT,1.0,T").is_empty());
        assert_eq!(framer.push("$GPHDT,2.0,T"), vec!["$GPHDT,1.0,T"]);
        assert_eq!(framer.push("!AIVDM,x"), vec!["$GPHDT,2.0,T"]);
        assert_eq!(framer.finish(), Some("!AIVDM,x".to_string()));
    }

    #[test]
    fn test_prefix_mid_chunk_flushes_tail() {
        let mut framer = SentenceFramer::new();
        framer.push("$GPHDT,1");
        assert_eq!(framer.push(".0,T$GPHDT,2"), vec!["$GPHDT,1.0,T"]);
        assert_eq!(framer.pending(), "$GPHDT,2");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut framer = SentenceFramer::new();
        framer.push("$GP");
        assert!(framer.push("").is_empty());
        assert_eq!(framer.pending(), "$GP");
    }

    #[test]
    fn test_bytes_split_inside_a_character() {
        let line = "$A-TLL,01,123,4567,N,00987,6543,W,GRÜNE→𝄞,,,\n".as_bytes();
        let expected = vec!["$A-TLL,01,123,4567,N,00987,6543,W,GRÜNE→𝄞,,,".to_string()];
        for i in 0..=line.len() {
            let mut framer = SentenceFramer::new();
            let mut out = framer.push_bytes(&line[..i]);
            out.extend(framer.push_bytes(&line[i..]));
            assert_eq!(out, expected, "split at {i}");
        }
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut framer = SentenceFramer::new();
        assert_eq!(
            framer.push_bytes(b"$\xffB,1\r\n$GPHDT,1.0,T\r\n"),
            vec!["$\u{FFFD}B,1", "$GPHDT,1.0,T"]
        );
        // A lone lead byte at end of stream is flushed as a replacement.
        assert!(framer.push_bytes(b"$GPHDT,2.0,T\xc3").is_empty());
        assert_eq!(framer.finish(), Some("$GPHDT,2.0,T\u{FFFD}".to_string()));
    }

    #[test]
    fn test_blank_lines_produce_nothing() {
        assert!(frame_all(&["\r\n", "   \n", "\n"]).is_empty());
    }
}
