/// Splits a chunked byte stream into newline-delimited units.
///
/// - Buffers raw bytes, so a UTF-8 character split across chunks is
///   reassembled before decoding
/// - Emits everything before each `\n`; the separator itself is dropped
/// - Keeps the trailing partial unit until more bytes or [`flush`](Self::flush)
///
/// `\r` is left in place. Malformed UTF-8 is replaced, counted and logged,
/// never fatal.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    anomalies: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every unit it completed, in order.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<String> {
        let chunk = chunk.as_ref();
        if chunk.is_empty() {
            return Vec::new();
        }

        // Only the new bytes can hold a separator; the pending buffer never does.
        let scan_from = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        let mut cursor = scan_from;
        while let Some(offset) = self.buf[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            let line = self.decode(start, end);
            out.push(line);
            start = end + 1;
            cursor = start;
        }

        if start > 0 {
            self.buf.drain(..start);
        }
        out
    }

    /// Emit the pending partial unit once, if there is one.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = self.decode(0, self.buf.len());
        self.buf.clear();
        Some(line)
    }

    /// Bytes held back waiting for a separator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of units that contained malformed UTF-8.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    fn decode(&mut self, start: usize, end: usize) -> String {
        let raw = &self.buf[start..end];
        match std::str::from_utf8(raw) {
            Ok(s) => s.to_owned(),
            Err(e) => {
                self.anomalies += 1;
                tracing::debug!(
                    len = raw.len(),
                    valid_up_to = e.valid_up_to(),
                    "stream unit is not valid UTF-8; decoding lossily"
                );
                String::from_utf8_lossy(raw).into_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&[u8]]) -> Vec<String> {
        let mut d = LineDecoder::new();
        let mut out = Vec::new();
        for c in chunks {
            out.extend(d.feed(c));
        }
        out.extend(d.flush());
        out
    }

    #[test]
    fn holds_back_partial_unit_until_flush() {
        let mut d = LineDecoder::new();
        assert!(d.feed("ab").is_empty());
        assert_eq!(d.feed("c\nde"), vec!["abc"]);
        assert!(d.feed("f").is_empty());
        assert_eq!(d.pending(), 3);
        assert_eq!(d.flush().as_deref(), Some("def"));
    }

    #[test]
    fn flush_is_idempotent() {
        let mut d = LineDecoder::new();
        d.feed("tail");
        assert_eq!(d.flush().as_deref(), Some("tail"));
        assert_eq!(d.flush(), None);
    }

    #[test]
    fn flush_on_clean_boundary_yields_nothing() {
        let mut d = LineDecoder::new();
        assert_eq!(d.feed("one\ntwo\n"), vec!["one", "two"]);
        assert_eq!(d.flush(), None);
    }

    #[test]
    fn empty_chunks_are_noops() {
        let mut d = LineDecoder::new();
        assert!(d.feed("").is_empty());
        d.feed("x");
        assert!(d.feed(b"").is_empty());
        assert_eq!(d.pending(), 1);
    }

    #[test]
    fn lone_newline_emits_pending_or_empty_unit() {
        let mut d = LineDecoder::new();
        assert_eq!(d.feed("\n"), vec![""]);

        d.feed("abc");
        assert_eq!(d.feed("\n"), vec!["abc"]);
        assert_eq!(d.flush(), None);
    }

    #[test]
    fn k_newlines_give_k_units_before_flush() {
        let input = "a\n\nb\nccc\n\ndd";
        let k = input.matches('\n').count();

        let mut d = LineDecoder::new();
        let before_flush: Vec<String> = input
            .as_bytes()
            .chunks(3)
            .flat_map(|c| d.feed(c))
            .collect();
        assert_eq!(before_flush.len(), k);
        assert_eq!(d.flush().as_deref(), Some("dd"));
    }

    #[test]
    fn output_does_not_depend_on_chunk_boundaries() {
        let input = "fn main() {\n    println!(\"hi\");\n}\ntrailing".as_bytes();
        let whole = run(&[input]);

        for size in 1..input.len() {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            assert_eq!(run(&chunks), whole, "chunk size {size}");
        }
        assert_eq!(whole.len(), 4);
    }

    #[test]
    fn carriage_return_is_kept() {
        assert_eq!(run(&["a\r\nb\r\n".as_bytes()]), vec!["a\r", "b\r"]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let bytes = "héllo\nwörld".as_bytes();
        // split inside the two-byte 'é'
        let out = run(&[&bytes[..2], &bytes[2..]]);
        assert_eq!(out, vec!["héllo", "wörld"]);
    }

    #[test]
    fn malformed_utf8_is_replaced_and_counted() {
        let mut d = LineDecoder::new();
        let out = d.feed(b"ok\n\xff\xfebad\n");
        assert_eq!(out[0], "ok");
        assert_eq!(out[1], "\u{FFFD}\u{FFFD}bad");
        assert_eq!(d.anomalies(), 1);
    }
}
