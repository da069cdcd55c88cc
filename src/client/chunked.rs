use serde_json::Value;

/// Incremental decoder for a newline-delimited JSON feed.
///
/// Bytes are appended as they arrive and only the part after the cursor is
/// looked at again. Each newline-terminated segment is parsed on its own; a
/// segment that fails to parse is dropped without affecting its neighbours.
/// The unterminated tail is tried as well, and kept for the next delivery when
/// it does not parse yet. A kept tail that turns out to be junk is cut off
/// again, so it never costs the object that follows it.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    cursor: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes and return every value completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Value> {
        // Tail left over from the previous delivery
        let carried = self.buffer.len() - self.cursor;
        self.buffer.extend_from_slice(bytes);

        let mut values = Vec::new();
        let pending = &self.buffer[self.cursor..];
        let mut consumed = 0;

        for (index, segment) in pending.split_inclusive(|b| *b == b'\n').enumerate() {
            let terminated = segment.last() == Some(&b'\n');
            let parsed = parse_segment(segment).or_else(|| {
                // The carried tail only prefixes the first segment
                if index == 0 && carried > 0 && segment.len() > carried {
                    parse_segment(&segment[carried..])
                } else {
                    None
                }
            });
            match parsed {
                Some(value) => {
                    values.push(value);
                    consumed += segment.len();
                }
                None if terminated => consumed += segment.len(),
                // Incomplete tail, retry once more bytes arrive
                None => {}
            }
        }

        self.cursor += consumed;
        self.compact();
        values
    }

    /// Bytes received but not decoded yet
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.cursor..]
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

fn parse_segment(segment: &[u8]) -> Option<Value> {
    let trimmed = segment.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(trimmed) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!(
                "Skipping malformed feed segment ({} bytes): {}",
                trimmed.len(),
                e
            );
            None
        }
    }
}
