/// Utf8Decoder turns the raw byte stream from the device into characters.
///
/// Serial reads split the stream at arbitrary points, so a multibyte
/// character may arrive in two reads: an incomplete sequence at the end of a
/// read is held back until the next one. Bytes that can never form valid
/// UTF-8 (line noise, a wrong baud rate) are dropped.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Utf8Decoder {
        Utf8Decoder::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix decodes.
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(invalid) => rest = &after[invalid..],
                        // Truncated sequence: wait for the rest of it.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }

    /// Number of bytes held back waiting for the remainder of a character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
