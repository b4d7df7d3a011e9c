//! A UTF-8-boundary-safe streaming decoder: holds back an incomplete
//! trailing multi-byte sequence between reads instead of replacing it with
//! the replacement character (spec §4.11).

#[derive(Default)]
pub struct Utf8BoundaryDecoder {
    pending: Vec<u8>,
}

impl Utf8BoundaryDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes`, returning the longest valid UTF-8 prefix (pending
    /// bytes included) and retaining any incomplete trailing sequence for
    /// the next call.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                let out = s.to_string();
                self.pending.clear();
                out
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                let out = String::from_utf8_lossy(&self.pending[..valid_up_to]).into_owned();
                self.pending.drain(..valid_up_to);
                out
            }
        }
    }

    /// Clears any pending incomplete bytes (used on truncation detection).
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_a_split_multibyte_character() {
        let bytes = "héllo".as_bytes();
        let (first, second) = bytes.split_at(2); // splits inside 'é' (0xC3 0xA9)
        let mut decoder = Utf8BoundaryDecoder::new();
        let a = decoder.push(first);
        let b = decoder.push(second);
        assert_eq!(format!("{a}{b}"), "héllo");
    }

    #[test]
    fn whole_input_decodes_in_one_call() {
        let mut decoder = Utf8BoundaryDecoder::new();
        assert_eq!(decoder.push("plain ascii".as_bytes()), "plain ascii");
    }
}
