//! SLIP framing for the bootloader serial protocol.
//!
//! Frames are delimited by `0xC0` on both ends; `0xC0` and `0xDB` inside a
//! frame are escaped as `0xDB 0xDC` and `0xDB 0xDD`.

pub mod encoder {
    use std::io::Write;

    const END: u8 = 0xC0;
    const ESC: u8 = 0xDB;
    const ESC_END: u8 = 0xDC;
    const ESC_ESC: u8 = 0xDD;

    /// Writes one SLIP frame into the wrapped writer.
    ///
    /// The opening delimiter is emitted on construction, the closing one by
    /// [`SlipEncoder::finish`].
    pub struct SlipEncoder<'a, W: Write> {
        writer: &'a mut W,
    }

    impl<'a, W: Write> SlipEncoder<'a, W> {
        /// Opens a frame on the wrapped writer.
        pub fn new(writer: &'a mut W) -> std::io::Result<Self> {
            writer.write_all(&[END])?;
            Ok(Self { writer })
        }

        /// Closes the frame.
        pub fn finish(self) -> std::io::Result<()> {
            self.writer.write_all(&[END])
        }
    }

    impl<W: Write> Write for SlipEncoder<'_, W> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            for &value in buf {
                match value {
                    END => self.writer.write_all(&[ESC, ESC_END])?,
                    ESC => self.writer.write_all(&[ESC, ESC_ESC])?,
                    plain => self.writer.write_all(&[plain])?,
                }
            }

            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.writer.flush()
        }
    }
}

pub mod decoder {
    const END: u8 = 0xC0;
    const ESC: u8 = 0xDB;
    const ESC_END: u8 = 0xDC;
    const ESC_ESC: u8 = 0xDD;

    /// Largest frame the decoder will accumulate: enough for a stub-mode
    /// data block (0x4000 bytes plus headers); replies are far smaller but
    /// carry up to 2048 bytes of body.
    const MAX_FRAME_SIZE: usize = 0x8000;

    /// Error produced while accumulating a frame.
    #[derive(Debug, PartialEq, Eq)]
    pub enum DecodeError {
        /// The frame exceeded [`MAX_FRAME_SIZE`] before its end delimiter.
        FrameTooLong,
    }

    #[derive(Debug)]
    enum State {
        /// Outside any frame; bytes other than `END` are stray and dropped.
        Idle,
        Frame,
        Escape,
    }

    /// Push-based SLIP frame decoder.
    ///
    /// Bytes are fed one at a time as they arrive from the transport, which
    /// lets the caller check its read deadline between polls. A completed
    /// frame body (delimiters stripped, escapes resolved) is handed back
    /// from [`SlipDecoder::feed`].
    ///
    /// Decoding is deliberately tolerant: an escape byte followed by
    /// anything other than `ESC_END`/`ESC_ESC` passes the following byte
    /// through unchanged, which is what the ROM's own framing does.
    #[derive(Debug)]
    pub struct SlipDecoder {
        buffer: Vec<u8>,
        state: State,
    }

    impl SlipDecoder {
        pub fn new() -> Self {
            Self {
                buffer: Vec::new(),
                state: State::Idle,
            }
        }

        /// Drop any partially accumulated frame and return to the idle
        /// state. Used to realign after a timeout left bytes mid-frame.
        pub fn reset(&mut self) {
            self.buffer.clear();
            self.state = State::Idle;
        }

        /// Feed a single byte, returning a completed frame body if this
        /// byte closed one.
        pub fn feed(&mut self, value: u8) -> Result<Option<Vec<u8>>, DecodeError> {
            match self.state {
                State::Idle => {
                    if value == END {
                        self.state = State::Frame;
                    }
                    Ok(None)
                }
                State::Frame => match value {
                    END => {
                        if self.buffer.is_empty() {
                            // Consecutive delimiters collapse; stay open.
                            Ok(None)
                        } else {
                            self.state = State::Idle;
                            Ok(Some(std::mem::take(&mut self.buffer)))
                        }
                    }
                    ESC => {
                        self.state = State::Escape;
                        Ok(None)
                    }
                    _ => self.push(value),
                },
                State::Escape => {
                    self.state = State::Frame;
                    match value {
                        ESC_END => self.push(END),
                        ESC_ESC => self.push(ESC),
                        other => self.push(other),
                    }
                }
            }
        }

        fn push(&mut self, value: u8) -> Result<Option<Vec<u8>>, DecodeError> {
            if self.buffer.len() >= MAX_FRAME_SIZE {
                self.reset();
                return Err(DecodeError::FrameTooLong);
            }
            self.buffer.push(value);
            Ok(None)
        }
    }

    impl Default for SlipDecoder {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{decoder::SlipDecoder, encoder::SlipEncoder};

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = SlipEncoder::new(&mut out).unwrap();
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
        out
    }

    fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut decoder = SlipDecoder::new();
        let mut frames = Vec::new();
        for byte in bytes {
            if let Some(frame) = decoder.feed(*byte).unwrap() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn encode_plain() {
        assert_eq!(
            encode(&[0x01, 0x02, 0x03]),
            vec![0xC0, 0x01, 0x02, 0x03, 0xC0]
        );
    }

    #[test]
    fn encode_escapes_end_and_esc() {
        assert_eq!(
            encode(&[0x01, 0xC0, 0xDB, 0x02]),
            vec![0xC0, 0x01, 0xDB, 0xDC, 0xDB, 0xDD, 0x02, 0xC0]
        );
    }

    #[test]
    fn decode_simple_frame() {
        let frames = decode_all(&[0xC0, 0x01, 0x02, 0x03, 0x04, 0x05, 0xC0]);
        assert_eq!(frames, vec![vec![0x01, 0x02, 0x03, 0x04, 0x05]]);
    }

    #[test]
    fn decode_escape_sequences() {
        let frames = decode_all(&[0xC0, 0x01, 0xDB, 0xDC, 0xDB, 0xDD, 0x03, 0xC0]);
        assert_eq!(frames, vec![vec![0x01, 0xC0, 0xDB, 0x03]]);
    }

    #[test]
    fn decode_passes_unknown_escape_through() {
        let frames = decode_all(&[0xC0, 0x01, 0xDB, 0x42, 0x03, 0xC0]);
        assert_eq!(frames, vec![vec![0x01, 0x42, 0x03]]);
    }

    #[test]
    fn decode_discards_stray_bytes_before_frame() {
        // Boot chatter before the first delimiter must not leak into the
        // frame body.
        let frames = decode_all(&[0x72, 0x65, 0x61, 0xC0, 0x01, 0x02, 0xC0]);
        assert_eq!(frames, vec![vec![0x01, 0x02]]);
    }

    #[test]
    fn decode_collapses_empty_frames() {
        let frames = decode_all(&[0xC0, 0xC0, 0xC0, 0x01, 0xC0]);
        assert_eq!(frames, vec![vec![0x01]]);
    }

    #[test]
    fn decode_multiple_frames() {
        let frames = decode_all(&[0xC0, 0x01, 0x02, 0xC0, 0xC0, 0x03, 0x04, 0xC0]);
        assert_eq!(frames, vec![vec![0x01, 0x02], vec![0x03, 0x04]]);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut decoder = SlipDecoder::new();
        for byte in [0xC0, 0x01, 0x02] {
            assert_eq!(decoder.feed(byte).unwrap(), None);
        }
        decoder.reset();
        // The next frame decodes cleanly despite the dropped prefix.
        let mut result = None;
        for byte in [0xC0, 0x0A, 0xC0] {
            if let Some(frame) = decoder.feed(byte).unwrap() {
                result = Some(frame);
            }
        }
        assert_eq!(result, Some(vec![0x0A]));
    }

    #[test]
    fn round_trip_arbitrary_bytes() {
        let data: Vec<u8> = (0..=255).cycle().take(1024).collect();
        let frames = decode_all(&encode(&data));
        assert_eq!(frames, vec![data]);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = SlipDecoder::new();
        decoder.feed(0xC0).unwrap();
        let mut result = Ok(None);
        for _ in 0..0x9000 {
            result = decoder.feed(0x55);
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }
}
