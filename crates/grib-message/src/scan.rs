//! Message boundary scanning.
//!
//! Locates messages in a byte stream: searches for the `GRIB` magic
//! (skipping any inter-message padding), reads the indicator section to
//! learn the edition and declared total length, then pulls the full
//! message and verifies the trailing `7777` marker.

use bytes::Bytes;
use grib_common::{GribError, GribResult};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

const MAGIC: &[u8; 4] = b"GRIB";
const END_MARKER: &[u8; 4] = b"7777";

/// Minimum plausible total length: indicator plus end marker.
const MIN_LENGTH_EDITION2: u64 = 20;
const MIN_LENGTH_EDITION1: u64 = 12;

/// Stateful scanner yielding `(offset, message bytes)` pairs from a
/// reader, tracking absolute byte positions for index builds.
pub struct MessageScanner<R> {
    reader: R,
    position: u64,
}

impl<R: Read> MessageScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
        }
    }

    /// The next message and its byte offset in the stream, or `None` at
    /// a clean end of stream.
    pub fn next_message(&mut self) -> GribResult<Option<(u64, Bytes)>> {
        let start = match self.seek_magic()? {
            Some(offset) => offset,
            None => return Ok(None),
        };

        // The 4 magic bytes are already consumed; read the rest of the
        // 16-byte indicator section.
        let mut indicator = [0u8; 16];
        indicator[0..4].copy_from_slice(MAGIC);
        self.read_exact(&mut indicator[4..16])?;

        let edition = indicator[7];
        let total_length = match edition {
            1 => {
                let len = u32::from_be_bytes([0, indicator[4], indicator[5], indicator[6]]) as u64;
                if len < MIN_LENGTH_EDITION1 {
                    return Err(GribError::Malformed(format!(
                        "declared length {} too small for edition 1",
                        len
                    )));
                }
                len
            }
            2 => {
                let len = u64::from_be_bytes([
                    indicator[8],
                    indicator[9],
                    indicator[10],
                    indicator[11],
                    indicator[12],
                    indicator[13],
                    indicator[14],
                    indicator[15],
                ]);
                if len < MIN_LENGTH_EDITION2 {
                    return Err(GribError::Malformed(format!(
                        "declared length {} too small for edition 2",
                        len
                    )));
                }
                len
            }
            other => return Err(GribError::UnsupportedEdition(other)),
        };

        let mut message = vec![0u8; total_length as usize];
        message[0..16].copy_from_slice(&indicator);
        self.read_exact(&mut message[16..])?;

        if &message[message.len() - 4..] != END_MARKER {
            return Err(GribError::MissingEndMarker);
        }

        debug!(offset = start, length = total_length, edition, "Found message");
        Ok(Some((start, Bytes::from(message))))
    }

    /// Scan forward to the next `GRIB` magic. Returns the offset of the
    /// magic's first byte, or `None` at end of stream.
    fn seek_magic(&mut self) -> GribResult<Option<u64>> {
        let mut window = [0u8; 4];
        let mut filled = 0usize;

        loop {
            let mut byte = [0u8; 1];
            let n = self.reader.read(&mut byte)?;
            if n == 0 {
                return Ok(None);
            }
            self.position += 1;

            if filled < 4 {
                window[filled] = byte[0];
                filled += 1;
            } else {
                window.rotate_left(1);
                window[3] = byte[0];
            }

            if filled == 4 && &window == MAGIC {
                return Ok(Some(self.position - 4));
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> GribResult<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                GribError::PrematureEndOfFile
            } else {
                GribError::Io(e)
            }
        })?;
        self.position += buf.len() as u64;
        Ok(())
    }
}

/// Open a buffered scanner over a file, mapping a missing file to
/// `FileNotFound`.
pub fn open_scanner(path: &Path) -> GribResult<MessageScanner<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GribError::FileNotFound(path.display().to_string())
        } else {
            GribError::Io(e)
        }
    })?;
    Ok(MessageScanner::new(BufReader::new(file)))
}

/// Read the next message from a reader, without offset tracking.
pub fn read_message<R: Read>(reader: &mut R) -> GribResult<Option<Bytes>> {
    let mut scanner = MessageScanner::new(reader);
    Ok(scanner.next_message()?.map(|(_, bytes)| bytes))
}

/// Count the messages in a file.
pub fn count_messages(path: &Path) -> GribResult<usize> {
    let mut scanner = open_scanner(path)?;
    let mut count = 0;
    while scanner.next_message()?.is_some() {
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A structurally valid edition-2 message with empty section bodies.
    fn minimal_message() -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(b"GRIB");
        msg.extend_from_slice(&[0, 0]); // reserved
        msg.push(0); // discipline
        msg.push(2); // edition
        msg.extend_from_slice(&20u64.to_be_bytes());
        msg.extend_from_slice(b"7777");
        msg
    }

    #[test]
    fn test_single_message() {
        let data = minimal_message();
        let mut scanner = MessageScanner::new(data.as_slice());

        let (offset, msg) = scanner.next_message().unwrap().unwrap();
        assert_eq!(offset, 0);
        assert_eq!(msg.len(), 20);
        assert!(scanner.next_message().unwrap().is_none());
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut data = b"# some header line\n".to_vec();
        data.extend_from_slice(&minimal_message());

        let mut scanner = MessageScanner::new(data.as_slice());
        let (offset, _) = scanner.next_message().unwrap().unwrap();
        assert_eq!(offset, 19);
    }

    #[test]
    fn test_consecutive_messages_report_offsets() {
        let mut data = minimal_message();
        data.extend_from_slice(&minimal_message());

        let mut scanner = MessageScanner::new(data.as_slice());
        let (first, _) = scanner.next_message().unwrap().unwrap();
        let (second, _) = scanner.next_message().unwrap().unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 20);
    }

    #[test]
    fn test_truncated_message() {
        let mut data = minimal_message();
        data.truncate(18);

        let mut scanner = MessageScanner::new(data.as_slice());
        let err = scanner.next_message().unwrap_err();
        assert!(matches!(err, GribError::PrematureEndOfFile));
    }

    #[test]
    fn test_missing_end_marker() {
        let mut data = minimal_message();
        let n = data.len();
        data[n - 4..].copy_from_slice(b"XXXX");

        let mut scanner = MessageScanner::new(data.as_slice());
        let err = scanner.next_message().unwrap_err();
        assert!(matches!(err, GribError::MissingEndMarker));
    }

    #[test]
    fn test_unsupported_edition() {
        let mut data = minimal_message();
        data[7] = 3;

        let mut scanner = MessageScanner::new(data.as_slice());
        let err = scanner.next_message().unwrap_err();
        assert!(matches!(err, GribError::UnsupportedEdition(3)));
    }

    #[test]
    fn test_nonsense_length() {
        let mut data = minimal_message();
        data[8..16].copy_from_slice(&5u64.to_be_bytes());

        let mut scanner = MessageScanner::new(data.as_slice());
        let err = scanner.next_message().unwrap_err();
        assert!(matches!(err, GribError::Malformed(_)));
    }

    #[test]
    fn test_empty_stream() {
        let data: &[u8] = &[];
        let mut scanner = MessageScanner::new(data);
        assert!(scanner.next_message().unwrap().is_none());
    }
}
