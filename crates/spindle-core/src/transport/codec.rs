use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::ActivityClock;

/// Default cap on a single inbound line.
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    /// One complete, non-blank line without its terminator.
    Line(Vec<u8>),
    /// A line longer than the cap; it has been drained from the stream.
    TooLarge { max_bytes: usize },
    Eof,
}

/// Newline-delimited frame reader.
///
/// Bytes of an unfinished line stay in `pending` between calls, so a read
/// that is cancelled or timed out resumes where it stopped instead of
/// surfacing a partial frame.
pub(crate) struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    discarding: bool,
    max_bytes: usize,
    activity: ActivityClock,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(inner: R, max_bytes: usize, activity: ActivityClock) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
            discarding: false,
            max_bytes,
            activity,
        }
    }

    pub(crate) async fn next_frame(&mut self) -> std::io::Result<Frame> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                self.pending.clear();
                return Ok(Frame::Eof);
            }
            self.activity.touch();

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let oversized = self.discarding || self.pending.len() + pos > self.max_bytes;
                    if !oversized {
                        self.pending.extend_from_slice(&available[..pos]);
                    }
                    self.inner.consume(pos + 1);
                    self.discarding = false;

                    let line = std::mem::take(&mut self.pending);
                    if oversized {
                        return Ok(Frame::TooLarge {
                            max_bytes: self.max_bytes,
                        });
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Frame::Line(line));
                }
                None => {
                    let len = available.len();
                    if self.discarding || self.pending.len() + len > self.max_bytes {
                        self.discarding = true;
                        self.pending.clear();
                    } else {
                        self.pending.extend_from_slice(available);
                    }
                    self.inner.consume(len);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn reader(bytes: &'static [u8], max_bytes: usize) -> FrameReader<&'static [u8]> {
        FrameReader::new(bytes, max_bytes, ActivityClock::new())
    }

    #[tokio::test]
    async fn splits_lines_and_skips_blank_ones() {
        let mut r = reader(b"{\"a\":1}\n\n  \r\n{\"b\":2}\r\n", 1024);
        assert_eq!(
            r.next_frame().await.unwrap(),
            Frame::Line(b"{\"a\":1}".to_vec())
        );
        assert_eq!(
            r.next_frame().await.unwrap(),
            Frame::Line(b"{\"b\":2}\r".to_vec())
        );
        assert_eq!(r.next_frame().await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_not_a_frame() {
        let mut r = reader(b"{\"a\":1}\n{\"b\":", 1024);
        assert!(matches!(r.next_frame().await.unwrap(), Frame::Line(_)));
        assert_eq!(r.next_frame().await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn oversized_line_is_drained_and_reported() {
        let mut r = reader(b"0123456789abcdef\n{}\n", 8);
        assert_eq!(
            r.next_frame().await.unwrap(),
            Frame::TooLarge { max_bytes: 8 }
        );
        assert_eq!(r.next_frame().await.unwrap(), Frame::Line(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn frame_split_across_writes_is_reassembled() {
        let (client, mut server) = tokio::io::duplex(4);
        let mut r = FrameReader::new(client, 1024, ActivityClock::new());
        let writer = tokio::spawn(async move {
            server.write_all(b"{\"id\":1,").await.unwrap();
            server.write_all(b"\"result\":true}\n").await.unwrap();
        });
        assert_eq!(
            r.next_frame().await.unwrap(),
            Frame::Line(b"{\"id\":1,\"result\":true}".to_vec())
        );
        writer.await.unwrap();
    }
}
