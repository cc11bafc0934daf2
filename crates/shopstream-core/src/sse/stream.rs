use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;

use super::{Frame, FrameDecoder};
use crate::client::{ClientError, ClientErrorKind, ClientResult};

/// Stream adapter that turns a byte stream into decoded [`Frame`]s.
///
/// An upstream failure is yielded once as an error, after which the stream
/// ends. Any incomplete frame left when the upstream ends is discarded.
#[derive(Debug)]
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    finished: bool,
}

impl<S> FrameStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            decoder: FrameDecoder::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ClientResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.decoder.feed(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    self.decoder.finish();
                    return Poll::Ready(Some(Err(ClientError::new(
                        ClientErrorKind::Stream,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    self.decoder.finish();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    fn mock_byte_stream(
        data: &str,
        chunk_size: usize,
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> + Unpin {
        let chunks: Vec<_> = data
            .as_bytes()
            .chunks(chunk_size)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        futures_util::stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_frame_stream_yields_frames_across_chunks() {
        let data = "event: start\ndata: {\"message_id\":\"m1\"}\n\nevent: token\ndata: {\"delta\":\"Hel\"}\n\n";
        let frames: Vec<Frame> = FrameStream::new(mock_byte_stream(data, 4))
            .map(|result| result.expect("valid frame"))
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, Some(json!({"message_id": "m1"})));
        assert_eq!(frames[1].event(), Some("token"));
    }

    #[tokio::test]
    async fn test_frame_stream_drops_partial_frame_at_end() {
        let data = "event: done\n\nevent: token\ndata: {\"delta\"";
        let mut stream = FrameStream::new(mock_byte_stream(data, 7));

        let first = stream.next().await.expect("one frame").expect("valid frame");
        assert_eq!(first.event(), Some("done"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frame_stream_surfaces_upstream_error_then_ends() {
        let chunks: Vec<std::result::Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"event: token\ndata: {\"delta\":\"a\"}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(bytes::Bytes::from_static(b"event: done\n\n")),
        ];
        let mut stream = FrameStream::new(futures_util::stream::iter(chunks));

        assert!(stream.next().await.expect("frame").is_ok());
        let err = stream.next().await.expect("error item").expect_err("stream error");
        assert_eq!(err.kind, ClientErrorKind::Stream);
        assert!(err.message.contains("reset"));
        assert!(stream.next().await.is_none());
    }
}
