use bridge_ingest::{IngestError, NoopSource, RawEventHandler, SseDecoder, Source};
use domain::RawEvent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[test]
fn decoder_handles_split_chunks_and_crlf() {
    let mut decoder = SseDecoder::default();
    assert!(decoder.push(b"data: {\"thing").is_empty());
    assert!(decoder.push(b"Id\":\"dev1\"}\r\n").is_empty());
    let events = decoder.push(b"\r\ndata: second\n\n");
    assert_eq!(events, vec!["{\"thingId\":\"dev1\"}", "second"]);
}

#[test]
fn decoder_skips_comments_and_empty_events() {
    let mut decoder = SseDecoder::default();
    let events = decoder.push(b": keep-alive\n\nevent: update\nid: 7\n\ndata:\n\ndata:x\n\n");
    assert_eq!(events, vec!["x"]);
}

#[test]
fn unterminated_line_is_capped() {
    let mut decoder = SseDecoder::with_max_line_bytes(16);
    let mut chunk = b"data: {\"big\":\"".to_vec();
    chunk.extend_from_slice(&[b'x'; 20]);
    assert!(decoder.push(&chunk).is_empty());
    assert_eq!(decoder.buffered(), 0);

    assert!(decoder.push(&[b'y'; 40]).is_empty());
    assert_eq!(decoder.buffered(), 0);

    let events = decoder.push(b"\"}\n\ndata: ok\n\n");
    assert_eq!(events, vec!["ok"]);
}

#[test]
fn oversized_complete_line_drops_its_event_only() {
    let mut decoder = SseDecoder::with_max_line_bytes(16);
    let events = decoder.push(b"data: 0123456789abcdefXYZ\ndata: tail\n\ndata: next\n\n");
    assert_eq!(events, vec!["next"]);
}

#[test]
fn partial_line_is_kept_across_chunks() {
    let mut decoder = SseDecoder::default();
    assert!(decoder.push(b"data: ab").is_empty());
    assert!(decoder.push(b"c").is_empty());
    assert_eq!(decoder.buffered(), 9);
    assert_eq!(decoder.push(b"\n\n"), vec!["abc"]);
    assert_eq!(decoder.buffered(), 0);
}

struct NeverCalled;

#[async_trait::async_trait]
impl RawEventHandler for NeverCalled {
    async fn handle(&self, _event: RawEvent) -> Result<(), IngestError> {
        Err(IngestError::Handler("unexpected event".to_string()))
    }
}

#[tokio::test]
async fn noop_source_returns_on_cancel() {
    let cancel = CancellationToken::new();
    let source = NoopSource;
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { source.run(Arc::new(NeverCalled), cancel).await })
    };
    cancel.cancel();
    task.await.expect("join").expect("clean stop");
}
