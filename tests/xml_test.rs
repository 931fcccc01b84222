//! Integration tests for incremental XML parsing, the cursor and the pause gate

use fuel_backup::cursor::StreamCursor;
use fuel_backup::xml::{
    next_subtree, parse_whole_document, stream_events_with_chunk_size, ParseEvent,
    EVENT_CHANNEL_CAPACITY,
};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

/// In-memory source that records how many bytes the parser has taken.
struct CountingReader {
    inner: Cursor<Vec<u8>>,
    read: Arc<AtomicUsize>,
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        self.read
            .fetch_add(buf.filled().len() - before, Ordering::SeqCst);
        result
    }
}

fn many_vehicles(count: usize) -> Vec<u8> {
    let mut doc = String::from("<vehicles>");
    for i in 0..count {
        doc.push_str(&format!(
            "<vehicle id=\"{i}\"><name>Car {i}</name><notes>kept for testing</notes></vehicle>"
        ));
    }
    doc.push_str("</vehicles>");
    doc.into_bytes()
}

#[tokio::test]
async fn buffered_document_stays_bounded_around_a_pause() {
    const CHUNK: usize = 4;
    const VEHICLES: usize = 2_000;
    // A step adds at most a text, a start and an end event past the threshold.
    let max_chunk = CHUNK + 2;

    let doc = many_vehicles(VEHICLES);
    let doc_len = doc.len();
    let bytes_read = Arc::new(AtomicUsize::new(0));
    let source = CountingReader {
        inner: Cursor::new(doc),
        read: bytes_read.clone(),
    };
    let (controller, events) = stream_events_with_chunk_size(source, CHUNK);
    let mut cursor = StreamCursor::new(events);

    assert!(cursor.pull_next().await.unwrap().is_start_of("vehicles"));
    let first = next_subtree(&mut cursor).await.unwrap();
    assert_eq!(first.attribute("id"), Some("0"));

    // Slow, unpaused work on the subtree must not let the parser run ahead.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let read_before_pause = bytes_read.load(Ordering::SeqCst);
    assert!(
        read_before_pause < 32 * 1024 && read_before_pause < doc_len,
        "parser read {read_before_pause} of {doc_len} bytes ahead of the consumer"
    );

    let (delivered, starts_while_paused, read_during_pause) = controller
        .with_paused_stream(async {
            let at_pause = bytes_read.load(Ordering::SeqCst);
            let mut delivered = 0;
            let mut starts = 0;
            while let Ok(Ok(event)) = timeout(Duration::from_millis(20), cursor.pull_next()).await {
                delivered += 1;
                if event.is_start_of("vehicle") {
                    starts += 1;
                }
            }
            (delivered, starts, bytes_read.load(Ordering::SeqCst) - at_pause)
        })
        .await;

    assert_eq!(read_during_pause, 0, "input was read while paused");
    assert!(
        delivered <= (EVENT_CHANNEL_CAPACITY + 2) * max_chunk,
        "{delivered} events became available while paused"
    );

    // Nothing is lost: the rest of the document still streams after the pause.
    let mut starts_after = 0;
    while let Ok(event) = cursor.pull_next().await {
        if event.is_start_of("vehicle") {
            starts_after += 1;
        }
    }
    assert_eq!(1 + starts_while_paused + starts_after, VEHICLES);
    assert_eq!(bytes_read.load(Ordering::SeqCst), doc_len);
}

#[tokio::test]
async fn paused_stream_does_not_parse_new_input() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let (controller, events) = stream_events_with_chunk_size(reader, 4);
    let mut cursor = StreamCursor::new(events);

    writer
        .write_all(br#"<vehicles><vehicle id="1"><name>First</name></vehicle>"#)
        .await
        .unwrap();

    assert!(cursor.pull_next().await.unwrap().is_start_of("vehicles"));
    let first = next_subtree(&mut cursor).await.unwrap();
    assert_eq!(first.attribute("id"), Some("1"));
    assert_eq!(first.child_text("name"), Some("First"));

    controller
        .with_paused_stream(async {
            writer
                .write_all(br#"<vehicle id="2"><name>Second</name></vehicle></vehicles>"#)
                .await
                .unwrap();
            let waited = timeout(Duration::from_millis(100), cursor.peek_next()).await;
            assert!(waited.is_err(), "parser produced events while paused");
        })
        .await;
    drop(writer);

    let second = next_subtree(&mut cursor).await.unwrap();
    assert_eq!(second.attribute("id"), Some("2"));
    assert_eq!(second.child_text("name"), Some("Second"));
    assert!(cursor.pull_next().await.unwrap().is_end_of("vehicles"));
}

#[tokio::test]
async fn pause_is_released_when_work_fails() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let (controller, events) = stream_events_with_chunk_size(reader, 4);
    let mut cursor = StreamCursor::new(events);

    let result: Result<(), &str> = controller
        .with_paused_stream(async { Err("write rejected") })
        .await;
    assert!(result.is_err());

    writer.write_all(b"<root><a/></root>").await.unwrap();
    drop(writer);
    let root = timeout(Duration::from_secs(5), next_subtree(&mut cursor))
        .await
        .expect("parser stayed paused")
        .unwrap();
    assert_eq!(root.children.len(), 1);
}

#[tokio::test]
async fn skip_until_finds_nested_element() {
    let xml = r#"<?xml version="1.0"?>
<vehicles>
  <settings><units>metric</units></settings>
  <vehicle id="9"><license-plate>AB-123</license-plate></vehicle>
</vehicles>"#;
    let (_controller, events) = stream_events_with_chunk_size(xml.as_bytes(), 2);
    let mut cursor = StreamCursor::new(events);

    cursor
        .skip_until(|event| event.is_start_of("vehicle"))
        .await
        .unwrap();
    let vehicle = next_subtree(&mut cursor).await.unwrap();
    assert_eq!(vehicle.attribute("id"), Some("9"));
    assert_eq!(vehicle.child_text("licensePlate"), Some("AB-123"));
}

#[tokio::test]
async fn cursor_reports_exhaustion_after_document_end() {
    let (_controller, events) = stream_events_with_chunk_size("<a>text</a>".as_bytes(), 8);
    let mut cursor = StreamCursor::new(events);

    let mut seen = Vec::new();
    while let Ok(event) = cursor.pull_next().await {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            ParseEvent::StartElement {
                name: "a".to_string(),
                attributes: Default::default(),
            },
            ParseEvent::Text {
                content: "text".to_string(),
            },
            ParseEvent::EndElement {
                name: "a".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn mismatched_tags_are_parse_errors() {
    let result = parse_whole_document("<fuel-types><fuel-type></fuel-types>".as_bytes()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn entities_are_decoded_in_text() {
    let root = parse_whole_document(
        "<notes>Fish &amp; chips &lt;3 &#65;</notes>".as_bytes(),
    )
    .await
    .unwrap();
    assert_eq!(root.text.as_deref(), Some("Fish & chips <3 A"));
}
