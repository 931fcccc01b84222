use crate::errors::XmlParsingError;
use crate::gate::EventGate;
use crate::utils::kebab_to_camel;
use futures::Stream;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default number of events published per chunk.
pub const DEFAULT_EVENT_CHUNK: usize = 64;

/// Chunks queued between the parser task and the consumer before the parser blocks.
pub const EVENT_CHANNEL_CAPACITY: usize = 2;

/// One SAX-style event. Element names and attribute keys are camelCase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    StartElement {
        name: String,
        attributes: BTreeMap<String, String>,
    },
    Text {
        content: String,
    },
    EndElement {
        name: String,
    },
}

impl ParseEvent {
    pub fn is_start_of(&self, tag: &str) -> bool {
        matches!(self, ParseEvent::StartElement { name, .. } if name == tag)
    }

    pub fn is_end_of(&self, tag: &str) -> bool {
        matches!(self, ParseEvent::EndElement { name } if name == tag)
    }
}

pub type EventChunk = Result<Vec<ParseEvent>, XmlParsingError>;

/// Handle used by the consumer to hold the parser while it works on a subtree.
#[derive(Debug, Clone)]
pub struct Controller {
    gate: EventGate,
}

impl Controller {
    /// Runs `work` with byte feeding suspended.
    ///
    /// The gate reopens when `work` completes, fails, panics or is dropped
    /// mid-flight.
    pub async fn with_paused_stream<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.gate.pause();
        work.await
    }
}

/// Chunked stream of parse events produced by a background parser task.
///
/// Dropping the stream aborts the task.
pub struct EventStream {
    rx: mpsc::Receiver<EventChunk>,
    task: JoinHandle<()>,
}

impl Stream for EventStream {
    type Item = EventChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts incremental parsing of `source` with the default chunk size.
pub fn stream_events<R>(source: R) -> (Controller, EventStream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream_events_with_chunk_size(source, DEFAULT_EVENT_CHUNK)
}

/// Starts incremental parsing of `source` on a background task.
///
/// Events are published when `chunk_size` of them have accumulated or when
/// the parser has drained its input buffer, so a consumer never waits on
/// events that were already parsed. At most [`EVENT_CHANNEL_CAPACITY`] chunks
/// are queued; past that the parser waits for the consumer. While the stream
/// is paused the parser neither reads input nor parses bytes it has buffered.
pub fn stream_events_with_chunk_size<R>(source: R, chunk_size: usize) -> (Controller, EventStream)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let gate = EventGate::new();
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let mut reader = Reader::from_reader(BufReader::new(GatedReader::new(source, gate.clone())));
    reader.config_mut().check_end_names = true;

    let chunk_size = chunk_size.max(1);
    let parser_gate = gate.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = run_parser(&mut reader, &parser_gate, &tx, chunk_size).await {
            debug!(error = %e, "XML parser stopped");
            let _ = tx.send(Err(e)).await;
        }
    });

    (Controller { gate }, EventStream { rx, task })
}

async fn run_parser<R>(
    reader: &mut Reader<BufReader<GatedReader<R>>>,
    gate: &EventGate,
    tx: &mpsc::Sender<EventChunk>,
    chunk_size: usize,
) -> Result<(), XmlParsingError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(8192);
    let mut batch = EventBatch::default();

    loop {
        if !gate.is_open() {
            // Hand over what is already parsed, then hold until the gate reopens.
            if !batch.publish(tx).await {
                return Ok(());
            }
            gate.when_open(|| ()).await;
        }

        let finished = match reader.read_event_into_async(&mut buf).await? {
            Event::Start(e) => {
                let (name, attributes) = element_parts(&e)?;
                batch.start(name, attributes);
                false
            }
            Event::Empty(e) => {
                let (name, attributes) = element_parts(&e)?;
                batch.start(name.clone(), attributes);
                batch.end(name)?;
                false
            }
            Event::End(e) => {
                batch.end(normalized_name(e.name().as_ref())?)?;
                false
            }
            Event::Text(e) => {
                let text = e
                    .decode()
                    .map_err(|e| XmlParsingError::new(format!("failed to decode text: {e}")))?;
                batch.text.push_str(&text);
                false
            }
            Event::CData(e) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|e| XmlParsingError::new(format!("invalid UTF-8 in CDATA: {e}")))?;
                batch.text.push_str(&text);
                false
            }
            Event::GeneralRef(e) => {
                let entity = e
                    .decode()
                    .map_err(|e| XmlParsingError::new(format!("failed to decode entity: {e}")))?;
                match e.resolve_char_ref()? {
                    Some(ch) => batch.text.push(ch),
                    None => {
                        let resolved = resolve_predefined_entity(&entity).ok_or_else(|| {
                            XmlParsingError::new(format!("unknown entity &{entity};"))
                        })?;
                        batch.text.push_str(resolved);
                    }
                }
                false
            }
            Event::Eof => true,
            _ => false,
        };
        buf.clear();

        if finished {
            batch.flush_text();
            if batch.depth != 0 {
                return Err(XmlParsingError::new(format!(
                    "unexpected end of document with {} unclosed element(s)",
                    batch.depth
                )));
            }
            batch.publish(tx).await;
            return Ok(());
        }

        if batch.events.len() >= chunk_size || reader.get_ref().buffer().is_empty() {
            if !batch.publish(tx).await {
                // Consumer is gone.
                return Ok(());
            }
        }
    }
}

#[derive(Default)]
struct EventBatch {
    events: Vec<ParseEvent>,
    text: String,
    depth: usize,
}

impl EventBatch {
    fn start(&mut self, name: String, attributes: BTreeMap<String, String>) {
        self.flush_text();
        self.depth += 1;
        self.events
            .push(ParseEvent::StartElement { name, attributes });
    }

    fn end(&mut self, name: String) -> Result<(), XmlParsingError> {
        self.flush_text();
        self.depth = self.depth.checked_sub(1).ok_or_else(|| {
            XmlParsingError::new(format!("closing tag </{name}> with no open element"))
        })?;
        self.events.push(ParseEvent::EndElement { name });
        Ok(())
    }

    /// Text between two markup events becomes one event, kept verbatim.
    /// Whitespace-only runs are dropped.
    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        if self.depth > 0 && !text.trim().is_empty() {
            self.events.push(ParseEvent::Text { content: text });
        }
    }

    /// Sends the pending events, waiting for room in the channel.
    /// Returns false once the consumer is gone.
    async fn publish(&mut self, tx: &mpsc::Sender<EventChunk>) -> bool {
        if self.events.is_empty() {
            return !tx.is_closed();
        }
        tx.send(Ok(std::mem::take(&mut self.events))).await.is_ok()
    }
}

fn normalized_name(raw: &[u8]) -> Result<String, XmlParsingError> {
    let name = std::str::from_utf8(raw)
        .map_err(|e| XmlParsingError::new(format!("invalid UTF-8 in name: {e}")))?;
    Ok(kebab_to_camel(name))
}

fn element_parts(
    e: &BytesStart<'_>,
) -> Result<(String, BTreeMap<String, String>), XmlParsingError> {
    let name = normalized_name(e.name().as_ref())?;
    let mut attributes = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| XmlParsingError::new(format!("bad attribute: {e}")))?;
        let key = normalized_name(attr.key.as_ref())?;
        let raw = std::str::from_utf8(&attr.value)
            .map_err(|e| XmlParsingError::new(format!("invalid UTF-8 in attribute: {e}")))?;
        let value = unescape(raw)
            .map_err(|e| XmlParsingError::new(format!("bad attribute value: {e}")))?;
        attributes.insert(key, value.into_owned());
    }
    Ok((name, attributes))
}

type GateWait = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Byte source that refuses to hand bytes to the parser while its gate is closed.
///
/// The gate is checked on every poll, so bytes that arrive during a pause
/// stay in the underlying source until the gate reopens.
struct GatedReader<R> {
    inner: R,
    gate: EventGate,
    wait: Option<GateWait>,
}

impl<R> GatedReader<R> {
    fn new(inner: R, gate: EventGate) -> Self {
        Self {
            inner,
            gate,
            wait: None,
        }
    }
}

impl<R> AsyncRead for GatedReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if let Some(wait) = self.wait.as_mut() {
                ready!(wait.as_mut().poll(cx));
                self.wait = None;
            }
            if self.gate.is_open() {
                return Pin::new(&mut self.inner).poll_read(cx, buf);
            }
            let gate = self.gate.clone();
            self.wait = Some(Box::pin(async move { gate.when_open(|| ()).await }));
        }
    }
}
