use super::stream::{stream_events, EventChunk, ParseEvent};
use crate::cursor::{CursorError, StreamCursor};
use crate::errors::XmlParsingError;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use tokio::io::AsyncRead;

/// Immutable element tree built from one complete start..end span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child called `name`, if it has any.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text.as_deref())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

struct OpenElement {
    name: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    children: Vec<XmlNode>,
}

impl From<OpenElement> for XmlNode {
    fn from(open: OpenElement) -> Self {
        XmlNode {
            name: open.name,
            attributes: open.attributes,
            text: open.text,
            children: open.children,
        }
    }
}

/// Incremental fold of events into a single [`XmlNode`].
#[derive(Default)]
pub struct TreeBuilder {
    stack: Vec<OpenElement>,
    root: Option<XmlNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the root element has been closed.
    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    pub fn push(&mut self, event: ParseEvent) -> Result<(), XmlParsingError> {
        if self.root.is_some() {
            return Err(XmlParsingError::new(
                "unexpected content after the root element closed",
            ));
        }

        match event {
            ParseEvent::StartElement { name, attributes } => {
                self.stack.push(OpenElement {
                    name,
                    attributes,
                    text: None,
                    children: Vec::new(),
                });
            }
            ParseEvent::Text { content } => {
                let open = self.stack.last_mut().ok_or_else(|| {
                    XmlParsingError::new("text outside of any element")
                })?;
                match open.text.as_mut() {
                    Some(text) => text.push_str(&content),
                    None => open.text = Some(content),
                }
            }
            ParseEvent::EndElement { name } => {
                let open = self.stack.pop().ok_or_else(|| {
                    XmlParsingError::new(format!("closing tag </{name}> with no open element"))
                })?;
                if open.name != name {
                    return Err(XmlParsingError::new(format!(
                        "mismatched closing tag: expected </{}>, found </{name}>",
                        open.name
                    )));
                }
                let node = XmlNode::from(open);
                match self.stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => self.root = Some(node),
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<XmlNode, XmlParsingError> {
        if let Some(root) = self.root {
            return Ok(root);
        }
        match self.stack.last() {
            Some(open) => Err(XmlParsingError::new(format!(
                "element <{}> was never closed",
                open.name
            ))),
            None => Err(XmlParsingError::new("no element found")),
        }
    }
}

/// Folds a sequence holding exactly one well-nested element into a tree.
pub fn build_tree<I>(events: I) -> Result<XmlNode, XmlParsingError>
where
    I: IntoIterator<Item = ParseEvent>,
{
    let mut builder = TreeBuilder::new();
    for event in events {
        builder.push(event)?;
    }
    builder.finish()
}

impl From<CursorError<XmlParsingError>> for XmlParsingError {
    fn from(err: CursorError<XmlParsingError>) -> Self {
        match err {
            CursorError::Exhausted => XmlParsingError::new("unexpected end of document"),
            CursorError::Source(e) => e,
        }
    }
}

/// Pulls exactly one element, starting at the cursor's next event, and builds it.
///
/// The cursor is left just after the element's end tag.
pub async fn next_subtree<S>(
    cursor: &mut StreamCursor<S, ParseEvent>,
) -> Result<XmlNode, XmlParsingError>
where
    S: Stream<Item = EventChunk> + Unpin,
{
    let mut builder = TreeBuilder::new();
    while !builder.is_complete() {
        builder.push(cursor.pull_next().await?)?;
    }
    builder.finish()
}

/// Parses a small document in one go. No pausing is applied.
pub async fn parse_whole_document<R>(source: R) -> Result<XmlNode, XmlParsingError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (_controller, mut events) = stream_events(source);
    let mut builder = TreeBuilder::new();
    while let Some(chunk) = events.next().await {
        for event in chunk? {
            builder.push(event)?;
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(name: &str) -> ParseEvent {
        ParseEvent::StartElement {
            name: name.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    fn end(name: &str) -> ParseEvent {
        ParseEvent::EndElement {
            name: name.to_string(),
        }
    }

    fn text(content: &str) -> ParseEvent {
        ParseEvent::Text {
            content: content.to_string(),
        }
    }

    #[test]
    fn empty_element_builds_leaf() {
        let node = build_tree(vec![start("a"), end("a")]).unwrap();
        assert_eq!(node.name, "a");
        assert!(node.children.is_empty());
        assert!(node.text.is_none());
    }

    #[test]
    fn nested_children_keep_order() {
        let node = build_tree(vec![
            start("vehicle"),
            start("name"),
            text("Civic"),
            end("name"),
            start("make"),
            text("Honda"),
            end("make"),
            end("vehicle"),
        ])
        .unwrap();
        let names: Vec<_> = node.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "make"]);
        assert_eq!(node.child_text("make"), Some("Honda"));
    }

    #[test]
    fn mismatched_tag_is_rejected() {
        let err = build_tree(vec![start("a"), start("b"), end("a")]).unwrap_err();
        assert!(err.cause.contains("mismatched"));
    }

    #[test]
    fn stack_underflow_is_rejected() {
        let err = build_tree(vec![end("a")]).unwrap_err();
        assert!(err.cause.contains("no open element"));
    }

    #[test]
    fn unclosed_and_empty_sequences_are_rejected() {
        assert!(build_tree(vec![start("a")]).is_err());
        assert!(build_tree(Vec::new()).is_err());
    }

    #[test]
    fn trailing_events_are_rejected() {
        assert!(build_tree(vec![start("a"), end("a"), start("b"), end("b")]).is_err());
    }

    #[tokio::test]
    async fn whole_document_parses() {
        let node = parse_whole_document(
            &br#"<fuel-types><fuel-type id="1"><name>Regular</name></fuel-type></fuel-types>"#[..],
        )
        .await
        .unwrap();
        assert_eq!(node.name, "fuelTypes");
        let fuel = node.child("fuelType").unwrap();
        assert_eq!(fuel.attribute("id"), Some("1"));
        assert_eq!(fuel.child_text("name"), Some("Regular"));
    }

    #[tokio::test]
    async fn whole_document_surfaces_mismatch() {
        assert!(parse_whole_document(&b"<a><b></a>"[..]).await.is_err());
    }
}
