//! Pull/peek access over a chunked stream.

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError<E> {
    #[error("stream ended while another element was expected")]
    Exhausted,
    #[error(transparent)]
    Source(E),
}

/// Turns a stream of `Vec<T>` chunks into a cursor with one element of lookahead.
///
/// At most one chunk is buffered; the next one is only requested from the
/// source once the current chunk is drained.
pub struct StreamCursor<S, T> {
    source: S,
    chunk: VecDeque<T>,
}

impl<S, T, E> StreamCursor<S, T>
where
    S: Stream<Item = Result<Vec<T>, E>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            chunk: VecDeque::new(),
        }
    }

    async fn fill(&mut self) -> Result<(), CursorError<E>> {
        // Empty chunks are legal; keep pulling until there is something to show.
        while self.chunk.is_empty() {
            match self.source.next().await {
                Some(Ok(items)) => self.chunk = VecDeque::from(items),
                Some(Err(e)) => return Err(CursorError::Source(e)),
                None => return Err(CursorError::Exhausted),
            }
        }
        Ok(())
    }

    /// Returns the next element without consuming it.
    pub async fn peek_next(&mut self) -> Result<&T, CursorError<E>> {
        self.fill().await?;
        self.chunk.front().ok_or(CursorError::Exhausted)
    }

    /// Returns and consumes the next element.
    pub async fn pull_next(&mut self) -> Result<T, CursorError<E>> {
        self.fill().await?;
        self.chunk.pop_front().ok_or(CursorError::Exhausted)
    }

    /// Discards elements until `pred` matches, leaving the match unconsumed.
    pub async fn skip_until<P>(&mut self, mut pred: P) -> Result<&T, CursorError<E>>
    where
        P: FnMut(&T) -> bool,
    {
        loop {
            if pred(self.peek_next().await?) {
                break;
            }
            self.pull_next().await?;
        }
        self.peek_next().await
    }
}
