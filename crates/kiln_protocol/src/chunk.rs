//! Byte-bounded JSON-array chunking.
//!
//! Notification payloads have a hard wire-size limit. `serialize_chunks`
//! greedily packs an ordered sequence of items into the minimum number of
//! JSON-array strings whose UTF-8 encoding stays within that limit,
//! without ever splitting a single item.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    /// A single item's own encoding exceeds the limit while the current
    /// group is still empty, so no valid grouping exists.
    #[error("single item encoding is {size} bytes, exceeds max_bytes({max_bytes})")]
    OversizeItem { size: usize, max_bytes: usize },
    #[error("item failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize `items` into JSON-array strings of at most `max_bytes` each.
///
/// Lazy: items are encoded as groups are pulled. Order is preserved within
/// and across groups, and no yielded group is empty. An item whose own
/// encoding exceeds `max_bytes` fails only when it heads an empty group;
/// otherwise it simply forces the current group to flush first.
pub fn serialize_chunks<'a, T: Serialize + 'a>(
    items: impl IntoIterator<Item = &'a T> + 'a,
    max_bytes: usize,
) -> impl Iterator<Item = Result<String, ChunkError>> + 'a {
    SerializedChunks {
        items: items.into_iter().map(|item| serde_json::to_string(item)),
        pending: None,
        parts: Vec::new(),
        // encoded size of the current group: 2 brackets + parts + commas
        group_size: 2,
        max_bytes,
        done: false,
    }
}

struct SerializedChunks<I> {
    items: I,
    /// Item that forced the previous group to flush; heads the next group.
    pending: Option<String>,
    parts: Vec<String>,
    group_size: usize,
    max_bytes: usize,
    done: bool,
}

impl<I> SerializedChunks<I>
where
    I: Iterator<Item = serde_json::Result<String>>,
{
    fn render_group(&mut self) -> String {
        let group = format!("[{}]", self.parts.join(","));
        debug_assert!(group.len() == self.group_size);
        self.parts.clear();
        self.group_size = 2;
        group
    }
}

impl<I> Iterator for SerializedChunks<I>
where
    I: Iterator<Item = serde_json::Result<String>>,
{
    type Item = Result<String, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let encoded = match self.pending.take() {
                Some(encoded) => encoded,
                None => match self.items.next() {
                    Some(Ok(encoded)) => encoded,
                    Some(Err(err)) => {
                        self.done = true;
                        return Some(Err(ChunkError::Serialize(err)));
                    }
                    None => {
                        self.done = true;
                        if self.parts.is_empty() {
                            return None;
                        }
                        return Some(Ok(self.render_group()));
                    }
                },
            };

            if self.parts.is_empty() && encoded.len() + 2 > self.max_bytes {
                self.done = true;
                return Some(Err(ChunkError::OversizeItem {
                    size: encoded.len() + 2,
                    max_bytes: self.max_bytes,
                }));
            }

            // separator comma only once the group is non-empty
            let added = encoded.len() + if self.parts.is_empty() { 0 } else { 1 };
            if !self.parts.is_empty() && self.group_size + added > self.max_bytes {
                self.pending = Some(encoded);
                return Some(Ok(self.render_group()));
            }

            self.group_size += added;
            self.parts.push(encoded);
        }
    }
}
