use futures::{Stream, StreamExt};

use colloquy_core::event::{Event, EventBody};

/// Reply used when a turn produced no text at all.
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't generate a response.";

/// Folds turn events into the single reply returned to the caller.
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    reply: String,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &Event) {
        match &event.body {
            EventBody::Fragments { fragments } => {
                for fragment in fragments {
                    self.reply.push_str(fragment);
                }
            }
            EventBody::Opaque { repr } => self.reply.push_str(repr),
            EventBody::Empty => {}
        }
    }

    /// Text accumulated so far, without the fallback.
    pub fn text(&self) -> &str {
        &self.reply
    }

    pub fn finish(self) -> String {
        if self.reply.is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            self.reply
        }
    }
}

/// Drain `stream` into a reply. The first error is returned as-is and no
/// partial reply is produced.
pub async fn aggregate<S, E>(stream: S) -> Result<String, E>
where
    S: Stream<Item = Result<Event, E>>,
{
    futures::pin_mut!(stream);
    let mut aggregator = ResponseAggregator::new();
    while let Some(item) = stream.next().await {
        aggregator.push(&item?);
    }
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ok(events: Vec<Event>) -> impl Stream<Item = Result<Event, String>> {
        stream::iter(events.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn fragments_concatenate_in_order() {
        let events = vec![
            Event::text("assistant", &["Hel"]),
            Event::text("assistant", &["lo, "]),
            Event::text("assistant", &["world"]),
        ];
        assert_eq!(aggregate(ok(events)).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn multiple_fragments_in_one_event() {
        let events = vec![Event::text("assistant", &["a", "b"]), Event::text("assistant", &["c"])];
        assert_eq!(aggregate(ok(events)).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn no_content_yields_fallback() {
        assert_eq!(aggregate(ok(Vec::new())).await.unwrap(), FALLBACK_REPLY);

        let empties = vec![Event::empty("assistant"), Event::empty("assistant")];
        assert_eq!(aggregate(ok(empties)).await.unwrap(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn empty_strings_never_produce_empty_reply() {
        let events = vec![Event::text("assistant", &[""])];
        assert_eq!(aggregate(ok(events)).await.unwrap(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn opaque_repr_appended() {
        let events = vec![
            Event::text("assistant", &["x="]),
            Event::new("assistant", EventBody::Opaque { repr: "{role:model}".into() }),
        ];
        assert_eq!(aggregate(ok(events)).await.unwrap(), "x={role:model}");
    }

    #[tokio::test]
    async fn first_error_short_circuits() {
        let items: Vec<Result<Event, String>> = vec![
            Ok(Event::text("assistant", &["partial"])),
            Err("boom".into()),
            Ok(Event::text("assistant", &["never"])),
        ];
        assert_eq!(aggregate(stream::iter(items)).await.unwrap_err(), "boom");
    }

    #[test]
    fn text_excludes_fallback() {
        let mut aggregator = ResponseAggregator::new();
        aggregator.push(&Event::empty("assistant"));
        assert_eq!(aggregator.text(), "");
        aggregator.push(&Event::text("assistant", &["hi"]));
        assert_eq!(aggregator.text(), "hi");
        assert_eq!(aggregator.finish(), "hi");
    }
}
