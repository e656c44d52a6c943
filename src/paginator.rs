//! Lazy, bounded message pagination
//!
//! History is read page by page, newest first, and handed out one message at a time.
//! A page is only requested once the previous one has been consumed, so memory stays
//! bounded by the page size no matter how long the channel is.

use crate::backend::HistoryRequest;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{ChannelId, Message, MessageId, ResolvedChannel};
use futures::Stream;
use std::collections::{HashSet, VecDeque};

struct PageState {
    session: Session,
    channel: ChannelId,
    page_size: usize,
    /// Messages still allowed by the cap, including buffered ones
    remaining: usize,
    /// Lowest id received so far; the next page starts strictly below it
    offset: Option<MessageId>,
    /// Ids already handed out
    seen: HashSet<MessageId>,
    buffer: VecDeque<Message>,
    exhausted: bool,
}

/// Stream at most `max_count` messages of `channel`, in service order.
///
/// The stream ends when the cap is reached, the service returns an empty or short
/// page, or an error is yielded. Nothing is requested until the stream is polled. No
/// page is requested beyond what the cap needs: a cap of 5 issues a single request
/// with limit 5. Messages within a page keep the order the service sent them in; ids the
/// service repeats are dropped.
pub fn paginate(
    session: &Session,
    channel: &ResolvedChannel,
    max_count: usize,
    page_size: usize,
) -> impl Stream<Item = Result<Message>> + Send + use<> {
    let state = PageState {
        session: session.clone(),
        channel: channel.id,
        page_size: page_size.max(1),
        remaining: max_count,
        offset: None,
        seen: HashSet::new(),
        buffer: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.buffer.pop_front() {
                state.remaining -= 1;
                return Ok::<_, Error>(Some((message, state)));
            }
            if state.exhausted || state.remaining == 0 {
                return Ok(None);
            }
            state.fetch_page().await?;
        }
    })
}

impl PageState {
    async fn fetch_page(&mut self) -> Result<()> {
        let request = HistoryRequest {
            limit: self.page_size.min(self.remaining),
            offset_id: self.offset,
        };
        let backend = self.session.backend();
        let token = self.session.token();
        let channel = self.channel;
        let page = self
            .session
            .call("fetch_history", || async move {
                backend.fetch_history(token, channel, request).await
            })
            .await?;

        let received = page.len();
        if received < request.limit {
            self.exhausted = true;
        }

        if let Some(lowest) = page.iter().map(|m| m.id).min() {
            self.offset = Some(self.offset.map_or(lowest, |offset| offset.min(lowest)));
        }

        let mut kept = 0;
        for message in page {
            if kept == self.remaining {
                break;
            }
            if self.seen.insert(message.id) {
                self.buffer.push_back(message);
                kept += 1;
            }
        }

        if kept == 0 {
            // Nothing new (empty page or only repeats); stop rather than loop forever
            self.exhausted = true;
        }

        tracing::debug!(
            channel = %self.channel,
            limit = request.limit,
            offset_id = ?request.offset_id.map(|id| id.get()),
            received,
            kept,
            "fetched history page"
        );
        Ok(())
    }
}
