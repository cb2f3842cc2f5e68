//! Progress channel between the pipeline and its observer.
//!
//! Worker threads each hold a cloned `EventSender`. Reporting never blocks
//! or fails the ingest: the channel is unbounded and a vanished observer
//! just means events are dropped.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::Event;

#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        // No observer left; ingest carries on regardless
        let _ = self.inner.send(event);
    }
}

/// Observer side; iteration ends once every sender is dropped
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Everything queued right now, without waiting for more
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

pub struct EventChannel;

impl EventChannel {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// Sender for runs nobody watches
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}
