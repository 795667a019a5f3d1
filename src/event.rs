use crate::{scheduler::StreamSummary, transport::GuildId};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(100);
        Self { tx }
    }

    /// Publishes `event`. Having no subscribers is not an error.
    pub fn send(&self, event: Event) {
        if self.tx.receiver_count() == 0 {
            return;
        }

        let result = self.tx.send(event);

        if let Err(e) = result {
            error!("Error while sending event: {:?}", e);
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    pub async fn recv(&mut self) -> Event {
        loop {
            let event = self.rx.recv().await;

            match event {
                Ok(event) => break event,
                Err(RecvError::Closed) => {
                    panic!("Tried to read recv from EventBus with all sender halves dropped, this should never happen")
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "EventBus::Subscriber lagging behind senders, skipping {skipped} messages"
                    );
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    /// Request accepted onto the guild's playback queue
    Queued { guild_id: GuildId, url: String },

    /// Audio loaded, streaming to the voice transport begins
    Started { guild_id: GuildId, path: String },

    /// All chunks/packets processed and the end-of-track marker inserted
    Finished {
        guild_id: GuildId,
        path: String,
        summary: StreamSummary,
    },

    /// The request was abandoned
    Failed {
        guild_id: GuildId,
        url: String,
        error: String,
    },

    /// Queued audio was skipped up to the next marker
    Skipped { guild_id: GuildId },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Playback(PlaybackEvent),
}

pub fn debug(bus: &EventBus) {
    let bus = bus.clone();
    tokio::spawn(async move {
        let mut bus = bus.subscribe();
        loop {
            let event = bus.recv().await;
            debug!("Received event: {:?}", event);
        }
    });
}
