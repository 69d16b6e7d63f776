//! Live session: the bundle a presentation surface mounts.
//!
//! DESIGN
//! ======
//! A session opens one channel per requested concern, one aggregator and one
//! dispatcher for a survey, then spawns a router task per channel that
//! applies each inbound message to the aggregator and dispatcher in arrival
//! order and fans it out to subscribers.
//!
//! The aggregator hands its question count to the dispatcher on every
//! publish, before snapshot subscribers are woken, so focus is clamped to
//! the same question list a surface is about to render.
//!
//! Dropping the session aborts everything. `shutdown()` does the same but
//! waits for the channel drivers to close their sockets.

use std::sync::Arc;

use frames::Frame;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::aggregator::{Aggregator, AggregatorView};
use crate::api::SnapshotSource;
use crate::channel::{
    ChannelClient, ChannelHandle, Concern, ConnectionStatus, Connector, Endpoint, Environment, InboundMessage,
    TransportError,
};
use crate::config::SyncConfig;
use crate::dispatcher::{CommandDispatcher, CommandSink};
use crate::state::{Phase, PresenterState};

const MESSAGE_FANOUT: usize = 256;

/// One inbound message, tagged with the channel it arrived on.
#[derive(Clone, Debug)]
pub struct SessionMessage {
    pub concern: Concern,
    pub message: InboundMessage,
}

/// Sink used when the session has no presenter channel.
struct NoPresenter;

impl CommandSink for NoPresenter {
    fn send(&self, _frame: Frame) -> bool {
        false
    }
}

pub struct LiveSession {
    survey_id: String,
    channels: Vec<(Concern, ChannelClient)>,
    aggregator: Aggregator,
    dispatcher: CommandDispatcher,
    messages: broadcast::Sender<SessionMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveSession {
    /// Open channels for `concerns` and start syncing `survey_id`.
    ///
    /// Issues an initial refresh and, when configured, starts auto refresh.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] when a channel URL cannot be
    /// built from the base URL and survey id.
    pub fn start(
        survey_id: &str,
        config: &SyncConfig,
        concerns: &[Concern],
        connector: Arc<dyn Connector>,
        source: Arc<dyn SnapshotSource>,
        env: &Environment,
    ) -> Result<Self, TransportError> {
        let mut urls = Vec::with_capacity(concerns.len());
        for &concern in concerns {
            if urls.iter().any(|(c, _)| *c == concern) {
                continue;
            }
            urls.push((concern, Endpoint::new(survey_id, concern).resolve(&config.base_url)?));
        }

        let aggregator = Aggregator::new(survey_id, config.aggregator, source);
        let (messages, _) = broadcast::channel(MESSAGE_FANOUT);

        let mut channels = Vec::with_capacity(urls.len());
        let mut inbound = Vec::with_capacity(urls.len());
        for (concern, url) in urls {
            info!(survey_id, %concern, %url, "opening channel");
            let mut client = ChannelClient::spawn(
                format!("{survey_id}/{concern}"),
                url,
                config.channel,
                Arc::clone(&connector),
                env,
                true,
            );
            if let Some(rx) = client.take_inbound() {
                inbound.push((concern, rx));
            }
            channels.push((concern, client));
        }

        let sink: Arc<dyn CommandSink> = match channels.iter().find(|(c, _)| *c == Concern::Presenter) {
            Some((_, client)) => Arc::new(client.handle()),
            None => Arc::new(NoPresenter),
        };
        let dispatcher = CommandDispatcher::new(sink);

        let focus = dispatcher.clone();
        aggregator.watch_question_count(move |count| focus.set_question_count(count));

        let mut tasks = Vec::with_capacity(inbound.len());
        for (concern, rx) in inbound {
            tasks.push(tokio::spawn(route(concern, rx, aggregator.clone(), dispatcher.clone(), messages.clone())));
        }

        aggregator.refresh();
        if config.aggregator.auto_refresh {
            aggregator.start_auto_refresh();
        }

        Ok(Self { survey_id: survey_id.to_owned(), channels, aggregator, dispatcher, messages, tasks })
    }

    #[must_use]
    pub fn survey_id(&self) -> &str {
        &self.survey_id
    }

    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn channel(&self, concern: Concern) -> Option<ChannelHandle> {
        self.channels.iter().find(|(c, _)| *c == concern).map(|(_, client)| client.handle())
    }

    #[must_use]
    pub fn status(&self, concern: Concern) -> Option<ConnectionStatus> {
        self.channel(concern).map(|handle| handle.status())
    }

    #[must_use]
    pub fn subscribe_status(&self, concern: Concern) -> Option<watch::Receiver<ConnectionStatus>> {
        self.channel(concern).map(|handle| handle.subscribe_status())
    }

    #[must_use]
    pub fn subscribe_snapshot(&self) -> watch::Receiver<AggregatorView> {
        self.aggregator.subscribe()
    }

    #[must_use]
    pub fn subscribe_presenter(&self) -> watch::Receiver<PresenterState> {
        self.dispatcher.subscribe()
    }

    /// Every inbound message, after it has been applied.
    #[must_use]
    pub fn subscribe_messages(&self) -> broadcast::Receiver<SessionMessage> {
        self.messages.subscribe()
    }

    /// Every channel of this session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channels.iter().all(|(_, client)| client.handle().is_connected())
    }

    /// The session is running but some channel is down, so the shown
    /// results may lag behind the server.
    #[must_use]
    pub fn results_may_be_outdated(&self) -> bool {
        matches!(self.dispatcher.state().phase, Phase::Live | Phase::Paused) && !self.is_connected()
    }

    /// Stop all tasks and close every channel, waiting for the drivers.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.aggregator.shutdown();
        for (concern, client) in std::mem::take(&mut self.channels) {
            client.shutdown().await;
            debug!(survey_id = %self.survey_id, %concern, "channel closed");
        }
        info!(survey_id = %self.survey_id, "session shut down");
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.aggregator.shutdown();
    }
}

async fn route(
    concern: Concern,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    aggregator: Aggregator,
    dispatcher: CommandDispatcher,
    fanout: broadcast::Sender<SessionMessage>,
) {
    while let Some(message) = inbound.recv().await {
        debug!(survey_id = aggregator.survey_id(), %concern, kind = %message.kind, "inbound message");
        aggregator.handle_message(&message);
        dispatcher.handle_message(&message);
        let _ = fanout.send(SessionMessage { concern, message });
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
