//! Per-guild playback workers.
//!
//! Every guild with pending `.play` requests gets its own worker task and
//! request queue. A worker runs one request at a time through
//! fetch → decode → stream, so one guild's download never holds up another
//! guild's commands. Each worker owns a cancellation token derived from the
//! registry's root token.

use crate::{
    config::{Config, PipelineConfig},
    error::PipelineError,
    event::{Event, EventBus, PlaybackEvent},
    fetcher::{fetch_to_cache, MediaFetcher},
    resolver::{MediaRequest, UrlResolver},
    scheduler::{SchedulerConfig, StreamScheduler, StreamSummary},
    sources,
    transport::{GuildId, VoiceGateway},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Everything needed to turn a [`MediaRequest`] into audio on a voice session.
pub struct Pipeline {
    config: PipelineConfig,
    resolver: UrlResolver,
    fetcher: Arc<dyn MediaFetcher>,
    scheduler: StreamScheduler,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        resolver: UrlResolver,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        let scheduler = StreamScheduler::new(SchedulerConfig::from(&config));

        Self {
            config,
            resolver,
            fetcher,
            scheduler,
        }
    }

    pub fn from_config(config: &Config, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self::new(config.pipeline.clone(), config.resolver.build(), fetcher)
    }

    /// Runs `request` to completion on `guild_id`'s voice session.
    /// Returns the track's cache path along with the stream summary.
    pub async fn play(
        &self,
        guild_id: GuildId,
        request: &MediaRequest,
        gateway: &dyn VoiceGateway,
        bus: &EventBus,
        cancel: &CancellationToken,
    ) -> Result<(String, StreamSummary), PipelineError> {
        let path = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            path = fetch_to_cache(self.fetcher.as_ref(), &self.resolver, request, &self.config) => path?,
        };

        let buffer = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            buffer = sources::load(path.clone(), request.format, self.config.buffer_reserve_bytes) => buffer?,
        };

        let session = gateway
            .session(guild_id)
            .await
            .ok_or(PipelineError::NoVoiceConnection { guild_id })?;

        let tag = path.to_string_lossy().to_string();

        bus.send(Event::Playback(PlaybackEvent::Started {
            guild_id,
            path: tag.clone(),
        }));

        let summary = self
            .scheduler
            .stream(buffer, session.as_ref(), &tag, cancel)
            .await?;

        Ok((tag, summary))
    }
}

struct GuildWorker {
    tx: mpsc::UnboundedSender<MediaRequest>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PlaybackRegistry {
    pipeline: Arc<Pipeline>,
    gateway: Arc<dyn VoiceGateway>,
    bus: EventBus,
    root: CancellationToken,
    workers: Mutex<HashMap<GuildId, GuildWorker>>,
}

impl PlaybackRegistry {
    pub fn new(pipeline: Arc<Pipeline>, gateway: Arc<dyn VoiceGateway>, bus: EventBus) -> Self {
        Self {
            pipeline,
            gateway,
            bus,
            root: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<GuildId, GuildWorker>> {
        match self.workers.lock() {
            Ok(workers) => workers,
            Err(e) => e.into_inner(),
        }
    }

    /// Queues `request` behind the guild's earlier requests.
    pub fn enqueue(&self, guild_id: GuildId, request: MediaRequest) {
        let mut workers = self.workers();

        self.bus.send(Event::Playback(PlaybackEvent::Queued {
            guild_id,
            url: request.url.clone(),
        }));

        let request = match workers.get(&guild_id) {
            Some(worker) => match worker.tx.send(request) {
                Ok(()) => return,
                // Worker is gone, start a fresh one below
                Err(mpsc::error::SendError(request)) => request,
            },
            None => request,
        };

        let worker = self.spawn_worker(guild_id);
        if worker.tx.send(request).is_err() {
            error!("Playback worker for guild {guild_id} exited before receiving a request");
        }
        workers.insert(guild_id, worker);
    }

    fn spawn_worker(&self, guild_id: GuildId) -> GuildWorker {
        let (tx, mut rx) = mpsc::unbounded_channel::<MediaRequest>();
        let cancel = self.root.child_token();

        let pipeline = self.pipeline.clone();
        let gateway = self.gateway.clone();
        let bus = self.bus.clone();
        let worker_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            debug!("Playback worker for guild {guild_id} started");

            loop {
                let request = tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                info!(
                    "Playing {} ({}) in guild {guild_id}",
                    request.url, request.format
                );

                let result = pipeline
                    .play(guild_id, &request, gateway.as_ref(), &bus, &worker_cancel)
                    .await;

                match result {
                    Ok((path, summary)) => {
                        bus.send(Event::Playback(PlaybackEvent::Finished {
                            guild_id,
                            path,
                            summary,
                        }));
                    }
                    Err(PipelineError::Cancelled) => {
                        info!("Playback of {} in guild {guild_id} cancelled", request.url);
                        bus.send(Event::Playback(PlaybackEvent::Failed {
                            guild_id,
                            url: request.url,
                            error: PipelineError::Cancelled.to_string(),
                        }));
                        break;
                    }
                    Err(e) => {
                        error!("Error while playing {}: {e:?}", request.url);
                        bus.send(Event::Playback(PlaybackEvent::Failed {
                            guild_id,
                            url: request.url,
                            error: e.to_string(),
                        }));
                    }
                }
            }

            debug!("Playback worker for guild {guild_id} stopped");
        });

        GuildWorker { tx, cancel, handle }
    }

    /// Cancels the guild's in-flight request and drops its queue.
    /// Returns false if the guild had no worker.
    pub fn stop(&self, guild_id: GuildId) -> bool {
        match self.workers().remove(&guild_id) {
            Some(worker) => {
                worker.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.workers()
            .get(&guild_id)
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Cancels every worker and waits for them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let handles: Vec<_> = self
            .workers()
            .drain()
            .map(|(_, worker)| worker.handle)
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Playback worker panicked: {e:?}");
            }
        }
    }
}
