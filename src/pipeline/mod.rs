//! The pipeline entry point
//!
//! [`MediaPipeline`] owns one instance of every stage and exposes the inbound
//! `submit` operation: share links are resolved, the resulting URLs are grouped
//! into work units, and each unit (acquire, then deliver) is queued on its
//! destination. When a destination's queue drains, the requester is notified
//! through the [`DeliverySink`].

use crate::acquisition::{Acquirer, LiveCapture};
use crate::config::{Config, DeliveryMode};
use crate::delivery::{DeliveryBatcher, DeliverySink};
use crate::error::{Error, Result};
use crate::resolver::LinkResolver;
use crate::scheduler::{DestinationScheduler, DrainObserver, DrainSummary, WorkUnit};
use crate::segmenter::Segmenter;
use crate::transcode::Transcoder;
use crate::types::{DeliveryReport, DestinationId, Event, RequestContext};
use crate::utils::{ScratchDir, list_files, random_stem};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval at which shutdown re-checks background deliveries
const BACKGROUND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Split free-form link input into distinct URLs
///
/// Accepts comma and newline separated text, trims every entry and drops blanks.
/// The first occurrence of each URL keeps its position.
///
/// # Examples
///
/// ```
/// use media_ferry::pipeline::parse_url_list;
///
/// let urls = parse_url_list(["https://a.example/1.mp4, https://b.example/2.mp4\n\nhttps://a.example/1.mp4"]);
/// assert_eq!(urls, vec!["https://a.example/1.mp4", "https://b.example/2.mp4"]);
/// ```
pub fn parse_url_list<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for input in inputs {
        for url in input.as_ref().split([',', '\n']) {
            let url = url.trim();
            if !url.is_empty() && seen.insert(url.to_string()) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Sends the completion notice when a destination drains
struct CompletionNotifier {
    sink: Arc<dyn DeliverySink>,
}

#[async_trait]
impl DrainObserver for CompletionNotifier {
    async fn drained(&self, summary: DrainSummary) {
        let message = if summary.failed == 0 {
            format!("{} Upload completed!", summary.context.requester)
        } else {
            format!(
                "{} Upload completed with {} failed group(s) out of {}",
                summary.context.requester,
                summary.failed,
                summary.completed + summary.failed
            )
        };

        if let Err(e) = self
            .sink
            .notify(summary.destination, &summary.context, &message)
            .await
        {
            warn!(destination = %summary.destination, error = %e, "failed to send completion notice");
        }
    }
}

/// Decrements the background counter when dropped
struct BackgroundGuard(Arc<AtomicUsize>);

impl BackgroundGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for BackgroundGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A live recording started by [`MediaPipeline::record_live`]
///
/// Once the stream ends (or [`LiveRecording::stop`] is called) the recorded file is
/// delivered to the destination and the requester is notified.
#[derive(Debug)]
pub struct LiveRecording {
    stop: CancellationToken,
    task: JoinHandle<Result<DeliveryReport>>,
}

impl LiveRecording {
    /// Ask the recording to stop; delivery follows
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether recording and delivery have both finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the recording to be delivered
    pub async fn finish(self) -> Result<DeliveryReport> {
        self.task
            .await
            .map_err(|e| Error::Other(format!("live recording task failed: {}", e)))?
    }
}

/// Media acquisition, segmentation and delivery pipeline
///
/// Cheap to clone; clones share every stage and the same scheduler.
///
/// # Examples
///
/// ```no_run
/// use media_ferry::{Config, MediaPipeline};
/// use media_ferry::delivery::DirectorySink;
/// use media_ferry::types::{DeliveryTarget, DestinationId, RequestContext};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> media_ferry::Result<()> {
/// let pipeline = MediaPipeline::new(Config::default(), Arc::new(DirectorySink::new("./out")))?;
///
/// let ctx = RequestContext::new("someone", 42, DeliveryTarget::Reply);
/// let units = pipeline
///     .submit(["https://cdn.example.com/clip.mp4"], DestinationId(1), 25 * 1024 * 1024, ctx)
///     .await?;
/// println!("queued {units} work unit(s)");
///
/// pipeline.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MediaPipeline {
    config: Arc<Config>,
    resolver: Arc<LinkResolver>,
    acquirer: Arc<Acquirer>,
    batcher: Arc<DeliveryBatcher>,
    scheduler: DestinationScheduler,
    sink: Arc<dyn DeliverySink>,
    transcoder: Arc<dyn Transcoder>,
    event_tx: broadcast::Sender<Event>,
    accepting: Arc<AtomicBool>,
    background: Arc<AtomicUsize>,
}

impl MediaPipeline {
    /// Build a pipeline, locating ffmpeg from the tool configuration
    pub fn new(config: Config, sink: Arc<dyn DeliverySink>) -> Result<Self> {
        let transcoder = crate::transcode::from_config(&config.tools);
        Self::with_transcoder(config, sink, transcoder)
    }

    /// Build a pipeline around an explicit transcoder
    pub fn with_transcoder(
        config: Config,
        sink: Arc<dyn DeliverySink>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.scheduler.event_capacity.max(1));
        let resolver = LinkResolver::new(&config.resolver)?;
        let acquirer = Acquirer::new(config.acquisition.clone(), transcoder.clone())?;
        let segmenter = Segmenter::new(transcoder.clone(), &config.segment);
        let batcher = DeliveryBatcher::new(
            sink.clone(),
            segmenter,
            &config.delivery,
            config.work_dir().clone(),
        )
        .with_events(event_tx.clone());
        let scheduler = DestinationScheduler::new(Arc::new(CompletionNotifier {
            sink: sink.clone(),
        }))
        .with_events(event_tx.clone());

        info!(
            work_dir = ?config.work_dir(),
            transcoder = transcoder.name(),
            "media pipeline ready"
        );

        Ok(Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
            acquirer: Arc::new(acquirer),
            batcher: Arc::new(batcher),
            scheduler,
            sink,
            transcoder,
            event_tx,
            accepting: Arc::new(AtomicBool::new(true)),
            background: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Subscribers that fall behind by more than the configured capacity miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration the pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The destination scheduler
    pub fn scheduler(&self) -> &DestinationScheduler {
        &self.scheduler
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Queue URLs for download and delivery to `destination`
    ///
    /// Share links are resolved first; links that cannot be resolved are dropped
    /// (and reported as [`Event::Unresolved`]). The remaining URLs are split into
    /// groups, each group becoming one work unit. Returns the number of units
    /// queued. When nothing is left to fetch the requester is told so and `0` is
    /// returned.
    pub async fn submit<I, S>(
        &self,
        urls: I,
        destination: DestinationId,
        max_artifact_bytes: u64,
        ctx: RequestContext,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_accepting()?;

        let (share, mut fetchable): (Vec<String>, Vec<String>) = parse_url_list(urls)
            .into_iter()
            .partition(|url| self.config.resolver.is_resolvable(url));

        if !share.is_empty() {
            let links = self.resolver.resolve(&share).await;
            for (url, link) in share.iter().zip(&links) {
                if link.is_none() {
                    self.emit(Event::Unresolved { url: url.clone() });
                }
            }
            for link in LinkResolver::fast_links(&links) {
                if !fetchable.contains(&link) {
                    fetchable.push(link);
                }
            }
        }

        if fetchable.is_empty() {
            let message = if share.is_empty() {
                "No links to download".to_string()
            } else {
                format!("Unable to resolve any of the {} link(s)", share.len())
            };
            warn!(destination = %destination, requester = %ctx.requester, "{}", message);
            self.sink.notify(destination, &ctx, &message).await?;
            return Ok(0);
        }

        let group_size = self.config.scheduler.url_group_limit.max(1);
        let mut units = 0;
        for group in fetchable.chunks(group_size) {
            let unit = self.acquire_and_deliver(group.to_vec(), destination, max_artifact_bytes, ctx.clone());
            self.scheduler.enqueue(unit).await;
            units += 1;
        }

        info!(
            destination = %destination,
            urls = fetchable.len(),
            units,
            "submission queued"
        );
        self.emit(Event::Submitted {
            destination,
            urls: fetchable.len(),
            units,
        });
        Ok(units)
    }

    /// Queue delivery of a local file or directory to `destination`
    ///
    /// The content is moved into the pipeline's working area when the unit runs.
    pub async fn submit_path(
        &self,
        path: &Path,
        destination: DestinationId,
        max_artifact_bytes: u64,
        ctx: RequestContext,
    ) -> Result<()> {
        self.ensure_accepting()?;

        let batcher = self.batcher.clone();
        let path = path.to_path_buf();
        let unit_ctx = ctx.clone();
        self.scheduler
            .enqueue(WorkUnit::new(destination, ctx, move || async move {
                batcher
                    .deliver_path(&path, max_artifact_bytes, destination, &unit_ctx)
                    .await?;
                Ok(())
            }))
            .await;
        Ok(())
    }

    fn acquire_and_deliver(
        &self,
        urls: Vec<String>,
        destination: DestinationId,
        max_artifact_bytes: u64,
        ctx: RequestContext,
    ) -> WorkUnit {
        let acquirer = self.acquirer.clone();
        let batcher = self.batcher.clone();
        let events = self.event_tx.clone();
        let background = self.background.clone();
        let mode = self.config.delivery.mode;
        let unit_ctx = ctx.clone();

        WorkUnit::new(destination, ctx, move || async move {
            let acquired = acquirer.download(&urls).await?;
            let downloaded = list_files(acquired.dir.path()).await?.len();
            events
                .send(Event::Acquired {
                    destination,
                    downloaded,
                    failed: acquired.failed.iter().cloned().collect(),
                })
                .ok();

            match mode {
                DeliveryMode::Sequential => {
                    batcher
                        .deliver(acquired.dir, max_artifact_bytes, destination, &unit_ctx)
                        .await?;
                }
                DeliveryMode::Concurrent => {
                    let guard = BackgroundGuard::new(&background);
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = batcher
                            .deliver(acquired.dir, max_artifact_bytes, destination, &unit_ctx)
                            .await
                        {
                            warn!(destination = %destination, error = %e, "background delivery failed");
                        }
                    });
                }
            }
            Ok(())
        })
    }

    /// Record a live stream and deliver the recording once it ends or is stopped
    ///
    /// The requester is notified after delivery.
    pub fn record_live(
        &self,
        url: &str,
        destination: DestinationId,
        max_artifact_bytes: u64,
        ctx: RequestContext,
    ) -> Result<LiveRecording> {
        self.ensure_accepting()?;

        let scratch = ScratchDir::new_in(self.config.work_dir(), "live")?;
        let output = scratch.path().join(format!("{}.ts", random_stem()));
        let capture = LiveCapture::new(
            url,
            output,
            self.transcoder.clone(),
            self.config.scheduler.capture_grace,
        );
        let stop = capture.stop_handle();

        let batcher = self.batcher.clone();
        let sink = self.sink.clone();
        let guard = BackgroundGuard::new(&self.background);
        let url = url.to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let path = capture.record().await?;
            debug!(?path, "recording finished, delivering");

            let report = batcher
                .deliver(scratch, max_artifact_bytes, destination, &ctx)
                .await?;
            let message = format!("{} upload completed", ctx.requester);
            if let Err(e) = sink.notify(destination, &ctx, &message).await {
                warn!(destination = %destination, url = %url, error = %e, "failed to send recording notice");
            }
            Ok(report)
        });

        Ok(LiveRecording { stop, task })
    }

    /// Wait until every destination has drained and background deliveries finished
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
        loop {
            let in_flight = self.background.load(Ordering::SeqCst);
            if in_flight == 0 {
                return;
            }
            debug!(in_flight, "waiting for background deliveries");
            tokio::time::sleep(BACKGROUND_POLL_INTERVAL).await;
        }
    }

    /// Gracefully shut down the pipeline
    ///
    /// New submissions are refused, queued work is given the configured timeout to
    /// drain, then [`Event::Shutdown`] is emitted. Work still running after the
    /// timeout is left to finish on its own.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");
        self.accepting.store(false, Ordering::SeqCst);

        let timeout = self.config.scheduler.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_idle()).await {
            Ok(()) => info!("All destinations drained"),
            Err(_) => {
                let active = self.scheduler.active_destinations().await;
                warn!(
                    ?timeout,
                    active,
                    "Timeout waiting for destinations to drain, proceeding with shutdown"
                )
            }
        }

        self.emit(Event::Shutdown);
        info!("Graceful shutdown complete");
        Ok(())
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
