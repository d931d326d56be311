// THEORY:
// The parallel driver exploits the one structural fact of the algorithm: no
// pixel ever looks at another. The raster's tracks are cut into contiguous
// tiles, each tile is moved into a worker task together with its slice of the
// epoch's data, and the advanced tile comes back through a oneshot reply.
// Results are reassembled in tile order, so the output is identical to the
// sequential `DetectionPipeline`.
//
// Epochs stay strictly sequential: the orchestrator waits for every tile of an
// epoch before fetching the next one, because each epoch starts from the
// tracks the previous one produced.

use crate::config::DetectorConfig;
use crate::core_modules::epoch::{
    Epoch, EpochInput, EpochPlan, EpochSummary, PixelTrack, PoolCoverage,
};
use crate::core_modules::monitor::MonitorParams;
use crate::core_modules::raster::RasterRegion;
use crate::core_modules::retrain::{self, RetrainParams, Retrained};
use crate::error::{DetectorError, Result};
use crate::pipeline::{self, DetectionReport};
use crate::provider::SeriesProvider;
use futures::future::try_join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const DEFAULT_TILE_PIXELS: usize = 4096;

type AdvanceReply = (Vec<PixelTrack>, EpochSummary);
type RetrainReply = (Vec<PixelTrack>, Vec<Option<Retrained>>);

/// Message type for tile workers.
enum TileTask {
    Advance {
        epoch: Epoch,
        tracks: Vec<PixelTrack>,
        inputs: Vec<EpochInput>,
        reply: oneshot::Sender<AdvanceReply>,
    },
    Retrain {
        tracks: Vec<PixelTrack>,
        reply: oneshot::Sender<RetrainReply>,
    },
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<TileTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers on the current tokio runtime.
    pub fn new(size: usize, monitor: MonitorParams, retrain: RetrainParams) -> Self {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<TileTask>();
        let mut workers = Vec::with_capacity(size + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<TileTask>()).unzip();

        // Round-robin dispatcher.
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % size;
            }
        }));

        // Tile work runs on the blocking pool; these tasks only hand it over.
        for mut worker_receiver in worker_receivers {
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let job = tokio::task::spawn_blocking(move || {
                        Self::process_tile(task, &monitor, &retrain)
                    });
                    if let Err(err) = job.await {
                        warn!(error = %err, "tile worker panicked");
                    }
                }
            }));
        }

        Self {
            task_sender,
            workers,
        }
    }

    fn process_tile(task: TileTask, monitor: &MonitorParams, retrain_params: &RetrainParams) {
        match task {
            TileTask::Advance { epoch, tracks, inputs, reply } => {
                let mut summary = EpochSummary::default();
                let tracks = tracks
                    .into_iter()
                    .zip(inputs)
                    .map(|(track, input)| {
                        let (track, pixel) = track.advance(&epoch, input, monitor);
                        summary += pixel;
                        track
                    })
                    .collect();
                let _ = reply.send((tracks, summary));
            }
            TileTask::Retrain { tracks, reply } => {
                let retrained = tracks
                    .iter()
                    .map(|t| {
                        retrain::retrain(&t.state, t.baseline.as_ref(), &t.pool, retrain_params)
                    })
                    .collect();
                let _ = reply.send((tracks, retrained));
            }
        }
    }

    pub async fn advance(
        &self,
        epoch: Epoch,
        tracks: Vec<PixelTrack>,
        inputs: Vec<EpochInput>,
    ) -> Result<AdvanceReply> {
        let (reply, result) = oneshot::channel();
        self.submit(TileTask::Advance {
            epoch,
            tracks,
            inputs,
            reply,
        })?;
        result.await.map_err(|_| DetectorError::WorkerPool("worker dropped an epoch tile"))
    }

    pub async fn retrain(&self, tracks: Vec<PixelTrack>) -> Result<RetrainReply> {
        let (reply, result) = oneshot::channel();
        self.submit(TileTask::Retrain { tracks, reply })?;
        result.await.map_err(|_| DetectorError::WorkerPool("worker dropped a retraining tile"))
    }

    fn submit(&self, task: TileTask) -> Result<()> {
        self.task_sender
            .send(task)
            .map_err(|_| DetectorError::WorkerPool("failed to send tile to worker pool"))
    }

    /// Closes the queue and waits for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Worker-pool driver for a detection run.
pub struct ParallelPipeline<P> {
    config: DetectorConfig,
    plan: EpochPlan,
    provider: P,
    worker_pool: WorkerPool,
    tile_pixels: usize,
}

impl<P: SeriesProvider> ParallelPipeline<P> {
    /// Must be called from within a tokio runtime.
    pub fn new(config: DetectorConfig, provider: P) -> Result<Self> {
        config.validate()?;
        let plan = config.epoch_plan();
        let worker_pool = WorkerPool::new(
            config.worker_count(),
            config.monitor_params(),
            pipeline::retrain_params(&config),
        );
        Ok(Self {
            config,
            plan,
            provider,
            worker_pool,
            tile_pixels: DEFAULT_TILE_PIXELS,
        })
    }

    /// Pixels handed to a worker at once.
    pub fn with_tile_size(mut self, tile_pixels: usize) -> Self {
        self.tile_pixels = tile_pixels.max(1);
        self
    }

    pub async fn run(&self, region: RasterRegion) -> Result<DetectionReport> {
        info!(
            width = region.width,
            height = region.height,
            epochs = self.plan.epochs().len(),
            workers = self.config.worker_count(),
            "starting parallel detection run"
        );
        let mut tiles = into_tiles(vec![PixelTrack::new(); region.pixel_count()], self.tile_pixels);
        let mut coverage = PoolCoverage::default();
        let mut epochs = Vec::with_capacity(self.plan.epochs().len());

        for epoch in self.plan.epochs() {
            let inputs =
                pipeline::fetch_epoch_inputs(&self.provider, &region, epoch, &mut coverage)?;
            let input_tiles = into_tiles(inputs, self.tile_pixels);
            debug!(epoch = epoch.year, tiles = tiles.len(), "dispatching epoch tiles");

            let results = try_join_all(
                tiles
                    .into_iter()
                    .zip(input_tiles)
                    .map(|(tracks, inputs)| self.worker_pool.advance(*epoch, tracks, inputs)),
            )
            .await?;

            let mut summary = EpochSummary::default();
            tiles = results
                .into_iter()
                .map(|(tracks, tile_summary)| {
                    summary += tile_summary;
                    tracks
                })
                .collect();
            pipeline::log_epoch(epoch, &summary);
            epochs.push((*epoch, summary));
        }

        let mut tracks: Vec<PixelTrack> = tiles.into_iter().flatten().collect();
        pipeline::extend_pools(&self.provider, &region, &self.config, &self.plan, &mut tracks)?;

        let results = try_join_all(
            into_tiles(tracks, self.tile_pixels)
                .into_iter()
                .map(|tile| self.worker_pool.retrain(tile)),
        )
        .await?;
        let mut tracks = Vec::with_capacity(region.pixel_count());
        let mut retrained = Vec::with_capacity(region.pixel_count());
        for (tile_tracks, tile_retrained) in results {
            tracks.extend(tile_tracks);
            retrained.extend(tile_retrained);
        }

        let raster = pipeline::compose(&self.provider, region, &self.config, &tracks, &retrained)?;
        info!(changed = raster.changed_count(), "parallel detection run complete");
        Ok(DetectionReport {
            raster,
            tracks,
            epochs,
        })
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}

fn into_tiles<T>(items: Vec<T>, tile: usize) -> Vec<Vec<T>> {
    let mut tiles = Vec::with_capacity(items.len().div_ceil(tile.max(1)));
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        tiles.push(items.by_ref().take(tile.max(1)).collect());
    }
    tiles
}
