//! The per-frame glue: time driver, chunk streaming, meshing dispatch,
//! and per-layer uploads.

use std::sync::Arc;

use glam::Vec3;
use tracing::info;

use quarry_core::types::RenderLayer;
use quarry_gpu::uploader::{AsyncUploader, BufferInfo, GpuPayload};
use quarry_gpu::GpuDevice;
use quarry_log::{AsyncLogger, AsyncLogLayer};
use quarry_mesh::atlas::TextureAtlas;
use quarry_mesh::model::ModelStore;
use quarry_mesh::vertex::Vertex;
use quarry_task::ThreadPool;
use quarry_world::block_table::BlockTable;
use quarry_world::manager::ChunkManager;
use quarry_world::terrain::TerrainSource;

use crate::config::EngineConfig;
use crate::profile::FrameProfiler;
use crate::time::TimeDriver;

/// One render layer's aggregated geometry, packed vertices-then-indices
/// into a single allocation.
pub struct LayerUpload {
    /// Aggregated vertex stream
    pub vertices: Vec<Vertex>,
    /// Aggregated, rebased index stream
    pub indices: Vec<u32>,
}

impl LayerUpload {
    /// Byte offset of the index data within the packed buffer
    pub fn index_byte_offset(&self) -> usize {
        self.vertices.len() * Vertex::STRIDE
    }
}

impl GpuPayload for LayerUpload {
    fn count(&self) -> usize {
        self.indices.len()
    }

    fn pack(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(self.vertices.len() * Vertex::STRIDE + self.indices.len() * 4);
        bytes.extend_from_slice(bytemuck::cast_slice(&self.vertices));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.indices));
        bytes
    }
}

/// Build and install the async log sink for a configuration.
///
/// Returns the handle; keep it alive for the process lifetime and call
/// `shutdown` (or drop it) on exit.
pub fn init_logging(config: &EngineConfig) -> AsyncLogger {
    let (logger, layer): (AsyncLogger, AsyncLogLayer) = AsyncLogger::builder()
        .level(config.log_level.into())
        .build();
    quarry_log::install(layer);
    logger
}

/// The engine core: owns every subsystem and drives them once per frame.
pub struct Engine {
    config: EngineConfig,
    pool: ThreadPool,
    time: TimeDriver,
    manager: Arc<ChunkManager>,
    uploaders: [AsyncUploader<LayerUpload>; RenderLayer::COUNT],
    profiler: FrameProfiler,
}

impl Engine {
    /// Assemble an engine over the given collaborators.
    pub fn new(
        config: EngineConfig,
        terrain: Arc<dyn TerrainSource>,
        table: Arc<BlockTable>,
        models: Arc<ModelStore>,
        atlas: Arc<TextureAtlas>,
        device: Arc<dyn GpuDevice>,
    ) -> Self {
        let pool = ThreadPool::new(config.thread_count as usize);
        pool.set_work_stealing(config.work_stealing_enabled);

        let manager = Arc::new(ChunkManager::new(
            config.chunk_manager(),
            config.mesher(),
            terrain,
            table,
            models,
            atlas,
        ));

        let uploaders =
            std::array::from_fn(|_| AsyncUploader::<LayerUpload>::new(device.clone()));

        info!(
            threads = pool.thread_count(),
            radius = config.chunk_load_radius,
            "engine assembled"
        );

        Self {
            time: TimeDriver::new(config.tick_rate_hz),
            config,
            pool,
            manager,
            uploaders,
            profiler: FrameProfiler::new(),
        }
    }

    /// Run one frame against the observer position.
    ///
    /// Drives fixed ticks, streams chunks around the observer, dispatches
    /// meshing, and queues uploads for any layer whose aggregate changed.
    pub fn frame(&mut self, observer: Vec3) {
        {
            let _section = self.profiler.scope("game_ticks");
            self.time.update();
        }

        {
            let _section = self.profiler.scope("chunk_streaming");
            self.manager.update(observer);
            Arc::clone(&self.manager).tick(&self.pool);
            Arc::clone(&self.manager).schedule_remesh(&self.pool);
        }

        let _section = self.profiler.scope("aggregate_upload");
        for layer in RenderLayer::ALL {
            if self.manager.layer_dirty(layer) {
                let (vertices, indices) = self.manager.aggregate_layer(layer);
                self.uploaders[layer.index()].queue(LayerUpload { vertices, indices });
            }
        }
    }

    /// The latest uploaded buffer record for a layer; the renderer draws
    /// from this.
    pub fn layer_buffer(&self, layer: RenderLayer) -> BufferInfo {
        self.uploaders[layer.index()].current_buffer_info()
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The time driver, e.g. to register the game-tick callback
    pub fn time_driver(&mut self) -> &mut TimeDriver {
        &mut self.time
    }

    /// The chunk manager
    pub fn chunk_manager(&self) -> &Arc<ChunkManager> {
        &self.manager
    }

    /// The worker pool
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Per-section frame timings
    pub fn profiler(&self) -> &FrameProfiler {
        &self.profiler
    }

    /// Block until queued uploads for every layer have resolved.
    pub fn wait_for_uploads(&self) {
        for uploader in &self.uploaders {
            uploader.wait_idle();
        }
    }
}
