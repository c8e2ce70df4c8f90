//! The chunk lifecycle manager.
//!
//! Owns the loaded chunk set, computes load/unload sets as the observer
//! moves, drives mesher invocations on the thread pool, and aggregates
//! per-layer geometry for upload. Also implements [`BlockProbe`] so the
//! mesher can resolve neighbors across chunk boundaries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::Vec3;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use quarry_core::constants::CHUNK_SIZE;
use quarry_core::coords::{ChunkPos, WorldPos};
use quarry_core::types::{BlockId, BlockProbe, RenderLayer};
use quarry_mesh::atlas::TextureAtlas;
use quarry_mesh::mesher::{mesh_chunk, MesherConfig};
use quarry_mesh::model::ModelStore;
use quarry_mesh::vertex::Vertex;
use quarry_task::{CancelToken, Task, TaskPriority, ThreadPool};

use crate::block_table::BlockTable;
use crate::chunk::Chunk;
use crate::terrain::TerrainSource;

/// Streaming configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChunkManagerConfig {
    /// Box half-extent of the loaded neighborhood, in chunks
    pub load_radius: u32,
    /// Chunks must be outside `load_radius + unload_hysteresis` to evict
    pub unload_hysteresis: u32,
    /// Maximum chunks created and queued for meshing per tick
    pub chunks_per_tick: u32,
}

impl Default for ChunkManagerConfig {
    fn default() -> Self {
        Self {
            load_radius: 8,
            unload_hysteresis: 2,
            chunks_per_tick: 2,
        }
    }
}

/// Pending-load bookkeeping: FIFO plus a dedup set.
#[derive(Default)]
struct LoadQueue {
    queue: VecDeque<ChunkPos>,
    queued: HashSet<ChunkPos>,
}

/// In-flight meshing work for one chunk.
struct MeshTaskHandle {
    cancel: CancelToken,
}

type SharedChunk = Arc<RwLock<Chunk>>;

/// Owns loaded chunks and drives population, meshing, and aggregation.
pub struct ChunkManager {
    chunks: RwLock<HashMap<ChunkPos, SharedChunk>>,
    load_queue: Mutex<LoadQueue>,
    mesh_tasks: Mutex<HashMap<ChunkPos, MeshTaskHandle>>,
    last_observer: Mutex<Option<ChunkPos>>,
    /// Aggregate-level dirty flags: installed geometry changed since the
    /// layer was last aggregated.
    layer_dirty: [AtomicBool; RenderLayer::COUNT],
    terrain: Arc<dyn TerrainSource>,
    table: Arc<BlockTable>,
    models: Arc<ModelStore>,
    atlas: Arc<TextureAtlas>,
    mesher_config: MesherConfig,
    config: ChunkManagerConfig,
}

impl ChunkManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        config: ChunkManagerConfig,
        mesher_config: MesherConfig,
        terrain: Arc<dyn TerrainSource>,
        table: Arc<BlockTable>,
        models: Arc<ModelStore>,
        atlas: Arc<TextureAtlas>,
    ) -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            load_queue: Mutex::new(LoadQueue::default()),
            mesh_tasks: Mutex::new(HashMap::new()),
            last_observer: Mutex::new(None),
            layer_dirty: Default::default(),
            terrain,
            table,
            models,
            atlas,
            mesher_config,
            config,
        }
    }

    /// The streaming configuration
    pub fn config(&self) -> &ChunkManagerConfig {
        &self.config
    }

    /// Recompute the load/evict sets against the observer position.
    ///
    /// Returns early when the observer is still in the chunk it was in on
    /// the previous call.
    pub fn update(&self, observer_world: Vec3) {
        let observer_chunk = WorldPos::from(observer_world).chunk_pos();
        {
            let mut last = self.last_observer.lock();
            if *last == Some(observer_chunk) {
                return;
            }
            *last = Some(observer_chunk);
        }

        let radius = self.config.load_radius as i32;

        // Queue everything inside the load box that is neither loaded nor
        // already queued
        {
            let chunks = self.chunks.read();
            let mut load = self.load_queue.lock();
            for dz in -radius..=radius {
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let pos = ChunkPos::new(
                            observer_chunk.x + dx,
                            observer_chunk.y + dy,
                            observer_chunk.z + dz,
                        );
                        if !chunks.contains_key(&pos) && load.queued.insert(pos) {
                            load.queue.push_back(pos);
                        }
                    }
                }
            }
        }

        // Evict outside the hysteresis band
        let evict_beyond = radius + self.config.unload_hysteresis as i32;
        let mut evicted = Vec::new();
        {
            let mut chunks = self.chunks.write();
            chunks.retain(|pos, _| {
                if pos.box_distance(observer_chunk) > evict_beyond {
                    evicted.push(*pos);
                    false
                } else {
                    true
                }
            });
        }

        if !evicted.is_empty() {
            // Signal any in-flight meshing for the evicted chunks; the
            // workers check the flag before installing results
            let mut tasks = self.mesh_tasks.lock();
            for pos in &evicted {
                if let Some(handle) = tasks.remove(pos) {
                    handle.cancel.cancel();
                }
            }
            drop(tasks);

            self.mark_layers_dirty();
            debug!(count = evicted.len(), "evicted chunks");
        }
    }

    /// Drain up to `chunks_per_tick` pending loads, creating each chunk and
    /// submitting a populate-and-mesh task at HIGH priority.
    ///
    /// Takes the managing `Arc` because submitted tasks keep the manager
    /// alive until they finish.
    pub fn tick(self: Arc<Self>, pool: &ThreadPool) {
        let observer = *self.last_observer.lock();

        for _ in 0..self.config.chunks_per_tick.max(1) {
            let pos = {
                let mut load = self.load_queue.lock();
                loop {
                    let Some(pos) = load.queue.pop_front() else {
                        break None;
                    };
                    load.queued.remove(&pos);

                    // Entries drift stale when the observer moves between
                    // queueing and draining
                    let stale = observer.is_some_and(|center| {
                        pos.box_distance(center) > self.config.load_radius as i32
                    });
                    if !stale {
                        break Some(pos);
                    }
                }
            };
            let Some(pos) = pos else {
                return;
            };

            if self.chunks.read().contains_key(&pos) {
                continue;
            }

            let chunk: SharedChunk = Arc::new(RwLock::new(Chunk::new(pos)));
            self.chunks.write().insert(pos, chunk.clone());

            let cancel = CancelToken::new();
            self.mesh_tasks.lock().insert(
                pos,
                MeshTaskHandle {
                    cancel: cancel.clone(),
                },
            );

            let manager = Arc::clone(&self);
            let task_cancel = cancel.clone();
            pool.submit(Task::with_cancel(
                move || {
                    // Terrain population happens-before meshing: both run
                    // inside this one task
                    manager.terrain.populate(pos, &mut chunk.write());
                    chunk.write().mark_populated();

                    manager.mesh_and_install(pos, &chunk, &task_cancel);
                    manager.mark_neighbors_dirty(pos);
                    manager.finish_task(pos, &task_cancel);
                },
                TaskPriority::High,
                format!("chunk-load ({}, {}, {})", pos.x, pos.y, pos.z),
                cancel,
            ));
        }
    }

    /// Submit re-mesh tasks for populated chunks whose meshes went dirty.
    ///
    /// Chunks with meshing already in flight are skipped; a stale install
    /// leaves the dirty flags set, so they are picked up again on the next
    /// call.
    pub fn schedule_remesh(self: Arc<Self>, pool: &ThreadPool) {
        let dirty: Vec<(ChunkPos, SharedChunk)> = {
            let chunks = self.chunks.read();
            chunks
                .iter()
                .filter(|(_, chunk)| {
                    let chunk = chunk.read();
                    chunk.is_populated() && chunk.is_any_dirty()
                })
                .map(|(pos, chunk)| (*pos, chunk.clone()))
                .collect()
        };

        for (pos, chunk) in dirty {
            {
                let tasks = self.mesh_tasks.lock();
                if tasks.contains_key(&pos) {
                    continue;
                }
            }

            let cancel = CancelToken::new();
            self.mesh_tasks.lock().insert(
                pos,
                MeshTaskHandle {
                    cancel: cancel.clone(),
                },
            );

            let manager = Arc::clone(&self);
            let task_cancel = cancel.clone();
            pool.submit(Task::with_cancel(
                move || {
                    manager.mesh_and_install(pos, &chunk, &task_cancel);
                    manager.finish_task(pos, &task_cancel);
                },
                TaskPriority::Normal,
                format!("chunk-remesh ({}, {}, {})", pos.x, pos.y, pos.z),
                cancel,
            ));
            trace!(?pos, "remesh scheduled");
        }
    }

    /// Synchronously load, populate, and mesh one chunk.
    ///
    /// Bypasses the queue and the pool; intended for tools and tests.
    pub fn force_load(&self, pos: ChunkPos) {
        if self.chunks.read().contains_key(&pos) {
            return;
        }

        let chunk: SharedChunk = Arc::new(RwLock::new(Chunk::new(pos)));
        self.chunks.write().insert(pos, chunk.clone());

        self.terrain.populate(pos, &mut chunk.write());
        chunk.write().mark_populated();

        self.mesh_and_install(pos, &chunk, &CancelToken::new());
        self.mark_neighbors_dirty(pos);
    }

    /// Synchronously re-mesh one loaded chunk.
    pub fn remesh_now(&self, pos: ChunkPos) {
        let Some(chunk) = self.chunks.read().get(&pos).cloned() else {
            return;
        };
        self.mesh_and_install(pos, &chunk, &CancelToken::new());
    }

    /// Look up a block anywhere in the world; unloaded chunks read as air.
    pub fn block_at(&self, pos: WorldPos) -> BlockId {
        let (chunk_pos, local) = pos.split();
        match self.chunks.read().get(&chunk_pos) {
            Some(chunk) => chunk.read().get_local(local),
            None => BlockId::AIR,
        }
    }

    /// Write a block through to its owning chunk.
    ///
    /// Marks the chunk dirty, cancels any in-flight meshing for it, and
    /// marks boundary neighbors dirty so their culled seam faces are
    /// recomputed. Writes into unloaded chunks are ignored.
    pub fn set_block_at(&self, pos: WorldPos, id: BlockId) -> bool {
        let (chunk_pos, local) = pos.split();
        let Some(chunk) = self.chunks.read().get(&chunk_pos).cloned() else {
            return false;
        };

        chunk.write().set_local(local, id);

        // Results of any meshing that started before this write are stale
        if let Some(handle) = self.mesh_tasks.lock().remove(&chunk_pos) {
            handle.cancel.cancel();
        }

        let edge = (CHUNK_SIZE - 1) as u8;
        let mut neighbors = Vec::new();
        if local.x == 0 {
            neighbors.push(ChunkPos::new(chunk_pos.x - 1, chunk_pos.y, chunk_pos.z));
        }
        if local.x == edge {
            neighbors.push(ChunkPos::new(chunk_pos.x + 1, chunk_pos.y, chunk_pos.z));
        }
        if local.y == 0 {
            neighbors.push(ChunkPos::new(chunk_pos.x, chunk_pos.y - 1, chunk_pos.z));
        }
        if local.y == edge {
            neighbors.push(ChunkPos::new(chunk_pos.x, chunk_pos.y + 1, chunk_pos.z));
        }
        if local.z == 0 {
            neighbors.push(ChunkPos::new(chunk_pos.x, chunk_pos.y, chunk_pos.z - 1));
        }
        if local.z == edge {
            neighbors.push(ChunkPos::new(chunk_pos.x, chunk_pos.y, chunk_pos.z + 1));
        }

        if !neighbors.is_empty() {
            let chunks = self.chunks.read();
            for neighbor_pos in neighbors {
                if let Some(neighbor) = chunks.get(&neighbor_pos) {
                    neighbor.write().mark_all_dirty();
                }
            }
        }

        self.mark_layers_dirty();
        true
    }

    /// Whether a layer's aggregated geometry is out of date.
    pub fn layer_dirty(&self, layer: RenderLayer) -> bool {
        self.layer_dirty[layer.index()].load(Ordering::Acquire)
    }

    /// Concatenate every loaded chunk's stream for one layer, rebasing
    /// indices, and clear the layer's aggregate dirty flag.
    pub fn aggregate_layer(&self, layer: RenderLayer) -> (Vec<Vertex>, Vec<u32>) {
        let chunks = self.chunks.read();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for chunk in chunks.values() {
            let chunk = chunk.read();
            let mesh = chunk.layer_mesh(layer);
            if mesh.is_empty() {
                continue;
            }

            let base = vertices.len() as u32;
            vertices.extend_from_slice(&mesh.vertices);
            indices.extend(mesh.indices.iter().map(|index| base + index));
        }

        self.layer_dirty[layer.index()].store(false, Ordering::Release);
        (vertices, indices)
    }

    /// Number of loaded chunks
    pub fn loaded_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Whether a chunk is loaded
    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.read().contains_key(&pos)
    }

    /// Number of chunks waiting in the load queue
    pub fn pending_load_count(&self) -> usize {
        self.load_queue.lock().queue.len()
    }

    /// Number of meshing tasks currently in flight
    pub fn in_flight_mesh_count(&self) -> usize {
        self.mesh_tasks.lock().len()
    }

    /// Run a read-only visitor against a loaded chunk.
    pub fn with_chunk<R>(&self, pos: ChunkPos, visit: impl FnOnce(&Chunk) -> R) -> Option<R> {
        let chunk = self.chunks.read().get(&pos).cloned()?;
        let chunk = chunk.read();
        Some(visit(&chunk))
    }

    /// Snapshot a chunk's blocks, mesh them, and install the result.
    ///
    /// Returns false if the work was abandoned due to cancellation; a
    /// cancelled task's output is discarded unconditionally.
    fn mesh_and_install(&self, pos: ChunkPos, chunk: &SharedChunk, cancel: &CancelToken) -> bool {
        let (snapshot, revision) = {
            let chunk = chunk.read();
            (chunk.snapshot_blocks(), chunk.revision())
        };

        let Some(meshes) = mesh_chunk(
            pos,
            &snapshot,
            self.table.as_ref(),
            &self.models,
            &self.atlas,
            self,
            &self.mesher_config,
            cancel,
        ) else {
            return false;
        };

        if cancel.is_cancelled() {
            return false;
        }

        chunk.write().install_meshes(meshes, revision);
        self.mark_layers_dirty();
        true
    }

    /// A chunk's arrival changes face visibility at its neighbors' seams.
    fn mark_neighbors_dirty(&self, pos: ChunkPos) {
        let chunks = self.chunks.read();
        for neighbor_pos in pos.neighbors() {
            if let Some(neighbor) = chunks.get(&neighbor_pos) {
                neighbor.write().mark_all_dirty();
            }
        }
    }

    fn finish_task(&self, pos: ChunkPos, cancel: &CancelToken) {
        let mut tasks = self.mesh_tasks.lock();
        // Only remove our own registration; a newer task may have replaced it
        if tasks
            .get(&pos)
            .is_some_and(|handle| handle.cancel.ptr_eq(cancel))
        {
            tasks.remove(&pos);
        }
    }

    fn mark_layers_dirty(&self) {
        for flag in &self.layer_dirty {
            flag.store(true, Ordering::Release);
        }
    }
}

impl BlockProbe for ChunkManager {
    fn block_at(&self, pos: WorldPos) -> BlockId {
        ChunkManager::block_at(self, pos)
    }
}
