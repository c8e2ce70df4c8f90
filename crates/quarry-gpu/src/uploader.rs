//! Background buffer uploads with atomic handle swap and deferred
//! retirement.
//!
//! A replaced buffer may still be the draw target of an in-flight frame,
//! so it is parked in a small retirement FIFO instead of being destroyed
//! immediately; by the time it falls off the end it has long since ceased
//! to be referenced.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::device::{BufferHandle, BufferUsage, GpuAllocation, GpuDevice, MemoryFlags};
use crate::instance::{FaceInstance, FaceInstanceData};

/// Maximum replaced buffers kept alive awaiting destruction.
const MAX_RETIRED: usize = 3;

/// Something the uploader can pack into a device buffer.
pub trait GpuPayload: Send + 'static {
    /// Number of logical records, reported in [`BufferInfo`]
    fn count(&self) -> usize;

    /// Pack into little-endian GPU bytes
    fn pack(&self) -> Vec<u8>;
}

/// Face instances pack to the [`FaceInstanceData`] wire contract.
impl GpuPayload for Vec<FaceInstance> {
    fn count(&self) -> usize {
        self.len()
    }

    fn pack(&self) -> Vec<u8> {
        let records: Vec<FaceInstanceData> = self.iter().map(FaceInstanceData::from).collect();
        bytemuck::cast_slice(&records).to_vec()
    }
}

/// The currently visible buffer record.
#[derive(Clone, Debug, Default)]
pub struct BufferInfo {
    /// Device buffer handle; null for an empty upload
    pub buffer: BufferHandle,
    /// Backing memory, when a buffer exists
    pub memory: Option<GpuAllocation>,
    /// Number of records in the buffer
    pub instance_count: usize,
    /// False until the first upload resolves
    pub is_valid: bool,
}

struct Request<P> {
    payload: P,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

struct Shared<P> {
    device: Arc<dyn GpuDevice>,
    queue: Mutex<VecDeque<Request<P>>>,
    queue_cv: Condvar,
    current: Mutex<BufferInfo>,
    retiring: Mutex<VecDeque<(BufferHandle, GpuAllocation)>>,
    shutdown: AtomicBool,
    upload_in_progress: AtomicBool,
}

impl<P: GpuPayload> Shared<P> {
    fn worker_loop(&self) {
        debug!("uploader worker started");

        loop {
            let request = {
                let mut queue = self.queue.lock();
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        debug!("uploader worker exiting");
                        return;
                    }
                    if let Some(request) = queue.pop_front() {
                        break request;
                    }
                    self.queue_cv.wait(&mut queue);
                }
            };

            self.upload_in_progress.store(true, Ordering::Release);
            self.process(request.payload);
            if let Some(callback) = request.on_complete {
                callback();
            }
            self.upload_in_progress.store(false, Ordering::Release);
        }
    }

    fn process(&self, payload: P) {
        let count = payload.count();

        if count == 0 {
            // An empty request is valid: current becomes "empty and valid",
            // and the previous buffer still retires
            let old = {
                let mut current = self.current.lock();
                std::mem::replace(
                    &mut *current,
                    BufferInfo {
                        buffer: BufferHandle::NULL,
                        memory: None,
                        instance_count: 0,
                        is_valid: true,
                    },
                )
            };
            self.retire(old);
            return;
        }

        let bytes = payload.pack();
        let (buffer, allocation) = match self.device.create_buffer(
            bytes.len() as u64,
            BufferUsage::STORAGE,
            MemoryFlags::HOST_VISIBLE | MemoryFlags::HOST_COHERENT,
        ) {
            Ok(created) => created,
            Err(err) => {
                // Keep the previous buffer visible; the frame stays
                // renderable with last frame's geometry
                error!(%err, count, "buffer allocation failed, keeping previous upload");
                return;
            }
        };

        match self.device.map(&allocation) {
            Ok(ptr) => {
                // Safety: the device guarantees `ptr` addresses at least
                // `allocation.size` bytes until unmap
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
                }
                self.device.unmap(&allocation);
            }
            Err(err) => {
                error!(%err, "mapping upload buffer failed, keeping previous upload");
                self.device.destroy_buffer(buffer, allocation);
                return;
            }
        }

        // Swap atomically at record granularity: readers see the old record
        // or the new one, never a mix
        let old = {
            let mut current = self.current.lock();
            std::mem::replace(
                &mut *current,
                BufferInfo {
                    buffer,
                    memory: Some(allocation),
                    instance_count: count,
                    is_valid: true,
                },
            )
        };
        self.retire(old);

        debug!(count, "upload complete");
    }

    fn retire(&self, old: BufferInfo) {
        let Some(memory) = old.memory else {
            return;
        };
        if old.buffer.is_null() {
            return;
        }

        let mut retiring = self.retiring.lock();
        retiring.push_back((old.buffer, memory));

        // By queue ordering the oldest retiree has long since stopped being
        // the draw target; destroy it here on the background thread
        while retiring.len() > MAX_RETIRED {
            if let Some((buffer, allocation)) = retiring.pop_front() {
                self.device.destroy_buffer(buffer, allocation);
            }
        }
    }
}

/// Background upload pipeline for one stream of GPU data.
///
/// Requests are processed in submission order by a single worker thread;
/// if two uploads are queued, the second's buffer is the one left visible.
pub struct AsyncUploader<P: GpuPayload> {
    shared: Arc<Shared<P>>,
    worker: Option<JoinHandle<()>>,
}

impl<P: GpuPayload> AsyncUploader<P> {
    /// Start the uploader's worker thread.
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        let shared = Arc::new(Shared {
            device,
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            current: Mutex::new(BufferInfo::default()),
            retiring: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
            upload_in_progress: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("quarry-uploader".to_string())
            .spawn(move || worker_shared.worker_loop())
            .expect("failed to spawn uploader thread");

        info!("async uploader started");
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Queue an upload (non-blocking).
    pub fn queue(&self, payload: P) {
        self.queue_with_callback(payload, None);
    }

    /// Queue an upload with a completion callback invoked on the worker
    /// thread after the handle swap.
    pub fn queue_with_callback(&self, payload: P, on_complete: Option<Box<dyn FnOnce() + Send>>) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            warn!("upload queued after shutdown, dropping");
            return;
        }

        self.shared.queue.lock().push_back(Request {
            payload,
            on_complete,
        });
        self.shared.queue_cv.notify_one();
    }

    /// Clone the currently visible buffer record.
    pub fn current_buffer_info(&self) -> BufferInfo {
        self.shared.current.lock().clone()
    }

    /// Whether the worker is mid-upload.
    pub fn upload_in_progress(&self) -> bool {
        self.shared.upload_in_progress.load(Ordering::Acquire)
    }

    /// Number of requests not yet started.
    pub fn pending_uploads(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of replaced buffers awaiting destruction.
    pub fn retiring_count(&self) -> usize {
        self.shared.retiring.lock().len()
    }

    /// Block until the queue is drained and no upload is in progress.
    pub fn wait_idle(&self) {
        loop {
            let queue_empty = self.shared.queue.lock().is_empty();
            if queue_empty && !self.upload_in_progress() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<P: GpuPayload> Drop for AsyncUploader<P> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue_cv.notify_all();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        // Destroy the visible buffer and every retiree
        let current = std::mem::take(&mut *self.shared.current.lock());
        if let (false, Some(memory)) = (current.buffer.is_null(), current.memory) {
            self.shared.device.destroy_buffer(current.buffer, memory);
        }
        for (buffer, allocation) in self.shared.retiring.lock().drain(..) {
            self.shared.device.destroy_buffer(buffer, allocation);
        }

        info!("async uploader shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use glam::{Quat, Vec3, Vec4};

    fn face(texture_layer: u32) -> FaceInstance {
        FaceInstance {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::new(1.0, 1.0, 1.0),
            face_direction: 0,
            uv: Vec4::new(0.0, 0.0, 1.0, 1.0),
            texture_layer,
        }
    }

    fn uploader_over(device: &Arc<HeadlessDevice>) -> AsyncUploader<Vec<FaceInstance>> {
        AsyncUploader::new(device.clone() as Arc<dyn GpuDevice>)
    }

    #[test]
    fn initial_state_is_invalid() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        let info = uploader.current_buffer_info();
        assert!(!info.is_valid);
        assert!(info.buffer.is_null());
    }

    #[test]
    fn upload_then_empty_swap() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        uploader.queue(vec![face(1); 100]);
        uploader.wait_idle();

        let info = uploader.current_buffer_info();
        assert!(info.is_valid);
        assert_eq!(info.instance_count, 100);
        assert!(!info.buffer.is_null());
        assert!(device.is_live(info.buffer));

        // The buffer holds exactly 100 packed records
        let bytes = device.read_buffer(info.buffer).unwrap();
        assert_eq!(bytes.len(), 100 * std::mem::size_of::<FaceInstanceData>());

        // Empty upload: still valid, previous buffer retired
        uploader.queue(Vec::new());
        uploader.wait_idle();

        let empty = uploader.current_buffer_info();
        assert!(empty.is_valid);
        assert_eq!(empty.instance_count, 0);
        assert!(empty.buffer.is_null());
        assert_eq!(uploader.retiring_count(), 1);
    }

    #[test]
    fn retirement_is_bounded() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        for round in 0..10 {
            uploader.queue(vec![face(round); 4]);
            uploader.wait_idle();
        }

        assert!(uploader.retiring_count() <= MAX_RETIRED);
        // One current plus at most three retirees
        assert!(device.live_buffer_count() <= 1 + MAX_RETIRED);

        let info = uploader.current_buffer_info();
        assert!(device.is_live(info.buffer));
    }

    #[test]
    fn order_is_preserved() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        uploader.queue(vec![face(1); 1]);
        uploader.queue(vec![face(2); 2]);
        uploader.queue(vec![face(3); 3]);
        uploader.wait_idle();

        // The last queued upload is the visible one
        assert_eq!(uploader.current_buffer_info().instance_count, 3);
    }

    #[test]
    fn completion_callback_fires_after_swap() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        let (sender, receiver) = crossbeam_channel::bounded(1);
        uploader.queue_with_callback(
            vec![face(1); 5],
            Some(Box::new(move || {
                let _ = sender.send(());
            })),
        );

        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("callback never fired");
        assert_eq!(uploader.current_buffer_info().instance_count, 5);
    }

    #[test]
    fn allocation_failure_keeps_previous_buffer() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = uploader_over(&device);

        uploader.queue(vec![face(1); 10]);
        uploader.wait_idle();
        let before = uploader.current_buffer_info();

        device.fail_next_create();
        uploader.queue(vec![face(2); 50]);
        uploader.wait_idle();

        let after = uploader.current_buffer_info();
        assert!(after.is_valid);
        assert_eq!(after.buffer, before.buffer);
        assert_eq!(after.instance_count, 10);
        assert!(device.is_live(after.buffer));
    }

    #[test]
    fn drop_destroys_all_buffers() {
        let device = Arc::new(HeadlessDevice::new());
        {
            let uploader = uploader_over(&device);
            for round in 0..5 {
                uploader.queue(vec![face(round); 2]);
            }
            uploader.wait_idle();
            assert!(device.live_buffer_count() > 0);
        }

        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn concurrent_reader_always_sees_live_record() {
        let device = Arc::new(HeadlessDevice::new());
        let uploader = Arc::new(uploader_over(&device));

        let reader_uploader = uploader.clone();
        let reader_device = device.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = stop.clone();

        let reader = std::thread::spawn(move || {
            while !reader_stop.load(Ordering::Acquire) {
                let info = reader_uploader.current_buffer_info();
                if info.is_valid && !info.buffer.is_null() {
                    // Freshly read records reference live buffers; with a
                    // retirement depth of 3 a just-current buffer cannot
                    // have been destroyed yet
                    assert!(reader_device.is_live(info.buffer));
                }
            }
        });

        for round in 0..20 {
            uploader.queue(vec![face(round); 3]);
            uploader.wait_idle();
        }

        stop.store(true, Ordering::Release);
        reader.join().unwrap();
    }
}
