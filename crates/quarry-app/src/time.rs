//! Fixed-timestep tick driver.
//!
//! The accumulator pattern: frame time is added to an accumulator, and the
//! registered callback runs once per whole tick interval accumulated. Game
//! logic sees a fixed dt regardless of frame rate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{error, info};

/// Samples kept for rolling frame/tick statistics.
const SAMPLE_WINDOW: usize = 100;

/// Frame delta clamp; longer stalls (debugger, suspend) do not snowball
/// into a tick avalanche.
const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Invoked once per fixed tick with the fixed dt in seconds.
pub type TickCallback = Box<dyn FnMut(f32) + Send>;

/// Fixed-rate tick loop driver.
pub struct TimeDriver {
    tick_rate: u32,
    tick_duration: Duration,
    last_frame: Instant,
    accumulator: Duration,
    delta_time: f32,
    total_time: f32,
    total_ticks: u64,
    total_frames: u64,
    frame_times: VecDeque<f32>,
    tick_times: VecDeque<f32>,
    callback: Option<TickCallback>,
}

impl TimeDriver {
    /// Create a driver targeting `tick_rate` ticks per second.
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        info!(tick_rate, "time driver initialized");
        Self {
            tick_rate,
            tick_duration: Duration::from_secs(1) / tick_rate,
            last_frame: Instant::now(),
            accumulator: Duration::ZERO,
            delta_time: 0.0,
            total_time: 0.0,
            total_ticks: 0,
            total_frames: 0,
            frame_times: VecDeque::with_capacity(SAMPLE_WINDOW),
            tick_times: VecDeque::with_capacity(SAMPLE_WINDOW),
            callback: None,
        }
    }

    /// Register the fixed-tick callback.
    pub fn set_tick_callback(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Measure the elapsed frame time and run any due ticks.
    pub fn update(&mut self) {
        let now = Instant::now();
        let frame_time = now - self.last_frame;
        self.last_frame = now;
        self.advance(frame_time);
    }

    /// Advance by an explicit frame delta.
    ///
    /// `update` calls this with measured time; tests drive it directly.
    pub fn advance(&mut self, frame_time: Duration) {
        let frame_time = frame_time.min(MAX_FRAME_DELTA);

        self.delta_time = frame_time.as_secs_f32();
        self.total_time += self.delta_time;
        self.total_frames += 1;
        self.accumulator += frame_time;

        let fixed_dt = self.tick_duration.as_secs_f32();
        while self.accumulator >= self.tick_duration {
            if let Some(callback) = self.callback.as_mut() {
                let tick_start = Instant::now();
                callback(fixed_dt);
                push_sample(&mut self.tick_times, tick_start.elapsed().as_secs_f32());
            }
            self.accumulator -= self.tick_duration;
            self.total_ticks += 1;
        }

        push_sample(&mut self.frame_times, self.delta_time);
    }

    /// Change the tick rate at runtime. Zero is rejected.
    pub fn set_tick_rate(&mut self, tick_rate: u32) {
        if tick_rate == 0 {
            error!("invalid tick rate 0, keeping {}", self.tick_rate);
            return;
        }
        self.tick_rate = tick_rate;
        self.tick_duration = Duration::from_secs(1) / tick_rate;
        info!(tick_rate, "tick rate changed");
    }

    /// The configured tick rate
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Last frame delta in seconds (clamped)
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Rolling average frame delta in seconds
    pub fn average_delta_time(&self) -> f32 {
        average(&self.frame_times)
    }

    /// Total clamped time advanced since creation or reset
    pub fn total_elapsed(&self) -> f32 {
        self.total_time
    }

    /// Ticks executed since creation or reset
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Frames observed since creation or reset
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Ticks per second implied by the most recent tick's execution time
    pub fn current_tps(&self) -> f64 {
        match self.tick_times.back() {
            Some(&seconds) if seconds > 0.0 => 1.0 / f64::from(seconds),
            _ => 0.0,
        }
    }

    /// Ticks per second implied by the rolling average tick execution time
    pub fn average_tps(&self) -> f64 {
        let avg = average(&self.tick_times);
        if avg > 0.0 {
            1.0 / f64::from(avg)
        } else {
            0.0
        }
    }

    /// One-line stats summary for overlays and logs
    pub fn debug_summary(&self) -> String {
        format!(
            "FT: {:.2}ms, Avg FT: {:.2}ms, TPS: {:.1}/{}, Frames: {}, Ticks: {}",
            self.delta_time * 1000.0,
            self.average_delta_time() * 1000.0,
            self.current_tps(),
            self.tick_rate,
            self.total_frames,
            self.total_ticks
        )
    }

    /// Reset every counter and statistic (for a new session).
    pub fn reset(&mut self) {
        self.last_frame = Instant::now();
        self.accumulator = Duration::ZERO;
        self.delta_time = 0.0;
        self.total_time = 0.0;
        self.total_ticks = 0;
        self.total_frames = 0;
        self.frame_times.clear();
        self.tick_times.clear();
    }
}

fn push_sample(samples: &mut VecDeque<f32>, value: f32) {
    if samples.len() == SAMPLE_WINDOW {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn average(samples: &VecDeque<f32>) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}
