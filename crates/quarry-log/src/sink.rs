//! The background formatter thread and its tracing layer front end.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// One captured log record.
struct LogEntry {
    level: Level,
    message: String,
    file: Option<&'static str>,
    line: Option<u32>,
    timestamp: SystemTime,
}

enum SinkMessage {
    Entry(LogEntry),
    Flush(Sender<()>),
    Shutdown,
}

fn level_rank(level: Level) -> usize {
    match level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[36m",
        Level::TRACE => "\x1b[90m",
    }
}

const ANSI_RESET: &str = "\x1b[0m";

/// Formatting and sink options.
#[derive(Clone, Debug)]
struct SinkOptions {
    console: bool,
    file_path: Option<PathBuf>,
    timestamps: bool,
    source_info: bool,
}

/// Builder for the async logger.
pub struct AsyncLoggerBuilder {
    level: Level,
    options: SinkOptions,
}

impl AsyncLoggerBuilder {
    /// Minimum level to record (default INFO)
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Enable or disable the console sink (default on)
    #[must_use]
    pub fn console(mut self, enabled: bool) -> Self {
        self.options.console = enabled;
        self
    }

    /// Also write to a log file
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.file_path = Some(path.into());
        self
    }

    /// Include wall-clock timestamps (default on)
    #[must_use]
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.options.timestamps = enabled;
        self
    }

    /// Include `(file:line)` source locations (default on)
    #[must_use]
    pub fn source_info(mut self, enabled: bool) -> Self {
        self.options.source_info = enabled;
        self
    }

    /// Spawn the sink thread; returns the control handle and the layer to
    /// register with a subscriber.
    pub fn build(self) -> (AsyncLogger, AsyncLogLayer) {
        let (sender, receiver) = unbounded();
        let level = Arc::new(AtomicUsize::new(level_rank(self.level)));

        let options = self.options;
        let worker = std::thread::Builder::new()
            .name("quarry-log".to_string())
            .spawn(move || sink_loop(&receiver, &options))
            .expect("failed to spawn log sink thread");

        let logger = AsyncLogger {
            sender: sender.clone(),
            level: level.clone(),
            worker: Mutex::new(Some(worker)),
        };
        let layer = AsyncLogLayer { sender, level };
        (logger, layer)
    }
}

/// Control handle for the background sink.
pub struct AsyncLogger {
    sender: Sender<SinkMessage>,
    level: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLogger {
    /// Start building a logger
    pub fn builder() -> AsyncLoggerBuilder {
        AsyncLoggerBuilder {
            level: Level::INFO,
            options: SinkOptions {
                console: true,
                file_path: None,
                timestamps: true,
                source_info: true,
            },
        }
    }

    /// Change the minimum recorded level at runtime
    pub fn set_level(&self, level: Level) {
        self.level.store(level_rank(level), Ordering::Release);
    }

    /// Block until every queued entry has been written
    pub fn flush(&self) {
        let (ack_sender, ack_receiver) = crossbeam_channel::bounded(1);
        if self.sender.send(SinkMessage::Flush(ack_sender)).is_ok() {
            let _ = ack_receiver.recv();
        }
    }

    /// Drain the queue and stop the sink thread
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(SinkMessage::Shutdown);
        let _ = worker.join();
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The `tracing` layer that feeds the sink.
#[derive(Clone)]
pub struct AsyncLogLayer {
    sender: Sender<SinkMessage>,
    level: Arc<AtomicUsize>,
}

/// Extracts the `message` field from an event.
struct MessageVisitor<'a> {
    message: &'a mut String,
}

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={value}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for AsyncLogLayer {
    fn enabled(&self, metadata: &tracing::Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        // Per-level filtering is an atomic read on the producer's hot path;
        // filtered-out events never allocate
        level_rank(*metadata.level()) <= self.level.load(Ordering::Acquire)
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor {
            message: &mut message,
        });

        let metadata = event.metadata();
        let _ = self.sender.send(SinkMessage::Entry(LogEntry {
            level: *metadata.level(),
            message,
            file: metadata.file(),
            line: metadata.line(),
            timestamp: SystemTime::now(),
        }));
    }
}

fn format_entry(entry: &LogEntry, options: &SinkOptions) -> String {
    let mut line = String::new();

    if options.timestamps {
        let local: DateTime<Local> = entry.timestamp.into();
        let _ = write!(line, "{} ", local.format("%H:%M:%S%.3f"));
    }

    let _ = write!(line, "[{}]", entry.level);

    if options.source_info {
        if let (Some(file), Some(line_number)) = (entry.file, entry.line) {
            let _ = write!(line, " ({file}:{line_number})");
        }
    }

    let _ = write!(line, " {}", entry.message);
    line
}

fn sink_loop(receiver: &Receiver<SinkMessage>, options: &SinkOptions) {
    let mut file = options.file_path.as_ref().and_then(|path| {
        match File::options().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("quarry-log: cannot open {}: {err}, console only", path.display());
                None
            }
        }
    });

    loop {
        let Ok(message) = receiver.recv() else {
            // Every sender is gone; nothing more will arrive
            return;
        };

        match message {
            SinkMessage::Entry(entry) => {
                write_entry(&entry, options, &mut file);
            }
            SinkMessage::Flush(ack) => {
                // Drain whatever is already queued before acknowledging
                while let Ok(SinkMessage::Entry(entry)) = receiver.try_recv() {
                    write_entry(&entry, options, &mut file);
                }
                if let Some(file) = file.as_mut() {
                    let _ = file.flush();
                }
                let _ = ack.send(());
            }
            SinkMessage::Shutdown => {
                while let Ok(SinkMessage::Entry(entry)) = receiver.try_recv() {
                    write_entry(&entry, options, &mut file);
                }
                if let Some(file) = file.as_mut() {
                    let _ = file.flush();
                }
                return;
            }
        }
    }
}

fn write_entry(entry: &LogEntry, options: &SinkOptions, file: &mut Option<File>) {
    let line = format_entry(entry, options);

    if options.console {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(
            out,
            "{}{line}{ANSI_RESET}",
            level_color(entry.level)
        );
    }

    if let Some(sink) = file.as_mut() {
        if writeln!(sink, "{line}").is_err() {
            // Degrade to console-only; reported once
            eprintln!("quarry-log: file sink write failed, continuing console only");
            *file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: Level, message: &str) -> LogEntry {
        LogEntry {
            level,
            message: message.to_string(),
            file: Some("chunk.rs"),
            line: Some(42),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    fn all_options() -> SinkOptions {
        SinkOptions {
            console: false,
            file_path: None,
            timestamps: true,
            source_info: true,
        }
    }

    #[test]
    fn format_includes_level_and_source() {
        let formatted = format_entry(&entry(Level::INFO, "chunk loaded"), &all_options());
        assert!(formatted.contains("[INFO]"));
        assert!(formatted.contains("(chunk.rs:42)"));
        assert!(formatted.ends_with("chunk loaded"));
    }

    #[test]
    fn format_without_source_info() {
        let mut options = all_options();
        options.source_info = false;
        options.timestamps = false;

        let formatted = format_entry(&entry(Level::WARN, "low memory"), &options);
        assert_eq!(formatted, "[WARN] low memory");
    }

    #[test]
    fn level_ranks_order_by_verbosity() {
        assert!(level_rank(Level::ERROR) < level_rank(Level::WARN));
        assert!(level_rank(Level::INFO) < level_rank(Level::TRACE));
    }

    #[test]
    fn events_reach_the_file_sink() {
        let path = std::env::temp_dir().join(format!(
            "quarry-log-test-{}-{}.log",
            std::process::id(),
            std::thread::current().name().unwrap_or("t").len()
        ));
        let _ = std::fs::remove_file(&path);

        let (logger, layer) = AsyncLogger::builder()
            .level(Level::DEBUG)
            .console(false)
            .file(&path)
            .build();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from the test");
            tracing::trace!("filtered out");
        });

        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the test"));
        assert!(!contents.contains("filtered out"));

        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn runtime_level_change_applies() {
        let path = std::env::temp_dir().join(format!(
            "quarry-log-level-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let (logger, layer) = AsyncLogger::builder()
            .level(Level::ERROR)
            .console(false)
            .file(&path)
            .build();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("suppressed");
            logger.set_level(Level::INFO);
            tracing::info!("recorded");
        });

        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("suppressed"));
        assert!(contents.contains("recorded"));

        logger.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
