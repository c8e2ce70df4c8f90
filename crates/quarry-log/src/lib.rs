//! Asynchronous structured log sink.
//!
//! Producers pay for an atomic level check and a channel send; a single
//! background thread does all formatting and I/O. The sink plugs into the
//! `tracing` ecosystem as a subscriber [`Layer`], so the rest of the
//! engine logs through the ordinary `tracing` macros.
//!
//! ```no_run
//! let (logger, layer) = quarry_log::AsyncLogger::builder()
//!     .level(tracing::Level::DEBUG)
//!     .build();
//! quarry_log::install(layer);
//!
//! tracing::info!("engine starting");
//! logger.flush();
//! ```

mod sink;

pub use sink::{AsyncLogLayer, AsyncLogger, AsyncLoggerBuilder};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a built layer as the global default subscriber.
///
/// Panics if a global subscriber is already set, like
/// `tracing_subscriber`'s own `init`.
pub fn install(layer: AsyncLogLayer) {
    tracing_subscriber::registry().with(layer).init();
}
