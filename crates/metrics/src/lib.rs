pub mod prometheus;
pub mod tracing;

pub use self::prometheus::BuildMetrics;
pub use self::tracing::TracingService;
