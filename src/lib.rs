pub mod commands;
pub mod pipeline;

pub use pipeline::{
    BatchProgress, PipelineError, RecognitionOrchestrator, RegionSource, ScreenshotRegionSource,
};

/// Install the fmt subscriber, honouring `RUST_LOG` when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hexscan=debug,hex_vision=debug,hex_capture=info".into()),
        )
        .init();
}
