//! Wiring between settings and the diagnostics engine.

use hudwatch_sdk::{
    DiagnosticsEngine, EngineBuilder, Output, RegistrationError, TrendAggregator, TrendProvider,
};
use tracing::{info, warn};

use crate::config::Settings;
use crate::source::ChannelFileProvider;

/// Section holding the current value per channel.
pub const CHANNELS_SECTION: &str = "channels";
pub const CHANNELS_ORDER: i64 = 10;

/// Rolling history over [`CHANNELS_SECTION`] (or the configured source).
pub const CHANNEL_TREND_SECTION: &str = "channel_trend";
pub const CHANNEL_TREND_ORDER: i64 = 20;

/// An engine builder configured from `settings`, with its file and
/// Prometheus outputs attached. Callers may add more outputs before
/// building.
pub fn engine_builder(settings: &Settings) -> EngineBuilder {
    let mut builder = DiagnosticsEngine::builder()
        .version(settings.version.clone())
        .interval(settings.interval)
        .paused(settings.paused)
        .frame_interval(settings.frame_interval)
        .slow_threshold_ms(settings.health.slow_threshold_ms);

    if let Some(path) = &settings.output_file {
        builder = builder.output(Output::file(path));
    }

    #[cfg(feature = "prometheus")]
    if let Some(prometheus) = &settings.prometheus {
        let config = hudwatch_sdk::prometheus::PrometheusConfig::builder()
            .listen_addr(prometheus.listen_addr.clone())
            .metrics_path(prometheus.metrics_path.clone())
            .build();
        builder = builder.output(Output::prometheus(config));
    }

    #[cfg(not(feature = "prometheus"))]
    if settings.prometheus.is_some() {
        warn!("prometheus settings ignored, built without the `prometheus` feature");
    }

    builder
}

/// Register the host's providers and open the registry.
///
/// The channel file provider is only registered when a channels file is
/// configured; the trend is always registered and reads whatever its
/// source section holds.
pub fn register_providers(
    engine: &DiagnosticsEngine,
    settings: &Settings,
) -> Result<usize, RegistrationError> {
    if let Some(path) = &settings.channels_file {
        let provider = ChannelFileProvider::new(path);
        info!(source = provider.description(), "registering channel provider");
        engine.register_section_provider(CHANNELS_SECTION, provider, Some(CHANNELS_ORDER))?;
    }

    let mut trend = TrendProvider::new(
        settings.trend.source.clone(),
        TrendAggregator::new(settings.trend.top_n, settings.trend.capacity),
    );
    if let Some(pointer) = &settings.trend.pointer {
        trend = trend.with_pointer(pointer.clone());
    }
    engine.register_section_provider(CHANNEL_TREND_SECTION, trend, Some(CHANNEL_TREND_ORDER))?;

    Ok(engine.open())
}
