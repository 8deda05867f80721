use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. With `json` set, events are
/// written as one JSON object per line instead of the compact format.
/// Does nothing if a global subscriber is already installed.
pub fn init_logger(default_filter: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let compact_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_level(true)
            .compact()
    });
    let json_layer = json.then(|| fmt::layer().json().with_current_span(false));

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(compact_layer)
        .with(json_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already installed");
    }
}
