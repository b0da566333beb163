use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Build and install the global tracing subscriber. Every reconcile and
/// admission request logs through this, so field names like `composite`,
/// `claim`, `controller` should stay consistent across modules.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(env_filter).with(fmt_layer).init();
}
