use tracing::Level;

/// Install a formatting subscriber at `level`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .with_target(false)
        .try_init();
}
