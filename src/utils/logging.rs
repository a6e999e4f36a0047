//! Logging utilities (thin wrappers over `tracing`).

/// Log levels for the indexer
#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

fn silenced() -> bool {
    std::env::var("FABRIC_INDEXER_SILENT").is_ok()
}

/// Logs a message
pub fn log(level: LogLevel, message: &str) {
    if silenced() {
        return;
    }

    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}

/// Logs indexer startup information
pub fn log_startup(channels: &[String], storage: &str, source: &str) {
    if silenced() {
        return;
    }

    // Never print credentials embedded in a connection string
    let sanitized_storage = match (storage.find("://"), storage.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}[REDACTED]{}", &storage[..scheme_end + 3], &storage[at..])
        }
        _ => storage.to_string(),
    };

    tracing::info!(
        channels = channels.join(", "),
        storage = sanitized_storage,
        source = source,
        "Fabric Indexer Startup"
    );
}

/// Logs a section header
pub fn log_section(title: &str) {
    tracing::info!("=== {} ===", title);
}

/// Logs block processing
pub fn log_block(channel: &str, block_number: u64, txs: usize) {
    tracing::debug!(
        channel = channel,
        block_number = block_number,
        txs = txs,
        "Indexed block"
    );
}

/// Logs an error with context
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context = context, error = error, "Indexer Error");
}
