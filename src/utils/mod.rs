/// Utility functions and helpers
use rand::Rng;
use std::time::Duration;

/// Generate a node id of the form `node_<8 hex digits>`
pub fn generate_node_id() -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("node_{:08x}", random)
}

/// HTTP health endpoint advertised by an instance at `host:port`
pub fn health_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/health", host, port)
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
