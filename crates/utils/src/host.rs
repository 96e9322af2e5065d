use gethostname::gethostname;
use tracing::warn;

/// Returns the system hostname, `None` when it is empty or not valid UTF-8.
pub fn system_hostname() -> Option<String> {
    let name = gethostname();
    match name.into_string() {
        Ok(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
        Ok(_) => {
            warn!("System hostname is empty");
            None
        }
        Err(raw) => {
            warn!(hostname = ?raw, "System hostname is not valid UTF-8");
            None
        }
    }
}

/// Tags identifying the local host, attached to every alert.
pub fn host_tags() -> Vec<String> {
    system_hostname().into_iter().collect()
}
