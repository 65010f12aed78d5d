use colored::*;
use hostname::get as get_hostname;
use sysinfo::System;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
}

pub fn host_info() -> HostInfo {
    let hostname = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    HostInfo {
        hostname,
        os_name: System::name().unwrap_or_else(|| "Unknown OS".to_string()),
        os_version: System::os_version().unwrap_or_else(|| "Unknown Version".to_string()),
    }
}

/// The startup status line identifying the host being monitored.
pub fn host_line(host: &HostInfo) -> String {
    format!(
        "{} {} {} ({})",
        "System:".blue().bold(),
        host.os_name.green(),
        host.os_version.green(),
        host.hostname.cyan(),
    )
}
