//! Utility functions and helpers

use anyhow::Result;

/// Parse a bare hexadecimal address: hex digits only, no prefix or sign
pub fn parse_hex(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Parse a duration string (e.g., "10ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();

    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_millis(millis))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(secs))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let mins: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(mins * 60))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str.parse()?;
        Ok(std::time::Duration::from_secs(hours * 3600))
    } else {
        // Default to seconds if no suffix
        let secs: u64 = s.parse()?;
        Ok(std::time::Duration::from_secs(secs))
    }
}
