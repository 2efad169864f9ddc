/// Resident set size of this process in bytes, or 0 when it cannot be read.
pub fn process_rss() -> usize {
    #[cfg(target_os = "linux")]
    {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return 0;
        };
        status
            .lines()
            .find_map(|line| {
                let kb = line.strip_prefix("VmRSS:")?.split_whitespace().next()?;
                kb.parse::<usize>().ok()
            })
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    }

    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

pub fn format_memory_size(bytes: usize) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes >= 1024 * 1024 {
        format!("{:.2} MiB", bytes as f64 / MIB)
    } else {
        format!("{} KiB", bytes / 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_memory_size() {
        assert_eq!(format_memory_size(2048), "2 KiB");
        assert_eq!(format_memory_size(3 * 1024 * 1024), "3.00 MiB");
    }
}
