use std::fs;

/// Fields of interest from `/proc/<pid>/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub threads: Option<u64>,
    pub rss_bytes: Option<u64>,
}

impl ProcStatus {
    /// Read the status file of the current process.
    pub fn read_self() -> Option<Self> {
        fs::read_to_string("/proc/self/status")
            .ok()
            .map(|content| Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut status = ProcStatus::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let mut fields = value.split_whitespace();
            match key {
                "Threads" => status.threads = fields.next().and_then(|v| v.parse().ok()),
                "VmRSS" => {
                    let amount: Option<u64> = fields.next().and_then(|v| v.parse().ok());
                    let scale = match fields.next() {
                        Some("kB") => 1024,
                        Some("mB") => 1024 * 1024,
                        _ => 1,
                    };
                    status.rss_bytes = amount.map(|a| a * scale);
                }
                _ => {}
            }
        }
        status
    }
}

/// Number of entries in `/proc/self/fd`, minus the one opened to list it.
pub fn open_fd_count() -> Option<u64> {
    let entries = fs::read_dir("/proc/self/fd").ok()?;
    let count = entries.filter(|e| e.is_ok()).count() as u64;
    Some(count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Name:\tfaultbench\n\
        State:\tS (sleeping)\n\
        VmPeak:\t  20480 kB\n\
        VmRSS:\t   5120 kB\n\
        Threads:\t7\n\
        SigQ:\t0/63413\n";

    #[test]
    fn test_parse_status() {
        let status = ProcStatus::parse(SAMPLE);
        assert_eq!(status.threads, Some(7));
        assert_eq!(status.rss_bytes, Some(5120 * 1024));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        let status = ProcStatus::parse("Threads:\tmany\nnonsense\n");
        assert_eq!(status, ProcStatus::default());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_self() {
        let status = ProcStatus::read_self().unwrap();
        assert!(status.threads.unwrap() >= 1);
        assert!(open_fd_count().unwrap() >= 3);
    }
}
