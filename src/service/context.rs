//! Per-request context: who asked, what they already have, and how long the
//! work took.

use std::time::{Duration, Instant, SystemTime};

/// Clock ticks per second used by `/proc/self/stat`.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Request facts consulted by the service, plus a timing snapshot.
#[derive(Debug, Clone)]
pub struct RequestContext {
    started: Instant,
    cpu_at_start: Option<Duration>,

    /// Key used for rate limiting (normally the client IP).
    pub client: Option<String>,

    /// Parsed `If-Modified-Since` header.
    pub if_modified_since: Option<SystemTime>,

    pub referer: Option<String>,

    /// Request `Host` header.
    pub host: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cpu_at_start: process_cpu_time(),
            client: None,
            if_modified_since: None,
            referer: None,
            host: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_if_modified_since(mut self, at: SystemTime) -> Self {
        self.if_modified_since = Some(at);
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True when the `Referer` names a host other than the one serving the
    /// request. A leading `www.` is ignored on both sides.
    pub fn has_external_referer(&self) -> bool {
        let (Some(referer), Some(host)) = (&self.referer, &self.host) else {
            return false;
        };
        let Some(referer_host) = url::Url::parse(referer)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        let host = host
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host.as_str(), |(name, _)| name)
            .to_ascii_lowercase();

        strip_www(&referer_host) != strip_www(&host)
    }

    /// Resource usage since the context was created.
    pub fn usage(&self) -> ResourceUsage {
        let elapsed = self.elapsed();
        let cpu_percent = match (self.cpu_at_start, process_cpu_time()) {
            (Some(start), Some(end)) if !elapsed.is_zero() => {
                let cpu = end.saturating_sub(start);
                Some(cpu.as_secs_f64() / elapsed.as_secs_f64() * 100.0)
            }
            _ => None,
        };
        ResourceUsage {
            elapsed,
            peak_memory_bytes: peak_memory_bytes(),
            cpu_percent,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Timing and memory figures reported in debug headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub elapsed: Duration,
    /// Process high-water mark; `None` where the platform does not expose it.
    pub peak_memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
}

fn peak_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

fn process_cpu_time() -> Option<Duration> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // The command name may contain spaces; fields resume after its ')'.
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of the full line.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(Duration::from_secs_f64(
        (utime + stime) as f64 / CLOCK_TICKS_PER_SEC,
    ))
}
