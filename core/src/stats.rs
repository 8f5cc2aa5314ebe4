//! Process-wide upload/download counters and the periodic reporter task,
//! plus an SI byte-count formatter shared by both the plain and benchmark
//! reporters.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::info;

pub static UPLOADED: AtomicI64 = AtomicI64::new(0);
pub static DOWNLOADED: AtomicI64 = AtomicI64::new(0);

pub fn add_uploaded(n: usize) {
    UPLOADED.fetch_add(n as i64, Ordering::Relaxed);
}

pub fn add_downloaded(n: usize) {
    DOWNLOADED.fetch_add(n as i64, Ordering::Relaxed);
}

/// SI byte formatting (`1.0 kB`, not `1.0 KiB`) matching the upstream
/// reporter's units.
pub fn byte_count_si(b: i64) -> String {
    const UNIT: i64 = 1000;
    if b.abs() < UNIT {
        return format!("{b} B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = b / UNIT;
    while n.abs() >= UNIT {
        n /= UNIT;
        div *= UNIT;
        exp += 1;
    }
    const SUFFIXES: &[u8] = b"kMGTPE";
    format!("{:.1} {}B", b as f64 / div as f64, SUFFIXES[exp] as char)
}

/// Log cumulative totals every 5 seconds. Runs forever; spawn once per
/// process in normal (non-benchmark) mode.
pub async fn report_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        info!(
            "stats: uploaded {}, downloaded {}",
            byte_count_si(UPLOADED.load(Ordering::Relaxed)),
            byte_count_si(DOWNLOADED.load(Ordering::Relaxed)),
        );
    }
}

/// Log cumulative totals and instantaneous throughput every second, used
/// by the benchmark subcommand.
pub async fn report_task_benchmark() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last_up = 0i64;
    let mut last_down = 0i64;
    loop {
        interval.tick().await;
        let up = UPLOADED.load(Ordering::Relaxed);
        let down = DOWNLOADED.load(Ordering::Relaxed);
        info!(
            "stats: uploaded {} | {}/s, downloaded {} | {}/s",
            byte_count_si(up),
            byte_count_si(up - last_up),
            byte_count_si(down),
            byte_count_si(down - last_down),
        );
        last_up = up;
        last_down = down;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_under_unit_as_bytes() {
        assert_eq!(byte_count_si(512), "512 B");
    }

    #[test]
    fn formats_kilobytes() {
        assert_eq!(byte_count_si(1_500), "1.5 kB");
    }

    #[test]
    fn formats_megabytes() {
        assert_eq!(byte_count_si(2_500_000), "2.5 MB");
    }
}
