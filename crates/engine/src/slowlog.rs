//! Ring buffer of the slowest commands.
//!
//! Commands whose execution exceeds the configured threshold are recorded
//! with a trimmed copy of their argument vector; the ring keeps the most
//! recent `slowlog-max-len` entries.

use ember_core::Bytes;
use std::collections::VecDeque;

/// Cap on recorded arguments per entry.
const MAX_ARGS: usize = 32;
/// Cap on recorded bytes per argument.
const MAX_ARG_LEN: usize = 128;

/// One recorded slow command.
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    /// Monotonic entry id.
    pub id: u64,
    /// Unix time in seconds when the command ran.
    pub unix_time_s: u64,
    /// Execution time in microseconds.
    pub duration_us: u64,
    /// Trimmed argument vector.
    pub argv: Vec<Bytes>,
}

/// The slow-command ring.
#[derive(Debug, Default)]
pub struct SlowLog {
    entries: VecDeque<SlowLogEntry>,
    next_id: u64,
}

impl SlowLog {
    /// An empty log.
    pub fn new() -> SlowLog {
        SlowLog::default()
    }

    /// Record one command, trimming oversized argument vectors.
    pub fn push(&mut self, argv: &[Bytes], duration_us: u64, unix_time_s: u64, max_len: usize) {
        if max_len == 0 {
            return;
        }
        let mut trimmed: Vec<Bytes> = Vec::with_capacity(argv.len().min(MAX_ARGS));
        for (i, arg) in argv.iter().enumerate() {
            if i == MAX_ARGS - 1 && argv.len() > MAX_ARGS {
                trimmed.push(
                    format!("... ({} more arguments)", argv.len() - (MAX_ARGS - 1)).into_bytes(),
                );
                break;
            }
            if arg.len() > MAX_ARG_LEN {
                let mut short = arg[..MAX_ARG_LEN].to_vec();
                short.extend_from_slice(format!("... ({} more bytes)", arg.len() - MAX_ARG_LEN).as_bytes());
                trimmed.push(short);
            } else {
                trimmed.push(arg.clone());
            }
        }
        self.entries.push_front(SlowLogEntry {
            id: self.next_id,
            unix_time_s,
            duration_us,
            argv: trimmed,
        });
        self.next_id += 1;
        while self.entries.len() > max_len {
            self.entries.pop_back();
        }
    }

    /// Most recent `count` entries, newest first.
    pub fn get(&self, count: usize) -> impl Iterator<Item = &SlowLogEntry> {
        self.entries.iter().take(count)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries; ids keep counting.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_push_and_order() {
        let mut log = SlowLog::new();
        log.push(&args(&["GET", "a"]), 100, 1, 10);
        log.push(&args(&["GET", "b"]), 200, 2, 10);
        let got: Vec<u64> = log.get(10).map(|e| e.id).collect();
        assert_eq!(got, vec![1, 0]);
    }

    #[test]
    fn test_ring_caps_length() {
        let mut log = SlowLog::new();
        for i in 0..20 {
            log.push(&args(&["SET", &format!("k{i}")]), 50, 0, 5);
        }
        assert_eq!(log.len(), 5);
        // Newest entries survive.
        assert_eq!(log.get(1).next().unwrap().id, 19);
    }

    #[test]
    fn test_argument_trimming() {
        let mut log = SlowLog::new();
        let mut argv = vec![b"MSET".to_vec()];
        for i in 0..60 {
            argv.push(format!("k{i}").into_bytes());
        }
        argv.push(vec![b'x'; 500]);
        log.push(&argv, 50, 0, 10);
        let entry = log.get(1).next().unwrap();
        assert_eq!(entry.argv.len(), MAX_ARGS);
        let marker = entry.argv.last().unwrap();
        assert!(marker.starts_with(b"... ("));
    }

    #[test]
    fn test_long_argument_truncated() {
        let mut log = SlowLog::new();
        log.push(&[b"SET".to_vec(), vec![b'y'; 300]], 50, 0, 10);
        let entry = log.get(1).next().unwrap();
        assert!(entry.argv[1].len() < 300);
        assert!(entry.argv[1].ends_with(b"(172 more bytes)"));
    }

    #[test]
    fn test_reset_keeps_id_counter() {
        let mut log = SlowLog::new();
        log.push(&args(&["GET", "a"]), 10, 0, 10);
        log.reset();
        assert!(log.is_empty());
        log.push(&args(&["GET", "b"]), 10, 0, 10);
        assert_eq!(log.get(1).next().unwrap().id, 1);
    }
}
