use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use super::types::InterfaceSample;

/// Fixed-capacity sample history for one interface.
///
/// Backed by a heap ring buffer allocated once; pushing at capacity evicts the
/// oldest sample in O(1).
pub struct InterfaceHistory {
    samples: HeapRb<InterfaceSample>,
}

impl InterfaceHistory {
    /// Capacity is clamped to at least one sample
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append a sample, returning the evicted one if the buffer was full
    pub fn push(&mut self, sample: InterfaceSample) -> Option<InterfaceSample> {
        self.samples.push_overwrite(sample)
    }

    pub fn len(&self) -> usize {
        self.samples.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity().get()
    }

    /// Most recent sample, in O(1)
    pub fn latest(&self) -> Option<&InterfaceSample> {
        self.samples.last()
    }

    /// Copy of the `n` most recent samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<InterfaceSample> {
        let skip = self.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::time::Instant;

    fn sample(bytes_sent: u64) -> InterfaceSample {
        InterfaceSample {
            interface_name: "eth0".into(),
            at: Instant::now(),
            timestamp: Utc::now(),
            bytes_sent,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
            send_rate: 0.0,
            recv_rate: 0.0,
            send_packets_rate: 0.0,
            recv_packets_rate: 0.0,
        }
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut history = InterfaceHistory::with_capacity(3);
        assert!(history.is_empty());

        for i in 0..3 {
            assert!(history.push(sample(i)).is_none());
        }
        let evicted = history.push(sample(3)).unwrap();
        assert_eq!(evicted.bytes_sent, 0);

        assert_eq!(history.len(), 3);
        assert_eq!(history.capacity(), 3);
        let kept: Vec<u64> = history.recent(10).iter().map(|s| s.bytes_sent).collect();
        assert_eq!(kept, vec![1, 2, 3]);
        assert_eq!(history.latest().unwrap().bytes_sent, 3);
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut history = InterfaceHistory::with_capacity(60);
        for i in 0..45 {
            history.push(sample(i));
        }
        let tail = history.recent(30);
        assert_eq!(tail.len(), 30);
        assert_eq!(tail.first().unwrap().bytes_sent, 15);
        assert_eq!(tail.last().unwrap().bytes_sent, 44);
    }

    #[test]
    fn test_latest_follows_pushes_across_wraparound() {
        let mut history = InterfaceHistory::with_capacity(4);
        assert!(history.latest().is_none());

        for i in 0..11 {
            history.push(sample(i));
            assert_eq!(history.latest().unwrap().bytes_sent, i);
        }
        let kept: Vec<u64> = history.recent(4).iter().map(|s| s.bytes_sent).collect();
        assert_eq!(kept, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = InterfaceHistory::with_capacity(0);
        history.push(sample(1));
        history.push(sample(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().bytes_sent, 2);
    }
}
