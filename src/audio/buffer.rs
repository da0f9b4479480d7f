//! Shared visualization sample store

/// Fixed-length buffer holding the most recent mono samples seen.
///
/// The active engine writes it from the real-time callback; the UI polling
/// loop reads snapshots. Both sides share one `parking_lot::Mutex` around the
/// whole structure, so a snapshot can never observe a half-applied write.
/// Neither operation allocates or performs I/O while the lock is held apart
/// from the snapshot copy itself.
pub struct VisualizationBuffer {
    samples: Vec<f32>,
}

impl VisualizationBuffer {
    /// Create a buffer of `len` samples, zero-filled.
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append `mono`, evicting the oldest samples to keep the length fixed.
    ///
    /// Inputs at least as long as the buffer replace it with their tail;
    /// shorter inputs shift the existing contents left. O(len) per call.
    pub fn write(&mut self, mono: &[f32]) {
        let len = self.samples.len();
        if len == 0 || mono.is_empty() {
            return;
        }
        if mono.len() >= len {
            self.samples.copy_from_slice(&mono[mono.len() - len..]);
        } else {
            self.samples.copy_within(mono.len().., 0);
            self.samples[len - mono.len()..].copy_from_slice(mono);
        }
    }

    /// Copy of the current contents, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn starts_zero_filled_at_fixed_length() {
        let buffer = VisualizationBuffer::new(8);
        assert_eq!(buffer.snapshot(), vec![0.0; 8]);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn small_writes_shift_left_and_append() {
        let mut buffer = VisualizationBuffer::new(4);
        buffer.write(&[1.0, 2.0]);
        assert_eq!(buffer.snapshot(), vec![0.0, 0.0, 1.0, 2.0]);

        buffer.write(&[3.0, 4.0, 5.0]);
        assert_eq!(buffer.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn oversized_write_keeps_only_the_tail() {
        let mut buffer = VisualizationBuffer::new(4);
        buffer.write(&[1.0, 2.0, 3.0]);
        buffer.write(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        assert_eq!(buffer.snapshot(), vec![12.0, 13.0, 14.0, 15.0]);
    }

    #[test]
    fn exact_size_write_replaces_everything() {
        let mut buffer = VisualizationBuffer::new(3);
        buffer.write(&[1.0, 2.0, 3.0]);
        assert_eq!(buffer.snapshot(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn mixed_write_sizes_preserve_the_last_n_in_order() {
        let mut buffer = VisualizationBuffer::new(6);
        let mut next = 0.0f32;
        let mut feed = |buffer: &mut VisualizationBuffer, count: usize| {
            let block: Vec<f32> = (0..count)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            buffer.write(&block);
        };

        feed(&mut buffer, 4);
        feed(&mut buffer, 9);
        feed(&mut buffer, 1);
        feed(&mut buffer, 3);

        // 17 samples written in total; the buffer must hold 12..=17.
        assert_eq!(
            buffer.snapshot(),
            vec![12.0, 13.0, 14.0, 15.0, 16.0, 17.0]
        );
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let mut buffer = VisualizationBuffer::new(3);
        buffer.write(&[1.0, 2.0, 3.0]);
        buffer.write(&[]);
        assert_eq!(buffer.snapshot(), vec![1.0, 2.0, 3.0]);
    }

    /// Concurrent writer/reader stress: every snapshot must be a contiguous
    /// run of the monotone input stream, never a mix of old and new samples.
    #[test]
    fn concurrent_snapshots_never_tear() {
        let _ = env_logger::builder().is_test(true).try_init();

        let buffer = Arc::new(Mutex::new(VisualizationBuffer::new(256)));
        let writer_buffer = buffer.clone();

        let writer = std::thread::spawn(move || {
            let mut next = 1.0f32;
            for round in 0..2_000 {
                // Vary the block size so writes exercise both code paths.
                let count = 16 + (round % 23) * 13;
                let block: Vec<f32> = (0..count)
                    .map(|_| {
                        let value = next;
                        next += 1.0;
                        value
                    })
                    .collect();
                writer_buffer.lock().write(&block);
            }
        });

        let mut observed_tail = 0.0f32;
        for _ in 0..2_000 {
            let snapshot = buffer.lock().snapshot();
            // Skip the zero-filled prefix present before the first fill.
            let start = snapshot
                .iter()
                .position(|&v| v != 0.0)
                .unwrap_or(snapshot.len());
            for pair in snapshot[start..].windows(2) {
                assert_eq!(
                    pair[1],
                    pair[0] + 1.0,
                    "snapshot mixed samples from different writes"
                );
            }
            if let Some(&tail) = snapshot.last() {
                // Time moves forward between snapshots.
                assert!(tail >= observed_tail);
                observed_tail = tail;
            }
        }

        writer.join().expect("writer thread panicked");
    }
}
