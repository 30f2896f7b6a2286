use rand::Rng;
use rand::rngs::ThreadRng;

/// Resting ADC reading of the simulated load cell.
pub const BASELINE_TICKS: i32 = 512;
/// ADC ticks per gram, the inverse of the calibration slope.
const TICKS_PER_GRAM: f64 = 2.0;

/// Samples per streamed batch.
const BATCH_LEN: usize = 10;
/// Length of one simulated pull bout, in samples.
const BOUT_LEN: usize = 40;

struct Bout {
    remaining: usize,
    peak_grams: f64,
}

/// Synthetic three-channel rig: a sample counter, a noisy load-cell
/// channel with occasional pull bouts, and a flat auxiliary channel.
pub struct RigSimulator {
    rng: ThreadRng,
    tick: i32,
    bout: Option<Bout>,
}

impl RigSimulator {
    pub fn new() -> Self {
        Self {
            rng: rand::rng(),
            tick: 0,
            bout: None,
        }
    }

    /// One streamed batch of raw samples, shaped like the controller's
    /// wire format.
    pub fn next_batch(&mut self) -> Vec<Vec<i32>> {
        let mut ticks = Vec::with_capacity(BATCH_LEN);
        let mut device = Vec::with_capacity(BATCH_LEN);
        let mut aux = Vec::with_capacity(BATCH_LEN);

        for _ in 0..BATCH_LEN {
            if self.bout.is_none() && self.rng.random_range(0..400) == 0 {
                self.bout = Some(Bout {
                    remaining: BOUT_LEN,
                    peak_grams: self.rng.random_range(30.0..220.0),
                });
            }

            let grams = match &mut self.bout {
                Some(bout) => {
                    bout.remaining -= 1;
                    let progress = bout.remaining as f64 / BOUT_LEN as f64;
                    // Triangular bump peaking mid-bout.
                    let envelope = 1.0 - (2.0 * progress - 1.0).abs();
                    let force = bout.peak_grams * envelope;
                    if bout.remaining == 0 {
                        self.bout = None;
                    }
                    force
                }
                None => 0.0,
            };

            let noise = self.rng.random_range(-3..=3);
            ticks.push(self.tick);
            device.push(BASELINE_TICKS + (grams * TICKS_PER_GRAM) as i32 + noise);
            aux.push(800 + self.rng.random_range(-2..=2));
            self.tick += 1;
        }

        vec![ticks, device, aux]
    }
}

impl Default for RigSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_keep_the_wire_shape() {
        let mut sim = RigSimulator::new();
        let batch = sim.next_batch();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|c| c.len() == BATCH_LEN));
    }

    #[test]
    fn sample_counter_is_monotonic() {
        let mut sim = RigSimulator::new();
        let first = sim.next_batch();
        let second = sim.next_batch();
        assert_eq!(second[0][0], first[0][BATCH_LEN - 1] + 1);
    }
}
