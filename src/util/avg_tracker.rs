/// Weighted running mean, skipping NaN samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvgTracker {
    total: f64,
    weight: f64,
}

impl AvgTracker {
    /// Adds `value` counted `weight` times
    pub fn add(&mut self, value: f64, weight: f64) {
        if !value.is_nan() && weight > 0.0 {
            self.total += value * weight;
            self.weight += weight;
        }
    }

    pub fn get(&self) -> f64 {
        if self.weight > 0.0 {
            self.total / self.weight
        } else {
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_samples() {
        let mut avg = AvgTracker::default();
        assert!(avg.get().is_nan());

        avg.add(1.0, 3.0);
        avg.add(5.0, 1.0);
        assert_eq!(avg.get(), 2.0);
    }

    #[test]
    fn ignores_nan_and_empty_batches() {
        let mut avg = AvgTracker::default();
        avg.add(2.0, 1.0);
        avg.add(f64::NAN, 5.0);
        avg.add(100.0, 0.0);
        assert_eq!(avg.get(), 2.0);
    }
}
