//! Running statistics over streams of `f64` samples.
//!
//! All of these report `0.0` instead of `NaN` for empty sequences so that the
//! heuristics consuming them stay total.

pub const DEFAULT_ALPHA: f64 = 0.7;

/// Decaying average/variance shared by [`NumberSeq`] and [`TruncatedSeq`].
#[derive(Clone, Copy, Debug)]
struct Decaying {
    alpha: f64,
    davg: f64,
    dvariance: f64,
}

impl Decaying {
    const fn new(alpha: f64) -> Self {
        Self {
            alpha,
            davg: 0.0,
            dvariance: 0.0,
        }
    }

    fn add(&mut self, first: bool, val: f64) {
        if first {
            self.davg = val;
            self.dvariance = 0.0;
        } else {
            self.davg = (1.0 - self.alpha) * val + self.alpha * self.davg;
            let diff = val - self.davg;
            self.dvariance = (1.0 - self.alpha) * diff * diff + self.alpha * self.dvariance;
        }
    }
}

fn variance(num: usize, sum: f64, sum_of_squares: f64) -> f64 {
    if num <= 1 {
        return 0.0;
    }
    let x_bar = sum / num as f64;
    let result = sum_of_squares / num as f64 - x_bar * x_bar;
    if result < 0.0 {
        // loss of precision
        0.0
    } else {
        result
    }
}

/// Unbounded sequence: exact totals plus a decaying average.
#[derive(Clone, Debug)]
pub struct NumberSeq {
    decaying: Decaying,
    num: usize,
    sum: f64,
    sum_of_squares: f64,
    maximum: f64,
    last: f64,
}

impl Default for NumberSeq {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl NumberSeq {
    pub const fn new(alpha: f64) -> Self {
        Self {
            decaying: Decaying::new(alpha),
            num: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            maximum: 0.0,
            last: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.decaying.add(self.num == 0, val);
        if self.num == 0 || val > self.maximum {
            self.maximum = val;
        }
        self.last = val;
        self.sum += val;
        self.sum_of_squares += val * val;
        self.num += 1;
    }

    pub fn num(&self) -> usize {
        self.num
    }
    pub fn sum(&self) -> f64 {
        self.sum
    }
    pub fn maximum(&self) -> f64 {
        self.maximum
    }
    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    pub fn variance(&self) -> f64 {
        variance(self.num, self.sum, self.sum_of_squares)
    }

    pub fn sd(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn davg(&self) -> f64 {
        self.decaying.davg
    }

    pub fn dvariance(&self) -> f64 {
        self.decaying.dvariance.max(0.0)
    }

    pub fn dsd(&self) -> f64 {
        self.dvariance().sqrt()
    }
}

/// Keeps the last `length` samples; totals only cover those.
#[derive(Clone, Debug)]
pub struct TruncatedSeq {
    decaying: Decaying,
    sequence: Box<[f64]>,
    next: usize,
    num: usize,
    sum: f64,
    sum_of_squares: f64,
}

impl TruncatedSeq {
    pub fn new(length: usize) -> Self {
        Self::with_alpha(length, DEFAULT_ALPHA)
    }

    pub fn with_alpha(length: usize, alpha: f64) -> Self {
        assert!(length > 0, "truncated sequence needs at least one slot");
        Self {
            decaying: Decaying::new(alpha),
            sequence: vec![0.0; length].into_boxed_slice(),
            next: 0,
            num: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.decaying.add(self.num == 0, val);

        let old = self.sequence[self.next];
        self.sum -= old;
        self.sum_of_squares -= old * old;
        self.sum += val;
        self.sum_of_squares += val * val;

        self.sequence[self.next] = val;
        self.next = (self.next + 1) % self.sequence.len();
        if self.num < self.sequence.len() {
            self.num += 1;
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    pub fn sd(&self) -> f64 {
        variance(self.num, self.sum, self.sum_of_squares).sqrt()
    }

    pub fn davg(&self) -> f64 {
        self.decaying.davg
    }

    pub fn dsd(&self) -> f64 {
        self.decaying.dvariance.max(0.0).sqrt()
    }

    pub fn last(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        let len = self.sequence.len();
        self.sequence[(self.next + len - 1) % len]
    }

    pub fn maximum(&self) -> f64 {
        self.iter().fold(0.0, f64::max)
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let len = self.sequence.len();
        let first = (self.next + len - self.num) % len;
        (0..self.num).map(move |i| self.sequence[(first + i) % len])
    }

    /// Least-squares fit over the retained samples, extrapolated one step ahead.
    pub fn predict_next(&self) -> f64 {
        match self.num {
            0 => return 0.0,
            1 => return self.last(),
            _ => {}
        }

        let num = self.num as f64;
        let mut x_squared_sum = 0.0;
        let mut x_sum = 0.0;
        let mut y_sum = 0.0;
        let mut xy_sum = 0.0;

        for (i, y) in self.iter().enumerate() {
            let x = i as f64;
            x_squared_sum += x * x;
            x_sum += x;
            y_sum += y;
            xy_sum += x * y;
        }

        let x_avg = x_sum / num;
        let y_avg = y_sum / num;

        let sxx = x_squared_sum - x_sum * x_sum / num;
        let sxy = xy_sum - x_sum * y_sum / num;
        let b1 = sxy / sxx;
        let b0 = y_avg - b1 * x_avg;

        b0 + b1 * num
    }
}

const OLD_THRESHOLD: u32 = 100;

/// Exponentially weighted average whose weight starts high and settles at
/// `weight` percent once enough samples have been seen.
#[derive(Clone, Copy, Debug)]
pub struct AdaptiveWeightedAverage {
    average: f64,
    sample_count: u32,
    weight: u32,
    is_old: bool,
    last_sample: f64,
}

impl AdaptiveWeightedAverage {
    pub const fn new(weight: u32) -> Self {
        Self {
            average: 0.0,
            sample_count: 0,
            weight,
            is_old: false,
            last_sample: 0.0,
        }
    }

    #[inline]
    pub fn exp_avg(avg: f64, sample: f64, weight: u32) -> f64 {
        (100.0 - weight as f64) * avg / 100.0 + weight as f64 * sample / 100.0
    }

    fn increment_count(&mut self) {
        self.sample_count = self.sample_count.saturating_add(1);
        if !self.is_old && self.sample_count > OLD_THRESHOLD {
            self.is_old = true;
        }
    }

    fn compute_adaptive_average(&self, new_sample: f64, average: f64) -> f64 {
        let count_weight = if self.is_old || self.sample_count == 0 {
            0
        } else {
            OLD_THRESHOLD / self.sample_count
        };
        let adaptive_weight = self.weight.max(count_weight);
        Self::exp_avg(average, new_sample, adaptive_weight)
    }

    pub fn sample(&mut self, new_sample: f64) {
        self.increment_count();
        self.average = self.compute_adaptive_average(new_sample, self.average);
        self.last_sample = new_sample;
    }

    pub fn average(&self) -> f64 {
        self.average
    }
    pub fn last_sample(&self) -> f64 {
        self.last_sample
    }
    pub fn count(&self) -> u32 {
        self.sample_count
    }
}

/// [`AdaptiveWeightedAverage`] plus `padding` deviations.
#[derive(Clone, Copy, Debug)]
pub struct AdaptivePaddedAverage {
    inner: AdaptiveWeightedAverage,
    padded_avg: f64,
    deviation: f64,
    padding: u32,
}

impl AdaptivePaddedAverage {
    pub const fn new(weight: u32, padding: u32) -> Self {
        Self {
            inner: AdaptiveWeightedAverage::new(weight),
            padded_avg: 0.0,
            deviation: 0.0,
            padding,
        }
    }

    pub fn sample(&mut self, new_sample: f64) {
        self.inner.sample(new_sample);
        let new_avg = self.inner.average();
        let new_dev = self
            .inner
            .compute_adaptive_average((new_sample - new_avg).abs(), self.deviation);
        self.deviation = new_dev;
        self.padded_avg = new_avg + self.padding as f64 * new_dev;
    }

    pub fn average(&self) -> f64 {
        self.inner.average()
    }
    pub fn padded_average(&self) -> f64 {
        self.padded_avg
    }
    pub fn deviation(&self) -> f64 {
        self.deviation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_sequences_are_zero() {
        let seq = NumberSeq::default();
        assert_eq!(seq.avg(), 0.0);
        assert_eq!(seq.sd(), 0.0);
        assert_eq!(seq.davg(), 0.0);

        let seq = TruncatedSeq::new(4);
        assert_eq!(seq.avg(), 0.0);
        assert_eq!(seq.predict_next(), 0.0);
        assert_eq!(seq.last(), 0.0);
    }

    #[test]
    fn number_seq_decays_towards_new_samples() {
        let mut seq = NumberSeq::default();
        seq.add(10.0);
        assert!(close(seq.davg(), 10.0));
        seq.add(20.0);
        assert!(close(seq.davg(), 0.3 * 20.0 + 0.7 * 10.0));
        assert!(close(seq.avg(), 15.0));
        assert!(close(seq.maximum(), 20.0));
        assert!(seq.dsd() > 0.0);
    }

    #[test]
    fn truncated_seq_forgets_old_samples() {
        let mut seq = TruncatedSeq::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            seq.add(v);
        }
        assert_eq!(seq.num(), 3);
        assert!(close(seq.sum(), 6.0));
        assert!(close(seq.avg(), 2.0));
        assert_eq!(seq.iter().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
        assert!(close(seq.maximum(), 3.0));
    }

    #[test]
    fn predict_next_extrapolates_linear_trend() {
        let mut seq = TruncatedSeq::new(10);
        for v in [2.0, 4.0, 6.0, 8.0] {
            seq.add(v);
        }
        assert!(close(seq.predict_next(), 10.0));

        let mut single = TruncatedSeq::new(10);
        single.add(7.0);
        assert!(close(single.predict_next(), 7.0));
    }

    #[test]
    fn padded_average_sits_above_average_for_noisy_input() {
        let mut avg = AdaptivePaddedAverage::new(75, 1);
        for v in [10.0, 0.0, 10.0, 0.0, 10.0] {
            avg.sample(v);
        }
        assert!(avg.padded_average() >= avg.average());
        assert!(avg.deviation() > 0.0);
    }

    #[test]
    fn weighted_average_first_sample_is_taken_verbatim() {
        let mut avg = AdaptiveWeightedAverage::new(25);
        avg.sample(40.0);
        assert!(close(avg.average(), 40.0));
        assert_eq!(avg.count(), 1);
    }
}
