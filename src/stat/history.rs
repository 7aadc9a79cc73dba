use super::sampler::SamplerData;

/// Ring of `N` interval aggregates.
///
/// `total` always equals the sum of the resident slots; `accumulated` is what
/// was added since the ring last wrapped.
#[derive(Clone, Debug)]
pub struct HistoryInterval<const N: usize> {
    next: usize,
    samples: [SamplerData; N],
    accumulated: SamplerData,
    total: SamplerData,
}

impl<const N: usize> Default for HistoryInterval<N> {
    fn default() -> Self {
        Self {
            next: 0,
            samples: [SamplerData::default(); N],
            accumulated: SamplerData::default(),
            total: SamplerData::default(),
        }
    }
}

impl<const N: usize> HistoryInterval<N> {
    /// Inserts a sample, returns `true` when the ring wrapped.
    pub fn add(&mut self, new_sample: &SamplerData) -> bool {
        let old_sample = std::mem::replace(&mut self.samples[self.next], *new_sample);

        self.accumulated.add(new_sample);

        self.total.nsamples -= old_sample.nsamples;
        self.total.sum -= old_sample.sum;
        self.total.nsamples += new_sample.nsamples;
        self.total.sum += new_sample.sum;

        if self.total.max < new_sample.max {
            self.total.max = new_sample.max;
        } else if self.total.max == old_sample.max {
            // Removed old max, find the new one
            self.total.max = self.samples.iter().map(|s| s.max).max().unwrap_or(0);
        }

        self.next += 1;
        if self.next == N {
            self.next = 0;
            self.accumulated = SamplerData::default();
            return true;
        }
        false
    }

    pub fn total(&self) -> &SamplerData {
        &self.total
    }

    pub fn accumulated(&self) -> &SamplerData {
        &self.accumulated
    }
}

/// Last 10 seconds / 10 minutes / 10 hours and lifetime total of one sampler.
/// Fed once per second.
#[derive(Clone, Debug, Default)]
pub struct SamplerHistory {
    seconds: HistoryInterval<10>,
    minutes: HistoryInterval<60>,
    hours: HistoryInterval<60>,
    total: SamplerData,
}

fn avg(data: &[&SamplerData]) -> u64 {
    let mut sum = SamplerData::default();
    for d in data {
        sum.add(d);
    }
    sum.avg()
}

impl SamplerHistory {
    pub fn add(&mut self, new_sample: &SamplerData) {
        if self.seconds.add(new_sample) && self.minutes.add(self.seconds.total()) {
            if self.hours.add(self.minutes.total()) {
                let hours = *self.hours.total();
                self.total.add(&hours);
            }
        }
    }

    pub fn avg_10_seconds(&self) -> u64 {
        self.seconds.total().avg()
    }

    pub fn avg_10_minutes(&self) -> u64 {
        avg(&[self.minutes.total(), self.seconds.accumulated()])
    }

    pub fn avg_10_hours(&self) -> u64 {
        avg(&[
            self.hours.total(),
            self.minutes.accumulated(),
            self.seconds.accumulated(),
        ])
    }

    pub fn avg_total(&self) -> u64 {
        avg(&[
            &self.total,
            self.hours.accumulated(),
            self.minutes.accumulated(),
            self.seconds.accumulated(),
        ])
    }

    /// Sum and count of every sample ever added.
    pub fn lifetime(&self) -> SamplerData {
        let mut all = self.total;
        all.add(self.hours.accumulated());
        all.add(self.minutes.accumulated());
        all.add(self.seconds.accumulated());
        all
    }

    pub fn max_10_seconds(&self) -> u64 {
        self.seconds.total().max
    }

    pub fn max_10_minutes(&self) -> u64 {
        self.minutes.total().max.max(self.seconds.accumulated().max)
    }

    pub fn max_10_hours(&self) -> u64 {
        self.hours
            .total()
            .max
            .max(self.minutes.accumulated().max)
            .max(self.seconds.accumulated().max)
    }

    pub fn max_total(&self) -> u64 {
        self.total
            .max
            .max(self.hours.accumulated().max)
            .max(self.minutes.accumulated().max)
            .max(self.seconds.accumulated().max)
    }
}
