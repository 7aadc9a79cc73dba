//! Demand model of a segregated free list, kept per size class across sweeps.
//!
//! Between two sweeps the allocator records how blocks of a size class were
//! born and died (by splitting larger blocks or coalescing smaller ones). At the
//! start of a sweep the net consumption of the class is turned into a demand
//! rate, and that rate sized for the next inter-sweep period becomes the number
//! of blocks the sweeper should try to keep for the class.

use std::fmt;

use crate::seq::AdaptivePaddedAverage;

/// Sweeps closer together than this are too short to say anything about demand.
pub const SWEEP_TIMER_THRESHOLD: f64 = 0.010;
pub const DEMAND_WEIGHT: u32 = 75;
pub const DEMAND_PADDING: u32 = 1;
/// Coalescing stops once a class holds this much of its desired count.
pub const COAL_SURPLUS_PERCENT: f64 = 1.05;
/// Splitting may take from a class holding this much of its desired count.
pub const SPLIT_SURPLUS_PERCENT: f64 = 1.10;

#[derive(Clone, Debug)]
pub struct AllocationStats {
    desired: i64,
    coal_desired: i64,
    surplus: i64,
    bfr_surp: i64,
    prev_sweep: i64,
    before_sweep: i64,
    coal_births: i64,
    coal_deaths: i64,
    split_births: i64,
    split_deaths: i64,
    demand_rate_estimate: AdaptivePaddedAverage,
    extrapolate_sweep: bool,
}

impl AllocationStats {
    pub fn new(extrapolate_sweep: bool) -> Self {
        Self {
            desired: 0,
            coal_desired: 0,
            surplus: 0,
            bfr_surp: 0,
            prev_sweep: 0,
            before_sweep: 0,
            coal_births: 0,
            coal_deaths: 0,
            split_births: 0,
            split_deaths: 0,
            demand_rate_estimate: AdaptivePaddedAverage::new(DEMAND_WEIGHT, DEMAND_PADDING),
            extrapolate_sweep,
        }
    }

    /// Blocks consumed since the previous sweep, never negative.
    pub fn demand(&self, count: i64) -> i64 {
        let demand = self.prev_sweep - count + self.split_births + self.coal_births
            - self.split_deaths
            - self.coal_deaths;
        demand.max(0)
    }

    /// Times are in seconds.
    pub fn compute_desired(
        &mut self,
        count: i64,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
    ) {
        if inter_sweep_current <= SWEEP_TIMER_THRESHOLD {
            return;
        }
        let demand = self.demand(count);
        let old_rate = self.demand_rate_estimate.padded_average();
        let rate = demand as f64 / inter_sweep_current;
        self.demand_rate_estimate.sample(rate);
        let new_rate = self.demand_rate_estimate.padded_average();
        let old_desired = self.desired;
        let delta_ise = if self.extrapolate_sweep {
            intra_sweep_estimate
        } else {
            0.0
        };
        self.desired = (new_rate * (inter_sweep_estimate + delta_ise)).max(0.0) as i64;

        log::trace!(
            target: "gc::freelist",
            "demand: {}, old_rate: {:.3}, current_rate: {:.3}, new_rate: {:.3}, old_desired: {}, new_desired: {}",
            demand,
            old_rate,
            rate,
            new_rate,
            old_desired,
            self.desired
        );
    }

    pub fn desired(&self) -> i64 {
        self.desired
    }
    pub fn set_desired(&mut self, v: i64) {
        self.desired = v;
    }
    pub fn coal_desired(&self) -> i64 {
        self.coal_desired
    }
    pub fn set_coal_desired(&mut self, v: i64) {
        self.coal_desired = v;
    }
    pub fn surplus(&self) -> i64 {
        self.surplus
    }
    pub fn set_surplus(&mut self, v: i64) {
        self.surplus = v;
    }
    pub fn bfr_surp(&self) -> i64 {
        self.bfr_surp
    }
    pub fn set_bfr_surp(&mut self, v: i64) {
        self.bfr_surp = v;
    }
    pub fn prev_sweep(&self) -> i64 {
        self.prev_sweep
    }
    pub fn set_prev_sweep(&mut self, v: i64) {
        self.prev_sweep = v;
    }
    pub fn before_sweep(&self) -> i64 {
        self.before_sweep
    }
    pub fn set_before_sweep(&mut self, v: i64) {
        self.before_sweep = v;
    }
    pub fn coal_births(&self) -> i64 {
        self.coal_births
    }
    pub fn increment_coal_births(&mut self) {
        self.coal_births += 1;
    }
    pub fn coal_deaths(&self) -> i64 {
        self.coal_deaths
    }
    pub fn increment_coal_deaths(&mut self) {
        self.coal_deaths += 1;
    }
    pub fn split_births(&self) -> i64 {
        self.split_births
    }
    pub fn increment_split_births(&mut self) {
        self.split_births += 1;
    }
    pub fn split_deaths(&self) -> i64 {
        self.split_deaths
    }
    pub fn increment_split_deaths(&mut self) {
        self.split_deaths += 1;
    }
    pub fn demand_rate(&self) -> f64 {
        self.demand_rate_estimate.padded_average()
    }

    fn clear_census(&mut self, count: i64) {
        self.prev_sweep = count;
        self.coal_births = 0;
        self.coal_deaths = 0;
        self.split_births = 0;
        self.split_deaths = 0;
    }
}

impl Default for AllocationStats {
    fn default() -> Self {
        Self::new(false)
    }
}

/// One size class of a [`FreeListCensus`].
#[derive(Clone, Debug)]
pub struct SizeClassCensus {
    pub size: usize,
    pub count: i64,
    /// Index of the next larger class worth splitting from, or the number of classes.
    pub hint: usize,
    pub stats: AllocationStats,
}

/// Sums over every class, as printed at the end of a sweep.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct CensusTotals {
    pub bfr_surp: i64,
    pub surplus: i64,
    pub desired: i64,
    pub prev_sweep: i64,
    pub before_sweep: i64,
    pub count: i64,
    pub coal_births: i64,
    pub coal_deaths: i64,
    pub split_births: i64,
    pub split_deaths: i64,
    /// Bytes held by the lists.
    pub total_free: usize,
}

impl CensusTotals {
    pub fn growth(&self) -> f64 {
        let net = self.split_births + self.coal_births - self.split_deaths - self.coal_deaths;
        let base = if self.prev_sweep != 0 {
            self.prev_sweep as f64
        } else {
            1.0
        };
        net as f64 / base
    }

    pub fn deficit(&self) -> f64 {
        let base = if self.desired != 0 {
            self.desired as f64
        } else {
            1.0
        };
        (self.desired - self.count) as f64 / base
    }
}

impl fmt::Display for CensusTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bfrsurp: {} surplus: {} desired: {} prvSwep: {} bfrSwep: {} count: {} cBirths: {} cDeaths: {} sBirths: {} sDeaths: {} growth: {:8.5} deficit: {:8.5}",
            self.bfr_surp,
            self.surplus,
            self.desired,
            self.prev_sweep,
            self.before_sweep,
            self.count,
            self.coal_births,
            self.coal_deaths,
            self.split_births,
            self.split_deaths,
            self.growth(),
            self.deficit()
        )
    }
}

/// Census over the indexed free lists of one space.
#[derive(Clone, Debug)]
pub struct FreeListCensus {
    classes: Vec<SizeClassCensus>,
    sweep_count: u64,
}

impl FreeListCensus {
    /// `sizes` are the block sizes of each class in ascending order.
    pub fn new(sizes: &[usize], extrapolate_sweep: bool) -> Self {
        let nclasses = sizes.len();
        Self {
            classes: sizes
                .iter()
                .map(|&size| SizeClassCensus {
                    size,
                    count: 0,
                    hint: nclasses,
                    stats: AllocationStats::new(extrapolate_sweep),
                })
                .collect(),
            sweep_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class(&self, index: usize) -> Option<&SizeClassCensus> {
        self.classes.get(index)
    }

    pub fn class_mut(&mut self, index: usize) -> Option<&mut SizeClassCensus> {
        self.classes.get_mut(index)
    }

    pub fn classes(&self) -> &[SizeClassCensus] {
        &self.classes
    }

    pub fn sweep_count(&self) -> u64 {
        self.sweep_count
    }

    pub fn begin_sweep(
        &mut self,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
    ) {
        for (index, class) in self.classes.iter_mut().enumerate() {
            log::trace!(target: "gc::freelist", "size[{}] : ", index);
            class.stats.compute_desired(
                class.count,
                inter_sweep_current,
                inter_sweep_estimate,
                intra_sweep_estimate,
            );
            let coal_desired = (class.stats.desired() as f64 * COAL_SURPLUS_PERCENT) as i64;
            class.stats.set_coal_desired(coal_desired);
            class.stats.set_before_sweep(class.count);
            class.stats.set_bfr_surp(class.stats.surplus());
        }
    }

    pub fn end_sweep(&mut self) {
        self.sweep_count += 1;
        self.set_surplus();
        self.set_hints();
        if log::log_enabled!(target: "gc::freelist", log::Level::Debug) {
            log::debug!(
                target: "gc::freelist",
                "end sweep# {} {}",
                self.sweep_count,
                self.totals()
            );
        }
        self.clear_census();
    }

    fn set_surplus(&mut self) {
        for class in self.classes.iter_mut() {
            let keep = (class.stats.desired() as f64 * SPLIT_SURPLUS_PERCENT) as i64;
            class.stats.set_surplus(class.count - keep);
        }
    }

    fn set_hints(&mut self) {
        let mut hint = self.classes.len();
        for (index, class) in self.classes.iter_mut().enumerate().rev() {
            class.hint = hint;
            if class.stats.surplus() > 0 {
                hint = index;
            }
        }
    }

    fn clear_census(&mut self) {
        for class in self.classes.iter_mut() {
            class.stats.clear_census(class.count);
        }
    }

    /// Forgets counts and estimates, keeping the size classes.
    pub fn reset(&mut self) {
        let nclasses = self.classes.len();
        for class in self.classes.iter_mut() {
            let extrapolate = class.stats.extrapolate_sweep;
            class.count = 0;
            class.hint = nclasses;
            class.stats = AllocationStats::new(extrapolate);
        }
        self.sweep_count = 0;
    }

    pub fn totals(&self) -> CensusTotals {
        let mut total = CensusTotals::default();
        for class in self.classes.iter() {
            total.total_free += class.count.max(0) as usize * class.size;
            total.bfr_surp += class.stats.bfr_surp();
            total.surplus += class.stats.surplus();
            total.desired += class.stats.desired();
            total.prev_sweep += class.stats.prev_sweep();
            total.before_sweep += class.stats.before_sweep();
            total.count += class.count;
            total.coal_births += class.stats.coal_births();
            total.coal_deaths += class.stats.coal_deaths();
            total.split_births += class.stats.split_births();
            total.split_deaths += class.stats.split_deaths();
        }
        total
    }
}
