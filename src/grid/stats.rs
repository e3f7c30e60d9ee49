//! # Grid Statistics
//!
//! Running count, sum, minimum and maximum over the non-no-data cells of a
//! grid.
//!
//! ## Modes
//!
//! | Mode          | On every write                    | On read                     |
//! |---------------|-----------------------------------|-----------------------------|
//! | `Incremental` | adjust count, sum, extreme counts | return, unless stale        |
//! | `Lazy`        | mark stale                        | full scan when stale        |
//!
//! Incremental mode tracks how many cells hold the current minimum and
//! maximum. Removing the last of them leaves no way to find the next extreme
//! without a scan, so the extremes are marked stale and the next read runs a
//! full scan. Count and sum stay exact throughout; for integer grids the sum
//! is accumulated in `i64`.
//!
//! ## Full Scans
//!
//! A scan is driven by the grid one chunk at a time: it starts from
//! [`GridStats::fresh`], feeds values with [`GridStats::include`] and
//! installs the result with [`GridStats::replace_with`].

use super::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StatsMode {
    #[default]
    Incremental = 1,
    Lazy = 2,
}

impl StatsMode {
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(StatsMode::Incremental),
            2 => Some(StatsMode::Lazy),
            _ => None,
        }
    }
}

/// A consistent view of the statistics, as returned by `Grid::stats`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSummary<V: CellValue> {
    pub count: u64,
    pub sum: V::Sum,
    pub min: Option<V>,
    pub max: Option<V>,
    /// Number of cells holding `min`.
    pub min_count: u64,
    /// Number of cells holding `max`.
    pub max_count: u64,
}

impl<V: CellValue> StatsSummary<V> {
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(V::sum_to_f64(self.sum) / self.count as f64)
    }
}

/// Statistics in the raw form stored in grid.meta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedStats {
    pub count: u64,
    pub sum_bits: u64,
    pub min_bits: u64,
    pub max_bits: u64,
    pub min_count: u64,
    pub max_count: u64,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct GridStats<V: CellValue> {
    mode: StatsMode,
    count: u64,
    sum: V::Sum,
    min: Option<V>,
    min_count: u64,
    max: Option<V>,
    max_count: u64,
    stale: bool,
    extremes_stale: bool,
}

impl<V: CellValue> GridStats<V> {
    /// Statistics of a grid holding nothing but no-data.
    pub fn empty(mode: StatsMode) -> Self {
        Self {
            mode,
            count: 0,
            sum: V::Sum::default(),
            min: None,
            min_count: 0,
            max: None,
            max_count: 0,
            stale: false,
            extremes_stale: false,
        }
    }

    /// An accumulator for a full scan, in the same mode as `self`.
    pub fn fresh(&self) -> Self {
        Self::empty(self.mode)
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    /// Switches mode. Entering incremental mode keeps the current values only
    /// if they are up to date; otherwise the next read rescans.
    pub fn set_mode(&mut self, mode: StatsMode) {
        self.mode = mode;
    }

    /// True when a read must run a full scan first.
    pub fn is_stale(&self) -> bool {
        self.stale || self.extremes_stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Records that one cell changed from `old` to `new`.
    pub fn record(&mut self, old: V, new: V, nodata: V) {
        if self.mode == StatsMode::Lazy || self.stale {
            self.stale = true;
            return;
        }
        if !old.is_nodata(nodata) {
            self.remove(old);
        }
        if !new.is_nodata(nodata) {
            self.include(new);
        }
    }

    /// Adds one data value. Unordered values (NaN) are not data.
    pub fn include(&mut self, value: V) {
        if is_unordered(value) {
            return;
        }
        self.count += 1;
        self.sum += value.widen();
        if self.extremes_stale {
            return;
        }

        match self.min {
            Some(min) if value > min => {}
            Some(min) if value == min => self.min_count += 1,
            _ => {
                self.min = Some(value);
                self.min_count = 1;
            }
        }
        match self.max {
            Some(max) if value < max => {}
            Some(max) if value == max => self.max_count += 1,
            _ => {
                self.max = Some(value);
                self.max_count = 1;
            }
        }
    }

    fn remove(&mut self, value: V) {
        if is_unordered(value) {
            return;
        }
        self.count = self.count.saturating_sub(1);
        self.sum -= value.widen();

        if self.count == 0 {
            self.sum = V::Sum::default();
            self.clear_extremes();
            self.extremes_stale = false;
            return;
        }
        if self.extremes_stale {
            return;
        }

        if self.min == Some(value) {
            self.min_count -= 1;
            if self.min_count == 0 {
                self.extremes_stale = true;
            }
        }
        if self.max == Some(value) {
            self.max_count -= 1;
            if self.max_count == 0 {
                self.extremes_stale = true;
            }
        }
        if self.extremes_stale {
            self.clear_extremes();
        }
    }

    fn clear_extremes(&mut self) {
        self.min = None;
        self.min_count = 0;
        self.max = None;
        self.max_count = 0;
    }

    /// Installs the result of a full scan, keeping the current mode.
    pub fn replace_with(&mut self, scanned: GridStats<V>) {
        let mode = self.mode;
        *self = scanned;
        self.mode = mode;
        self.stale = false;
        self.extremes_stale = false;
    }

    pub fn summary(&self) -> StatsSummary<V> {
        StatsSummary {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            min_count: self.min_count,
            max_count: self.max_count,
        }
    }

    pub fn to_persisted(&self, nodata: V) -> PersistedStats {
        PersistedStats {
            count: self.count,
            sum_bits: V::sum_to_bits(self.sum),
            min_bits: self.min.unwrap_or(nodata).to_bits(),
            max_bits: self.max.unwrap_or(nodata).to_bits(),
            min_count: self.min_count,
            max_count: self.max_count,
            valid: !self.is_stale(),
        }
    }

    pub fn from_persisted(mode: StatsMode, raw: PersistedStats) -> Self {
        let mut stats = Self::empty(mode);
        if !raw.valid {
            stats.stale = true;
            return stats;
        }

        stats.count = raw.count;
        stats.sum = V::sum_from_bits(raw.sum_bits);
        if raw.count > 0 {
            stats.min = Some(V::from_bits(raw.min_bits));
            stats.max = Some(V::from_bits(raw.max_bits));
            stats.min_count = raw.min_count;
            stats.max_count = raw.max_count;
        }
        stats
    }
}

fn is_unordered<V: CellValue>(value: V) -> bool {
    value.partial_cmp(&value).is_none()
}
