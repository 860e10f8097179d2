use crate::io::store::Table;
use crate::signal::{interpolate_interior, Frame, TimeSeries};
use chrono::{DateTime, Duration, NaiveDateTime};
use log::debug;
use std::collections::BTreeMap;

/// Turns an irregular reading table into fixed-cadence bucket means.
#[derive(Debug, Clone)]
pub struct Resampler {
    cadence: Duration,
    offsets: BTreeMap<String, f64>,
}

impl Resampler {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            offsets: BTreeMap::new(),
        }
    }

    /// Constant per-column corrections applied after bucketing.
    pub fn with_offsets(mut self, offsets: BTreeMap<String, f64>) -> Self {
        self.offsets = offsets;
        self
    }

    /// Sort, drop blank rows, fill interior cell gaps linearly in time, then
    /// average into buckets aligned to multiples of the cadence since midnight
    /// of the first reading's day. Each column carries a mask of the buckets
    /// that held a real reading.
    pub fn resample(&self, table: &Table) -> Frame {
        let names = table.source.columns();
        let cadence_ms = self.cadence.num_milliseconds().max(1);

        let mut rows: Vec<_> = table.rows.iter().filter(|r| !r.is_blank()).collect();
        rows.sort_by_key(|r| r.time);
        let Some(first) = rows.first() else {
            return Frame::empty(names, self.cadence);
        };

        let times: Vec<i64> = rows.iter().map(|r| to_millis(r.time)).collect();
        let grid = BucketGrid::new(&times, first.time, cadence_ms);

        let mut columns = Vec::with_capacity(names.len());
        let mut masks = Vec::with_capacity(names.len());
        for (col, name) in names.iter().enumerate() {
            let mut values: Vec<f64> = rows
                .iter()
                .map(|r| r.values.get(col).copied().flatten().unwrap_or(f64::NAN))
                .collect();
            masks.push((name.to_string(), grid.observed(&times, &values)));
            interpolate_by_time(&times, &mut values);
            let mut means = grid.means(&times, &values);
            if let Some(offset) = self.offsets.get(*name) {
                for v in &mut means {
                    *v += offset;
                }
            }
            columns.push((name.to_string(), means));
        }

        debug!(
            "resampled {} rows of {} into {} buckets of {}s",
            rows.len(),
            table.source.table_name(),
            grid.count,
            self.cadence.num_seconds()
        );
        Frame::from_columns(grid.start(), self.cadence, columns)
            .and_then(|frame| frame.with_observed(masks))
            .unwrap_or_else(|_| Frame::empty(names, self.cadence))
    }
}

/// Re-bucket a regular series onto a coarser (or equal) cadence, ignoring missing samples.
pub fn rebucket(series: &TimeSeries, cadence: Duration) -> TimeSeries {
    let points: Vec<(i64, f64)> = series
        .timestamps()
        .zip(series.data.iter().copied())
        .filter(|(_, v)| v.is_finite())
        .map(|(t, v)| (to_millis(t), v))
        .collect();
    let Some(&(first_ms, _)) = points.first() else {
        return TimeSeries::empty(cadence);
    };
    let times: Vec<i64> = points.iter().map(|p| p.0).collect();
    let values: Vec<f64> = points.iter().map(|p| p.1).collect();
    let grid = BucketGrid::new(&times, from_millis(first_ms), cadence.num_milliseconds().max(1));
    TimeSeries::new(grid.start(), cadence, grid.means(&times, &values))
}

/// Buckets covering sorted millisecond timestamps, aligned to multiples of the
/// cadence from midnight of the first timestamp's day.
struct BucketGrid {
    origin: i64,
    cadence_ms: i64,
    first: i64,
    count: usize,
}

impl BucketGrid {
    fn new(times: &[i64], first_time: NaiveDateTime, cadence_ms: i64) -> Self {
        let origin = to_millis(
            first_time
                .date()
                .and_hms_opt(0, 0, 0)
                .unwrap_or(first_time),
        );
        let first = (times[0] - origin).div_euclid(cadence_ms);
        let last = (times[times.len() - 1] - origin).div_euclid(cadence_ms);
        Self {
            origin,
            cadence_ms,
            first,
            count: (last - first + 1) as usize,
        }
    }

    fn start(&self) -> NaiveDateTime {
        from_millis(self.origin + self.first * self.cadence_ms)
    }

    /// Buckets holding at least one finite value.
    fn observed(&self, times: &[i64], values: &[f64]) -> Vec<bool> {
        let mut seen = vec![false; self.count];
        for (&t, _) in times.iter().zip(values).filter(|(_, v)| v.is_finite()) {
            seen[self.index(t)] = true;
        }
        seen
    }

    fn index(&self, t: i64) -> usize {
        ((t - self.origin).div_euclid(self.cadence_ms) - self.first) as usize
    }

    /// Bucket means; empty interior buckets are interpolated from their neighbours.
    fn means(&self, times: &[i64], values: &[f64]) -> Vec<f64> {
        let mut sums = vec![0.0; self.count];
        let mut counts = vec![0usize; self.count];
        for (&t, &v) in times.iter().zip(values) {
            if !v.is_finite() {
                continue;
            }
            let bucket = self.index(t);
            sums[bucket] += v;
            counts[bucket] += 1;
        }
        let mut means: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
            .collect();
        interpolate_interior(&mut means);
        means
    }
}

/// Fill missing values lying between two valid samples, weighting by elapsed time.
fn interpolate_by_time(times: &[i64], values: &mut [f64]) {
    let mut prev: Option<usize> = None;
    for i in 0..values.len() {
        if !values[i].is_finite() {
            continue;
        }
        if let Some(p) = prev {
            let span = (times[i] - times[p]) as f64;
            let (y0, y1) = (values[p], values[i]);
            for k in p + 1..i {
                values[k] = if span > 0.0 {
                    y0 + (times[k] - times[p]) as f64 / span * (y1 - y0)
                } else {
                    y0
                };
            }
        }
        prev = Some(i);
    }
}

fn to_millis(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp_millis()
}

fn from_millis(ms: i64) -> NaiveDateTime {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::{Row, Source};
    use chrono::NaiveDate;

    fn t(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("time")
    }

    fn probe(rows: Vec<(NaiveDateTime, Option<f64>, Option<f64>)>) -> Table {
        Table::new(
            Source::Probe,
            rows.into_iter()
                .map(|(time, a, b)| Row::new(time, vec![a, b]))
                .collect(),
        )
    }

    fn frame_to_table(frame: &Frame) -> Table {
        let a = frame.values("temp_in").expect("temp_in");
        let b = frame.values("temp_out").expect("temp_out");
        let rows = (0..frame.len)
            .map(|i| {
                let time = frame.start + Duration::seconds(frame.step_secs * i as i64);
                Row::new(time, vec![Some(a[i]), Some(b[i])])
            })
            .collect();
        Table::new(Source::Probe, rows)
    }

    #[test]
    fn empty_table_gives_empty_frame() {
        let frame = Resampler::new(Duration::minutes(2)).resample(&Table::empty(Source::Probe));
        assert!(frame.is_empty());
        assert_eq!(frame.values("temp_in").map(|v| v.len()), Some(0));
    }

    #[test]
    fn single_row_is_one_bucket() {
        let table = probe(vec![(t(10, 3, 10), Some(21.0), Some(22.0))]);
        let frame = Resampler::new(Duration::minutes(2)).resample(&table);
        assert_eq!(frame.len, 1);
        assert_eq!(frame.start, t(10, 2, 0));
        assert_eq!(frame.values("temp_in"), Some(&[21.0][..]));
    }

    #[test]
    fn sorts_buckets_and_averages() {
        let table = probe(vec![
            (t(10, 5, 0), Some(4.0), Some(4.0)),
            (t(10, 0, 30), Some(1.0), Some(1.0)),
            (t(10, 1, 30), Some(3.0), Some(3.0)),
            (t(10, 2, 10), Some(2.0), Some(2.0)),
        ]);
        let frame = Resampler::new(Duration::minutes(2)).resample(&table);
        assert_eq!(frame.start, t(10, 0, 0));
        assert_eq!(frame.len, 3);
        let values = frame.values("temp_in").expect("column");
        assert_eq!(values, &[2.0, 2.0, 4.0]);
    }

    #[test]
    fn fills_empty_buckets_and_missing_cells() {
        let table = probe(vec![
            (t(10, 0, 0), Some(20.0), Some(30.0)),
            (t(10, 4, 0), Some(21.0), None),
            (t(10, 8, 0), Some(22.0), Some(32.0)),
            (t(10, 9, 0), None, None),
        ]);
        let frame = Resampler::new(Duration::minutes(2)).resample(&table);
        // blank row dropped, so the frame ends at the 10:08 bucket
        assert_eq!(frame.len, 5);
        let inner = frame.values("temp_in").expect("column");
        assert_eq!(inner, &[20.0, 20.5, 21.0, 21.5, 22.0]);
        let outer = frame.values("temp_out").expect("column");
        assert_eq!(outer[2], 31.0);
        assert!(outer.iter().all(|v| v.is_finite()));
        assert_eq!(frame.observed("temp_in"), Some(&[true, false, true, false, true][..]));
        assert_eq!(frame.observed("temp_out"), Some(&[true, false, false, false, true][..]));
    }

    #[test]
    fn outage_buckets_are_not_observed() {
        let table = probe(vec![
            (t(10, 0, 0), Some(25.0), Some(26.0)),
            (t(10, 2, 0), Some(25.0), Some(26.0)),
            (t(10, 20, 0), Some(25.0), Some(26.0)),
        ]);
        let frame = Resampler::new(Duration::minutes(2)).resample(&table);
        assert_eq!(frame.len, 11);
        assert_eq!(frame.values("temp_in"), Some(&[25.0; 11][..]));
        let observed = frame.observed("temp_in").expect("mask");
        assert_eq!(observed.iter().filter(|&&o| o).count(), 3);
        assert!(observed[0] && observed[1] && observed[10]);
    }

    #[test]
    fn offsets_are_added_after_resampling() {
        let table = probe(vec![(t(0, 0, 0), Some(20.0), Some(20.0))]);
        let offsets = [("temp_out".to_string(), 2.0), ("temp_in".to_string(), 0.75)]
            .into_iter()
            .collect();
        let frame = Resampler::new(Duration::minutes(2))
            .with_offsets(offsets)
            .resample(&table);
        assert_eq!(frame.values("temp_in"), Some(&[20.75][..]));
        assert_eq!(frame.values("temp_out"), Some(&[22.0][..]));
    }

    #[test]
    fn resampling_regular_series_is_idempotent() {
        let rows = (0..50)
            .map(|i| {
                let time = t(6, 0, 0) + Duration::minutes(2 * i);
                let x = i as f64;
                (time, Some(20.0 + (x * 0.3).sin()), Some(22.0 + 0.01 * x))
            })
            .collect();
        let resampler = Resampler::new(Duration::minutes(2));
        let once = resampler.resample(&probe(rows));
        let twice = resampler.resample(&frame_to_table(&once));
        assert_eq!(once, twice);
        assert_eq!(once.len, 50);
    }

    #[test]
    fn rebucket_averages_onto_coarser_cadence() {
        let series = TimeSeries::new(
            t(10, 0, 0),
            Duration::minutes(2),
            vec![1.0, 2.0, 3.0, f64::NAN, 5.0, 6.0],
        );
        let coarse = rebucket(&series, Duration::minutes(5));
        // 10:00 {1,2,3}, 10:05 {5 at 10:08}, 10:10 {6}
        assert_eq!(coarse.start, t(10, 0, 0));
        assert_eq!(coarse.step_secs, 300);
        assert_eq!(coarse.data, vec![2.0, 5.0, 6.0]);
        assert!(rebucket(&TimeSeries::empty(Duration::minutes(2)), Duration::minutes(5)).is_empty());
    }
}
