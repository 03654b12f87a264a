//! The records subsystem: accumulates selected component variables under
//! named aggregations at named windows, and flushes them to record files
//! in whole time slices.
//!
//! A [`RecordStream`] groups every requested variable sharing one window
//! length. Values are folded in at every component timestep; when a slice
//! of completed windows is full it is aggregated and appended to the
//! record files in a single durable write. A failed flush is fatal.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use ndarray::{Array2, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Category, States};
use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::time::{Calendar, TimeDomain};

/// User-facing record requests: variable name to window length in seconds
/// to requested method names (synonyms allowed).
pub type RecordRequests = IndexMap<String, IndexMap<i64, Vec<String>>>;

/// Aggregation applied to a recorded variable over its window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordMethod {
    Point,
    Sum,
    Mean,
    Min,
    Max,
}

impl RecordMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordMethod::Point => "point",
            RecordMethod::Sum => "sum",
            RecordMethod::Mean => "mean",
            RecordMethod::Min => "min",
            RecordMethod::Max => "max",
        }
    }
}

impl fmt::Display for RecordMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordMethod {
    type Err = ConfluenceError;

    fn from_str(s: &str) -> ConfluenceResult<Self> {
        match s.to_lowercase().as_str() {
            "point" | "instantaneous" => Ok(RecordMethod::Point),
            "sum" | "cumulative" => Ok(RecordMethod::Sum),
            "mean" | "average" => Ok(RecordMethod::Mean),
            "min" | "minimum" => Ok(RecordMethod::Min),
            "max" | "maximum" => Ok(RecordMethod::Max),
            other => Err(ConfluenceError::Config(format!(
                "unknown record aggregation method '{other}'"
            ))),
        }
    }
}

/// Where a recorded variable comes from within the component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    State,
    Outward,
    Output,
}

/// One recorded variable within a stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamEntry {
    pub name: String,
    pub kind: RecordKind,
    pub units: String,
    /// Grid shape, extended by the state division axes if any.
    pub shape: Vec<usize>,
    pub methods: Vec<RecordMethod>,
}

/// Metadata at the head of every record file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordHeader {
    pub identifier: String,
    pub category: Category,
    pub tag: String,
    pub variable: String,
    pub units: String,
    pub window_seconds: i64,
    pub methods: Vec<RecordMethod>,
    pub shape: Vec<usize>,
    pub calendar: Calendar,
    /// Timestamp of the simulation start the window end-times count from.
    pub start_timestamp: i64,
}

/// One flushed slice of completed windows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordFrame {
    /// Window end-times, as timestamps in the file's calendar.
    pub end_timestamps: Vec<i64>,
    /// One aggregated series per method, shaped `(windows, shape...)`.
    pub series: IndexMap<RecordMethod, ArrayD<f64>>,
}

/// Partial accumulators of a stream, dumped and restored across a resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    arrays: IndexMap<String, ArrayD<f64>>,
    array_trackers: IndexMap<String, usize>,
    time_tracker: usize,
    trigger_tracker: usize,
}

/// Accumulates every requested variable of one window length and flushes
/// whole slices of completed windows to the record files.
pub struct RecordStream {
    window_seconds: i64,
    entries: Vec<StreamEntry>,
    /// Desired number of completed windows buffered per flush.
    io_slice: usize,

    steps_per_window: usize,
    steps_per_slice: usize,
    windows_per_slice: usize,

    /// Per-entry buffer shaped `(steps_per_slice, shape...)`.
    arrays: IndexMap<String, ArrayD<f64>>,
    array_trackers: IndexMap<String, usize>,
    /// Number of slices flushed so far.
    time_tracker: usize,
    trigger: usize,
    trigger_tracker: usize,

    files: IndexMap<String, PathBuf>,
    calendar: Calendar,
    start_timestamp: i64,
}

impl RecordStream {
    pub fn new(window_seconds: i64, entries: Vec<StreamEntry>, io_slice: usize) -> Self {
        Self {
            window_seconds,
            entries,
            io_slice: io_slice.max(1),
            steps_per_window: 0,
            steps_per_slice: 0,
            windows_per_slice: 0,
            arrays: IndexMap::new(),
            array_trackers: IndexMap::new(),
            time_tracker: 0,
            trigger: 0,
            trigger_tracker: 0,
            files: IndexMap::new(),
            calendar: Calendar::Gregorian,
            start_timestamp: 0,
        }
    }

    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    /// Size the buffers against the component time domain and reset the
    /// trackers for a fresh run.
    pub fn initialise(&mut self, timedomain: &TimeDomain) -> ConfluenceResult<()> {
        let step = timedomain.step_seconds();
        if self.window_seconds <= 0 || self.window_seconds % step != 0 {
            return Err(ConfluenceError::Config(format!(
                "recording window ({}s) not a positive multiple of the component \
                 timestep ({step}s)",
                self.window_seconds
            )));
        }
        let period = timedomain.period_seconds();
        if self.window_seconds > period || period % self.window_seconds != 0 {
            return Err(ConfluenceError::Config(format!(
                "recording window ({}s) not a divisor of the simulation period ({period}s)",
                self.window_seconds
            )));
        }

        self.steps_per_window = (self.window_seconds / step) as usize;
        let total_steps = timedomain.len();

        // the slice must hold whole windows and divide the run so the last
        // slice always completes
        let desired = self.io_slice * self.steps_per_window;
        self.steps_per_slice = (1..=total_steps)
            .filter(|c| c % self.steps_per_window == 0 && total_steps % c == 0)
            .take_while(|&c| c <= desired.max(self.steps_per_window))
            .last()
            .unwrap_or(self.steps_per_window);
        self.windows_per_slice = self.steps_per_slice / self.steps_per_window;

        self.arrays.clear();
        self.array_trackers.clear();
        self.trigger = 0;
        for entry in &self.entries {
            let mut shape = vec![self.steps_per_slice];
            shape.extend_from_slice(&entry.shape);
            self.arrays
                .insert(entry.name.clone(), ArrayD::from_elem(IxDyn(&shape), f64::NAN));
            self.array_trackers.insert(entry.name.clone(), 0);
            self.trigger += self.steps_per_slice;
        }
        self.time_tracker = 0;
        self.trigger_tracker = 0;
        self.calendar = timedomain.calendar();
        self.start_timestamp = timedomain.start().timestamp(self.calendar);
        Ok(())
    }

    /// Point the stream at its record files without touching them, e.g.
    /// before restoring from a dump.
    pub fn attach_files(
        &mut self,
        directory: &Path,
        identifier: &str,
        category: Category,
        tag: &str,
    ) {
        self.files.clear();
        for entry in &self.entries {
            let path = record_file_path(
                directory,
                identifier,
                category,
                tag,
                &entry.name,
                self.window_seconds,
            );
            self.files.insert(entry.name.clone(), path);
        }
    }

    /// Create one record file per variable under the given directory.
    pub fn create_files(
        &mut self,
        directory: &Path,
        identifier: &str,
        category: Category,
        tag: &str,
    ) -> ConfluenceResult<()> {
        self.files.clear();
        for entry in &self.entries {
            let path = record_file_path(
                directory,
                identifier,
                category,
                tag,
                &entry.name,
                self.window_seconds,
            );
            let header = RecordHeader {
                identifier: identifier.to_string(),
                category,
                tag: tag.to_string(),
                variable: entry.name.clone(),
                units: entry.units.clone(),
                window_seconds: self.window_seconds,
                methods: entry.methods.clone(),
                shape: entry.shape.clone(),
                calendar: self.calendar,
                start_timestamp: self.start_timestamp,
            };
            let file = File::create(&path).map_err(|e| ConfluenceError::io(&path, e))?;
            let mut writer = std::io::BufWriter::new(file);
            bincode::serialize_into(&mut writer, &header).map_err(|e| {
                ConfluenceError::Serialisation {
                    path: path.clone(),
                    detail: e.to_string(),
                }
            })?;
            writer.flush().map_err(|e| ConfluenceError::io(&path, e))?;
            self.files.insert(entry.name.clone(), path);
        }
        Ok(())
    }

    /// Fold the current values of every recorded variable into the stream,
    /// flushing a slice to disk when it completes.
    pub fn update(
        &mut self,
        states: &States,
        outwards: &IndexMap<String, Array2<f64>>,
        outputs: &IndexMap<String, Array2<f64>>,
    ) -> ConfluenceResult<()> {
        for entry in &self.entries {
            let array = self.arrays.get_mut(&entry.name).expect("sized at initialise");
            let tracker = self.array_trackers.get_mut(&entry.name).expect("sized");
            let mut slot = array.index_axis_mut(Axis(0), *tracker);
            match entry.kind {
                RecordKind::State => slot.assign(states.get(&entry.name).get_timestep(0)),
                RecordKind::Outward => slot.assign(&outwards[&entry.name]),
                RecordKind::Output => slot.assign(&outputs[&entry.name]),
            }
            *tracker += 1;
            self.trigger_tracker += 1;
        }
        if self.trigger_tracker == self.trigger {
            self.flush_slice()?;
        }
        Ok(())
    }

    fn flush_slice(&mut self) -> ConfluenceResult<()> {
        let first_window = self.time_tracker * self.windows_per_slice;
        let end_timestamps: Vec<i64> = (0..self.windows_per_slice)
            .map(|w| {
                self.start_timestamp + (first_window + w + 1) as i64 * self.window_seconds
            })
            .collect();

        for entry in &self.entries {
            let array = &self.arrays[&entry.name];
            let mut series = IndexMap::new();
            for &method in &entry.methods {
                series.insert(method, aggregate_windows(array, self.steps_per_window, method));
            }
            let frame = RecordFrame {
                end_timestamps: end_timestamps.clone(),
                series,
            };
            let path = &self.files[&entry.name];
            append_frame(path, &frame)?;
        }
        debug!(
            window_seconds = self.window_seconds,
            slice = self.time_tracker,
            "record slice flushed"
        );

        for array in self.arrays.values_mut() {
            array.fill(f64::NAN);
        }
        for tracker in self.array_trackers.values_mut() {
            *tracker = 0;
        }
        self.time_tracker += 1;
        self.trigger_tracker = 0;
        Ok(())
    }

    /// Dumpable partial accumulators.
    pub fn snapshot(&self) -> StreamState {
        StreamState {
            arrays: self.arrays.clone(),
            array_trackers: self.array_trackers.clone(),
            time_tracker: self.time_tracker,
            trigger_tracker: self.trigger_tracker,
        }
    }

    /// Restore the partial accumulators from a dump and truncate the
    /// record files back to the restored position, so that a resumed run
    /// reproduces them exactly.
    pub fn restore(&mut self, state: &StreamState) -> ConfluenceResult<()> {
        for (name, array) in &state.arrays {
            let target = self.arrays.get_mut(name).ok_or_else(|| {
                ConfluenceError::Config(format!("dump carries unknown record '{name}'"))
            })?;
            if target.shape() != array.shape() {
                return Err(ConfluenceError::Shape {
                    name: name.clone(),
                    expected: target.shape().to_vec(),
                    actual: array.shape().to_vec(),
                });
            }
            target.assign(array);
        }
        for (name, tracker) in &state.array_trackers {
            *self.array_trackers.get_mut(name).ok_or_else(|| {
                ConfluenceError::Config(format!("dump carries unknown record '{name}'"))
            })? = *tracker;
        }
        self.time_tracker = state.time_tracker;
        self.trigger_tracker = state.trigger_tracker;

        for path in self.files.values() {
            truncate_frames(path, self.time_tracker)?;
        }
        Ok(())
    }
}

/// Path of the record file of one (component, variable, window).
pub fn record_file_path(
    directory: &Path,
    identifier: &str,
    category: Category,
    tag: &str,
    variable: &str,
    window_seconds: i64,
) -> PathBuf {
    directory.join(format!(
        "{identifier}_{category}_{tag}_records_{variable}_{window_seconds}s.bin"
    ))
}

/// Reduce a `(steps_per_slice, shape...)` buffer into a
/// `(windows, shape...)` aggregate.
///
/// The mean is computed as sum over count in a fixed iteration order, so
/// results do not depend on accumulation order.
fn aggregate_windows(array: &ArrayD<f64>, steps_per_window: usize, method: RecordMethod) -> ArrayD<f64> {
    let steps = array.shape()[0];
    let windows = steps / steps_per_window;
    let cell_shape = &array.shape()[1..];

    let mut out_shape = vec![windows];
    out_shape.extend_from_slice(cell_shape);
    let mut out = ArrayD::zeros(IxDyn(&out_shape));

    for w in 0..windows {
        let chunk = array.slice_axis(
            Axis(0),
            ndarray::Slice::from((w * steps_per_window) as isize..((w + 1) * steps_per_window) as isize),
        );
        let mut target = out.index_axis_mut(Axis(0), w);
        match method {
            RecordMethod::Point => {
                target.assign(&chunk.index_axis(Axis(0), steps_per_window - 1));
            }
            RecordMethod::Sum | RecordMethod::Mean => {
                for s in 0..steps_per_window {
                    target += &chunk.index_axis(Axis(0), s);
                }
                if method == RecordMethod::Mean {
                    target /= steps_per_window as f64;
                }
            }
            RecordMethod::Min | RecordMethod::Max => {
                target.assign(&chunk.index_axis(Axis(0), 0));
                for s in 1..steps_per_window {
                    let step = chunk.index_axis(Axis(0), s);
                    ndarray::Zip::from(&mut target).and(&step).for_each(|t, &v| {
                        *t = match method {
                            RecordMethod::Min => t.min(v),
                            _ => t.max(v),
                        }
                    });
                }
            }
        }
    }
    out
}

/// Append one frame to a record file in a single durable write.
fn append_frame(path: &Path, frame: &RecordFrame) -> ConfluenceResult<()> {
    let encoded = bincode::serialize(frame).map_err(|e| ConfluenceError::Serialisation {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| ConfluenceError::io(path, e))?;
    file.write_all(&encoded)
        .and_then(|_| file.sync_all())
        .map_err(|e| ConfluenceError::io(path, e))
}

/// Rewrite a record file keeping only its first `keep` frames.
fn truncate_frames(path: &Path, keep: usize) -> ConfluenceResult<()> {
    let reader = RecordReader::open(path)?;
    let header = reader.header;
    let frames = reader.frames.into_iter().take(keep);

    let file = File::create(path).map_err(|e| ConfluenceError::io(path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    let serialisation_error = |e: bincode::Error| ConfluenceError::Serialisation {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };
    bincode::serialize_into(&mut writer, &header).map_err(serialisation_error)?;
    for frame in frames {
        bincode::serialize_into(&mut writer, &frame).map_err(serialisation_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| ConfluenceError::io(path, e.into_error()))?
        .sync_all()
        .map_err(|e| ConfluenceError::io(path, e))
}

/// Reads a record file back: the header and every flushed frame.
pub struct RecordReader {
    pub header: RecordHeader,
    pub frames: Vec<RecordFrame>,
}

impl RecordReader {
    pub fn open(path: &Path) -> ConfluenceResult<Self> {
        let file = File::open(path).map_err(|e| ConfluenceError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let header: RecordHeader =
            bincode::deserialize_from(&mut reader).map_err(|e| ConfluenceError::Serialisation {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let mut frames = Vec::new();
        loop {
            match bincode::deserialize_from::<_, RecordFrame>(&mut reader) {
                Ok(frame) => frames.push(frame),
                Err(e) => match *e {
                    bincode::ErrorKind::Io(ref io)
                        if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        break
                    }
                    _ => {
                        return Err(ConfluenceError::Serialisation {
                            path: path.to_path_buf(),
                            detail: e.to_string(),
                        })
                    }
                },
            }
        }
        Ok(Self { header, frames })
    }

    /// The full series of one method: window end timestamps and values.
    pub fn series(&self, method: RecordMethod) -> (Vec<i64>, Vec<ArrayD<f64>>) {
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        for frame in &self.frames {
            if let Some(series) = frame.series.get(&method) {
                for (w, &t) in frame.end_timestamps.iter().enumerate() {
                    timestamps.push(t);
                    values.push(series.index_axis(Axis(0), w).to_owned());
                }
            }
        }
        (timestamps, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{DateTime, TimeDomain};

    const DAY: i64 = 86_400;

    fn domain(days: usize) -> TimeDomain {
        let start = DateTime::new(2019, 1, 1, 9, 0, 0);
        TimeDomain::from_start_end_step(
            start,
            start.add_seconds(DAY * days as i64, Calendar::Gregorian),
            DAY,
            Calendar::Gregorian,
        )
        .unwrap()
    }

    fn entry(methods: Vec<RecordMethod>) -> StreamEntry {
        StreamEntry {
            name: "output_x".to_string(),
            kind: RecordKind::Output,
            units: "1".to_string(),
            shape: vec![2, 2],
            methods,
        }
    }

    fn run_stream(
        window_days: i64,
        methods: Vec<RecordMethod>,
        io_slice: usize,
        days: usize,
        directory: &Path,
    ) -> PathBuf {
        let mut stream = RecordStream::new(window_days * DAY, vec![entry(methods)], io_slice);
        stream.initialise(&domain(days)).unwrap();
        stream
            .create_files(directory, "test", Category::OpenWater, "run")
            .unwrap();

        let states = States::default();
        let outwards = IndexMap::new();
        for step in 0..days {
            let mut outputs = IndexMap::new();
            outputs.insert(
                "output_x".to_string(),
                Array2::from_elem((2, 2), step as f64 + 1.0),
            );
            stream.update(&states, &outwards, &outputs).unwrap();
        }
        directory.join(format!("test_openwater_run_records_output_x_{}s.bin", window_days * DAY))
    }

    #[test]
    fn method_synonyms() {
        assert_eq!("average".parse::<RecordMethod>().unwrap(), RecordMethod::Mean);
        assert_eq!("cumulative".parse::<RecordMethod>().unwrap(), RecordMethod::Sum);
        assert_eq!(
            "instantaneous".parse::<RecordMethod>().unwrap(),
            RecordMethod::Point
        );
        assert_eq!("minimum".parse::<RecordMethod>().unwrap(), RecordMethod::Min);
        assert_eq!("maximum".parse::<RecordMethod>().unwrap(), RecordMethod::Max);
        assert!("median".parse::<RecordMethod>().is_err());
    }

    #[test]
    fn window_must_be_multiple_of_step() {
        let mut stream = RecordStream::new(DAY / 2, vec![entry(vec![RecordMethod::Mean])], 1);
        assert!(stream.initialise(&domain(16)).is_err());
    }

    #[test]
    fn window_must_divide_period() {
        let mut stream = RecordStream::new(5 * DAY, vec![entry(vec![RecordMethod::Mean])], 1);
        assert!(stream.initialise(&domain(16)).is_err());
    }

    #[test]
    fn point_records_every_window_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = run_stream(1, vec![RecordMethod::Point], 1, 16, dir.path());

        let reader = RecordReader::open(&path).unwrap();
        assert_eq!(reader.header.variable, "output_x");
        assert_eq!(reader.header.window_seconds, DAY);

        let (timestamps, values) = reader.series(RecordMethod::Point);
        assert_eq!(values.len(), 16);
        for (w, value) in values.iter().enumerate() {
            assert_eq!(value[[0, 0]], w as f64 + 1.0);
        }
        // every end-time is a whole number of windows from the start
        let start = reader.header.start_timestamp;
        for (w, &t) in timestamps.iter().enumerate() {
            assert_eq!(t - start, (w as i64 + 1) * DAY);
        }
    }

    #[test]
    fn aggregates_over_eight_day_windows() {
        let dir = tempfile::tempdir().unwrap();
        let path = run_stream(
            8,
            vec![
                RecordMethod::Sum,
                RecordMethod::Mean,
                RecordMethod::Min,
                RecordMethod::Max,
            ],
            1,
            16,
            dir.path(),
        );

        let reader = RecordReader::open(&path).unwrap();
        let (_, sums) = reader.series(RecordMethod::Sum);
        let (_, means) = reader.series(RecordMethod::Mean);
        let (_, minima) = reader.series(RecordMethod::Min);
        let (_, maxima) = reader.series(RecordMethod::Max);

        assert_eq!(sums.len(), 2);
        // first window holds 1..=8, second 9..=16
        assert_eq!(sums[0][[0, 0]], 36.0);
        assert_eq!(sums[1][[0, 0]], 100.0);
        assert_eq!(means[0][[0, 0]], 4.5);
        assert_eq!(means[1][[0, 0]], 12.5);
        assert_eq!(minima[0][[0, 0]], 1.0);
        assert_eq!(maxima[1][[0, 0]], 16.0);
        // sum = mean * (window / step)
        assert_eq!(sums[0][[0, 0]], means[0][[0, 0]] * 8.0);
    }

    #[test]
    fn slice_buffering_matches_unbuffered_output() {
        let dir = tempfile::tempdir().unwrap();
        let sliced = run_stream(2, vec![RecordMethod::Sum], 4, 16, dir.path());
        let reader = RecordReader::open(&sliced).unwrap();
        // 8 windows in 2 flushes of 4
        assert_eq!(reader.frames.len(), 2);
        let (timestamps, values) = reader.series(RecordMethod::Sum);
        assert_eq!(values.len(), 8);
        assert_eq!(values[0][[0, 0]], 3.0);
        assert_eq!(values[7][[0, 0]], 31.0);
        assert!(timestamps.windows(2).all(|w| w[1] - w[0] == 2 * DAY));
    }

    #[test]
    fn snapshot_and_truncating_restore() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = RecordStream::new(DAY, vec![entry(vec![RecordMethod::Point])], 1);
        stream.initialise(&domain(4)).unwrap();
        stream
            .create_files(dir.path(), "test", Category::OpenWater, "run")
            .unwrap();
        let path = dir.path().join(format!("test_openwater_run_records_output_x_{DAY}s.bin"));

        let states = States::default();
        let outwards = IndexMap::new();
        let feed = |stream: &mut RecordStream, step: usize| {
            let mut outputs = IndexMap::new();
            outputs.insert("output_x".to_string(), Array2::from_elem((2, 2), step as f64));
            stream.update(&states, &outwards, &outputs).unwrap();
        };

        feed(&mut stream, 0);
        feed(&mut stream, 1);
        let snapshot = stream.snapshot();
        feed(&mut stream, 2);
        feed(&mut stream, 3);
        assert_eq!(RecordReader::open(&path).unwrap().frames.len(), 4);

        // restore to after step 1: the file is truncated to two frames
        let mut revived = RecordStream::new(DAY, vec![entry(vec![RecordMethod::Point])], 1);
        revived.initialise(&domain(4)).unwrap();
        revived.attach_files(dir.path(), "test", Category::OpenWater, "run");
        revived.restore(&snapshot).unwrap();
        assert_eq!(RecordReader::open(&path).unwrap().frames.len(), 2);

        feed(&mut revived, 2);
        feed(&mut revived, 3);
        let reader = RecordReader::open(&path).unwrap();
        let (_, values) = reader.series(RecordMethod::Point);
        assert_eq!(values.len(), 4);
        assert_eq!(values[3][[0, 0]], 3.0);
    }
}
