//! Checkpoint frames and dump files.
//!
//! A dump file is an append-only stream of timestamped, bincode-encoded
//! frames: one file per component plus one model-level file carrying the
//! exchanger buffers. Replaying from a frame reproduces the original
//! trajectory bit-for-bit given identical inputs.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;

use indexmap::IndexMap;
use ndarray::ArrayD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::exchanger::ExchangerState;
use crate::record::StreamState;
use crate::time::DateTime;

/// Snapshot of one component: its state histories, its shelf, and the
/// partial accumulators of its record streams.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentFrame {
    pub timestamp: i64,
    pub datetime: DateTime,
    /// Full history window of every state, oldest slice first.
    pub states: IndexMap<String, Vec<ArrayD<f64>>>,
    pub shelf: IndexMap<String, ArrayD<f64>>,
    pub streams: Vec<StreamState>,
}

/// Model-level snapshot: run identity, clock position and exchanger
/// buffers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelFrame {
    pub timestamp: i64,
    pub datetime: DateTime,
    pub identifier: String,
    /// `run` for the main simulation, `spinup-N` for spin-up cycles.
    pub tag: String,
    pub exchanger: ExchangerState,
}

/// Frames that can be located by simulation timestamp within a dump.
pub trait Stamped {
    fn timestamp(&self) -> i64;
}

impl Stamped for ComponentFrame {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Stamped for ModelFrame {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Append one frame to a dump file, creating it on first use. The write is
/// a single durable append.
pub fn append_frame<T: Serialize>(path: &Path, frame: &T) -> ConfluenceResult<()> {
    let encoded = bincode::serialize(frame).map_err(|e| ConfluenceError::Serialisation {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ConfluenceError::io(path, e))?;
    file.write_all(&encoded)
        .and_then(|_| file.sync_all())
        .map_err(|e| ConfluenceError::io(path, e))
}

/// Read every frame of a dump file, in write order.
pub fn read_frames<T: DeserializeOwned>(path: &Path) -> ConfluenceResult<Vec<T>> {
    let file = File::open(path).map_err(|e| ConfluenceError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut frames = Vec::new();
    loop {
        match bincode::deserialize_from::<_, T>(&mut reader) {
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
    Ok(frames)
}

/// Locate the latest frame with `timestamp <= at`, or the last frame when
/// `at` is not given.
pub fn load_frame<T: DeserializeOwned + Stamped>(
    path: &Path,
    at: Option<i64>,
) -> ConfluenceResult<T> {
    let frames: Vec<T> = read_frames(path)?;
    let frame = match at {
        None => frames.into_iter().last(),
        Some(at) => frames
            .into_iter()
            .filter(|f| f.timestamp() <= at)
            .max_by_key(Stamped::timestamp),
    };
    frame.ok_or_else(|| {
        ConfluenceError::Config(format!(
            "no usable snapshot found in dump {}",
            path.display()
        ))
    })
}

/// Structured failure record written to the saving directory alongside the
/// last dump.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub tag: String,
    pub error: String,
    pub datetime: String,
    pub message: String,
}

/// Drop a JSON error record next to the dumps; best-effort, failures to
/// write it are ignored in favour of the original error.
pub fn write_error_record(
    directory: &Path,
    identifier: &str,
    datetime: DateTime,
    error: &ConfluenceError,
) {
    let record = ErrorRecord {
        tag: error.tag().to_string(),
        error: format!("{error:?}"),
        datetime: datetime.to_string(),
        message: error.to_string(),
    };
    let path = directory.join(format!("{identifier}_error.json"));
    if let Ok(file) = File::create(&path) {
        let _ = serde_json::to_writer_pretty(file, &record);
    }
}
