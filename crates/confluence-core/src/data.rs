//! Field store for component driving data.
//!
//! A [`DataSet`] is a named collection of gridded variables of three kinds:
//! dynamic (time-varying along a [`TimeDomain`]), static, and climatologic
//! (indexed by a repeating bucket of the year). The underlying gridded-file
//! I/O library is out of scope; a simple self-describing binary format
//! stands in for it, read and written with `bincode` like the snapshot
//! machinery.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfluenceError, ConfluenceResult};
use crate::time::{climatology_bucket, Calendar, DateTime, TimeDomain};

/// Bucketing frequency of a climatologic input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimatologyFrequency {
    /// DJF, MAM, JJA, SON.
    Seasonal,
    /// January to December.
    Monthly,
    /// January 1st to December 31st, leap day included.
    DayOfYear,
}

impl ClimatologyFrequency {
    pub fn length(&self) -> usize {
        match self {
            ClimatologyFrequency::Seasonal => 4,
            ClimatologyFrequency::Monthly => 12,
            ClimatologyFrequency::DayOfYear => 366,
        }
    }

    /// Bucket of the given datetime under this frequency.
    pub fn bucket(&self, datetime: DateTime, calendar: Calendar) -> usize {
        climatology_bucket(datetime, calendar, self.length())
    }
}

impl fmt::Display for ClimatologyFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClimatologyFrequency::Seasonal => "seasonal",
            ClimatologyFrequency::Monthly => "monthly",
            ClimatologyFrequency::DayOfYear => "day_of_year",
        };
        write!(f, "{name}")
    }
}

/// The gridded values of one variable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FieldData {
    /// Time-varying values, shaped `(nt, ny, nx)` along a time domain.
    Dynamic {
        values: Array3<f64>,
        timedomain: TimeDomain,
    },
    /// Time-invariant values, shaped `(ny, nx)`.
    Static { values: Array2<f64> },
    /// Repeating values, shaped `(buckets, ny, nx)`.
    Climatologic {
        values: Array3<f64>,
        frequency: ClimatologyFrequency,
    },
}

/// A named variable of a [`DataSet`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataVariable {
    pub name: String,
    pub units: String,
    pub data: FieldData,
    /// Paths of the files the variable was read from, kept for the
    /// configuration round-trip. Empty for in-memory variables.
    pub filenames: Vec<PathBuf>,
}

impl DataVariable {
    /// Spatial shape of the variable.
    pub fn grid_shape(&self) -> (usize, usize) {
        match &self.data {
            FieldData::Dynamic { values, .. } => (values.dim().1, values.dim().2),
            FieldData::Static { values } => values.dim(),
            FieldData::Climatologic { values, .. } => (values.dim().1, values.dim().2),
        }
    }

    /// For a dynamic variable, the index of the first timestep of `domain`
    /// within the variable's own time domain.
    ///
    /// The variable must use the same calendar and step and cover the
    /// whole of `domain`.
    pub fn dynamic_offset(&self, domain: &TimeDomain) -> ConfluenceResult<usize> {
        let FieldData::Dynamic { timedomain, .. } = &self.data else {
            return Err(ConfluenceError::Config(format!(
                "variable '{}' is not dynamic",
                self.name
            )));
        };
        let error = || {
            ConfluenceError::Config(format!(
                "time domain of data '{}' ({timedomain}) not compatible with \
                 component time domain ({domain})",
                self.name
            ))
        };
        if timedomain.calendar() != domain.calendar()
            || timedomain.step_seconds() != domain.step_seconds()
        {
            return Err(error());
        }
        let offset = timedomain
            .index_of(domain.start())
            .ok_or_else(error)?;
        if offset + domain.len() > timedomain.len() {
            return Err(error());
        }
        Ok(offset)
    }

    /// Slice of a dynamic variable at an absolute time index.
    pub fn dynamic_at(&self, index: usize) -> ArrayView2<'_, f64> {
        match &self.data {
            FieldData::Dynamic { values, .. } => values.index_axis(ndarray::Axis(0), index),
            _ => panic!("variable '{}' is not dynamic", self.name),
        }
    }

    pub fn static_values(&self) -> &Array2<f64> {
        match &self.data {
            FieldData::Static { values } => values,
            _ => panic!("variable '{}' is not static", self.name),
        }
    }

    pub fn climatology(&self) -> (&Array3<f64>, ClimatologyFrequency) {
        match &self.data {
            FieldData::Climatologic { values, frequency } => (values, *frequency),
            _ => panic!("variable '{}' is not climatologic", self.name),
        }
    }
}

/// A named collection of gridded variables, interrogable by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataSet {
    variables: IndexMap<String, DataVariable>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: DataVariable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&DataVariable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Read the given files and select `select` from each, inserting the
    /// variable under `name`.
    pub fn load(&mut self, name: &str, files: &[PathBuf], select: &str) -> ConfluenceResult<()> {
        for path in files {
            let file = FieldFile::read(path)?;
            if let Some(mut variable) = file.select(select) {
                variable.name = name.to_string();
                variable.filenames = files.to_vec();
                self.insert(variable);
                return Ok(());
            }
        }
        Err(ConfluenceError::Config(format!(
            "no field '{select}' found in files for variable '{name}'"
        )))
    }
}

/// On-disk container for one or more gridded variables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldFile {
    pub variables: Vec<DataVariable>,
}

impl FieldFile {
    pub fn new(variables: Vec<DataVariable>) -> Self {
        Self { variables }
    }

    pub fn select(&self, name: &str) -> Option<DataVariable> {
        self.variables.iter().find(|v| v.name == name).cloned()
    }

    pub fn read(path: &Path) -> ConfluenceResult<Self> {
        let file = File::open(path).map_err(|e| ConfluenceError::io(path, e))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
            ConfluenceError::Serialisation {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })
    }

    pub fn write(&self, path: &Path) -> ConfluenceResult<()> {
        let file = File::create(path).map_err(|e| ConfluenceError::io(path, e))?;
        bincode::serialize_into(BufWriter::new(file), self).map_err(|e| {
            ConfluenceError::Serialisation {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })
    }
}
