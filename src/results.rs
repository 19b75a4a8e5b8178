//! Tabular dispatch output: one row per time step, one column per
//! (component, resource, direction) plus per-storage level columns, with the
//! solved objective carried both as a scalar and repeated across rows.

use indexmap::IndexMap;
use serde::Serialize;
use std::io;
use strum::Display;

/// Direction of a flow column relative to its component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum FlowDirection {
    Produces,
    Consumes,
}

/// `{component}_{resource}_{produces|consumes}`, the naming convention
/// downstream result consumers rely on.
pub fn flow_column(component: &str, resource: &str, direction: FlowDirection) -> String {
    format!("{component}_{resource}_{direction}")
}

pub fn soc_column(component: &str) -> String {
    format!("{component}_SOC")
}

pub fn charge_column(component: &str) -> String {
    format!("{component}_charge")
}

pub fn discharge_column(component: &str) -> String {
    format!("{component}_discharge")
}

/// The solved dispatch as a column-keyed table. Columns keep insertion
/// order, which follows component registration order.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchResults {
    time_index: Vec<f64>,
    columns: IndexMap<String, Vec<f64>>,
    objective: f64,
}

impl DispatchResults {
    pub(crate) fn new(time_index: Vec<f64>, objective: f64) -> Self {
        Self {
            time_index,
            columns: IndexMap::new(),
            objective,
        }
    }

    pub(crate) fn insert_column(&mut self, name: String, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.time_index.len());
        self.columns.insert(name, values);
    }

    pub fn time_index(&self) -> &[f64] {
        &self.time_index
    }

    /// Number of time steps (rows).
    pub fn len(&self) -> usize {
        self.time_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_index.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// The solved objective as a scalar; the same value repeats in the
    /// `objective` column of every serialized row.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Serialize the table as CSV: a `time` column, every dispatch column in
    /// insertion order, and a trailing `objective` column repeated per row.
    pub fn to_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        let header = std::iter::once("time")
            .chain(self.columns.keys().map(String::as_str))
            .chain(std::iter::once("objective"));
        csv.write_record(header)?;
        for (t, time) in self.time_index.iter().enumerate() {
            let row = std::iter::once(time.to_string())
                .chain(self.columns.values().map(|series| series[t].to_string()))
                .chain(std::iter::once(self.objective.to_string()));
            csv.write_record(row)?;
        }
        csv.flush()?;
        Ok(())
    }
}
