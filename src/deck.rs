//! Reader for the solver input deck's numeric variables.
//!
//! Only lines of the form `variable <name> equal <number>` are kept; anything
//! else, including variables defined by expressions, is ignored.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::bounds::BoxBounds;
use crate::error::{DumpError, DumpResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputDeck {
    variables: HashMap<String, f64>,
}

impl InputDeck {
    pub fn from_path<P: AsRef<Path>>(path: P) -> DumpResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            DumpError::Config(format!("cannot read input deck {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let variables = text
            .lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                match fields.as_slice() {
                    ["variable", name, "equal", value, ..] => {
                        value.parse::<f64>().ok().map(|v| (name.to_string(), v))
                    }
                    _ => None,
                }
            })
            .collect();
        Self { variables }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.variables.get(name).copied()
    }

    pub fn require(&self, name: &str) -> DumpResult<f64> {
        self.get(name)
            .ok_or_else(|| DumpError::Config(format!("input deck does not define `{name}`")))
    }

    /// Solver timestep size in seconds (`tstep`).
    pub fn timestep_size(&self) -> DumpResult<f64> {
        self.require("tstep")
    }

    /// Domain from `xmin`..`zmax`.
    pub fn domain_bounds(&self) -> DumpResult<BoxBounds> {
        let bounds = BoxBounds::new(
            (self.require("xmin")?, self.require("xmax")?),
            (self.require("ymin")?, self.require("ymax")?),
            (self.require("zmin")?, self.require("zmax")?),
        );
        bounds.map_err(|e| DumpError::Config(e.to_string()))
    }
}
