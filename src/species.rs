//! Species id → molecular mass lookup.
//!
//! Species files list one species per non-comment line; the second field is
//! the molecular weight in g/mol. Ids are assigned from 1 in file order, which
//! is how the solver numbers particle `type` values.

use std::fs;
use std::path::Path;

use crate::error::{DumpError, DumpResult};

/// Kilograms per atomic mass unit.
pub const AMU_KG: f64 = 1.66054e-27;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesTable {
    names: Vec<String>,
    masses_kg: Vec<f64>,
}

impl SpeciesTable {
    /// Table from masses already in kilograms; ids start at 1.
    pub fn from_masses(masses_kg: Vec<f64>) -> Self {
        let names = (1..=masses_kg.len()).map(|id| format!("species{id}")).collect();
        Self { names, masses_kg }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> DumpResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            DumpError::Config(format!("cannot read species file {}: {e}", path.display()))
        })?;
        let table = Self::parse(&text)
            .map_err(|e| DumpError::Config(format!("{}: {e}", path.display())))?;
        log::info!("Loaded {} species from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn parse(text: &str) -> DumpResult<Self> {
        let mut names = Vec::new();
        let mut masses_kg = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let name = fields.next().unwrap_or_default();
            let weight = fields
                .next()
                .and_then(|w| w.parse::<f64>().ok())
                .filter(|w| w.is_finite() && *w > 0.0)
                .ok_or_else(|| {
                    DumpError::Config(format!(
                        "line {}: expected a positive molecular weight after `{name}`",
                        line_no + 1
                    ))
                })?;
            names.push(name.to_string());
            masses_kg.push(weight * AMU_KG);
        }

        if masses_kg.is_empty() {
            return Err(DumpError::Config("species table has no entries".into()));
        }
        Ok(Self { names, masses_kg })
    }

    pub fn len(&self) -> usize {
        self.masses_kg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses_kg.is_empty()
    }

    pub fn mass(&self, id: i64) -> DumpResult<f64> {
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|idx| self.masses_kg.get(idx))
            .copied()
            .ok_or(DumpError::UnknownSpecies(id))
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.names.get(idx).map(String::as_str)
    }
}
