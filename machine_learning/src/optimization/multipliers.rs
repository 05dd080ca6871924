use std::{collections::HashMap, fs, path::Path};

use log::{info, warn};

use crate::{MlErr, Params, Result};

/// Per parameter learning rate multipliers.
///
/// Parameters without an entry use a multiplier of exactly `1.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LrMultipliers {
    table: HashMap<String, f32>,
    mismatches: usize,
}

impl LrMultipliers {
    /// Creates a table from `(name, multiplier)` pairs.
    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, f32)>,
    {
        Self {
            table: pairs.into_iter().map(|(n, m)| (n.into(), m)).collect(),
            mismatches: 0,
        }
    }

    /// Parses a multiplier file against the live parameters.
    ///
    /// Every non-empty line holds a `name value` pair. Line `i` is matched with the
    /// `i`-th parameter of `params`, a line whose name differs from that parameter
    /// is logged and the parameter keeps a multiplier of `1.0`.
    ///
    /// # Arguments
    /// * `text` - The multiplier file contents.
    /// * `params` - The live parameters, in declaration order.
    ///
    /// # Returns
    /// The table or `MlErr::InvalidMultiplier` if a line is malformed or its value is
    /// negative or not finite.
    pub fn parse(text: &str, params: &Params) -> Result<Self> {
        let pairs = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .map(|(lineno, line)| parse_line(lineno, line))
            .collect::<Result<Vec<_>>>()?;

        let mut multipliers = Self::default();

        for ((name, value), expected) in pairs.iter().zip(params.names()) {
            if name != expected {
                warn!("learning rate multiplier for '{name}' doesn't match the parameter '{expected}', using 1.0");
                multipliers.mismatches += 1;
                continue;
            }

            multipliers.table.insert(name.clone(), *value);
        }

        if pairs.len() != params.len() {
            warn!(
                "got {} learning rate multipliers for {} parameters, expected names: {:?}",
                pairs.len(),
                params.len(),
                params.names()
            );
            multipliers.mismatches += pairs.len().abs_diff(params.len());
        }

        info!(
            matched = multipliers.table.len(), mismatched = multipliers.mismatches;
            "loaded learning rate multipliers"
        );

        Ok(multipliers)
    }

    /// Reads and parses the multiplier file at `path`.
    pub fn load(path: &Path, params: &Params) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| MlErr::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&text, params)
    }

    /// The multiplier of the parameter called `name`.
    pub fn get(&self, name: &str) -> f32 {
        self.table.get(name).copied().unwrap_or(1.0)
    }

    /// The amount of explicit entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The amount of lines that couldn't be matched with a parameter while parsing.
    pub fn mismatches(&self) -> usize {
        self.mismatches
    }
}

fn parse_line(lineno: usize, line: &str) -> Result<(String, f32)> {
    let invalid = |reason: String| MlErr::InvalidMultiplier {
        line: lineno,
        reason,
    };

    let mut fields = line.split_whitespace();
    let (Some(name), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(invalid(format!("expected 'name value', got '{line}'")));
    };

    let value: f32 = value
        .parse()
        .map_err(|e| invalid(format!("invalid value '{value}': {e}")))?;

    if !value.is_finite() || value < 0. {
        return Err(invalid(format!("multiplier must be a non-negative number, got {value}")));
    }

    Ok((name.to_string(), value))
}
