#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::common::validate_probability;
use crate::{ContractViolation, Validate};

pub const GENE_SYMBOL_MAX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeneSymbol(String);

impl GeneSymbol {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case stem used to build inbound field names, e.g. `brca1`.
    pub fn field_stem(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn frequency_field(&self) -> String {
        format!("{}_mut_frequency", self.field_stem())
    }

    pub fn sensitivity_field(&self) -> String {
        format!("{}_mut_sensitivity", self.field_stem())
    }
}

impl Validate for GeneSymbol {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() || self.0.len() > GENE_SYMBOL_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "gene_symbol",
                reason: "must be 1..=16 characters",
            });
        }
        if !self
            .0
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(ContractViolation::InvalidValue {
                field: "gene_symbol",
                reason: "must be upper-case ASCII letters and digits",
            });
        }
        Ok(())
    }
}

impl fmt::Display for GeneSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for GeneSymbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Genes in the order the engine's pedigree file expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenePanel {
    genes: Vec<GeneSymbol>,
}

impl GenePanel {
    pub fn new(genes: Vec<GeneSymbol>) -> Result<Self, ContractViolation> {
        let v = Self { genes };
        v.validate()?;
        Ok(v)
    }

    pub fn from_symbols(symbols: &[&str]) -> Result<Self, ContractViolation> {
        let genes = symbols
            .iter()
            .map(|s| GeneSymbol::new(*s))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(genes)
    }

    pub fn genes(&self) -> &[GeneSymbol] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn contains(&self, gene: &GeneSymbol) -> bool {
        self.genes.contains(gene)
    }
}

impl Validate for GenePanel {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.genes.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gene_panel",
                reason: "must list at least one gene",
            });
        }
        for (i, gene) in self.genes.iter().enumerate() {
            gene.validate()?;
            if self.genes[..i].contains(gene) {
                return Err(ContractViolation::InvalidValue {
                    field: "gene_panel",
                    reason: "genes must be unique",
                });
            }
        }
        Ok(())
    }
}

/// Per-gene probability values (mutation frequencies or test sensitivities).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneTable {
    values: BTreeMap<GeneSymbol, f64>,
}

impl GeneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Result<Self, ContractViolation> {
        let mut table = Self::new();
        for (gene, value) in pairs {
            table.insert(GeneSymbol::new(*gene)?, *value);
        }
        Ok(table)
    }

    pub fn insert(&mut self, gene: GeneSymbol, value: f64) {
        self.values.insert(gene, value);
    }

    pub fn get(&self, gene: &GeneSymbol) -> Option<f64> {
        self.values.get(gene).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GeneSymbol, f64)> {
        self.values.iter().map(|(g, v)| (g, *v))
    }

    /// Values in panel order; every panel gene must be present.
    pub fn ordered(
        &self,
        field: &'static str,
        panel: &GenePanel,
    ) -> Result<Vec<(GeneSymbol, f64)>, ContractViolation> {
        panel
            .genes()
            .iter()
            .map(|gene| {
                self.get(gene)
                    .map(|v| (gene.clone(), v))
                    .ok_or_else(|| ContractViolation::MissingGeneValue {
                        field,
                        gene: gene.to_string(),
                    })
            })
            .collect()
    }

    pub fn validate_range(
        &self,
        field: &'static str,
        min: f64,
        max: f64,
    ) -> Result<(), ContractViolation> {
        for (_, value) in self.iter() {
            validate_probability(field, value, min, max)?;
        }
        Ok(())
    }
}

impl Serialize for GeneTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.values.iter().map(|(g, v)| (g.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gene_symbol_rejects_lower_case_and_blank() {
        assert!(GeneSymbol::new("BRCA1").is_ok());
        assert!(GeneSymbol::new("brca1").is_err());
        assert!(GeneSymbol::new("").is_err());
    }

    #[test]
    fn gene_symbol_builds_inbound_field_names() {
        let gene = GeneSymbol::new("RAD51C").unwrap();
        assert_eq!(gene.frequency_field(), "rad51c_mut_frequency");
        assert_eq!(gene.sensitivity_field(), "rad51c_mut_sensitivity");
    }

    #[test]
    fn panel_rejects_duplicates() {
        assert!(GenePanel::from_symbols(&["BRCA1", "BRCA2"]).is_ok());
        assert!(GenePanel::from_symbols(&["BRCA1", "BRCA1"]).is_err());
        assert!(GenePanel::from_symbols(&[]).is_err());
    }

    #[test]
    fn ordered_follows_panel_not_insertion_order() {
        let panel = GenePanel::from_symbols(&["BRCA2", "BRCA1"]).unwrap();
        let table = GeneTable::from_pairs(&[("BRCA1", 0.1), ("BRCA2", 0.2)]).unwrap();
        let ordered = table.ordered("mutation_frequency", &panel).unwrap();
        assert_eq!(ordered[0].0.as_str(), "BRCA2");
        assert_eq!(ordered[1].1, 0.1);
    }

    #[test]
    fn ordered_reports_missing_gene() {
        let panel = GenePanel::from_symbols(&["BRCA1", "PALB2"]).unwrap();
        let table = GeneTable::from_pairs(&[("BRCA1", 0.1)]).unwrap();
        let err = table.ordered("mutation_frequency", &panel).unwrap_err();
        assert_eq!(
            err,
            ContractViolation::MissingGeneValue {
                field: "mutation_frequency",
                gene: "PALB2".to_string()
            }
        );
    }

    #[test]
    fn validate_range_flags_out_of_bounds_values() {
        let table = GeneTable::from_pairs(&[("BRCA1", 1.5)]).unwrap();
        assert!(table.validate_range("mutation_sensitivity", 0.0, 1.0).is_err());
        let table = GeneTable::from_pairs(&[("BRCA1", f64::NAN)]).unwrap();
        assert!(matches!(
            table.validate_range("mutation_sensitivity", 0.0, 1.0),
            Err(ContractViolation::NotFinite { .. })
        ));
    }
}
