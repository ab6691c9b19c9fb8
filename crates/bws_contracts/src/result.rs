#![forbid(unsafe_code)]

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::gene::GeneSymbol;

pub const NO_MUTATION_LABEL: &str = "no mutation";

/// One engine value, reported both as a fraction and as a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Probability {
    pub decimal: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationProbabilityResult {
    pub no_mutation: Probability,
    /// One entry per gene, in panel order.
    pub genes: Vec<(GeneSymbol, Probability)>,
}

impl MutationProbabilityResult {
    /// Number of entries in the serialized sequence: no-mutation plus genes.
    pub fn len(&self) -> usize {
        1 + self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn gene(&self, gene: &str) -> Option<Probability> {
        self.genes
            .iter()
            .find(|(g, _)| g.as_str() == gene)
            .map(|(_, p)| *p)
    }
}

struct LabelledProbability<'a>(&'a str, &'a Probability);

impl Serialize for LabelledProbability<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0, self.1)?;
        map.end()
    }
}

impl Serialize for MutationProbabilityResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        seq.serialize_element(&LabelledProbability(NO_MUTATION_LABEL, &self.no_mutation))?;
        for (gene, probability) in &self.genes {
            seq.serialize_element(&LabelledProbability(gene.as_str(), probability))?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CancerRiskRow {
    pub age: u16,
    #[serde(rename = "breast cancer risk")]
    pub breast_cancer_risk: Probability,
    #[serde(rename = "ovarian cancer risk")]
    pub ovarian_cancer_risk: Probability,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CancerRiskResult {
    pub rows: Vec<CancerRiskRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineResult {
    MutationProbability(MutationProbabilityResult),
    CancerRisk(CancerRiskResult),
}
