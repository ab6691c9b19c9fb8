#![forbid(unsafe_code)]

use crate::gene::{GenePanel, GeneTable};
use crate::{ContractViolation, Validate};

/// Smallest custom mutation frequency accepted; zero would make any observed
/// carrier inconsistent.
pub const MIN_MUTATION_FREQ: f64 = 0.0001;
/// Largest custom mutation frequency accepted (Ashkenazi BRCA1).
pub const MAX_MUTATION_FREQ: f64 = 0.008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalculationKind {
    MutationProbability,
    CancerRisk,
}

impl CalculationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationKind::MutationProbability => "mutation_probability",
            CalculationKind::CancerRisk => "cancer_risk",
        }
    }

    /// Short tag used in job file names.
    pub fn file_tag(self) -> &'static str {
        match self {
            CalculationKind::MutationProbability => "prob",
            CalculationKind::CancerRisk => "risk",
        }
    }

    /// Stem of the engine's `.stdout` and `.out` files.
    pub fn output_stem(self) -> &'static str {
        match self {
            CalculationKind::MutationProbability => "can_probs",
            CalculationKind::CancerRisk => "can_risks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Population {
    Uk,
    Ashkenazi,
    Iceland,
    Custom,
}

impl Population {
    pub const ALL: [Population; 4] = [
        Population::Uk,
        Population::Ashkenazi,
        Population::Iceland,
        Population::Custom,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|p| p.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Population::Uk => "UK",
            Population::Ashkenazi => "Ashkenazi",
            Population::Iceland => "Iceland",
            Population::Custom => "Custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancerRates {
    Uk,
    Australia,
    Canada,
    Usa,
    Denmark,
    Estonia,
    Finland,
    France,
    Iceland,
    Netherlands,
    NewZealand,
    Norway,
    Slovenia,
    Spain,
    Sweden,
    Other,
}

impl CancerRates {
    pub const ALL: [CancerRates; 16] = [
        CancerRates::Uk,
        CancerRates::Australia,
        CancerRates::Canada,
        CancerRates::Usa,
        CancerRates::Denmark,
        CancerRates::Estonia,
        CancerRates::Finland,
        CancerRates::France,
        CancerRates::Iceland,
        CancerRates::Netherlands,
        CancerRates::NewZealand,
        CancerRates::Norway,
        CancerRates::Slovenia,
        CancerRates::Spain,
        CancerRates::Sweden,
        CancerRates::Other,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }

    /// Display name accepted on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            CancerRates::Uk => "UK",
            CancerRates::Australia => "Australia",
            CancerRates::Canada => "Canada",
            CancerRates::Usa => "USA",
            CancerRates::Denmark => "Denmark",
            CancerRates::Estonia => "Estonia",
            CancerRates::Finland => "Finland",
            CancerRates::France => "France",
            CancerRates::Iceland => "Iceland",
            CancerRates::Netherlands => "Netherlands",
            CancerRates::NewZealand => "New-Zealand",
            CancerRates::Norway => "Norway",
            CancerRates::Slovenia => "Slovenia",
            CancerRates::Spain => "Spain",
            CancerRates::Sweden => "Sweden",
            CancerRates::Other => "Other",
        }
    }

    /// Stem of the engine's incidence file, `incidences_<stem>.nml`. Also the
    /// table name reported back to the caller.
    pub fn file_stem(self) -> &'static str {
        match self {
            CancerRates::NewZealand => "New_Zealand",
            CancerRates::Other => "UK",
            other => other.as_str(),
        }
    }
}

/// Resolved parameters shared by every calculation of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationRequest {
    pub population: Population,
    pub panel: GenePanel,
    pub mutation_frequencies: GeneTable,
    pub sensitivities: GeneTable,
    pub cancer_rates: CancerRates,
}

impl CalculationRequest {
    pub fn v1(
        population: Population,
        panel: GenePanel,
        mutation_frequencies: GeneTable,
        sensitivities: GeneTable,
        cancer_rates: CancerRates,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            population,
            panel,
            mutation_frequencies,
            sensitivities,
            cancer_rates,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for CalculationRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.panel.validate()?;
        self.mutation_frequencies
            .ordered("calculation_request.mutation_frequencies", &self.panel)?;
        self.sensitivities
            .ordered("calculation_request.sensitivities", &self.panel)?;
        self.mutation_frequencies
            .validate_range("calculation_request.mutation_frequencies", 0.0, 1.0)?;
        self.sensitivities
            .validate_range("calculation_request.sensitivities", 0.0, 1.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> GenePanel {
        GenePanel::from_symbols(&["BRCA1", "BRCA2"]).unwrap()
    }

    #[test]
    fn population_parse_is_exact() {
        assert_eq!(Population::parse("UK"), Some(Population::Uk));
        assert_eq!(Population::parse(" Custom "), Some(Population::Custom));
        assert_eq!(Population::parse("uk"), None);
        assert_eq!(Population::parse("Finland"), None);
    }

    #[test]
    fn cancer_rates_map_to_incidence_file_stems() {
        assert_eq!(
            CancerRates::parse("New-Zealand").map(CancerRates::file_stem),
            Some("New_Zealand")
        );
        assert_eq!(CancerRates::Other.file_stem(), "UK");
        assert_eq!(CancerRates::Usa.file_stem(), "USA");
        assert_eq!(CancerRates::parse("Mars"), None);
    }

    #[test]
    fn request_requires_every_panel_gene() {
        let freqs = GeneTable::from_pairs(&[("BRCA1", 0.001)]).unwrap();
        let sens = GeneTable::from_pairs(&[("BRCA1", 0.9), ("BRCA2", 0.9)]).unwrap();
        let err = CalculationRequest::v1(Population::Custom, panel(), freqs, sens, CancerRates::Uk)
            .unwrap_err();
        assert!(matches!(err, ContractViolation::MissingGeneValue { gene, .. } if gene == "BRCA2"));
    }

    #[test]
    fn request_rejects_sensitivity_above_one() {
        let freqs = GeneTable::from_pairs(&[("BRCA1", 0.001), ("BRCA2", 0.001)]).unwrap();
        let sens = GeneTable::from_pairs(&[("BRCA1", 1.2), ("BRCA2", 0.9)]).unwrap();
        assert!(
            CalculationRequest::v1(Population::Uk, panel(), freqs, sens, CancerRates::Uk).is_err()
        );
    }

    #[test]
    fn kind_names_are_distinct() {
        assert_ne!(
            CalculationKind::MutationProbability.output_stem(),
            CalculationKind::CancerRisk.output_stem()
        );
        assert_eq!(CalculationKind::CancerRisk.file_tag(), "risk");
    }
}
