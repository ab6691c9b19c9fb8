#![forbid(unsafe_code)]

//! Inbound field validation. Runs before any file or process work so that a
//! rejected request never creates a workspace.

use std::collections::BTreeMap;

use bws_contracts::calc::{
    CalculationRequest, CancerRates, Population, MAX_MUTATION_FREQ, MIN_MUTATION_FREQ,
};
use bws_contracts::gene::GeneTable;
use bws_engines::config::CancerModelConfig;

pub const FIELD_PEDIGREE_DATA: &str = "pedigree_data";
pub const FIELD_MUT_FREQ: &str = "mut_freq";
pub const FIELD_CANCER_RATES: &str = "cancer_rates";
pub const FIELD_NON_FIELD: &str = "non_field_errors";

const REQUIRED: &str = "This field is required.";
const NOT_A_NUMBER: &str = "A valid number is required.";

/// Request fields as received, before any interpretation. Per-gene
/// `<gene>_mut_frequency` and `<gene>_mut_sensitivity` values live in
/// `gene_fields` keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCalculationInput {
    pub pedigree_data: Option<String>,
    pub mut_freq: Option<String>,
    pub cancer_rates: Option<String>,
    pub gene_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request validation failed")?;
        for (i, (field, messages)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{field}: {}", messages.join(" "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    pub pedigree_text: String,
    pub request: CalculationRequest,
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn required<'a>(value: Option<&'a str>, field: &str, errors: &mut ValidationErrors) -> Option<&'a str> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Some(v),
        None => {
            errors.add(field, REQUIRED);
            None
        }
    }
}

fn choice<T>(raw: &str, field: &str, parse: fn(&str) -> Option<T>, errors: &mut ValidationErrors) -> Option<T> {
    let parsed = parse(raw);
    if parsed.is_none() {
        errors.add(field, format!("\"{raw}\" is not a valid choice."));
    }
    parsed
}

fn resolve_frequencies(
    raw: &RawCalculationInput,
    population: Population,
    model: &CancerModelConfig,
    errors: &mut ValidationErrors,
) -> Option<GeneTable> {
    if population != Population::Custom {
        let preset = model.preset(population).cloned();
        if preset.is_none() {
            errors.add(
                FIELD_MUT_FREQ,
                format!("no preset for {} in model {}", population.as_str(), model.version),
            );
        }
        return preset;
    }

    let mut table = GeneTable::new();
    let before = errors.fields.len();
    for gene in model.panel.genes() {
        let field = gene.frequency_field();
        let Some(raw_value) = raw.gene_fields.get(&field) else {
            errors.add(&field, format!("{REQUIRED} Custom mutation frequencies need every gene."));
            continue;
        };
        let Some(value) = parse_number(raw_value) else {
            errors.add(&field, NOT_A_NUMBER);
            continue;
        };
        if !(MIN_MUTATION_FREQ..=MAX_MUTATION_FREQ).contains(&value) {
            errors.add(
                &field,
                format!(
                    "Ensure this value is between {MIN_MUTATION_FREQ} and {MAX_MUTATION_FREQ}."
                ),
            );
            continue;
        }
        table.insert(gene.clone(), value);
    }
    (errors.fields.len() == before).then_some(table)
}

fn resolve_sensitivities(
    raw: &RawCalculationInput,
    model: &CancerModelConfig,
    errors: &mut ValidationErrors,
) -> GeneTable {
    let mut table = model.default_sensitivities.clone();
    for gene in model.panel.genes() {
        let field = gene.sensitivity_field();
        let Some(raw_value) = raw.gene_fields.get(&field) else {
            continue;
        };
        match parse_number(raw_value) {
            Some(v) if (0.0..=1.0).contains(&v) => table.insert(gene.clone(), v),
            Some(_) => errors.add(&field, "Ensure this value is between 0 and 1."),
            None => errors.add(&field, NOT_A_NUMBER),
        }
    }
    table
}

/// Checks every inbound field against `model` and reports all failures at
/// once.
pub fn validate_input(
    raw: &RawCalculationInput,
    model: &CancerModelConfig,
) -> Result<ValidatedInput, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let pedigree_text = required(raw.pedigree_data.as_deref(), FIELD_PEDIGREE_DATA, &mut errors)
        .map(str::to_string);
    let population = match raw.mut_freq.as_deref().map(str::trim) {
        None | Some("") => Some(Population::Uk),
        Some(v) => choice(v, FIELD_MUT_FREQ, Population::parse, &mut errors),
    };
    let cancer_rates = required(raw.cancer_rates.as_deref(), FIELD_CANCER_RATES, &mut errors)
        .and_then(|v| choice(v, FIELD_CANCER_RATES, CancerRates::parse, &mut errors));

    let frequencies =
        population.and_then(|p| resolve_frequencies(raw, p, model, &mut errors));
    let sensitivities = resolve_sensitivities(raw, model, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }
    let (Some(pedigree_text), Some(population), Some(cancer_rates), Some(frequencies)) =
        (pedigree_text, population, cancer_rates, frequencies)
    else {
        errors.add(FIELD_NON_FIELD, "incomplete request");
        return Err(errors);
    };

    match CalculationRequest::v1(
        population,
        model.panel.clone(),
        frequencies,
        sensitivities,
        cancer_rates,
    ) {
        Ok(request) => Ok(ValidatedInput {
            pedigree_text,
            request,
        }),
        Err(violation) => {
            errors.add(FIELD_NON_FIELD, violation.to_string());
            Err(errors)
        }
    }
}
