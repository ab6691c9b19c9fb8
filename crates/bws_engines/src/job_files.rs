#![forbid(unsafe_code)]

//! Writers for the engine's two input files: the fixed-column pedigree data
//! file and the batch file that points at it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use bws_contracts::calc::{CalculationKind, CalculationRequest};
use bws_contracts::pedigree::{Family, Person, PersonId};
use bws_contracts::ContractViolation;

pub const PEDIGREE_FILE_FORMAT: &str = "##BWS engine pedigree file v1";
pub const BATCH_FILE_FORMAT: &str = "##BWS engine batch file v1";
const ID_WIDTH: usize = 13;

#[derive(Debug, thiserror::Error)]
pub enum JobFileError {
    #[error("cannot write job file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job parameters incomplete: {0}")]
    MissingValue(#[from] ContractViolation),
    #[error("family {family_id} has no target individual")]
    NoTarget { family_id: String },
}

/// Input and output file names of one engine invocation inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub kind: CalculationKind,
    pub pedigree_file: PathBuf,
    pub batch_file: PathBuf,
    output_stem: String,
}

impl JobFiles {
    /// File the engine writes its console transcript to (relative to the workspace).
    pub fn stdout_name(&self) -> String {
        format!("{}.stdout", self.output_stem)
    }

    /// File the engine writes its numeric result to (relative to the workspace).
    pub fn output_name(&self) -> String {
        format!("{}.out", self.output_stem)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobFileBuilder;

impl JobFileBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Writes `f<index>_<tag>.ped` and `f<index>_<tag>.bat` into `workspace`.
    /// The index keeps files of different families and kinds disjoint.
    pub fn write(
        &self,
        workspace: &Path,
        family_index: usize,
        family: &Family,
        kind: CalculationKind,
        request: &CalculationRequest,
    ) -> Result<JobFiles, JobFileError> {
        let stem = format!("f{family_index}_{}", kind.file_tag());
        let pedigree_name = format!("{stem}.ped");
        let pedigree_file = workspace.join(&pedigree_name);
        let batch_file = workspace.join(format!("{stem}.bat"));

        let pedigree_text = self.pedigree_text(family, kind, request)?;
        let batch_text = self.batch_text(&pedigree_name, kind, request)?;
        write_file(&pedigree_file, &pedigree_text)?;
        write_file(&batch_file, &batch_text)?;

        Ok(JobFiles {
            kind,
            pedigree_file,
            batch_file,
            output_stem: format!("f{family_index}_{}", kind.output_stem()),
        })
    }

    pub fn pedigree_text(
        &self,
        family: &Family,
        kind: CalculationKind,
        request: &CalculationRequest,
    ) -> Result<String, JobFileError> {
        if family.target().is_none() {
            return Err(JobFileError::NoTarget {
                family_id: family.id.as_str().to_string(),
            });
        }
        let mut out = String::new();
        let _ = writeln!(out, "{PEDIGREE_FILE_FORMAT} {}", kind.file_tag());
        let _ = writeln!(out, "{:>3} {}", family.size(), family.id.as_str());
        for person in &family.people {
            out.push_str(&person_record(person, kind, request));
            out.push('\n');
        }
        Ok(out)
    }

    pub fn batch_text(
        &self,
        pedigree_name: &str,
        kind: CalculationKind,
        request: &CalculationRequest,
    ) -> Result<String, JobFileError> {
        let frequencies = request
            .mutation_frequencies
            .ordered("mutation_frequency", &request.panel)?;
        let sensitivities = request
            .sensitivities
            .ordered("mutation_sensitivity", &request.panel)?;

        let mut out = String::new();
        let _ = writeln!(out, "{BATCH_FILE_FORMAT}");
        let _ = writeln!(out, "{pedigree_name}");
        let _ = writeln!(out, "{}", kind_code(kind));
        let _ = writeln!(out, "{}", request.panel.len());
        for ((gene, frequency), (_, sensitivity)) in frequencies.iter().zip(&sensitivities) {
            let _ = writeln!(out, "{:<8} {frequency} {sensitivity}", gene.as_str());
        }
        Ok(out)
    }
}

fn kind_code(kind: CalculationKind) -> u8 {
    match kind {
        CalculationKind::MutationProbability => 1,
        CalculationKind::CancerRisk => 2,
    }
}

fn age_column(age: Option<u16>, width: usize) -> String {
    format!("{:>width$}", age.unwrap_or(0))
}

fn person_record(person: &Person, kind: CalculationKind, request: &CalculationRequest) -> String {
    let parent = |p: &Option<PersonId>| {
        p.as_ref().map_or("0", |id| id.as_str()).to_string()
    };
    let mut line = format!(
        "{:>ID_WIDTH$} {:>ID_WIDTH$} {:>ID_WIDTH$} {} {} {} {} {} {}",
        person.id.as_str(),
        parent(&person.father),
        parent(&person.mother),
        person.sex.code(),
        u8::from(person.target),
        person.mz_twin.unwrap_or('0'),
        u8::from(person.dead),
        age_column(person.age, 3),
        age_column(person.year_of_birth, 4),
    );
    for diagnosis in person.cancers.in_engine_order() {
        line.push(' ');
        line.push_str(&age_column(diagnosis, 3));
    }
    let _ = write!(line, " {}", u8::from(person.ashkenazi));
    for gene in request.panel.genes() {
        let test = person.gene_test(gene);
        let _ = write!(line, " {}{}", test.test_type.code(), test.result.code());
    }
    if kind == CalculationKind::CancerRisk {
        line.push(' ');
        for marker in person.pathology.in_engine_order() {
            line.push(marker.code());
        }
    }
    line
}

fn write_file(path: &Path, contents: &str) -> Result<(), JobFileError> {
    std::fs::write(path, contents).map_err(|source| JobFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pedigree_file::tests::TRIO;
    use crate::pedigree_file::BoadiceaPedigreeParser;
    use bws_contracts::calc::{CancerRates, Population};
    use bws_contracts::gene::{GenePanel, GeneTable};

    fn request() -> CalculationRequest {
        CalculationRequest::v1(
            Population::Uk,
            GenePanel::from_symbols(&["BRCA2", "BRCA1", "BARD1"]).unwrap(),
            GeneTable::from_pairs(&[("BRCA1", 0.0006394), ("BRCA2", 0.00102), ("BARD1", 0.00043)])
                .unwrap(),
            GeneTable::from_pairs(&[("BRCA1", 0.89), ("BRCA2", 0.96), ("BARD1", 0.89)]).unwrap(),
            CancerRates::Uk,
        )
        .unwrap()
    }

    fn family() -> Family {
        BoadiceaPedigreeParser::new(275)
            .parse(TRIO)
            .unwrap()
            .families()[0]
            .clone()
    }

    #[test]
    fn batch_file_lists_genes_in_panel_order() {
        let text = JobFileBuilder::new()
            .batch_text("f0_prob.ped", CalculationKind::MutationProbability, &request())
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "f0_prob.ped");
        assert_eq!(lines[2], "1");
        assert_eq!(lines[3], "3");
        assert_eq!(lines[4], "BRCA2    0.00102 0.96");
        assert_eq!(lines[5], "BRCA1    0.0006394 0.89");
        assert_eq!(lines[6], "BARD1    0.00043 0.89");
    }

    #[test]
    fn pedigree_record_has_fixed_columns() {
        let text = JobFileBuilder::new()
            .pedigree_text(&family(), CalculationKind::MutationProbability, &request())
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "  3 XXX");
        let mother: Vec<&str> = lines[3].split_whitespace().collect();
        assert_eq!(&mother[..5], &["f1", "0", "0", "F", "0"]);
        // bc1 age, then BRCA2, BRCA1, BARD1 test columns
        assert_eq!(mother[9], "51");
        assert_eq!(&mother[15..], &["00", "SN", "00"]);
        assert!(lines[3].starts_with("           f1"));
    }

    #[test]
    fn risk_pedigree_adds_pathology_columns() {
        let text = JobFileBuilder::new()
            .pedigree_text(&family(), CalculationKind::CancerRisk, &request())
            .unwrap();
        let mother = text.lines().nth(3).unwrap();
        assert!(mother.ends_with(" P0000"));
        let prob = JobFileBuilder::new()
            .pedigree_text(&family(), CalculationKind::MutationProbability, &request())
            .unwrap();
        assert!(prob.lines().nth(3).unwrap().ends_with(" 00"));
    }

    #[test]
    fn missing_sensitivity_fails_loudly() {
        let mut req = request();
        req.sensitivities = GeneTable::from_pairs(&[("BRCA1", 0.89)]).unwrap();
        let err = JobFileBuilder::new()
            .batch_text("f0_prob.ped", CalculationKind::CancerRisk, &req)
            .unwrap_err();
        assert!(matches!(
            err,
            JobFileError::MissingValue(ContractViolation::MissingGeneValue { .. })
        ));
    }

    #[test]
    fn write_creates_disjoint_files_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let builder = JobFileBuilder::new();
        let prob = builder
            .write(dir.path(), 0, &family(), CalculationKind::MutationProbability, &request())
            .unwrap();
        let risk = builder
            .write(dir.path(), 0, &family(), CalculationKind::CancerRisk, &request())
            .unwrap();
        assert_ne!(prob.pedigree_file, risk.pedigree_file);
        assert!(prob.batch_file.is_file());
        assert!(risk.pedigree_file.is_file());
        assert_eq!(prob.output_name(), "f0_can_probs.out");
        assert_eq!(risk.stdout_name(), "f0_can_risks.stdout");
    }
}
