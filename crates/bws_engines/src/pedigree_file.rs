#![forbid(unsafe_code)]

//! Reader for the BOADICEA import pedigree file format 4.0.
//!
//! One person per line, 32 whitespace-separated columns:
//! `FamID Name Target IndivID FathID MothID Sex MZtwin Dead Age Yob 1stBrCa
//! 2ndBrCa OvCa ProCa PanCa Ashkn BRCA1t BRCA1r BRCA2t BRCA2r PALB2t PALB2r
//! ATMt ATMr CHEK2t CHEK2r ER PR HER2 CK14 CK56`.

use std::collections::BTreeMap;

use bws_contracts::gene::GeneSymbol;
use bws_contracts::pedigree::{
    CancerDiagnoses, Family, FamilyId, GeneTest, GeneTestResult, GeneTestType, Pathology,
    PathologyResult, PedigreeSet, Person, PersonId, Sex, MAX_AGE, MIN_YEAR_OF_BIRTH,
};
use bws_contracts::ContractViolation;

pub const FORMAT_HEADER: &str = "##BOADICEA import pedigree file format 4.0";
pub const FORMAT_FOUR_DATA_FIELDS: usize = 32;
pub const UNIQUE_TWIN_IDS: [char; 10] = ['1', '2', '3', '4', '5', '6', '7', '8', '9', 'A'];

/// Gene test columns as laid out in the file (not the engine's panel order).
const FILE_GENES: [&str; 5] = ["BRCA1", "BRCA2", "PALB2", "ATM", "CHEK2"];
const FIRST_GENE_COLUMN: usize = 17;
const FIRST_PATHOLOGY_COLUMN: usize = 27;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PedigreeError {
    #[error("pedigree data is empty")]
    Empty,
    #[error("unsupported pedigree format, expected header '{FORMAT_HEADER}'")]
    UnsupportedFormat,
    #[error("line {line}: expected {expected} fields, found {got}")]
    FieldCount {
        line: usize,
        expected: usize,
        got: usize,
    },
    #[error("line {line}: invalid {column} '{value}': {reason}")]
    InvalidField {
        line: usize,
        column: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("family {family_id}: {reason}")]
    Family { family_id: String, reason: String },
    #[error("family {family_id}: {size} people exceeds the maximum pedigree size of {max}")]
    TooLarge {
        family_id: String,
        size: usize,
        max: usize,
    },
    #[error("family {family_id}: {violation}")]
    Contract {
        family_id: String,
        violation: ContractViolation,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct BoadiceaPedigreeParser {
    max_pedigree_size: usize,
}

impl BoadiceaPedigreeParser {
    pub fn new(max_pedigree_size: usize) -> Self {
        Self { max_pedigree_size }
    }

    pub fn max_pedigree_size(&self) -> usize {
        self.max_pedigree_size
    }

    pub fn parse(&self, text: &str) -> Result<PedigreeSet, PedigreeError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let Some((_, header)) = lines.next() else {
            return Err(PedigreeError::Empty);
        };
        if !is_supported_header(header) {
            return Err(PedigreeError::UnsupportedFormat);
        }

        let mut order: Vec<String> = Vec::new();
        let mut grouped: BTreeMap<String, Vec<(usize, Person)>> = BTreeMap::new();
        let mut warnings = Vec::new();
        for (line_no, line) in lines {
            if line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != FORMAT_FOUR_DATA_FIELDS {
                return Err(PedigreeError::FieldCount {
                    line: line_no,
                    expected: FORMAT_FOUR_DATA_FIELDS,
                    got: fields.len(),
                });
            }
            let family_id = FamilyId::new(fields[0]).map_err(|_| PedigreeError::InvalidField {
                line: line_no,
                column: "FamID",
                value: fields[0].to_string(),
                reason: "must be 1-7 characters",
            })?;
            let person = parse_person(line_no, &fields, &mut warnings)?;
            let key = family_id.as_str().to_string();
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped.entry(key).or_default().push((line_no, person));
        }

        if order.is_empty() {
            return Err(PedigreeError::Empty);
        }

        let mut families = Vec::with_capacity(order.len());
        for key in order {
            let people = grouped.remove(&key).unwrap_or_default();
            families.push(self.build_family(&key, people)?);
        }
        PedigreeSet::v1(text.to_string(), families, warnings).map_err(|violation| {
            PedigreeError::Contract {
                family_id: "*".to_string(),
                violation,
            }
        })
    }

    fn build_family(
        &self,
        family_id: &str,
        people: Vec<(usize, Person)>,
    ) -> Result<Family, PedigreeError> {
        let family_err = |reason: String| PedigreeError::Family {
            family_id: family_id.to_string(),
            reason,
        };
        if people.len() > self.max_pedigree_size {
            return Err(PedigreeError::TooLarge {
                family_id: family_id.to_string(),
                size: people.len(),
                max: self.max_pedigree_size,
            });
        }

        let sexes: BTreeMap<&PersonId, Sex> = people.iter().map(|(_, p)| (&p.id, p.sex)).collect();
        if sexes.len() != people.len() {
            return Err(family_err("individual ids must be unique".to_string()));
        }
        for (line_no, person) in &people {
            for (parent, expected, role) in [
                (&person.father, Sex::Male, "father"),
                (&person.mother, Sex::Female, "mother"),
            ] {
                let Some(parent) = parent else { continue };
                if parent == &person.id {
                    return Err(family_err(format!(
                        "line {line_no}: {} is listed as their own {role}",
                        person.id.as_str()
                    )));
                }
                match sexes.get(parent) {
                    None => {
                        return Err(family_err(format!(
                            "line {line_no}: {role} {} of {} is not in the pedigree",
                            parent.as_str(),
                            person.id.as_str()
                        )))
                    }
                    Some(sex) if *sex != expected => {
                        return Err(family_err(format!(
                            "line {line_no}: {role} {} of {} has the wrong sex",
                            parent.as_str(),
                            person.id.as_str()
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        let targets = people.iter().filter(|(_, p)| p.target).count();
        if targets != 1 {
            return Err(family_err(format!(
                "exactly one target is required, found {targets}"
            )));
        }

        let id = FamilyId::new(family_id).map_err(|violation| PedigreeError::Contract {
            family_id: family_id.to_string(),
            violation,
        })?;
        Family::v1(id, people.into_iter().map(|(_, p)| p).collect()).map_err(|violation| {
            PedigreeError::Contract {
                family_id: family_id.to_string(),
                violation,
            }
        })
    }
}

fn is_supported_header(header: &str) -> bool {
    header
        .to_ascii_lowercase()
        .starts_with(&FORMAT_HEADER.to_ascii_lowercase())
}

fn invalid(line: usize, column: &'static str, value: &str, reason: &'static str) -> PedigreeError {
    PedigreeError::InvalidField {
        line,
        column,
        value: value.to_string(),
        reason,
    }
}

fn parse_flag(line: usize, column: &'static str, value: &str) -> Result<bool, PedigreeError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(invalid(line, column, value, "must be 0 or 1")),
    }
}

/// `0` means unknown.
fn parse_optional_number(
    line: usize,
    column: &'static str,
    value: &str,
    min: u16,
    max: u16,
) -> Result<Option<u16>, PedigreeError> {
    let n = value
        .parse::<u16>()
        .map_err(|_| invalid(line, column, value, "must be a whole number"))?;
    if n == 0 {
        return Ok(None);
    }
    if n < min || n > max {
        return Err(invalid(line, column, value, "out of range"));
    }
    Ok(Some(n))
}

fn parse_parent(line: usize, column: &'static str, value: &str) -> Result<Option<PersonId>, PedigreeError> {
    if value == "0" {
        return Ok(None);
    }
    PersonId::new(value)
        .map(Some)
        .map_err(|_| invalid(line, column, value, "must be 0 or an individual id"))
}

fn parse_test_type(line: usize, column: &'static str, value: &str) -> Result<GeneTestType, PedigreeError> {
    match value {
        "0" => Ok(GeneTestType::Untested),
        "S" => Ok(GeneTestType::MutationSearch),
        "T" => Ok(GeneTestType::DirectTest),
        _ => Err(invalid(line, column, value, "must be 0, S or T")),
    }
}

fn parse_test_result(
    line: usize,
    column: &'static str,
    value: &str,
) -> Result<GeneTestResult, PedigreeError> {
    match value {
        "0" => Ok(GeneTestResult::Untested),
        "P" => Ok(GeneTestResult::Positive),
        "N" => Ok(GeneTestResult::Negative),
        _ => Err(invalid(line, column, value, "must be 0, P or N")),
    }
}

fn parse_pathology(
    line: usize,
    column: &'static str,
    value: &str,
) -> Result<PathologyResult, PedigreeError> {
    match value {
        "0" => Ok(PathologyResult::Unknown),
        "N" => Ok(PathologyResult::Negative),
        "P" => Ok(PathologyResult::Positive),
        _ => Err(invalid(line, column, value, "must be 0, N or P")),
    }
}

fn parse_person(
    line: usize,
    f: &[&str],
    warnings: &mut Vec<String>,
) -> Result<Person, PedigreeError> {
    let target = parse_flag(line, "Target", f[2])?;
    let id = PersonId::new(f[3])
        .map_err(|_| invalid(line, "IndivID", f[3], "must be 1-13 characters and not 0"))?;
    let father = parse_parent(line, "FathID", f[4])?;
    let mother = parse_parent(line, "MothID", f[5])?;
    if father.is_some() != mother.is_some() {
        return Err(invalid(
            line,
            "FathID/MothID",
            &format!("{}/{}", f[4], f[5]),
            "both parents or neither must be given",
        ));
    }
    let sex = match f[6] {
        "F" => Sex::Female,
        "M" => Sex::Male,
        other => return Err(invalid(line, "Sex", other, "must be F or M")),
    };
    let mz_twin = match f[7] {
        "0" => None,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if UNIQUE_TWIN_IDS.contains(&c) => Some(c),
                _ => return Err(invalid(line, "MZtwin", other, "must be 0, 1-9 or A")),
            }
        }
    };
    let dead = parse_flag(line, "Dead", f[8])?;
    let age = parse_optional_number(line, "Age", f[9], 1, MAX_AGE)?;
    let year_of_birth = parse_optional_number(line, "Yob", f[10], MIN_YEAR_OF_BIRTH, 2100)?;
    let cancers = CancerDiagnoses {
        first_breast: parse_optional_number(line, "1stBrCa", f[11], 1, MAX_AGE)?,
        second_breast: parse_optional_number(line, "2ndBrCa", f[12], 1, MAX_AGE)?,
        ovarian: parse_optional_number(line, "OvCa", f[13], 1, MAX_AGE)?,
        prostate: parse_optional_number(line, "ProCa", f[14], 1, MAX_AGE)?,
        pancreatic: parse_optional_number(line, "PanCa", f[15], 1, MAX_AGE)?,
    };
    if cancers.second_breast.is_some() && cancers.first_breast.is_none() {
        return Err(invalid(
            line,
            "2ndBrCa",
            f[12],
            "contralateral breast cancer requires a first breast cancer",
        ));
    }
    if let (Some(first), Some(second)) = (cancers.first_breast, cancers.second_breast) {
        if second < first {
            return Err(invalid(line, "2ndBrCa", f[12], "precedes first breast cancer"));
        }
    }
    if let Some(age) = age {
        if cancers.in_engine_order().into_iter().flatten().any(|d| d > age) {
            return Err(invalid(line, "Age", f[9], "is below a cancer diagnosis age"));
        }
    }
    if sex == Sex::Male && cancers.ovarian.is_some() {
        return Err(invalid(line, "OvCa", f[13], "recorded for a male"));
    }
    if sex == Sex::Female && cancers.prostate.is_some() {
        return Err(invalid(line, "ProCa", f[14], "recorded for a female"));
    }
    let ashkenazi = parse_flag(line, "Ashkn", f[16])?;

    let mut gene_tests = BTreeMap::new();
    for (i, gene) in FILE_GENES.iter().enumerate() {
        let column = FIRST_GENE_COLUMN + 2 * i;
        let test = GeneTest {
            test_type: parse_test_type(line, "gene test type", f[column])?,
            result: parse_test_result(line, "gene test result", f[column + 1])?,
        };
        if (test.test_type == GeneTestType::Untested) != (test.result == GeneTestResult::Untested) {
            return Err(invalid(
                line,
                "gene test",
                &format!("{} {}", f[column], f[column + 1]),
                "type and result must both be given or both be 0",
            ));
        }
        let symbol = GeneSymbol::new(*gene).map_err(|violation| PedigreeError::Contract {
            family_id: f[0].to_string(),
            violation,
        })?;
        gene_tests.insert(symbol, test);
    }

    let p = FIRST_PATHOLOGY_COLUMN;
    let pathology = Pathology {
        er: parse_pathology(line, "ER", f[p])?,
        pr: parse_pathology(line, "PR", f[p + 1])?,
        her2: parse_pathology(line, "HER2", f[p + 2])?,
        ck14: parse_pathology(line, "CK14", f[p + 3])?,
        ck56: parse_pathology(line, "CK56", f[p + 4])?,
    };
    if pathology != Pathology::default() && cancers.first_breast.is_none() {
        warnings.push(format!(
            "family {} individual {}: pathology given without a breast cancer diagnosis",
            f[0], f[3]
        ));
    }

    if age.is_none() && !dead {
        warnings.push(format!(
            "family {} individual {}: age not specified",
            f[0], f[3]
        ));
    }
    if year_of_birth.is_none() {
        warnings.push(format!(
            "family {} individual {}: year of birth not specified",
            f[0], f[3]
        ));
    }
    if age.is_none() && cancers.any() {
        warnings.push(format!(
            "family {} individual {}: diagnosis ages cannot be checked without an age",
            f[0], f[3]
        ));
    }

    Ok(Person {
        name: f[1].to_string(),
        target,
        id,
        father,
        mother,
        sex,
        mz_twin,
        dead,
        age,
        year_of_birth,
        cancers,
        ashkenazi,
        gene_tests,
        pathology,
    })
}
