#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::common::validate_token;
use crate::gene::GeneSymbol;
use crate::{ContractViolation, Validate};

pub const FAMILY_ID_MIN_LEN: usize = 1;
pub const FAMILY_ID_MAX_LEN: usize = 7;
pub const PERSON_ID_MAX_LEN: usize = 13;
pub const MAX_AGE: u16 = 125;
pub const MAX_AGE_FOR_RISK_CALCS: u16 = 79;
pub const MIN_YEAR_OF_BIRTH: u16 = 1850;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FamilyId(String);

impl FamilyId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for FamilyId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.chars().count() < FAMILY_ID_MIN_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "family_id",
                reason: "must not be empty",
            });
        }
        validate_token("family_id", &self.0, FAMILY_ID_MAX_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersonId(String);

impl PersonId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PersonId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == "0" {
            return Err(ContractViolation::InvalidValue {
                field: "person_id",
                reason: "0 is reserved for unknown parents",
            });
        }
        validate_token("person_id", &self.0, PERSON_ID_MAX_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn code(self) -> char {
        match self {
            Sex::Female => 'F',
            Sex::Male => 'M',
        }
    }
}

/// Age at diagnosis for each cancer the pedigree format records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancerDiagnoses {
    pub first_breast: Option<u16>,
    pub second_breast: Option<u16>,
    pub ovarian: Option<u16>,
    pub prostate: Option<u16>,
    pub pancreatic: Option<u16>,
}

impl CancerDiagnoses {
    /// In the engine's fixed order: bc1, bc2, oc, prc, pac.
    pub fn in_engine_order(&self) -> [Option<u16>; 5] {
        [
            self.first_breast,
            self.second_breast,
            self.ovarian,
            self.prostate,
            self.pancreatic,
        ]
    }

    pub fn any(&self) -> bool {
        self.in_engine_order().iter().any(Option::is_some)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GeneTestType {
    #[default]
    Untested,
    MutationSearch,
    DirectTest,
}

impl GeneTestType {
    pub fn code(self) -> char {
        match self {
            GeneTestType::Untested => '0',
            GeneTestType::MutationSearch => 'S',
            GeneTestType::DirectTest => 'T',
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GeneTestResult {
    #[default]
    Untested,
    Positive,
    Negative,
}

impl GeneTestResult {
    pub fn code(self) -> char {
        match self {
            GeneTestResult::Untested => '0',
            GeneTestResult::Positive => 'P',
            GeneTestResult::Negative => 'N',
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneTest {
    pub test_type: GeneTestType,
    pub result: GeneTestResult,
}

impl GeneTest {
    pub fn is_tested(&self) -> bool {
        self.test_type != GeneTestType::Untested && self.result != GeneTestResult::Untested
    }
}

impl Validate for GeneTest {
    fn validate(&self) -> Result<(), ContractViolation> {
        let type_set = self.test_type != GeneTestType::Untested;
        let result_set = self.result != GeneTestResult::Untested;
        if type_set != result_set {
            return Err(ContractViolation::InvalidValue {
                field: "gene_test",
                reason: "test type and result must both be given or both be 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PathologyResult {
    #[default]
    Unknown,
    Negative,
    Positive,
}

impl PathologyResult {
    pub fn code(self) -> char {
        match self {
            PathologyResult::Unknown => '0',
            PathologyResult::Negative => 'N',
            PathologyResult::Positive => 'P',
        }
    }
}

/// Breast tumour receptor markers: ER, PR, HER2, CK14, CK5/6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pathology {
    pub er: PathologyResult,
    pub pr: PathologyResult,
    pub her2: PathologyResult,
    pub ck14: PathologyResult,
    pub ck56: PathologyResult,
}

impl Pathology {
    pub fn in_engine_order(&self) -> [PathologyResult; 5] {
        [self.er, self.pr, self.her2, self.ck14, self.ck56]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub target: bool,
    pub id: PersonId,
    pub father: Option<PersonId>,
    pub mother: Option<PersonId>,
    pub sex: Sex,
    pub mz_twin: Option<char>,
    pub dead: bool,
    pub age: Option<u16>,
    pub year_of_birth: Option<u16>,
    pub cancers: CancerDiagnoses,
    pub ashkenazi: bool,
    pub gene_tests: BTreeMap<GeneSymbol, GeneTest>,
    pub pathology: Pathology,
}

impl Person {
    pub fn gene_test(&self, gene: &GeneSymbol) -> GeneTest {
        self.gene_tests.get(gene).copied().unwrap_or_default()
    }

    pub fn has_genetic_test(&self) -> bool {
        self.gene_tests.values().any(GeneTest::is_tested)
    }
}

impl Validate for Person {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if self.father.is_some() != self.mother.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "person.parents",
                reason: "both parents or neither must be given",
            });
        }
        if let Some(age) = self.age {
            if age > MAX_AGE {
                return Err(ContractViolation::InvalidValue {
                    field: "person.age",
                    reason: "exceeds maximum age",
                });
            }
            for diagnosis in self.cancers.in_engine_order().into_iter().flatten() {
                if diagnosis > age {
                    return Err(ContractViolation::InvalidValue {
                        field: "person.cancers",
                        reason: "diagnosis age exceeds current age",
                    });
                }
            }
        }
        if let Some(yob) = self.year_of_birth {
            if yob < MIN_YEAR_OF_BIRTH {
                return Err(ContractViolation::InvalidValue {
                    field: "person.year_of_birth",
                    reason: "before minimum year of birth",
                });
            }
        }
        if self.sex == Sex::Male && self.cancers.ovarian.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "person.cancers",
                reason: "ovarian cancer recorded for a male",
            });
        }
        if self.sex == Sex::Female && self.cancers.prostate.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "person.cancers",
                reason: "prostate cancer recorded for a female",
            });
        }
        for test in self.gene_tests.values() {
            test.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub id: FamilyId,
    pub people: Vec<Person>,
}

impl Family {
    pub fn v1(id: FamilyId, people: Vec<Person>) -> Result<Self, ContractViolation> {
        let f = Self { id, people };
        f.validate()?;
        Ok(f)
    }

    pub fn size(&self) -> usize {
        self.people.len()
    }

    pub fn target(&self) -> Option<&Person> {
        self.people.iter().find(|p| p.target)
    }

    pub fn person(&self, id: &PersonId) -> Option<&Person> {
        self.people.iter().find(|p| &p.id == id)
    }

    /// Carrier probabilities need some evidence in the family: a cancer
    /// diagnosis or a genetic test result.
    pub fn is_carrier_probs_viable(&self) -> bool {
        self.people
            .iter()
            .any(|p| p.cancers.any() || p.has_genetic_test())
    }

    /// Future risks are computed for a living female target of known age who
    /// has not had ovarian or contralateral breast cancer.
    pub fn is_risks_calc_viable(&self) -> bool {
        let Some(target) = self.target() else {
            return false;
        };
        if target.sex != Sex::Female || target.dead {
            return false;
        }
        match target.age {
            Some(age) if age <= MAX_AGE_FOR_RISK_CALCS => {}
            _ => return false,
        }
        target.cancers.ovarian.is_none() && target.cancers.second_breast.is_none()
    }
}

impl Validate for Family {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if self.people.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "family.people",
                reason: "must not be empty",
            });
        }
        let mut ids = BTreeSet::new();
        for person in &self.people {
            person.validate()?;
            if !ids.insert(&person.id) {
                return Err(ContractViolation::InvalidValue {
                    field: "family.people",
                    reason: "person ids must be unique",
                });
            }
        }
        for person in &self.people {
            for parent in [&person.father, &person.mother].into_iter().flatten() {
                if !ids.contains(parent) {
                    return Err(ContractViolation::InvalidValue {
                        field: "family.people",
                        reason: "parent id not found in family",
                    });
                }
            }
        }
        if self.people.iter().filter(|p| p.target).count() != 1 {
            return Err(ContractViolation::InvalidValue {
                field: "family.target",
                reason: "exactly one target is required",
            });
        }
        Ok(())
    }
}

/// Families parsed from one uploaded pedigree text, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PedigreeSet {
    raw: String,
    families: Vec<Family>,
    warnings: Vec<String>,
}

impl PedigreeSet {
    pub fn v1(
        raw: String,
        families: Vec<Family>,
        warnings: Vec<String>,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            raw,
            families,
            warnings,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Validate for PedigreeSet {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.families.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "pedigree_set.families",
                reason: "must contain at least one family",
            });
        }
        let mut ids = BTreeSet::new();
        for family in &self.families {
            family.validate()?;
            if !ids.insert(&family.id) {
                return Err(ContractViolation::InvalidValue {
                    field: "pedigree_set.families",
                    reason: "family ids must be unique",
                });
            }
        }
        Ok(())
    }
}
