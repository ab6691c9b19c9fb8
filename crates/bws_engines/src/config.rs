#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use bws_contracts::calc::{CalculationKind, CancerRates, Population};
use bws_contracts::gene::{GenePanel, GeneTable};
use bws_contracts::ContractViolation;

pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(60 * 4);
pub const DEFAULT_MAX_PEDIGREE_SIZE: usize = 275;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancerModel {
    Breast,
    Ovarian,
}

impl CancerModel {
    pub fn as_str(self) -> &'static str {
        match self {
            CancerModel::Breast => "BC",
            CancerModel::Ovarian => "OC",
        }
    }
}

/// Everything the service knows about one cancer model. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CancerModelConfig {
    pub model: CancerModel,
    pub version: String,
    pub home: PathBuf,
    pub panel: GenePanel,
    pub presets: Vec<(Population, GeneTable)>,
    pub default_sensitivities: GeneTable,
    pub probs_executable: String,
    pub risks_executable: String,
}

impl CancerModelConfig {
    pub fn boadicea_v6(engine_home: &Path) -> Result<Self, ContractViolation> {
        // Order mandated by the engine's pedigree file.
        let panel = GenePanel::from_symbols(&[
            "BRCA1", "BRCA2", "PALB2", "CHEK2", "ATM", "BARD1", "RAD51C", "RAD51D",
        ])?;
        let shared = [
            ("PALB2", 0.00064),
            ("ATM", 0.0018),
            ("CHEK2", 0.00373),
            ("BARD1", 0.00043),
            ("RAD51C", 0.00035),
            ("RAD51D", 0.00035),
        ];
        let preset = |brca1: f64, brca2: f64| {
            let mut pairs = vec![("BRCA1", brca1), ("BRCA2", brca2)];
            pairs.extend_from_slice(&shared);
            GeneTable::from_pairs(&pairs)
        };
        Ok(Self {
            model: CancerModel::Breast,
            version: "BOADICEA 6".to_string(),
            home: engine_home.join("boadicea-v6"),
            panel,
            presets: vec![
                (Population::Uk, preset(0.0006394, 0.00102)?),
                (Population::Ashkenazi, preset(0.008, 0.006)?),
                (Population::Iceland, preset(0.0006394, 0.003)?),
            ],
            default_sensitivities: GeneTable::from_pairs(&[
                ("BRCA1", 0.89),
                ("BRCA2", 0.96),
                ("PALB2", 0.92),
                ("ATM", 0.94),
                ("CHEK2", 0.98),
                ("BARD1", 0.89),
                ("RAD51C", 0.78),
                ("RAD51D", 0.86),
            ])?,
            probs_executable: "boadicea_probs.exe".to_string(),
            risks_executable: "boadicea_risks.exe".to_string(),
        })
    }

    pub fn ovarian_v2(engine_home: &Path) -> Result<Self, ContractViolation> {
        let panel =
            GenePanel::from_symbols(&["BRCA1", "BRCA2", "RAD51D", "RAD51C", "BRIP1", "PALB2"])?;
        let shared = [
            ("RAD51D", 0.00035),
            ("RAD51C", 0.00035),
            ("BRIP1", 0.00071),
            ("PALB2", 0.00064),
        ];
        let preset = |brca1: f64, brca2: f64| {
            let mut pairs = vec![("BRCA1", brca1), ("BRCA2", brca2)];
            pairs.extend_from_slice(&shared);
            GeneTable::from_pairs(&pairs)
        };
        Ok(Self {
            model: CancerModel::Ovarian,
            version: "Ovarian 2".to_string(),
            home: engine_home.join("ovarian-v2"),
            panel,
            presets: vec![
                (Population::Uk, preset(0.0007947, 0.002576)?),
                (Population::Ashkenazi, preset(0.008, 0.006)?),
                (Population::Iceland, preset(0.0007947, 0.003)?),
            ],
            default_sensitivities: GeneTable::from_pairs(&[
                ("BRCA1", 0.89),
                ("BRCA2", 0.96),
                ("RAD51D", 0.86),
                ("RAD51C", 0.78),
                ("BRIP1", 0.95),
                ("PALB2", 0.92),
            ])?,
            probs_executable: "ovarian_probs.exe".to_string(),
            risks_executable: "ovarian_risks.exe".to_string(),
        })
    }

    pub fn preset(&self, population: Population) -> Option<&GeneTable> {
        self.presets
            .iter()
            .find(|(p, _)| *p == population)
            .map(|(_, table)| table)
    }

    pub fn executable(&self, kind: CalculationKind) -> PathBuf {
        match kind {
            CalculationKind::MutationProbability => self.home.join(&self.probs_executable),
            CalculationKind::CancerRisk => self.home.join(&self.risks_executable),
        }
    }

    pub fn locus_file(&self) -> PathBuf {
        self.home.join("Data").join("locus.loc")
    }

    pub fn incidence_file(&self, rates: CancerRates) -> PathBuf {
        self.home
            .join("Data")
            .join(format!("incidences_{}.nml", rates.file_stem()))
    }
}

/// Limits and process environment applied to every engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub timeout: Duration,
    /// Launcher that applies niceness before exec; `None` runs the engine directly.
    pub nice_program: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn mvp_v1(inherited_ld_library_path: Option<&str>) -> Self {
        Self {
            timeout: DEFAULT_ENGINE_TIMEOUT,
            nice_program: Some(PathBuf::from("nice")),
            env: engine_env(inherited_ld_library_path),
        }
    }
}

const LOCAL_LIB_DIR: &str = "/usr/local/lib";

/// OpenBLAS needs `/usr/local/lib` on the loader path and a single thread.
/// Never emits an empty entry.
pub fn engine_env(inherited_ld_library_path: Option<&str>) -> Vec<(String, String)> {
    let ld = match inherited_ld_library_path.filter(|v| !v.is_empty()) {
        Some(inherited) => format!("{inherited}:{LOCAL_LIB_DIR}"),
        None => LOCAL_LIB_DIR.to_string(),
    };
    vec![
        ("LD_LIBRARY_PATH".to_string(), ld),
        ("OMP_STACKSIZE".to_string(), "10M".to_string()),
        ("OPENBLAS_NUM_THREADS".to_string(), "1".to_string()),
    ]
}
