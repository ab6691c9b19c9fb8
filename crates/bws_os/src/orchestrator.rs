#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bws_contracts::calc::{CalculationKind, CalculationRequest};
use bws_contracts::pedigree::{Family, FamilyId, PedigreeSet};
use bws_contracts::result::{CancerRiskResult, MutationProbabilityResult};
use bws_engines::config::CancerModelConfig;
use bws_engines::decoder::{decode_cancer_risks, decode_mutation_probabilities, DecodeError};
use bws_engines::job_files::{JobFileBuilder, JobFileError};
use bws_engines::pedigree_file::{BoadiceaPedigreeParser, PedigreeError};
use bws_engines::runner::{EngineJob, ProcessRunner, RunnerError};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn, Span};

use crate::fields::{validate_input, RawCalculationInput, ValidationErrors};
use crate::workspace::{request_token, WorkspaceDirectory};

/// Turns uploaded pedigree text into families plus non-fatal warnings.
pub trait PedigreeValidator {
    fn parse(&self, text: &str) -> Result<PedigreeSet, PedigreeError>;
}

impl PedigreeValidator for BoadiceaPedigreeParser {
    fn parse(&self, text: &str) -> Result<PedigreeSet, PedigreeError> {
        BoadiceaPedigreeParser::parse(self, text)
    }
}

/// Runs one engine job and returns the raw text of its output file.
pub trait EngineRunner: Send + Sync {
    fn run(&self, job: &EngineJob) -> impl Future<Output = Result<String, RunnerError>> + Send;
}

impl EngineRunner for ProcessRunner {
    fn run(&self, job: &EngineJob) -> impl Future<Output = Result<String, RunnerError>> + Send {
        ProcessRunner::run(self, job)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Parent directory of per-request workspaces.
    pub work_dir: PathBuf,
}

impl OrchestratorConfig {
    pub fn mvp_v1(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("invalid pedigree: {0}")]
    Pedigree(#[from] PedigreeError),
    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("cannot write job files for family {family_id}: {source}")]
    JobFiles {
        family_id: String,
        #[source]
        source: JobFileError,
    },
    #[error("{kind} calculation for family {family_id} failed: {source}")]
    Engine {
        family_id: String,
        kind: &'static str,
        #[source]
        source: RunnerError,
    },
    #[error("cannot decode {kind} output for family {family_id}: {source}")]
    Decode {
        family_id: String,
        kind: &'static str,
        #[source]
        source: DecodeError,
    },
}

impl OrchestratorError {
    /// Caused by the request content rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Pedigree(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Engine {
                source: RunnerError::TimedOut { .. },
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyResult {
    pub family_id: FamilyId,
    pub mutation_probabilities: Option<MutationProbabilityResult>,
    pub cancer_risks: Option<CancerRiskResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub token: String,
    pub version: String,
    /// Frequencies, sensitivities and incidence table actually applied.
    pub request: CalculationRequest,
    /// Input order.
    pub families: Vec<FamilyResult>,
    pub warnings: Vec<String>,
}

pub struct RequestOrchestrator<P, R>
where
    P: PedigreeValidator,
    R: EngineRunner,
{
    config: OrchestratorConfig,
    model: Arc<CancerModelConfig>,
    validator: P,
    runner: R,
    job_files: JobFileBuilder,
}

impl<P, R> RequestOrchestrator<P, R>
where
    P: PedigreeValidator + Send + Sync,
    R: EngineRunner,
{
    pub fn new(
        config: OrchestratorConfig,
        model: Arc<CancerModelConfig>,
        validator: P,
        runner: R,
    ) -> Self {
        Self {
            config,
            model,
            validator,
            runner,
            job_files: JobFileBuilder::new(),
        }
    }

    pub fn model(&self) -> &CancerModelConfig {
        &self.model
    }

    /// Validates, computes every eligible calculation for every family in
    /// input order, and removes the workspace on every path. The first
    /// failing calculation aborts the whole request.
    #[instrument(
        name = "bws_request",
        skip_all,
        fields(model = self.model.model.as_str(), token = tracing::field::Empty)
    )]
    pub async fn handle(
        &self,
        raw: &RawCalculationInput,
    ) -> Result<RequestOutcome, OrchestratorError> {
        let input = validate_input(raw, &self.model)?;
        let pedigree = self.validator.parse(&input.pedigree_text)?;

        let token = request_token();
        Span::current().record("token", token.as_str());
        info!(
            families = pedigree.families().len(),
            pedigree_sha256 = %short_digest(pedigree.raw()),
            population = input.request.population.as_str(),
            cancer_rates = input.request.cancer_rates.as_str(),
            "pedigree accepted"
        );
        for warning in pedigree.warnings() {
            warn!(%warning, "pedigree warning");
        }

        let workspace = WorkspaceDirectory::create(self.config.work_dir.clone(), token.clone())
            .await
            .map_err(OrchestratorError::Workspace)?;
        let request = Arc::new(input.request);

        let computed = self
            .run_families(workspace.path(), &pedigree, &request)
            .await;
        let removed = workspace.close().await;
        let families = computed?;
        removed.map_err(OrchestratorError::Workspace)?;

        Ok(RequestOutcome {
            token,
            version: self.model.version.clone(),
            request: Arc::unwrap_or_clone(request),
            families,
            warnings: pedigree.warnings().to_vec(),
        })
    }

    async fn run_families(
        &self,
        workspace: &Path,
        pedigree: &PedigreeSet,
        request: &Arc<CalculationRequest>,
    ) -> Result<Vec<FamilyResult>, OrchestratorError> {
        let mut results = Vec::with_capacity(pedigree.families().len());
        for (index, family) in pedigree.families().iter().enumerate() {
            results.push(self.run_family(workspace, index, family, request).await?);
        }
        Ok(results)
    }

    /// The two kinds use disjoint files and run concurrently; both finish
    /// before the family result exists.
    async fn run_family(
        &self,
        workspace: &Path,
        index: usize,
        family: &Family,
        request: &Arc<CalculationRequest>,
    ) -> Result<FamilyResult, OrchestratorError> {
        let family_id = family.id.as_str();
        let probabilities = async {
            if !family.is_carrier_probs_viable() {
                info!(family_id, "carrier probabilities not applicable");
                return Ok(None);
            }
            let kind = CalculationKind::MutationProbability;
            let text = self.calculate(workspace, index, family, kind, request).await?;
            decode_mutation_probabilities(&text, &request.panel)
                .map(Some)
                .map_err(|source| OrchestratorError::Decode {
                    family_id: family_id.to_string(),
                    kind: kind.as_str(),
                    source,
                })
        };
        let risks = async {
            if !family.is_risks_calc_viable() {
                info!(family_id, "cancer risks not applicable");
                return Ok(None);
            }
            let kind = CalculationKind::CancerRisk;
            let text = self.calculate(workspace, index, family, kind, request).await?;
            decode_cancer_risks(&text)
                .map(Some)
                .map_err(|source| OrchestratorError::Decode {
                    family_id: family_id.to_string(),
                    kind: kind.as_str(),
                    source,
                })
        };
        let (mutation_probabilities, cancer_risks) = tokio::try_join!(probabilities, risks)?;
        Ok(FamilyResult {
            family_id: family.id.clone(),
            mutation_probabilities,
            cancer_risks,
        })
    }

    async fn calculate(
        &self,
        workspace: &Path,
        index: usize,
        family: &Family,
        kind: CalculationKind,
        request: &Arc<CalculationRequest>,
    ) -> Result<String, OrchestratorError> {
        let family_id = family.id.as_str().to_string();
        let files = {
            let builder = self.job_files;
            let dir = workspace.to_path_buf();
            let family = family.clone();
            let request = Arc::clone(request);
            tokio::task::spawn_blocking(move || builder.write(&dir, index, &family, kind, &request))
                .await
                .map_err(|err| OrchestratorError::Workspace(std::io::Error::other(err)))?
                .map_err(|source| OrchestratorError::JobFiles {
                    family_id: family_id.clone(),
                    source,
                })?
        };

        let job = EngineJob {
            family_id: family_id.clone(),
            kind,
            executable: self.model.executable(kind),
            workspace: workspace.to_path_buf(),
            stdout_name: files.stdout_name(),
            output_name: files.output_name(),
            batch_file: files.batch_file,
            locus_file: self.model.locus_file(),
            incidence_file: self.model.incidence_file(request.cancer_rates),
            family_size: family.size(),
        };
        self.runner
            .run(&job)
            .await
            .map_err(|source| OrchestratorError::Engine {
                family_id,
                kind: kind.as_str(),
                source,
            })
    }
}

/// First 16 hex characters of the SHA-256 of `text`; identifies a pedigree
/// in logs without recording its content.
fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(8).fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    const TWO_FAMILIES: &str = "##BOADICEA import pedigree file format 4.0
##FamID Name Target IndivID FathID MothID Sex MZtwin Dead Age Yob 1stBrCa 2ndBrCa OvCa ProCa PanCa Ashkn BRCA1t BRCA1r BRCA2t BRCA2r PALB2t PALB2r ATMt ATMr CHEK2t CHEK2r ER PR HER2 CK14 CK56
FAM1 fa 0 1 0 0 M 0 0 60 1958 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
FAM1 mo 0 2 0 0 F 0 0 58 1960 45 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
FAM1 me 1 3 1 2 F 0 0 32 1986 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
FAM2 gr 0 1 0 0 M 0 1 0 1930 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
FAM2 ta 1 2 0 0 F 0 0 41 1977 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
";

    type Respond = fn(&EngineJob) -> Result<String, RunnerError>;

    struct MockRunner {
        respond: Respond,
        calls: Mutex<Vec<EngineJob>>,
    }

    impl MockRunner {
        fn new(respond: Respond) -> Self {
            Self {
                respond,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl EngineRunner for MockRunner {
        fn run(
            &self,
            job: &EngineJob,
        ) -> impl Future<Output = Result<String, RunnerError>> + Send {
            assert!(job.batch_file.is_file(), "batch file written before run");
            assert!(job.workspace.is_dir());
            self.calls.lock().unwrap().push(job.clone());
            let out = (self.respond)(job);
            async move { out }
        }
    }

    fn engine_output(job: &EngineJob) -> Result<String, RunnerError> {
        Ok(match job.kind {
            // no mutation + 8 genes
            CalculationKind::MutationProbability => {
                let mut fields = vec!["0.9", "90.0"];
                fields.extend(std::iter::repeat(["0.0125", "1.25"]).take(8).flatten());
                fields.join(",")
            }
            CalculationKind::CancerRisk => {
                "33,0.002,0.2,0.001,0.1\n\n34,0.004,0.4,0.002,0.2\n".to_string()
            }
        })
    }

    struct Harness {
        parent: tempfile::TempDir,
        orchestrator: RequestOrchestrator<BoadiceaPedigreeParser, MockRunner>,
    }

    fn harness(respond: Respond) -> Harness {
        let parent = tempfile::tempdir().unwrap();
        let model = CancerModelConfig::boadicea_v6(Path::new("/opt/engine")).unwrap();
        let orchestrator = RequestOrchestrator::new(
            OrchestratorConfig::mvp_v1(parent.path().to_path_buf()),
            Arc::new(model),
            BoadiceaPedigreeParser::new(275),
            MockRunner::new(respond),
        );
        Harness {
            parent,
            orchestrator,
        }
    }

    impl Harness {
        fn workspace_count(&self) -> usize {
            std::fs::read_dir(self.parent.path()).unwrap().count()
        }

        fn calls(&self) -> Vec<EngineJob> {
            self.orchestrator.runner.calls.lock().unwrap().clone()
        }
    }

    fn raw(pedigree: &str) -> RawCalculationInput {
        RawCalculationInput {
            pedigree_data: Some(pedigree.to_string()),
            mut_freq: Some("UK".to_string()),
            cancer_rates: Some("UK".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn at_orch_01_families_are_computed_in_input_order() {
        let h = harness(engine_output);
        let outcome = h.orchestrator.handle(&raw(TWO_FAMILIES)).await.unwrap();

        assert_eq!(outcome.version, "BOADICEA 6");
        let ids: Vec<&str> = outcome.families.iter().map(|f| f.family_id.as_str()).collect();
        assert_eq!(ids, vec!["FAM1", "FAM2"]);

        let fam1 = &outcome.families[0];
        let probs = fam1.mutation_probabilities.as_ref().unwrap();
        assert_eq!(probs.len(), 1 + 8);
        assert_eq!(fam1.cancer_risks.as_ref().unwrap().rows.len(), 2);

        // FAM2 has no cancers or tests, so only risks apply.
        let fam2 = &outcome.families[1];
        assert!(fam2.mutation_probabilities.is_none());
        assert!(fam2.cancer_risks.is_some());

        assert_eq!(h.calls().len(), 3);
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_02_jobs_use_model_paths_and_family_size() {
        let h = harness(engine_output);
        h.orchestrator.handle(&raw(TWO_FAMILIES)).await.unwrap();
        let calls = h.calls();
        let risk = calls
            .iter()
            .find(|j| j.family_id == "FAM1" && j.kind == CalculationKind::CancerRisk)
            .unwrap();
        assert_eq!(risk.family_size, 3);
        assert_eq!(
            risk.executable,
            PathBuf::from("/opt/engine/boadicea-v6/boadicea_risks.exe")
        );
        assert_eq!(
            risk.incidence_file,
            PathBuf::from("/opt/engine/boadicea-v6/Data/incidences_UK.nml")
        );
        assert_eq!(risk.output_name, "f0_can_risks.out");
        let fam2 = calls.iter().find(|j| j.family_id == "FAM2").unwrap();
        assert_eq!(fam2.output_name, "f1_can_risks.out");
    }

    #[tokio::test]
    async fn at_orch_03_custom_without_all_genes_fails_before_workspace() {
        let h = harness(engine_output);
        let mut input = raw(TWO_FAMILIES);
        input.mut_freq = Some("Custom".to_string());
        input
            .gene_fields
            .insert("brca1_mut_frequency".to_string(), "0.001".to_string());
        let err = h.orchestrator.handle(&input).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(h.calls().is_empty());
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_04_structural_pedigree_error_is_client_error() {
        let h = harness(engine_output);
        let err = h
            .orchestrator
            .handle(&raw("not a pedigree"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Pedigree(_)));
        assert!(err.is_client_error());
        assert!(h.calls().is_empty());
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_05_engine_failure_aborts_and_cleans_up() {
        fn fail_second_family(job: &EngineJob) -> Result<String, RunnerError> {
            if job.family_id == "FAM2" {
                return Err(RunnerError::Failed { exit_code: Some(1) });
            }
            engine_output(job)
        }
        let h = harness(fail_second_family);
        let err = h.orchestrator.handle(&raw(TWO_FAMILIES)).await.unwrap_err();
        assert!(!err.is_client_error());
        assert!(!err.is_timeout());
        assert!(matches!(
            err,
            OrchestratorError::Engine { ref family_id, .. } if family_id == "FAM2"
        ));
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_06_timeout_is_reported_as_timeout() {
        fn time_out(_: &EngineJob) -> Result<String, RunnerError> {
            Err(RunnerError::TimedOut {
                timeout: Duration::from_secs(240),
            })
        }
        let h = harness(time_out);
        let err = h.orchestrator.handle(&raw(TWO_FAMILIES)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_07_malformed_output_is_decode_error() {
        fn garbage(_: &EngineJob) -> Result<String, RunnerError> {
            Ok("0.9,90.0,oops".to_string())
        }
        let h = harness(garbage);
        let err = h.orchestrator.handle(&raw(TWO_FAMILIES)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Decode { .. }));
        assert_eq!(h.workspace_count(), 0);
    }

    #[tokio::test]
    async fn at_orch_08_warnings_are_returned_not_blocking() {
        let h = harness(engine_output);
        let pedigree = TWO_FAMILIES.replace("FAM2 gr 0 1 0 0 M 0 1 0 1930", "FAM2 gr 0 1 0 0 M 0 1 0 0");
        let outcome = h.orchestrator.handle(&raw(&pedigree)).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("year of birth"));
        assert_eq!(outcome.families.len(), 2);
    }

    #[test]
    fn short_digest_is_stable() {
        assert_eq!(short_digest("abc"), "ba7816bf8f01cfea");
    }
}
