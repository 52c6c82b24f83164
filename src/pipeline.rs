//! The BUSCO stages of one annotation's pipeline.
//!
//! Order: validate sources, download annotation, download assembly, fix
//! sequence aliases, keep the longest isoform, extract proteins, run BUSCO,
//! parse the summary. Each stage's output lands in the unit's workspace and
//! is recorded in the [`StageContext`] for the next one.

use crate::config::PipelineConfig;
use crate::stage::{Artifact, Stage, StageContext, StageError};
use crate::summary::{find_summary_file, parse_summary};
use crate::tools::{Tool, ToolSet, run_tool};
use crate::transfer::Transfer;
use std::fs;
use std::path::{Path, PathBuf};

pub const STEP_VALIDATE: &str = "validate_sources";
pub const STEP_DOWNLOAD_ANNOTATION: &str = "download_annotation";
pub const STEP_DOWNLOAD_ASSEMBLY: &str = "download_assembly";
pub const STEP_ALIAS: &str = "annocli_alias";
pub const STEP_LONGEST_ISOFORM: &str = "extract_longest_isoform";
pub const STEP_EXTRACT_PROTEINS: &str = "extract_protein_sequences";
pub const STEP_RUN_BUSCO: &str = "run_busco";
pub const STEP_PARSE: &str = "parse_results";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Fails with `step` when the tool claimed success but left no output.
fn expect_output(step: &str, path: &Path) -> Result<(), StageError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StageError::parse(
            step,
            format!("Expected output not found: {}", path.display()),
        ))
    }
}

pub struct ValidateSources;

impl Stage for ValidateSources {
    fn name(&self) -> &str {
        STEP_VALIDATE
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let mut missing = vec![];
        if ctx.unit.annotation_url.trim().is_empty() {
            missing.push("annotation_url");
        }
        if ctx.unit.assembly_url.trim().is_empty() {
            missing.push("assembly_url");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StageError::validation(
                STEP_VALIDATE,
                format!("Unit '{}' has no {}", ctx.unit.id, missing.join(" or ")),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SourceKind {
    Annotation,
    Assembly,
}

pub struct Download {
    kind: SourceKind,
    transfer: Transfer,
}

impl Download {
    pub fn annotation(transfer: Transfer) -> Self {
        Self {
            kind: SourceKind::Annotation,
            transfer,
        }
    }

    pub fn assembly(transfer: Transfer) -> Self {
        Self {
            kind: SourceKind::Assembly,
            transfer,
        }
    }
}

impl Stage for Download {
    fn name(&self) -> &str {
        match self.kind {
            SourceKind::Annotation => STEP_DOWNLOAD_ANNOTATION,
            SourceKind::Assembly => STEP_DOWNLOAD_ASSEMBLY,
        }
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let (source, file_name, artifact) = match self.kind {
            SourceKind::Annotation => (
                ctx.unit.annotation_url.clone(),
                "annotation.gff",
                Artifact::Annotation,
            ),
            SourceKind::Assembly => (
                ctx.unit.assembly_url.clone(),
                "assembly.fna",
                Artifact::Assembly,
            ),
        };
        let destination = ctx.workdir().join(file_name);
        self.transfer
            .fetch(&source, &destination)
            .map_err(|e| StageError::transfer(self.name(), e))?;
        ctx.record(artifact, destination);
        Ok(())
    }
}

/// Renames annotation sequence ids to match the assembly (`annocli alias`).
pub struct AliasAnnotation {
    executable: String,
}

impl Stage for AliasAnnotation {
    fn name(&self) -> &str {
        STEP_ALIAS
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let annotation = ctx.require(Artifact::Annotation, STEP_ALIAS)?;
        let assembly = ctx.require(Artifact::Assembly, STEP_ALIAS)?;
        let output = ctx.workdir().join("aliased_annotation.gff");
        let args = vec![
            "alias".to_string(),
            path_arg(&annotation),
            path_arg(&assembly),
            "--output".to_string(),
            path_arg(&output),
        ];
        run_tool(STEP_ALIAS, &self.executable, &args, None)?;
        expect_output(STEP_ALIAS, &output)?;
        ctx.record(Artifact::AliasedAnnotation, output);
        Ok(())
    }
}

pub struct LongestIsoform {
    executable: String,
}

impl Stage for LongestIsoform {
    fn name(&self) -> &str {
        STEP_LONGEST_ISOFORM
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let gff = ctx.require(Artifact::AliasedAnnotation, STEP_LONGEST_ISOFORM)?;
        let output = ctx.workdir().join("longest_isoform.gff");
        let args = vec![
            "-gff".to_string(),
            path_arg(&gff),
            "-o".to_string(),
            path_arg(&output),
        ];
        run_tool(STEP_LONGEST_ISOFORM, &self.executable, &args, None)?;
        expect_output(STEP_LONGEST_ISOFORM, &output)?;
        ctx.record(Artifact::LongestIsoform, output);
        Ok(())
    }
}

pub struct ExtractProteins {
    executable: String,
}

impl Stage for ExtractProteins {
    fn name(&self) -> &str {
        STEP_EXTRACT_PROTEINS
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let assembly = ctx.require(Artifact::Assembly, STEP_EXTRACT_PROTEINS)?;
        let gff = ctx.require(Artifact::LongestIsoform, STEP_EXTRACT_PROTEINS)?;
        let output = ctx.workdir().join("proteins.faa");
        let args = vec![
            "-f".to_string(),
            path_arg(&assembly),
            "-g".to_string(),
            path_arg(&gff),
            "-t".to_string(),
            "CDS".to_string(),
            "-p".to_string(),
            "-o".to_string(),
            path_arg(&output),
        ];
        run_tool(STEP_EXTRACT_PROTEINS, &self.executable, &args, None)?;
        expect_output(STEP_EXTRACT_PROTEINS, &output)?;
        ctx.record(Artifact::Proteins, output);
        Ok(())
    }
}

/// Runs BUSCO in protein mode inside the workspace.
pub struct RunBusco {
    executable: String,
    lineage: String,
    lineage_dirs: Vec<PathBuf>,
}

impl RunBusco {
    /// Absolute path of the first existing lineage directory, or the bare
    /// lineage name for BUSCO to resolve in its own download cache.
    fn lineage_arg(&self) -> String {
        self.lineage_dirs
            .iter()
            .find(|dir| dir.is_dir())
            .map(|dir| path_arg(&fs::canonicalize(dir).unwrap_or_else(|_| dir.clone())))
            .unwrap_or_else(|| self.lineage.clone())
    }
}

impl Stage for RunBusco {
    fn name(&self) -> &str {
        STEP_RUN_BUSCO
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let proteins = ctx.require(Artifact::Proteins, STEP_RUN_BUSCO)?;
        let output_name = "busco_output";
        let args = vec![
            "-m".to_string(),
            "protein".to_string(),
            "-i".to_string(),
            path_arg(&proteins),
            "-l".to_string(),
            self.lineage_arg(),
            "-o".to_string(),
            output_name.to_string(),
            "--offline".to_string(),
        ];
        run_tool(STEP_RUN_BUSCO, &self.executable, &args, Some(ctx.workdir()))?;
        let output = ctx.workdir().join(output_name);
        expect_output(STEP_RUN_BUSCO, &output)?;
        ctx.record(Artifact::BuscoOutput, output);
        Ok(())
    }
}

pub struct ParseResults;

impl Stage for ParseResults {
    fn name(&self) -> &str {
        STEP_PARSE
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        let output = ctx.require(Artifact::BuscoOutput, STEP_PARSE)?;
        let summary_path = find_summary_file(&output).ok_or_else(|| {
            StageError::parse(
                STEP_PARSE,
                format!("BUSCO summary file not found in {}", output.display()),
            )
        })?;
        let text = fs::read_to_string(&summary_path).map_err(|e| {
            StageError::parse(
                STEP_PARSE,
                format!("Could not read '{}': {e}", summary_path.display()),
            )
        })?;
        let summary = parse_summary(&text);
        tracing::info!("BUSCO results for {}: {:?}", ctx.unit.id, summary);
        let record = summary.into_record(&ctx.unit.id);
        ctx.set_result(record);
        Ok(())
    }
}

/// The fixed BUSCO pipeline.
pub fn busco_stages(config: &PipelineConfig) -> Vec<Box<dyn Stage>> {
    let tools = ToolSet::resolve(&config.tools);
    let transfer = Transfer::new(config.http_timeout());
    vec![
        Box::new(ValidateSources),
        Box::new(Download::annotation(transfer.clone())),
        Box::new(Download::assembly(transfer)),
        Box::new(AliasAnnotation {
            executable: tools.executable(Tool::Annocli).to_string(),
        }),
        Box::new(LongestIsoform {
            executable: tools.executable(Tool::AgatLongestIsoform).to_string(),
        }),
        Box::new(ExtractProteins {
            executable: tools.executable(Tool::AgatExtractSequences).to_string(),
        }),
        Box::new(RunBusco {
            executable: tools.executable(Tool::Busco).to_string(),
            lineage: config.lineage.clone(),
            lineage_dirs: config.lineage_dirs.iter().map(PathBuf::from).collect(),
        }),
        Box::new(ParseResults),
    ]
}
