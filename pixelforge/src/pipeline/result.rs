use pixelforge_shared::errors::ExitInfo;

use super::metrics::PipelineMetrics;

/// How one stage of a finished run terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageVerdict {
    pub index: usize,
    pub program: String,
    pub exit: ExitInfo,
}

impl StageVerdict {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Output of a pipeline run in which every stage succeeded.
///
/// Failed runs never produce one of these; they surface as errors instead.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    output: Vec<u8>,
    verdicts: Vec<StageVerdict>,
    metrics: PipelineMetrics,
}

impl PipelineResult {
    pub(crate) fn new(output: Vec<u8>, verdicts: Vec<StageVerdict>, metrics: PipelineMetrics) -> Self {
        Self {
            output,
            verdicts,
            metrics,
        }
    }

    /// Terminal stage output.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output
    }

    pub fn verdicts(&self) -> &[StageVerdict] {
        &self.verdicts
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}
