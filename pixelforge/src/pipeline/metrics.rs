#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub index: usize,
    pub program: String,
    pub pid: Option<u32>,
    /// Spawn to exit.
    pub duration_ms: u128,
    /// Total bytes seen on the diagnostic stream, retained or not.
    pub diagnostic_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
    /// Bytes moved across each inter-stage link, indexed by upstream stage.
    /// `None` when the downstream closed its input early.
    pub link_bytes: Vec<Option<u64>>,
    pub output_bytes: usize,
}

impl PipelineMetrics {
    pub fn stage_duration_ms(&self, index: usize) -> Option<u128> {
        self.stages
            .iter()
            .find(|stage| stage.index == index)
            .map(|stage| stage.duration_ms)
    }
}
