/// Configuration for the read loop
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub buffer_size: usize,
    /// Longer lines abort the run.
    pub max_line_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            buffer_size: 65536,       // 64KB
            max_line_length: 1048576, // 1MB
        }
    }
}
