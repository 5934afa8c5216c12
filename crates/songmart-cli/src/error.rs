use snafu::Snafu;
use songmart_core::config::ConfigError;
use songmart_core::pipeline::PipelineError;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to load configuration from {path}: {source}"))]
    LoadConfig {
        path: String,
        source: ConfigError,
    },

    #[snafu(display("Pipeline run failed: {source}"))]
    Run { source: PipelineError },
}
