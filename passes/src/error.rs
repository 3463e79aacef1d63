use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pass-level failure. The wrapped IR error carries the failing operation.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("tile distribution failed: {source}"))]
    DistributionFailed { source: subtile_ir::Error },

    #[snafu(display("vector linearization failed: {source}"))]
    LinearizationFailed { source: subtile_ir::Error },

    #[snafu(display("broadcast lowering failed: {source}"))]
    BroadcastLoweringFailed { source: subtile_ir::Error },
}
