//! CLI commands implementation

pub mod checkpoints;
pub mod contradictions;
pub mod coverage;
pub mod freshness;
pub mod init;
pub mod lint;
pub mod probe;
pub mod run;
pub mod sources;
pub mod status;

pub use checkpoints::*;
pub use contradictions::*;
pub use coverage::*;
pub use freshness::*;
pub use init::*;
pub use lint::*;
pub use probe::*;
pub use run::*;
pub use sources::*;
pub use status::*;
