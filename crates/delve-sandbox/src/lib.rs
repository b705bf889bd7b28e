mod coordinator;
mod remote;
mod safety;
mod subprocess;
mod validate;

pub use coordinator::{CodeExecutor, ExecutionCoordinator};
pub use remote::SessionPoolClient;
pub use safety::{SafetyPolicy, SafetyViolation};
pub use subprocess::SubprocessExecutor;
pub use validate::{classify_analysis_kind, strip_code_fences, validate_code, ValidationError};
