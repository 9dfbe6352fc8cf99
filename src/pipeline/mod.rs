/// Session-scoped parallel batch pipeline
///
/// - `contract` - the per-item transform shape and its outcome
/// - `executor` - CPU/I-O worker pools with ordered fan-in
/// - `driver` - the call a front-end makes: batch + transform -> partition

pub mod contract;
pub mod driver;
pub mod executor;

pub use contract::{Derivation, ExecutionMode, Outputs, Transform, TransformOutcome};
pub use driver::Pipeline;
pub use executor::{Executor, ExecutorConfig};
