pub mod compression;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod persona;
pub mod resolution;
pub mod sql;
pub mod telemetry;

pub use compression::{compress, compression_stats, CompressionDigest, CompressionStats};
pub use domain::classification::{
    Classification, ExecutionStrategy, MetadataStrategy, ToolName, FALLBACK_TOOL_CHAIN,
};
pub use domain::results::{
    DirectToolRun, Evaluation, IntermediateSelection, SqlToolResult, StageContext, Summary,
    ToolChainResult, ToolResults, Visualization,
};
pub use domain::rows::Row;
pub use errors::{ApplicationError, InterfaceError, OrchestrationError};
pub use flows::{WorkflowEvent, WorkflowMachine, WorkflowState, WorkflowTrace};
pub use persona::{PersonaDescriptor, PersonaError, PersonaProvider, PersonaRegistry};
pub use resolution::Resolution;
pub use sql::{SqlDialect, SqlError, SqlGateway, SqlOutput};
pub use telemetry::{InMemoryTelemetry, TelemetrySink, TracingTelemetry};
