mod component;
mod editor;
mod registry;
mod testing;
mod validator;
mod versioning;

pub use component::{ComponentError, PromptComponent, PLACEHOLDER_RE};
pub use editor::{ComponentEditor, ComponentUpdate};
pub use registry::{ComponentRegistry, ComponentSummary};
pub use testing::{ComponentTester, ResultComparison, TestMetrics, TestResult, TestResultStore};
pub use validator::{validate_template, Validation};
pub use versioning::{
    FieldChange, HistoryEntry, ListDelta, MetadataChange, VersionDiff, VersionInfo,
    VersionSnapshot, VersionStore,
};
