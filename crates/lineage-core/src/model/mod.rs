pub mod edge;
pub mod link;
pub mod version;

pub use edge::{LineageHop, TransformationLineageEdge, TransformationStep};
pub use link::ModelTrainingLink;
pub use version::{DatasetVersion, VersionState};
