//! Reporting: architecture diagrams

pub mod diagram;

pub use diagram::{write_diagrams, DiagramPaths, EnsembleDiagram, DIAGRAM_TITLE};
