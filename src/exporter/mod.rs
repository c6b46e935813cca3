pub mod onnx_exporter;

use crate::ir::GraphIR;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Missing tensor data for constant: {0}")]
    MissingTensorData(String),
}

pub trait ModelExporter {
    fn export(
        graph: &GraphIR,
        opset_version: i64,
        path: &std::path::Path,
    ) -> Result<(), ExporterError>;
}
