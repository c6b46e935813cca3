pub mod convert;
pub mod exporter;
pub mod ir;
pub mod protos;

pub use convert::string_ops::register_defaults;
pub use convert::{
    convert, ConversionError, ConversionHandler, ConversionReport, ErrorKind, HandlerRegistry,
    CONTRIB_OPS_DOMAIN, ONNX_DOMAIN,
};
pub use exporter::onnx_exporter::OnnxExporter;
pub use exporter::{ExporterError, ModelExporter};
pub use ir::context::{GraphContext, NameGenerator};
pub use ir::{Attribute, DataType, GraphIR, Node, OpDescriptor, Tensor};
