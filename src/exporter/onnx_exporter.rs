use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::exporter::{ExporterError, ModelExporter};
use crate::ir::{Attribute, DataType, GraphIR, Tensor};
use crate::protos;
use prost::Message;

pub struct OnnxExporter;

fn elem_type(dtype: DataType) -> protos::TensorDataType {
    match dtype {
        DataType::F32 => protos::TensorDataType::Float,
        DataType::F64 => protos::TensorDataType::Double,
        DataType::I32 => protos::TensorDataType::Int32,
        DataType::I64 => protos::TensorDataType::Int64,
        DataType::U8 => protos::TensorDataType::Uint8,
        DataType::String => protos::TensorDataType::String,
    }
}

fn tensor_proto(tensor: &Tensor) -> Result<protos::TensorProto, ExporterError> {
    let data = tensor
        .data
        .clone()
        .ok_or_else(|| ExporterError::MissingTensorData(tensor.name.clone()))?;
    let mut tp = protos::TensorProto {
        name: tensor.name.clone(),
        dims: tensor.shape.iter().map(|&d| d as i64).collect(),
        data_type: elem_type(tensor.data_type) as i32,
        ..Default::default()
    };
    // String tensors use the per-element field; everything else goes in
    // raw little-endian bytes.
    if tensor.data_type == DataType::String {
        tp.string_data = vec![data];
    } else {
        tp.raw_data = data;
    }
    Ok(tp)
}

fn value_info(tensor: &Tensor) -> protos::ValueInfoProto {
    protos::ValueInfoProto {
        name: tensor.name.clone(),
        r#type: Some(protos::TypeProto {
            tensor_type: Some(protos::TensorTypeProto {
                elem_type: elem_type(tensor.data_type) as i32,
                shape: Some(protos::TensorShapeProto {
                    dim: tensor
                        .shape
                        .iter()
                        .map(|&d| protos::TensorShapeDimension {
                            dim_value: Some(d as i64),
                            dim_param: None,
                        })
                        .collect(),
                }),
            }),
        }),
    }
}

fn attribute_proto(
    name: &str,
    value: &Attribute,
) -> Result<protos::AttributeProto, ExporterError> {
    let mut ap = protos::AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    match value {
        Attribute::Float(f) => {
            ap.f = *f;
            ap.r#type = protos::AttributeType::Float as i32;
        }
        Attribute::Int(i) => {
            ap.i = *i;
            ap.r#type = protos::AttributeType::Int as i32;
        }
        Attribute::String(s) => {
            ap.s = s.as_bytes().to_vec();
            ap.r#type = protos::AttributeType::String as i32;
        }
        Attribute::Bytes(b) => {
            ap.s = b.clone();
            ap.r#type = protos::AttributeType::String as i32;
        }
        Attribute::Tensor(t) => {
            ap.t = Some(tensor_proto(t)?);
            ap.r#type = protos::AttributeType::Tensor as i32;
        }
        Attribute::Floats(fs) => {
            ap.floats = fs.clone();
            ap.r#type = protos::AttributeType::Floats as i32;
        }
        Attribute::Ints(is) => {
            ap.ints = is.clone();
            ap.r#type = protos::AttributeType::Ints as i32;
        }
        Attribute::Strings(ss) => {
            ap.strings = ss.iter().map(|s| s.as_bytes().to_vec()).collect();
            ap.r#type = protos::AttributeType::Strings as i32;
        }
    }
    Ok(ap)
}

impl OnnxExporter {
    fn build_model(
        graph: &GraphIR,
        opset_version: i64,
    ) -> Result<protos::ModelProto, ExporterError> {
        let mut gp = protos::GraphProto {
            name: "tfonnx_graph".to_string(),
            ..Default::default()
        };

        for tensor in graph.constants.values() {
            gp.initializer.push(tensor_proto(tensor)?);
        }

        let mut domains = BTreeSet::new();
        for node in &graph.nodes {
            domains.insert(node.domain.clone());
            let mut np = protos::NodeProto {
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                domain: node.domain.clone(),
                input: node.inputs.clone(),
                output: node.outputs.clone(),
                ..Default::default()
            };
            for (attr_name, attr_val) in &node.attributes {
                np.attribute.push(attribute_proto(attr_name, attr_val)?);
            }
            gp.node.push(np);
        }

        gp.input = graph.inputs.iter().map(value_info).collect();
        gp.output = graph.outputs.iter().map(value_info).collect();

        // One opset row per domain present in the graph. Custom domains
        // are published at version 1.
        let mut opset_import: Vec<protos::OperatorSetIdProto> = domains
            .into_iter()
            .map(|domain| {
                let version = if domain.is_empty() { opset_version } else { 1 };
                protos::OperatorSetIdProto { domain, version }
            })
            .collect();
        if opset_import.is_empty() {
            opset_import.push(protos::OperatorSetIdProto {
                domain: String::new(),
                version: opset_version,
            });
        }

        Ok(protos::ModelProto {
            ir_version: 7,
            producer_name: "tfonnx".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph: Some(gp),
            opset_import,
        })
    }
}

impl ModelExporter for OnnxExporter {
    fn export(
        graph: &GraphIR,
        opset_version: i64,
        path: &Path,
    ) -> Result<(), ExporterError> {
        let model = Self::build_model(graph, opset_version)?;

        let mut buf = Vec::new();
        model
            .encode(&mut buf)
            .map_err(|e| ExporterError::SerializationError(e.to_string()))?;

        let mut file =
            File::create(path).map_err(|e| ExporterError::SerializationError(e.to_string()))?;
        file.write_all(&buf)
            .map_err(|e| ExporterError::SerializationError(e.to_string()))?;

        Ok(())
    }
}
