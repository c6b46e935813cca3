use std::collections::BTreeMap;

pub mod context;
pub mod shape_inference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    F64,
    I32,
    I64,
    U8,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data_type: DataType,
    pub data: Option<Vec<u8>>,
}

impl Tensor {
    /// One-dimensional int64 tensor from a list of values.
    pub fn int64(name: &str, values: &[i64]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 8);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self {
            name: name.to_string(),
            shape: vec![values.len()],
            data_type: DataType::I64,
            data: Some(data),
        }
    }

    /// Scalar string tensor. The payload is the UTF-8 bytes of the
    /// single element.
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: vec![],
            data_type: DataType::String,
            data: Some(value.as_bytes().to_vec()),
        }
    }

    pub fn int64_values(&self) -> Option<Vec<i64>> {
        if self.data_type != DataType::I64 {
            return None;
        }
        let data = self.data.as_ref()?;
        let mut out = Vec::with_capacity(data.len() / 8);
        for chunk in data.chunks_exact(8) {
            out.push(i64::from_le_bytes(chunk.try_into().ok()?));
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    Tensor(Tensor),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl Attribute {
    /// Text payload for attributes that carry a string either directly
    /// or as raw bytes.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Attribute::String(s) => Some(s.clone()),
            Attribute::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Identity of one operator variant: the registry dispatch key.
/// The empty string is the standard (default) domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpDescriptor {
    pub name: String,
    pub domain: String,
    pub version: i64,
}

impl OpDescriptor {
    pub fn new(name: &str, domain: &str, version: i64) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            version,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

#[derive(Debug, Clone)]
pub struct GraphIR {
    pub nodes: Vec<Node>,
    pub constants: BTreeMap<String, Tensor>,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

impl GraphIR {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            constants: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl Default for GraphIR {
    fn default() -> Self {
        Self::new()
    }
}
