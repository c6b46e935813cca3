use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ir::shape_inference::ShapeInference;
use crate::ir::{Attribute, DataType, GraphIR, Node, Tensor};

/// Allocates names that are unique for the lifetime of one graph.
///
/// This is the single uniqueness authority for node and output names.
/// If conversion is ever parallelized across subgraphs, the counter is
/// the one piece of state that must become atomic.
pub struct NameGenerator {
    taken: HashSet<String>,
    counter: u64,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self {
            taken: HashSet::new(),
            counter: 0,
        }
    }

    /// Mark an existing name as taken so it is never handed out again.
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        loop {
            let candidate = format!("{}_{}", prefix, self.counter);
            self.counter += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive owner of a graph during a conversion pass.
///
/// Handlers never touch nodes directly; every mutation goes through this
/// API so that name uniqueness and the shape/dtype caches stay
/// consistent while nodes are rewritten.
pub struct GraphContext {
    graph: GraphIR,
    shapes: HashMap<String, Vec<usize>>,
    dtypes: HashMap<String, DataType>,
    shape_probes: HashMap<String, String>,
    names: NameGenerator,
}

impl GraphContext {
    pub fn new(graph: GraphIR) -> Self {
        let mut names = NameGenerator::new();
        for node in &graph.nodes {
            names.reserve(&node.name);
            for output in &node.outputs {
                names.reserve(output);
            }
        }
        for name in graph.constants.keys() {
            names.reserve(name);
        }
        for input in &graph.inputs {
            names.reserve(&input.name);
        }

        let (shapes, dtypes) = ShapeInference::seed(&graph);

        Self {
            graph,
            shapes,
            dtypes,
            shape_probes: HashMap::new(),
            names,
        }
    }

    pub fn graph(&self) -> &GraphIR {
        &self.graph
    }

    pub fn into_graph(self) -> GraphIR {
        self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.nodes.len()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.graph.nodes[idx]
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        self.names.fresh_name(prefix)
    }

    /// Reassign a node's operator descriptor in place.
    pub fn set_op(&mut self, idx: usize, op_type: &str, domain: &str) {
        let node = &mut self.graph.nodes[idx];
        log::debug!(
            "node {}: {} -> {} (domain \"{}\")",
            node.name,
            node.op_type,
            op_type,
            domain
        );
        node.op_type = op_type.to_string();
        node.domain = domain.to_string();
    }

    pub fn get_attribute(&self, idx: usize, key: &str) -> Option<&Attribute> {
        self.graph.nodes[idx].attributes.get(key)
    }

    pub fn delete_attribute(&mut self, idx: usize, key: &str) -> Option<Attribute> {
        self.graph.nodes[idx].attributes.remove(key)
    }

    pub fn clear_attributes(&mut self, idx: usize) {
        self.graph.nodes[idx].attributes.clear();
    }

    /// Atomic replacement of a node's whole input list. Partial states
    /// are never observable.
    pub fn replace_inputs(&mut self, idx: usize, inputs: Vec<String>) {
        self.graph.nodes[idx].inputs = inputs;
    }

    /// Append a new node. Callers pass output names obtained from
    /// `fresh_name`, so collisions cannot occur.
    pub fn make_node(
        &mut self,
        op_type: &str,
        domain: &str,
        inputs: Vec<String>,
        outputs: Vec<String>,
        attributes: BTreeMap<String, Attribute>,
    ) -> usize {
        let name = self.names.fresh_name(op_type);
        for output in &outputs {
            self.names.reserve(output);
        }
        log::debug!("new node {} ({})", name, op_type);
        self.graph.nodes.push(Node {
            name,
            op_type: op_type.to_string(),
            domain: domain.to_string(),
            inputs,
            outputs,
            attributes,
        });
        self.graph.nodes.len() - 1
    }

    /// Materialize a tensor as a graph constant consumable as a regular
    /// input. The constant is owned by the graph from here on.
    pub fn make_constant(&mut self, name: &str, mut tensor: Tensor) -> String {
        tensor.name = name.to_string();
        self.names.reserve(name);
        self.shapes.insert(name.to_string(), tensor.shape.clone());
        self.dtypes.insert(name.to_string(), tensor.data_type);
        self.graph.constants.insert(name.to_string(), tensor);
        name.to_string()
    }

    pub fn get_shape(&self, output: &str) -> Option<&[usize]> {
        self.shapes.get(output).map(|s| s.as_slice())
    }

    pub fn set_shape(&mut self, output: &str, shape: Vec<usize>) {
        self.shapes.insert(output.to_string(), shape);
    }

    pub fn get_dtype(&self, output: &str) -> Option<DataType> {
        self.dtypes.get(output).copied()
    }

    pub fn set_dtype(&mut self, output: &str, dtype: DataType) {
        self.dtypes.insert(output.to_string(), dtype);
    }

    /// Get-or-create a shape probe for `source`. At most one Shape node
    /// per source output is ever emitted; repeated calls return the
    /// first probe's output.
    pub fn shape_of(&mut self, source: &str) -> String {
        if let Some(existing) = self.shape_probes.get(source) {
            return existing.clone();
        }
        let output = self.names.fresh_name(&format!("{}_shape", source));
        self.make_node(
            "Shape",
            "",
            vec![source.to_string()],
            vec![output.clone()],
            BTreeMap::new(),
        );
        let rank = self.shapes.get(source).map(|s| s.len());
        if let Some(rank) = rank {
            self.shapes.insert(output.clone(), vec![rank]);
        }
        self.dtypes.insert(output.clone(), DataType::I64);
        self.shape_probes.insert(source.to_string(), output.clone());
        output
    }

    /// Broadcast `input` to the shape carried by `shape_input` (a shape
    /// probe output) via an Expand node.
    pub fn expand_to(&mut self, input: &str, shape_input: &str) -> String {
        let output = self.names.fresh_name(&format!("{}_expand", input));
        self.make_node(
            "Expand",
            "",
            vec![input.to_string(), shape_input.to_string()],
            vec![output.clone()],
            BTreeMap::new(),
        );
        // When the probe's source has a known static shape, the Expand
        // output carries that shape.
        let reference_shape = self
            .shape_probes
            .iter()
            .find(|(_, probe)| probe.as_str() == shape_input)
            .and_then(|(source, _)| self.shapes.get(source).cloned());
        if let Some(shape) = reference_shape {
            self.shapes.insert(output.clone(), shape);
        }
        if let Some(dtype) = self.get_dtype(input) {
            self.dtypes.insert(output.clone(), dtype);
        }
        output
    }

    /// Wrap `input` with an Unsqueeze along the leading axis.
    pub fn unsqueeze_leading(&mut self, input: &str) -> String {
        let output = self.names.fresh_name(&format!("{}_unsqueeze", input));
        let mut attrs = BTreeMap::new();
        attrs.insert("axes".to_string(), Attribute::Ints(vec![0]));
        self.make_node(
            "Unsqueeze",
            "",
            vec![input.to_string()],
            vec![output.clone()],
            attrs,
        );
        if let Some(shape) = self.shapes.get(input).cloned() {
            let mut unsqueezed = Vec::with_capacity(shape.len() + 1);
            unsqueezed.push(1);
            unsqueezed.extend(shape);
            self.shapes.insert(output.clone(), unsqueezed);
        }
        if let Some(dtype) = self.get_dtype(input) {
            self.dtypes.insert(output.clone(), dtype);
        }
        output
    }

    /// Concatenate along the leading axis into one stacked tensor.
    pub fn stack_leading(&mut self, inputs: &[String]) -> String {
        let output = self.names.fresh_name("stack");
        let mut attrs = BTreeMap::new();
        attrs.insert("axis".to_string(), Attribute::Int(0));
        self.make_node(
            "Concat",
            "",
            inputs.to_vec(),
            vec![output.clone()],
            attrs,
        );
        let mut known: Vec<Vec<usize>> = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.shapes.get(input) {
                Some(shape) if !shape.is_empty() => known.push(shape.clone()),
                _ => {
                    known.clear();
                    break;
                }
            }
        }
        if known.len() == inputs.len()
            && !known.is_empty()
            && known.iter().all(|s| s[1..] == known[0][1..])
        {
            let leading: usize = known.iter().map(|s| s[0]).sum();
            let mut stacked = vec![leading];
            stacked.extend_from_slice(&known[0][1..]);
            self.shapes.insert(output.clone(), stacked);
        }
        if let Some(first) = inputs.first() {
            if let Some(dtype) = self.get_dtype(first) {
                self.dtypes.insert(output.clone(), dtype);
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_like(name: &str, shape: Vec<usize>) -> Tensor {
        Tensor {
            name: name.to_string(),
            shape,
            data_type: DataType::String,
            data: None,
        }
    }

    #[test]
    fn test_fresh_names_skip_reserved() {
        let mut names = NameGenerator::new();
        names.reserve("x_0");
        let a = names.fresh_name("x");
        let b = names.fresh_name("x");
        assert_ne!(a, "x_0");
        assert_ne!(a, b);
    }

    #[test]
    fn test_make_constant_updates_caches() {
        let mut ctx = GraphContext::new(GraphIR::new());
        ctx.make_constant("buckets", Tensor::int64("buckets", &[10]));
        assert_eq!(ctx.get_shape("buckets"), Some(&[1usize][..]));
        assert_eq!(ctx.get_dtype("buckets"), Some(DataType::I64));
        assert_eq!(
            ctx.graph().constants["buckets"].int64_values(),
            Some(vec![10])
        );
    }

    #[test]
    fn test_shape_probe_is_created_once() {
        let mut graph = GraphIR::new();
        graph.inputs.push(Tensor {
            name: "x".to_string(),
            shape: vec![4],
            data_type: DataType::String,
            data: None,
        });
        let mut ctx = GraphContext::new(graph);

        let first = ctx.shape_of("x");
        let second = ctx.shape_of("x");
        assert_eq!(first, second);

        let probes = ctx
            .graph()
            .nodes
            .iter()
            .filter(|n| n.op_type == "Shape")
            .count();
        assert_eq!(probes, 1);
    }

    #[test]
    fn test_expand_tracks_reference_shape() {
        let mut graph = GraphIR::new();
        graph.inputs.push(string_like("s", vec![]));
        graph.inputs.push(string_like("r", vec![5]));
        let mut ctx = GraphContext::new(graph);

        let probe = ctx.shape_of("r");
        let out = ctx.expand_to("s", &probe);
        assert_eq!(ctx.get_shape(&out), Some(&[5usize][..]));
        assert_eq!(ctx.get_dtype(&out), Some(DataType::String));
    }

    #[test]
    fn test_unsqueeze_tracks_shape() {
        let mut graph = GraphIR::new();
        graph.inputs.push(Tensor {
            name: "x".to_string(),
            shape: vec![3],
            data_type: DataType::F32,
            data: None,
        });
        let mut ctx = GraphContext::new(graph);

        let out = ctx.unsqueeze_leading("x");
        assert_eq!(ctx.get_shape(&out), Some(&[1usize, 3][..]));
    }

    #[test]
    fn test_stack_sums_leading_dim() {
        let mut graph = GraphIR::new();
        for name in ["a", "b"] {
            graph.inputs.push(Tensor {
                name: name.to_string(),
                shape: vec![1, 5],
                data_type: DataType::F32,
                data: None,
            });
        }
        let mut ctx = GraphContext::new(graph);

        let out = ctx.stack_leading(&["a".to_string(), "b".to_string()]);
        assert_eq!(ctx.get_shape(&out), Some(&[2usize, 5][..]));
    }
}
