//! Handlers for source string operators that land in the contrib
//! string-ops domain.

use std::rc::Rc;

use crate::convert::{
    ConversionError, ConversionHandler, HandlerRegistry, CONTRIB_OPS_DOMAIN, ONNX_DOMAIN,
};
use crate::ir::context::GraphContext;
use crate::ir::{OpDescriptor, Tensor};

fn required_int(
    ctx: &GraphContext,
    node: usize,
    key: &str,
) -> Result<i64, ConversionError> {
    let name = &ctx.node(node).name;
    match ctx.get_attribute(node, key) {
        Some(attr) => attr.as_int().ok_or_else(|| ConversionError::MalformedAttribute {
            node: name.clone(),
            key: key.to_string(),
            reason: "expected an integer".to_string(),
        }),
        None => Err(ConversionError::MalformedAttribute {
            node: name.clone(),
            key: key.to_string(),
            reason: "attribute is missing".to_string(),
        }),
    }
}

fn required_text(
    ctx: &GraphContext,
    node: usize,
    key: &str,
) -> Result<String, ConversionError> {
    let name = &ctx.node(node).name;
    match ctx.get_attribute(node, key) {
        Some(attr) => attr.as_text().ok_or_else(|| ConversionError::MalformedAttribute {
            node: name.clone(),
            key: key.to_string(),
            reason: "expected a string".to_string(),
        }),
        None => Err(ConversionError::MalformedAttribute {
            node: name.clone(),
            key: key.to_string(),
            reason: "attribute is missing".to_string(),
        }),
    }
}

/// Relocates an operator into the contrib domain, leaving its name,
/// attributes and wiring untouched. One instance serves every source
/// operator whose semantics carry over unchanged.
pub struct Redomain;

impl ConversionHandler for Redomain {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError> {
        let op = ctx.node(node).op_type.clone();
        ctx.set_op(node, &op, CONTRIB_OPS_DOMAIN);
        Ok(())
    }
}

/// Relocates an operator and drops all of its attributes: the target
/// operator encodes no configuration via attributes.
pub struct StripAttributes;

impl ConversionHandler for StripAttributes {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError> {
        let op = ctx.node(node).op_type.clone();
        ctx.set_op(node, &op, CONTRIB_OPS_DOMAIN);
        ctx.clear_attributes(node);
        Ok(())
    }
}

/// `num_buckets` moves from a static attribute to a trailing int64
/// constant input.
pub struct StringToHashBucketFast;

impl ConversionHandler for StringToHashBucketFast {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError> {
        let buckets = required_int(ctx, node, "num_buckets")?;

        let name = ctx.node(node).name.clone();
        log::debug!("{}: promoting num_buckets={} to a constant input", name, buckets);
        let op = ctx.node(node).op_type.clone();
        ctx.set_op(node, &op, CONTRIB_OPS_DOMAIN);

        let const_name = ctx.fresh_name(&format!("{}_num_buckets", name));
        ctx.make_constant(&const_name, Tensor::int64(&const_name, &[buckets]));
        ctx.delete_attribute(node, "num_buckets");

        let mut inputs = ctx.node(node).inputs.clone();
        inputs.push(const_name);
        ctx.replace_inputs(node, inputs);
        Ok(())
    }
}

/// `pattern` and `rewrite` move from attributes to string constant
/// inputs. Only global replacement has a target counterpart, so
/// `replace_global` must be nonzero; this is checked before any
/// mutation so a rejected node comes back unchanged.
pub struct StaticRegexReplace;

impl ConversionHandler for StaticRegexReplace {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError> {
        let pattern = required_text(ctx, node, "pattern")?;
        let rewrite = required_text(ctx, node, "rewrite")?;
        let replace_global = required_int(ctx, node, "replace_global")?;
        if replace_global == 0 {
            return Err(ConversionError::UnsupportedConfiguration {
                node: ctx.node(node).name.clone(),
                reason: "replace_global=0 (first-match replacement) has no target operator"
                    .to_string(),
            });
        }

        let name = ctx.node(node).name.clone();
        log::debug!("{}: promoting pattern and rewrite to constant inputs", name);
        ctx.set_op(node, "StringRegexReplace", CONTRIB_OPS_DOMAIN);

        let pattern_name = ctx.fresh_name(&format!("{}_pattern", name));
        ctx.make_constant(&pattern_name, Tensor::string(&pattern_name, &pattern));
        let rewrite_name = ctx.fresh_name(&format!("{}_rewrite", name));
        ctx.make_constant(&rewrite_name, Tensor::string(&rewrite_name, &rewrite));

        ctx.delete_attribute(node, "pattern");
        ctx.delete_attribute(node, "rewrite");
        ctx.delete_attribute(node, "replace_global");

        let mut inputs = ctx.node(node).inputs.clone();
        inputs.push(pattern_name);
        inputs.push(rewrite_name);
        ctx.replace_inputs(node, inputs);
        Ok(())
    }
}

/// Variadic join. The target operator takes one stacked tensor, a
/// separator and an axis, so every input is unsqueezed along a leading
/// axis and concatenated. A scalar input is first broadcast to the
/// shape of the first non-scalar sibling; uniformly scalar (or
/// uniformly non-scalar) inputs stack directly, with no probe and no
/// broadcast nodes.
pub struct StringJoin;

impl ConversionHandler for StringJoin {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError> {
        let separator = match ctx.get_attribute(node, "separator") {
            Some(attr) => attr.as_text().ok_or_else(|| ConversionError::MalformedAttribute {
                node: ctx.node(node).name.clone(),
                key: "separator".to_string(),
                reason: "expected a string".to_string(),
            })?,
            None => String::new(),
        };

        let name = ctx.node(node).name.clone();
        let inputs = ctx.node(node).inputs.clone();
        let shapes: Vec<Option<Vec<usize>>> = inputs
            .iter()
            .map(|input| ctx.get_shape(input).map(|s| s.to_vec()))
            .collect();

        let is_scalar = |shape: &Option<Vec<usize>>| matches!(shape, Some(s) if s.is_empty());
        let reference = inputs
            .iter()
            .zip(&shapes)
            .find(|(_, shape)| matches!(shape, Some(s) if !s.is_empty()))
            .map(|(input, _)| input.clone());
        let needs_broadcast = shapes.iter().any(is_scalar) && reference.is_some();
        log::debug!(
            "{}: stacking {} inputs (broadcast={})",
            name,
            inputs.len(),
            needs_broadcast
        );

        ctx.set_op(node, "StringJoin", CONTRIB_OPS_DOMAIN);
        ctx.delete_attribute(node, "separator");

        let probe = if needs_broadcast {
            reference.as_deref().map(|r| ctx.shape_of(r))
        } else {
            None
        };

        let mut stacked_inputs = Vec::with_capacity(inputs.len());
        for (input, shape) in inputs.iter().zip(&shapes) {
            let source = match (&probe, is_scalar(shape)) {
                (Some(probe), true) => ctx.expand_to(input, probe),
                _ => input.clone(),
            };
            stacked_inputs.push(ctx.unsqueeze_leading(&source));
        }
        let stacked = ctx.stack_leading(&stacked_inputs);

        let sep_name = ctx.fresh_name(&format!("{}_separator", name));
        ctx.make_constant(&sep_name, Tensor::string(&sep_name, &separator));
        let axis_name = ctx.fresh_name(&format!("{}_axis", name));
        ctx.make_constant(&axis_name, Tensor::int64(&axis_name, &[0]));

        ctx.replace_inputs(node, vec![stacked, sep_name, axis_name]);
        Ok(())
    }
}

/// Populate a registry with every handler of the string-ops family.
/// Several source operators funnel through shared instances.
pub fn register_defaults(registry: &mut HandlerRegistry) -> Result<(), ConversionError> {
    let redomain: Rc<dyn ConversionHandler> = Rc::new(Redomain);
    for op in [
        "SparseToDense",
        "ParallelDynamicStitch",
        "SegmentSum",
        "StringSplit",
        "SparseFillEmptyRows",
    ] {
        registry.register(OpDescriptor::new(op, ONNX_DOMAIN, 1), Rc::clone(&redomain))?;
    }

    let strip: Rc<dyn ConversionHandler> = Rc::new(StripAttributes);
    for op in ["StringUpper", "StringLower"] {
        registry.register(OpDescriptor::new(op, ONNX_DOMAIN, 1), Rc::clone(&strip))?;
    }

    registry.register(
        OpDescriptor::new("StringToHashBucketFast", ONNX_DOMAIN, 1),
        Rc::new(StringToHashBucketFast),
    )?;
    registry.register(
        OpDescriptor::new("StaticRegexReplace", ONNX_DOMAIN, 1),
        Rc::new(StaticRegexReplace),
    )?;
    registry.register(
        OpDescriptor::new("StringJoin", ONNX_DOMAIN, 1),
        Rc::new(StringJoin),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{convert, ErrorKind};
    use crate::ir::{Attribute, DataType, GraphIR, Node};
    use std::collections::BTreeMap;

    fn string_input(name: &str, shape: Vec<usize>) -> Tensor {
        Tensor {
            name: name.to_string(),
            shape,
            data_type: DataType::String,
            data: None,
        }
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        register_defaults(&mut registry).unwrap();
        registry
    }

    fn count_ops(ctx: &GraphContext, op: &str) -> usize {
        ctx.graph()
            .nodes
            .iter()
            .filter(|n| n.op_type == op)
            .count()
    }

    #[test]
    fn test_redomain_leaves_wiring_untouched() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("validate_indices".to_string(), Attribute::Int(1));
        graph.nodes.push(Node {
            name: "std".to_string(),
            op_type: "SparseToDense".to_string(),
            domain: String::new(),
            inputs: vec!["i".to_string(), "s".to_string(), "v".to_string()],
            outputs: vec!["d".to_string()],
            attributes: attrs.clone(),
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());
        let node = ctx.node(0);
        assert_eq!(node.op_type, "SparseToDense");
        assert_eq!(node.domain, CONTRIB_OPS_DOMAIN);
        assert_eq!(node.inputs, vec!["i", "s", "v"]);
        assert_eq!(node.attributes, attrs);
    }

    #[test]
    fn test_strip_attributes_drops_configuration() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "encoding".to_string(),
            Attribute::String("utf-8".to_string()),
        );
        graph.nodes.push(Node {
            name: "upper".to_string(),
            op_type: "StringUpper".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());
        assert_eq!(ctx.node(0).domain, CONTRIB_OPS_DOMAIN);
        assert!(ctx.node(0).attributes.is_empty());
    }

    #[test]
    fn test_hash_bucket_promotes_num_buckets() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("num_buckets".to_string(), Attribute::Int(10));
        graph.nodes.push(Node {
            name: "hash".to_string(),
            op_type: "StringToHashBucketFast".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());

        let node = ctx.node(0);
        assert_eq!(node.domain, CONTRIB_OPS_DOMAIN);
        assert!(node.attributes.is_empty());
        assert_eq!(node.inputs.len(), 2);
        assert_eq!(node.inputs[0], "x");

        let buckets = &ctx.graph().constants[&node.inputs[1]];
        assert_eq!(buckets.data_type, DataType::I64);
        assert_eq!(buckets.shape, vec![1]);
        assert_eq!(buckets.int64_values(), Some(vec![10]));
    }

    #[test]
    fn test_hash_bucket_rejects_non_integer_attribute() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "num_buckets".to_string(),
            Attribute::String("ten".to_string()),
        );
        graph.nodes.push(Node {
            name: "hash".to_string(),
            op_type: "StringToHashBucketFast".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);
        let before = ctx.node(0).clone();

        let report = convert(&registry(), &mut ctx, 1);
        assert_eq!(
            report.failed,
            vec![("hash".to_string(), ErrorKind::MalformedAttribute)]
        );
        assert_eq!(ctx.node(0), &before);
    }

    #[test]
    fn test_regex_replace_materializes_pattern_and_rewrite() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("pattern".to_string(), Attribute::String("a".to_string()));
        attrs.insert("rewrite".to_string(), Attribute::String("b".to_string()));
        attrs.insert("replace_global".to_string(), Attribute::Int(1));
        graph.nodes.push(Node {
            name: "regex".to_string(),
            op_type: "StaticRegexReplace".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());

        let node = ctx.node(0);
        assert_eq!(node.op_type, "StringRegexReplace");
        assert_eq!(node.domain, CONTRIB_OPS_DOMAIN);
        assert!(node.attributes.is_empty());
        assert_eq!(node.inputs.len(), 3);
        assert_eq!(node.inputs[0], "x");

        let pattern = &ctx.graph().constants[&node.inputs[1]];
        assert_eq!(pattern.data_type, DataType::String);
        assert_eq!(pattern.data.as_deref(), Some(b"a".as_slice()));
        let rewrite = &ctx.graph().constants[&node.inputs[2]];
        assert_eq!(rewrite.data.as_deref(), Some(b"b".as_slice()));
    }

    #[test]
    fn test_regex_replace_rejects_first_match_mode_without_mutation() {
        let mut graph = GraphIR::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("pattern".to_string(), Attribute::String("a".to_string()));
        attrs.insert("rewrite".to_string(), Attribute::String("b".to_string()));
        attrs.insert("replace_global".to_string(), Attribute::Int(0));
        graph.nodes.push(Node {
            name: "regex".to_string(),
            op_type: "StaticRegexReplace".to_string(),
            domain: String::new(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);
        let before = ctx.node(0).clone();

        let report = convert(&registry(), &mut ctx, 1);
        assert_eq!(
            report.failed,
            vec![("regex".to_string(), ErrorKind::UnsupportedConfiguration)]
        );
        assert_eq!(ctx.node(0), &before);
        assert_eq!(ctx.graph().nodes.len(), 1);
        assert!(ctx.graph().constants.is_empty());
    }

    #[test]
    fn test_join_of_scalars_stacks_without_broadcast() {
        let mut graph = GraphIR::new();
        for name in ["a", "b", "c"] {
            graph.inputs.push(string_input(name, vec![]));
        }
        graph.nodes.push(Node {
            name: "join".to_string(),
            op_type: "StringJoin".to_string(),
            domain: String::new(),
            inputs: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            outputs: vec!["y".to_string()],
            attributes: BTreeMap::new(),
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());

        assert_eq!(count_ops(&ctx, "Shape"), 0);
        assert_eq!(count_ops(&ctx, "Expand"), 0);
        assert_eq!(count_ops(&ctx, "Unsqueeze"), 3);
        assert_eq!(count_ops(&ctx, "Concat"), 1);

        let node = ctx.node(0);
        assert_eq!(node.op_type, "StringJoin");
        assert_eq!(node.domain, CONTRIB_OPS_DOMAIN);
        assert!(node.attributes.is_empty());
        assert_eq!(node.inputs.len(), 3);

        // Default separator materializes as an empty string.
        let separator = &ctx.graph().constants[&node.inputs[1]];
        assert_eq!(separator.data_type, DataType::String);
        assert_eq!(separator.data.as_deref(), Some(b"".as_slice()));
        let axis = &ctx.graph().constants[&node.inputs[2]];
        assert_eq!(axis.int64_values(), Some(vec![0]));

        // The stacked tensor is the Concat output with shape [3].
        assert_eq!(ctx.get_shape(&node.inputs[0]), Some(&[3usize][..]));
    }

    #[test]
    fn test_join_broadcasts_scalars_against_first_nonscalar_sibling() {
        let mut graph = GraphIR::new();
        graph.inputs.push(string_input("a", vec![]));
        graph.inputs.push(string_input("b", vec![5]));
        graph.inputs.push(string_input("c", vec![]));
        graph.inputs.push(string_input("d", vec![]));
        graph.nodes.push(Node {
            name: "join".to_string(),
            op_type: "StringJoin".to_string(),
            domain: String::new(),
            inputs: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ],
            outputs: vec!["y".to_string()],
            attributes: BTreeMap::new(),
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());

        // One probe for the reference, one Expand per scalar input.
        assert_eq!(count_ops(&ctx, "Shape"), 1);
        assert_eq!(count_ops(&ctx, "Expand"), 3);
        assert_eq!(count_ops(&ctx, "Unsqueeze"), 4);
        assert_eq!(count_ops(&ctx, "Concat"), 1);

        // The probe reads the first non-scalar input.
        let probe = ctx
            .graph()
            .nodes
            .iter()
            .find(|n| n.op_type == "Shape")
            .unwrap();
        assert_eq!(probe.inputs, vec!["b"]);

        // Broadcast outputs keep the reference's static shape, so the
        // stacked tensor does too.
        let stacked = ctx.node(0).inputs[0].clone();
        assert_eq!(ctx.get_shape(&stacked), Some(&[4usize, 5][..]));
    }

    #[test]
    fn test_join_of_uniform_vectors_needs_no_broadcast() {
        let mut graph = GraphIR::new();
        graph.inputs.push(string_input("a", vec![4]));
        graph.inputs.push(string_input("b", vec![4]));
        let mut attrs = BTreeMap::new();
        attrs.insert("separator".to_string(), Attribute::String("-".to_string()));
        graph.nodes.push(Node {
            name: "join".to_string(),
            op_type: "StringJoin".to_string(),
            domain: String::new(),
            inputs: vec!["a".to_string(), "b".to_string()],
            outputs: vec!["y".to_string()],
            attributes: attrs,
        });
        let mut ctx = GraphContext::new(graph);

        let report = convert(&registry(), &mut ctx, 1);
        assert!(report.all_converted());

        assert_eq!(count_ops(&ctx, "Shape"), 0);
        assert_eq!(count_ops(&ctx, "Expand"), 0);
        assert_eq!(count_ops(&ctx, "Unsqueeze"), 2);

        let node = ctx.node(0);
        let separator = &ctx.graph().constants[&node.inputs[1]];
        assert_eq!(separator.data.as_deref(), Some(b"-".as_slice()));
        assert_eq!(ctx.get_shape(&node.inputs[0]), Some(&[2usize, 4][..]));
    }
}
