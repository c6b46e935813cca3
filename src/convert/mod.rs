use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use thiserror::Error;

use crate::ir::context::GraphContext;
use crate::ir::OpDescriptor;

pub mod string_ops;

/// The standard (default) operator domain.
pub const ONNX_DOMAIN: &str = "";
/// Target domain for operators relocated out of the standard namespace.
pub const CONTRIB_OPS_DOMAIN: &str = "ai.onnx.contrib";

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("no handler for {op} (domain \"{domain}\") at opset {version}")]
    NoHandlerFound {
        op: String,
        domain: String,
        version: i64,
    },
    #[error("unsupported configuration on node {node}: {reason}")]
    UnsupportedConfiguration { node: String, reason: String },
    #[error("duplicate registration for {op} (domain \"{domain}\") version {version}")]
    DuplicateRegistration {
        op: String,
        domain: String,
        version: i64,
    },
    #[error("malformed attribute \"{key}\" on node {node}: {reason}")]
    MalformedAttribute {
        node: String,
        key: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoHandlerFound,
    UnsupportedConfiguration,
    DuplicateRegistration,
    MalformedAttribute,
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::NoHandlerFound { .. } => ErrorKind::NoHandlerFound,
            ConversionError::UnsupportedConfiguration { .. } => {
                ErrorKind::UnsupportedConfiguration
            }
            ConversionError::DuplicateRegistration { .. } => ErrorKind::DuplicateRegistration,
            ConversionError::MalformedAttribute { .. } => ErrorKind::MalformedAttribute,
        }
    }
}

/// One operator's rewrite rule for one target-vocabulary version.
///
/// A handler is a pure function of (node, context): it must validate
/// every precondition before the first context mutation, so a failed
/// node is left byte-for-byte unchanged.
pub trait ConversionHandler {
    fn apply(&self, node: usize, ctx: &mut GraphContext) -> Result<(), ConversionError>;
}

/// Maps (op name, domain) to versioned handlers. Populated once at
/// startup, queried once per node during a pass.
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), BTreeMap<i64, Rc<dyn ConversionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under an exact (name, domain, version) triple.
    /// The same handler instance may be registered under many names.
    pub fn register(
        &mut self,
        desc: OpDescriptor,
        handler: Rc<dyn ConversionHandler>,
    ) -> Result<(), ConversionError> {
        let versions = self
            .handlers
            .entry((desc.name.clone(), desc.domain.clone()))
            .or_default();
        if versions.contains_key(&desc.version) {
            return Err(ConversionError::DuplicateRegistration {
                op: desc.name,
                domain: desc.domain,
                version: desc.version,
            });
        }
        versions.insert(desc.version, handler);
        Ok(())
    }

    /// Select the handler with the greatest registered version not
    /// exceeding the opset version governing the pass.
    pub fn resolve(
        &self,
        op: &str,
        domain: &str,
        version: i64,
    ) -> Result<Rc<dyn ConversionHandler>, ConversionError> {
        self.handlers
            .get(&(op.to_string(), domain.to_string()))
            .and_then(|versions| versions.range(..=version).next_back())
            .map(|(_, handler)| Rc::clone(handler))
            .ok_or_else(|| ConversionError::NoHandlerFound {
                op: op.to_string(),
                domain: domain.to_string(),
                version,
            })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-node outcomes of one conversion pass, in driver iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionReport {
    pub converted: Vec<String>,
    pub failed: Vec<(String, ErrorKind)>,
}

impl ConversionReport {
    pub fn all_converted(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run one conversion pass over every node present when the pass
/// starts, in declaration order. Node-level failures are recorded and
/// the pass continues; helper nodes appended by handlers are created
/// already in target form and are not revisited.
pub fn convert(
    registry: &HandlerRegistry,
    ctx: &mut GraphContext,
    target_version: i64,
) -> ConversionReport {
    let mut report = ConversionReport::default();
    let initial = ctx.node_count();
    for idx in 0..initial {
        let (name, op, domain) = {
            let node = ctx.node(idx);
            (node.name.clone(), node.op_type.clone(), node.domain.clone())
        };
        let outcome = registry
            .resolve(&op, &domain, target_version)
            .and_then(|handler| handler.apply(idx, ctx));
        match outcome {
            Ok(()) => {
                log::debug!("converted {} ({})", name, op);
                report.converted.push(name);
            }
            Err(err) => {
                log::warn!("could not convert {}: {}", name, err);
                report.failed.push((name, err.kind()));
            }
        }
    }
    report
}
