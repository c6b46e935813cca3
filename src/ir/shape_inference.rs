use crate::ir::{DataType, GraphIR};
use std::collections::HashMap;

pub struct ShapeInference;

impl ShapeInference {
    /// Seed the static shape and dtype caches from graph inputs and
    /// constants. Intermediate outputs stay unknown unless the upstream
    /// producer recorded them; a full inference engine is not part of
    /// this crate.
    pub fn seed(
        graph: &GraphIR,
    ) -> (HashMap<String, Vec<usize>>, HashMap<String, DataType>) {
        let mut shapes = HashMap::new();
        let mut dtypes = HashMap::new();

        for input in &graph.inputs {
            shapes.insert(input.name.clone(), input.shape.clone());
            dtypes.insert(input.name.clone(), input.data_type);
        }

        for (name, constant) in &graph.constants {
            shapes.insert(name.clone(), constant.shape.clone());
            dtypes.insert(name.clone(), constant.data_type);
        }

        (shapes, dtypes)
    }
}
