//! Shared fixtures for integration tests

#![allow(dead_code)]

use blockgraph::{BlockFactory, BlockGraph, BlockId, BlockObserver, BlockUpdate, ModelConfig};
use parking_lot::Mutex;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .compact()
            .try_init();
    });
}

pub const DEFINITIONS: &str = r#"[
    {
        "type": "math_number",
        "message0": "%1",
        "args0": [{"type": "field_number", "name": "NUM", "value": 0}],
        "output": "Number",
        "colour": 230
    },
    {
        "type": "logic_boolean",
        "message0": "%1",
        "args0": [{"type": "field_dropdown", "name": "BOOL", "options": [["true", "TRUE"], ["false", "FALSE"]]}],
        "output": "Boolean"
    },
    {
        "type": "text",
        "message0": "\" %1 \"",
        "args0": [{"type": "field_input", "name": "TEXT", "text": ""}],
        "output": "String"
    },
    {
        "type": "text_print",
        "message0": "print %1",
        "args0": [{"type": "input_value", "name": "TEXT"}],
        "previousStatement": null,
        "nextStatement": null
    },
    {
        "type": "math_arithmetic",
        "message0": "%1 + %2",
        "args0": [
            {"type": "input_value", "name": "A", "check": "Number"},
            {"type": "input_value", "name": "B", "check": "Number"}
        ],
        "inputsInline": true,
        "output": "Number"
    },
    {
        "type": "variables_get",
        "message0": "%1",
        "args0": [{"type": "field_variable", "name": "VAR", "variable": "item"}],
        "output": null
    },
    {
        "type": "controls_if",
        "message0": "if %1",
        "args0": [{"type": "input_value", "name": "IF0", "check": "Boolean"}],
        "message1": "do %1",
        "args1": [{"type": "input_statement", "name": "DO0"}],
        "previousStatement": null,
        "nextStatement": null,
        "mutator": "controls_if_mutator"
    }
]"#;

pub fn factory() -> BlockFactory {
    init_tracing();
    let mut factory = BlockFactory::with_config(ModelConfig {
        workspace_id: "test-workspace".to_string(),
        ..Default::default()
    });
    let report = factory.load_definitions(DEFINITIONS).expect("definitions parse");
    assert!(report.is_complete(), "skipped: {:?}", report.skipped);
    factory
}

pub fn graph() -> BlockGraph {
    BlockGraph::with_config(&ModelConfig {
        workspace_id: "test-workspace".to_string(),
        ..Default::default()
    })
}

/// Records every observer callback together with the number of events that
/// were pending when it fired.
#[derive(Default)]
pub struct UpdateRecorder {
    pub updates: Mutex<Vec<(BlockId, BlockUpdate, usize)>>,
}

impl BlockObserver for UpdateRecorder {
    fn on_block_updated(&self, graph: &BlockGraph, block: &BlockId, update: BlockUpdate) {
        self.updates
            .lock()
            .push((block.clone(), update, graph.pending_events().len()));
    }
}

pub fn recorder() -> Arc<UpdateRecorder> {
    Arc::new(UpdateRecorder::default())
}
