//! Structural behaviour of the block graph: connections, shadows, reshape,
//! mutators and traversal.

mod common;

use blockgraph::{
    BlockId, BlockLoadError, BlockTemplate, BlockUpdate, ConnectionError, ConnectionRef, ConnectionSlot,
    FieldValue, IfElseMutator, Input, ShapeInput, StructureError,
};
use common::{factory, graph, recorder};

fn obtain(factory: &blockgraph::BlockFactory, graph: &mut blockgraph::BlockGraph, block_type: &str) -> BlockId {
    factory
        .obtain(graph, &BlockTemplate::of_type(block_type))
        .unwrap()
}

#[test]
fn connect_links_both_sides_and_disconnect_clears_both() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let text = obtain(&factory, &mut graph, "text");

    let slot = ConnectionRef::input(&print, "TEXT");
    let output = ConnectionRef::output(&text);
    graph.connect(&slot, &output).unwrap();
    assert_eq!(graph.connection(&slot).unwrap().target(), Some(&output));
    assert_eq!(graph.connection(&output).unwrap().target(), Some(&slot));
    assert_eq!(graph.parent_block(&text), Some(&print));

    // Connecting to the current target again changes nothing.
    graph.connect(&output, &slot).unwrap();

    graph.disconnect(&output).unwrap();
    assert!(graph.connection(&slot).unwrap().target().is_none());
    assert!(graph.connection(&output).unwrap().target().is_none());
    // A second disconnect is a no-op.
    graph.disconnect(&slot).unwrap();
}

#[test]
fn input_names_resolve_case_insensitively() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let text = obtain(&factory, &mut graph, "text");
    graph
        .connect(&ConnectionRef::input(&print, "text"), &ConnectionRef::output(&text))
        .unwrap();
    let canonical = ConnectionRef::input(&print, "TEXT");
    assert_eq!(graph.connection(&ConnectionRef::output(&text)).unwrap().target(), Some(&canonical));
}

#[test]
fn same_type_connections_never_link() {
    let factory = factory();
    let mut graph = graph();
    let a = obtain(&factory, &mut graph, "math_number");
    let b = obtain(&factory, &mut graph, "math_number");
    let err = graph
        .connect(&ConnectionRef::output(&a), &ConnectionRef::output(&b))
        .unwrap_err();
    assert!(matches!(err, StructureError::Connection(ConnectionError::WrongType { .. })));

    let p = obtain(&factory, &mut graph, "text_print");
    let q = obtain(&factory, &mut graph, "text_print");
    let err = graph
        .connect(&ConnectionRef::previous(&p), &ConnectionRef::previous(&q))
        .unwrap_err();
    assert!(matches!(err, StructureError::Connection(ConnectionError::WrongType { .. })));
}

#[test]
fn refusals_name_the_reason() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let sum = obtain(&factory, &mut graph, "math_arithmetic");
    let text = obtain(&factory, &mut graph, "text");
    let number = obtain(&factory, &mut graph, "math_number");
    let other = obtain(&factory, &mut graph, "math_number");

    let err = graph
        .connect(&ConnectionRef::next(&print), &ConnectionRef::previous(&print))
        .unwrap_err();
    assert_eq!(err, StructureError::Connection(ConnectionError::SelfConnection));

    let err = graph
        .connect(&ConnectionRef::input(&sum, "A"), &ConnectionRef::output(&text))
        .unwrap_err();
    assert!(matches!(err, StructureError::Connection(ConnectionError::ChecksFailed { .. })));

    graph
        .connect(&ConnectionRef::input(&sum, "A"), &ConnectionRef::output(&number))
        .unwrap();
    let err = graph
        .connect(&ConnectionRef::input(&sum, "A"), &ConnectionRef::output(&other))
        .unwrap_err();
    assert_eq!(err, StructureError::Connection(ConnectionError::AlreadyConnected));

    let err = graph
        .connect(&ConnectionRef::input(&sum, "MISSING"), &ConnectionRef::output(&other))
        .unwrap_err();
    assert!(matches!(err, StructureError::InputNotFound { .. }));
}

#[test]
fn cycles_are_refused() {
    let factory = factory();
    let mut graph = graph();
    let first = obtain(&factory, &mut graph, "text_print");
    let second = obtain(&factory, &mut graph, "text_print");
    graph
        .connect(&ConnectionRef::next(&first), &ConnectionRef::previous(&second))
        .unwrap();
    let err = graph
        .connect(&ConnectionRef::next(&second), &ConnectionRef::previous(&first))
        .unwrap_err();
    assert!(matches!(err, StructureError::Cycle { .. }));
    assert!(graph.connection(&ConnectionRef::next(&second)).unwrap().target().is_none());
}

#[test]
fn shadow_blocks_refuse_variables_and_regular_children() {
    let factory = factory();
    let mut graph = graph();
    let variable = obtain(&factory, &mut graph, "variables_get");
    assert!(matches!(
        graph.set_shadow(&variable, true),
        Err(StructureError::IllegalShadowState(_))
    ));
    assert!(!graph.block(&variable).unwrap().is_shadow());

    let sum = obtain(&factory, &mut graph, "math_arithmetic");
    let number = obtain(&factory, &mut graph, "math_number");
    graph
        .connect(&ConnectionRef::input(&sum, "A"), &ConnectionRef::output(&number))
        .unwrap();
    assert!(graph.set_shadow(&sum, true).is_err());
    // Connected upward.
    assert!(graph.set_shadow(&number, true).is_err());

    let shadow_sum = factory
        .obtain(&mut graph, &BlockTemplate::of_type("math_arithmetic").shadow(true))
        .unwrap();
    let regular = obtain(&factory, &mut graph, "math_number");
    let err = graph
        .connect(&ConnectionRef::input(&shadow_sum, "B"), &ConnectionRef::output(&regular))
        .unwrap_err();
    assert!(matches!(err, StructureError::IllegalShadowState(_)));

    // Every shadow in the graph satisfies the invariant.
    for block in graph.blocks().filter(|b| b.is_shadow()) {
        assert!(!block.contains_variable_field());
        for child in graph.child_blocks(block.id(), true) {
            assert!(graph.block(&child).unwrap().is_shadow());
        }
    }
}

#[test]
fn set_shadow_is_idempotent_and_notifies_once() {
    let factory = factory();
    let mut graph = graph();
    let number = obtain(&factory, &mut graph, "math_number");
    let observer = recorder();
    graph.register_observer(&number, observer.clone()).unwrap();
    assert!(graph.set_shadow(&number, true).unwrap());
    assert!(!graph.set_shadow(&number, true).unwrap());
    let updates = observer.updates.lock();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, BlockUpdate::IsShadow);
}

#[test]
fn reshape_with_current_shape_keeps_attachments() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let text = obtain(&factory, &mut graph, "text");
    let slot = ConnectionRef::input(&print, "TEXT");
    graph.connect(&slot, &ConnectionRef::output(&text)).unwrap();
    let before = graph.connection(&slot).unwrap().clone();

    let observer = recorder();
    graph.register_observer(&print, observer.clone()).unwrap();
    let shape = graph.block(&print).unwrap().current_shape();
    graph.reshape(&print, shape).unwrap();

    assert_eq!(graph.connection(&slot).unwrap(), &before);
    assert_eq!(graph.parent_block(&text), Some(&print));
    let updates = observer.updates.lock();
    assert_eq!(updates.iter().filter(|u| u.1 == BlockUpdate::Shape).count(), 1);
}

#[test]
fn reshape_refuses_dropping_a_connected_input() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let text = obtain(&factory, &mut graph, "text");
    graph
        .connect(&ConnectionRef::input(&print, "TEXT"), &ConnectionRef::output(&text))
        .unwrap();

    let mut shape = graph.block(&print).unwrap().current_shape();
    shape.inputs.clear();
    assert_eq!(
        graph.reshape(&print, shape).unwrap_err(),
        StructureError::InputStillConnected("TEXT".to_string())
    );
    assert_eq!(graph.block(&print).unwrap().inputs().len(), 1);

    let mut shape = graph.block(&print).unwrap().current_shape();
    shape.inputs.push(ShapeInput::Fresh(Input::value("EXTRA", None)));
    graph.reshape(&print, shape).unwrap();
    let extra = graph.block(&print).unwrap().input("EXTRA").unwrap();
    assert_eq!(extra.connection().unwrap().block(), Some(&print));
}

#[test]
fn connecting_a_real_block_hides_the_shadow() {
    let factory = factory();
    let mut graph = graph();
    let sum = factory
        .obtain(
            &mut graph,
            &BlockTemplate::of_type("math_arithmetic").value_shadow("A", BlockTemplate::of_type("math_number")),
        )
        .unwrap();
    let slot = ConnectionRef::input(&sum, "A");
    let shadow = graph.connection(&slot).unwrap().shadow_block().cloned().unwrap();
    assert!(graph.connection(&slot).unwrap().is_shadow_live());

    let number = obtain(&factory, &mut graph, "math_number");
    graph.connect(&slot, &ConnectionRef::output(&number)).unwrap();
    let connection = graph.connection(&slot).unwrap();
    assert_eq!(connection.target_block(), Some(&number));
    assert_eq!(connection.shadow_block(), Some(&shadow));
    assert!(graph.parent_block(&shadow).is_none());
}

/// Shadow fallback is asymmetric: a shadow becomes live when set on an empty
/// slot, but disconnecting the live child later leaves the slot empty.
#[test]
fn disconnecting_live_child_does_not_reactivate_shadow() {
    let factory = factory();
    let mut graph = graph();
    let sum = obtain(&factory, &mut graph, "math_arithmetic");
    let number = obtain(&factory, &mut graph, "math_number");
    let shadow = factory
        .obtain(&mut graph, &BlockTemplate::of_type("math_number").shadow(true))
        .unwrap();
    let slot = ConnectionRef::input(&sum, "B");

    graph
        .connect_or_throw("value", &slot, Some(&number), Some(&shadow))
        .unwrap();
    assert_eq!(graph.connection(&slot).unwrap().target_block(), Some(&number));

    graph.disconnect(&ConnectionRef::output(&number)).unwrap();
    let connection = graph.connection(&slot).unwrap();
    assert!(connection.target().is_none());
    assert_eq!(connection.shadow_block(), Some(&shadow));
    assert!(graph.contains(&shadow));
}

#[test]
fn shadow_only_slot_connects_the_shadow() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let shadow = factory
        .obtain(&mut graph, &BlockTemplate::of_type("text").shadow(true))
        .unwrap();
    let slot = ConnectionRef::input(&print, "TEXT");
    graph.connect_or_throw("value", &slot, None, Some(&shadow)).unwrap();
    assert!(graph.connection(&slot).unwrap().is_shadow_live());
    assert_eq!(graph.parent_block(&shadow), Some(&print));

    // A live shadow cannot be replaced; clearing it removes the shadow block.
    let other = factory
        .obtain(&mut graph, &BlockTemplate::of_type("text").shadow(true))
        .unwrap();
    assert!(graph.set_shadow_connection(&slot, Some(&other)).is_err());
    graph.set_shadow_connection(&slot, None).unwrap();
    assert!(!graph.contains(&shadow));
    assert!(graph.connection(&slot).unwrap().target().is_none());
}

#[test]
fn connect_or_throw_reports_the_tag() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let statement = obtain(&factory, &mut graph, "text_print");
    let err = graph
        .connect_or_throw("value", &ConnectionRef::input(&print, "TEXT"), Some(&statement), None)
        .unwrap_err();
    match err {
        blockgraph::BlockLoadError::Element { tag, block_type, .. } => {
            assert_eq!(tag, "value");
            assert_eq!(block_type.as_deref(), Some("text_print"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn roots_follow_connections() {
    let factory = factory();
    let mut graph = graph();
    let first = obtain(&factory, &mut graph, "text_print");
    let second = obtain(&factory, &mut graph, "text_print");
    let third = obtain(&factory, &mut graph, "text_print");
    graph.add_root(&first).unwrap();
    graph.add_root(&second).unwrap();
    assert_eq!(graph.roots(), &[first.clone(), second.clone()]);

    graph
        .connect(&ConnectionRef::next(&first), &ConnectionRef::previous(&second))
        .unwrap();
    graph
        .connect(&ConnectionRef::next(&second), &ConnectionRef::previous(&third))
        .unwrap();
    assert_eq!(graph.roots(), &[first.clone()]);
    assert_eq!(graph.last_block_in_sequence(&first), Some(&third));
    assert_eq!(graph.root_block(&third), Some(&first));
    assert_eq!(graph.descendants(&first, false), vec![first.clone(), second.clone(), third.clone()]);

    graph.disconnect(&ConnectionRef::previous(&second)).unwrap();
    assert_eq!(graph.roots(), &[first.clone(), second.clone()]);
    assert_eq!(graph.root_block(&third), Some(&second));
}

#[test]
fn dispose_removes_the_subtree() {
    let factory = factory();
    let mut graph = graph();
    let sum = factory
        .obtain(
            &mut graph,
            &BlockTemplate::of_type("math_arithmetic")
                .value_shadow("A", BlockTemplate::of_type("math_number"))
                .value_child("B", BlockTemplate::of_type("math_number")),
        )
        .unwrap();
    assert_eq!(graph.len(), 3);
    let child = graph.child_blocks(&sum, false);
    assert_eq!(child.len(), 1);
    assert!(matches!(graph.dispose(&child[0]), Err(StructureError::NotRoot(_))));

    graph.add_root(&sum).unwrap();
    graph.dispose(&sum).unwrap();
    assert!(graph.is_empty());
    assert!(graph.roots().is_empty());
}

#[test]
fn if_mutator_reshapes_and_serializes() {
    let factory = factory();
    let mut graph = graph();
    let block = obtain(&factory, &mut graph, "controls_if");
    assert_eq!(graph.block(&block).unwrap().mutator_id(), Some(IfElseMutator::ID));

    graph
        .set_mutation(&block, "<mutation elseif=\"1\" else=\"1\"/>")
        .unwrap();
    let names: Vec<&str> = graph
        .block(&block)
        .unwrap()
        .inputs()
        .iter()
        .map(Input::name)
        .collect();
    assert_eq!(names, vec!["IF0", "DO0", "IF1", "DO1", "ELSE"]);
    assert_eq!(
        graph.block(&block).unwrap().mutation().as_deref(),
        Some("<mutation elseif=\"1\" else=\"1\"/>")
    );

    // An input holding a child cannot be mutated away.
    let print = obtain(&factory, &mut graph, "text_print");
    graph
        .connect(&ConnectionRef::input(&block, "ELSE"), &ConnectionRef::previous(&print))
        .unwrap();
    assert!(graph.set_mutation(&block, "<mutation elseif=\"1\"/>").is_err());
    assert!(graph.block(&block).unwrap().input("ELSE").is_some());
    assert!(graph.block(&block).unwrap().has_mutator());

    let err = graph
        .attach_mutator(&block, Box::new(IfElseMutator::new()))
        .unwrap_err();
    assert_eq!(err, StructureError::MutatorAlreadyAttached(block.to_string()));
}

#[test]
fn event_workspace_id_is_owner_thread_only() {
    let factory = factory();
    let mut graph = graph();
    let block = obtain(&factory, &mut graph, "math_number");
    let result = std::thread::scope(|scope| {
        scope
            .spawn(|| graph.set_event_workspace_id(&block, Some("elsewhere")))
            .join()
            .unwrap()
    });
    assert_eq!(result, Err(StructureError::WrongThread));
    graph.set_event_workspace_id(&block, Some("here")).unwrap();
    assert_eq!(graph.block(&block).unwrap().event_workspace_id(), Some("here"));
}

#[test]
fn location_reports_parent_and_input() {
    let factory = factory();
    let mut graph = graph();
    let print = obtain(&factory, &mut graph, "text_print");
    let text = obtain(&factory, &mut graph, "text");
    graph
        .connect(&ConnectionRef::input(&print, "TEXT"), &ConnectionRef::output(&text))
        .unwrap();
    let (parent, input, coordinate) = graph.location_of(&text);
    assert_eq!(parent.as_deref(), Some(print.as_str()));
    assert_eq!(input.as_deref(), Some("TEXT"));
    assert!(coordinate.is_none());
    let upward = graph.block(&text).unwrap().upward_connection().map(|(slot, _)| slot);
    assert_eq!(upward, Some(ConnectionSlot::Output));
}

#[derive(Debug)]
struct CountingMutator {
    detached: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl blockgraph::Mutator for CountingMutator {
    fn mutator_id(&self) -> &str {
        "counting"
    }

    fn on_detached(&mut self, _block: &blockgraph::Block) {
        self.detached.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn serialize(&self, _block: &blockgraph::Block) -> String {
        "<mutation/>".to_string()
    }

    fn update(
        &mut self,
        _graph: &mut blockgraph::BlockGraph,
        _block: &BlockId,
        _mutation: &str,
    ) -> Result<(), StructureError> {
        Ok(())
    }
}

#[test]
fn dispose_detaches_every_mutator() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let detached = Arc::new(AtomicUsize::new(0));
    let mut factory = factory();
    let counter = Arc::clone(&detached);
    factory.register_mutator(
        "counting",
        Arc::new(move || {
            Box::new(CountingMutator {
                detached: Arc::clone(&counter),
            }) as Box<dyn blockgraph::Mutator>
        }),
    );
    factory
        .load_definitions(
            r#"{"type": "counted", "message0": "run %1", "args0": [{"type": "input_statement", "name": "DO"}],
                "previousStatement": null, "nextStatement": null, "mutator": "counting"}"#,
        )
        .unwrap();

    let mut graph = graph();
    let outer = factory
        .obtain(
            &mut graph,
            &BlockTemplate::of_type("counted").statement_child("DO", BlockTemplate::of_type("counted")),
        )
        .unwrap();
    graph.add_root(&outer).unwrap();
    assert_eq!(detached.load(Ordering::SeqCst), 0);

    graph.dispose(&outer).unwrap();
    assert_eq!(detached.load(Ordering::SeqCst), 2);
}

#[test]
fn typed_field_values_are_checked_against_the_field() {
    let mut factory = factory();
    factory
        .load_definitions(
            r#"[{
                "type": "bounded_number",
                "message0": "%1 %2",
                "args0": [
                    {"type": "field_number", "name": "N", "value": 0, "min": 0, "max": 10},
                    {"type": "field_angle", "name": "HEADING", "angle": 0}
                ],
                "output": "Number"
            }]"#,
        )
        .unwrap();
    let mut graph = graph();
    let bounded = obtain(&factory, &mut graph, "bounded_number");
    let boolean = obtain(&factory, &mut graph, "logic_boolean");

    let options = match graph.block(&boolean).unwrap().field("BOOL").unwrap().value() {
        FieldValue::Dropdown { options, .. } => std::sync::Arc::clone(options),
        _ => panic!("expected a dropdown"),
    };
    let err = graph
        .set_field(&boolean, "BOOL", FieldValue::Dropdown { options, selected: 5 })
        .unwrap_err();
    assert!(matches!(err, StructureError::InvalidFieldValue { .. }));
    assert_eq!(graph.block(&boolean).unwrap().field("BOOL").unwrap().serialized_value(), "TRUE");

    let loose = FieldValue::Number { value: 99.0, min: None, max: None, precision: None };
    assert!(graph.set_field(&bounded, "N", loose).unwrap());
    assert_eq!(graph.block(&bounded).unwrap().field("N").unwrap().serialized_value(), "10");

    assert!(graph
        .set_field(&bounded, "HEADING", FieldValue::Angle { degrees: 370.0 })
        .unwrap());
    assert_eq!(
        graph.block(&bounded).unwrap().field("HEADING").unwrap().value(),
        &FieldValue::Angle { degrees: 10.0 }
    );
}

#[test]
fn mutation_event_is_queued_before_reshape_updates() {
    let factory = factory();
    let mut graph = graph();
    let block = obtain(&factory, &mut graph, "controls_if");
    graph.set_event_workspace_id(&block, Some("test-workspace")).unwrap();
    graph.flush_events();
    let observer = recorder();
    graph.register_observer(&block, observer.clone()).unwrap();

    graph.set_mutation(&block, "<mutation else=\"1\"/>").unwrap();

    let updates = observer.updates.lock();
    let kinds: Vec<BlockUpdate> = updates.iter().map(|u| u.1).collect();
    assert!(kinds.contains(&BlockUpdate::Shape));
    assert_eq!(kinds.last(), Some(&BlockUpdate::Mutation));
    assert!(updates.iter().all(|u| u.2 >= 1), "updates: {:?}", *updates);
}

#[test]
fn roots_cannot_become_shadows() {
    let factory = factory();
    let mut graph = graph();
    let number = obtain(&factory, &mut graph, "math_number");
    graph.add_root(&number).unwrap();
    assert!(matches!(
        graph.set_shadow(&number, true),
        Err(StructureError::IllegalShadowState(_))
    ));
    assert!(!graph.block(&number).unwrap().is_shadow());
}

#[test]
fn block_ids_are_unique_across_graphs_of_one_factory() {
    let factory = factory();
    let mut first = graph();
    let mut second = graph();
    let template = BlockTemplate::of_type("math_number").with_id("dup");
    let id = factory.obtain(&mut first, &template).unwrap();
    assert!(factory.is_live(&id));

    let err = factory.obtain(&mut second, &template).unwrap_err();
    assert_eq!(err, BlockLoadError::DuplicateId("dup".to_string()));
    assert!(second.is_empty());

    first.dispose(&id).unwrap();
    assert!(!factory.is_live(&id));
    let again = factory.obtain(&mut second, &template).unwrap();
    assert_eq!(again.as_str(), "dup");

    drop(second);
    assert!(!factory.is_live(&again));
    factory.obtain(&mut first, &template).unwrap();
}
