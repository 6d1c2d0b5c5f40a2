//! # Mutators
//!
//! A mutator is a per-block strategy that reshapes its block from a
//! serialized `<mutation>` element. At most one mutator is ever attached to a
//! block; the graph refuses a second attachment.

use crate::block::{Block, BlockId, Shape, ShapeInput};
use crate::error::StructureError;
use crate::field::Field;
use crate::graph::BlockGraph;
use crate::input::{Input, InputType};
use crate::xml::XmlElement;
use std::fmt;

pub trait Mutator: Send + fmt::Debug {
    /// Name this mutator is registered under.
    fn mutator_id(&self) -> &str;

    fn on_attached(&mut self, _block: &Block) {}

    fn on_detached(&mut self, _block: &Block) {}

    /// Current state as a `<mutation>` element string.
    fn serialize(&self, block: &Block) -> String;

    /// Applies a serialized mutation, reshaping the block through
    /// [`BlockGraph::reshape`].
    fn update(&mut self, graph: &mut BlockGraph, block: &BlockId, mutation: &str) -> Result<(), StructureError>;
}

/// Creates a fresh mutator for each new block of a type.
pub trait MutatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Mutator>;
}

impl<F> MutatorFactory for F
where
    F: Fn() -> Box<dyn Mutator> + Send + Sync,
{
    fn create(&self) -> Box<dyn Mutator> {
        self()
    }
}

/// Mutator of `controls_if`: any number of `else if` branches and an
/// optional `else`.
///
/// Inputs are `IF0`/`DO0` (from the definition), then `IF{n}`/`DO{n}` per
/// else-if branch, then `ELSE`.
#[derive(Debug, Default)]
pub struct IfElseMutator {
    else_if_count: usize,
    has_else: bool,
}

impl IfElseMutator {
    pub const ID: &'static str = "controls_if_mutator";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn else_if_count(&self) -> usize {
        self.else_if_count
    }

    pub fn has_else(&self) -> bool {
        self.has_else
    }

    fn parse(mutation: &str) -> Result<(usize, bool), StructureError> {
        let element = XmlElement::parse(mutation).map_err(|e| StructureError::Mutation(e.to_string()))?;
        if element.name != "mutation" {
            return Err(StructureError::Mutation(format!(
                "expected <mutation>, found <{}>",
                element.name
            )));
        }
        let else_if_count = match element.attr("elseif") {
            Some(count) => count
                .trim()
                .parse::<usize>()
                .map_err(|e| StructureError::Mutation(format!("elseif=\"{}\": {}", count, e)))?,
            None => 0,
        };
        let has_else = match element.attr("else") {
            Some(flag) => match flag.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => return Err(StructureError::Mutation(format!("else=\"{}\" is not a flag", other))),
            },
            None => false,
        };
        Ok((else_if_count, has_else))
    }

    fn shape_for(block: &Block, else_if_count: usize, has_else: bool) -> Shape {
        let mut inputs = Vec::new();
        let keep_or = |input: Input| {
            if block.input(input.name()).is_some() {
                ShapeInput::Existing(input.name().to_string())
            } else {
                ShapeInput::Fresh(input)
            }
        };

        // Inputs of the base definition come first and are never touched.
        for input in block.inputs() {
            if !is_mutated_input(input.name()) {
                inputs.push(ShapeInput::Existing(input.name().to_string()));
            }
        }
        for n in 1..=else_if_count {
            inputs.push(keep_or(
                Input::value(&format!("IF{}", n), Some(vec!["Boolean".to_string()])).with_field(Field::label("else if")),
            ));
            inputs.push(keep_or(Input::statement(&format!("DO{}", n), None).with_field(Field::label("do"))));
        }
        if has_else {
            inputs.push(keep_or(Input::statement("ELSE", None).with_field(Field::label("else"))));
        }

        let mut shape = block.current_shape();
        shape.inputs = inputs;
        shape
    }
}

fn is_mutated_input(name: &str) -> bool {
    if name == "ELSE" {
        return true;
    }
    ["IF", "DO"].iter().any(|prefix| {
        name.strip_prefix(prefix)
            .and_then(|n| n.parse::<usize>().ok())
            .map(|n| n >= 1)
            .unwrap_or(false)
    })
}

impl Mutator for IfElseMutator {
    fn mutator_id(&self) -> &str {
        Self::ID
    }

    fn on_attached(&mut self, block: &Block) {
        self.else_if_count = block
            .inputs()
            .iter()
            .filter(|i| i.input_type() == InputType::Value && is_mutated_input(i.name()))
            .count();
        self.has_else = block.input("ELSE").is_some();
    }

    fn serialize(&self, _block: &Block) -> String {
        let mut element = XmlElement::new("mutation");
        if self.else_if_count > 0 {
            element.set_attr("elseif", &self.else_if_count.to_string());
        }
        if self.has_else {
            element.set_attr("else", "1");
        }
        element.to_xml_string()
    }

    fn update(&mut self, graph: &mut BlockGraph, block: &BlockId, mutation: &str) -> Result<(), StructureError> {
        let (else_if_count, has_else) = Self::parse(mutation)?;
        let shape = {
            let current = graph.block_or_err(block)?;
            Self::shape_for(current, else_if_count, has_else)
        };
        graph.reshape(block, shape)?;
        self.else_if_count = else_if_count;
        self.has_else = has_else;
        Ok(())
    }
}
