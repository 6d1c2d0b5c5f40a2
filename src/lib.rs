//! # blockgraph
//!
//! Document model for visual block programming: a program is a graph of
//! typed, connectable blocks. The crate covers:
//! - Block definitions loaded from JSON, with fields and inputs built from
//!   `message{N}`/`args{N}` templates
//! - A graph of blocks with typed connections, shadow defaults and mutators
//! - Change events (create, delete, move, change, ui) with a JSON wire format
//!   and reentrant event grouping
//! - Lossless XML round trips and deep copies of block subtrees
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blockgraph::{BlockFactory, BlockGraph, BlockTemplate, ConnectionRef};
//!
//! let mut factory = BlockFactory::new();
//! factory.load_definitions(r#"[
//!     {"type": "math_number", "message0": "%1",
//!      "args0": [{"type": "field_number", "name": "NUM"}], "output": "Number"},
//!     {"type": "text_print", "message0": "print %1",
//!      "args0": [{"type": "input_value", "name": "TEXT"}],
//!      "previousStatement": null, "nextStatement": null}
//! ]"#)?;
//!
//! let mut graph = BlockGraph::new();
//! let print = factory.obtain(&mut graph, &BlockTemplate::of_type("text_print"))?;
//! let number = factory.obtain(&mut graph, &BlockTemplate::of_type("math_number").field("NUM", "42"))?;
//! graph.add_root(&print)?;
//! graph.connect(&ConnectionRef::input(&print, "TEXT"), &ConnectionRef::output(&number))?;
//!
//! for event in graph.flush_events() {
//!     println!("{}", event.to_json()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! 1. **Definitions** - `BlockDefinition` parses JSON shape templates
//! 2. **Factory** - `BlockFactory` mints blocks from templates, applying
//!    mutation, fields, flags, position and children in that order
//! 3. **Graph** - `BlockGraph` owns the blocks; every mutation validates
//!    first, then commits, queues its event and notifies observers
//! 4. **Events** - `BlocklyEvent`s are queued per mutation and stamped with a
//!    group id when flushed

pub mod block;
pub mod color;
pub mod config;
pub mod connection;
pub mod definition;
pub mod error;
pub mod events;
pub mod factory;
pub mod field;
pub mod graph;
pub mod input;
pub mod mutator;
pub mod observer;
pub mod serialize;
pub mod template;
pub mod xml;

// Re-export the main model API
pub use block::{Block, BlockId, BlockObserver, BlockUpdate, Shape, ShapeConnection, ShapeInput, WorkspacePoint};
pub use config::ModelConfig;
pub use connection::{ConnectCheck, Connection, ConnectionRef, ConnectionSlot, ConnectionType};
pub use definition::BlockDefinition;
pub use error::{BlockLoadError, ConnectionError, Result, StructureError};
pub use factory::{BlockExtension, BlockFactory, DefinitionLoadReport, SkippedDefinition};
pub use graph::BlockGraph;
pub use input::{Alignment, Input, InputType};
pub use mutator::{IfElseMutator, Mutator, MutatorFactory};
pub use template::{BlockTemplate, TemplateSource};

// Re-export value and event types
pub use color::Color;
pub use events::{
    events_from_json, events_to_json, BlocklyEvent, ChangeElement, EventListener, EventPayload, EventType,
    PendingMove, UiElement,
};
pub use field::{DropdownOption, DropdownOptions, DropdownOptionsRegistry, Field, FieldDate, FieldObserver, FieldType, FieldValue};
pub use observer::ObserverId;
