// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversion between module hierarchies and NIR graphs.
//!
//! Two directions, each driven by its own registry:
//! - [`trace`]: run a module symbolically and record the registered leaves it
//!   calls as graph nodes ([`ModuleMap`])
//! - [`interpret`]: build a callable [`GraphExecutor`] from a graph
//!   ([`NodeMap`])
//!
//! ## Example
//!
//! ```
//! use nirlink_bridge::{default_module_map, default_node_map, interpret, trace};
//! use nirlink_nn::{Lif, Scale, Sequential, Tensor};
//!
//! let net = Sequential::new()
//!     .push("scale", Scale::new(Tensor::scalar(2.0)))
//!     .push("lif", Lif::simple(0.01, 1.0));
//! let graph = trace(&net, &default_module_map(), None).unwrap();
//! let exec = interpret(&graph, &default_node_map()).unwrap();
//! let (_spikes, _state) = exec.call(&Tensor::from_vec(vec![1.0]), None).unwrap();
//! ```

pub mod error;
pub mod registry;
pub mod config;
pub mod tracer;
pub mod interpreter;
pub mod defaults;

pub use error::{BridgeError, Result};
pub use registry::{resolve, Conversion, ConvertFn, ModuleMap, ModuleMapping, NodeConstructor, NodeMap};
pub use config::{BridgeConfig, InterpretConfig, TraceConfig, CONFIG_FORMAT_VERSION};
pub use tracer::{trace, Tracer, MODULE_PATH_KEY, MODULE_TYPE_KEY};
pub use interpreter::{interpret, GraphExecutor, Interpreter, FEEDBACK_PREFIX};
pub use defaults::{array_to_tensor, default_module_map, default_node_map, tensor_to_array};
