// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal neural module framework for `nirlink`.
//!
//! This crate is the host side of the bridge:
//! - [`Tensor`]: dense `f32` values with the few operations layers need
//! - [`Module`]: a unit of computation whose `forward` runs against a [`Scope`]
//! - Primitive layers, neuron models and containers
//! - [`StateTree`]: explicit state passed into and returned from every run
//! - [`Executor`]: the eager scope that computes on real tensors
//!
//! ## Architecture
//!
//! Modules describe data flow rather than perform it. The same `forward` is
//! executed by [`Executor`] to compute values and by a tracing scope to
//! record a graph. Every module reports a [`TypeKey`] and its supertypes by
//! distance, which registries use for most-specific-first lookups.

pub mod tensor;
pub mod module;
pub mod state;
pub mod executor;
pub mod layers;
pub mod neurons;
pub mod containers;

pub use tensor::{Tensor, TensorError};
pub use module::{lineage, CallPath, Layer, Module, ModuleError, Op, Scope, Signal, Supertypes, TypeKey};
pub use state::{LayerState, StateNode, StateTree};
pub use executor::{Executor, ROOT_STATE_KEY};
pub use layers::{Affine, AvgPool2d, Flatten, Linear, Scale, SumPool2d, Threshold, Window};
pub use neurons::{CubaLif, IntegrateAndFire, Integrator, LeakyIntegrator, Lif, DEFAULT_DT};
pub use containers::{Parallel, Recurrent, Sequential};
