// SPDX-License-Identifier: MIT OR Apache-2.0
//! Neuron models.
//!
//! Continuous-time dynamics discretized with a forward Euler step of `dt`.
//! Parameters broadcast, so a scalar `tau` applies to the whole population.
//! On the first call (no state) the membrane starts at `v_leak` for leaky
//! models and at zero otherwise; synaptic currents start at zero.

use crate::layers::primitive_module;
use crate::module::{Layer, Module, ModuleError, Result, Scope, Signal, Supertypes, TypeKey};
use crate::state::LayerState;
use crate::tensor::Tensor;
use std::any::Any;

/// Default integration time step in seconds
pub const DEFAULT_DT: f32 = 1e-3;

/// Abstract supertype of every neuron model
pub const NEURON: TypeKey = TypeKey::new("Neuron");
/// Abstract supertype of neurons that emit spikes
pub const SPIKING_NEURON: TypeKey = TypeKey::new("SpikingNeuron");

const SPIKING: Supertypes = &[&[SPIKING_NEURON], &[NEURON]];
const NON_SPIKING: Supertypes = &[&[NEURON]];

/// Read a state variable, checking it against the input shape
fn read_var(state: Option<&LayerState>, name: &str, input: &Tensor, initial: impl FnOnce() -> Result<Tensor>) -> Result<Tensor> {
    let Some(state) = state else {
        return initial();
    };
    let value = state.get(name).ok_or_else(|| ModuleError::StructuralMismatch {
        path: String::new(),
        reason: format!("state has no variable `{name}`"),
    })?;
    if value.shape() != input.shape() {
        return Err(ModuleError::StructuralMismatch {
            path: String::new(),
            reason: format!(
                "variable `{name}` has shape {:?}, input has {:?}",
                value.shape(),
                input.shape()
            ),
        });
    }
    Ok(value.clone())
}

/// `p` broadcast to the shape of `like`
fn broadcast(p: &Tensor, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::zeros(like.shape()).add(p)?)
}

/// `v + dt / tau * (v_leak - v + r * drive)`
fn leaky_step(v: &Tensor, drive: &Tensor, tau: &Tensor, r: &Tensor, v_leak: &Tensor, dt: f32) -> Result<Tensor> {
    let rate = tau.map(|t| dt / t);
    let dv = v_leak.sub(v)?.add(&r.mul(drive)?)?.mul(&rate)?;
    Ok(v.add(&dv)?)
}

/// Spike where `v > v_threshold`, resetting those entries to `v_reset`
fn fire(v: &Tensor, v_threshold: &Tensor, v_reset: &Tensor) -> Result<(Tensor, Tensor)> {
    let spikes = v.step_above(v_threshold)?;
    let v = v.select(&spikes, v_reset)?;
    Ok((spikes, v))
}

/// Integrator: `dv/dt = r I`, outputs `v`
#[derive(Debug, Clone, PartialEq)]
pub struct Integrator {
    /// Resistance
    pub r: Tensor,
    /// Time step
    pub dt: f32,
}

impl Integrator {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Integrator");

    /// Create an integrator
    pub fn new(r: Tensor) -> Self {
        Self { r, dt: DEFAULT_DT }
    }

    /// Set the time step
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

primitive_module!(Integrator, Integrator::TYPE, NON_SPIKING);

impl Layer for Integrator {
    fn layer_name(&self) -> &'static str {
        "Integrator"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let v = read_var(state, "v", input, || Ok(Tensor::zeros(input.shape())))?;
        let dt = self.dt;
        let v = v.add(&self.r.mul(input)?.map(|x| x * dt))?;
        Ok((v.clone(), Some(LayerState::new().with("v", v))))
    }
}

/// Integrate-and-fire neuron, outputs spikes
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrateAndFire {
    /// Resistance
    pub r: Tensor,
    /// Firing threshold
    pub v_threshold: Tensor,
    /// Potential after a spike
    pub v_reset: Tensor,
    /// Time step
    pub dt: f32,
}

impl IntegrateAndFire {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("IntegrateAndFire");

    /// Create an integrate-and-fire population
    pub fn new(r: Tensor, v_threshold: Tensor, v_reset: Tensor) -> Self {
        Self {
            r,
            v_threshold,
            v_reset,
            dt: DEFAULT_DT,
        }
    }

    /// Set the time step
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

primitive_module!(IntegrateAndFire, IntegrateAndFire::TYPE, SPIKING);

impl Layer for IntegrateAndFire {
    fn layer_name(&self) -> &'static str {
        "IntegrateAndFire"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let v = read_var(state, "v", input, || Ok(Tensor::zeros(input.shape())))?;
        let dt = self.dt;
        let v = v.add(&self.r.mul(input)?.map(|x| x * dt))?;
        let (spikes, v) = fire(&v, &self.v_threshold, &self.v_reset)?;
        Ok((spikes, Some(LayerState::new().with("v", v))))
    }
}

/// Leaky integrator, outputs `v`
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyIntegrator {
    /// Membrane time constant
    pub tau: Tensor,
    /// Resistance
    pub r: Tensor,
    /// Resting potential
    pub v_leak: Tensor,
    /// Time step
    pub dt: f32,
}

impl LeakyIntegrator {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("LeakyIntegrator");

    /// Create a leaky integrator population
    pub fn new(tau: Tensor, r: Tensor, v_leak: Tensor) -> Self {
        Self {
            tau,
            r,
            v_leak,
            dt: DEFAULT_DT,
        }
    }

    /// Set the time step
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

primitive_module!(LeakyIntegrator, LeakyIntegrator::TYPE, NON_SPIKING);

impl Layer for LeakyIntegrator {
    fn layer_name(&self) -> &'static str {
        "LeakyIntegrator"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let v = read_var(state, "v", input, || broadcast(&self.v_leak, input))?;
        let v = leaky_step(&v, input, &self.tau, &self.r, &self.v_leak, self.dt)?;
        Ok((v.clone(), Some(LayerState::new().with("v", v))))
    }
}

/// Leaky integrate-and-fire neuron, outputs spikes
#[derive(Debug, Clone, PartialEq)]
pub struct Lif {
    /// Membrane time constant
    pub tau: Tensor,
    /// Resistance
    pub r: Tensor,
    /// Resting potential
    pub v_leak: Tensor,
    /// Firing threshold
    pub v_threshold: Tensor,
    /// Potential after a spike
    pub v_reset: Tensor,
    /// Time step
    pub dt: f32,
}

impl Lif {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Lif");

    /// Create a LIF population
    pub fn new(tau: Tensor, r: Tensor, v_leak: Tensor, v_threshold: Tensor, v_reset: Tensor) -> Self {
        Self {
            tau,
            r,
            v_leak,
            v_threshold,
            v_reset,
            dt: DEFAULT_DT,
        }
    }

    /// Scalar-parameter population with unit resistance, resting and
    /// resetting at zero
    pub fn simple(tau: f32, v_threshold: f32) -> Self {
        Self::new(
            Tensor::scalar(tau),
            Tensor::scalar(1.0),
            Tensor::scalar(0.0),
            Tensor::scalar(v_threshold),
            Tensor::scalar(0.0),
        )
    }

    /// Set the time step
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

primitive_module!(Lif, Lif::TYPE, SPIKING);

impl Layer for Lif {
    fn layer_name(&self) -> &'static str {
        "Lif"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let v = read_var(state, "v", input, || broadcast(&self.v_leak, input))?;
        let v = leaky_step(&v, input, &self.tau, &self.r, &self.v_leak, self.dt)?;
        let (spikes, v) = fire(&v, &self.v_threshold, &self.v_reset)?;
        Ok((spikes, Some(LayerState::new().with("v", v))))
    }
}

/// Current-based LIF neuron: a synaptic current low-pass filters the input
/// before driving the membrane
#[derive(Debug, Clone, PartialEq)]
pub struct CubaLif {
    /// Synaptic time constant
    pub tau_syn: Tensor,
    /// Membrane time constant
    pub tau_mem: Tensor,
    /// Resistance
    pub r: Tensor,
    /// Resting potential
    pub v_leak: Tensor,
    /// Firing threshold
    pub v_threshold: Tensor,
    /// Potential after a spike
    pub v_reset: Tensor,
    /// Input weight onto the synaptic current
    pub w_in: Tensor,
    /// Time step
    pub dt: f32,
}

impl CubaLif {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("CubaLif");

    /// Create a current-based LIF population with unit input weight
    pub fn new(
        tau_syn: Tensor,
        tau_mem: Tensor,
        r: Tensor,
        v_leak: Tensor,
        v_threshold: Tensor,
        v_reset: Tensor,
    ) -> Self {
        Self {
            tau_syn,
            tau_mem,
            r,
            v_leak,
            v_threshold,
            v_reset,
            w_in: Tensor::scalar(1.0),
            dt: DEFAULT_DT,
        }
    }

    /// Set the input weight
    pub fn with_w_in(mut self, w_in: Tensor) -> Self {
        self.w_in = w_in;
        self
    }

    /// Set the time step
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }
}

primitive_module!(CubaLif, CubaLif::TYPE, SPIKING);

impl Layer for CubaLif {
    fn layer_name(&self) -> &'static str {
        "CubaLif"
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let i = read_var(state, "i", input, || Ok(Tensor::zeros(input.shape())))?;
        let v = read_var(state, "v", input, || broadcast(&self.v_leak, input))?;

        // The synapse is a leaky integrator with zero rest and unit resistance
        let drive = self.w_in.mul(input)?;
        let i = leaky_step(&i, &drive, &self.tau_syn, &Tensor::scalar(1.0), &Tensor::scalar(0.0), self.dt)?;
        let v = leaky_step(&v, &i, &self.tau_mem, &self.r, &self.v_leak, self.dt)?;
        let (spikes, v) = fire(&v, &self.v_threshold, &self.v_reset)?;
        Ok((spikes, Some(LayerState::new().with("i", i).with("v", v))))
    }
}
