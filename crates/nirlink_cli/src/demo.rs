// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in demo network.

use nirlink_nn::{Affine, LeakyIntegrator, Lif, Linear, Module, Recurrent, Sequential, Tensor, TensorError};

/// Input width of the demo network
pub const INPUT_WIDTH: usize = 3;

const HIDDEN: usize = 4;
const OUTPUTS: usize = 2;

fn ramp(rows: usize, cols: usize, scale: f32) -> Result<Tensor, TensorError> {
    let data = (0..rows * cols).map(|i| scale * ((i % 5) as f32 + 1.0)).collect();
    Tensor::new(vec![rows, cols], data)
}

/// Affine input layer, LIF hidden population and a leaky readout
pub fn network(recurrent: bool) -> Result<Sequential, TensorError> {
    let fc = Affine::new(ramp(HIDDEN, INPUT_WIDTH, 0.2)?, Tensor::full(&[HIDDEN], 0.05))?;
    let hidden: Box<dyn Module> = if recurrent {
        Box::new(Recurrent::new(Lif::simple(0.005, 0.5), Linear::new(ramp(HIDDEN, HIDDEN, -0.05)?)))
    } else {
        Box::new(Lif::simple(0.005, 0.5))
    };

    Ok(Sequential::new()
        .push("fc", fc)
        .push_boxed("lif", hidden)
        .push("readout", Linear::new(ramp(OUTPUTS, HIDDEN, 0.25)?))
        .push("li", LeakyIntegrator::new(Tensor::scalar(0.01), Tensor::scalar(1.0), Tensor::scalar(0.0))))
}
