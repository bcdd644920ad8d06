//! Program generators and trace recorders shared by the integration tests.

#![allow(dead_code)]

use polish_core::{Operation, TraceElement};
use rand::rngs::StdRng;
use rand::{Rng, RngCore};
use std::ffi::c_void;
use std::sync::Mutex;

/// Collects traced values in call order.
#[derive(Default)]
pub struct Recorder {
    values: Mutex<Vec<(usize, u64)>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<(usize, u64)> {
        std::mem::take(&mut *self.values.lock().unwrap())
    }
}

/// Context for [`record`]: which recorder, and a tag naming the trace.
pub struct Probe<'a> {
    pub recorder: &'a Recorder,
    pub tag: usize,
}

pub unsafe extern "C" fn record(context: *mut c_void, value: u64) {
    // SAFETY: every context handed to `record` points at a live Probe.
    let probe = unsafe { &*(context as *const Probe<'_>) };
    probe.recorder.values.lock().unwrap().push((probe.tag, value));
}

/// A trace of `index` reporting to `probe`. The probe must outlive every
/// function compiled from the returned operation.
pub fn trace(index: usize, probe: &Probe<'_>) -> Operation {
    let context = probe as *const Probe<'_> as *mut c_void;
    // SAFETY: `record` only reads the probe, which the caller keeps alive.
    Operation::TraceElement(unsafe { TraceElement::new(index, context, record) })
}

/// Operations a random program may contain, chosen by depth.
#[derive(Clone, Copy)]
pub enum Shape {
    Arith,
    Dup(usize),
    Push(u32),
    Pop,
    Swap,
    Trace(usize),
}

/// Random shapes valid for `nargs` arguments, ending at depth one.
///
/// `grow` biases toward pushes so deep programs exercise frame slots.
pub fn random_shapes(rng: &mut StdRng, nargs: usize, len: usize, grow: bool) -> Vec<Shape> {
    let mut depth = nargs;
    let mut shapes = Vec::with_capacity(len + depth);

    for step in 0..len {
        let pushing = grow && step < len / 2;
        let shape = match rng.gen_range(0..8) {
            _ if pushing && rng.gen_bool(0.6) => Shape::Push(rng.next_u32()),
            0 | 1 if depth >= 2 => Shape::Arith,
            2 if depth >= 1 => Shape::Dup(rng.gen_range(0..depth)),
            3 if depth >= 2 => Shape::Pop,
            4 if depth >= 2 => Shape::Swap,
            5 if depth >= 1 => Shape::Trace(rng.gen_range(0..depth)),
            _ => Shape::Push(rng.next_u32()),
        };
        depth = match shape {
            Shape::Arith | Shape::Pop => depth - 1,
            Shape::Dup(_) | Shape::Push(_) => depth + 1,
            Shape::Swap | Shape::Trace(_) => depth,
        };
        shapes.push(shape);
    }

    if depth == 0 {
        shapes.push(Shape::Push(rng.next_u32()));
        depth = 1;
    }
    while depth > 1 {
        shapes.push(Shape::Arith);
        depth -= 1;
    }
    shapes
}

/// Turn shapes into operations, picking arithmetic at random and sending
/// traces to `probes[position]`.
pub fn materialize(rng: &mut StdRng, shapes: &[Shape], probes: &[Probe<'_>]) -> Vec<Operation> {
    shapes
        .iter()
        .enumerate()
        .map(|(position, shape)| match *shape {
            Shape::Arith => match rng.gen_range(0..3) {
                0 => Operation::add(),
                1 => Operation::sub(),
                _ => Operation::mult(),
            },
            Shape::Dup(from) => Operation::Duplicate { from },
            Shape::Push(value) => Operation::Push { value },
            Shape::Pop => Operation::Pop,
            Shape::Swap => Operation::Swap,
            Shape::Trace(index) => trace(index, &probes[position]),
        })
        .collect()
}

pub fn random_args(rng: &mut StdRng, nargs: usize) -> Vec<u64> {
    (0..nargs).map(|_| rng.next_u64()).collect()
}
