use num::complex::Complex32;
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;
use std::f32::consts::PI;

/// Request to change the frequency of the rotator starting at an absolute input sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotatorCommand {
    /// Phase increment in radians per sample.
    pub phase_inc: f32,
    pub sample_offset: i64,
}

/// Confirms the sample at which a phase increment came into effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatorAck {
    pub sample_offset: i64,
    pub phase_inc: f32,
}

/// Numerically controlled oscillator that derotates the sample stream.
///
/// Frequency changes are scheduled ahead of time so that they line up with frame boundaries
/// at the output of the later stages.
pub struct Rotator {
    // phase and frequency in cycles
    phase: f32,
    freq: f32,
    phase_inc: f32,
    sample_index: i64,
    commands: VecDeque<RotatorCommand>,
    acks: Vec<RotatorAck>,
}

impl Default for Rotator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Rotator {
    pub fn new(phase_inc: f32) -> Self {
        Self {
            phase: 0.0,
            freq: phase_inc / (2.0*PI),
            phase_inc,
            sample_index: 0,
            commands: VecDeque::new(),
            acks: Vec::new(),
        }
    }

    /// Queues a frequency change. Commands are applied in order of sample offset.
    pub fn schedule(&mut self, command: RotatorCommand) {
        let i = self.commands.partition_point(|c| c.sample_offset <= command.sample_offset);
        self.commands.insert(i, command);
    }

    pub fn process(&mut self, x: &mut [Complex32]) {
        let mut x = x;
        while !x.is_empty() {
            self.apply_due_commands();
            // rotate up to the next scheduled change
            let nb_samples = match self.commands.front() {
                Some(c) => ((c.sample_offset - self.sample_index) as usize).min(x.len()),
                None => x.len(),
            };
            let (head, tail) = x.split_at_mut(nb_samples);
            self.rotate(head);
            x = tail;
        }
        self.apply_due_commands();
    }

    fn apply_due_commands(&mut self) {
        while let Some(c) = self.commands.front().copied() {
            if c.sample_offset > self.sample_index {
                break;
            }
            if c.sample_offset < self.sample_index {
                log::debug!("Rotator command for sample {} applied late at {}", c.sample_offset, self.sample_index);
            }
            self.commands.pop_front();
            self.phase_inc = c.phase_inc;
            self.freq = c.phase_inc / (2.0*PI);
            self.acks.push(RotatorAck { sample_offset: self.sample_index, phase_inc: c.phase_inc });
        }
    }

    fn rotate(&mut self, x: &mut [Complex32]) {
        for v in x.iter_mut() {
            let sin = fast_sine(self.phase);
            // NOTE: Approximation degrades past +0.5 so the quarter cycle shift is wrapped again
            let cos = fast_sine(wrap_cycles(self.phase + 0.25));
            *v *= Complex32::new(cos, sin);
            self.phase = wrap_cycles(self.phase + self.freq);
        }
        self.sample_index += x.len() as i64;
    }

    /// Acknowledgements of the commands applied since the last drain.
    pub fn drain_acknowledgements(&mut self) -> std::vec::Drain<'_, RotatorAck> {
        self.acks.drain(..)
    }

    pub fn phase_inc(&self) -> f32 {
        self.phase_inc
    }

    /// Absolute index of the next input sample.
    pub fn sample_index(&self) -> i64 {
        self.sample_index
    }

    pub fn nb_pending_commands(&self) -> usize {
        self.commands.len()
    }
}

/// Translates a phase in cycles to [-0.5,+0.5].
fn wrap_cycles(dt: f32) -> f32 {
    // NOTE: Faster version of f32::round()
    let dt_offset = dt.abs() - 0.5;
    let dt_offset = dt_offset.ceil();
    let dt_offset = dt_offset*dt.signum();
    dt - dt_offset
}

/// Chebyshev approximation of sin(2*pi*x) over x in [-0.5,+0.5].
pub fn fast_sine(x: f32) -> f32 {
    const A0: f32 = -25.1327419281005859375;
    const A1: f32 =  64.83582305908203125;
    const A2: f32 = -67.076629638671875;
    const A3: f32 =  38.495880126953125;
    const A4: f32 = -14.049663543701171875;
    const A5: f32 =  3.161602020263671875;

    // g(x) as a polynomial in z = x^2 using Horner's method
    let z = x*x;
    let g = ((((A5*z + A4)*z + A3)*z + A2)*z + A1)*z + A0;
    // roots at x = 0 and x = +-0.5
    g * (z-0.25) * x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(length: usize) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); length]
    }

    #[test]
    fn fast_sine_matches_sine() {
        for i in -500..=500 {
            let x = i as f32 / 1000.0;
            let expected = (2.0*PI*x).sin();
            assert!((fast_sine(x) - expected).abs() < 1e-5, "x={} got={} expected={}", x, fast_sine(x), expected);
        }
        // cosine through the quarter cycle shift
        for i in -500..=250 {
            let x = i as f32 / 1000.0;
            assert!((fast_sine(x + 0.25) - (2.0*PI*x).cos()).abs() < 1e-5);
        }
    }

    #[test]
    fn wrap_stays_in_range() {
        for x in [0.0f32, 0.49, 0.51, -0.51, 1.2, -3.7, 10.25] {
            let y = wrap_cycles(x);
            assert!((-0.5..=0.5).contains(&y), "x={} y={}", x, y);
            assert!(((x - y) - (x - y).round()).abs() < 1e-5);
        }
    }

    #[test]
    fn removes_constant_frequency() {
        let omega = 0.3f32;
        let mut x: Vec<Complex32> = (0..2000).map(|i| Complex32::from_polar(1.0, -omega * i as f32)).collect();
        let mut rotator = Rotator::new(omega);
        rotator.process(&mut x);
        for v in x.iter() {
            assert!((v - Complex32::new(1.0, 0.0)).norm() < 1e-3, "v={}", v);
        }
        assert_eq!(rotator.sample_index(), 2000);
    }

    #[test]
    fn applies_command_at_sample_across_blocks() {
        let mut rotator = Rotator::default();
        rotator.schedule(RotatorCommand { phase_inc: PI / 2.0, sample_offset: 150 });
        let mut x = ones(256);
        for block in x.chunks_mut(64) {
            rotator.process(block);
        }
        // unchanged up to and including the switch point which starts at zero phase
        for v in &x[..=150] {
            assert!((v - Complex32::new(1.0, 0.0)).norm() < 1e-4);
        }
        // quarter turn per sample afterwards
        assert!((x[151] - Complex32::new(0.0, 1.0)).norm() < 1e-4);
        assert!((x[152] - Complex32::new(-1.0, 0.0)).norm() < 1e-4);

        let acks: Vec<RotatorAck> = rotator.drain_acknowledgements().collect();
        assert_eq!(acks, vec![RotatorAck { sample_offset: 150, phase_inc: PI / 2.0 }]);
        assert_eq!(rotator.drain_acknowledgements().count(), 0);
        assert_eq!(rotator.phase_inc(), PI / 2.0);
    }

    #[test]
    fn commands_are_applied_in_order() {
        let mut rotator = Rotator::default();
        rotator.schedule(RotatorCommand { phase_inc: 0.2, sample_offset: 80 });
        rotator.schedule(RotatorCommand { phase_inc: 0.1, sample_offset: 40 });
        assert_eq!(rotator.nb_pending_commands(), 2);
        rotator.process(&mut ones(100));
        let offsets: Vec<i64> = rotator.drain_acknowledgements().map(|a| a.sample_offset).collect();
        assert_eq!(offsets, vec![40, 80]);
        assert_eq!(rotator.phase_inc(), 0.2);
    }

    #[test]
    fn late_command_applies_immediately() {
        let mut rotator = Rotator::default();
        rotator.process(&mut ones(100));
        rotator.schedule(RotatorCommand { phase_inc: -0.05, sample_offset: 20 });
        rotator.process(&mut ones(10));
        let acks: Vec<RotatorAck> = rotator.drain_acknowledgements().collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].sample_offset, 100);
    }

    #[test]
    fn phase_is_continuous_over_frequency_change() {
        let mut rotator = Rotator::new(0.1);
        rotator.schedule(RotatorCommand { phase_inc: 0.2, sample_offset: 50 });
        let mut x = ones(100);
        rotator.process(&mut x);
        let phases: Vec<f32> = x.iter().map(|v| v.arg()).collect();
        for (i, w) in phases.windows(2).enumerate() {
            let step = (w[1] - w[0] + 3.0*PI) % (2.0*PI) - PI;
            let expected = if i < 50 { 0.1 } else { 0.2 };
            assert!((step - expected).abs() < 1e-3, "i={} step={}", i, step);
        }
    }
}
