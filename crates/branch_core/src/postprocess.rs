//! Observers for accepted states.
//!
//! The engines report every accepted state to a [`Postprocess`] observer.
//! Closures of the form `|state, value| { .. }` implement the trait, and `()`
//! is a no-op observer.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Where an accepted state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    /// A corrected pseudo-arclength point.
    Step,
    /// A corrector solve on the arc used to localize a bifurcation.
    Bisection,
    /// The final solve exactly at the target parameter.
    Destination,
    /// A completed time step.
    TimeStep,
}

/// An accepted state together with its parameter value (or time).
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    pub state: &'a DVector<f64>,
    pub value: f64,
    pub kind: PointKind,
}

pub trait Postprocess {
    /// Called once per accepted state.
    fn receive(&mut self, state: &DVector<f64>, value: f64);

    /// Like [`Postprocess::receive`], with the origin of the point.
    fn receive_event(&mut self, event: &Event<'_>) {
        self.receive(event.state, event.value);
    }
}

impl<F> Postprocess for F
where
    F: FnMut(&DVector<f64>, f64),
{
    fn receive(&mut self, state: &DVector<f64>, value: f64) {
        self(state, value)
    }
}

impl Postprocess for () {
    fn receive(&mut self, _state: &DVector<f64>, _value: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub quantity: f64,
    pub kind: PointKind,
}

/// Records a derived scalar for every accepted state.
pub struct Trace<Q> {
    quantity: Q,
    samples: Vec<Sample>,
}

impl<Q> Trace<Q>
where
    Q: FnMut(&DVector<f64>) -> f64,
{
    pub fn new(quantity: Q) -> Self {
        Self {
            quantity,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Samples forming a strictly increasing parameter sequence.
    ///
    /// Each new sample evicts every earlier kept sample whose value is not
    /// below its own, so values revisited while converging onto a target or
    /// a bifurcation are replaced by the latest visit.
    pub fn filter_monotone(&self) -> Vec<Sample> {
        filter_monotone(&self.samples)
    }
}

impl<Q> Postprocess for Trace<Q>
where
    Q: FnMut(&DVector<f64>) -> f64,
{
    fn receive(&mut self, state: &DVector<f64>, value: f64) {
        let quantity = (self.quantity)(state);
        self.samples.push(Sample {
            value,
            quantity,
            kind: PointKind::Step,
        });
    }

    fn receive_event(&mut self, event: &Event<'_>) {
        let quantity = (self.quantity)(event.state);
        self.samples.push(Sample {
            value: event.value,
            quantity,
            kind: event.kind,
        });
    }
}

pub fn filter_monotone(samples: &[Sample]) -> Vec<Sample> {
    let mut kept: Vec<Sample> = Vec::with_capacity(samples.len());
    for sample in samples {
        kept.retain(|k| k.value < sample.value);
        kept.push(*sample);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64) -> Sample {
        Sample {
            value,
            quantity: value * 10.0,
            kind: PointKind::Step,
        }
    }

    #[test]
    fn closures_and_unit_are_observers() {
        let mut seen = Vec::new();
        {
            let mut hook = |_: &DVector<f64>, value: f64| seen.push(value);
            let x = DVector::zeros(2);
            hook.receive(&x, 1.0);
            hook.receive_event(&Event {
                state: &x,
                value: 2.0,
                kind: PointKind::Bisection,
            });
        }
        assert_eq!(seen, vec![1.0, 2.0]);

        let mut noop = ();
        noop.receive(&DVector::zeros(1), 0.0);
    }

    #[test]
    fn trace_records_quantity_and_kind() {
        let mut trace = Trace::new(|x: &DVector<f64>| x.sum());
        let x = DVector::from_vec(vec![1.0, 2.0]);
        trace.receive_event(&Event {
            state: &x,
            value: 0.5,
            kind: PointKind::Destination,
        });
        trace.receive(&x, 0.75);

        assert_eq!(trace.len(), 2);
        assert_eq!(trace.samples()[0].kind, PointKind::Destination);
        assert_eq!(trace.samples()[0].quantity, 3.0);
        assert_eq!(trace.last().map(|s| s.value), Some(0.75));
    }

    #[test]
    fn monotone_filter_drops_revisited_values() {
        // A march to 4 that overshoots to 5 and then converges back onto 4.
        let values = [1.0, 2.0, 3.0, 5.0, 3.5, 4.0];
        let samples: Vec<Sample> = values.iter().map(|&v| sample(v)).collect();
        let kept: Vec<f64> = filter_monotone(&samples).iter().map(|s| s.value).collect();
        assert_eq!(kept, vec![1.0, 2.0, 3.0, 3.5, 4.0]);
    }

    #[test]
    fn monotone_filter_keeps_latest_of_repeated_values() {
        let samples = vec![
            sample(1.0),
            Sample {
                value: 2.0,
                quantity: 0.0,
                kind: PointKind::Step,
            },
            Sample {
                value: 2.0,
                quantity: 1.0,
                kind: PointKind::Bisection,
            },
        ];
        let kept = filter_monotone(&samples);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].quantity, 1.0);
        assert_eq!(kept[1].kind, PointKind::Bisection);
    }
}
