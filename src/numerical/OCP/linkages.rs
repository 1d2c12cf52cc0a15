//! Linkage constraints between phases.
//!
//! The linkages callback sees every phase through a [`PhaseUnknowns`] view over the
//! phase slice of the NLP unknowns. Residuals are appended after all phase rows and
//! bounded by the linkage bounds of the problem (equality with zero by default).
use crate::autodiff::Ad;
use crate::numerical::OCP::problem::PhaseDimensions;
use crate::numerical::OCP::transcription::PhaseLayout;

/// Read-only view of the unknowns of one phase, in terms of [`Ad`].
#[derive(Clone, Copy)]
pub struct PhaseUnknowns<'a> {
    pub index: usize,
    layout: PhaseLayout,
    values: &'a [Ad],
}

impl<'a> PhaseUnknowns<'a> {
    /// `values` is the phase slice of the unknown vector (layout.nvars() entries)
    pub fn new(index: usize, layout: PhaseLayout, values: &'a [Ad]) -> Self {
        debug_assert_eq!(values.len(), layout.nvars());
        PhaseUnknowns {
            index,
            layout,
            values,
        }
    }

    pub fn dims(&self) -> PhaseDimensions {
        self.layout.dims
    }

    pub fn nnodes(&self) -> usize {
        self.layout.nnodes
    }

    pub fn states_at(&self, k: usize) -> &'a [Ad] {
        let start = self.layout.state(k, 0);
        &self.values[start..start + self.layout.dims.nstates]
    }

    pub fn controls_at(&self, k: usize) -> &'a [Ad] {
        let start = self.layout.control(k, 0);
        &self.values[start..start + self.layout.dims.ncontrols]
    }

    pub fn state(&self, i: usize, k: usize) -> &'a Ad {
        &self.values[self.layout.state(k, i)]
    }

    pub fn control(&self, j: usize, k: usize) -> &'a Ad {
        &self.values[self.layout.control(k, j)]
    }

    pub fn initial_states(&self) -> &'a [Ad] {
        self.states_at(0)
    }

    pub fn final_states(&self) -> &'a [Ad] {
        self.states_at(self.layout.nnodes - 1)
    }

    pub fn initial_controls(&self) -> &'a [Ad] {
        self.controls_at(0)
    }

    pub fn final_controls(&self) -> &'a [Ad] {
        self.controls_at(self.layout.nnodes - 1)
    }

    pub fn parameters(&self) -> &'a [Ad] {
        let start = self.layout.parameter(0);
        &self.values[start..start + self.layout.dims.nparameters]
    }

    pub fn start_time(&self) -> &'a Ad {
        &self.values[self.layout.t0()]
    }

    pub fn end_time(&self) -> &'a Ad {
        &self.values[self.layout.tf()]
    }

    pub fn integral(&self, q: usize) -> &'a Ad {
        &self.values[self.layout.integral(q)]
    }
}

/// Continuity residuals from the end of phase `a` to the start of phase `b`:
/// one per common state, `x_b(t0) − x_a(tf)`, followed by the time gap `t0_b − tf_a`.
/// Reserve `min(nstates_a, nstates_b) + 1` linkage rows for each call.
pub fn auto_link(phases: &[PhaseUnknowns], a: usize, b: usize) -> Vec<Ad> {
    let (pa, pb) = (&phases[a], &phases[b]);
    let end_a = pa.final_states();
    let start_b = pb.initial_states();
    let mut residuals: Vec<Ad> = start_b
        .iter()
        .zip(end_a.iter())
        .map(|(xb, xa)| xb - xa)
        .collect();
    residuals.push(pb.start_time() - pa.end_time());
    residuals
}

/// number of residuals produced by [`auto_link`] between two phases
pub fn auto_link_count(a: &PhaseDimensions, b: &PhaseDimensions) -> usize {
    a.nstates.min(b.nstates) + 1
}
