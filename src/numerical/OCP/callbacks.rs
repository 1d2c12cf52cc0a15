//! User callbacks of an optimal control problem.
//!
//! All callbacks are written in terms of [`Ad`] so that the engine can differentiate
//! them. The callbacks get the phase index (0-based) and the arguments of one
//! collocation node ([`NodeArgs`]) or of the phase end points ([`Endpoints`]).
//! Implement [`OcpFunctions`] on a struct, or assemble closures with [`FunctionSet`].
use crate::autodiff::Ad;
use crate::numerical::OCP::linkages::PhaseUnknowns;
use nalgebra::DMatrix;

/// States, controls, parameters and time at one collocation node.
pub struct NodeArgs<'a> {
    pub states: &'a [Ad],
    pub controls: &'a [Ad],
    pub parameters: &'a [Ad],
    pub time: &'a Ad,
}

/// Plain values at one node, for analytic dynamics Jacobians.
pub struct NodeValues<'a> {
    pub states: &'a [f64],
    pub controls: &'a [f64],
    pub parameters: &'a [f64],
    pub time: f64,
}

/// Boundary values of one phase.
pub struct Endpoints<'a> {
    pub initial_states: &'a [Ad],
    pub final_states: &'a [Ad],
    pub parameters: &'a [Ad],
    pub t0: &'a Ad,
    pub tf: &'a Ad,
    pub integrals: &'a [Ad],
}

impl<'a> Endpoints<'a> {
    /// value of the auxiliary integral `q` of this phase
    pub fn integral(&self, q: usize) -> &Ad {
        &self.integrals[q]
    }
}

/// Callbacks of an optimal control problem. Only `dae` is mandatory.
pub trait OcpFunctions: Send + Sync {
    /// Mayer term Φ(x(t0), x(tf), p, t0, tf)
    fn endpoint_cost(&self, _endpoints: &Endpoints, _phase: usize) -> Ad {
        Ad::constant(0.0)
    }

    /// Lagrange integrand L(x, u, p, t)
    fn integrand_cost(&self, _node: &NodeArgs, _phase: usize) -> Ad {
        Ad::constant(0.0)
    }

    /// state derivatives and path constraint values
    fn dae(&self, node: &NodeArgs, derivatives: &mut [Ad], path: &mut [Ad], phase: usize);

    /// event (boundary) constraint values; may read the phase integrals
    fn events(&self, _endpoints: &Endpoints, _events: &mut [Ad], _phase: usize) {}

    /// auxiliary integrand number `index`
    fn integrand(&self, _node: &NodeArgs, _index: usize, _phase: usize) -> Ad {
        Ad::constant(0.0)
    }

    /// linkage residuals over all phases
    fn linkages(&self, _phases: &[PhaseUnknowns], _linkages: &mut [Ad]) {}

    /// ∂f/∂[x, u] (nstates × (nstates + ncontrols)), used with the
    /// `analytic-if-supplied` derivative option
    fn dae_jacobian(&self, _node: &NodeValues, _phase: usize) -> Option<DMatrix<f64>> {
        None
    }
}

pub type CostFn = Box<dyn Fn(&Endpoints, usize) -> Ad + Send + Sync>;
pub type IntegrandCostFn = Box<dyn Fn(&NodeArgs, usize) -> Ad + Send + Sync>;
pub type DaeFn = Box<dyn Fn(&NodeArgs, &mut [Ad], &mut [Ad], usize) + Send + Sync>;
pub type EventsFn = Box<dyn Fn(&Endpoints, &mut [Ad], usize) + Send + Sync>;
pub type IntegrandFn = Box<dyn Fn(&NodeArgs, usize, usize) -> Ad + Send + Sync>;
pub type LinkagesFn = Box<dyn Fn(&[PhaseUnknowns], &mut [Ad]) + Send + Sync>;

/// Callback set built from closures.
pub struct FunctionSet {
    pub endpoint_cost: Option<CostFn>,
    pub integrand_cost: Option<IntegrandCostFn>,
    pub dae: DaeFn,
    pub events: Option<EventsFn>,
    pub integrand: Option<IntegrandFn>,
    pub linkages: Option<LinkagesFn>,
}

impl FunctionSet {
    pub fn new<F>(dae: F) -> Self
    where
        F: Fn(&NodeArgs, &mut [Ad], &mut [Ad], usize) + Send + Sync + 'static,
    {
        FunctionSet {
            endpoint_cost: None,
            integrand_cost: None,
            dae: Box::new(dae),
            events: None,
            integrand: None,
            linkages: None,
        }
    }

    pub fn with_endpoint_cost<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoints, usize) -> Ad + Send + Sync + 'static,
    {
        self.endpoint_cost = Some(Box::new(f));
        self
    }

    pub fn with_integrand_cost<F>(mut self, f: F) -> Self
    where
        F: Fn(&NodeArgs, usize) -> Ad + Send + Sync + 'static,
    {
        self.integrand_cost = Some(Box::new(f));
        self
    }

    pub fn with_events<F>(mut self, f: F) -> Self
    where
        F: Fn(&Endpoints, &mut [Ad], usize) + Send + Sync + 'static,
    {
        self.events = Some(Box::new(f));
        self
    }

    pub fn with_integrand<F>(mut self, f: F) -> Self
    where
        F: Fn(&NodeArgs, usize, usize) -> Ad + Send + Sync + 'static,
    {
        self.integrand = Some(Box::new(f));
        self
    }

    pub fn with_linkages<F>(mut self, f: F) -> Self
    where
        F: Fn(&[PhaseUnknowns], &mut [Ad]) + Send + Sync + 'static,
    {
        self.linkages = Some(Box::new(f));
        self
    }
}

impl OcpFunctions for FunctionSet {
    fn endpoint_cost(&self, endpoints: &Endpoints, phase: usize) -> Ad {
        match &self.endpoint_cost {
            Some(f) => f(endpoints, phase),
            None => Ad::constant(0.0),
        }
    }

    fn integrand_cost(&self, node: &NodeArgs, phase: usize) -> Ad {
        match &self.integrand_cost {
            Some(f) => f(node, phase),
            None => Ad::constant(0.0),
        }
    }

    fn dae(&self, node: &NodeArgs, derivatives: &mut [Ad], path: &mut [Ad], phase: usize) {
        (self.dae)(node, derivatives, path, phase)
    }

    fn events(&self, endpoints: &Endpoints, events: &mut [Ad], phase: usize) {
        if let Some(f) = &self.events {
            f(endpoints, events, phase)
        }
    }

    fn integrand(&self, node: &NodeArgs, index: usize, phase: usize) -> Ad {
        match &self.integrand {
            Some(f) => f(node, index, phase),
            None => Ad::constant(0.0),
        }
    }

    fn linkages(&self, phases: &[PhaseUnknowns], linkages: &mut [Ad]) {
        if let Some(f) = &self.linkages {
            f(phases, linkages)
        }
    }
}
