/// MULTI-PHASE OPTIMAL CONTROL
/// Pseudospectral (Legendre-Gauss-Lobatto) or trapezoidal transcription of an optimal
/// control problem into a sparse NLP solved by a primal-dual interior point method.
/// Example
/// ```rust,ignore
/// // x' = u, minimize ∫ u² dt, x(0) = 0, x(1) = 1
/// let mut problem = Problem::new("double integrator");
/// problem.level1_setup(1, 0)?;
/// let phase = problem.phase_mut(0)?;
/// phase.declare(PhaseDimensions { nstates: 1, ncontrols: 1, nevents: 2, ..Default::default() })?;
/// phase.set_nodes(vec![20])?;
/// phase.set_event_bounds(&[0.0, 1.0], &[0.0, 1.0])?;
/// phase.set_start_time_bounds(0.0, 0.0)?;
/// phase.set_end_time_bounds(1.0, 1.0)?;
/// problem.set_functions(Box::new(
///     FunctionSet::new(|n: &NodeArgs, d: &mut [Ad], _, _| d[0] = n.controls[0].clone())
///         .with_integrand_cost(|n: &NodeArgs, _| n.controls[0].powi(2))
///         .with_events(|e: &Endpoints, ev: &mut [Ad], _| {
///             ev[0] = e.initial_states[0].clone();
///             ev[1] = e.final_states[0].clone();
///         }),
/// ));
/// let solution = solve_ocp(&problem, &Algorithm::default())?;
/// ```
pub mod ocp_errors;
/// user callbacks: trait and closure based set
pub mod callbacks;
/// two level problem declaration: phases, bounds, guesses
pub mod problem;
/// algorithm options and their TOML form
pub mod algorithm;
/// LGL and trapezoidal collocation operators
pub mod collocation;
/// Lagrange cost and auxiliary integrals by quadrature
pub mod integrals;
/// phase views for linkage constraints
pub mod linkages;
/// the discrete NLP of one mesh stage
pub mod transcription;
/// affine scaling of variables, constraints and objective
pub mod scaling;
/// solution structures and their extraction
pub mod solution;
/// mesh refinement stages
pub mod mesh;
/// top level solve
pub mod ocp_solver;
