/// OPTIMAL CONTROL
/// Multi-phase optimal control problems transcribed by Legendre-Gauss-Lobatto or
/// trapezoidal collocation, with mesh refinement and costate estimation.
///  Example
/// ```rust,ignore
///    let mut problem = Problem::new("steering");
///    problem.level1_setup(1, 0)?;
///    // level 2: dimensions, nodes, bounds of every phase
///    let phase = problem.phase_mut(0)?;
///    phase.declare(PhaseDimensions { nstates: 1, ncontrols: 1, nevents: 2, ..Default::default() })?;
///    phase.set_nodes(vec![10, 20])?;
///    phase.set_event_bounds(&[0.0, 1.0], &[0.0, 1.0])?;
///    phase.set_start_time_bounds(0.0, 0.0)?;
///    phase.set_end_time_bounds(1.0, 1.0)?;
///    problem.set_functions(Box::new(functions));
///    let solution = solve_ocp(&problem, &Algorithm::default())?;
///    println!("u = {}", solution.get_controls_in_phase(0)?);
/// ```
pub mod OCP;
/// SPARSE NONLINEAR PROGRAMMING
/// Interior point solver of  min f(x)  s.t.  g_l <= g(x) <= g_u,  x_l <= x <= x_u
/// with exact or quasi-Newton Hessians
pub mod optimization;
