#![allow(non_snake_case)]
use crate::autodiff::Ad;
use crate::numerical::OCP::algorithm::Algorithm;
use crate::numerical::OCP::callbacks::{Endpoints, FunctionSet, NodeArgs};
use crate::numerical::OCP::linkages::{auto_link, auto_link_count};
use crate::numerical::OCP::ocp_errors::OcpResult;
use crate::numerical::OCP::ocp_solver::solve_ocp;
use crate::numerical::OCP::problem::{Guess, PhaseDimensions, Problem};
use nalgebra::{DMatrix, DVector};

/// Hanging chain of length 4 between (0, 1) and (1, 3):
/// min ∫ x √(1 + u²) dt,  x' = u,  ∫ √(1 + u²) dt = 4
pub fn hanging_chain(nodes: Vec<usize>) -> OcpResult<Problem> {
    let mut problem = Problem::new("hanging chain");
    problem.level1_setup(1, 0)?;
    let phase = problem.phase_mut(0)?;
    phase.declare(PhaseDimensions {
        nstates: 1,
        ncontrols: 1,
        nevents: 3,
        nintegrals: 1,
        ..Default::default()
    })?;
    phase.set_nodes(nodes)?;
    phase.set_state_bounds(&[-10.0], &[10.0])?;
    phase.set_control_bounds(&[-20.0], &[20.0])?;
    phase.set_event_bounds(&[1.0, 3.0, 4.0], &[1.0, 3.0, 4.0])?;
    phase.set_start_time_bounds(0.0, 0.0)?;
    phase.set_end_time_bounds(1.0, 1.0)?;
    // the straight line between both ends
    let time = DVector::from_fn(21, |k, _| k as f64 / 20.0);
    phase.set_guess(Guess {
        states: DMatrix::from_fn(1, time.len(), |_, k| 1.0 + 2.0 * time[k]),
        controls: DMatrix::from_element(1, time.len(), 2.0),
        time,
        parameters: DVector::zeros(0),
    })?;
    problem.set_functions(Box::new(
        FunctionSet::new(|n: &NodeArgs, d: &mut [Ad], _: &mut [Ad], _| {
            d[0] = n.controls[0].clone();
        })
        .with_integrand_cost(|n: &NodeArgs, _| {
            &n.states[0] * (1.0 + n.controls[0].square()).sqrt()
        })
        .with_integrand(|n: &NodeArgs, _, _| (1.0 + n.controls[0].square()).sqrt())
        .with_events(|e: &Endpoints, ev: &mut [Ad], _| {
            ev[0] = e.initial_states[0].clone();
            ev[1] = e.final_states[0].clone();
            ev[2] = e.integral(0).clone();
        }),
    ));
    Ok(problem)
}

/// Minimum time descent from (0, 0) to (2, −2) under gravity, free final time:
/// x' = v sin θ,  y' = −v cos θ,  v' = g cos θ
pub fn brachistochrone(nodes: Vec<usize>) -> OcpResult<Problem> {
    const G: f64 = 9.8;
    let mut problem = Problem::new("brachistochrone");
    problem.level1_setup(1, 0)?;
    let phase = problem.phase_mut(0)?;
    phase.declare(PhaseDimensions {
        nstates: 3,
        ncontrols: 1,
        nevents: 5,
        ..Default::default()
    })?;
    phase.set_nodes(nodes)?;
    phase.set_state_bounds(&[0.0, -10.0, 0.0], &[10.0, 0.0, 20.0])?;
    phase.set_control_bounds(&[0.0], &[std::f64::consts::PI])?;
    phase.set_event_bounds(&[0.0, 0.0, 0.0, 2.0, -2.0], &[0.0, 0.0, 0.0, 2.0, -2.0])?;
    phase.set_start_time_bounds(0.0, 0.0)?;
    phase.set_end_time_bounds(0.1, 10.0)?;
    phase.set_guess(Guess {
        time: DVector::from_vec(vec![0.0, 1.0]),
        states: DMatrix::from_row_slice(3, 2, &[0.0, 2.0, 0.0, -2.0, 0.0, 6.0]),
        controls: DMatrix::from_row_slice(1, 2, &[0.5, 1.5]),
        parameters: DVector::zeros(0),
    })?;
    problem.set_functions(Box::new(
        FunctionSet::new(|n: &NodeArgs, d: &mut [Ad], _: &mut [Ad], _| {
            let v = &n.states[2];
            let theta = &n.controls[0];
            d[0] = v * theta.sin();
            d[1] = -(v * theta.cos());
            d[2] = G * theta.cos();
        })
        .with_endpoint_cost(|e: &Endpoints, _| e.tf.clone())
        .with_events(|e: &Endpoints, ev: &mut [Ad], _| {
            ev[0] = e.initial_states[0].clone();
            ev[1] = e.initial_states[1].clone();
            ev[2] = e.initial_states[2].clone();
            ev[3] = e.final_states[0].clone();
            ev[4] = e.final_states[1].clone();
        }),
    ));
    Ok(problem)
}

/// x' = u on [0, 1] and [1, 2], x(0) = 0, x(2) = 1, min ∫ u² dt, phases joined by
/// state and time continuity
pub fn two_phase_steering(nodes: Vec<usize>) -> OcpResult<Problem> {
    let dims = PhaseDimensions {
        nstates: 1,
        ncontrols: 1,
        nevents: 1,
        ..Default::default()
    };
    let mut problem = Problem::new("two phase steering");
    problem.level1_setup(2, auto_link_count(&dims, &dims))?;
    let times = [((0.0, 0.0), (1.0, 1.0)), ((0.0, 2.0), (2.0, 2.0))];
    for (i, (start, end)) in times.into_iter().enumerate() {
        let phase = problem.phase_mut(i)?;
        phase.declare(dims)?;
        phase.set_nodes(nodes.clone())?;
        phase.set_state_bounds(&[-5.0], &[5.0])?;
        phase.set_control_bounds(&[-5.0], &[5.0])?;
        phase.set_event_bounds(&[i as f64], &[i as f64])?;
        phase.set_start_time_bounds(start.0, start.1)?;
        phase.set_end_time_bounds(end.0, end.1)?;
    }
    problem.set_functions(Box::new(
        FunctionSet::new(|n: &NodeArgs, d: &mut [Ad], _: &mut [Ad], _| {
            d[0] = n.controls[0].clone();
        })
        .with_integrand_cost(|n: &NodeArgs, _| n.controls[0].powi(2))
        .with_events(|e: &Endpoints, ev: &mut [Ad], phase| {
            ev[0] = if phase == 0 {
                e.initial_states[0].clone()
            } else {
                e.final_states[0].clone()
            };
        })
        .with_linkages(|phases, links| {
            for (l, r) in links.iter_mut().zip(auto_link(phases, 0, 1)) {
                *l = r;
            }
        }),
    ));
    Ok(problem)
}

pub fn ocp_examples(example: usize) {
    let built = match example {
        0 => hanging_chain(vec![20, 50]),
        1 => brachistochrone(vec![20, 40]),
        2 => two_phase_steering(vec![15]),
        _ => {
            println!("no example with number {}", example);
            return;
        }
    };
    let problem = match built {
        Ok(p) => p,
        Err(e) => {
            println!("{}", e);
            return;
        }
    };
    match solve_ocp(&problem, &Algorithm::default()) {
        Ok(solution) if solution.error_flag => {
            println!(
                "{} failed: {}",
                problem.name,
                solution.error_message.unwrap_or_default()
            );
        }
        Ok(solution) => {
            println!("objective = {:.6}", solution.objective);
            for (i, phase) in solution.phases.iter().enumerate() {
                println!("phase {}: t = {}", i, phase.time.transpose());
                println!("x = {}", phase.states);
                if phase.controls.nrows() > 0 {
                    println!("u = {}", phase.controls);
                }
            }
        }
        Err(e) => println!("{}", e),
    }
}
