use RustedOCP::Examples::ocp_examples::{brachistochrone, hanging_chain};
use RustedOCP::numerical::OCP::algorithm::{Algorithm, CollocationMethod};
use RustedOCP::numerical::OCP::ocp_solver::solve_ocp;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn quiet() -> Algorithm {
    Algorithm {
        loglevel: Some("off".to_string()),
        ..Algorithm::default()
    }
}

fn bench_hanging_chain(c: &mut Criterion) {
    let problem = hanging_chain(vec![30]).unwrap();
    let legendre = quiet();
    let trapezoidal = Algorithm {
        collocation: CollocationMethod::Trapezoidal,
        ..quiet()
    };
    c.bench_function("hanging chain, Legendre 30", |b| {
        b.iter(|| solve_ocp(black_box(&problem), &legendre).unwrap())
    });
    c.bench_function("hanging chain, trapezoidal 30", |b| {
        b.iter(|| solve_ocp(black_box(&problem), &trapezoidal).unwrap())
    });
}

fn bench_brachistochrone(c: &mut Criterion) {
    let problem = brachistochrone(vec![30]).unwrap();
    let parallel = Algorithm {
        parallel: true,
        ..quiet()
    };
    c.bench_function("brachistochrone, parallel nodes", |b| {
        b.iter(|| solve_ocp(black_box(&problem), &parallel).unwrap())
    });
}

criterion_group!(benches, bench_hanging_chain, bench_brachistochrone);
criterion_main!(benches);
