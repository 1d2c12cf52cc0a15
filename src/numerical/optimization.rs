/// nonlinear program interface consumed by the interior point solver
pub mod nlp_problem;
/// primal-dual interior point method with a log barrier and an l1 merit line search
pub mod interior_point;
/// damped BFGS approximation of the Lagrangian Hessian
pub mod bfgs;
