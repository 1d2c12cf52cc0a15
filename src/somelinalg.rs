//! some linear algebra functions used throughout the code
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// coordinate format sparse matrices for Jacobians and Hessians
pub mod sparse_triplets;
/// factorization of the interior point KKT systems (faer sparse LU, nalgebra dense LU)
pub mod kkt_solvers;
