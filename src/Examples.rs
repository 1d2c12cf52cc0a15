//! examples of usage of RustedOCP
/// optimal control problems: hanging chain, brachistochrone, two phase steering
pub mod ocp_examples;
