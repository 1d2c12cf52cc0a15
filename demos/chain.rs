use RustedOCP::Examples::ocp_examples::ocp_examples;

/// usage: cargo run --example chain [example number]
/// 0 - hanging chain, 1 - brachistochrone, 2 - two phase steering
fn main() {
    let example = std::env::args()
        .nth(1)
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(0);
    ocp_examples(example);
}
