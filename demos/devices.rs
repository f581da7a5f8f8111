use botwire_utils as utils;

fn main() {
    let inputs = utils::device::list_inputs().expect("failed to list input devices");
    println!("Available inputs:\n{}", inputs);

    let outputs = utils::device::list_outputs().expect("failed to list output devices");
    println!("Available outputs:\n{}", outputs);
}
