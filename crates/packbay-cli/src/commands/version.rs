//! `packbay version` command.

pub fn run() {
    println!("packbay {}", env!("CARGO_PKG_VERSION"));
}
