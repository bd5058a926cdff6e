use std::path::PathBuf;
use std::{env, fs};

/// Number of PMP slots assumed when the build environment does not specify one.
const DEFAULT_PMP_SLOTS: usize = 16;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PMP_SLOTS");

    let pmp_slots = match env::var("PMP_SLOTS") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .expect("PMP_SLOTS must be a decimal number of hardware PMP entries"),
        Err(_) => DEFAULT_PMP_SLOTS,
    };

    let out_file = PathBuf::from(out_dir).join("pmp_slots.rs");
    fs::write(
        &out_file,
        format!(
            "/// Number of PMP entries implemented by the target hardware.\npub const PMP_SLOTS: usize = {};\n",
            pmp_slots
        ),
    )
    .unwrap();
}
