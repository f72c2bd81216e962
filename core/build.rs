use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("coordinator_descriptor.bin"))
        .build_server(true)
        .build_client(true)
        .compile(&["../proto/coordinator.proto"], &["../proto"])?;

    println!("cargo:rerun-if-changed=../proto/coordinator.proto");

    Ok(())
}
