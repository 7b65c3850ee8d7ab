use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

// 32 KiB, the pool size the console kernel expects.
const DEFAULT_POOL_BYTES: usize = 32 * 1024;
const POOL_ALLOC_DEFAULT_POOL_BYTES: &str = "POOL_ALLOC_DEFAULT_POOL_BYTES";

// Must match `MIN_BLOCK_SIZE` in `src/block.rs`.
const MIN_BLOCK_SIZE: usize = 32;

fn main() {
    create_default_pool_bytes_file();
    export_rerun_rules();
}

fn create_default_pool_bytes_file() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("pool_alloc_default_pool_bytes.txt");
    let size: usize = match env::var(POOL_ALLOC_DEFAULT_POOL_BYTES) {
        Ok(s) => s
            .trim()
            .parse()
            .expect("Could not interpret POOL_ALLOC_DEFAULT_POOL_BYTES as an unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_POOL_BYTES,
        Err(VarError::NotUnicode(_)) => panic!(
            "Could not interpret POOL_ALLOC_DEFAULT_POOL_BYTES as a string representing an unsigned integer"
        ),
    };
    assert!(
        size >= MIN_BLOCK_SIZE,
        "POOL_ALLOC_DEFAULT_POOL_BYTES must be at least {} bytes",
        MIN_BLOCK_SIZE
    );

    let mut f = File::create(&dest_path)
        .expect("Could not create file to store the pool_alloc default pool size.");
    write!(f, "{}", size).expect("Could not write the pool_alloc default pool size");
    f.flush().expect("Could not flush the pool_alloc default pool size file");
}

fn export_rerun_rules() {
    println!("cargo:rerun-if-env-changed={}", POOL_ALLOC_DEFAULT_POOL_BYTES);
    for path in ["./Cargo.toml", "./build.rs", "./src/lib.rs"].iter() {
        println!("cargo:rerun-if-changed={}", path);
    }
}
