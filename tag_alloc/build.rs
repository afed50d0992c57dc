use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

// 20 MiB, the classic malloc lab `MAX_HEAP`.
const DEFAULT_MAX_HEAP_BYTES: u32 = 20 * 1024 * 1024;
const TAG_ALLOC_MAX_HEAP_BYTES: &'static str = "TAG_ALLOC_MAX_HEAP_BYTES";

fn main() {
    create_max_heap_bytes_file();
    export_rerun_rules();
}

fn create_max_heap_bytes_file() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("tag_alloc_max_heap_bytes.txt");
    let size: u32 = match env::var(TAG_ALLOC_MAX_HEAP_BYTES) {
        Ok(s) => s
            .parse()
            .expect("Could not interpret TAG_ALLOC_MAX_HEAP_BYTES as a 32 bit unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_MAX_HEAP_BYTES,
        Err(VarError::NotUnicode(_)) => panic!(
            "Could not interpret TAG_ALLOC_MAX_HEAP_BYTES as a string representing a 32 bit unsigned integer"
        ),
    };
    let mut f = File::create(&dest_path)
        .expect("Could not create file to store the tag_alloc max heap size");
    write!(f, "{}", size).expect("Could not write the tag_alloc max heap size");
    f.flush()
        .expect("Could not flush write to the tag_alloc max heap size file");
}

fn export_rerun_rules() {
    println!("cargo:rerun-if-env-changed={}", TAG_ALLOC_MAX_HEAP_BYTES);
    for path in ["./Cargo.toml", "./build.rs", "./src/config.rs"].iter() {
        println!("cargo:rerun-if-changed={}", path);
    }
}
