use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=OPUS_LIB_DIR");
    println!("cargo:rerun-if-env-changed=OPUS_STATIC");

    // Extra search path for a libopus outside the system locations
    if let Ok(dir) = env::var("OPUS_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }

    let kind = if env::var_os("OPUS_STATIC").is_some() {
        "static"
    } else {
        "dylib"
    };
    println!("cargo:rustc-link-lib={}=opus", kind);
}
