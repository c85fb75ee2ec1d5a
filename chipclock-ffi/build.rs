// Build script that tries to generate a C header with `cbindgen`.
// If `cbindgen` is not available, it falls back to copying the
// checked-in `include/chipclock.h` to $OUT_DIR.
//
// Either way, consumers can include the header from:
//   - <repo>/chipclock-ffi/include/chipclock.h  (checked-in)
//   - $OUT_DIR/chipclock.h

use std::{env, fs, path::PathBuf, process::Command};

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=include/chipclock.h");

    let (Some(crate_dir), Some(out_dir)) = (env::var_os("CARGO_MANIFEST_DIR"), env::var_os("OUT_DIR")) else {
        println!("cargo:warning=chipclock-ffi: cargo did not set the build directories");
        return;
    };
    let crate_dir = PathBuf::from(crate_dir);
    let header_path_repo = crate_dir.join("include").join("chipclock.h");
    let header_path_out = PathBuf::from(out_dir).join("chipclock.h");

    let cbindgen_ok = Command::new("cbindgen")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if cbindgen_ok {
        let generated = Command::new("cbindgen")
            .args(["--crate", "chipclock-ffi", "--lang", "C", "--output"])
            .arg(&header_path_out)
            .current_dir(&crate_dir)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if generated {
            println!("cargo:warning=chipclock-ffi: generated header with cbindgen -> {}", header_path_out.display());
            return;
        }
        println!("cargo:warning=chipclock-ffi: cbindgen failed; falling back to checked-in header");
    }

    // Fallback: copy the checked-in header so downstream build systems can find it.
    if let Err(e) = fs::copy(&header_path_repo, &header_path_out) {
        println!("cargo:warning=chipclock-ffi: could not copy {}: {e}", header_path_repo.display());
    }
}
