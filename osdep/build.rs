fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/fault/boundary.c");
    println!("cargo:rustc-check-cfg=cfg(osdep_fault_boundary)");

    let family = std::env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    let has_boundary = family.split(',').any(|f| f == "unix")
        || (family.split(',').any(|f| f == "windows") && target_env == "msvc");

    if has_boundary {
        cc::Build::new()
            .file("src/fault/boundary.c")
            .warnings(true)
            .compile("osdep_fault_boundary");
        println!("cargo:rustc-cfg=osdep_fault_boundary");
    }
}
