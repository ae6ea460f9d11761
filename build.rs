fn main() {
    // Writes `built.rs` into OUT_DIR; consumed by `vouch::built_info`.
    if let Err(err) = built::write_built_file() {
        panic!("Failed to acquire build-time information: {err}");
    }
}
