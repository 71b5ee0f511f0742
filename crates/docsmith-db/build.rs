//! Build script so embedded migrations are picked up when they change.
//!
//! `sqlx::migrate!` embeds the files under `migrations/` at compile time,
//! and cargo does not track that directory on its own.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
