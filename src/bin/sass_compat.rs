// sass-compat CLI entry point: all logic lives in the library crate.

fn main() {
    sass_compat::cli::run();
}
