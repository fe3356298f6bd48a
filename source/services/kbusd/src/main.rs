//! CONTEXT: kbusd entrypoint
fn main() {
    if let Err(err) = kbusd::cli::run() {
        eprintln!("kbusd: exited with error: {err}");
        std::process::exit(1);
    }
}
