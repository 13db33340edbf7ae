fn main() {
    if let Err(e) = coach_lib::run() {
        eprintln!("coach: {}", e);
        std::process::exit(1);
    }
}
