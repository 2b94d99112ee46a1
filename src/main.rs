fn main() {
    if let Err(e) = cuepartner_lib::run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
