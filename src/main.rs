fn main() {
    if let Err(err) = donationbox_server::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
