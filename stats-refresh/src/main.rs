fn main() {
    if let Err(err) = donationbox_server::app::run_stats_refresh() {
        eprintln!("stats refresh failed: {err}");
        std::process::exit(1);
    }
}
