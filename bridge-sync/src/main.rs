fn main() {
    if let Err(err) = zk_attendance_bridge::app::run_sync() {
        eprintln!("attendance sync failed: {err}");
        std::process::exit(1);
    }
}
