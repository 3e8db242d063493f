fn main() {
    if let Err(err) = zk_attendance_bridge::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
