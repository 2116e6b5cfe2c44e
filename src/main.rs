use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "HIVELOG_LOG";

fn main() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = hivelog::run() {
        let envelope = hivelog::error_envelope(&e);
        match serde_json::to_string_pretty(&envelope) {
            Ok(s) => println!("{}", s),
            Err(_) => eprintln!("{}", e),
        }
        std::process::exit(1);
    }
}
