// src/main.rs

use stepdag::{cli, logging, run};

/// Exit code for errors that make the graph unbuildable (bad manifest,
/// cycle, bad selector). Step failures exit with 1 via the build report.
const EXIT_STRUCTURAL: i32 = 2;

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("stepdag error: {err:?}");
        std::process::exit(EXIT_STRUCTURAL);
    }

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stepdag error: {err}");
            std::process::exit(EXIT_STRUCTURAL);
        }
    }
}
