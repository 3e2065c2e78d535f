use agentflow::app::run_cli;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentflow=warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let report = run_cli(&args, |key| std::env::var(key).ok());
    for line in &report.stdout {
        println!("{line}");
    }
    for line in &report.stderr {
        eprintln!("{line}");
    }
    std::process::exit(report.exit_code);
}
