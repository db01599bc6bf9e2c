use clap::Parser;

use stack_installer::cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Single-threaded: every step is sequential and mostly waits on child processes.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(stack_installer::run(cli));
    std::process::exit(code);
}
