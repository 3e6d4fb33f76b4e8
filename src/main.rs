use backtrace::Backtrace;
use clap::Command;

mod analyze;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "Frequency stability analysis of oscillator measurements.\n\n\
            Computes Allan and Hadamard deviations over a sweep of averaging \
            times, identifies the dominant noise process at each one, and \
            bounds every estimate with a confidence interval.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(analyze::command())
        .get_matches();

    match matches.subcommand() {
        Some(("analyze", args)) => {
            let config = args.clone().try_into().unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            });

            analyze::run(config)
        }
        _ => {
            unreachable!("subcommand is required");
        }
    }
}
