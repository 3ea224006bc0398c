fn main() {
    if let Err(err) = snapvault::cli::run() {
        println!("{:#}", err);
        std::process::exit(snapvault::cli::commands::EXIT_USAGE);
    }
}
