use linkmgrd::boot;
use linkmgrd::cli;

#[tokio::main]
async fn main() {
    let args = cli::parse_args();
    boot::init_logging(args.verbose);
    let code = boot::run(args).await;
    std::process::exit(code);
}
