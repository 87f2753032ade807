//! `forge` - command-line front end
//!
//! Exit codes: 0 committed (or nothing to do), 1 retries exhausted,
//! 2 error or cancelled, 3 file locked.

mod cli;
mod commands;
mod logging;
mod output;

#[tokio::main]
async fn main() {
    let matches = cli::build().get_matches();
    logging::init(matches.get_flag("json"), matches.get_count("verbose"));

    let code = match commands::dispatch(&matches).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            2
        }
    };
    std::process::exit(code);
}
