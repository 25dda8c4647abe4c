use std::process::ExitCode;

use earthquake_notifier::{
    config::Config,
    logging,
    poller::{Poller, RunOutcome},
    util::mask_secret,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("fatal error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&cfg.log_file) {
        eprintln!("fatal error: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "earthquake-notifier starting; city={}, area={}, webhooks={}, key={}, attempts={}, wait={:?}, timeout={:?}",
        cfg.city,
        cfg.area,
        cfg.webhook_urls.len(),
        mask_secret(&cfg.api_key, 4, 4),
        cfg.wait_attempts,
        cfg.wait_interval,
        cfg.http_timeout
    );

    let result = match Poller::from_config(&cfg) {
        Ok(poller) => poller.run().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(RunOutcome::Reported(id)) => {
            tracing::info!("report {} sent; exiting", id);
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Exhausted) => {
            tracing::info!("no report published in time; exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("run aborted: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
