use clinic::app::{bootstrap_staff, router, AppState};
use clinic::config::Config;
use clinic::error::{ClinicError, ClinicResult};
use tokio::net::TcpListener;

extern crate pretty_env_logger;
#[macro_use] extern crate log;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", err);
    }
    info!("shutting down");
}

async fn run() -> ClinicResult<()> {
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;
    let staff_username = config.staff_username.clone();
    let state = AppState::connect(config).await?;

    if let Some(username) = staff_username {
        let token = bootstrap_staff(&state, &username).await?;
        info!("staff account {} ready, session token {}", username, token);
    }

    let listener = TcpListener::bind(bind_addr).await.map_err(|err| {
        ClinicError::Config(format!("cannot bind {bind_addr}: {err}"))
    })?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| ClinicError::Config(format!("server error: {err}")))?;
    Ok(())
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    if let Err(err) = run().await {
        error!("{}", err);
        std::process::exit(1);
    }
}
