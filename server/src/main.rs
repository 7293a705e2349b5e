use std::net::TcpListener;

use clap::Parser;

use canvas_server::config::Config;
use canvas_server::http_server;
use canvas_server::server::spawn_server;

fn main() -> std::io::Result<()> {
    env_logger::init();
    let config = Config::parse();

    // The registry and every room run here, apart from the websocket workers.
    let authority = tokio::runtime::Builder::new_multi_thread()
        .thread_name("canvas-authority")
        .enable_all()
        .build()?;
    let srv_tx = {
        let _guard = authority.enter();
        spawn_server(config.server_config())
    };

    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    log::info!("Listening on {}", listener.local_addr()?);

    actix_web::rt::System::new().block_on(async move {
        http_server(srv_tx, config.server_config(), listener)?.await
    })
}
