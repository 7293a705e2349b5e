pub extern crate actix_web;

use std::net::TcpListener;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};

pub mod admin;
pub mod config;
pub mod connection;
pub mod connection_tx_storage;
pub mod handlers;
mod registry;
mod room;
pub mod server;

use crate::config::ServerConfig;
use crate::server::ServerTx;

/// HTTP and websocket front end. `srv_tx` must come from
/// [`server::spawn_server`] on a running tokio runtime.
pub fn http_server(
    srv_tx: ServerTx,
    config: ServerConfig,
    listener: TcpListener,
) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(srv_tx.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(handlers::root)
    })
    .listen(listener)?
    .run();
    Ok(server)
}
