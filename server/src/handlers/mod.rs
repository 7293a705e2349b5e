use crate::connection::ws_index;
use crate::handlers::health::configure_health_handlers;
use crate::handlers::rooms::configure_room_handlers;
use actix_web::web;

mod health;
mod rooms;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws/{room_id}").route(web::get().to(ws_index)));

    configure_health_handlers(cfg);
    configure_room_handlers(cfg);
}
