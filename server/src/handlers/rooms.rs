use actix_web::error;
use actix_web::web;
use actix_web::{HttpResponse, Responder, Result};
use tokio::sync::oneshot;

use canvas_system::RoomDescription;

use crate::admin::AdminCommand;
use crate::server::{ServerCommand, ServerTx};

pub fn configure_room_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/rooms")
            .service(web::resource("").route(web::get().to(list_rooms)))
            .service(web::resource("/{room_id}").route(web::get().to(show_room))),
    );
}

pub async fn list_rooms(srv_tx: web::Data<ServerTx>) -> Result<impl Responder> {
    let (tx, rx) = oneshot::channel::<Vec<RoomDescription>>();

    srv_tx
        .send(ServerCommand::AdminCommand(AdminCommand::ListRooms { tx }))
        .map_err(|_| error::ErrorInternalServerError("Internal Server Error"))?;

    let rooms = rx
        .await
        .map_err(|_| error::ErrorInternalServerError("Receiver await error"))?;

    Ok(HttpResponse::Ok().json(rooms))
}

pub async fn show_room(
    path: web::Path<String>,
    srv_tx: web::Data<ServerTx>,
) -> Result<impl Responder> {
    let room_id = path.into_inner();
    let (tx, rx) = oneshot::channel::<Option<RoomDescription>>();

    srv_tx
        .send(ServerCommand::AdminCommand(AdminCommand::DescribeRoom {
            room_id: room_id.clone(),
            tx,
        }))
        .map_err(|_| error::ErrorInternalServerError("Internal Server Error"))?;

    let description = rx
        .await
        .map_err(|_| error::ErrorInternalServerError("Receiver await error"))?
        .ok_or_else(|| error::ErrorNotFound(format!("no active room {}", room_id)))?;

    Ok(HttpResponse::Ok().json(description))
}
