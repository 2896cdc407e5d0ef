pub mod messages;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/messages").route(web::post().to(messages::send_message)),
    )
    .service(
        web::resource("/messages/{sender_id}/{receiver_id}")
            .route(web::get().to(messages::latest_message)),
    )
    .service(web::resource("/health").route(web::get().to(messages::health)))
    .service(web::resource("/metrics").route(web::get().to(crate::metrics::metrics_handler)));
}
