use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};
use web_server::controllers::webserver_controller::State;

#[get("/health")]
pub async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

/// Last reconcile event, for a quick look without scraping metrics
#[get("/")]
pub async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}
