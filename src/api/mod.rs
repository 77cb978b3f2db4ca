use rocket::Route;

mod admin;
mod auth;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voting::routes());
    routes.extend(auth::routes());
    routes.extend(admin::routes());
    routes
}
