use salvo::cors::*;
use salvo::prelude::*;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .hoop(affix_state::inject(state))
        .hoop(
            Cors::new()
                .allow_origin(AllowOrigin::any())
                .allow_methods(AllowMethods::any())
                .allow_headers(AllowHeaders::any())
                .into_handler(),
        )
        // Health & status
        .push(Router::with_path("health").get(handlers::health::health))
        .push(Router::with_path("v1/models/status").get(handlers::health::model_status))
        // Image generation
        .push(Router::with_path("v1/images/generations").post(handlers::image::images_generations))
        .push(Router::with_path("v1/images/progress").get(handlers::image::image_progress_sse))
}
