use super::{
    error_body,
    pipeline::GenerationPipeline,
    provider::{HuggingFaceProvider, ImageProvider},
    validation::{validate_generate, validate_refine},
};
use crate::{
    config::ServerConfig,
    error::{EngineError, FieldIssue},
};
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
    error::JsonPayloadError,
    http::{
        header::{self, HeaderValue},
        Method, StatusCode,
    },
    middleware::Logger,
    web, App, HttpRequest, HttpResponse, HttpServer, ResponseError,
};
use futures::future::{self, Either};
use serde_json::{json, Value};
use std::sync::Arc;

type HandlerResult = std::result::Result<HttpResponse, EngineError>;

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(EngineError::status_code(self)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let status = ResponseError::status_code(self);
        if status.is_server_error() {
            log::error!("Unhandled error: {}", self);
        } else {
            log::warn!("Request failed: {}", self);
        }
        HttpResponse::build(status).json(error_body(self))
    }
}

/// Shared state for every worker.
pub struct AppContext {
    pipeline: GenerationPipeline,
}

impl AppContext {
    pub fn new(provider: Arc<dyn ImageProvider>, config: ServerConfig) -> Self {
        Self {
            pipeline: GenerationPipeline::new(provider, config),
        }
    }

    fn config(&self) -> &ServerConfig {
        self.pipeline.config()
    }
}

/// Returns the origin to echo back, or rejects it.
fn admit_origin(config: &ServerConfig, req: &ServiceRequest) -> std::result::Result<Option<HeaderValue>, EngineError> {
    let origin = req.headers().get(header::ORIGIN);
    let origin_str = origin.and_then(|v| v.to_str().ok());
    if config.origin_allowed(origin_str) {
        Ok(origin_str.and(origin.cloned()))
    } else {
        log::warn!("Blocked request due to CORS policy from {:?}", origin_str);
        Err(EngineError::CorsRejected)
    }
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    match err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            EngineError::PayloadTooLarge.into()
        }
        other => EngineError::Validation(vec![FieldIssue::new("", other.to_string())]).into(),
    }
}

async fn health(ctx: web::Data<AppContext>) -> HandlerResult {
    let config = ctx.config();
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "models": {
            "text2img": config.text_to_image_model,
            "img2img": config.image_to_image_model,
        }
    })))
}

async fn generate(ctx: web::Data<AppContext>, body: web::Json<Value>) -> HandlerResult {
    let job = validate_generate(&body)?;
    let result = ctx.pipeline.run_text_to_image(&job).await?;
    Ok(HttpResponse::Created().json(result))
}

async fn refine(ctx: web::Data<AppContext>, body: web::Json<Value>) -> HandlerResult {
    let job = validate_refine(&body)?;
    let result = ctx.pipeline.run_image_to_image(&job).await?;
    Ok(HttpResponse::Created().json(result))
}

/// Answers CORS preflights; everything else unmatched is a 404.
async fn fallback(req: HttpRequest) -> HandlerResult {
    if req.method() != Method::OPTIONS {
        return Err(EngineError::NotFound);
    }

    let requested_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Content-Type")
        .to_string();

    Ok(HttpResponse::NoContent()
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET,HEAD,PUT,PATCH,POST,DELETE"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, requested_headers))
        .insert_header((header::ACCESS_CONTROL_MAX_AGE, "600"))
        .finish())
}

pub fn configure(cfg: &mut web::ServiceConfig, ctx: web::Data<AppContext>) {
    let limit = ctx.config().body_limit_bytes();
    cfg.app_data(ctx)
        .app_data(web::JsonConfig::default().limit(limit).error_handler(json_error))
        .service(
            web::resource("/health")
                .route(web::get().to(health))
                .default_service(web::to(fallback)),
        )
        .service(
            web::scope("/api")
                .service(
                    web::resource("/generate")
                        .route(web::post().to(generate))
                        .default_service(web::to(fallback)),
                )
                .service(
                    web::resource("/refine")
                        .route(web::post().to(refine))
                        .default_service(web::to(fallback)),
                ),
        )
        .default_service(web::to(fallback));
}

/// The full application. The origin check runs before any extractor reads the
/// body, and every response it lets through (errors included) carries the
/// CORS headers.
pub fn app(
    ctx: web::Data<AppContext>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let config = ctx.config().clone();
    App::new()
        .configure(move |cfg| configure(cfg, ctx))
        .wrap_fn(move |req, srv| match admit_origin(&config, &req) {
            Ok(origin) => {
                let response = srv.call(req);
                Either::Left(async move {
                    let mut res = response.await?;
                    if let Some(origin) = origin {
                        let headers = res.headers_mut();
                        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                    }
                    Ok::<_, actix_web::Error>(res.map_into_left_body::<BoxBody>())
                })
            }
            Err(rejection) => {
                let res = req.into_response(rejection.error_response()).map_into_right_body();
                Either::Right(future::ready(Ok::<_, actix_web::Error>(res)))
            }
        })
        .wrap(Logger::new("%r %s %Dms"))
}

pub async fn run(config: ServerConfig) -> std::io::Result<()> {
    if config.hf_token.is_none() {
        log::warn!("HF_API_TOKEN is not set. Requests to Hugging Face may be rate limited or rejected.");
    }

    let port = config.port;
    let provider = Arc::new(HuggingFaceProvider::new(config.hf_token.clone()));
    let ctx = web::Data::new(AppContext::new(provider, config));

    log::info!("Image generation service listening on port {}", port);
    HttpServer::new(move || app(ctx.clone()))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}
