//! REST API for the solid packing service.
//!
//! Provides HTTP endpoints that accept triangle meshes and return one
//! transformation per item. Uses Axum as the web framework and supports CORS.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::config::{ApiConfig, OptimizerConfig};
use crate::model::{Frame, Solid};
use crate::optimizer::{
    PackError, PackItem, PackOutcome, PackingConfig, PackingResult, pack_solids,
    pack_solids_with_progress,
};
use crate::types::Vec3;

const INFEASIBLE_HINT: &str =
    "Not even a single item fits. Decrease the item count or enlarge the build volume.";

#[derive(Clone)]
struct ApiState {
    optimizer_config: OptimizerConfig,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>solid-packer API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

fn default_count() -> usize {
    1
}

/// A solid given as a triangle soup, plus how many copies to pack.
#[derive(Deserialize, Clone, ToSchema)]
pub struct SolidRequest {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: usize,
    /// Triangles as three `[x, y, z]` vertices each.
    #[schema(value_type = Vec<[[f64; 3]; 3]>)]
    pub triangles: Vec<[[f64; 3]; 3]>,
}

#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "build_volume": [200.0, 200.0, 150.0],
        "spacing": 2.0,
        "solids": [
            {
                "name": "wedge",
                "count": 4,
                "triangles": [
                    [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]],
                    [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 0.0, 10.0]]
                ]
            }
        ],
        "seed": 42
    })
)]
pub struct PackRequest {
    /// Full extents of the build volume, centred at the origin.
    #[schema(value_type = [f64; 3], example = json!([200.0, 200.0, 150.0]))]
    pub build_volume: [f64; 3],
    /// Minimum distance between two solids.
    #[serde(default)]
    pub spacing: f64,
    pub solids: Vec<SolidRequest>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub seed: Option<u64>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub annealing_iterations: Option<usize>,
}

#[derive(Debug)]
struct PackJob {
    items: Vec<PackItem>,
    frame: Frame,
    seed: Option<u64>,
    annealing_iterations: Option<usize>,
}

impl PackJob {
    fn item_count(&self) -> usize {
        self.items.iter().map(|item| item.count).sum()
    }

    /// Applies request-level overrides on top of the configured defaults.
    fn packing_config(&self, base: PackingConfig) -> PackingConfig {
        let mut config = base;
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(iterations) = self.annealing_iterations {
            config.annealing_iterations = iterations;
        }
        config
    }
}

impl PackRequest {
    fn into_job(self) -> Result<PackJob, PackError> {
        if self.solids.is_empty() {
            return Err(PackError::NoItems);
        }

        let frame = Frame::new(Vec3::from_array(self.build_volume), self.spacing)?;
        if let Some(iterations) = self.annealing_iterations {
            PackingConfig::validate_annealing_iterations(iterations)?;
        }
        let items = self
            .solids
            .into_iter()
            .map(|request| -> Result<PackItem, PackError> {
                Ok(PackItem {
                    solid: Solid::from_triangles(request.name, &request.triangles)?,
                    count: request.count,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PackJob {
            items,
            frame,
            seed: self.seed,
            annealing_iterations: self.annealing_iterations,
        })
    }
}

/// Response structure with one entry per item copy.
#[derive(Serialize, ToSchema)]
pub struct PackResponse {
    pub items: Vec<PackedItem>,
    pub packed_count: usize,
    pub total_count: usize,
    pub is_complete: bool,
    /// Spaced volume of the placed items relative to the build volume.
    pub fill_fraction: f64,
    pub energy: f64,
}

/// Single item in the response.
///
/// # Fields
/// * `name` - Name of the solid
/// * `placed` - Whether the item is part of the packing
/// * `transformation` - Row-major 4x4 matrix for the original mesh; all zeros when unplaced
/// * `volume_with_spacing` - Footprint volume including the spacing margin
#[derive(Serialize, ToSchema)]
pub struct PackedItem {
    pub name: String,
    pub placed: bool,
    #[schema(value_type = [[f64; 4]; 4])]
    pub transformation: [[f64; 4]; 4],
    pub volume_with_spacing: f64,
}

impl PackResponse {
    /// Creates a PackResponse from a PackingResult.
    pub fn from_packing_result(result: PackingResult) -> Self {
        let is_complete = result.is_complete();
        Self {
            items: result
                .placements
                .iter()
                .map(|placement| PackedItem {
                    name: placement.name.clone(),
                    placed: placement.is_placed(),
                    transformation: placement.matrix(),
                    volume_with_spacing: placement.volume_with_spacing,
                })
                .collect(),
            packed_count: result.packed_count,
            total_count: result.total_count,
            is_complete,
            fill_fraction: result.fill_fraction,
            energy: result.energy,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }

    fn from_pack_error(err: &PackError) -> Self {
        Self::new("Invalid input data", err.to_string())
    }

    fn infeasible(total_items: usize) -> Self {
        Self::new(
            "Packing infeasible",
            format!("{} ({} items requested)", INFEASIBLE_HINT, total_items),
        )
    }
}

/// Final message of a streamed packing job.
#[derive(Serialize)]
#[serde(tag = "type")]
enum StreamOutcome {
    Result(PackResponse),
    Error(ErrorResponse),
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn pack_error_response(err: &PackError) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse::from_pack_error(err)),
    )
        .into_response()
}

fn parse_pack_request(payload: Result<Json<PackRequest>, JsonRejection>) -> Result<PackJob, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };
    payload.into_job().map_err(|err| pack_error_response(&err))
}

fn outcome_response(outcome: Result<PackOutcome, PackError>) -> Response {
    match outcome {
        Ok(PackOutcome::Packed(result)) => {
            (StatusCode::OK, Json(PackResponse::from_packing_result(result))).into_response()
        }
        Ok(PackOutcome::Infeasible { total_items }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::infeasible(total_items)),
        )
            .into_response(),
        Err(err) => pack_error_response(&err),
    }
}

fn stream_outcome(outcome: Result<PackOutcome, PackError>) -> StreamOutcome {
    match outcome {
        Ok(PackOutcome::Packed(result)) => {
            StreamOutcome::Result(PackResponse::from_packing_result(result))
        }
        Ok(PackOutcome::Infeasible { total_items }) => {
            StreamOutcome::Error(ErrorResponse::infeasible(total_items))
        }
        Err(err) => StreamOutcome::Error(ErrorResponse::from_pack_error(&err)),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_pack, handle_pack_stream),
    components(schemas(PackRequest, SolidRequest, PackResponse, PackedItem, ErrorResponse)),
    tags((name = "packing", description = "Endpoints for solid packing"))
)]
struct ApiDoc;

/// Starts the API server.
///
/// Configures CORS for cross-origin requests.
/// Blocks until the server is terminated.
pub async fn start_api_server(config: ApiConfig, optimizer_config: OptimizerConfig) {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let state = ApiState { optimizer_config };

    let app = Router::new()
        .route("/pack", post(handle_pack))
        .route("/pack_stream", post(handle_pack_stream))
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Could not bind API server to {}: {}", addr, err);
            return;
        }
    };

    let display_host = config.display_host().to_string();
    println!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        println!("💡 Local access: http://localhost:{}", config.port());
    }
    println!("📦 API Endpoints:");
    println!("   - POST /pack");
    println!("   - POST /pack_stream");
    println!("📑 Documentation:");
    println!("   - GET /docs");
    println!("   - GET /docs/openapi.json");

    if let Err(err) = axum::serve(listener, app).await {
        error!("API server terminated with an error: {err}");
    }
}

/// Handler for POST /pack endpoint.
///
/// Packs as many of the requested solids as possible into the build volume.
///
/// # Parameters
/// * `payload` - JSON payload with build volume, spacing and solids
///
/// # Returns
/// JSON response with one transformation per item
#[utoipa::path(
    post,
    path = "/pack",
    request_body = PackRequest,
    responses(
        (status = 200, description = "Packing finished", body = PackResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request, degenerate input or no item fits",
            body = ErrorResponse
        ),
        (
            status = INTERNAL_SERVER_ERROR,
            description = "The packing job aborted",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> impl IntoResponse {
    let job = match parse_pack_request(payload) {
        Ok(job) => job,
        Err(response) => return response,
    };

    info!(
        "📥 New pack request: {} items of {} solids",
        job.item_count(),
        job.items.len()
    );
    let packing_config = job.packing_config(state.optimizer_config.packing_config());
    let PackJob { items, frame, .. } = job;

    match tokio::task::spawn_blocking(move || pack_solids(items, frame, packing_config)).await {
        Ok(outcome) => {
            if let Ok(PackOutcome::Packed(result)) = &outcome {
                info!(
                    "📦 Result: {} of {} items packed ({} left out), fill {:.1}%",
                    result.packed_count,
                    result.total_count,
                    result.unplaced_count(),
                    result.fill_fraction * 100.0
                );
            }
            outcome_response(outcome)
        }
        Err(err) => {
            error!("Packing job failed: {}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Packing job failed",
                err.to_string(),
            )
        }
    }
}

/// Handler for POST /pack_stream endpoint (SSE).
///
/// Streams search progress as Server-Sent Events (text/event-stream).
/// The last event carries either the result or an error.
#[utoipa::path(
    post,
    path = "/pack_stream",
    request_body = PackRequest,
    responses(
        (
            status = 200,
            description = "Streams pack events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        )
    ),
    tag = "packing"
)]
async fn handle_pack_stream(
    State(state): State<ApiState>,
    payload: Result<Json<PackRequest>, JsonRejection>,
) -> impl IntoResponse {
    let job = match parse_pack_request(payload) {
        Ok(job) => job,
        Err(response) => return response,
    };

    let packing_config = job.packing_config(state.optimizer_config.packing_config());
    let PackJob { items, frame, .. } = job;

    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::task::spawn_blocking(move || {
        let outcome = pack_solids_with_progress(items, frame, packing_config, |evt| {
            if let Ok(json) = serde_json::to_string(evt) {
                // a closed receiver discards the remaining events
                let _ = tx.blocking_send(json);
            }
        });
        if let Ok(json) = serde_json::to_string(&stream_outcome(outcome)) {
            let _ = tx.blocking_send(json);
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
