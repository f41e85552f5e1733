use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::{
    extract::{rejection::FormRejection, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Html,
    routing::{get, post},
    Form, Json,
};
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    conf,
    docs::ApiDoc,
    error::{Error, Result},
    lookup::Lookup,
    types::StatsSummary,
};


const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct AppState {
    pub lookup: Lookup,
}

#[derive(serde::Deserialize, Debug, Default, ToSchema)]
pub struct StatsForm {
    #[serde(alias = "username")]
    pub user1: Option<String>,
    pub user2: Option<String>,
}

#[derive(serde::Serialize, Debug, Default, ToSchema)]
pub struct StatsResponse {
    pub data: StatsData,
    pub errors: StatsErrors,
}

#[derive(serde::Serialize, Debug, Default, ToSchema)]
pub struct StatsData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user1: Option<StatsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user2: Option<StatsSummary>,
}

#[derive(serde::Serialize, Debug, Default, ToSchema)]
pub struct StatsErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user2: Option<String>,
}

#[tracing::instrument(name = "server", skip_all)]
pub async fn run() -> anyhow::Result<()> {
    let conf = conf::global();
    let dir = env::current_dir()?;
    tracing::info!(?dir, ?conf, "Starting.");
    let addr = SocketAddr::from((conf.addr, conf.port));

    let state = AppState {
        lookup: Lookup::from_conf(&conf)?,
    };

    let cors = cors(&conf)?;

    let service = router(state)
        .layer(cors)
        .into_make_service_with_connect_info::<SocketAddr>();

    match &conf.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::warn!(?addr, "Listening unencrypted.");
            axum::serve(listener, service).await?;
        }
        Some(conf::Tls {
            cert_file,
            key_file,
        }) => {
            // XXX One MUST do this manual init of rustls provider when using
            //     more than a single dep which itself depends on rustls.
            //     Here we using 2:
            //     - axum_server
            //     - reqwest
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|crypto_provider| {
                    anyhow!(
                        "Failed to install default crypto provider: \
                        {crypto_provider:?}"
                    )
                })?;

            let config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_file, key_file,
                )
                .await
                .context(format!(
                    "Failed to construct RustlsConfig. \
                    cert_file={cert_file:?}, key_file={key_file:?}"
                ))?;

            tracing::info!(
                ?addr,
                ?cert_file,
                ?key_file,
                "Listening with TLS."
            );
            axum_server::bind_rustls(addr, config)
                .serve(service)
                .await?;
        }
    }

    Ok(())
}

/// Cross-origin access for the configured address only. The bundled page is
/// served from that same origin.
pub fn cors(conf: &conf::Conf) -> anyhow::Result<CorsLayer> {
    let origins = ["http", "https"]
        .iter()
        .map(|scheme| {
            HeaderValue::from_str(&format!(
                "{scheme}://{}:{}",
                conf.addr, conf.port
            ))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Invalid CORS origin")?;
    let layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH]);
    Ok(layer)
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/stats", post(stats_handler))
        .route_layer(middleware::from_fn({
            |req: Request, next: Next| {
                REQ_ID.scope(ReqId::new(), next.run(req))
            }
        }))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .with_state(state)
}

#[tracing::instrument(skip_all, fields(req_id = %REQ_ID.get().req_id))]
#[utoipa::path(
    post,
    path = "/stats",
    request_body(
        content = StatsForm,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "At least one user summarized", body = StatsResponse),
        (status = 400, description = "No username given", body = StatsResponse),
        (status = 404, description = "No such user(s)", body = StatsResponse),
        (status = 500, description = "Scratch API failure", body = StatsResponse),
    )
)]
pub async fn stats_handler(
    State(state): State<AppState>,
    form: std::result::Result<Form<StatsForm>, FormRejection>,
) -> (StatusCode, Json<StatsResponse>) {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            tracing::warn!(?rejection, "Unreadable form.");
            return bad_request(rejection.body_text());
        }
    };
    let user1 = non_blank(form.user1.as_deref());
    let user2 = non_blank(form.user2.as_deref());
    tracing::info!(?user1, ?user2, "Handling stats request.");
    if user1.is_none() && user2.is_none() {
        return bad_request(Error::Validation.to_string());
    }

    let (outcome1, outcome2) = tokio::join!(
        lookup_if_given(&state.lookup, user1),
        lookup_if_given(&state.lookup, user2),
    );
    let status = overall_status(&[&outcome1, &outcome2]);
    let (data1, error1) = split(outcome1);
    let (data2, error2) = split(outcome2);
    let response = StatsResponse {
        data: StatsData {
            user1: data1,
            user2: data2,
        },
        errors: StatsErrors {
            user1: error1,
            user2: error2,
        },
    };
    (status, Json(response))
}

fn bad_request(message: String) -> (StatusCode, Json<StatsResponse>) {
    let response = StatsResponse {
        data: StatsData::default(),
        errors: StatsErrors {
            user1: Some(message),
            user2: None,
        },
    };
    (StatusCode::BAD_REQUEST, Json(response))
}

type Outcome = Option<Result<Arc<StatsSummary>>>;

async fn lookup_if_given(lookup: &Lookup, username: Option<&str>) -> Outcome {
    match username {
        Some(username) => Some(lookup.summary(username).await),
        None => None,
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// 200 if anything succeeded, else 500 if the Scratch API misbehaved, else
/// the first failure's own status.
fn overall_status(outcomes: &[&Outcome]) -> StatusCode {
    let results: Vec<&Result<Arc<StatsSummary>>> =
        outcomes.iter().copied().flatten().collect();
    if results.iter().any(|r| r.is_ok()) {
        return StatusCode::OK;
    }
    let errors: Vec<&Error> =
        results.iter().filter_map(|r| r.as_ref().err()).collect();
    if errors.iter().any(|e| matches!(e, Error::Upstream(_))) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    errors.first().map_or(StatusCode::NOT_FOUND, |e| e.status())
}

fn split(outcome: Outcome) -> (Option<StatsSummary>, Option<String>) {
    match outcome {
        None => (None, None),
        Some(Ok(summary)) => (Some(StatsSummary::clone(&summary)), None),
        Some(Err(error)) => (None, Some(error.to_string())),
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Clone)]
struct ReqId {
    pub req_id: String,
}

impl ReqId {
    fn new() -> Self {
        let req_id = cuid2::create_id();
        Self { req_id }
    }
}

tokio::task_local! {
    static REQ_ID: ReqId;
}
