//! HTTP surface of a node.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use echonet_grid::{LoadGauge, Metrics, MetricsHandle, NodeId};
use echonet_skill::{
    parse_plan_text, AuthFailure, PipelineDispatcher, PipelineState, PipelineStep, PlanValidator,
    SkillError, StepFailure, StepRequest, StepResponse, TaskId, TaskStatus, TaskStore,
};

use crate::config::UserTable;

pub const TOKEN_HEADER: &str = "x-user-token";

/// Shared handles behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub id: NodeId,
    pub url: String,
    pub dispatcher: Arc<PipelineDispatcher>,
    pub validator: Arc<PlanValidator>,
    pub tasks: Arc<TaskStore>,
    pub users: Arc<UserTable>,
    pub metrics: MetricsHandle,
    pub load: LoadGauge,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/execute_step", post(execute_step))
        .route("/result/:task_id", get(get_result))
        .route("/info", get(get_info))
        .route("/nodes", get(get_nodes))
        .route("/plan", post(validate_plan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Failure reported to HTTP clients as `{error, kind, ...}`.
#[derive(Debug)]
pub enum ApiError {
    Skill(SkillError),
    Step {
        task_id: Option<TaskId>,
        failure: StepFailure,
    },
}

impl From<SkillError> for ApiError {
    fn from(e: SkillError) -> Self {
        ApiError::Skill(e)
    }
}

fn status_for(error: &SkillError) -> StatusCode {
    match error {
        SkillError::Validation(_) | SkillError::Capability { .. } => StatusCode::BAD_REQUEST,
        SkillError::Auth(AuthFailure::Missing) => StatusCode::UNAUTHORIZED,
        SkillError::Auth(_) => StatusCode::FORBIDDEN,
        SkillError::NotFound(_) => StatusCode::NOT_FOUND,
        SkillError::Remote { .. } | SkillError::Parse(_) => StatusCode::BAD_GATEWAY,
        SkillError::LocalSkill { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(error: &SkillError) -> serde_json::Map<String, Value> {
    let mut body = serde_json::Map::new();
    body.insert("error".into(), json!(error.to_string()));
    body.insert("kind".into(), json!(error.kind()));
    if let Some(op) = error.op() {
        body.insert("op".into(), json!(op));
    }
    if let SkillError::Remote { node, .. } = error {
        body.insert("node".into(), json!(node));
    }
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Skill(error) => {
                (status_for(&error), Json(Value::Object(error_body(&error)))).into_response()
            }
            ApiError::Step { task_id, failure } => {
                let mut body = error_body(&failure.error);
                body.insert("step".into(), json!(failure.step));
                body.insert("op".into(), json!(failure.op));
                if let Some(node) = &failure.node {
                    body.insert("node".into(), json!(node));
                }
                if let Some(id) = task_id {
                    body.insert("task_id".into(), json!(id));
                }
                (status_for(&failure.error), Json(Value::Object(body))).into_response()
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize, Default)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Resolve the caller's token from the header, then the query string.
fn authenticate(
    users: &UserTable,
    headers: &HeaderMap,
    query: &TokenQuery,
) -> Result<String, SkillError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.token.clone())
        .filter(|t| !t.is_empty())
        .ok_or(SkillError::Auth(AuthFailure::Missing))?;

    match users.user_for(&token) {
        Some(user) => {
            debug!("Authenticated user {}", user);
            Ok(token)
        }
        None => Err(SkillError::Auth(AuthFailure::Invalid)),
    }
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, SkillError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| SkillError::Validation(rejection.body_text()))
}

/// Shape-check a `/task` body into steps and an initial state.
fn parse_task_request(body: Value) -> Result<(Vec<PipelineStep>, PipelineState), SkillError> {
    let Value::Object(mut body) = body else {
        return Err(SkillError::Validation("request body must be a JSON object".into()));
    };

    let Some(Value::Array(raw_steps)) = body.remove("pipeline") else {
        return Err(SkillError::Validation("pipeline must be a list".into()));
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (i, raw) in raw_steps.into_iter().enumerate() {
        if !raw.get("op").is_some_and(Value::is_string) {
            return Err(SkillError::Validation(format!("step {} missing op", i)));
        }
        let step: PipelineStep = serde_json::from_value(raw)
            .map_err(|e| SkillError::Validation(format!("step {}: {}", i, e)))?;
        steps.push(step);
    }

    let state = match body.remove("state") {
        None | Some(Value::Null) => PipelineState::new(),
        Some(Value::Object(state)) => state,
        Some(_) => return Err(SkillError::Validation("state must be an object".into())),
    };

    Ok((steps, state))
}

#[derive(Serialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
    pub final_state: PipelineState,
}

async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<TaskAccepted> {
    let owner = authenticate(&state.users, &headers, &query)?;
    let (pipeline, initial) = parse_task_request(json_body(body)?)?;

    let submission = state
        .dispatcher
        .submit(&state.tasks, &owner, pipeline, initial)
        .await;

    match submission.outcome {
        Ok(final_state) => Ok(Json(TaskAccepted {
            task_id: submission.task_id,
            final_state,
        })),
        Err(failure) => Err(ApiError::Step {
            task_id: Some(submission.task_id),
            failure,
        }),
    }
}

/// Run one step for a peer. Only ops this node advertises are accepted.
async fn execute_step(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<StepResponse> {
    let request: StepRequest = serde_json::from_value(json_body(body)?)
        .map_err(|e| SkillError::Validation(e.to_string()))?;

    if !state.dispatcher.router().local_declares(&request.op) {
        warn!("Rejected step for op {} this node does not advertise", request.op);
        return Err(SkillError::capability(&request.op).into());
    }

    let _load = state.load.acquire();
    let start = Instant::now();
    let output = state
        .dispatcher
        .local()
        .execute(&request.op, request.state, &request.params)
        .await?;

    info!(
        "📥 Executed step {} for a peer in {}ms",
        request.op,
        start.elapsed().as_millis()
    );
    Ok(Json(StepResponse { state: output }))
}

#[derive(Serialize)]
pub struct ResultResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub final_state: Option<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<ResultResponse> {
    let token = authenticate(&state.users, &headers, &query)?;
    let view = state.tasks.get(&task_id, &token)?;

    let error = view.failure.as_ref().map(|f| {
        json!({
            "error": f.error.to_string(),
            "kind": f.error.kind(),
            "step": f.step,
            "op": f.op,
            "node": f.node,
        })
    });

    Ok(Json(ResultResponse {
        task_id: view.task_id,
        status: view.status,
        final_state: view.final_state,
        error,
    }))
}

#[derive(Serialize)]
pub struct InfoResponse {
    pub id: NodeId,
    pub url: String,
    pub skills: Vec<String>,
    pub metrics: Metrics,
}

async fn get_info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        id: state.id.clone(),
        url: state.url.clone(),
        skills: state.dispatcher.local().registry().list_skills(),
        metrics: state.metrics.current(),
    })
}

#[derive(Serialize)]
pub struct PeerResponse {
    pub id: NodeId,
    pub url: String,
    pub skills: Vec<String>,
    pub metrics: Metrics,
    pub last_seen_secs: u64,
}

async fn get_nodes(State(state): State<AppState>) -> Json<Vec<PeerResponse>> {
    let peers = state
        .dispatcher
        .router()
        .directory()
        .list_active()
        .into_iter()
        .map(|peer| PeerResponse {
            url: peer.base_url(),
            skills: peer.skills.iter().cloned().collect(),
            metrics: peer.metrics,
            last_seen_secs: peer.last_seen.elapsed().as_secs(),
            id: peer.id,
        })
        .collect();
    Json(peers)
}

#[derive(Serialize)]
pub struct PlanResponse {
    pub tasks: Vec<PipelineStep>,
}

/// Validate a planner candidate, given as JSON or as raw planner text.
async fn validate_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<PlanResponse> {
    authenticate(&state.users, &headers, &query)?;

    let mut body = json_body(body)?;
    let candidate = match body.get_mut("plan").map(Value::take) {
        Some(Value::String(text)) => parse_plan_text(&text)?,
        Some(plan @ Value::Object(_)) => plan,
        _ => {
            return Err(SkillError::Validation("plan must be an object or planner text".into()).into())
        }
    };

    let tasks = state.validator.validate(&candidate)?;
    info!("Plan with {} steps validated", tasks.len());
    Ok(Json(PlanResponse { tasks }))
}
