//! HTTP surface: the `/api/user/*` routes, permissive CORS, and per-user
//! dispatch.
//!
//! Each user id maps to one container guarded by its own async mutex, so
//! requests for the same user serialize while distinct users proceed
//! independently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tally_core::{Category, Expense, ExpenseDraft, ExpenseFilter};

use crate::container::{ParseExpenseError, UserContainer};
use crate::llm::ModelClient;
use crate::store::StateStore;

/// Echoed on every parse failure so the user knows what phrasing works
const PARSE_HINT: &str =
    "Could not find an expense there. Try something like: I spent $12.50 at Starbucks";

/// Shared application state for HTTP handlers
pub struct AppState {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn StateStore>,
    users: Mutex<HashMap<String, Arc<Mutex<UserContainer>>>>,
}

impl AppState {
    pub fn new(model: Arc<dyn ModelClient>, store: Arc<dyn StateStore>) -> Self {
        Self {
            model,
            store,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// The container for this user, materialized lazily on first request
    async fn user(&self, user_id: &str) -> Result<Arc<Mutex<UserContainer>>> {
        let mut users = self.users.lock().await;
        if let Some(existing) = users.get(user_id) {
            return Ok(existing.clone());
        }
        let container = UserContainer::initialize(self.store.as_ref(), user_id)?;
        let entry = Arc::new(Mutex::new(container));
        users.insert(user_id.to_string(), entry.clone());
        Ok(entry)
    }
}

/// Build the axum router with all routes
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route(
            "/api/user/expenses",
            get(list_expenses).post(add_expense).fallback(not_found),
        )
        .route(
            "/api/user/expenses/parse",
            post(parse_expense).fallback(not_found),
        )
        .route("/api/user/chat", post(chat).fallback(not_found))
        .route("/api/user/insights", get(insights).fallback(not_found))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port
pub async fn run_server(state: Arc<AppState>, port: u16) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("tally listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

// -- Wire types --

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!("internal error: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn default_user() -> String {
    "default".to_string()
}

#[derive(Deserialize)]
struct UserParams {
    #[serde(rename = "userId", default = "default_user")]
    user_id: String,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(rename = "userId", default = "default_user")]
    user_id: String,
    #[serde(rename = "startDate")]
    start_date: Option<NaiveDate>,
    #[serde(rename = "endDate")]
    end_date: Option<NaiveDate>,
    category: Option<String>,
}

#[derive(Serialize)]
struct ExpensesResponse {
    expenses: Vec<Expense>,
}

#[derive(Deserialize)]
struct AddExpenseBody {
    merchant: String,
    amount: f64,
    notes: Option<String>,
    date: Option<NaiveDate>,
    category: Option<String>,
}

#[derive(Serialize)]
struct ExpenseResponse {
    success: bool,
    expense: Expense,
}

#[derive(Serialize)]
struct ParseFailure {
    success: bool,
    error: String,
}

#[derive(Deserialize)]
struct ChatBody {
    message: String,
}

#[derive(Deserialize)]
struct ChatTextBody {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    response: String,
    expense_added: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    version: String,
}

// -- Handlers --

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn list_expenses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ExpensesResponse>, (StatusCode, Json<ErrorBody>)> {
    let category = match params.category.as_deref() {
        Some(raw) => Some(
            Category::parse(raw).ok_or_else(|| bad_request(format!("unknown category: {raw}")))?,
        ),
        None => None,
    };

    let filter = ExpenseFilter {
        start_date: params.start_date,
        end_date: params.end_date,
        category,
    };

    let container = state.user(&params.user_id).await.map_err(internal_error)?;
    let container = container.lock().await;
    Ok(Json(ExpensesResponse {
        expenses: container.get_expenses(&filter),
    }))
}

async fn add_expense(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
    Json(body): Json<AddExpenseBody>,
) -> Result<Json<ExpenseResponse>, (StatusCode, Json<ErrorBody>)> {
    let merchant = body.merchant.trim().to_string();
    if merchant.is_empty() {
        return Err(bad_request("merchant must not be empty"));
    }
    if !body.amount.is_finite() || body.amount <= 0.0 {
        return Err(bad_request("amount must be a positive number"));
    }

    let container = state.user(&params.user_id).await.map_err(internal_error)?;
    let mut container = container.lock().await;

    let (category, notes) = match body.category.as_deref() {
        Some(raw) => {
            let category = Category::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown category: {raw}")))?;
            (category, body.notes)
        }
        None => {
            let outcome =
                crate::categorize::categorize(state.model.as_ref(), &merchant, body.amount, body.notes.as_deref())
                    .await;
            (outcome.category, body.notes)
        }
    };

    let expense = container
        .add_expense(
            state.store.as_ref(),
            ExpenseDraft {
                amount: body.amount,
                merchant,
                category,
                date: body.date.unwrap_or_else(|| chrono::Utc::now().date_naive()),
                notes,
            },
        )
        .map_err(internal_error)?;

    Ok(Json(ExpenseResponse {
        success: true,
        expense,
    }))
}

async fn parse_expense(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
    Json(body): Json<ChatTextBody>,
) -> Response {
    let container = match state.user(&params.user_id).await {
        Ok(c) => c,
        Err(err) => return internal_error(err).into_response(),
    };
    let mut container = container.lock().await;

    match container
        .parse_and_add(state.model.as_ref(), state.store.as_ref(), &body.text)
        .await
    {
        Ok(expense) => Json(ExpenseResponse {
            success: true,
            expense,
        })
        .into_response(),
        Err(ParseExpenseError::Storage(err)) => internal_error(err).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "parse-and-add rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(ParseFailure {
                    success: false,
                    error: PARSE_HINT.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorBody>)> {
    let container = state.user(&params.user_id).await.map_err(internal_error)?;
    let mut container = container.lock().await;

    let result = container
        .chat(state.model.as_ref(), state.store.as_ref(), &body.message)
        .await
        .map_err(internal_error)?;

    Ok(Json(ChatResponse {
        response: result.response().to_string(),
        expense_added: result.expense_added,
    }))
}

async fn insights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<tally_core::SpendingPersonality>, (StatusCode, Json<ErrorBody>)> {
    let container = state.user(&params.user_id).await.map_err(internal_error)?;
    let container = container.lock().await;
    Ok(Json(container.insights(state.model.as_ref()).await))
}
