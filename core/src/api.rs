//! HTTP handlers, independent of any server framework.
//!
//!   POST /simulations              create (QUEUED)
//!   POST /simulations/{id}/start   schedule jobs, QUEUED → RUNNING
//!   GET  /simulations?userId=      newest first, capped at list_limit
//!   GET  /simulations/{id}         one simulation
//!
//! Every response body is `{ "ok": bool, ... }`.

use crate::{
    error::SimError,
    scheduler::Scheduler,
    simulation::NewSimulation,
    types::{now_millis, EpochMillis},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body:   Value,
}

impl ApiResponse {
    fn ok(status: u16, mut body: Value) -> Self {
        if let Value::Object(map) = &mut body {
            map.insert("ok".into(), Value::Bool(true));
        }
        Self { status, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "ok": false, "error": message.into() }),
        }
    }

    fn from_error(err: &SimError) -> Self {
        if err.http_status() >= 500 {
            log::error!("Request failed: {err}");
        }
        Self::error(err.http_status(), err.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSimulationRequest {
    pub user_id:             Option<String>,
    pub scenario:            Option<String>,
    pub distribution_method: Option<String>,
    pub total_records:       Option<i64>,
    pub start_time:          Option<EpochMillis>,
    pub end_time:            Option<EpochMillis>,
}

#[derive(Clone)]
pub struct Api {
    scheduler:  Arc<Scheduler>,
    list_limit: usize,
}

impl Api {
    pub fn new(scheduler: Arc<Scheduler>, list_limit: usize) -> Self {
        Self { scheduler, list_limit }
    }

    /// Route one request. `params` holds the decoded query string.
    pub fn handle(
        &self,
        method: &str,
        path: &str,
        params: &HashMap<String, String>,
        body: &[u8],
    ) -> ApiResponse {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (method, segments.as_slice()) {
            ("POST", ["simulations"]) => match serde_json::from_slice::<Value>(body) {
                Ok(value) => self.create_simulation(value),
                Err(e) => ApiResponse::from_error(&SimError::from(e)),
            },
            ("GET", ["simulations"]) => {
                self.list_simulations(params.get("userId").map(String::as_str))
            }
            ("GET", ["simulations", id]) => self.get_simulation(id),
            ("POST", ["simulations", id, "start"]) => self.start_simulation(id),
            (_, ["simulations"]) | (_, ["simulations", _]) | (_, ["simulations", _, "start"]) => {
                ApiResponse::error(405, "method not allowed")
            }
            _ => ApiResponse::error(404, "route not found"),
        }
    }

    pub fn create_simulation(&self, body: Value) -> ApiResponse {
        let req: CreateSimulationRequest = match serde_json::from_value(body) {
            Ok(req) => req,
            Err(e) => return ApiResponse::from_error(&SimError::from(e)),
        };
        let draft = match NewSimulation::validate(
            req.user_id.as_deref(),
            req.scenario.as_deref(),
            req.distribution_method.as_deref(),
            req.total_records,
            req.start_time,
            req.end_time,
            now_millis(),
        ) {
            Ok(draft) => draft,
            Err(e) => return ApiResponse::from_error(&e),
        };
        match self.scheduler.create(&draft) {
            Ok(sim) => ApiResponse::ok(201, json!({ "simulation": sim })),
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    pub fn start_simulation(&self, id: &str) -> ApiResponse {
        match self.scheduler.start(id) {
            Ok(scheduled) => ApiResponse::ok(200, json!({ "scheduled": scheduled })),
            Err(e @ SimError::NotFound { .. }) => ApiResponse::error(400, e.to_string()),
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    pub fn list_simulations(&self, user_id: Option<&str>) -> ApiResponse {
        let Some(user_id) = user_id.map(str::trim).filter(|u| !u.is_empty()) else {
            return ApiResponse::error(400, "userId is required");
        };
        match self.scheduler.store().list_by_user(user_id, self.list_limit) {
            Ok(sims) => ApiResponse::ok(200, json!({ "simulations": sims })),
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    pub fn get_simulation(&self, id: &str) -> ApiResponse {
        match self.scheduler.store().get(id) {
            Ok(Some(sim)) => ApiResponse::ok(200, json!({ "simulation": sim })),
            Ok(None) => ApiResponse::error(404, "not found"),
            Err(e) => ApiResponse::from_error(&e),
        }
    }
}
