use actix_web::HttpRequest;

use crate::clients::{Credentials, UpstreamError};
use crate::error::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn api_key_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Collects the names of absent required parameters in request order.
#[derive(Debug, Default)]
pub struct MissingParams(Vec<&'static str>);

impl MissingParams {
    /// Required string; empty strings count as missing.
    pub fn text(&mut self, name: &'static str, value: Option<String>) -> String {
        match non_empty(value) {
            Some(value) => value,
            None => {
                self.0.push(name);
                String::new()
            }
        }
    }

    pub fn present<T>(&mut self, name: &'static str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.0.push(name);
        }
        value
    }

    /// The `x-api-key` header wins over a token passed as a parameter.
    pub fn credentials(
        &mut self,
        req: &HttpRequest,
        universe_id: Option<String>,
        api_token: Option<String>,
    ) -> Credentials {
        let universe_id = self.text("universeId", universe_id);
        let api_token = self.text("apiToken", non_empty(api_key_header(req)).or(api_token));
        Credentials { universe_id, api_token }
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::BadRequest(missing_message(&self.0)))
        }
    }
}

pub fn missing_message(names: &[&str]) -> String {
    match names {
        [] => "Missing required parameters".to_string(),
        [only] => format!("Missing {}", only),
        [first, second] => format!("Missing {} or {}", first, second),
        [rest @ .., last] => format!("Missing {}, or {}", rest.join(", "), last),
    }
}

/// Upstream 404 becomes a local 404 with a friendly message; anything else passes through.
pub fn not_found_or(error: UpstreamError, message: &str) -> AppError {
    if error.is_not_found() {
        AppError::NotFound(message.to_string())
    } else {
        error.into()
    }
}
