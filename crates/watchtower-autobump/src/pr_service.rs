//! The PR-creation sub-service boundary.
//!
//! PR creation lives in another service; the orchestrator only needs the
//! call. Every outcome, including transport failure, is non-fatal to the
//! candidate loop.

use std::time::Duration;

use serde_json::json;
use watchtower_types::BumpPrOutcome;

/// Transport-level failure talking to the PR service. Folded into the
/// non-fatal handling alongside the service's own error arm.
#[derive(Debug, thiserror::Error)]
#[error("PR service call failed: {0}")]
pub struct PrServiceError(pub String);

/// The remote call that opens a dependency-bump PR against a project.
pub trait BumpPrService: Send + Sync {
    fn create_bump_pr(
        &self,
        organization_id: &str,
        project_id: &str,
        package_name: &str,
        target_version: &str,
        current_version: Option<&str>,
    ) -> Result<BumpPrOutcome, PrServiceError>;
}

const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("watchtower/", env!("CARGO_PKG_VERSION"));

/// HTTP implementation of the PR service call.
#[derive(Debug, Clone)]
pub struct HttpPrService {
    base_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpPrService {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, PrServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PrServiceError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            client,
        })
    }
}

impl BumpPrService for HttpPrService {
    fn create_bump_pr(
        &self,
        organization_id: &str,
        project_id: &str,
        package_name: &str,
        target_version: &str,
        current_version: Option<&str>,
    ) -> Result<BumpPrOutcome, PrServiceError> {
        let url = format!("{}/bump-prs", self.base_url);
        let body = json!({
            "organization_id": organization_id,
            "project_id": project_id,
            "package_name": package_name,
            "target_version": target_version,
            "current_version": current_version,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| PrServiceError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PrServiceError(format!("status {status}: {body}")));
        }

        response
            .json()
            .map_err(|e| PrServiceError(format!("unparseable response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread;

    use tiny_http::{Header, Response, Server, StatusCode};

    use super::*;

    fn with_server<F>(handler: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(tiny_http::Request) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let req = server.recv().expect("request");
            handler(req);
        });
        (addr, handle)
    }

    fn json_response(body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string(body)
            .with_status_code(StatusCode(200))
            .with_header(Header::from_bytes("Content-Type", "application/json").expect("header"))
    }

    #[test]
    fn parses_created_outcome_and_sends_the_full_payload() {
        let (addr, handle) = with_server(|mut req| {
            assert_eq!(req.url(), "/bump-prs");
            let mut body = String::new();
            req.as_reader().read_to_string(&mut body).expect("body");
            let value: serde_json::Value = serde_json::from_str(&body).expect("json");
            assert_eq!(value["project_id"], "proj-1");
            assert_eq!(value["target_version"], "4.18.0");
            assert_eq!(value["current_version"], "4.17.21");

            req.respond(json_response(
                r#"{"pr_url":"https://github.com/o/r/pull/7","pr_number":7}"#,
            ))
            .expect("respond");
        });

        let service = HttpPrService::new(&addr, Some("token")).expect("service");
        let outcome = service
            .create_bump_pr("org-1", "proj-1", "lodash", "4.18.0", Some("4.17.21"))
            .expect("call");
        assert!(matches!(outcome, BumpPrOutcome::Created { pr_number: 7, .. }));
        handle.join().expect("join");
    }

    #[test]
    fn parses_service_error_arm() {
        let (addr, handle) = with_server(|req| {
            req.respond(json_response(r#"{"error":"no GitHub App"}"#))
                .expect("respond");
        });

        let service = HttpPrService::new(&addr, None).expect("service");
        let outcome = service
            .create_bump_pr("org-1", "proj-1", "lodash", "4.18.0", None)
            .expect("call");
        match outcome {
            BumpPrOutcome::Failed { error } => assert_eq!(error, "no GitHub App"),
            other => panic!("expected error arm, got {other:?}"),
        }
        handle.join().expect("join");
    }

    #[test]
    fn transport_failure_is_a_service_error() {
        let (addr, handle) = with_server(|req| {
            req.respond(Response::empty(StatusCode(502))).expect("respond");
        });

        let service = HttpPrService::new(&addr, None).expect("service");
        let err = service
            .create_bump_pr("org-1", "proj-1", "lodash", "4.18.0", None)
            .expect_err("must fail");
        assert!(err.to_string().contains("502"));
        handle.join().expect("join");
    }
}
