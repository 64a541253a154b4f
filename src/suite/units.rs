use std::collections::BTreeMap;
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::registry::unit::{TestUnit, UnitSpec};
use crate::runner::context::{Fixtures, UnitContext, extract_fixtures};
use crate::runner::result::UnitOutcome;
use crate::suite::manifest::HttpDef;

/// Fixture key holding the base URL that relative HTTP paths resolve against.
pub const BASE_URL_FIXTURE: &str = "base_url";

/// Prefix for fixture values exported to shell checks.
pub const FIXTURE_ENV_PREFIX: &str = "SUITECHECK_";

/// A check declared in the manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Shell { name: String, command: String },
    Http { name: String, request: HttpDef },
}

impl Check {
    pub fn name(&self) -> &str {
        match self {
            Self::Shell { name, .. } | Self::Http { name, .. } => name,
        }
    }
}

/// A unit whose checks come from the manifest.
///
/// Checks run in order and record their result on the context. A failed
/// check does not stop the unit; a shell check that cannot be spawned does.
pub struct ManifestUnit {
    spec: UnitSpec,
    checks: Vec<Check>,
    http_timeout: Duration,
}

impl ManifestUnit {
    pub fn new(spec: UnitSpec, checks: Vec<Check>, http_timeout: Duration) -> Self {
        Self {
            spec,
            checks,
            http_timeout,
        }
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    fn run_shell(
        &self,
        ctx: &mut UnitContext<'_>,
        name: &str,
        command: &str,
    ) -> Result<(), String> {
        let start = Instant::now();
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        for (key, value) in fixture_env(ctx.fixtures) {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .map_err(|e| format!("check \"{name}\" failed to spawn: {e}"))?;
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        ctx.fixtures.extend(extract_fixtures(&stdout));

        if output.status.success() {
            ctx.pass(name, duration);
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!("exited with code {code}");
            if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                message.push_str(&format!(": {}", last.trim()));
            }
            ctx.fail(name, duration, message);
        }
        Ok(())
    }

    fn run_http(&self, ctx: &mut UnitContext<'_>, name: &str, request: &HttpDef) {
        let start = Instant::now();
        match self.send(ctx.fixtures, request) {
            Ok(response) => {
                let duration = start.elapsed();
                if response.status != request.expect_status {
                    ctx.fail(
                        name,
                        duration,
                        format!("expected {}, got {}", request.expect_status, response.status),
                    );
                    return;
                }
                let captured = capture_fields(&response.body, &request.capture);
                let missing: Vec<&String> = request
                    .capture
                    .keys()
                    .filter(|k| !captured.iter().any(|(c, _)| c == *k))
                    .collect();
                ctx.fixtures.extend(captured);
                if missing.is_empty() {
                    ctx.pass(name, duration);
                } else {
                    let keys: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
                    ctx.fail(
                        name,
                        duration,
                        format!("response is missing captured fields: {}", keys.join(", ")),
                    );
                }
            }
            Err(e) => ctx.fail(name, start.elapsed(), e),
        }
    }

    fn send(&self, fixtures: &Fixtures, request: &HttpDef) -> Result<HttpResponse, String> {
        let path = render(fixtures, &request.path)?;
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else {
            let base = fixtures
                .get(BASE_URL_FIXTURE)
                .ok_or_else(|| format!("relative path {path} needs a base_url"))?;
            format!("{}{}", base.trim_end_matches('/'), path)
        };
        let body = request
            .body
            .as_deref()
            .map(|b| render(fixtures, b))
            .transpose()?;
        let mut headers = Vec::with_capacity(request.headers.len());
        for (key, value) in &request.headers {
            headers.push((key.as_str(), render(fixtures, value)?));
        }

        debug!(method = %request.method, url = %url, "sending request");

        let config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(self.http_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let method = request.method.to_uppercase();
        let result = match method.as_str() {
            "GET" | "DELETE" | "HEAD" => {
                let mut req = match method.as_str() {
                    "GET" => agent.get(&url),
                    "HEAD" => agent.head(&url),
                    _ => agent.delete(&url),
                };
                for (key, value) in &headers {
                    req = req.header(*key, value);
                }
                req.call()
            }
            "POST" | "PUT" | "PATCH" => {
                let mut req = match method.as_str() {
                    "POST" => agent.post(&url),
                    "PUT" => agent.put(&url),
                    _ => agent.patch(&url),
                };
                let has_content_type = headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                if body.is_some() && !has_content_type {
                    req = req.header("Content-Type", "application/json");
                }
                for (key, value) in &headers {
                    req = req.header(*key, value);
                }
                match &body {
                    Some(body) => req.send(body.as_bytes()),
                    None => req.send_empty(),
                }
            }
            other => return Err(format!("unsupported HTTP method: {other}")),
        };

        let mut resp = result.map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status().as_u16();
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| format!("failed to read response body: {e}"))?;
        Ok(HttpResponse { status, body })
    }
}

impl TestUnit for ManifestUnit {
    fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    fn run(&self, ctx: &mut UnitContext<'_>) -> UnitOutcome {
        for check in &self.checks {
            match check {
                Check::Shell { name, command } => {
                    if let Err(reason) = self.run_shell(ctx, name, command) {
                        return UnitOutcome::Failed(reason);
                    }
                }
                Check::Http { name, request } => self.run_http(ctx, name, request),
            }
        }
        UnitOutcome::Passed
    }
}

/// Captured HTTP response.
#[derive(Debug, Clone)]
struct HttpResponse {
    status: u16,
    body: String,
}

fn render(fixtures: &Fixtures, template: &str) -> Result<String, String> {
    fixtures
        .render(template)
        .map_err(|missing| format!("unknown fixture: {}", missing.join(", ")))
}

/// Fixtures as environment variables: `token` becomes `SUITECHECK_TOKEN`.
fn fixture_env(fixtures: &Fixtures) -> Vec<(String, String)> {
    fixtures
        .iter()
        .map(|(key, value)| {
            let name: String = key
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect();
            (format!("{FIXTURE_ENV_PREFIX}{name}"), value.to_owned())
        })
        .collect()
}

/// Pull `fixture -> dotted.json.path` values out of a JSON body.
fn capture_fields(body: &str, capture: &BTreeMap<String, String>) -> Vec<(String, String)> {
    if capture.is_empty() {
        return Vec::new();
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };

    capture
        .iter()
        .filter_map(|(fixture, path)| {
            let pointer = format!("/{}", path.replace('.', "/"));
            let value = parsed.pointer(&pointer)?;
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((fixture.clone(), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use crate::runner::result::CheckResult;
    use crate::runner::surface::DetachedSurface;

    fn shell(name: &str, command: &str) -> Check {
        Check::Shell {
            name: name.into(),
            command: command.into(),
        }
    }

    fn get(path: &str) -> HttpDef {
        HttpDef {
            method: "GET".into(),
            path: path.into(),
            body: None,
            expect_status: 200,
            headers: BTreeMap::new(),
            capture: BTreeMap::new(),
        }
    }

    fn run_unit(unit: &ManifestUnit, fixtures: &mut Fixtures) -> (UnitOutcome, Vec<CheckResult>) {
        let mut surface = DetachedSurface;
        let mut ctx = UnitContext::new(unit.id(), fixtures, &mut surface);
        let outcome = unit.run(&mut ctx);
        (outcome, ctx.into_checks())
    }

    /// Serve one canned HTTP response on a random local port.
    fn serve_once(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                let header_end = loop {
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                };
                // Drain the body so closing the socket does not reset it.
                let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while request.len() < header_end + body_len {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn shell_checks_pass_and_fail() {
        let unit = ManifestUnit::new(
            UnitSpec::new("cli"),
            vec![
                shell("succeeds", "true"),
                shell("fails", "echo 'no such project' >&2; exit 2"),
            ],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        let (outcome, checks) = run_unit(&unit, &mut fixtures);

        assert_eq!(outcome, UnitOutcome::Passed);
        assert_eq!(checks.len(), 2);
        assert!(!checks[0].is_failed());
        assert!(checks[1].is_failed());
        assert_eq!(
            checks[1].error.as_deref(),
            Some("exited with code 2: no such project")
        );
        assert_eq!(checks[1].unit, "cli");
    }

    #[test]
    fn shell_checks_share_fixtures() {
        let unit = ManifestUnit::new(
            UnitSpec::new("projects"),
            vec![
                shell("create", "echo '::fixture project-id=p-42'"),
                shell("read", "test \"$SUITECHECK_PROJECT_ID\" = p-42"),
            ],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        let (_, checks) = run_unit(&unit, &mut fixtures);
        assert!(checks.iter().all(|c| !c.is_failed()), "{checks:?}");
        assert_eq!(fixtures.get("project-id"), Some("p-42"));
    }

    #[test]
    fn http_check_without_base_url_fails_check() {
        let unit = ManifestUnit::new(
            UnitSpec::new("api"),
            vec![Check::Http {
                name: "list".into(),
                request: get("/api/projects"),
            }],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        let (outcome, checks) = run_unit(&unit, &mut fixtures);
        assert_eq!(outcome, UnitOutcome::Passed);
        assert!(checks[0].error.as_deref().unwrap().contains("needs a base_url"));
    }

    #[test]
    fn http_check_reports_unknown_fixture() {
        let unit = ManifestUnit::new(
            UnitSpec::new("api"),
            vec![Check::Http {
                name: "get".into(),
                request: get("http://127.0.0.1:1/api/projects/{project_id}"),
            }],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        let (_, checks) = run_unit(&unit, &mut fixtures);
        assert_eq!(
            checks[0].error.as_deref(),
            Some("unknown fixture: project_id")
        );
    }

    #[test]
    fn http_check_connection_failure_is_failed_check() {
        let unit = ManifestUnit::new(
            UnitSpec::new("api"),
            vec![Check::Http {
                name: "ping".into(),
                request: get("/ping"),
            }],
            Duration::from_secs(2),
        );
        let mut fixtures = Fixtures::new();
        fixtures.insert(BASE_URL_FIXTURE, "http://127.0.0.1:1");
        let (outcome, checks) = run_unit(&unit, &mut fixtures);
        assert_eq!(outcome, UnitOutcome::Passed);
        assert!(checks[0].error.as_deref().unwrap().starts_with("request failed"));
    }

    #[test]
    fn http_check_matches_status_and_captures() {
        let base = serve_once(201, r#"{"data": {"id": "c-7", "version": 3}}"#);
        let mut request = get("/api/collections");
        request.method = "POST".into();
        request.body = Some(r#"{"name": "docs"}"#.into());
        request.expect_status = 201;
        request.capture.insert("collection_id".into(), "data.id".into());
        request.capture.insert("version".into(), "data.version".into());

        let unit = ManifestUnit::new(
            UnitSpec::new("collections"),
            vec![Check::Http {
                name: "create".into(),
                request,
            }],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        fixtures.insert(BASE_URL_FIXTURE, base);
        let (_, checks) = run_unit(&unit, &mut fixtures);

        assert!(!checks[0].is_failed(), "{checks:?}");
        assert_eq!(fixtures.get("collection_id"), Some("c-7"));
        assert_eq!(fixtures.get("version"), Some("3"));
    }

    #[test]
    fn http_check_status_mismatch() {
        let base = serve_once(500, "{}");
        let unit = ManifestUnit::new(
            UnitSpec::new("documents"),
            vec![Check::Http {
                name: "list".into(),
                request: get("/api/documents"),
            }],
            Duration::from_secs(5),
        );
        let mut fixtures = Fixtures::new();
        fixtures.insert(BASE_URL_FIXTURE, base);
        let (_, checks) = run_unit(&unit, &mut fixtures);
        assert_eq!(checks[0].error.as_deref(), Some("expected 200, got 500"));
    }

    #[test]
    fn capture_fields_reads_dotted_paths() {
        let mut capture = BTreeMap::new();
        capture.insert("token".to_owned(), "auth.token".to_owned());
        capture.insert("missing".to_owned(), "nope".to_owned());
        let got = capture_fields(r#"{"auth": {"token": "abc"}}"#, &capture);
        assert_eq!(got, vec![("token".to_owned(), "abc".to_owned())]);
        assert!(capture_fields("not json", &capture).is_empty());
    }

    #[test]
    fn fixture_env_names() {
        let mut fixtures = Fixtures::new();
        fixtures.insert("project-id", "p-1");
        fixtures.insert("token", "t");
        let env = fixture_env(&fixtures);
        assert!(env.contains(&("SUITECHECK_PROJECT_ID".to_owned(), "p-1".to_owned())));
        assert!(env.contains(&("SUITECHECK_TOKEN".to_owned(), "t".to_owned())));
    }
}
