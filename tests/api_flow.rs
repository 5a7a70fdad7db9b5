use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Minimal back-office API: one thread, one request per connection.
struct StubApi {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
    heads: Arc<Mutex<Vec<String>>>,
}

impl StubApi {
    fn start(transactions: Value, matches: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let heads = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(matches));

        let (req_log, head_log) = (requests.clone(), heads.clone());
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                handle(stream, &transactions, &state, &req_log, &head_log);
            }
        });

        Self { url, requests, heads }
    }

    fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }

    fn logged(&self) -> Vec<String> {
        self.requests.lock().expect("lock").clone()
    }
}

fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let resp = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes());
    let _ = stream.flush();
}

fn allowed(status: &str, action: &str) -> bool {
    matches!(
        (status, action),
        ("pending", "confirm" | "reject" | "ignore") | ("auto", "confirm" | "reject")
    )
}

fn handle(
    mut stream: TcpStream,
    transactions: &Value,
    matches: &Mutex<Value>,
    requests: &Mutex<Vec<String>>,
    heads: &Mutex<Vec<String>>,
) {
    let head = read_head(&mut stream);
    let mut first = head.lines().next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let target = first.next().unwrap_or("").to_string();
    requests.lock().expect("lock").push(format!("{method} {target}"));
    heads.lock().expect("lock").push(head.to_ascii_lowercase());

    let path = target.split('?').next().unwrap_or("");
    match (method.as_str(), path) {
        ("GET", "/treasury/transactions") => {
            respond(&mut stream, "200 OK", &json!({ "items": transactions }).to_string());
        }
        ("GET", "/reconciliation/matches") => {
            let body = matches.lock().expect("lock").to_string();
            respond(&mut stream, "200 OK", &body);
        }
        ("POST", p) if p.starts_with("/reconciliation/matches/") => {
            let parts: Vec<&str> = p.trim_start_matches("/reconciliation/matches/").split('/').collect();
            let [id, action] = parts.as_slice() else {
                respond(&mut stream, "404 Not Found", "{}");
                return;
            };
            if id.starts_with("locked") {
                respond(&mut stream, "409 Conflict", r#"{"detail":"locked by another user"}"#);
                return;
            }
            let mut all = matches.lock().expect("lock");
            let Some(m) = all
                .as_array_mut()
                .and_then(|a| a.iter_mut().find(|m| m["id"] == *id))
            else {
                respond(&mut stream, "404 Not Found", "{}");
                return;
            };
            let status = m["status"].as_str().unwrap_or("").to_string();
            if !allowed(&status, action) {
                respond(&mut stream, "409 Conflict", r#"{"detail":"transition not allowed"}"#);
                return;
            }
            let target = match *action {
                "confirm" => "confirmed",
                "reject" => "rejected",
                _ => "ignored",
            };
            m["status"] = Value::from(target);
            respond(&mut stream, "200 OK", &m.to_string());
        }
        _ => respond(&mut stream, "404 Not Found", "{}"),
    }
}

fn tresor(home: &tempfile::TempDir, api: &StubApi) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tresor"));
    cmd.env("TRESOR_HOME", home.path())
        .env("TRESOR_API_URL", &api.url)
        .env("TRESOR_API_TOKEN", "t0ken");
    cmd
}

fn run_ok_out(home: &tempfile::TempDir, api: &StubApi, args: &[&str]) -> String {
    let mut cmd = tresor(home, api);
    cmd.args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf8 stdout")
}

fn transactions() -> Value {
    json!([
        { "date": "2024-07-01", "direction": "in", "amount": 100, "category": "Ventes" },
        { "date": "2024-07-02", "direction": "out", "amount": 40, "category": "Charges fixes" },
        { "date": "2024-08-03", "direction": "out", "amount": 20, "category": "Fournisseur" }
    ])
}

fn matches() -> Value {
    json!([
        { "id": "m1", "bankLine": { "label": "VIR ACME" }, "confidence": 0.7, "status": "pending" },
        { "id": "m2", "bankLine": { "label": "PRLV EDF" }, "confidence": 0.95, "status": "auto" },
        { "id": "locked-3", "bankLine": { "label": "CB METRO" }, "confidence": 0.4, "status": "pending" }
    ])
}

#[test]
fn timeline_from_api_is_cached_until_refresh() {
    let api = StubApi::start(transactions(), json!([]));
    let home = tempfile::tempdir().expect("tempdir");

    let first = run_ok_out(&home, &api, &["timeline", "--format", "tsv"]);
    assert!(first.contains("2024-07\t2024-07-01\t\t100.00\t40.00\t60.00"));
    let second = run_ok_out(&home, &api, &["timeline", "--format", "tsv"]);
    assert_eq!(first, second);
    assert_eq!(api.count("GET /treasury/transactions"), 1);

    run_ok_out(&home, &api, &["timeline", "--refresh"]);
    assert_eq!(api.count("GET /treasury/transactions"), 2);

    let listed = run_ok_out(&home, &api, &["cache", "list"]);
    assert!(listed.contains("transactions"));
    let cleared = run_ok_out(&home, &api, &["cache", "clear"]);
    assert!(cleared.contains("Removed 1 snapshot(s)"));

    run_ok_out(&home, &api, &["costs"]);
    assert_eq!(api.count("GET /treasury/transactions"), 3);
}

#[test]
fn date_range_is_sent_to_the_server_and_token_as_bearer() {
    let api = StubApi::start(transactions(), json!([]));
    let home = tempfile::tempdir().expect("tempdir");

    run_ok_out(&home, &api, &["timeline", "--from", "2024-08-01", "--to", "2024-08-31"]);
    let logged = api.logged();
    assert!(
        logged.iter().any(|r| r.contains("from=2024-08-01") && r.contains("to=2024-08-31")),
        "{logged:?}"
    );
    let heads = api.heads.lock().expect("lock").clone();
    assert!(heads.iter().all(|h| h.contains("authorization: bearer t0ken")));
}

#[test]
fn matches_list_from_api_in_confidence_order() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    let out = run_ok_out(&home, &api, &["matches", "list"]);
    let m2 = out.find("m2").expect("m2");
    let m1 = out.find("m1").expect("m1");
    let m3 = out.find("locked-3").expect("m3");
    assert!(m2 < m1 && m1 < m3);
    assert!(out.contains("high"));
}

#[test]
fn rejected_match_cannot_be_confirmed() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "reject", "m1"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Match m1 is now rejected."));
    assert_eq!(api.count("POST /reconciliation/matches/m1/reject"), 1);

    let post = api
        .heads
        .lock()
        .expect("lock")
        .iter()
        .find(|h| h.starts_with("post "))
        .cloned()
        .expect("post head");
    assert!(post.contains("idempotency-key: "));

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "confirm", "m1"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Match m1 is rejected; cannot confirm"))
        .stderr(predicate::str::contains("Allowed actions: none"));
    assert_eq!(api.count("POST "), 1, "illegal action must not reach the server");

    let out = run_ok_out(&home, &api, &["matches", "list", "--status", "rejected"]);
    assert!(out.contains("m1"));
}

#[test]
fn auto_match_offers_no_ignore() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "ignore", "m2"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Allowed actions: confirm, reject"));
    assert_eq!(api.count("POST "), 0);

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "confirm", "m2"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Match m2 is now confirmed."));
}

#[test]
fn server_refusal_keeps_the_status() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "confirm", "locked-3"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains(
            "Server refused to confirm match locked-3 (status stays pending)",
        ))
        .stderr(predicate::str::contains("locked by another user"));

    // Open, refused POST, then a reload.
    assert_eq!(api.count("GET /reconciliation/matches"), 2);
}

#[test]
fn actions_invalidate_the_cached_match_list() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    run_ok_out(&home, &api, &["matches", "list"]);
    run_ok_out(&home, &api, &["matches", "list"]);
    assert_eq!(api.count("GET /reconciliation/matches"), 1);

    run_ok_out(&home, &api, &["matches", "ignore", "m1"]);
    let out = run_ok_out(&home, &api, &["matches", "list", "--status", "ignored"]);
    assert!(out.contains("m1"));
}

#[test]
fn unknown_match_id_fails() {
    let api = StubApi::start(json!([]), matches());
    let home = tempfile::tempdir().expect("tempdir");

    let mut cmd = tresor(&home, &api);
    cmd.args(["matches", "confirm", "m404"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no match candidate with id 'm404'"));
    assert_eq!(api.count("POST "), 0);
}
