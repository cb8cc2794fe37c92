//! Runs the whole pipeline through the real HTTP adapters against one
//! in-process server standing in for the call provider, the transcription
//! service and the helpdesk.
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use calldesk::{
    app::AppBuilder,
    config::Config,
    pipeline::{CallOutcome, CallProcessor},
    store::ProcessedCalls,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const AGENT: &str = "09631084471";
const CUSTOMER: &str = "09812345678";

struct Fake {
    addr: Mutex<Option<SocketAddr>>,
    calls: Mutex<Vec<Value>>,
    transcript: String,
    reject_tickets: AtomicBool,
    refreshes: AtomicUsize,
    tickets: Mutex<Vec<Value>>,
    notes: AtomicUsize,
}

impl Fake {
    fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            transcript: transcript.to_string(),
            reject_tickets: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            tickets: Mutex::new(Vec::new()),
            notes: AtomicUsize::new(0),
        })
    }

    fn add_call(&self, id: &str, from: &str, to: &str) {
        let addr = self.addr.lock().unwrap().unwrap();
        self.calls.lock().unwrap().push(json!({
            "Sid": id,
            "From": from,
            "To": to,
            "Status": "completed",
            "Duration": "125",
            "StartTime": "2024-03-01 10:15:00",
            "RecordingUrl": format!("http://{}/recordings/{}.mp3", addr, id),
        }));
    }

    fn ticket_count(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }
}

fn token_of(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn list_calls(State(fake): State<Arc<Fake>>) -> Json<Value> {
    let calls = fake.calls.lock().unwrap().clone();
    Json(json!({ "Calls": calls }))
}

async fn recording() -> Bytes {
    Bytes::from_static(b"ID3-fake-audio")
}

async fn listen(State(fake): State<Arc<Fake>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if token_of(&headers) != "Token dg-key" {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    (
        StatusCode::OK,
        Json(json!({"results": {"channels": [{"alternatives": [
            {"transcript": fake.transcript, "confidence": 0.91}
        ]}]}})),
    )
}

async fn refresh_token(State(fake): State<Arc<Fake>>) -> Json<Value> {
    let n = fake.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"access_token": format!("fresh-{}", n)}))
}

async fn search_contact() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn create_contact(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["lastName"], "Customer 5678");
    Json(json!({"id": "contact-1"}))
}

async fn create_ticket(
    State(fake): State<Arc<Fake>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if fake.reject_tickets.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"errorCode": "INVALID_OAUTH"})));
    }
    if !token_of(&headers).starts_with("Zoho-oauthtoken ") {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let mut tickets = fake.tickets.lock().unwrap();
    tickets.push(body);
    let id = format!("T{}", tickets.len());
    (
        StatusCode::OK,
        Json(json!({"id": id, "ticketNumber": format!("{}", 100 + tickets.len())})),
    )
}

async fn add_comment(State(fake): State<Arc<Fake>>) -> Json<Value> {
    fake.notes.fetch_add(1, Ordering::SeqCst);
    Json(json!({"id": "comment-1"}))
}

async fn start(fake: Arc<Fake>) -> SocketAddr {
    let app = Router::new()
        .route("/v1/Accounts/acct/Calls.json", get(list_calls))
        .route("/recordings/{file}", get(recording))
        .route("/v1/listen", post(listen))
        .route("/oauth/v2/token", post(refresh_token))
        .route("/api/v1/contacts/search", get(search_contact))
        .route("/api/v1/contacts", post(create_contact))
        .route("/api/v1/tickets", post(create_ticket))
        .route("/api/v1/tickets/{id}/comments", post(add_comment))
        .with_state(fake.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    *fake.addr.lock().unwrap() = Some(addr);
    addr
}

fn config(addr: SocketAddr, dir: &Path) -> Config {
    let agents = dir.join("agents_config.json");
    std::fs::write(
        &agents,
        json!({"agents": {AGENT: {"name": "Prateek", "department": "Customer Success"}}})
            .to_string(),
    )
    .unwrap();

    let base = format!("http://{}", addr);
    let mut config = Config::default();
    config.agents_path = agents.display().to_string();
    config.poller.processed_path = dir.join("processed_calls.json").display().to_string();
    config.provider.base_url = base.clone();
    config.provider.sid = Some("acct".to_string());
    config.provider.api_key = Some("key".to_string());
    config.provider.api_token = Some("token".to_string());
    config.transcription.endpoint = format!("{}/v1/listen", base);
    config.transcription.api_key = Some("dg-key".to_string());
    config.helpdesk.enabled = true;
    config.helpdesk.api_domain = base.clone();
    config.helpdesk.accounts_url = base;
    config.helpdesk.org_id = Some("org-1".to_string());
    config.helpdesk.department_id = Some("dept-1".to_string());
    config.helpdesk.access_token = Some("initial".to_string());
    config.helpdesk.refresh_token = Some("refresh".to_string());
    config.helpdesk.client_id = Some("client".to_string());
    config.helpdesk.client_secret = Some("secret".to_string());
    config.helpdesk.credential_path = dir.join("credentials.json").display().to_string();
    config
}

fn processor(config: &Config) -> CallProcessor {
    AppBuilder::new()
        .with_config(config.clone())
        .build()
        .unwrap()
}

async fn setup(transcript: &str) -> (Arc<Fake>, Config, TempDir) {
    let fake = Fake::new(transcript);
    let addr = start(fake.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(addr, dir.path());
    (fake, config, dir)
}

#[tokio::test]
async fn test_billing_call_is_filed_once_across_restarts() {
    let (fake, config, _dir) = setup("I was charged twice this month").await;
    fake.add_call("C1", CUSTOMER, AGENT);
    let token = CancellationToken::new();

    let mut first = processor(&config);
    let summary = first.run_cycle(&token).await.unwrap();
    assert_eq!(summary.filed, 1);
    assert_eq!(fake.ticket_count(), 1);
    assert_eq!(fake.notes.load(Ordering::SeqCst), 1);

    {
        let tickets = fake.tickets.lock().unwrap();
        let ticket = &tickets[0];
        assert_eq!(ticket["subject"], "Call from 09812345678 - Billing inquiry");
        assert_eq!(ticket["contactId"], "contact-1");
        let description = ticket["description"].as_str().unwrap();
        assert!(description.contains("- Agent: Prateek"));
        assert!(description.contains("- Duration: 2m 5s"));
        assert!(description.contains("- Mood: Neutral"));
        assert!(description.contains("Billing inquiry"));
        assert!(description.contains("Call ID: C1"));
    }

    let processed = ProcessedCalls::load(&config.poller.processed_path).unwrap();
    assert!(processed.contains("C1"));

    // a fresh process reloads the set and leaves C1 alone
    let mut second = processor(&config);
    let summary = second.run_cycle(&token).await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert_eq!(fake.ticket_count(), 1);
}

#[tokio::test]
async fn test_unattributed_call_is_never_filed() {
    let (fake, config, _dir) = setup("Just checking in").await;
    fake.add_call("C2", CUSTOMER, "08000000000");
    let token = CancellationToken::new();

    let mut processor = processor(&config);
    for _ in 0..2 {
        let summary = processor.run_cycle(&token).await.unwrap();
        assert_eq!(summary.dropped, 1);
    }
    assert_eq!(fake.ticket_count(), 0);
    assert!(!processor.processed().contains("C2"));
}

#[tokio::test]
async fn test_rejected_ticket_leaves_call_unprocessed() {
    let (fake, config, _dir) = setup("My app is not working").await;
    fake.add_call("C3", AGENT, CUSTOMER);
    fake.reject_tickets.store(true, Ordering::SeqCst);

    let mut processor = processor(&config);
    let summary = processor.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(fake.ticket_count(), 0);
    assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);
    assert!(!processor.processed().contains("C3"));

    // the refreshed token was persisted for the next start
    let stored: Value = serde_json::from_str(
        &std::fs::read_to_string(&config.helpdesk.credential_path).unwrap(),
    )
    .unwrap();
    assert_eq!(stored["access_token"], "fresh-1");

    fake.reject_tickets.store(false, Ordering::SeqCst);
    let outcome = processor.process_once(Some("C3")).await.unwrap();
    assert!(matches!(outcome, Some((_, CallOutcome::Filed { .. }))));
    assert!(processor.processed().contains("C3"));
}

#[tokio::test]
async fn test_disabled_helpdesk_keeps_polling_without_filing() {
    let (fake, mut config, _dir) = setup("Thank you so much").await;
    fake.add_call("C4", CUSTOMER, AGENT);
    config.helpdesk.department_id = None;

    let mut processor = processor(&config);
    assert!(!processor.filing_enabled());
    let summary = processor.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(fake.ticket_count(), 0);
    assert!(processor.processed().is_empty());
}
