use serde_json::{Value, json};
use tokio::task::JoinHandle;
use wrench_server::{AppConfig, AuditSinkKind, build_app};

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.audit.sink = AuditSinkKind::Memory;
    // Deliver inside publish() so assertions need no polling
    cfg.notifications.queued = false;
    cfg
}

async fn start_server(cfg: AppConfig) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(&cfg).await.expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (reqwest::StatusCode, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn server_endpoints_work() {
    let (base, shutdown_tx, handle) = start_server(test_config()).await;
    let client = reqwest::Client::new();
    let api = format!("{base}/api");

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Directory
    let (status, admin) = post(
        &client,
        format!("{api}/users"),
        json!({ "name": "Ada", "role": "admin", "preferredChannel": "in_app" }),
    )
    .await;
    assert_eq!(status, 201);
    let (_, requester) = post(
        &client,
        format!("{api}/users"),
        json!({ "name": "Rui", "role": "requester", "preferredChannel": "in_app" }),
    )
    .await;
    let (_, technician) = post(
        &client,
        format!("{api}/users"),
        json!({ "name": "Tess", "role": "technician", "preferredChannel": "in_app" }),
    )
    .await;
    let (status, resource) = post(
        &client,
        format!("{api}/resources"),
        json!({ "name": "Chiller 2", "location": "Roof" }),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(resource["status"], "operational");

    // Work-order lifecycle
    let (status, order) = post(
        &client,
        format!("{api}/work-orders"),
        json!({
            "title": "Chiller short-cycling",
            "category": "hvac",
            "priority": "high",
            "submitterId": requester["id"],
            "resourceId": resource["id"],
        }),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(order["status"], "open");
    let order_url = format!("{api}/work-orders/{}", order["id"]);

    let (status, assigned) = post(
        &client,
        format!("{order_url}/assign"),
        json!({ "technicianId": technician["id"] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(assigned["status"], "assigned");
    assert_eq!(assigned["technicianId"], technician["id"]);

    // Equipment is held while the order is assigned
    let resp = client
        .get(format!("{api}/resources/{}", resource["id"]))
        .send()
        .await
        .unwrap();
    let held: Value = resp.json().await.unwrap();
    assert_eq!(held["status"], "in_maintenance");

    let resp = client.post(format!("{order_url}/start")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let (status, done) = post(
        &client,
        format!("{order_url}/complete"),
        json!({ "resolution": "Replaced contactor" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["resolution"], "Replaced contactor");

    let resp = client
        .get(format!("{api}/resources/{}", resource["id"]))
        .send()
        .await
        .unwrap();
    let restored: Value = resp.json().await.unwrap();
    assert_eq!(restored["status"], "operational");

    // Illegal transition maps to 409 with the error body
    let resp = client.post(format!("{order_url}/start")).send().await.unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    // History
    let resp = client
        .get(format!("{api}/events?type=work_order.status_changed"))
        .send()
        .await
        .unwrap();
    let changes: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[2]["payload"]["to"], "completed");

    let resp = client
        .get(format!("{api}/events?source=directory_service&limit=1"))
        .send()
        .await
        .unwrap();
    let latest: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0]["type"], "user.registered");
    assert_eq!(latest[0]["payload"]["userId"], technician["id"]);

    // Aggregated metrics
    let resp = client.get(format!("{api}/metrics")).send().await.unwrap();
    let metrics: Value = resp.json().await.unwrap();
    assert_eq!(metrics["created_total"], 1);
    assert_eq!(metrics["completed_total"], 1);
    assert_eq!(metrics["open_work_orders"], 0);
    assert_eq!(metrics["by_category"]["hvac"], 1);

    // Notifications: admin on create, technician on assign, requester on
    // start, requester and admin on complete
    let resp = client
        .get(format!("{api}/notifications?recipient={}", requester["id"]))
        .send()
        .await
        .unwrap();
    let records: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["success"] == true));

    let resp = client
        .get(format!("{api}/users/{}/inbox", technician["id"]))
        .send()
        .await
        .unwrap();
    let inbox: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0]["subject"],
        format!("Work order #{} assigned to you", order["id"])
    );

    let resp = client
        .get(format!("{api}/users/{}/inbox", admin["id"]))
        .send()
        .await
        .unwrap();
    let inbox: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(inbox.len(), 2);

    // Broker introspection
    let resp = client.get(format!("{api}/broker")).send().await.unwrap();
    let broker: Value = resp.json().await.unwrap();
    assert_eq!(broker["observerFailures"], 0);
    assert_eq!(broker["historyCapacity"], 1000);
    assert_eq!(broker["catchAll"], 1);
    assert!(
        broker["subscribedTypes"]
            .as_array()
            .unwrap()
            .contains(&json!("work_order.assigned"))
    );

    // Shutdown server
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn errors_use_json_body() {
    let (base, shutdown_tx, handle) = start_server(test_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/users/404"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let (status, body) = post(
        &client,
        format!("{base}/api/work-orders"),
        json!({ "title": "Orphan", "submitterId": 77 }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "bad_request");

    let resp = client
        .get(format!("{base}/api/events?type="))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn prometheus_endpoint_renders_broker_counters() {
    let (base, shutdown_tx, handle) = start_server(test_config()).await;
    let client = reqwest::Client::new();

    let (status, _) = post(
        &client,
        format!("{base}/api/users"),
        json!({ "name": "Ada", "role": "admin" }),
    )
    .await;
    assert_eq!(status, 201);

    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(resp.status().is_success());
    let text = resp.text().await.unwrap();
    assert!(text.contains(wrench_server::metrics::names::EVENTS_PUBLISHED_TOTAL));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
