// Integration tests for the device HTTP surface, driven over a real socket
// the same way the supervisor drives it

use polargraph_rs::config::Config;
use polargraph_rs::controller::Controller;
use polargraph_rs::hardware::{MotorBank, SimPenServo, SimStepDriver};
use polargraph_rs::web;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

fn test_config() -> Config {
    let mut config = Config::default();
    config.speeds.default_sps = 20_000;
    config.speeds.travel_sps = 50_000;
    config.speeds.max_sps = 100_000;
    config.pen.settle_ms = 0;
    config
}

async fn spawn_device(config: Config) -> (String, Controller) {
    let (left, _) = SimStepDriver::new("left", false);
    let (right, _) = SimStepDriver::new("right", false);
    let (servo, _) = SimPenServo::new();
    let motors = MotorBank::new(Box::new(left), Box::new(right));
    let controller = Controller::new(config, motors, Box::new(servo));
    controller.spawn_motion_worker();

    let app = web::api::create_router(controller.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), controller)
}

async fn get_status(client: &reqwest::Client, base: &str) -> Value {
    client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_idle(client: &reqwest::Client, base: &str, timeout: Duration) -> Value {
    let deadline = Instant::now() + timeout;
    loop {
        let status = get_status(client, base).await;
        let queue = &status["queue"];
        if queue["size"] == 0 && queue["isExecuting"] == false {
            return status;
        }
        assert!(Instant::now() < deadline, "device never idled: {status}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_status_shape_and_preflight() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let status = get_status(&client, &base).await;
    assert_eq!(status["state"]["initialized"], false);
    assert_eq!(status["motors"][0]["id"], "left");
    assert_eq!(status["motors"][1]["id"], "right");
    assert_eq!(status["queue"]["size"], 0);
    assert_eq!(status["queue"]["isExecuting"], false);
    assert!(status["wifi"]["ip"].is_string());

    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("{base}/api/path"))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status().as_u16(), 204);
    assert_eq!(
        preflight
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert_eq!(
        preflight
            .headers()
            .get("access-control-allow-methods")
            .unwrap(),
        "GET,POST,OPTIONS"
    );
}

#[tokio::test]
async fn test_path_requires_start_position_when_uninitialized() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({ "points": [{ "x": 100.0, "y": 100.0 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    // Invalid start coordinates are a 422.
    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "startPosition": { "x": -50.0, "y": 100.0 },
            "points": []
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn test_draw_line_end_to_end() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "endOfJob": true,
            "startPosition": { "x": 575.0, "y": 365.0, "penDown": false },
            "points": [{ "x": 775.0, "y": 365.0, "penDown": true }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], 1);

    let status = wait_idle(&client, &base, Duration::from_secs(10)).await;
    let x = status["state"]["x_mm"].as_f64().unwrap();
    let y = status["state"]["y_mm"].as_f64().unwrap();
    assert!((x - 775.0).abs() < 0.5, "x was {x}");
    assert!((y - 365.0).abs() < 0.5, "y was {y}");
    assert_eq!(status["state"]["penDown"], true);
}

#[tokio::test]
async fn test_queue_overflow_is_rejected_whole() {
    let mut config = test_config();
    config.queue.capacity = 50;
    let (base, _controller) = spawn_device(config).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "startPosition": { "x": 100.0, "y": 100.0 }
        }))
        .send()
        .await
        .unwrap();

    // 51 points into a 50-slot queue: 429 and nothing enqueued.
    let points: Vec<Value> = (0..51)
        .map(|i| json!({ "x": 100.0 + i as f64, "y": 150.0 }))
        .collect();
    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({ "points": points }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 429);

    let status = get_status(&client, &base).await;
    assert_eq!(status["queue"]["size"], 0);
    assert_eq!(status["queue"]["isExecuting"], false);
}

#[tokio::test]
async fn test_malformed_points_are_skipped() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "endOfJob": true,
            "startPosition": { "x": 400.0, "y": 300.0 },
            "points": [
                { "x": 420.0, "y": 300.0 },
                { "x": 440.0 },
                { "penDown": true },
                { "x": -10.0, "y": 300.0 },
                { "x": 460.0, "y": 300.0 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], 2);
}

#[tokio::test]
async fn test_cancel_clears_queue_and_lifts_pen() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    // A slow faraway move plus a queue of followers.
    let response = client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "startPosition": { "x": 100.0, "y": 100.0, "penDown": true },
            "points": [
                { "x": 1100.0, "y": 700.0, "penDown": true, "speed": 500 },
                { "x": 100.0, "y": 100.0, "penDown": true, "speed": 500 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = client
        .post(format!("{base}/api/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let status = wait_idle(&client, &base, Duration::from_secs(5)).await;
    assert_eq!(status["state"]["penDown"], false);
}

#[tokio::test]
async fn test_streamed_batches_keep_executing_until_end_of_job() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "startPosition": { "x": 400.0, "y": 300.0 }
        }))
        .send()
        .await
        .unwrap();

    // Batch 1 of 2, no end-of-job.
    client
        .post(format!("{base}/api/path"))
        .json(&json!({ "points": [{ "x": 410.0, "y": 300.0 }] }))
        .send()
        .await
        .unwrap();

    // Wait for the batch to drain, then confirm the device still reports
    // executing while it waits for the rest of the job.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = get_status(&client, &base).await;
        if status["queue"]["size"] == 0 {
            assert_eq!(status["queue"]["isExecuting"], true);
            break;
        }
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The closing batch completes the job.
    client
        .post(format!("{base}/api/path"))
        .json(&json!({ "endOfJob": true, "points": [{ "x": 420.0, "y": 300.0 }] }))
        .send()
        .await
        .unwrap();
    wait_idle(&client, &base, Duration::from_secs(10)).await;
}

#[tokio::test]
async fn test_jog_and_pen_endpoints() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/move"))
        .json(&json!({ "motor": "middle", "steps": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = client
        .post(format!("{base}/api/move"))
        .json(&json!({ "motor": "left", "steps": 50, "speed": 50000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // The jog is a raw motor test: pose must be untouched.
    let status = get_status(&client, &base).await;
    assert_eq!(status["state"]["steps"]["left"], 0);

    let response = client
        .post(format!("{base}/api/pen"))
        .json(&json!({ "penDown": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["moved"], true);

    let status = get_status(&client, &base).await;
    assert_eq!(status["state"]["penDown"], true);
}

#[tokio::test]
async fn test_park_requires_initialization() {
    let (base, _controller) = spawn_device(test_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/park"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    client
        .post(format!("{base}/api/path"))
        .json(&json!({
            "reset": true,
            "startPosition": { "x": 400.0, "y": 300.0 }
        }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/api/park"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let status = wait_idle(&client, &base, Duration::from_secs(10)).await;
    let x = status["state"]["x_mm"].as_f64().unwrap();
    let y = status["state"]["y_mm"].as_f64().unwrap();
    assert!((x - 50.0).abs() < 0.5);
    assert!((y - 50.0).abs() < 0.5);
    assert_eq!(status["state"]["penDown"], false);
}
