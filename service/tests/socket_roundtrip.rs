#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end over the Unix socket: handshake, clone, create, update,
//! list, delete, then check that the background sync reached the remote.
//!
//! The git part is skipped when `git` is not installed.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use folio_core::ConfigLoader;
use folio_service::PROTOCOL_VERSION;
use folio_service::manager::PortfolioManager;
use pretty_assertions::assert_eq;

struct TestClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: i64,
}

impl TestClient {
    fn connect(socket_path: &Path) -> Self {
        let stream = UnixStream::connect(socket_path).expect("connect to folio service");
        let writer = stream.try_clone().expect("clone stream");
        Self {
            writer,
            reader: BufReader::new(stream),
            next_id: 0,
        }
    }

    fn rpc(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let msg = serde_json::json!({"id": self.next_id, "method": method, "params": params});
        let mut bytes = serde_json::to_vec(&msg).expect("serialize");
        bytes.push(b'\n');
        self.writer.write_all(&bytes).expect("write");
        self.writer.flush().expect("flush");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let response: serde_json::Value = serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("parse response: {e}\nraw: {line}"));
        assert_eq!(response["id"], self.next_id);
        response
    }

    /// `result` of a call that must not be a protocol error.
    fn result(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let response = self.rpc(method, params);
        assert!(
            response.get("error").is_none(),
            "{method} returned an error: {response}"
        );
        response["result"].clone()
    }

    fn handshake(&mut self) {
        let result = self.result(
            "hello",
            serde_json::json!({"protocol_version": PROTOCOL_VERSION, "client_version": "test"}),
        );
        assert_eq!(result["protocol_version"], PROTOCOL_VERSION);
    }
}

async fn start_service(
    resources: &Path,
    repo_url: Option<&str>,
    socket_path: &Path,
) -> (
    Arc<PortfolioManager>,
    tokio::sync::watch::Sender<bool>,
    tokio::task::JoinHandle<std::io::Result<()>>,
) {
    let mut vars = vec![
        ("FOLIO_RESOURCES_DIR".to_string(), resources.display().to_string()),
        ("FOLIO_REPO_NAME".to_string(), "site".to_string()),
    ];
    if let Some(url) = repo_url {
        vars.push(("FOLIO_REPO_URL".to_string(), url.to_string()));
    }
    let config = ConfigLoader::new()
        .skip_file_layer()
        .with_env_vars(vars)
        .load()
        .unwrap();

    let manager = Arc::new(PortfolioManager::from_config(&config).unwrap());
    let listener = folio_service::ipc::bind(socket_path).unwrap();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(folio_service::ipc::serve(Arc::clone(&manager), listener, rx));
    (manager, tx, handle)
}

fn upload(name: &str) -> serde_json::Value {
    serde_json::json!({"file_name": name, "data": STANDARD.encode(b"jpeg bytes")})
}

fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=seed", "-c", "user.email=seed@example.com"])
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(output.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn seeded_remote(root: &Path) -> String {
    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-q"]);
    std::fs::write(seed.join("README.md"), "portfolio\n").unwrap();
    git(&seed, &["add", "."]);
    git(&seed, &["commit", "-q", "-m", "seed"]);
    git(root, &["clone", "-q", "--bare", "seed", "remote.git"]);
    root.join("remote.git").to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn portfolio_roundtrip_without_working_copy() {
    let tmp = tempfile::TempDir::new().unwrap();
    let socket_path = tmp.path().join("folio.sock");
    let (manager, shutdown, server) =
        start_service(&tmp.path().join("resources"), None, &socket_path).await;

    let client_socket = socket_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut client = TestClient::connect(&client_socket);
        client.handshake();

        let created = client.result(
            "portfolio.create",
            serde_json::json!({
                "images": [upload("2.jpg"), upload("cover.JPG"), upload("notes.txt")],
                "project_name": "Courtyard",
                "area": "140",
            }),
        );
        assert_eq!(created["success"], true, "{created}");
        assert_eq!(created["folder"], "w1");

        let updated = client.result(
            "portfolio.update",
            serde_json::json!({"folder": "w1", "category": "Residential"}),
        );
        assert_eq!(updated["success"], true, "{updated}");

        let listed = client.result("portfolio.list", serde_json::json!(null));
        let item = &listed["data"][0];
        assert_eq!(item["name"], "Portfolio 1");
        assert_eq!(item["project_name"], "Courtyard");
        assert_eq!(item["category"], "Residential");
        let names: Vec<&str> = item["images"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["0.jpg", "2.jpg"]);

        let deleted = client.result("portfolio.delete", serde_json::json!({"folder": "w1"}));
        assert_eq!(deleted["success"], true);
        assert_eq!(deleted["ledger_entry_deleted"], true);

        let doctor = client.result("service.doctor", serde_json::json!(null));
        assert!(doctor["checks"].as_array().unwrap().len() >= 4);
    })
    .await
    .unwrap();

    shutdown.send(true).unwrap();
    server.await.unwrap().unwrap();
    manager.shutdown().await;

    // No working copy was cloned, so every sync was skipped.
    let stats = manager.status().sync;
    assert_eq!(stats.queued, 3);
    assert_eq!(stats.skipped, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_sync_pushes_to_remote() {
    if which::which("git").is_err() {
        eprintln!("git not installed, skipping");
        return;
    }
    let tmp = tempfile::TempDir::new().unwrap();
    let remote = seeded_remote(tmp.path());
    let socket_path = tmp.path().join("folio.sock");
    let (manager, shutdown, server) = start_service(
        &tmp.path().join("resources"),
        Some(&remote),
        &socket_path,
    )
    .await;

    let client_socket = socket_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut client = TestClient::connect(&client_socket);
        client.handshake();

        let cloned = client.result("git.clone", serde_json::json!(null));
        assert_eq!(cloned["success"], true, "{cloned}");

        let created = client.result(
            "portfolio.create",
            serde_json::json!({"images": [upload("1.jpg")], "project_name": "Pier"}),
        );
        assert_eq!(created["success"], true, "{created}");

        let commit = client.result("git.commit", serde_json::json!({"message": ""}));
        assert_eq!(commit["success"], false);
    })
    .await
    .unwrap();

    shutdown.send(true).unwrap();
    server.await.unwrap().unwrap();
    manager.shutdown().await;

    let stats = manager.status().sync;
    assert_eq!(stats.completed, 1, "{stats:?}");
    let log = git(Path::new(&remote), &["log", "--format=%s", "-1"]);
    assert_eq!(log.trim(), "Create portfolio w1");
}
